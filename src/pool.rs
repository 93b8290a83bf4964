//! Core resource pool

use crate::config::PoolConfiguration;
use crate::errors::{ConfigError, PoolError, PoolResult};
use crate::factory::Factory;
use crate::health::PoolStatus;
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::registry::{Acquire, Registry, Reservation, ResourceId};

use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// A checked-out resource.
///
/// Cloning the handle does not check out anything; it is the same pool
/// member with the same [`ResourceId`]. Hand it back with
/// [`Pool::checkin`] or discard it with [`Pool::remove`].
pub struct Pooled<T> {
    id: ResourceId,
    resource: Arc<T>,
}

impl<T> Pooled<T> {
    pub(crate) fn new(id: ResourceId, resource: Arc<T>) -> Self {
        Self { id, resource }
    }

    /// Identity of this resource inside the pool
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Shared pointer to the resource itself
    pub fn resource(&self) -> &Arc<T> {
        &self.resource
    }
}

impl<T> Clone for Pooled<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            resource: Arc::clone(&self.resource),
        }
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .finish()
    }
}

/// Bounded pool of factory-made resources.
///
/// All bookkeeping lives behind one mutex that is never held while the
/// factory or caller code runs. Callers blocked on a full pool wait on a
/// single [`Notify`]; every checkin or removal wakes one of them.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{Pool, PoolConfiguration};
///
/// # #[tokio::main]
/// # async fn main() {
/// let pool = Pool::new(
///     || async { Ok::<_, std::io::Error>(String::from("connection")) },
///     PoolConfiguration::new().with_name("demo").with_pool_size(2),
/// )
/// .unwrap();
///
/// let conn = pool.checkout().await.unwrap();
/// assert_eq!(conn.as_str(), "connection");
/// pool.checkin(&conn);
///
/// assert_eq!(pool.status().idle, 1);
/// # }
/// ```
pub struct Pool<F: Factory> {
    shared: Arc<Shared<F>>,
}

pub(crate) struct Shared<F: Factory> {
    config: PoolConfiguration<F::Resource>,
    factory: F,
    registry: Mutex<Registry<F::Resource>>,
    available: Notify,
    metrics: MetricsTracker,
}

impl<F: Factory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: Factory> Pool<F> {
    /// Create an empty pool. Resources are only created on demand.
    pub fn new(factory: F, config: PoolConfiguration<F::Resource>) -> Result<Self, ConfigError> {
        config.validate()?;

        tracing::debug!(
            pool = %config.name,
            pool_size = config.pool_size,
            "resource pool created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::new(config.pool_size)),
                config,
                factory,
                available: Notify::new(),
                metrics: MetricsTracker::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn pool_size(&self) -> usize {
        self.shared.config.pool_size
    }

    pub fn warn_timeout(&self) -> Duration {
        self.shared.config.warn_timeout
    }

    /// Check out a resource, creating it if the pool has room.
    ///
    /// Waits without limit while every resource is checked out. Wrap the
    /// call in `tokio::time::timeout` (or use [`Pool::checkout_with_cancel`])
    /// to bound it; dropping the future mid-wait or mid-creation releases
    /// any slot it had reserved.
    pub async fn checkout(&self) -> PoolResult<Pooled<F::Resource>, F::Error> {
        let slow = SlowCheckout::start(self);
        let mut waited = false;

        let token = loop {
            let notified = self.shared.available.notified();
            tokio::pin!(notified);

            let mut evicted = Vec::new();
            let outcome = {
                let mut registry = self.shared.registry.lock();
                let outcome = registry.acquire(self.shared.config.validation_function, &mut evicted);
                if matches!(outcome, Acquire::Full) {
                    // Register before unlocking so a checkin in between is not lost
                    notified.as_mut().enable();
                }
                outcome
            };
            self.discard_evicted(evicted);

            match outcome {
                Acquire::Idle(id, resource) => {
                    self.shared.metrics.record_checkout();
                    tracing::debug!(pool = %self.name(), %id, "checked out resource");
                    return Ok(Pooled::new(id, resource));
                }
                Acquire::Reserved(token) => break token,
                Acquire::Full => {
                    // A stale permit can wake us without a free slot; count the wait once
                    if !waited {
                        waited = true;
                        self.shared.metrics.record_wait();
                        tracing::info!(
                            pool = %self.name(),
                            pool_size = self.pool_size(),
                            "waiting for an available resource, all {} resources are checked out",
                            self.pool_size()
                        );
                    }
                    notified.await;
                }
            }
        };
        drop(slow);

        let pending = PendingReservation {
            pool: self,
            token,
            armed: true,
        };
        match self.shared.factory.create().await {
            Ok(resource) => match pending.fulfil(resource) {
                Some(pooled) => {
                    self.shared.metrics.record_created();
                    self.shared.metrics.record_checkout();
                    tracing::debug!(pool = %self.name(), id = %pooled.id, "created and checked out resource");
                    Ok(pooled)
                }
                None => {
                    tracing::warn!(pool = %self.name(), "reservation released before its resource was ready");
                    Err(PoolError::Cancelled)
                }
            },
            Err(err) => {
                drop(pending);
                self.shared.metrics.record_factory_failure();
                tracing::debug!(pool = %self.name(), error = %err, "resource creation failed");
                Err(PoolError::Factory(err))
            }
        }
    }

    /// Check out a resource unless `cancel` fires first.
    ///
    /// Cancellation unwinds exactly like dropping the [`Pool::checkout`]
    /// future and is reported as [`PoolError::Cancelled`].
    pub async fn checkout_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> PoolResult<Pooled<F::Resource>, F::Error> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PoolError::Cancelled),
            result = self.checkout() => result,
        }
    }

    /// Return a resource to the pool.
    ///
    /// Resources that are not checked out (already returned, removed or
    /// renewed away) are ignored.
    pub fn checkin(&self, resource: &Pooled<F::Resource>) {
        self.checkin_id(resource.id);
    }

    /// Drop a broken resource from the pool, freeing its slot
    pub fn remove(&self, resource: &Pooled<F::Resource>) {
        self.remove_id(resource.id);
    }

    /// Replace a checked-out resource with a freshly created one.
    ///
    /// The new resource keeps the old one's slot and stays checked out. A
    /// scoped acquisition holding the old resource releases the new one. If
    /// the factory fails or the call is abandoned, the old resource is
    /// removed from the pool.
    pub async fn renew(
        &self,
        resource: &Pooled<F::Resource>,
    ) -> PoolResult<Pooled<F::Resource>, F::Error> {
        let pending = PendingRenewal {
            pool: self,
            old: resource.id,
            armed: true,
        };
        let created = match self.shared.factory.create().await {
            Ok(created) => Arc::new(created),
            Err(err) => {
                drop(pending);
                self.shared.metrics.record_factory_failure();
                tracing::debug!(pool = %self.name(), old = %resource.id, error = %err, "renewal failed");
                return Err(PoolError::Factory(err));
            }
        };
        pending.disarm();

        let replaced = self
            .shared
            .registry
            .lock()
            .replace(resource.id, Arc::clone(&created));
        match replaced {
            Some(id) => {
                self.shared.metrics.record_renewed();
                tracing::debug!(pool = %self.name(), old = %resource.id, new = %id, "renewed resource");
                Ok(Pooled::new(id, created))
            }
            None => Err(PoolError::NotCheckedOut {
                pool: self.name().to_string(),
                id: resource.id,
            }),
        }
    }

    /// Visit every live resource in creation order.
    ///
    /// The pool stays locked for the whole traversal: `visit` must not block
    /// and must not call back into the pool.
    pub fn each(&self, mut visit: impl FnMut(&F::Resource)) {
        let registry = self.shared.registry.lock();
        for (_, resource) in registry.resources() {
            visit(resource);
        }
    }

    /// Apply the configured close hook to every resource.
    ///
    /// Returns how many resources were closed. The resources stay in the
    /// pool; this is meant for shutdown.
    pub fn close_all(&self) -> usize {
        let Some(close) = self.shared.config.close_function else {
            return 0;
        };
        let mut closed = 0;
        self.each(|resource| {
            close(resource);
            closed += 1;
        });
        tracing::info!(pool = %self.name(), closed, "closed all resources");
        closed
    }

    /// Get a snapshot of the pool's bookkeeping
    pub fn status(&self) -> PoolStatus {
        let registry = self.shared.registry.lock();
        PoolStatus::new(
            self.name(),
            registry.capacity(),
            registry.total(),
            registry.checked_out(),
            registry.reserved(),
            registry.scopes(),
        )
    }

    /// Get pool metrics
    pub fn metrics(&self) -> PoolMetrics {
        self.shared.metrics.get_metrics()
    }

    /// Ids of all live resources in creation order
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        let registry = self.shared.registry.lock();
        registry.resources().map(|(id, _)| id).collect()
    }

    /// Ids of checked-out resources in checkout order
    pub fn checked_out_ids(&self) -> Vec<ResourceId> {
        self.shared.registry.lock().checked_out_ids()
    }

    pub(crate) fn checkin_id(&self, id: ResourceId) {
        let (returned, state) = {
            let mut registry = self.shared.registry.lock();
            let returned = registry.checkin(id);
            (returned, debug_state(&registry))
        };
        self.shared.available.notify_one();

        if returned {
            self.shared.metrics.record_checkin();
            tracing::debug!(pool = %self.name(), %id, state = %state, "checked in resource");
        }
    }

    pub(crate) fn remove_id(&self, id: ResourceId) {
        let (removed, state) = {
            let mut registry = self.shared.registry.lock();
            let removed = registry.remove(id);
            (removed, debug_state(&registry))
        };
        self.shared.available.notify_one();

        if removed {
            self.shared.metrics.record_removed();
            tracing::debug!(pool = %self.name(), %id, state = %state, "removed resource");
        }
    }

    pub(crate) fn close_resource(&self, resource: &F::Resource) {
        if let Some(close) = self.shared.config.close_function {
            close(resource);
        }
    }

    pub(crate) fn registry(&self) -> parking_lot::MutexGuard<'_, Registry<F::Resource>> {
        self.shared.registry.lock()
    }

    fn discard_evicted(&self, evicted: Vec<(ResourceId, Arc<F::Resource>)>) {
        if evicted.is_empty() {
            return;
        }
        self.shared.metrics.record_evicted(evicted.len());
        for (id, resource) in evicted {
            self.close_resource(&resource);
            tracing::debug!(pool = %self.name(), %id, "evicted idle resource that failed validation");
        }
    }
}

fn debug_state<T>(registry: &Registry<T>) -> String {
    if tracing::enabled!(tracing::Level::DEBUG) {
        registry.dump()
    } else {
        String::new()
    }
}

/// Warns when obtaining a slot took longer than `warn_timeout`, including
/// when the checkout is abandoned
struct SlowCheckout<'a, F: Factory> {
    pool: &'a Pool<F>,
    started: Instant,
}

impl<'a, F: Factory> SlowCheckout<'a, F> {
    fn start(pool: &'a Pool<F>) -> Self {
        Self {
            pool,
            started: Instant::now(),
        }
    }
}

impl<F: Factory> Drop for SlowCheckout<'_, F> {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        if elapsed > self.pool.warn_timeout() {
            tracing::warn!(
                pool = %self.pool.name(),
                elapsed = ?elapsed,
                pool_size = self.pool.pool_size(),
                "it took {:?} to obtain a resource, consider raising the pool size which is currently set to {}",
                elapsed,
                self.pool.pool_size()
            );
        }
    }
}

/// Slot reserved for a resource under construction
struct PendingReservation<'a, F: Factory> {
    pool: &'a Pool<F>,
    token: Reservation,
    armed: bool,
}

impl<F: Factory> PendingReservation<'_, F> {
    /// `None` if the reservation is no longer in the registry
    fn fulfil(mut self, resource: F::Resource) -> Option<Pooled<F::Resource>> {
        let resource = Arc::new(resource);
        let id = self.pool.registry().fulfil(self.token, Arc::clone(&resource));
        self.armed = false;
        id.map(|id| Pooled::new(id, resource))
    }
}

impl<F: Factory> Drop for PendingReservation<'_, F> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.pool.registry().cancel(self.token);
        self.pool.shared.available.notify_one();
        tracing::debug!(pool = %self.pool.name(), "released reservation of unfinished resource");
    }
}

/// Old resource of a renewal whose factory call is still running
struct PendingRenewal<'a, F: Factory> {
    pool: &'a Pool<F>,
    old: ResourceId,
    armed: bool,
}

impl<F: Factory> PendingRenewal<'_, F> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<F: Factory> Drop for PendingRenewal<'_, F> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.remove_id(self.old);
        }
    }
}
