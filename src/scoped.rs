//! Scoped and retrying acquisition

use crate::errors::{Failure, PoolError};
use crate::factory::Factory;
use crate::pool::{Pool, Pooled};
use crate::registry::ScopeKey;

use std::future::Future;

/// What happens to a scope's resource when the scope ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Release {
    Checkin,
    Remove,
}

/// Tracks the resource behind one acquisition, following renewals.
///
/// Dropping the scope releases whatever resource backs it at that moment,
/// which is not necessarily the one it started with.
struct Scope<'a, F: Factory> {
    pool: &'a Pool<F>,
    key: ScopeKey,
    release: Release,
}

impl<'a, F: Factory> Scope<'a, F> {
    fn open(pool: &'a Pool<F>, resource: &Pooled<F::Resource>, release: Release) -> Self {
        let key = pool.registry().open_scope(resource.id());
        Self { pool, key, release }
    }

    /// Resource currently backing the scope, `None` once it was removed
    fn current(&self) -> Option<Pooled<F::Resource>> {
        let registry = self.pool.registry();
        let id = registry.scope(self.key)?;
        let resource = registry.resource(id)?;
        Some(Pooled::new(id, resource))
    }
}

impl<F: Factory> Drop for Scope<'_, F> {
    fn drop(&mut self) {
        let current = self.pool.registry().close_scope(self.key);
        if let Some(id) = current {
            match self.release {
                Release::Checkin => self.pool.checkin_id(id),
                Release::Remove => self.pool.remove_id(id),
            }
        }
    }
}

impl<F: Factory> Pool<F> {
    /// Run `logic` with a checked-out resource and always check it back in.
    ///
    /// The resource is returned on success, on error and when the returned
    /// future is dropped. If `logic` renews the resource, the renewed one is
    /// checked in; if it removes it, nothing is.
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_resourcepool::{Pool, PoolConfiguration, PoolError};
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let pool = Pool::new(
    ///     || async { Ok::<_, std::io::Error>(40u32) },
    ///     PoolConfiguration::default(),
    /// )
    /// .unwrap();
    ///
    /// let answer = pool
    ///     .with_resource(|conn| async move { Ok::<_, PoolError<std::io::Error>>(*conn + 2) })
    ///     .await
    ///     .unwrap();
    ///
    /// assert_eq!(answer, 42);
    /// assert_eq!(pool.status().checked_out, 0);
    /// # }
    /// ```
    pub async fn with_resource<R, E, L, Fut>(&self, logic: L) -> Result<R, E>
    where
        L: FnOnce(Pooled<F::Resource>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<PoolError<F::Error>>,
    {
        let resource = self.checkout().await?;
        let _scope = Scope::open(self, &resource, Release::Checkin);
        logic(resource).await
    }

    /// Like [`Pool::with_resource`], retrying `logic` once on a fresh
    /// resource after a [`Failure::Recoverable`].
    ///
    /// On a recoverable failure the suspect resource is closed (when `close`
    /// is set and a close hook is configured), renewed in place and `logic`
    /// runs again. A second failure of either kind removes the resource and
    /// is returned. A [`Failure::Cancelled`] is never retried: the resource
    /// is removed and the failure returned unchanged. Dropping the returned
    /// future also removes the resource instead of recycling it.
    pub async fn with_resource_auto_retry<R, E, L, Fut>(
        &self,
        close: bool,
        mut logic: L,
    ) -> Result<R, Failure<E>>
    where
        L: FnMut(Pooled<F::Resource>) -> Fut,
        Fut: Future<Output = Result<R, Failure<E>>>,
        E: From<PoolError<F::Error>>,
    {
        let resource = self.checkout().await?;
        let mut scope = Scope::open(self, &resource, Release::Remove);

        match logic(resource).await {
            Ok(value) => {
                scope.release = Release::Checkin;
                return Ok(value);
            }
            Err(Failure::Cancelled(err)) => {
                tracing::debug!(pool = %self.name(), "attempt cancelled, discarding resource");
                return Err(Failure::Cancelled(err));
            }
            Err(Failure::Recoverable(_)) => {}
        }

        let retry = match scope.current() {
            Some(suspect) => {
                tracing::warn!(
                    pool = %self.name(),
                    id = %suspect.id(),
                    close,
                    "attempt failed, renewing resource and retrying"
                );
                if close {
                    self.close_resource(&suspect);
                }
                self.renew(&suspect).await?
            }
            None => {
                // logic removed its own resource; start over on a new one
                let fresh = self.checkout().await?;
                scope = Scope::open(self, &fresh, Release::Remove);
                fresh
            }
        };

        match logic(retry).await {
            Ok(value) => {
                scope.release = Release::Checkin;
                Ok(value)
            }
            Err(failure) => {
                tracing::warn!(pool = %self.name(), "retry failed, removing resource");
                Err(failure)
            }
        }
    }
}
