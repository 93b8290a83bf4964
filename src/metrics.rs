//! Metrics collection for resource pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters for a pool since it was created
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{Pool, PoolConfiguration};
///
/// # #[tokio::main]
/// # async fn main() {
/// let pool = Pool::new(
///     || async { Ok::<_, std::io::Error>(1u32) },
///     PoolConfiguration::default(),
/// )
/// .unwrap();
///
/// let conn = pool.checkout().await.unwrap();
/// pool.checkin(&conn);
///
/// let metrics = pool.metrics();
/// assert_eq!(metrics.created, 1);
/// assert_eq!(metrics.checkouts, 1);
/// assert_eq!(metrics.checkins, 1);
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Resources created for empty slots
    pub created: usize,

    /// Resources replaced in place
    pub renewed: usize,

    /// Resources removed from the pool
    pub removed: usize,

    /// Idle resources dropped because they failed validation
    pub evicted: usize,

    /// Successful checkouts
    pub checkouts: usize,

    /// Resources handed back
    pub checkins: usize,

    /// Times a checkout had to wait for a free slot
    pub waits: usize,

    /// Factory calls that failed
    pub factory_failures: usize,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("created".to_string(), self.created.to_string());
        metrics.insert("renewed".to_string(), self.renewed.to_string());
        metrics.insert("removed".to_string(), self.removed.to_string());
        metrics.insert("evicted".to_string(), self.evicted.to_string());
        metrics.insert("checkouts".to_string(), self.checkouts.to_string());
        metrics.insert("checkins".to_string(), self.checkins.to_string());
        metrics.insert("waits".to_string(), self.waits.to_string());
        metrics.insert("factory_failures".to_string(), self.factory_failures.to_string());
        metrics
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    created: AtomicUsize,
    renewed: AtomicUsize,
    removed: AtomicUsize,
    evicted: AtomicUsize,
    checkouts: AtomicUsize,
    checkins: AtomicUsize,
    waits: AtomicUsize,
    factory_failures: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_renewed(&self) {
        self.renewed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_removed(&self) {
        self.removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, count: usize) {
        self.evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_checkout(&self) {
        self.checkouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkin(&self) {
        self.checkins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wait(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_factory_failure(&self) {
        self.factory_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self) -> PoolMetrics {
        PoolMetrics {
            created: self.created.load(Ordering::Relaxed),
            renewed: self.renewed.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            checkouts: self.checkouts.load(Ordering::Relaxed),
            checkins: self.checkins.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            factory_failures: self.factory_failures.load(Ordering::Relaxed),
        }
    }
}
