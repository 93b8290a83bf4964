//! Health snapshot of a resource pool

/// Point-in-time view of a pool's bookkeeping
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{Pool, PoolConfiguration};
///
/// let pool = Pool::new(
///     || async { Ok::<_, std::io::Error>(()) },
///     PoolConfiguration::new().with_pool_size(4),
/// )
/// .unwrap();
///
/// let status = pool.status();
/// assert!(status.is_healthy());
/// assert_eq!(status.total_resources, 0);
/// assert_eq!(status.pool_size, 4);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolStatus {
    /// Pool name
    pub name: String,

    /// Whether the pool still has room to serve a checkout without waiting
    pub is_healthy: bool,

    /// Checked out share of the pool size (0.0 to 1.0)
    pub utilization: f64,

    /// Members of the pool, including slots still being created
    pub total_resources: usize,

    /// Members handed out, including slots still being created
    pub checked_out: usize,

    /// Live resources waiting for a checkout
    pub idle: usize,

    /// Slots whose resource is being created
    pub reserved: usize,

    /// Scoped acquisitions in progress
    pub active_scopes: usize,

    /// Configured maximum
    pub pool_size: usize,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl PoolStatus {
    pub(crate) fn new(
        name: &str,
        pool_size: usize,
        total: usize,
        checked_out: usize,
        reserved: usize,
        active_scopes: usize,
    ) -> Self {
        let utilization = if pool_size > 0 {
            checked_out as f64 / pool_size as f64
        } else {
            0.0
        };
        let idle = total - checked_out;

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if checked_out >= pool_size {
            warnings.push(format!("All {pool_size} resources are checked out"));
            is_healthy = false;
        }

        if reserved > 0 {
            warnings.push(format!("{reserved} resource(s) still being created"));
        }

        Self {
            name: name.to_string(),
            is_healthy,
            utilization,
            total_resources: total,
            checked_out,
            idle,
            reserved,
            active_scopes,
            pool_size,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}
