//! Pool configuration options

use crate::errors::ConfigError;
use std::time::Duration;

/// Configuration for resource pool behavior
///
/// # Examples
///
/// ```
/// use esox_resourcepool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::<u32>::new()
///     .with_name("orders-db")
///     .with_pool_size(10)
///     .with_warn_timeout(Duration::from_secs(2));
///
/// assert_eq!(config.name, "orders-db");
/// assert_eq!(config.pool_size, 10);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfiguration<T> {
    /// Label used in log messages
    pub name: String,

    /// Maximum number of resources alive at the same time
    pub pool_size: usize,

    /// Checkouts slower than this log a warning; they still succeed
    pub warn_timeout: Duration,

    /// Checked when an idle resource is picked; failing resources are evicted
    pub validation_function: Option<fn(&T) -> bool>,

    /// Closes a resource on explicit discard paths
    pub close_function: Option<fn(&T)>,
}

impl<T> Default for PoolConfiguration<T> {
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            pool_size: 1,
            warn_timeout: Duration::from_secs(5),
            validation_function: None,
            close_function: None,
        }
    }
}

impl<T> PoolConfiguration<T> {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool name used in diagnostics
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the maximum pool size
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_resourcepool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::<u32>::new()
    ///     .with_pool_size(0);
    ///
    /// assert!(config.validate().is_err());
    /// ```
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the slow-checkout warning threshold
    pub fn with_warn_timeout(mut self, timeout: Duration) -> Self {
        self.warn_timeout = timeout;
        self
    }

    /// Evict idle resources for which `func` returns false
    pub fn with_validation(mut self, func: fn(&T) -> bool) -> Self {
        self.validation_function = Some(func);
        self
    }

    /// Set how a discarded resource is closed
    pub fn with_close(mut self, func: fn(&T)) -> Self {
        self.close_function = Some(func);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        Ok(())
    }
}
