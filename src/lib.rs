//! # EsoxSolutions.ResourcePool
//!
//! Bounded, thread-safe pool for expensive resources such as network or
//! database connections, built for tokio.
//!
//! ## Features
//!
//! - Fixed maximum number of live resources, created on demand
//! - Resource creation never runs under the pool lock
//! - Callers wait while the pool is exhausted; cancel them from outside
//! - In-place renewal of a checked-out resource
//! - Scoped acquisition that always releases the current resource
//! - Retrying acquisition: one retry on a renewed resource, never after a
//!   cancellation
//! - Validation of idle resources, close hooks, health status and metrics
//! - Structured logging through `tracing`
//!
//! ## Quick Start
//!
//! ```rust
//! use esox_resourcepool::{Failure, Pool, PoolConfiguration, PoolError};
//!
//! #[derive(Debug, thiserror::Error)]
//! enum AppError {
//!     #[error(transparent)]
//!     Pool(#[from] PoolError<std::io::Error>),
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let pool = Pool::new(
//!     || async { Ok::<_, std::io::Error>(String::from("connection")) },
//!     PoolConfiguration::new().with_name("db").with_pool_size(4),
//! )
//! .unwrap();
//!
//! let len = pool
//!     .with_resource_auto_retry(false, |conn| async move {
//!         Ok::<_, Failure<AppError>>(conn.len())
//!     })
//!     .await
//!     .unwrap();
//!
//! assert_eq!(len, 10);
//! # }
//! ```

mod pool;
mod scoped;
mod config;
mod factory;
mod registry;
mod metrics;
mod health;
mod errors;

pub use pool::{Pool, Pooled};
pub use config::PoolConfiguration;
pub use factory::Factory;
pub use registry::ResourceId;
pub use metrics::PoolMetrics;
pub use health::PoolStatus;
pub use errors::{ConfigError, Failure, PoolError, PoolResult};
