//! Error types for the resource pool

use crate::registry::ResourceId;
use thiserror::Error;

/// Errors raised by pool operations.
///
/// `E` is the error type of the pool's [`Factory`](crate::Factory).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError<E> {
    #[error("Failed to create resource: {0}")]
    Factory(#[source] E),

    #[error("Can't renew resource {id} in pool `{pool}`: it is not checked out")]
    NotCheckedOut { pool: String, id: ResourceId },

    #[error("Operation was cancelled")]
    Cancelled,
}

impl<E> PoolError<E> {
    /// Whether this error is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PoolError::Cancelled)
    }
}

pub type PoolResult<T, E> = Result<T, PoolError<E>>;

/// Invalid pool configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Pool size must be at least 1")]
    ZeroPoolSize,

    #[error("Pool name must not be empty")]
    EmptyName,
}

/// Outcome of a failed attempt inside
/// [`Pool::with_resource_auto_retry`](crate::Pool::with_resource_auto_retry).
///
/// The distinction is closed: a `Recoverable` failure earns exactly one retry
/// on a renewed resource, a `Cancelled` one discards the resource and is
/// returned as is.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{Failure, PoolError};
///
/// let failure: Failure<PoolError<std::io::Error>> = PoolError::<std::io::Error>::Cancelled.into();
/// assert!(failure.is_cancelled());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Failure<E> {
    #[error("{0}")]
    Recoverable(E),

    #[error("Cancelled: {0}")]
    Cancelled(E),
}

impl<E> Failure<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Failure::Cancelled(_))
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Failure::Recoverable(_))
    }

    /// Unwrap the underlying error regardless of its class
    pub fn into_inner(self) -> E {
        match self {
            Failure::Recoverable(e) | Failure::Cancelled(e) => e,
        }
    }
}

impl<E, F> From<PoolError<F>> for Failure<E>
where
    E: From<PoolError<F>>,
{
    fn from(err: PoolError<F>) -> Self {
        if err.is_cancelled() {
            Failure::Cancelled(err.into())
        } else {
            Failure::Recoverable(err.into())
        }
    }
}
