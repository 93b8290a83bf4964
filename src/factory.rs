//! Resource creation

use async_trait::async_trait;
use std::future::Future;

/// Creates the resources a [`Pool`](crate::Pool) hands out.
///
/// The pool never holds its lock while `create` runs, so a slow or hanging
/// connect only delays the caller that triggered it. Any async closure
/// returning `Result<T, E>` is a factory:
///
/// ```
/// use esox_resourcepool::{Pool, PoolConfiguration};
///
/// let pool = Pool::new(
///     || async { Ok::<_, std::io::Error>(String::from("conn")) },
///     PoolConfiguration::default(),
/// )
/// .unwrap();
/// assert_eq!(pool.pool_size(), 1);
/// ```
#[async_trait]
pub trait Factory: Send + Sync + 'static {
    type Resource: Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn create(&self) -> Result<Self::Resource, Self::Error>;
}

#[async_trait]
impl<F, Fut, T, E> Factory for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    type Resource = T;
    type Error = E;

    async fn create(&self) -> Result<T, E> {
        (self)().await
    }
}
