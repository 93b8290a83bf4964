//! Basic usage: checkout, scoped use, renewal and retrying acquisition

use esox_resourcepool::{Failure, Pool, PoolConfiguration, PoolError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct Connection {
    id: usize,
    closed: AtomicBool,
}

impl Connection {
    fn query(&self, sql: &str) -> Result<String, DemoError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DemoError::Closed(self.id));
        }
        Ok(format!("connection-{} ran `{}`", self.id, sql))
    }
}

#[derive(Debug, thiserror::Error)]
enum DemoError {
    #[error("connection {0} is closed")]
    Closed(usize),
    #[error(transparent)]
    Pool(#[from] PoolError<std::io::Error>),
}

#[tokio::main]
async fn main() {
    println!("=== EsoxSolutions.ResourcePool - Basic Examples ===\n");

    let counter = Arc::new(AtomicUsize::new(0));
    let pool = Pool::new(
        move || {
            let id = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                Ok::<_, std::io::Error>(Connection {
                    id,
                    closed: AtomicBool::new(false),
                })
            }
        },
        PoolConfiguration::<Connection>::new()
            .with_name("demo-db")
            .with_pool_size(2)
            .with_close(|conn: &Connection| conn.closed.store(true, Ordering::SeqCst)),
    )
    .unwrap();

    // Example 1: Explicit checkout
    explicit_checkout(&pool).await;

    // Example 2: Scoped use
    scoped(&pool).await;

    // Example 3: Retrying on a broken connection
    auto_retry(&pool).await;

    // Example 4: Bounded wait
    bounded_wait(&pool).await;

    println!("Shutdown: closed {} connection(s)", pool.close_all());
}

async fn explicit_checkout<F>(pool: &Pool<F>)
where
    F: esox_resourcepool::Factory<Resource = Connection, Error = std::io::Error>,
{
    println!("1. Explicit checkout:");
    let conn = pool.checkout().await.unwrap();
    println!("   {}", conn.query("select 1").unwrap());
    pool.checkin(&conn);
    println!("   Status: {:?}\n", pool.status());
}

async fn scoped<F>(pool: &Pool<F>)
where
    F: esox_resourcepool::Factory<Resource = Connection, Error = std::io::Error>,
{
    println!("2. Scoped use with renewal:");
    let inner = pool.clone();
    let result = pool
        .with_resource(|conn| async move {
            let fresh = inner.renew(&conn).await?;
            fresh.query("select 2")
        })
        .await;
    println!("   {:?}", result);
    println!("   Resources: {:?}\n", pool.resource_ids());
}

async fn auto_retry<F>(pool: &Pool<F>)
where
    F: esox_resourcepool::Factory<Resource = Connection, Error = std::io::Error>,
{
    println!("3. Auto retry:");

    // Break the idle connection so the first attempt fails
    pool.each(|conn| conn.closed.store(true, Ordering::SeqCst));

    let result = pool
        .with_resource_auto_retry(true, |conn| async move {
            conn.query("select 3").map_err(Failure::Recoverable)
        })
        .await;
    println!("   {:?}", result);
    println!("   Metrics: {:?}\n", pool.metrics());
}

async fn bounded_wait<F>(pool: &Pool<F>)
where
    F: esox_resourcepool::Factory<Resource = Connection, Error = std::io::Error>,
{
    println!("4. Bounded wait:");
    let a = pool.checkout().await.unwrap();
    let b = pool.checkout().await.unwrap();

    match tokio::time::timeout(Duration::from_millis(100), pool.checkout()).await {
        Ok(_) => println!("   Got a third connection?"),
        Err(_) => println!("   Timed out while the pool was exhausted"),
    }

    pool.checkin(&a);
    pool.checkin(&b);
    println!();
}
