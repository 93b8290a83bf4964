// EsoxSolutions.ResourcePool - Rust
// Bounded resource pool with renewal and retrying acquisition

// This is just a binary wrapper - the actual library is in lib.rs
// Run the demo with: cargo run --example basic

use esox_resourcepool::{Pool, PoolConfiguration};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    println!("=== EsoxSolutions.ResourcePool ===");
    println!("See demos/ directory for usage examples");
    println!("Run: cargo run --example basic");
    println!();

    // Quick demo
    println!("Quick Demo:");
    let counter = Arc::new(AtomicUsize::new(0));
    let pool = Pool::new(
        move || {
            let id = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok::<_, std::io::Error>(format!("connection-{id}")) }
        },
        PoolConfiguration::new().with_name("demo").with_pool_size(2),
    )
    .expect("valid configuration");

    match pool.checkout().await {
        Ok(conn) => {
            println!("  Got resource: {}", *conn);
            pool.checkin(&conn);
        }
        Err(err) => println!("  Checkout failed: {err}"),
    }

    let status = pool.status();
    println!("  Idle after return: {}", status.idle);
}
