//! End-to-end behaviour of the pool under sequential, nested and concurrent use.

use async_trait::async_trait;
use esox_resourcepool::{Factory, Failure, Pool, PoolConfiguration, PoolError, Pooled};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct DummyConnection {
    count: usize,
    closed: AtomicBool,
}

impl DummyConnection {
    fn fail_on(&self, counts: &[usize]) -> Result<(), TestError> {
        if counts.contains(&self.count) {
            return Err(TestError::Dummy(self.count));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("connect failed")]
struct ConnectError;

#[derive(Debug, thiserror::Error)]
enum TestError {
    #[error("Dummy exception on count {0}")]
    Dummy(usize),
    #[error(transparent)]
    Pool(#[from] PoolError<ConnectError>),
}

struct DummyFactory {
    counter: Arc<AtomicUsize>,
    delay_ms: Arc<AtomicU64>,
    fail: Arc<AtomicBool>,
}

#[async_trait]
impl Factory for DummyFactory {
    type Resource = DummyConnection;
    type Error = ConnectError;

    async fn create(&self) -> Result<DummyConnection, ConnectError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConnectError);
        }
        let count = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(DummyConnection {
            count,
            closed: AtomicBool::new(false),
        })
    }
}

struct Fixture {
    pool: Pool<DummyFactory>,
    delay_ms: Arc<AtomicU64>,
    fail: Arc<AtomicBool>,
}

fn fixture() -> Fixture {
    let delay_ms = Arc::new(AtomicU64::new(0));
    let fail = Arc::new(AtomicBool::new(false));
    let factory = DummyFactory {
        counter: Arc::new(AtomicUsize::new(0)),
        delay_ms: Arc::clone(&delay_ms),
        fail: Arc::clone(&fail),
    };
    let pool = Pool::new(
        factory,
        PoolConfiguration::<DummyConnection>::new()
            .with_name("TestPool")
            .with_pool_size(10)
            .with_warn_timeout(Duration::from_secs(2))
            .with_close(|conn: &DummyConnection| conn.closed.store(true, Ordering::SeqCst)),
    )
    .unwrap();
    Fixture { pool, delay_ms, fail }
}

fn ids(conns: &[Pooled<DummyConnection>]) -> Vec<esox_resourcepool::ResourceId> {
    conns.iter().map(Pooled::id).collect()
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[test]
fn default_options() {
    let pool = Pool::new(
        || async { Ok::<_, ConnectError>(()) },
        PoolConfiguration::default(),
    )
    .unwrap();

    assert_eq!(pool.name(), "pool");
    assert_eq!(pool.pool_size(), 1);
    assert_eq!(pool.warn_timeout(), Duration::from_secs(5));
}

#[test]
fn configured_options() {
    let Fixture { pool, .. } = fixture();

    assert_eq!(pool.name(), "TestPool");
    assert_eq!(pool.pool_size(), 10);
    assert_eq!(pool.warn_timeout(), Duration::from_secs(2));
}

// ---------------------------------------------------------------------------
// Scoped acquisition
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scoped_use_reuses_one_resource() {
    let Fixture { pool, .. } = fixture();

    for _ in 0..3 {
        let inner = pool.clone();
        pool.with_resource(|conn| async move {
            assert_eq!(conn.count, 1);
            assert_eq!(inner.resource_ids(), vec![conn.id()]);
            assert_eq!(inner.checked_out_ids(), vec![conn.id()]);
            Ok::<_, TestError>(())
        })
        .await
        .unwrap();
        assert_eq!(pool.status().checked_out, 0);
    }
}

#[tokio::test]
async fn scoped_use_next_to_explicit_checkout() {
    let Fixture { pool, .. } = fixture();
    let conn1 = pool.checkout().await.unwrap();

    for _ in 0..3 {
        let inner = pool.clone();
        let first = conn1.clone();
        pool.with_resource(|conn2| async move {
            assert_eq!(first.count, 1);
            assert_eq!(conn2.count, 2);
            assert_eq!(inner.resource_ids(), vec![first.id(), conn2.id()]);
            assert_eq!(inner.checked_out_ids(), vec![first.id(), conn2.id()]);
            Ok::<_, TestError>(())
        })
        .await
        .unwrap();
        assert_eq!(pool.status().checked_out, 1);
    }

    pool.checkin(&conn1);
    assert_eq!(pool.status().checked_out, 0);
}

#[tokio::test]
async fn renew_multiple_times_in_scope() {
    let Fixture { pool, .. } = fixture();
    let inner = pool.clone();

    pool.with_resource(|conn1| async move {
        let conn2 = inner.renew(&conn1).await?;
        let conn3 = inner.renew(&conn2).await?;
        assert_eq!(conn1.count, 1);
        assert_eq!(conn2.count, 2);
        assert_eq!(conn3.count, 3);
        assert_eq!(inner.status().total_resources, 1);
        assert_eq!(inner.status().checked_out, 1);
        Ok::<_, TestError>(())
    })
    .await
    .unwrap();

    assert_eq!(pool.status().total_resources, 1);
    assert_eq!(pool.status().checked_out, 0);
}

#[tokio::test]
async fn remove_in_scope() {
    let Fixture { pool, .. } = fixture();
    let inner = pool.clone();

    pool.with_resource(|conn| async move {
        inner.remove(&conn);
        assert_eq!(inner.status().total_resources, 0);
        assert_eq!(inner.status().checked_out, 0);
        Ok::<_, TestError>(())
    })
    .await
    .unwrap();

    assert_eq!(pool.status().total_resources, 0);
    assert_eq!(pool.status().checked_out, 0);
    assert_eq!(pool.metrics().checkins, 0);
}

#[tokio::test]
async fn remove_from_nested_scopes() {
    let Fixture { pool, .. } = fixture();
    let p1 = pool.clone();

    pool.with_resource(|conn1| async move {
        let p2 = p1.clone();
        p1.with_resource(|conn2| async move {
            let p3 = p2.clone();
            let keep = conn2.clone();
            p2.with_resource(|conn3| async move {
                p3.remove(&conn1);
                p3.remove(&conn3);
                assert_eq!(p3.resource_ids(), vec![keep.id()]);
                assert_eq!(p3.checked_out_ids(), vec![keep.id()]);
                Ok::<_, TestError>(())
            })
            .await?;
            assert_eq!(p2.status().total_resources, 1);
            assert_eq!(p2.status().checked_out, 1);
            Ok::<_, TestError>(())
        })
        .await?;
        assert_eq!(p1.status().total_resources, 1);
        assert_eq!(p1.status().checked_out, 0);
        Ok::<_, TestError>(())
    })
    .await
    .unwrap();

    assert_eq!(pool.status().total_resources, 1);
    assert_eq!(pool.status().checked_out, 0);
    assert_eq!(pool.status().active_scopes, 0);
}

#[tokio::test]
async fn aborted_creation_releases_slot() {
    let Fixture { pool, delay_ms, .. } = fixture();
    let inner = pool.clone();
    let delay = Arc::clone(&delay_ms);

    pool.with_resource(|_conn1| async move {
        delay.store(200, Ordering::SeqCst);
        let result = tokio::time::timeout(
            Duration::from_millis(20),
            inner.with_resource(|_conn2| async { Ok::<_, TestError>(()) }),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(inner.status().total_resources, 1);
        assert_eq!(inner.status().checked_out, 1);
        assert_eq!(inner.status().reserved, 0);
        Ok::<_, TestError>(())
    })
    .await
    .unwrap();

    assert_eq!(pool.status().total_resources, 1);
    assert_eq!(pool.status().checked_out, 0);

    // Nothing is hosed afterwards
    delay_ms.store(0, Ordering::SeqCst);
    let inner = pool.clone();
    pool.with_resource(|conn1| async move {
        assert_eq!(conn1.count, 1);
        inner
            .with_resource(|conn2| async move {
                assert_eq!(conn2.count, 3);
                Ok::<_, TestError>(())
            })
            .await
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn abandoned_renewal_removes_old_resource() {
    let Fixture { pool, delay_ms, .. } = fixture();
    let inner = pool.clone();

    pool.with_resource(|conn| async move {
        delay_ms.store(200, Ordering::SeqCst);
        let result = tokio::time::timeout(Duration::from_millis(20), inner.renew(&conn)).await;
        assert!(result.is_err());
        assert_eq!(inner.status().total_resources, 0);
        Ok::<_, TestError>(())
    })
    .await
    .unwrap();

    assert_eq!(pool.status().total_resources, 0);
    assert_eq!(pool.status().checked_out, 0);
}

#[tokio::test]
async fn failed_renewal_removes_old_resource() {
    let Fixture { pool, fail, .. } = fixture();
    let keep = pool.checkout().await.unwrap();
    let inner = pool.clone();

    pool.with_resource(|conn| async move {
        fail.store(true, Ordering::SeqCst);
        let result = inner.renew(&conn).await;
        assert!(matches!(result, Err(PoolError::Factory(ConnectError))));
        assert_eq!(inner.status().total_resources, 1);
        assert_eq!(inner.status().checked_out, 1);
        assert_eq!(inner.status().active_scopes, 0);
        Ok::<_, TestError>(())
    })
    .await
    .unwrap();

    assert_eq!(pool.resource_ids(), vec![keep.id()]);
    assert_eq!(pool.checked_out_ids(), vec![keep.id()]);
    assert_eq!(pool.metrics().checkins, 0);
    assert_eq!(pool.metrics().removed, 1);
}

#[tokio::test]
async fn checkin_inside_scope_hands_resource_over() {
    let Fixture { pool, .. } = fixture();
    let inner = pool.clone();

    let other = pool
        .with_resource(|conn| async move {
            inner.checkin(&conn);
            let other = inner.checkout().await?;
            assert_eq!(other.id(), conn.id());
            Ok::<_, TestError>(other)
        })
        .await
        .unwrap();

    // The scope ended, but the resource now belongs to another holder
    assert_eq!(pool.checked_out_ids(), vec![other.id()]);
    assert_eq!(pool.status().active_scopes, 0);
    assert_eq!(pool.metrics().checkins, 1);

    let third = pool.checkout().await.unwrap();
    assert_ne!(third.id(), other.id());
    assert_eq!(pool.checked_out_ids(), vec![other.id(), third.id()]);
}

// ---------------------------------------------------------------------------
// Capacity and contention
// ---------------------------------------------------------------------------

#[tokio::test]
async fn never_exceeds_pool_size() {
    let Fixture { pool, .. } = fixture();
    let size = pool.pool_size();
    let mut conns = Vec::new();

    for i in 1..=size {
        let conn = pool.checkout().await.unwrap();
        assert_eq!(conn.count, i);
        conns.push(conn);
        assert_eq!(pool.status().total_resources, i);
        assert_eq!(pool.status().checked_out, i);
        assert_eq!(pool.resource_ids(), ids(&conns));
    }

    let blocked = tokio::time::timeout(Duration::from_millis(50), pool.checkout()).await;
    assert!(blocked.is_err(), "checkout should have waited");

    for (i, conn) in conns.iter().enumerate() {
        pool.checkin(conn);
        assert_eq!(pool.status().total_resources, size);
        assert_eq!(pool.status().checked_out, size - i - 1);
    }
}

#[tokio::test]
async fn waiter_is_woken_by_checkin() {
    let Fixture { pool, .. } = fixture();
    let mut conns = Vec::new();
    for _ in 0..pool.pool_size() {
        conns.push(pool.checkout().await.unwrap());
    }

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.checkout().await.map(|conn| conn.id()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    pool.checkin(&conns[3]);
    let id = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(id, conns[3].id());
    assert_eq!(pool.metrics().waits, 1);
}

#[tokio::test]
async fn removal_wakes_waiter_with_new_resource() {
    let Fixture { pool, .. } = fixture();
    let mut conns = Vec::new();
    for _ in 0..pool.pool_size() {
        conns.push(pool.checkout().await.unwrap());
    }

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.checkout().await.map(|conn| conn.count) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    pool.remove(&conns[0]);
    let count = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(count, 11);
    assert_eq!(pool.status().total_resources, 10);
}

#[tokio::test]
async fn cancelled_checkout_leaves_pool_consistent() {
    let Fixture { pool, .. } = fixture();
    let mut conns = Vec::new();
    for _ in 0..pool.pool_size() {
        conns.push(pool.checkout().await.unwrap());
    }

    let token = CancellationToken::new();
    let waiter = {
        let pool = pool.clone();
        let token = token.clone();
        tokio::spawn(async move { pool.checkout_with_cancel(&token).await.map(|conn| conn.id()) })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    token.cancel();

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(PoolError::Cancelled)));

    pool.checkin(&conns[0]);
    let again = tokio::time::timeout(Duration::from_secs(1), pool.checkout())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.id(), conns[0].id());
    assert_eq!(pool.status().total_resources, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn thread_contention() {
    let Fixture { pool, .. } = fixture();
    let size = pool.pool_size();

    // Once with new resources and once with reused ones
    for _ in 0..2 {
        let handles: Vec<_> = (0..size)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.checkout().await.unwrap() })
            })
            .collect();
        let mut conns = Vec::new();
        for handle in handles {
            conns.push(handle.await.unwrap());
        }

        assert_eq!(pool.status().total_resources, size);
        assert_eq!(pool.status().checked_out, size);
        let mut distinct = ids(&conns);
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), size);

        let handles: Vec<_> = conns
            .into_iter()
            .map(|conn| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.checkin(&conn) })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(pool.status().total_resources, size);
        assert_eq!(pool.status().checked_out, 0);
    }

    let mut counts = Vec::new();
    pool.each(|conn| counts.push(conn.count));
    counts.sort();
    assert_eq!(counts, (1..=size).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scoped_use_under_contention_stays_bounded() {
    let Fixture { pool, .. } = fixture();
    let in_use = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let pool = pool.clone();
            let in_use = Arc::clone(&in_use);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                pool.with_resource(|_conn| async move {
                    let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    in_use.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, TestError>(())
                })
                .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= pool.pool_size());
    assert!(pool.status().total_resources <= pool.pool_size());
    assert_eq!(pool.status().checked_out, 0);
    assert_eq!(pool.status().active_scopes, 0);
}

// ---------------------------------------------------------------------------
// Retrying acquisition
// ---------------------------------------------------------------------------

#[tokio::test]
async fn auto_retry_after_one_failure() {
    let Fixture { pool, .. } = fixture();

    for (i, close) in [(1, false), (2, true)] {
        let conns = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = Arc::clone(&conns);
        let inner = pool.clone();

        pool.with_resource_auto_retry(close, |conn| {
            seen.lock().push(conn.clone());
            let inner = inner.clone();
            async move {
                conn.fail_on(&[i]).map_err(Failure::Recoverable)?;
                assert_eq!(inner.status().total_resources, 1);
                assert_eq!(inner.status().checked_out, 1);
                assert_eq!(conn.count, i + 1);
                Ok::<_, Failure<TestError>>(())
            }
        })
        .await
        .unwrap();

        let conns = conns.lock();
        assert_eq!(conns.len(), 2);
        assert_eq!(conns[0].is_closed(), close);
        assert!(!conns[1].is_closed());
    }

    assert_eq!(pool.status().total_resources, 1);
    assert_eq!(pool.status().checked_out, 0);
}

#[tokio::test]
async fn auto_retry_fails_on_double_failure() {
    let Fixture { pool, .. } = fixture();

    let err = pool
        .with_resource_auto_retry(false, |conn| async move {
            conn.fail_on(&[1, 2]).map_err(Failure::Recoverable)
        })
        .await
        .unwrap_err();

    assert!(err.is_recoverable());
    assert_eq!(err.to_string(), "Dummy exception on count 2");
    assert_eq!(pool.status().total_resources, 0);
    assert_eq!(pool.status().checked_out, 0);

    pool.with_resource(|conn| async move {
        assert_eq!(conn.count, 3);
        Ok::<_, TestError>(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn auto_retry_not_on_timeout() {
    let Fixture { pool, .. } = fixture();

    let result = tokio::time::timeout(
        Duration::from_millis(20),
        pool.with_resource_auto_retry(false, |_conn| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, Failure<TestError>>(())
        }),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(pool.status().total_resources, 0);
    assert_eq!(pool.status().checked_out, 0);

    let inner = pool.clone();
    pool.with_resource_auto_retry(false, |conn| {
        let inner = inner.clone();
        async move {
            assert_eq!(conn.count, 2);
            assert_eq!(inner.status().checked_out, 1);
            Ok::<_, Failure<TestError>>(())
        }
    })
    .await
    .unwrap();

    assert_eq!(pool.status().total_resources, 1);
    assert_eq!(pool.status().checked_out, 0);
}

#[tokio::test]
async fn auto_retry_propagates_explicit_cancellation() {
    let Fixture { pool, .. } = fixture();
    let attempts = AtomicUsize::new(0);

    let err = pool
        .with_resource_auto_retry(true, |conn| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(Failure::Cancelled(TestError::Dummy(conn.count))) }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Failure::Cancelled(TestError::Dummy(1))));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(pool.status().total_resources, 0);
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct LogBuffer(Arc<parking_lot::Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    (buffer, tracing::subscriber::set_default(subscriber))
}

fn single_slot_pool(warn_timeout: Duration) -> Pool<impl Factory<Resource = (), Error = ConnectError>> {
    Pool::new(
        || async { Ok::<_, ConnectError>(()) },
        PoolConfiguration::new()
            .with_name("SlowPool")
            .with_pool_size(1)
            .with_warn_timeout(warn_timeout),
    )
    .unwrap()
}

#[tokio::test]
async fn slow_checkout_warns_with_pool_size() {
    let (logs, _guard) = capture_logs();
    let pool = single_slot_pool(Duration::from_millis(50));
    let held = pool.checkout().await.unwrap();

    let (conn, ()) = tokio::join!(pool.checkout(), async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        pool.checkin(&held);
    });
    conn.unwrap();

    let logs = logs.contents();
    assert!(logs.contains("waiting for an available resource, all 1 resources are checked out"));
    let warnings: Vec<_> = logs.lines().filter(|line| line.contains("WARN")).collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("consider raising the pool size which is currently set to 1"));
    assert!(warnings[0].contains("pool=SlowPool"));
}

#[tokio::test]
async fn short_wait_is_logged_once_without_warning() {
    let (logs, _guard) = capture_logs();
    let pool = single_slot_pool(Duration::from_secs(5));

    // Nobody waits on this checkin, so its wakeup is stored for later
    let first = pool.checkout().await.unwrap();
    pool.checkin(&first);
    let held = pool.checkout().await.unwrap();

    let (conn, ()) = tokio::join!(pool.checkout(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.checkin(&held);
    });
    conn.unwrap();

    let logs = logs.contents();
    assert_eq!(logs.matches("waiting for an available resource").count(), 1);
    assert!(!logs.contains("consider raising the pool size"));
    assert_eq!(pool.metrics().waits, 1);
}
