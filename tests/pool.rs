use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use cistern::client::{Clock, ErrorKind, PoolBuilder, PoolConfig};
use cistern::info::{ConnectionInfo, Endpoint, HasConnectionInfo};
use cistern::{Dialer, Pool, PoolableConnection};

#[derive(Debug, thiserror::Error)]
#[error("endpoint refused the connection")]
struct Refused;

#[derive(Debug)]
struct Conn {
    open: Arc<AtomicBool>,
}

impl HasConnectionInfo for Conn {
    type Addr = String;

    fn info(&self) -> ConnectionInfo<Self::Addr> {
        ConnectionInfo {
            local_addr: "local".into(),
            remote_addr: "remote".into(),
        }
    }
}

impl PoolableConnection for Conn {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
struct CountingDialer {
    refuse: Arc<AtomicBool>,
    dials: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl Dialer for CountingDialer {
    type Connection = Conn;
    type Error = Refused;

    async fn dial(&self, _: &Endpoint, _: Duration) -> Result<Conn, Refused> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Refused);
        }

        Ok(Conn {
            open: Arc::new(AtomicBool::new(true)),
        })
    }

    async fn close(&self, connection: Conn) -> Result<(), Refused> {
        connection.open.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
struct TestClock(Arc<Mutex<Instant>>);

impl TestClock {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }

    fn advance(&self, by: Duration) {
        *self.0.lock() += by;
    }
}

impl fmt::Debug for TestClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TestClock").finish()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        *self.0.lock()
    }
}

fn pool(max: usize, dialer: &CountingDialer) -> Pool<CountingDialer> {
    PoolBuilder::new(Endpoint::new("db.internal", "5432"))
        .with_dialer(dialer.clone())
        .max_connections(max)
        .reap_interval(None)
        .build()
}

#[tokio::test]
async fn third_get_is_over_max() {
    let _ = tracing_subscriber::fmt::try_init();
    let dialer = CountingDialer::default();
    let pool = pool(2, &dialer);

    let a = pool.get().await.unwrap();
    let b = pool.get().await.unwrap();
    assert_eq!(pool.connection_count(), 2);

    let error = pool.get().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::OverMax);
    assert_eq!(error.to_string(), "connection pool is at capacity");

    pool.put(a).await.unwrap();
    pool.put(b).await.unwrap();
    assert_eq!(pool.idle_count(), 2);
}

#[tokio::test]
async fn failing_dialer_leaks_no_slot() {
    let _ = tracing_subscriber::fmt::try_init();
    let dialer = CountingDialer::default();
    dialer.refuse.store(true, Ordering::SeqCst);
    let pool = pool(2, &dialer);

    let error = pool.get().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Dial);
    assert!(matches!(error.into_inner(), Some(Refused)));
    assert_eq!(pool.connection_count(), 0);
}

#[tokio::test]
async fn put_after_release_tears_down() {
    let _ = tracing_subscriber::fmt::try_init();
    let dialer = CountingDialer::default();
    let pool = pool(2, &dialer);

    let first = pool.get().await.unwrap();
    let second = pool.get().await.unwrap();

    pool.put(first).await.unwrap();
    pool.release().await;
    assert_eq!(dialer.closes.load(Ordering::SeqCst), 1);

    pool.put(second).await.unwrap();
    assert_eq!(dialer.closes.load(Ordering::SeqCst), 2);
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.connection_count(), 0);

    assert_eq!(pool.get().await.unwrap_err().kind(), ErrorKind::PoolClosed);

    pool.recover();
    let _conn = pool.get().await.unwrap();
    assert_eq!(dialer.dials.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn check_timeout_with_injected_clock() {
    let _ = tracing_subscriber::fmt::try_init();
    let dialer = CountingDialer::default();
    let clock = TestClock::new();

    let mut config = PoolConfig::new(Endpoint::new("db.internal", "5432"));
    config.idle_timeout = Duration::from_secs(1);
    config.reap_interval = None;
    let pool = Pool::with_clock(config, dialer.clone(), clock.clone());

    let conn = pool.get().await.unwrap();
    pool.put(conn).await.unwrap();
    assert_eq!(pool.idle_count(), 1);

    clock.advance(Duration::from_secs(2));
    assert_eq!(pool.check_timeout().await, 1);
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(dialer.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reuse_skips_the_dialer() {
    let _ = tracing_subscriber::fmt::try_init();
    let dialer = CountingDialer::default();
    let pool = pool(1, &dialer);

    let conn = pool.get().await.unwrap();
    assert_eq!(conn.info().remote_addr(), "remote");
    pool.put(conn).await.unwrap();

    let conn = pool.get().await.unwrap();
    assert_eq!(dialer.dials.load(Ordering::SeqCst), 1);

    pool.close_err_conn(conn).await;
    assert_eq!(pool.connection_count(), 0);
    assert_eq!(dialer.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn foreign_handle_is_rejected() {
    let _ = tracing_subscriber::fmt::try_init();
    let dialer = CountingDialer::default();
    let pool = pool(1, &dialer);
    let other = self::pool(1, &dialer);

    let conn = other.get().await.unwrap();
    let error = pool.put(conn).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidConnection);
    assert_eq!(pool.connection_count(), 0);
    assert_eq!(pool.idle_count(), 0);
}
