//! A dialer full of in-memory connections, suitable for testing pool behavior.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use crate::client::conn::{Dialer, PoolableConnection};
use crate::info::{ConnectionInfo, Endpoint, HasConnectionInfo};

/// An error returned by the mock dialer.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[error("connection error")]
pub struct MockConnectionError;

/// Unique identifier for a mock connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(usize);

impl ConnectionId {
    fn new() -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(1);
        ConnectionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mock-{}", self.0)
    }
}

/// The address type for mock connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MockAddress;

impl fmt::Display for MockAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("mock")
    }
}

/// An in-memory connection.
///
/// Clones share their open/closed state, so a test can hold on to a clone and
/// kill the connection while the pool owns it.
#[derive(Debug, Clone)]
pub struct MockConnection {
    id: ConnectionId,
    open: Arc<AtomicBool>,
}

impl MockConnection {
    /// Create a new open connection.
    pub fn new() -> Self {
        Self {
            id: ConnectionId::new(),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Create a connection which reports itself as already closed.
    pub fn closed() -> Self {
        let conn = Self::new();
        conn.close();
        conn
    }

    /// The unique identifier for this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Mark this connection (and all of its clones) as closed.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl HasConnectionInfo for MockConnection {
    type Addr = MockAddress;

    fn info(&self) -> ConnectionInfo<Self::Addr> {
        ConnectionInfo::default()
    }
}

impl PoolableConnection for MockConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// How the mock dialer responds to connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialMode {
    /// Return a new, open connection.
    Open,

    /// Return a connection which fails its liveness check.
    Closed,

    /// Fail with [`MockConnectionError`].
    Error,
}

#[derive(Debug)]
struct MockDialerState {
    mode: Mutex<DialMode>,
    delay: Mutex<Option<Duration>>,
    fail_close: AtomicBool,
    dials: AtomicUsize,
    closed: Mutex<Vec<ConnectionId>>,
    last_timeout: Mutex<Option<Duration>>,
}

/// A dialer which hands out [`MockConnection`]s and records what the pool asks of it.
///
/// Clones share their state and their counters.
#[derive(Debug, Clone)]
pub struct MockDialer {
    state: Arc<MockDialerState>,
}

impl MockDialer {
    /// Create a dialer in the given mode.
    pub fn new(mode: DialMode) -> Self {
        Self {
            state: Arc::new(MockDialerState {
                mode: Mutex::new(mode),
                delay: Mutex::new(None),
                fail_close: AtomicBool::new(false),
                dials: AtomicUsize::new(0),
                closed: Mutex::new(Vec::new()),
                last_timeout: Mutex::new(None),
            }),
        }
    }

    /// Dialer which always produces open connections.
    pub fn open() -> Self {
        Self::new(DialMode::Open)
    }

    /// Dialer which always fails to connect.
    pub fn error() -> Self {
        Self::new(DialMode::Error)
    }

    /// Change how subsequent connection attempts behave.
    pub fn set_mode(&self, mode: DialMode) {
        *self.state.mode.lock() = mode;
    }

    /// Delay each connection attempt by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.state.delay.lock() = delay;
    }

    /// Make teardown fail with [`MockConnectionError`] (the connection is still recorded as closed).
    pub fn set_fail_close(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Number of connection attempts made so far.
    pub fn dial_count(&self) -> usize {
        self.state.dials.load(Ordering::SeqCst)
    }

    /// Number of connections torn down so far.
    pub fn close_count(&self) -> usize {
        self.state.closed.lock().len()
    }

    /// Identifiers of the connections torn down so far, in teardown order.
    pub fn closed(&self) -> Vec<ConnectionId> {
        self.state.closed.lock().clone()
    }

    /// The connect timeout passed to the most recent connection attempt.
    pub fn last_connect_timeout(&self) -> Option<Duration> {
        *self.state.last_timeout.lock()
    }
}

impl Dialer for MockDialer {
    type Connection = MockConnection;
    type Error = MockConnectionError;

    async fn dial(
        &self,
        _endpoint: &Endpoint,
        connect_timeout: Duration,
    ) -> Result<Self::Connection, Self::Error> {
        self.state.dials.fetch_add(1, Ordering::SeqCst);
        *self.state.last_timeout.lock() = Some(connect_timeout);

        let delay = *self.state.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mode = *self.state.mode.lock();
        match mode {
            DialMode::Open => Ok(MockConnection::new()),
            DialMode::Closed => Ok(MockConnection::closed()),
            DialMode::Error => Err(MockConnectionError),
        }
    }

    async fn close(&self, connection: Self::Connection) -> Result<(), Self::Error> {
        connection.close();
        self.state.closed.lock().push(connection.id());

        if self.state.fail_close.load(Ordering::SeqCst) {
            Err(MockConnectionError)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(MockConnectionError: std::error::Error, Send, Sync);
    assert_impl_all!(MockDialer: Dialer, Clone, Send, Sync);
    assert_impl_all!(MockConnection: PoolableConnection);

    #[tokio::test]
    async fn dial_modes() {
        let dialer = MockDialer::open();
        let endpoint = Endpoint::new("mock", "0");

        let conn = dialer.dial(&endpoint, Duration::from_secs(1)).await.unwrap();
        assert!(conn.is_open());

        dialer.set_mode(DialMode::Closed);
        let conn = dialer.dial(&endpoint, Duration::from_secs(1)).await.unwrap();
        assert!(!conn.is_open());

        dialer.set_mode(DialMode::Error);
        assert_eq!(
            dialer.dial(&endpoint, Duration::from_secs(1)).await.unwrap_err(),
            MockConnectionError
        );

        assert_eq!(dialer.dial_count(), 3);
        assert_eq!(dialer.last_connect_timeout(), Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn close_records_connection() {
        let dialer = MockDialer::open();
        let conn = MockConnection::new();
        let watcher = conn.clone();

        dialer.close(conn).await.unwrap();
        assert!(!watcher.is_open());
        assert_eq!(dialer.closed(), vec![watcher.id()]);

        dialer.set_fail_close(true);
        assert!(dialer.close(MockConnection::new()).await.is_err());
        assert_eq!(dialer.close_count(), 2);
    }
}
