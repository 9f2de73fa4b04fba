//! Connection Pooling for Clients
//!
//! The `pool` module provides a bounded pool of connections to a single remote endpoint,
//! which allows connections to be established once and reused across many requests.
//!
//! The pool is independent of the transport and wire protocol. New connections come from a
//! [`Dialer`], which also tears connections down when the pool discards them, and pooled
//! connections only need to implement [`PoolableConnection`] so the pool can ask whether
//! they are still open.
//!
//! All pool bookkeeping (the outstanding connection count, the idle queue and the closed
//! flag) sits behind a single lock. The lock is never held while dialing, tearing down,
//! or checking a connection, so one slow connection cannot stall other callers.
//!
//! Pool configuration happens in the [`Config`] type, which sets the endpoint, the maximum
//! number of outstanding connections, and the connect and idle timeouts.

use std::fmt;
use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

mod clock;
mod error;
mod idle;
mod reaper;

#[cfg(any(test, feature = "mock"))]
pub use self::clock::ManualClock;
pub use self::clock::{Clock, SystemClock};
pub use self::error::{Error, ErrorKind};
pub use self::idle::ReapOrder;

use self::idle::IdleConnections;
use self::reaper::Reaper;

use super::conn::{Dialer, PoolableConnection};
use crate::DebugLiteral;
use crate::info::Endpoint;

/// Configuration for a connection pool.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// The remote endpoint connections are made to.
    pub endpoint: Endpoint,

    /// The maximum number of outstanding connections: checked out, idle, or being dialed.
    pub max_connections: usize,

    /// The timeout handed to the dialer for each new connection.
    pub connect_timeout: Duration,

    /// How long a connection may sit idle before the reaper evicts it.
    pub idle_timeout: Duration,

    /// How often the background reaper runs. `None` disables the background reaper,
    /// leaving eviction to explicit calls to [`Pool::check_timeout`].
    pub reap_interval: Option<Duration>,

    /// Which end of the idle queue the reaper inspects.
    pub reap_order: ReapOrder,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            max_connections: 32,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(90),
            reap_interval: Some(Duration::from_secs(60)),
            reap_order: ReapOrder::default(),
        }
    }
}

impl Config {
    /// Default configuration for the given endpoint.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Default::default()
        }
    }

    /// Configuration with timeouts given in whole seconds.
    pub fn from_secs(
        host: impl Into<String>,
        port: impl Into<String>,
        max_connections: usize,
        connect_timeout: u32,
        idle_timeout: u32,
    ) -> Self {
        Self {
            endpoint: Endpoint::new(host, port),
            max_connections,
            connect_timeout: Duration::from_secs(connect_timeout.into()),
            idle_timeout: Duration::from_secs(idle_timeout.into()),
            ..Default::default()
        }
    }
}

/// A bounded pool of connections to a single endpoint.
///
/// Connections are checked out with [`Pool::get`] and must be handed back with either
/// [`Pool::put`], when the connection is still healthy, or [`Pool::close_err_conn`], when
/// the caller knows it is broken. A [`Pooled`] handle which is dropped without either is
/// returned as if by [`Pool::put`].
///
/// The pool never waits for capacity. When every slot is in use, [`Pool::get`] fails
/// immediately with [`Error::OverMax`].
///
/// Cloning a pool produces another handle to the same pool.
pub struct Pool<D: Dialer> {
    shared: Arc<Shared<D>>,
}

impl<D: Dialer> Clone for Pool<D> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<D: Dialer> fmt::Debug for Pool<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Pool")
            .field("endpoint", &DebugLiteral(&self.shared.config.endpoint))
            .field("outstanding", &state.outstanding)
            .field("idle", &state.idle.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<D: Dialer> Pool<D> {
    /// Create a pool using the system clock.
    ///
    /// When the configuration asks for a background reaper, it is spawned on the current
    /// tokio runtime. Outside of a runtime, no reaper is started.
    pub fn new(config: Config, dialer: D) -> Self {
        Self::with_clock(config, dialer, SystemClock)
    }

    /// Create a pool which reads time from `clock`.
    pub fn with_clock(config: Config, dialer: D, clock: impl Clock) -> Self {
        Self::with_shared_clock(config, dialer, Arc::new(clock))
    }

    pub(crate) fn with_shared_clock(config: Config, dialer: D, clock: Arc<dyn Clock>) -> Self {
        let reap_interval = config.reap_interval;
        let shared = Arc::new(Shared {
            config,
            dialer,
            clock,
            state: Mutex::new(PoolState::default()),
            reaper: Mutex::new(None),
        });

        if let Some(interval) = reap_interval {
            *shared.reaper.lock() = Reaper::spawn(&shared, interval);
        }

        Self { shared }
    }

    /// The configuration this pool was created with.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// The dialer this pool uses to create and tear down connections.
    pub fn dialer(&self) -> &D {
        &self.shared.dialer
    }

    /// Check out a connection.
    ///
    /// Returns the least recently returned idle connection if there is one, otherwise
    /// dials a new connection as long as the pool is below its maximum. Connections are
    /// checked with [`PoolableConnection::is_open`] before they are handed out.
    ///
    /// Dropping the returned future while it is dialing releases the reserved slot.
    #[cfg_attr(not(tarpaulin), tracing::instrument(skip_all, fields(endpoint = %self.shared.config.endpoint), level = "debug"))]
    pub async fn get(&self) -> Result<Pooled<D>, Error<D::Error>> {
        let shared = &self.shared;

        let (epoch, idle) = {
            let mut state = shared.state.lock();
            if state.closed {
                trace!("pool closed");
                return Err(Error::PoolClosed);
            }

            match state.idle.pop() {
                Some(connection) => (state.epoch, Some(connection)),
                None if state.outstanding >= shared.config.max_connections => {
                    trace!(outstanding = state.outstanding, "pool at capacity");
                    return Err(Error::OverMax);
                }
                None => {
                    state.outstanding += 1;
                    (state.epoch, None)
                }
            }
        };

        let slot = Slot {
            shared,
            epoch,
            armed: true,
        };

        let connection = match idle {
            Some(connection) => {
                trace!("connection found in pool");
                connection
            }
            None => {
                trace!(outstanding = slot.outstanding(), "connecting to endpoint");
                shared
                    .dialer
                    .dial(&shared.config.endpoint, shared.config.connect_timeout)
                    .await
                    .map_err(|error| {
                        debug!(%error, "connection failed");
                        Error::Dial(error)
                    })?
            }
        };

        if !connection.is_open() {
            debug!("connection failed liveness check");
            return Err(Error::SocketDisconnect);
        }

        slot.keep();
        Ok(Pooled {
            connection: Some(connection),
            pool: Arc::downgrade(shared),
            epoch,
        })
    }

    /// Return a healthy connection to the pool.
    ///
    /// The connection goes back on the idle queue unless the pool is closed, the pool
    /// is over its maximum, or the connection is no longer open. In those cases it is
    /// torn down and any teardown error is returned.
    ///
    /// A handle from a different pool is rejected with [`Error::InvalidConnection`]
    /// without touching this pool. That handle is returned to its own pool when dropped.
    pub async fn put(&self, mut connection: Pooled<D>) -> Result<(), Error<D::Error>> {
        if !connection.belongs_to(&self.shared) {
            debug!("connection returned to the wrong pool");
            return Err(Error::InvalidConnection);
        }

        let (inner, epoch) = connection.take().ok_or(Error::InvalidConnection)?;
        self.shared.put(inner, epoch).await
    }

    /// Discard a connection the caller knows to be broken.
    ///
    /// The connection is always torn down and its slot released. Teardown errors are
    /// logged and otherwise ignored.
    pub async fn close_err_conn(&self, mut connection: Pooled<D>) {
        let Some(owner) = connection.pool.upgrade() else {
            trace!("discarding connection from a dropped pool");
            return;
        };

        if !Arc::ptr_eq(&owner, &self.shared) {
            debug!("discarding connection belonging to another pool");
        }

        if let Some((inner, epoch)) = connection.take() {
            owner.discard(inner, epoch).await;
        }
    }

    /// Evict idle connections which have outlived the idle timeout, returning how many
    /// were evicted.
    ///
    /// The background reaper calls this on its own schedule; it is exposed for pools
    /// without a reaper, and for callers who want to sweep on demand.
    pub async fn check_timeout(&self) -> usize {
        self.shared.check_timeout().await
    }

    /// The number of connections currently idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.shared.idle_count()
    }

    /// The number of outstanding connections: checked out, idle, or being dialed.
    pub fn connection_count(&self) -> usize {
        self.shared.state.lock().outstanding
    }

    /// Whether the pool has been released and not yet recovered.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Close the pool and tear down every idle connection.
    ///
    /// Connections which are checked out at the time of release are not tracked any
    /// more: when they come back they are torn down instead of recycled. Use
    /// [`Pool::recover`] to start handing out connections again.
    pub async fn release(&self) {
        self.shared.release().await
    }

    /// Reopen a released pool.
    ///
    /// The pool starts empty. New connections are dialed as they are requested.
    pub fn recover(&self) {
        let mut state = self.shared.state.lock();
        if state.closed {
            debug!(endpoint = %self.shared.config.endpoint, "pool recovered");
            state.closed = false;
        }
    }

    /// Release the pool and stop its background reaper, waiting for the reaper to exit.
    ///
    /// This affects every clone of the pool. The pool can still be recovered afterwards,
    /// but idle connections will only be evicted by explicit calls to
    /// [`Pool::check_timeout`].
    pub async fn shutdown(&self) {
        self.release().await;

        let reaper = self.shared.reaper.lock().take();
        if let Some(reaper) = reaper {
            reaper.shutdown().await;
        }
    }
}

/// State shared between pool handles, checked out connections and the reaper.
struct Shared<D: Dialer> {
    config: Config,
    dialer: D,
    clock: Arc<dyn Clock>,
    state: Mutex<PoolState<D::Connection>>,
    reaper: Mutex<Option<Reaper>>,
}

impl<D: Dialer> Shared<D> {
    fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    async fn put(&self, connection: D::Connection, epoch: u64) -> Result<(), Error<D::Error>> {
        let open = connection.is_open();
        let now = self.clock.now();

        let reason = {
            let mut state = self.state.lock();
            if state.closed {
                "pool closed"
            } else if state.epoch != epoch {
                warn!(
                    endpoint = %self.config.endpoint,
                    "connection checked out before the pool was released was returned"
                );
                "checked out before release"
            } else if state.outstanding > self.config.max_connections {
                state.release_slot(epoch);
                "pool over capacity"
            } else if !open {
                state.release_slot(epoch);
                "connection not open"
            } else {
                state.idle.push(connection, now);
                trace!(idle = state.idle.len(), "connection returned to pool");
                return Ok(());
            }
        };

        debug!(reason, "tearing down returned connection");
        self.dialer.close(connection).await.map_err(Error::Close)
    }

    async fn discard(&self, connection: D::Connection, epoch: u64) {
        self.state.lock().release_slot(epoch);

        if let Err(error) = self.dialer.close(connection).await {
            debug!(%error, "error tearing down discarded connection");
        }
    }

    async fn check_timeout(&self) -> usize {
        let mut evicted = 0;

        loop {
            let (connection, epoch) = {
                let mut state = self.state.lock();
                let now = self.clock.now();
                match state
                    .idle
                    .pop_expired(self.config.idle_timeout, now, self.config.reap_order)
                {
                    Some(connection) => (connection, state.epoch),
                    None => break,
                }
            };

            trace!("evicting idle connection");
            if let Err(error) = self.dialer.close(connection).await {
                debug!(%error, "error tearing down idle connection");
            }

            self.state.lock().release_slot(epoch);
            evicted += 1;
        }

        evicted
    }

    async fn release(&self) {
        let idle = {
            let mut state = self.state.lock();
            let checked_out = state.outstanding.saturating_sub(state.idle.len());
            if checked_out > 0 {
                debug!(
                    checked_out,
                    "releasing pool while connections are checked out, they will be torn down on return"
                );
            }

            state.closed = true;
            state.outstanding = 0;
            state.epoch += 1;
            std::mem::take(&mut state.idle)
        };

        debug!(endpoint = %self.config.endpoint, idle = idle.len(), "pool released");
        if idle.is_empty() {
            return;
        }

        for connection in idle.into_connections() {
            if let Err(error) = self.dialer.close(connection).await {
                debug!(%error, "error tearing down released connection");
            }
        }
    }
}

/// Bookkeeping guarded by the pool lock.
struct PoolState<C> {
    outstanding: usize,
    idle: IdleConnections<C>,
    closed: bool,

    /// Bumped on every release, so connections checked out before the release can be
    /// told apart from connections counted in `outstanding`.
    epoch: u64,
}

impl<C> Default for PoolState<C> {
    fn default() -> Self {
        Self {
            outstanding: 0,
            idle: IdleConnections::default(),
            closed: false,
            epoch: 0,
        }
    }
}

impl<C> PoolState<C> {
    /// Give back the slot held by a connection from `epoch`.
    fn release_slot(&mut self, epoch: u64) {
        if self.epoch != epoch {
            trace!("slot belongs to a released pool");
            return;
        }

        self.outstanding = self.outstanding.saturating_sub(1);
    }
}

/// A slot reserved by [`Pool::get`], given back on drop unless it is kept.
struct Slot<'a, D: Dialer> {
    shared: &'a Shared<D>,
    epoch: u64,
    armed: bool,
}

impl<D: Dialer> Slot<'_, D> {
    fn outstanding(&self) -> usize {
        self.shared.state.lock().outstanding
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl<D: Dialer> Drop for Slot<'_, D> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.state.lock().release_slot(self.epoch);
        }
    }
}

/// A connection checked out of a [`Pool`].
///
/// The underlying connection is available via `Deref` and `DerefMut`. A `Pooled`
/// connection that is dropped instead of being handed to [`Pool::put`] or
/// [`Pool::close_err_conn`] is returned to its pool on a background task.
pub struct Pooled<D: Dialer> {
    connection: Option<D::Connection>,
    pool: Weak<Shared<D>>,
    epoch: u64,
}

impl<D: Dialer> Pooled<D> {
    fn belongs_to(&self, shared: &Arc<Shared<D>>) -> bool {
        std::ptr::eq(self.pool.as_ptr(), Arc::as_ptr(shared))
    }

    fn take(&mut self) -> Option<(D::Connection, u64)> {
        self.connection.take().map(|connection| (connection, self.epoch))
    }

    /// Remove the connection from the pool's accounting and take ownership of it.
    ///
    /// The pool frees the connection's slot and will not tear it down.
    pub fn detach(mut self) -> D::Connection {
        let (connection, epoch) = self.take().expect("connection only taken on drop");
        if let Some(pool) = self.pool.upgrade() {
            pool.state.lock().release_slot(epoch);
        }
        connection
    }
}

impl<D: Dialer> fmt::Debug for Pooled<D>
where
    D::Connection: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.connection).finish()
    }
}

impl<D: Dialer> Deref for Pooled<D> {
    type Target = D::Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("connection only taken on drop")
    }
}

impl<D: Dialer> DerefMut for Pooled<D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("connection only taken on drop")
    }
}

impl<D: Dialer> Drop for Pooled<D> {
    fn drop(&mut self) {
        let Some((connection, epoch)) = self.take() else {
            return;
        };

        let Some(pool) = self.pool.upgrade() else {
            trace!("pool dropped, discarding connection");
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                trace!("dropped connection will be returned to pool");
                let mut returning = Returning {
                    pool,
                    connection: Some(connection),
                    epoch,
                };
                runtime.spawn(async move {
                    if let Some(connection) = returning.connection.take() {
                        if let Err(error) = returning.pool.put(connection, returning.epoch).await {
                            debug!(%error, "error returning dropped connection");
                        }
                    }
                });
            }
            Err(_) => {
                debug!("no tokio runtime available, dropped connection discarded");
                pool.state.lock().release_slot(epoch);
            }
        }
    }
}

/// A dropped connection on its way back to the pool.
///
/// A runtime that is shutting down accepts spawned tasks but never polls them. The
/// slot is released here when the return task is dropped before it starts.
struct Returning<D: Dialer> {
    pool: Arc<Shared<D>>,
    connection: Option<D::Connection>,
    epoch: u64,
}

impl<D: Dialer> Drop for Returning<D> {
    fn drop(&mut self) {
        if self.connection.take().is_some() {
            debug!("return task never ran, dropped connection discarded");
            self.pool.state.lock().release_slot(self.epoch);
        }
    }
}
