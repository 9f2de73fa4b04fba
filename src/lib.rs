//! # Cistern: a bounded pool of client connections to a single endpoint
//!
//! Cistern keeps a small reservoir of established client connections to one remote
//! endpoint, so that many short-lived logical requests can share a few long-lived
//! connections instead of paying for connection establishment every time.
//!
//! ## Architecture Overview
//!
//! The crate is organized around a single [`Pool`](client::Pool) and two small traits that
//! keep the pool independent of any particular transport or wire protocol:
//!
//! - **Dialer**: establishes new connections to the configured endpoint, and tears them
//!   down when the pool is done with them.
//! - **PoolableConnection**: a connection handle that can report whether it is still
//!   usable, and which local and remote addresses it is bound to.
//!
//! ### Acquire and release
//!
//! Callers check connections out with [`Pool::get`](client::Pool::get). The pool hands back
//! an idle connection when one is available and still open, and otherwise dials a new one,
//! as long as the number of outstanding connections stays under the configured maximum.
//! When the pool is exhausted, `get` fails immediately rather than waiting.
//!
//! Connections go back with [`Pool::put`](client::Pool::put) when they are healthy, or with
//! [`Pool::close_err_conn`](client::Pool::close_err_conn) when the caller has seen a
//! protocol-level failure and wants the connection discarded.
//!
//! ### Idle eviction
//!
//! A background task periodically sweeps the idle queue and tears down connections which
//! have been idle longer than the configured idle timeout. The task is owned by the pool:
//! it stops when [`Pool::shutdown`](client::Pool::shutdown) is called, or when the last
//! handle to the pool is dropped.
//!
//! ## Feature Flags
//!
//! - `tcp` (default): a TCP [`Dialer`](client::conn::Dialer) built on tokio.
//! - `mock`: in-memory dialers and a manual clock, suitable for testing code which
//!   uses a pool.

use std::{fmt, pin::Pin};

pub mod client;
pub mod info;
mod notify;

pub use self::client::Pool;
pub use self::client::conn::{Dialer, PoolableConnection};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
#[allow(dead_code)]
type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Utility struct for formatting a `Display` type in a `Debug` context.
pub(crate) struct DebugLiteral<T: fmt::Display>(T);

impl<T: fmt::Display> fmt::Debug for DebugLiteral<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
