//! Connections and the transports which establish them.
//!
//! The pool only depends on two traits from this module: [`PoolableConnection`], which
//! a connection handle implements to report liveness and addresses, and [`Dialer`],
//! which establishes and tears down those handles.

mod connection;
pub mod transport;

pub use self::connection::PoolableConnection;
pub use self::transport::{Dialer, ServiceDialer};
