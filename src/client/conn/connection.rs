//! Connections are established client handles to a remote endpoint.
//!
//! The pool never looks inside a connection. It only asks whether the connection is
//! still usable, and which addresses it is bound to.

use crate::info::HasConnectionInfo;

/// A connection which can be held in a [`Pool`](crate::client::Pool).
///
/// Connections must report to the pool whether they remain open. The check should be
/// cheap and synchronous: it is called every time a connection is checked out of or
/// returned to the pool, and should not perform a full round trip to the remote end.
pub trait PoolableConnection: HasConnectionInfo + Send + 'static {
    /// Returns `true` if the connection is still usable.
    fn is_open(&self) -> bool;
}

impl<C> PoolableConnection for Box<C>
where
    C: PoolableConnection + ?Sized,
{
    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

impl<C> HasConnectionInfo for Box<C>
where
    C: HasConnectionInfo + ?Sized,
{
    type Addr = C::Addr;

    fn info(&self) -> crate::info::ConnectionInfo<Self::Addr> {
        (**self).info()
    }
}
