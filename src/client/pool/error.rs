//! Errors returned by the connection pool.

use std::fmt;

use thiserror::Error;

/// An error returned by a [`Pool`](super::Pool).
///
/// Conditions the pool detects itself are unit variants. Errors from the dialer are
/// carried unchanged in [`Error::Dial`] and [`Error::Close`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error<E> {
    /// Every connection slot is in use and none are idle.
    #[error("connection pool is at capacity")]
    OverMax,

    /// The connection handle does not belong to this pool.
    #[error("connection does not belong to this pool")]
    InvalidConnection,

    /// The pool has been released and is not handing out connections.
    #[error("connection pool is closed")]
    PoolClosed,

    /// The connection failed its liveness check.
    #[error("connection is not open")]
    SocketDisconnect,

    /// The dialer failed to establish a connection.
    #[error(transparent)]
    Dial(E),

    /// The dialer failed to tear down a connection.
    #[error(transparent)]
    Close(E),
}

impl<E> Error<E> {
    /// The kind of error, without any dialer error attached.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::OverMax => ErrorKind::OverMax,
            Error::InvalidConnection => ErrorKind::InvalidConnection,
            Error::PoolClosed => ErrorKind::PoolClosed,
            Error::SocketDisconnect => ErrorKind::SocketDisconnect,
            Error::Dial(_) => ErrorKind::Dial,
            Error::Close(_) => ErrorKind::Close,
        }
    }

    /// The dialer error, if this error came from the dialer.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Error::Dial(error) | Error::Close(error) => Some(error),
            _ => None,
        }
    }
}

/// The kinds of [`Error`] a pool can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// See [`Error::OverMax`].
    OverMax,
    /// See [`Error::InvalidConnection`].
    InvalidConnection,
    /// See [`Error::PoolClosed`].
    PoolClosed,
    /// See [`Error::SocketDisconnect`].
    SocketDisconnect,
    /// See [`Error::Dial`].
    Dial,
    /// See [`Error::Close`].
    Close,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::OverMax => "over max",
            ErrorKind::InvalidConnection => "invalid connection",
            ErrorKind::PoolClosed => "pool closed",
            ErrorKind::SocketDisconnect => "socket disconnect",
            ErrorKind::Dial => "dial",
            ErrorKind::Close => "close",
        };
        f.write_str(name)
    }
}
