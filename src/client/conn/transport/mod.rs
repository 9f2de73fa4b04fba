//! Transports establish and tear down connections to the pool's endpoint.
//!
//! A pool is parameterized by a [`Dialer`], which provides both halves of a connection's
//! lifecycle outside the pool: creating a new connection when the pool has none to hand
//! out, and releasing its resources once the pool decides to discard it.
//!
//! Any [`tower::Service`] which turns an [`Endpoint`] into a [`PoolableConnection`] can
//! be used as a dialer by wrapping it in a [`ServiceDialer`].

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tower::ServiceExt as _;
use tracing::trace;

use crate::client::conn::PoolableConnection;
use crate::info::Endpoint;

#[cfg(any(test, feature = "mock"))]
pub mod mock;
#[cfg(feature = "tcp")]
pub mod tcp;

/// Establishes and tears down connections for a pool.
///
/// Both methods are called without any pool lock held, so they are free to perform
/// slow network I/O.
pub trait Dialer: Send + Sync + 'static {
    /// The connection type produced by this dialer.
    type Connection: PoolableConnection;

    /// Error returned when establishing or tearing down a connection fails.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Establish a new connection to `endpoint`, giving up after `connect_timeout`.
    fn dial(
        &self,
        endpoint: &Endpoint,
        connect_timeout: Duration,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;

    /// Release all resources associated with `connection`.
    fn close(
        &self,
        connection: Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// An error returned by a [`ServiceDialer`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceDialError<E> {
    /// The underlying service failed to produce a connection.
    #[error("creating connection")]
    Connecting(#[source] E),

    /// The underlying service did not produce a connection in time.
    #[error("connection attempt timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),
}

/// Adapts a [`tower::Service`] from [`Endpoint`] to a connection into a [`Dialer`].
///
/// The service is cloned for each connection attempt. Tearing down a connection
/// simply drops it.
#[derive(Debug, Clone)]
pub struct ServiceDialer<S> {
    service: S,
}

impl<S> ServiceDialer<S> {
    /// Wrap a connecting service.
    pub fn new(service: S) -> Self {
        Self { service }
    }

    /// Get a reference to the inner service.
    pub fn service(&self) -> &S {
        &self.service
    }
}

impl<S> Dialer for ServiceDialer<S>
where
    S: tower::Service<Endpoint> + Clone + Send + Sync + 'static,
    S::Response: PoolableConnection,
    S::Error: std::error::Error + Send + Sync + 'static,
    S::Future: Send,
{
    type Connection = S::Response;
    type Error = ServiceDialError<S::Error>;

    async fn dial(
        &self,
        endpoint: &Endpoint,
        connect_timeout: Duration,
    ) -> Result<Self::Connection, Self::Error> {
        let connecting = self.service.clone().oneshot(endpoint.clone());
        match tokio::time::timeout(connect_timeout, connecting).await {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(error)) => Err(ServiceDialError::Connecting(error)),
            Err(_) => {
                trace!(timeout=?connect_timeout, %endpoint, "connection timed out");
                Err(ServiceDialError::TimedOut(connect_timeout))
            }
        }
    }

    async fn close(&self, connection: Self::Connection) -> Result<(), Self::Error> {
        drop(connection);
        Ok(())
    }
}
