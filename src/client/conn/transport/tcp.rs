//! TCP dialer for pooled client connections.
//!
//! This module contains the [`TcpDialer`] type, which resolves the pool's [`Endpoint`] and
//! connects to it over TCP, and the [`TcpConnection`] type it produces. The dialer is
//! configured with a [`TcpDialerConfig`] to control socket options.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt as _, ReadBuf};
use tokio::net::TcpSocket;
use tokio::time::Sleep;
use tracing::{Instrument, trace, warn};

use crate::BoxError;
use crate::client::conn::{Dialer, PoolableConnection};
use crate::info::{ConnectionInfo, Endpoint, HasConnectionInfo};

/// Error type for TCP connections.
#[derive(Debug, Error)]
pub struct TcpConnectionError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TcpConnectionError {
    pub(super) fn new<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub(super) fn msg<S, E>(message: S) -> impl FnOnce(E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        move |error| Self {
            message: message.into(),
            source: Some(error.into()),
        }
    }
}

impl fmt::Display for TcpConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref source) = self.source {
            write!(f, "{}: {}", self.message, source)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl From<TcpConnectionError> for io::Error {
    fn from(value: TcpConnectionError) -> Self {
        if let Some(original) = value
            .source
            .as_ref()
            .and_then(|r| r.downcast_ref::<io::Error>())
        {
            io::Error::new(original.kind(), original.to_string())
        } else {
            io::Error::other(value)
        }
    }
}

/// Socket options for TCP connections.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct TcpDialerConfig {
    /// Whether to enable `SO_KEEPALIVE` on the socket.
    pub keepalive: bool,

    /// The local IPv4 address to bind to.
    pub local_address_ipv4: Option<Ipv4Addr>,

    /// The local IPv6 address to bind to.
    pub local_address_ipv6: Option<Ipv6Addr>,

    /// Whether to disable Nagle's algorithm.
    pub nodelay: bool,

    /// Whether to reuse the local address.
    pub reuse_address: bool,

    /// The size of the send buffer.
    pub send_buffer_size: Option<u32>,

    /// The size of the receive buffer.
    pub recv_buffer_size: Option<u32>,

    /// How long a single read or write may wait on the socket before failing with
    /// [`io::ErrorKind::TimedOut`]. When unset, the pool's connect timeout is used.
    pub io_timeout: Option<Duration>,
}

impl Default for TcpDialerConfig {
    fn default() -> Self {
        Self {
            keepalive: true,
            local_address_ipv4: None,
            local_address_ipv6: None,
            nodelay: true,
            reuse_address: true,
            send_buffer_size: None,
            recv_buffer_size: None,
            io_timeout: None,
        }
    }
}

/// A [`Dialer`] which connects to the pool's endpoint over TCP.
///
/// The endpoint's host is resolved on every connection attempt, and each resolved
/// address is tried in turn until one connects. The whole attempt, resolution
/// included, is bounded by the pool's connect timeout.
#[derive(Debug, Clone, Default)]
pub struct TcpDialer {
    config: Arc<TcpDialerConfig>,
}

impl TcpDialer {
    /// Create a new TCP dialer
    pub fn new(config: TcpDialerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Get the configuration for the TCP dialer.
    pub fn config(&self) -> &TcpDialerConfig {
        &self.config
    }

    async fn connect_to_endpoint(
        &self,
        endpoint: &Endpoint,
    ) -> Result<TcpConnection, TcpConnectionError> {
        let port: u16 = endpoint
            .port()
            .parse()
            .map_err(TcpConnectionError::msg(format!("invalid port {:?}", endpoint.port())))?;

        let host = endpoint.host().trim_start_matches('[').trim_end_matches(']');
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(TcpConnectionError::msg("dns error"))?
            .collect();

        trace!(count = addrs.len(), "resolved endpoint");

        let mut last_error = None;
        for addr in addrs {
            match self.connect_to_addr(addr).await {
                Ok(connection) => return Ok(connection),
                Err(error) => {
                    trace!(%addr, %error, "connection attempt failed");
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| TcpConnectionError::new("no addresses resolved")))
    }

    async fn connect_to_addr(&self, addr: SocketAddr) -> Result<TcpConnection, TcpConnectionError> {
        let socket = self.socket(&addr)?;

        let span = tracing::trace_span!("socket::connect", remote.addr = %addr);
        let stream = socket
            .connect(addr)
            .instrument(span)
            .await
            .map_err(TcpConnectionError::msg("tcp connect error"))?;

        if self.config.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                warn!("tcp set_nodelay error: {}", e);
            }
        }

        TcpConnection::new(stream, addr).map_err(TcpConnectionError::msg("tcp address error"))
    }

    fn socket(&self, addr: &SocketAddr) -> Result<TcpSocket, TcpConnectionError> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(TcpConnectionError::msg("tcp open error"))?;

        let _guard = tracing::trace_span!("socket::options").entered();

        if self.config.reuse_address {
            if let Err(e) = socket.set_reuseaddr(true) {
                warn!("tcp set_reuse_address error: {}", e);
            }
        }

        if self.config.keepalive {
            if let Err(e) = socket.set_keepalive(true) {
                warn!("tcp set_keepalive error: {}", e);
            }
        }

        if let Some(size) = self.config.send_buffer_size {
            if let Err(e) = socket.set_send_buffer_size(size) {
                warn!("tcp set_buffer_size error: {}", e);
            }
        }

        if let Some(size) = self.config.recv_buffer_size {
            if let Err(e) = socket.set_recv_buffer_size(size) {
                warn!("tcp set_recv_buffer_size error: {}", e);
            }
        }

        let local: Option<IpAddr> = match addr {
            SocketAddr::V4(_) => self.config.local_address_ipv4.map(IpAddr::from),
            SocketAddr::V6(_) => self.config.local_address_ipv6.map(IpAddr::from),
        };

        if let Some(local) = local {
            socket
                .bind(SocketAddr::new(local, 0))
                .map_err(TcpConnectionError::msg("tcp bind local address"))?;
        }

        Ok(socket)
    }
}

impl Dialer for TcpDialer {
    type Connection = TcpConnection;
    type Error = TcpConnectionError;

    async fn dial(
        &self,
        endpoint: &Endpoint,
        connect_timeout: Duration,
    ) -> Result<Self::Connection, Self::Error> {
        let span = tracing::trace_span!("tcp", %endpoint);

        async move {
            match tokio::time::timeout(connect_timeout, self.connect_to_endpoint(endpoint)).await {
                Ok(Ok(mut connection)) => {
                    trace!(peer.addr = %connection.remote, "tcp connected");
                    connection.set_timeout(Some(self.config.io_timeout.unwrap_or(connect_timeout)));
                    Ok(connection)
                }
                Ok(Err(error)) => Err(error),
                Err(elapsed) => {
                    trace!(timeout=?connect_timeout, "connection timed out");
                    Err(TcpConnectionError::msg(format!(
                        "connection attempt timed out after {}ms",
                        connect_timeout.as_millis()
                    ))(io::Error::new(io::ErrorKind::TimedOut, elapsed)))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn close(&self, mut connection: Self::Connection) -> Result<(), Self::Error> {
        trace!(peer.addr = %connection.remote, "tcp shutdown");
        match connection.stream.shutdown().await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(error) => Err(TcpConnectionError::msg("tcp shutdown error")(error)),
        }
    }
}

/// A client TCP connection held by a pool.
///
/// The local and remote addresses are captured when the connection is established,
/// so they remain available after the peer has gone away.
///
/// Reads and writes which wait on the socket for longer than the connection's timeout
/// fail with [`io::ErrorKind::TimedOut`]. The deadline is armed when an operation first
/// waits and cleared when it completes. A timed out operation leaves the connection open.
#[pin_project::pin_project]
pub struct TcpConnection {
    #[pin]
    stream: tokio::net::TcpStream,
    local: SocketAddr,
    remote: SocketAddr,
    timeout: Option<Duration>,
    read_deadline: Option<Pin<Box<Sleep>>>,
    write_deadline: Option<Pin<Box<Sleep>>>,
}

impl fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnection")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TcpConnection {
    fn new(stream: tokio::net::TcpStream, remote: SocketAddr) -> io::Result<Self> {
        let local = stream.local_addr()?;
        Ok(Self {
            stream,
            local,
            remote,
            timeout: None,
            read_deadline: None,
            write_deadline: None,
        })
    }

    /// The I/O timeout applied to each read and write.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Change the I/O timeout for subsequent reads and writes. `None` lets operations
    /// wait indefinitely.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
        self.read_deadline = None;
        self.write_deadline = None;
    }

    /// Local address of the connection.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Remote address of the connection.
    pub fn peer_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Get a reference to the underlying `tokio::net::TcpStream`.
    pub fn get_ref(&self) -> &tokio::net::TcpStream {
        &self.stream
    }

    /// Unwraps the connection, returning the inner `tokio::net::TcpStream`.
    pub fn into_inner(self) -> tokio::net::TcpStream {
        self.stream
    }
}

impl HasConnectionInfo for TcpConnection {
    type Addr = SocketAddr;

    fn info(&self) -> ConnectionInfo<Self::Addr> {
        ConnectionInfo {
            local_addr: self.local,
            remote_addr: self.remote,
        }
    }
}

impl PoolableConnection for TcpConnection {
    /// Peeks at the socket without blocking. A connection is considered closed once
    /// the peer has sent EOF or the socket reports an error. Unread data pending on an
    /// idle connection does not make it closed.
    fn is_open(&self) -> bool {
        let mut byte = [0u8; 1];
        let mut buf = ReadBuf::new(&mut byte);
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());

        match self.stream.poll_peek(&mut cx, &mut buf) {
            Poll::Pending => true,
            Poll::Ready(Ok(0)) => false,
            Poll::Ready(Ok(_)) => true,
            Poll::Ready(Err(error)) => {
                trace!(%error, "tcp liveness check failed");
                false
            }
        }
    }
}

/// Fail a pending operation once its deadline passes, arming the deadline on the first
/// pending poll.
fn poll_deadline<T>(
    deadline: &mut Option<Pin<Box<Sleep>>>,
    timeout: Option<Duration>,
    cx: &mut Context<'_>,
    operation: &'static str,
) -> Poll<io::Result<T>> {
    let Some(timeout) = timeout else {
        return Poll::Pending;
    };

    let sleep = deadline.get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
    match sleep.as_mut().poll(cx) {
        Poll::Ready(()) => {
            *deadline = None;
            trace!(?timeout, operation, "tcp operation timed out");
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("tcp {operation} timed out after {}ms", timeout.as_millis()),
            )))
        }
        Poll::Pending => Poll::Pending,
    }
}

impl AsyncRead for TcpConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        match this.stream.poll_read(cx, buf) {
            Poll::Ready(outcome) => {
                *this.read_deadline = None;
                Poll::Ready(outcome)
            }
            Poll::Pending => poll_deadline(this.read_deadline, *this.timeout, cx, "read"),
        }
    }
}

impl AsyncWrite for TcpConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        let this = self.project();
        match this.stream.poll_write(cx, buf) {
            Poll::Ready(outcome) => {
                *this.write_deadline = None;
                Poll::Ready(outcome)
            }
            Poll::Pending => poll_deadline(this.write_deadline, *this.timeout, cx, "write"),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        let this = self.project();
        match this.stream.poll_flush(cx) {
            Poll::Ready(outcome) => {
                *this.write_deadline = None;
                Poll::Ready(outcome)
            }
            Poll::Pending => poll_deadline(this.write_deadline, *this.timeout, cx, "flush"),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        self.project().stream.poll_shutdown(cx)
    }
}
