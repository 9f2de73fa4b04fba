//! Builder pattern for pools

use std::sync::Arc;
use std::time::Duration;

use super::conn::Dialer;
use super::pool::{Clock, Config, Pool, ReapOrder, SystemClock};
use crate::info::Endpoint;

/// Sentinel indicating a pool needs to pick a dialer.
#[derive(Debug, Clone, Copy)]
pub struct NeedsDialer;

/// Builder-pattern for pools
///
/// ```no_run
/// # #[cfg(feature = "tcp")]
/// # async fn build() {
/// use std::time::Duration;
///
/// use cistern::client::PoolBuilder;
/// use cistern::client::conn::transport::tcp::TcpDialer;
/// use cistern::info::Endpoint;
///
/// let pool = PoolBuilder::new(Endpoint::new("localhost", "6379"))
///     .with_dialer(TcpDialer::default())
///     .max_connections(8)
///     .idle_timeout(Duration::from_secs(30))
///     .build();
///
/// let conn = pool.get().await.unwrap();
/// pool.put(conn).await.unwrap();
/// # }
/// ```
#[derive(Debug)]
pub struct PoolBuilder<D> {
    config: Config,
    dialer: D,
    clock: Arc<dyn Clock>,
}

impl PoolBuilder<NeedsDialer> {
    /// Create a new builder for a pool of connections to `endpoint`
    pub fn new(endpoint: Endpoint) -> Self {
        PoolBuilder {
            config: Config::new(endpoint),
            dialer: NeedsDialer,
            clock: Arc::new(SystemClock),
        }
    }

    /// Set the dialer used to establish and tear down connections
    pub fn with_dialer<D: Dialer>(self, dialer: D) -> PoolBuilder<D> {
        PoolBuilder {
            config: self.config,
            dialer,
            clock: self.clock,
        }
    }
}

impl<D> PoolBuilder<D> {
    /// Maximum number of outstanding connections
    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.config.max_connections = max_connections;
        self
    }

    /// Timeout for establishing a single connection
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// How long a connection may stay idle before it is evicted
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// How often the background reaper runs, or `None` to disable it
    pub fn reap_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.reap_interval = interval;
        self
    }

    /// Which end of the idle queue the reaper inspects
    pub fn reap_order(mut self, order: ReapOrder) -> Self {
        self.config.reap_order = order;
        self
    }

    /// Use a custom time source for idle bookkeeping
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// The configuration built so far
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl<D: Dialer> PoolBuilder<D> {
    /// Build the pool.
    ///
    /// The background reaper, if enabled, is spawned on the current tokio runtime.
    pub fn build(self) -> Pool<D> {
        Pool::with_shared_clock(self.config, self.dialer, self.clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use crate::client::conn::transport::mock::MockDialer;
    use crate::client::pool::ManualClock;

    assert_impl_all!(NeedsDialer: Debug, Clone, Copy, Send, Sync);
    assert_impl_all!(PoolBuilder<NeedsDialer>: Debug, Send, Sync);
    assert_impl_all!(PoolBuilder<MockDialer>: Debug);

    #[test]
    fn builder_sets_config() {
        let builder = PoolBuilder::new(Endpoint::new("localhost", "9090"))
            .max_connections(3)
            .connect_timeout(Duration::from_secs(2))
            .idle_timeout(Duration::from_secs(20))
            .reap_interval(None)
            .reap_order(ReapOrder::OldestFirst);

        let config = builder.config();
        assert_eq!(config.endpoint, Endpoint::new("localhost", "9090"));
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.idle_timeout, Duration::from_secs(20));
        assert_eq!(config.reap_interval, None);
        assert_eq!(config.reap_order, ReapOrder::OldestFirst);
    }

    #[tokio::test]
    async fn builder_builds_pool() {
        let _ = tracing_subscriber::fmt::try_init();
        let dialer = MockDialer::open();
        let clock = ManualClock::new();

        let pool = PoolBuilder::new(Endpoint::new("mock", "1"))
            .with_dialer(dialer.clone())
            .max_connections(1)
            .idle_timeout(Duration::from_secs(5))
            .reap_interval(None)
            .clock(clock.clone())
            .build();

        let conn = pool.get().await.unwrap();
        pool.put(conn).await.unwrap();
        assert_eq!(pool.idle_count(), 1);

        clock.advance(Duration::from_secs(5));
        assert_eq!(pool.check_timeout().await, 1);
        assert_eq!(dialer.close_count(), 1);
    }
}
