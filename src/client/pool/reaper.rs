//! Background task which evicts expired idle connections.
//!
//! The reaper holds only a weak reference to the pool. It stops when it is signalled
//! through its [`Reaper`] handle, or when that handle is dropped along with the pool.

use std::future::IntoFuture as _;
use std::pin::pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{Instrument as _, debug, trace, warn};

use crate::client::conn::Dialer;
use crate::notify;

use super::Shared;

/// Handle to a running reaper task.
#[derive(Debug)]
pub(super) struct Reaper {
    shutdown: notify::Sender,
    task: JoinHandle<()>,
}

impl Reaper {
    /// Start reaping `pool` every `interval` on the current tokio runtime.
    ///
    /// Returns `None` when called outside of a runtime.
    pub(super) fn spawn<D: Dialer>(pool: &Arc<Shared<D>>, interval: Duration) -> Option<Self> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime available, idle connections will not be reaped in the background");
            return None;
        };

        let (shutdown, signal) = notify::channel();
        let span = tracing::debug_span!("reaper", endpoint = %pool.config.endpoint);
        let task = runtime.spawn(run(Arc::downgrade(pool), interval, signal).instrument(span));

        Some(Self { shutdown, task })
    }

    /// Signal the task to stop and wait for it to finish.
    pub(super) async fn shutdown(mut self) {
        self.shutdown.send();
        if let Err(error) = self.task.await {
            warn!(%error, "reaper task failed");
        }
    }
}

async fn run<D: Dialer>(pool: Weak<Shared<D>>, interval: Duration, signal: notify::Receiver) {
    trace!(?interval, "reaper started");
    let mut signal = pin!(signal.into_future());

    loop {
        {
            let Some(pool) = pool.upgrade() else {
                break;
            };

            let evicted = pool.check_timeout().await;
            if evicted > 0 {
                debug!(evicted, idle = pool.idle_count(), "evicted idle connections");
            }
        }

        tokio::select! {
            biased;
            _ = &mut signal => break,
            _ = tokio::time::sleep(interval) => {},
        }
    }

    trace!("reaper stopped");
}
