//! The idle queue: connections returned to the pool, in return order.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Which end of the idle queue the reaper inspects when evicting expired connections.
///
/// Connections are returned to the back of the idle queue and checked out from the
/// front, so the back holds the most recently returned connections. The reaper stops at
/// the first connection that has not yet expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReapOrder {
    /// Inspect the most recently returned connections first.
    ///
    /// Stale connections at the front of the queue are only evicted once every more
    /// recently returned connection has also expired.
    #[default]
    NewestFirst,

    /// Inspect the least recently returned connections first.
    OldestFirst,
}

struct IdleEntry<C> {
    connection: C,
    returned_at: Instant,
}

impl<C> IdleEntry<C> {
    fn is_expired(&self, idle_timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.returned_at) >= idle_timeout
    }
}

pub(super) struct IdleConnections<C> {
    entries: VecDeque<IdleEntry<C>>,
}

impl<C> fmt::Debug for IdleConnections<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleConnections")
            .field("len", &self.entries.len())
            .finish()
    }
}

impl<C> Default for IdleConnections<C> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

impl<C> IdleConnections<C> {
    pub(super) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a connection at the most-recently-returned end.
    pub(super) fn push(&mut self, connection: C, returned_at: Instant) {
        self.entries.push_back(IdleEntry {
            connection,
            returned_at,
        });
    }

    /// Take the least recently returned connection.
    pub(super) fn pop(&mut self) -> Option<C> {
        self.entries.pop_front().map(|entry| entry.connection)
    }

    /// Take the connection at the `order` end of the queue if it has been idle for at
    /// least `idle_timeout`.
    pub(super) fn pop_expired(
        &mut self,
        idle_timeout: Duration,
        now: Instant,
        order: ReapOrder,
    ) -> Option<C> {
        let candidate = match order {
            ReapOrder::NewestFirst => self.entries.back(),
            ReapOrder::OldestFirst => self.entries.front(),
        }?;

        if !candidate.is_expired(idle_timeout, now) {
            return None;
        }

        match order {
            ReapOrder::NewestFirst => self.entries.pop_back(),
            ReapOrder::OldestFirst => self.entries.pop_front(),
        }
        .map(|entry| entry.connection)
    }

    pub(super) fn into_connections(self) -> impl Iterator<Item = C> {
        self.entries.into_iter().map(|entry| entry.connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(start: Instant, ages: &[u64]) -> IdleConnections<u64> {
        let mut idle = IdleConnections::default();
        for (id, offset) in ages.iter().enumerate() {
            idle.push(id as u64, start + Duration::from_secs(*offset));
        }
        idle
    }

    #[test]
    fn pop_takes_oldest() {
        let start = Instant::now();
        let mut idle = queue(start, &[0, 1, 2]);

        assert_eq!(idle.pop(), Some(0));
        assert_eq!(idle.pop(), Some(1));
        assert_eq!(idle.len(), 1);
    }

    #[test]
    fn newest_first_stops_at_fresh_entry() {
        let start = Instant::now();
        // Returned at t=0 and t=10, reaped at t=11 with a 5s timeout: the newest entry
        // is fresh, so the stale one behind it is left alone.
        let mut idle = queue(start, &[0, 10]);
        let now = start + Duration::from_secs(11);

        assert_eq!(idle.pop_expired(Duration::from_secs(5), now, ReapOrder::NewestFirst), None);
        assert_eq!(idle.len(), 2);
    }

    #[test]
    fn oldest_first_reaches_stale_entry() {
        let start = Instant::now();
        let mut idle = queue(start, &[0, 10]);
        let now = start + Duration::from_secs(11);

        assert_eq!(
            idle.pop_expired(Duration::from_secs(5), now, ReapOrder::OldestFirst),
            Some(0)
        );
        assert_eq!(idle.pop_expired(Duration::from_secs(5), now, ReapOrder::OldestFirst), None);
        assert_eq!(idle.len(), 1);
    }

    #[test]
    fn expiry_is_inclusive() {
        let start = Instant::now();
        let mut idle = queue(start, &[0]);

        let almost = start + Duration::from_millis(999);
        assert_eq!(idle.pop_expired(Duration::from_secs(1), almost, ReapOrder::NewestFirst), None);

        let exactly = start + Duration::from_secs(1);
        assert_eq!(
            idle.pop_expired(Duration::from_secs(1), exactly, ReapOrder::NewestFirst),
            Some(0)
        );
        assert!(idle.is_empty());
    }

    #[test]
    fn into_connections_preserves_order() {
        let start = Instant::now();
        let idle = queue(start, &[0, 1, 2]);
        assert_eq!(idle.into_connections().collect::<Vec<_>>(), vec![0, 1, 2]);
    }
}
