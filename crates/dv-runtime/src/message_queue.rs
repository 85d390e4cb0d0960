#![forbid(unsafe_code)]

//! Arrival-order reorder buffer.
//!
//! Items carry receiver-assigned indices. Contiguous items are released at
//! once; items past a gap are held until the gap fills. Nothing is ever
//! released past a missing index. A gap that stays open longer than the
//! configured timeout is reported once, and the held items stay put until the
//! gap fills or the owner [resyncs](MessageQueue::resync) on a new stream.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::config::QueueConfig;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueError {
    /// Too many items are waiting behind a gap.
    Overflow { max_buffered: usize, expected: u64 },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overflow {
                max_buffered,
                expected,
            } => write!(
                f,
                "reorder buffer full ({max_buffered} items) waiting for index {expected}"
            ),
        }
    }
}

impl std::error::Error for QueueError {}

/// Result of [`MessageQueue::push`].
#[derive(Debug, PartialEq, Eq)]
pub enum Ingest<T> {
    /// Items now deliverable, in index order.
    Ready(Vec<(u64, T)>),
    /// Held behind a gap.
    Buffered,
    /// Already released or already held. Dropped.
    Duplicate,
}

/// A gap that stayed open past the timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GapTimeout {
    /// The index everything is waiting for.
    pub expected: u64,
    /// Items held behind it.
    pub held: usize,
}

#[derive(Debug)]
pub struct MessageQueue<T> {
    next: u64,
    buffered: BTreeMap<u64, T>,
    gap_started_at: Option<Duration>,
    timed_out: bool,
    max_buffered: usize,
    gap_timeout: Duration,
}

impl<T> MessageQueue<T> {
    #[must_use]
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            next: 0,
            buffered: BTreeMap::new(),
            gap_started_at: None,
            timed_out: false,
            max_buffered: config.max_buffered,
            gap_timeout: config.gap_timeout,
        }
    }

    /// Next index expected for in-order release.
    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.next
    }

    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// When the current gap opened, if one is open.
    #[must_use]
    pub fn gap_started_at(&self) -> Option<Duration> {
        self.gap_started_at
    }

    /// Whether the open gap has already been reported by [`expire`](Self::expire).
    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn push(&mut self, index: u64, item: T, now: Duration) -> Result<Ingest<T>, QueueError> {
        if index < self.next || self.buffered.contains_key(&index) {
            tracing::trace!(index, next = self.next, "duplicate arrival index");
            return Ok(Ingest::Duplicate);
        }

        if index > self.next {
            if self.buffered.len() >= self.max_buffered {
                return Err(QueueError::Overflow {
                    max_buffered: self.max_buffered,
                    expected: self.next,
                });
            }
            self.buffered.insert(index, item);
            self.gap_started_at.get_or_insert(now);
            tracing::debug!(
                index,
                expected = self.next,
                held = self.buffered.len(),
                "buffered out-of-order message"
            );
            return Ok(Ingest::Buffered);
        }

        self.next += 1;
        let mut ready = vec![(index, item)];
        ready.extend(self.drain_contiguous(now));
        Ok(Ingest::Ready(ready))
    }

    /// Report the open gap once it has been open longer than the timeout.
    /// Fires at most once per gap and releases nothing.
    pub fn expire(&mut self, now: Duration) -> Option<GapTimeout> {
        if self.timed_out {
            return None;
        }
        let started = self.gap_started_at?;
        if now.saturating_sub(started) <= self.gap_timeout {
            return None;
        }
        self.timed_out = true;
        tracing::warn!(
            expected = self.next,
            held = self.buffered.len(),
            "message gap timed out"
        );
        Some(GapTimeout {
            expected: self.next,
            held: self.buffered.len(),
        })
    }

    /// Start over on a new stream whose first index is at least `next`.
    /// Held items belong to the old stream and are dropped; returns how many.
    pub fn resync(&mut self, next: u64) -> usize {
        let dropped = self.buffered.len();
        self.buffered.clear();
        self.next = self.next.max(next);
        self.gap_started_at = None;
        self.timed_out = false;
        if dropped > 0 {
            tracing::warn!(dropped, next = self.next, "reorder buffer resynced");
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.buffered.clear();
        self.gap_started_at = None;
        self.timed_out = false;
    }

    fn drain_contiguous(&mut self, now: Duration) -> Vec<(u64, T)> {
        let mut out = Vec::new();
        while let Some(item) = self.buffered.remove(&self.next) {
            out.push((self.next, item));
            self.next += 1;
        }
        if self.buffered.is_empty() {
            self.gap_started_at = None;
            self.timed_out = false;
        } else if !out.is_empty() {
            // A new gap opens behind the items just released.
            self.gap_started_at = Some(now);
            self.timed_out = false;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn queue(max_buffered: usize, timeout_ms: u64) -> MessageQueue<&'static str> {
        MessageQueue::new(&QueueConfig {
            max_buffered,
            gap_timeout: Duration::from_millis(timeout_ms),
        })
    }

    const T0: Duration = Duration::ZERO;

    #[test]
    fn in_order_items_release_immediately() {
        let mut q = queue(8, 100);
        assert_eq!(q.push(0, "a", T0).unwrap(), Ingest::Ready(vec![(0, "a")]));
        assert_eq!(q.push(1, "b", T0).unwrap(), Ingest::Ready(vec![(1, "b")]));
        assert_eq!(q.next_index(), 2);
    }

    #[test]
    fn gap_holds_until_filled() {
        let mut q = queue(8, 100);
        assert_eq!(q.push(2, "c", T0).unwrap(), Ingest::Buffered);
        assert_eq!(q.push(1, "b", T0).unwrap(), Ingest::Buffered);
        assert_eq!(
            q.push(0, "a", T0).unwrap(),
            Ingest::Ready(vec![(0, "a"), (1, "b"), (2, "c")])
        );
        assert_eq!(q.gap_started_at(), None);
    }

    #[test]
    fn duplicates_are_dropped() {
        let mut q = queue(8, 100);
        q.push(0, "a", T0).unwrap();
        q.push(2, "c", T0).unwrap();
        assert_eq!(q.push(0, "a", T0).unwrap(), Ingest::Duplicate);
        assert_eq!(q.push(2, "c", T0).unwrap(), Ingest::Duplicate);
    }

    #[test]
    fn overflow_is_an_error() {
        let mut q = queue(1, 100);
        q.push(1, "b", T0).unwrap();
        assert_eq!(
            q.push(2, "c", T0).unwrap_err(),
            QueueError::Overflow {
                max_buffered: 1,
                expected: 0
            }
        );
    }

    #[test]
    fn stale_gap_is_reported_once_and_releases_nothing() {
        let mut q = queue(8, 100);
        q.push(2, "c", Duration::from_millis(10)).unwrap();
        q.push(3, "d", Duration::from_millis(20)).unwrap();

        assert_eq!(q.expire(Duration::from_millis(110)), None);
        assert_eq!(
            q.expire(Duration::from_millis(111)),
            Some(GapTimeout {
                expected: 0,
                held: 2
            })
        );
        assert_eq!(q.expire(Duration::from_millis(500)), None);
        assert_eq!(q.next_index(), 0);
        assert_eq!(q.buffered_len(), 2);
        assert!(q.is_timed_out());

        // The gap filling late still releases everything in order.
        q.push(1, "b", Duration::from_millis(600)).unwrap();
        assert_eq!(
            q.push(0, "a", Duration::from_millis(600)).unwrap(),
            Ingest::Ready(vec![(0, "a"), (1, "b"), (2, "c"), (3, "d")])
        );
        assert!(!q.is_timed_out());
    }

    #[test]
    fn partial_release_restarts_gap_timer() {
        let mut q = queue(8, 100);
        q.push(1, "b", Duration::from_millis(0)).unwrap();
        q.push(3, "d", Duration::from_millis(0)).unwrap();
        assert!(q.expire(Duration::from_millis(150)).is_some());

        q.push(0, "a", Duration::from_millis(160)).unwrap();
        assert_eq!(q.gap_started_at(), Some(Duration::from_millis(160)));
        assert!(!q.is_timed_out());
        assert_eq!(q.expire(Duration::from_millis(260)), None);
        assert_eq!(
            q.expire(Duration::from_millis(261)),
            Some(GapTimeout {
                expected: 2,
                held: 1
            })
        );
    }

    #[test]
    fn resync_drops_held_items_and_moves_forward() {
        let mut q = queue(8, 100);
        q.push(0, "a", T0).unwrap();
        q.push(2, "c", T0).unwrap();
        q.push(3, "d", T0).unwrap();

        assert_eq!(q.resync(5), 2);
        assert_eq!(q.next_index(), 5);
        assert_eq!(q.gap_started_at(), None);
        assert_eq!(q.push(1, "late", T0).unwrap(), Ingest::Duplicate);
        assert_eq!(q.push(5, "e", T0).unwrap(), Ingest::Ready(vec![(5, "e")]));

        // Never moves backwards.
        assert_eq!(q.resync(2), 0);
        assert_eq!(q.next_index(), 6);
    }
}
