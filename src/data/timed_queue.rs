//! Timestamp-ordered, double-ended, thread-safe queue.
//!
//! Producers insert readings in any order; consumers remove either the oldest
//! or the youngest item currently held. Capacity is unbounded here; the drop
//! policy lives with the producers (see `pipeline::scraper`).
//!
//! # Ordering
//! Items are kept in a `BTreeMap` keyed by `(timestamp, sequence)`, so insert
//! and both pop-extreme operations are O(log n). The sequence number is a
//! per-queue insertion counter: among equal timestamps the earliest insert is
//! the "oldest" and the latest insert the "youngest". Consumers must not rely
//! on that tie-break for correctness.
//!
//! # Blocking and shutdown
//! Blocking pops park on a condition variable until an item arrives. After
//! [`TimedQueue::close`] they stop waiting: remaining items are still handed
//! out and `None` is returned once the queue is empty.
//!
//! # Example
//! ```
//! use chrono::{TimeZone, Utc};
//! use sensor_logger::data::timed_queue::TimedQueue;
//!
//! let queue = TimedQueue::new();
//! queue.insert(Utc.timestamp_opt(10, 0).unwrap(), "reading:temp", 20.0);
//! queue.insert(Utc.timestamp_opt(5, 0).unwrap(), "reading:temp", 19.0);
//!
//! assert_eq!(queue.pop_oldest_nowait().unwrap().value(), 19.0);
//! assert_eq!(queue.size(), 1);
//! ```

use crate::reading::Reading;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

type QueueKey = (DateTime<Utc>, u64);

#[derive(Debug, Default)]
struct QueueState {
    items: BTreeMap<QueueKey, Reading>,
    next_seq: u64,
    closed: bool,
}

#[derive(Debug, Clone, Copy)]
enum End {
    Oldest,
    Youngest,
}

impl QueueState {
    fn take(&mut self, end: End) -> Option<Reading> {
        let entry = match end {
            End::Oldest => self.items.pop_first(),
            End::Youngest => self.items.pop_last(),
        };
        entry.map(|(_, reading)| reading)
    }
}

/// Priority queue returning both the oldest and the youngest reading.
///
/// All public methods are safe to call concurrently from any thread.
#[derive(Debug, Default)]
pub struct TimedQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl TimedQueue {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one element and wake at most one blocked consumer.
    pub fn insert(&self, timestamp: DateTime<Utc>, kind: impl Into<String>, value: f64) {
        self.push(Reading::new(timestamp, kind, value));
    }

    /// Insert an already-built reading.
    pub fn push(&self, reading: Reading) {
        let mut state = self.state.lock();
        let key = (reading.timestamp(), state.next_seq);
        state.next_seq += 1;
        state.items.insert(key, reading);
        drop(state);
        self.available.notify_one();
    }

    /// Remove the reading with the smallest timestamp, blocking while empty.
    ///
    /// Returns `None` only after [`close`](Self::close) once nothing is left.
    pub fn pop_oldest(&self) -> Option<Reading> {
        self.pop_blocking(End::Oldest, None)
    }

    /// Remove the reading with the largest timestamp, blocking while empty.
    ///
    /// Returns `None` only after [`close`](Self::close) once nothing is left.
    pub fn pop_youngest(&self) -> Option<Reading> {
        self.pop_blocking(End::Youngest, None)
    }

    /// Like [`pop_oldest`](Self::pop_oldest) but gives up after `timeout`.
    pub fn pop_oldest_timeout(&self, timeout: Duration) -> Option<Reading> {
        self.pop_blocking(End::Oldest, Some(Instant::now() + timeout))
    }

    /// Like [`pop_youngest`](Self::pop_youngest) but gives up after `timeout`.
    pub fn pop_youngest_timeout(&self, timeout: Duration) -> Option<Reading> {
        self.pop_blocking(End::Youngest, Some(Instant::now() + timeout))
    }

    /// Remove the oldest reading, or `None` if the queue is empty.
    pub fn pop_oldest_nowait(&self) -> Option<Reading> {
        self.state.lock().take(End::Oldest)
    }

    /// Remove the youngest reading, or `None` if the queue is empty.
    pub fn pop_youngest_nowait(&self) -> Option<Reading> {
        self.state.lock().take(End::Youngest)
    }

    /// Number of readings held. Stale as soon as it returns.
    pub fn size(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Alias of [`size`](Self::size).
    pub fn len(&self) -> usize {
        self.size()
    }

    /// Whether the queue currently holds nothing.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Stop blocking consumers from waiting. Inserts are still accepted.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn pop_blocking(&self, end: End, deadline: Option<Instant>) -> Option<Reading> {
        let mut state = self.state.lock();
        loop {
            if let Some(reading) = state.take(end) {
                return Some(reading);
            }
            if state.closed {
                return None;
            }
            match deadline {
                Some(deadline) => {
                    if self.available.wait_until(&mut state, deadline).timed_out() {
                        return state.take(end);
                    }
                }
                None => self.available.wait(&mut state),
            }
        }
    }
}
