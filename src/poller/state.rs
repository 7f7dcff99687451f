//! Observable state of one polled feed and the merge rules that update it.
//!
//! This is pure bookkeeping with no timers or I/O, so the catch-up and
//! incremental protocols are tested here directly.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{RadarPoint, SensorSnapshot};

/// Items that carry the timestamp the cursor advances on.
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Timestamped for SensorSnapshot {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for RadarPoint {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Device reachability as last reported by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Unknown,
    Connected,
    Disconnected,
}

/// Outcome of the most recent fetch, independent of connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Idle,
    Polling,
    Connected,
    Error,
}

/// How a fetch response relates to what is already buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    /// Newest-first history; later fetches ask only for items after the cursor.
    Incremental,
    /// Every response is the complete current picture and replaces the buffer.
    Sweep,
}

#[derive(Debug, Clone)]
pub struct PollState<T> {
    pub cursor: Option<DateTime<Utc>>,
    pub buffer: VecDeque<T>,
    pub connectivity: Connectivity,
    pub status: PollStatus,
    pub error: Option<String>,
    pub latest: Option<T>,
    pub last_updated: Option<DateTime<Utc>>,
    capacity: usize,
    first_fetch: bool,
}

impl<T: Clone + Timestamped> PollState<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            cursor: None,
            buffer: VecDeque::with_capacity(capacity.min(1024)),
            connectivity: Connectivity::Unknown,
            status: PollStatus::Idle,
            error: None,
            latest: None,
            last_updated: None,
            capacity: capacity.max(1),
            first_fetch: true,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True until a catch-up fetch has returned data.
    pub fn awaiting_catch_up(&self) -> bool {
        self.first_fetch
    }

    /// Drop history so the next fetch is a catch-up fetch.
    pub fn reset(&mut self) {
        // ---
        self.cursor = None;
        self.buffer.clear();
        self.latest = None;
        self.first_fetch = true;
    }

    /// The `since` watermark for the next request; none during catch-up.
    pub fn since(&self) -> Option<DateTime<Utc>> {
        if self.first_fetch {
            None
        } else {
            self.cursor
        }
    }

    pub fn begin_fetch(&mut self) {
        if self.status != PollStatus::Connected {
            self.status = PollStatus::Polling;
        }
    }

    pub fn record_error(&mut self, message: String) {
        self.status = PollStatus::Error;
        self.error = Some(message);
    }

    /// Merge a successful response and return the items to announce, if any.
    pub fn apply(&mut self, kind: FeedKind, items: Vec<T>) -> Option<Vec<T>> {
        // ---
        self.status = PollStatus::Connected;
        self.error = None;
        self.last_updated = Some(Utc::now());

        match kind {
            FeedKind::Incremental => self.apply_incremental(items),
            FeedKind::Sweep => self.apply_sweep(items),
        }
    }

    fn apply_incremental(&mut self, newest_first: Vec<T>) -> Option<Vec<T>> {
        // ---
        let mut batch = newest_first;
        batch.reverse();
        batch.sort_by_key(|item| item.timestamp());

        if !self.first_fetch {
            if let Some(cursor) = self.cursor {
                batch.retain(|item| item.timestamp() > cursor);
            }
        }

        // An empty catch-up leaves the next fetch a catch-up too.
        let Some(newest) = batch.last() else {
            return None;
        };
        self.cursor = Some(newest.timestamp());
        self.latest = Some(newest.clone());

        if self.first_fetch {
            self.first_fetch = false;
            self.buffer = batch.into();
            self.truncate_front();
            return None;
        }

        self.buffer.extend(batch.iter().cloned());
        self.truncate_front();
        Some(batch)
    }

    fn apply_sweep(&mut self, items: Vec<T>) -> Option<Vec<T>> {
        // ---
        if items.is_empty() {
            return None;
        }
        self.latest = items.iter().max_by_key(|item| item.timestamp()).cloned();
        self.cursor = self.latest.as_ref().map(Timestamped::timestamp);
        self.buffer = items.iter().cloned().collect();
        self.truncate_front();

        if self.first_fetch {
            self.first_fetch = false;
            None
        } else {
            Some(items)
        }
    }

    fn truncate_front(&mut self) {
        // ---
        let excess = self.buffer.len().saturating_sub(self.capacity);
        self.buffer.drain(..excess);
    }
}
