//! Build status events and the bounded per-target status log.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of events kept per target.
pub const STATUS_LEN: usize = 500;

/// Structured key/value data attached to a status event.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// A single pipeline event. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStatus {
    pub date: DateTime<Utc>,
    /// Nothing went wrong up to and including this event.
    pub ok: bool,
    pub message: String,
    pub payload: Option<Payload>,
    /// The pipeline is still in progress after this event.
    pub running: bool,
}

/// Ordered, append-only event log with FIFO eviction.
///
/// The owning runner is the only writer. Readers always receive cloned
/// snapshots, never a reference into the live buffer.
#[derive(Debug)]
pub struct StatusLog {
    capacity: usize,
    events: RwLock<VecDeque<BuildStatus>>,
}

impl Default for StatusLog {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusLog {
    pub fn new() -> Self {
        Self::with_capacity(STATUS_LEN)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Record an event stamped with the current UTC time, evicting the oldest
    /// entry first when the log is full.
    pub fn append(
        &self,
        ok: bool,
        message: impl Into<String>,
        payload: Option<Payload>,
        running: bool,
    ) -> BuildStatus {
        let status = BuildStatus {
            date: Utc::now(),
            ok,
            message: message.into(),
            payload,
            running,
        };

        let mut events = self.events.write();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(status.clone());
        status
    }

    /// Events between two offsets counted from the newest entry, newest first.
    ///
    /// `recent(0, 10)` returns the ten most recent events. Negative offsets
    /// clamp to zero and offsets past the end clamp to the log length.
    pub fn recent(&self, start: i64, end: i64) -> Vec<BuildStatus> {
        let events = self.events.read();
        let len = events.len();
        let clamp = |offset: i64| usize::try_from(offset.max(0)).unwrap_or(usize::MAX).min(len);
        let (start, end) = (clamp(start), clamp(end));
        if start >= end {
            return Vec::new();
        }

        events
            .iter()
            .rev()
            .skip(start)
            .take(end - start)
            .cloned()
            .collect()
    }

    /// The most recently appended event.
    pub fn latest(&self) -> Option<BuildStatus> {
        self.events.read().back().cloned()
    }

    /// All retained events, oldest first.
    pub fn snapshot(&self) -> Vec<BuildStatus> {
        self.events.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
