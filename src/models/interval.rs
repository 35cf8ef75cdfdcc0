use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A committed time range from any source, produced fresh per request by the
/// busy-interval aggregator. Not persisted; callers only test overlap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BusyInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Half-open overlap test against `[start, end)`.
    pub fn intersects(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && self.end > start
    }
}

/// A candidate bookable start/end pair satisfying schedule, buffer and
/// notice constraints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}
