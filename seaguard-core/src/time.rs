//! Time sources and query windows
//!
//! All pipeline times are UTC. The clock is abstracted so that artifact
//! creation stamps and default query windows are reproducible in tests:
//! - [`SystemClock`] for production
//! - [`FixedTime`] for tests

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Source of the current time
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed time source for testing
#[derive(Debug, Clone, Copy)]
pub struct FixedTime {
    instant: DateTime<Utc>,
}

impl FixedTime {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self { instant }
    }

    pub fn advance(&mut self, by: Duration) {
        self.instant += by;
    }
}

impl TimeSource for FixedTime {
    fn now(&self) -> DateTime<Utc> {
        self.instant
    }
}

/// Half-open `[start, end)` interval of UTC time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window between two instants; `None` if `end` precedes `start`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Window ending at `end` and reaching `span` into the past
    pub fn trailing(end: DateTime<Utc>, span: Duration) -> Self {
        Self { start: end - span, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Split into consecutive windows no longer than `max_span`
    ///
    /// Origins that cap the range of a single request are queried chunk by
    /// chunk. A zero or negative span yields the whole window once.
    pub fn chunks(&self, max_span: Duration) -> Vec<TimeWindow> {
        if max_span <= Duration::zero() || self.duration() <= max_span {
            return vec![*self];
        }
        let mut out = Vec::new();
        let mut cursor = self.start;
        while cursor < self.end {
            let next = (cursor + max_span).min(self.end);
            out.push(TimeWindow { start: cursor, end: next });
            cursor = next;
        }
        out
    }
}
