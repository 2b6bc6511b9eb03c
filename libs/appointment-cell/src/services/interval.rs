use chrono::{DateTime, Duration, Utc};

/// Half-open time interval `[start, start + duration)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    start: DateTime<Utc>,
    duration_minutes: i32,
}

impl Interval {
    pub fn new(start: DateTime<Utc>, duration_minutes: i32) -> Self {
        Self { start, duration_minutes }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::minutes(self.duration_minutes as i64)
    }

    pub fn duration_minutes(&self) -> i32 {
        self.duration_minutes
    }

    /// Back-to-back intervals do not overlap.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end() && self.end() > other.start
    }
}
