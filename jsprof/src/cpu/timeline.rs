//! Sample time deltas.

/// Session bounds and per-sample deltas, all in microseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeline {
    pub start_time: u64,
    pub end_time: u64,
    pub time_deltas: Vec<i64>,
}

/// Turns chronologically ordered sample timestamps into deltas.
///
/// The first delta is measured from the session start, not from the first
/// sample. A timestamp earlier than its predecessor yields a delta of 0.
#[derive(Debug)]
pub struct TimelineEncoder {
    start_time: u64,
    last_time: u64,
    time_deltas: Vec<i64>,
}

impl TimelineEncoder {
    pub fn new(start_time: u64) -> Self {
        TimelineEncoder {
            start_time,
            last_time: start_time,
            time_deltas: Vec::new(),
        }
    }

    /// Record one sample and return its delta.
    pub fn push(&mut self, timestamp: u64) -> i64 {
        let delta = i64::try_from(timestamp.saturating_sub(self.last_time)).unwrap_or(i64::MAX);
        self.time_deltas.push(delta);
        self.last_time = timestamp;
        delta
    }

    /// The end time is the last recorded timestamp, or the start time if no
    /// sample was pushed.
    pub fn finish(self) -> Timeline {
        Timeline {
            start_time: self.start_time,
            end_time: self.last_time,
            time_deltas: self.time_deltas,
        }
    }
}
