//! Stack samples as handed over by the capture side.

use serde::{Deserialize, Serialize};
use std::io::Read;

use super::Result;

/// One frame of a captured stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedFrame {
    pub function_name: String,
    /// Script URL or filesystem path, "" for native frames.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub script_id: u64,
    /// 0-based, -1 if unknown.
    #[serde(default = "unknown_position")]
    pub line_number: i64,
    /// 0-based, -1 if unknown.
    #[serde(default = "unknown_position")]
    pub column_number: i64,
}

fn unknown_position() -> i64 {
    -1
}

/// A stack captured at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedTrace {
    /// Microseconds since the Unix epoch.
    pub timestamp_us: u64,
    /// Outermost caller first, currently executing function last. Empty
    /// when the thread was idle.
    #[serde(default)]
    pub frames: Vec<CapturedFrame>,
}

/// Everything captured during one profiling session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleBuffer {
    /// Wall-clock time the profiler started, in microseconds since the epoch.
    pub start_time_us: u64,
    /// Traces in capture order, which need not be chronological.
    #[serde(default)]
    pub traces: Vec<CapturedTrace>,
}

impl SampleBuffer {
    pub fn from_json<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_postcard(bytes: &[u8]) -> Result<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }

    pub fn to_postcard(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }
}

/// Indices into `traces` sorted by timestamp. Equal timestamps keep capture
/// order.
pub fn chronological_order(traces: &[CapturedTrace]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..traces.len()).collect();
    order.sort_by_key(|&i| traces[i].timestamp_us);
    order
}
