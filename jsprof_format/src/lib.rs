//! Data formats at the edges of the `jsprof` analyses.
//!
//! This library reads the flat-array heap snapshots a JavaScript runtime
//! hands out, and reads and writes the Chrome DevTools `.cpuprofile`
//! document the CPU aggregator produces.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//! use jsprof_format::HeapSnapshot;
//!
//! let file = File::open("heap.json").unwrap();
//! let snapshot = HeapSnapshot::parse(file).unwrap();
//!
//! println!("Nodes: {}", snapshot.nodes.len());
//! println!("Edges: {}", snapshot.edges.len());
//! ```

use thiserror::Error;

pub mod cpuprofile;
pub mod snapshot;

pub use cpuprofile::{CallFrame, CpuProfile, ProfileNode};
pub use snapshot::{HeapEdge, HeapNode, HeapSnapshot, SnapshotKind};

/// Errors that can occur while reading a snapshot or profile.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    #[error("sample {sample_index} references non-existent node {node_id}")]
    UnknownNode { sample_index: usize, node_id: u32 },

    #[error("node {parent} lists non-existent child {child}")]
    UnknownChild { parent: u32, child: u32 },

    #[error("{samples} samples but {deltas} time deltas")]
    DeltaCountMismatch { samples: usize, deltas: usize },
}

/// Result type for read operations.
pub type Result<T> = std::result::Result<T, ParseError>;

/// Errors that can occur while writing a profile.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for write operations.
pub type WriteResult<T> = std::result::Result<T, WriteError>;
