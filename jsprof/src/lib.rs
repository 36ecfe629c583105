//! Heap and CPU profile analysis for JavaScript runtimes.
//!
//! # Pipelines
//!
//! - [`heap`] - Dominator tree, retained sizes, type statistics and retainer
//!   paths for a heap snapshot, rendered as markdown or NDJSON
//! - [`cpu`] - Fold captured stack samples into a `.cpuprofile`
//!
//! [`input`] opens plain, gzip or zstd input files for both.
//!
//! # Example
//!
//! ```no_run
//! use jsprof::cpu::{ProfileAggregator, SampleBuffer};
//! use jsprof::input::open_input;
//! use std::fs::File;
//! use std::io::BufWriter;
//! use std::path::Path;
//!
//! let input = open_input(Path::new("samples.json.gz")).unwrap();
//! let buffer = SampleBuffer::from_json(input).unwrap();
//!
//! let output = BufWriter::new(File::create("app.cpuprofile").unwrap());
//! ProfileAggregator::new().convert(&buffer, output, false).unwrap();
//! ```

pub mod cpu;
pub mod heap;
pub mod input;

// Re-export jsprof_format for convenience
pub use jsprof_format;
