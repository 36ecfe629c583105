//! Folding captured stack samples into a `.cpuprofile`.
//!
//! Traces are ordered by timestamp ([`samples`]), interned into a call-path
//! sensitive tree ([`tree`]) and turned into per-sample deltas
//! ([`timeline`]). [`ProfileAggregator`] runs the three steps and produces a
//! [`CpuProfile`] ready to write.
//!
//! # Example
//!
//! ```no_run
//! use jsprof::cpu::{ProfileAggregator, SampleBuffer};
//! use std::fs::File;
//! use std::io::{BufReader, BufWriter};
//!
//! let input = BufReader::new(File::open("samples.json").unwrap());
//! let buffer = SampleBuffer::from_json(input).unwrap();
//!
//! let output = BufWriter::new(File::create("app.cpuprofile").unwrap());
//! ProfileAggregator::new().convert(&buffer, output, false).unwrap();
//! ```

use jsprof_format::{CallFrame, CpuProfile, ProfileNode, WriteError};
use std::collections::HashSet;
use std::io::Write;
use thiserror::Error;
use tracing::{debug, info};

pub mod samples;
pub mod timeline;
pub mod tree;

pub use samples::{CapturedFrame, CapturedTrace, SampleBuffer, chronological_order};
pub use timeline::{Timeline, TimelineEncoder};
pub use tree::{CallTree, FrameResolver, NoSourceMaps, ROOT_ID, SourceLocation, TreeNode};

/// Errors that can occur while reading samples or writing a profile.
#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),

    #[error("write error: {0}")]
    Write(#[from] WriteError),
}

pub type Result<T> = std::result::Result<T, AggregateError>;

/// Builds CPU profiles from sample buffers.
#[derive(Debug, Clone)]
pub struct ProfileAggregator<R: FrameResolver = NoSourceMaps> {
    resolver: R,
}

impl ProfileAggregator {
    pub fn new() -> Self {
        ProfileAggregator {
            resolver: NoSourceMaps,
        }
    }
}

impl Default for ProfileAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: FrameResolver> ProfileAggregator<R> {
    /// Aggregate with a resolver that may remap frame locations.
    pub fn with_resolver(resolver: R) -> Self {
        ProfileAggregator { resolver }
    }

    /// Build a profile with samples in chronological order.
    pub fn aggregate(&self, buffer: &SampleBuffer) -> CpuProfile {
        let order = chronological_order(&buffer.traces);
        let mut tree = CallTree::new();
        let mut timeline = TimelineEncoder::new(buffer.start_time_us);
        let mut samples = Vec::with_capacity(order.len());
        let mut idle = 0usize;

        for index in order {
            let trace = &buffer.traces[index];
            if trace.frames.is_empty() {
                idle += 1;
            }
            samples.push(tree.add_sample(&trace.frames, &self.resolver));
            timeline.push(trace.timestamp_us);
        }

        let Timeline {
            start_time,
            end_time,
            time_deltas,
        } = timeline.finish();

        debug!(nodes = tree.len(), samples = samples.len(), idle, "built call tree");

        CpuProfile {
            nodes: tree.nodes().iter().map(to_profile_node).collect(),
            start_time,
            end_time,
            samples,
            time_deltas,
        }
    }

    /// Aggregate and write the profile, returning it for inspection.
    pub fn convert<W: Write>(
        &self,
        buffer: &SampleBuffer,
        writer: W,
        pretty: bool,
    ) -> Result<CpuProfile> {
        let profile = self.aggregate(buffer);
        if pretty {
            profile.write_pretty(writer)?;
        } else {
            profile.write(writer)?;
        }
        info!(
            nodes = profile.nodes.len(),
            samples = profile.samples.len(),
            duration_us = profile.end_time.saturating_sub(profile.start_time),
            "wrote cpu profile"
        );
        Ok(profile)
    }
}

/// Convert a tree node, dropping repeated child ids.
fn to_profile_node(node: &TreeNode) -> ProfileNode {
    let mut seen = HashSet::new();
    let children = node
        .children
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect();

    ProfileNode {
        id: node.id,
        call_frame: CallFrame {
            function_name: node.function_name.clone(),
            script_id: node.script_id.to_string(),
            url: node.url.clone(),
            line_number: node.line_number,
            column_number: node.column_number,
        },
        hit_count: node.hit_count,
        children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const START: u64 = 1_712_345_678_901_234;

    fn frame(name: &str) -> CapturedFrame {
        CapturedFrame {
            function_name: name.to_string(),
            url: "/app/main.js".to_string(),
            script_id: 12,
            line_number: 3,
            column_number: 8,
        }
    }

    fn trace(offset: u64, names: &[&str]) -> CapturedTrace {
        CapturedTrace {
            timestamp_us: START + offset,
            frames: names.iter().map(|n| frame(n)).collect(),
        }
    }

    fn buffer() -> SampleBuffer {
        SampleBuffer {
            start_time_us: START,
            traces: vec![
                trace(3_000, &["main", "bar", "foo"]),
                trace(1_000, &["main", "foo"]),
                trace(2_000, &[]),
                trace(4_000, &["main", "foo"]),
            ],
        }
    }

    #[test]
    fn aggregate_orders_and_folds_samples() {
        let profile = ProfileAggregator::new().aggregate(&buffer());

        // root, main, foo (via main), bar, foo (via bar)
        assert_eq!(profile.nodes.len(), 5);
        assert_eq!(profile.samples, vec![3, 1, 5, 3]);
        assert_eq!(profile.time_deltas, vec![1_000, 1_000, 1_000, 1_000]);
        assert_eq!(profile.start_time, START);
        assert_eq!(profile.end_time, START + 4_000);
        assert_eq!(profile.total_hits(), 3);
        assert_eq!(profile.node(3).unwrap().hit_count, 2);
        assert_eq!(profile.node(ROOT_ID).unwrap().hit_count, 0);
        assert_eq!(profile.node(2).unwrap().children, vec![3, 4]);
        profile.validate().unwrap();
    }

    #[test]
    fn call_frames_carry_string_script_ids_and_file_urls() {
        let profile = ProfileAggregator::new().aggregate(&buffer());
        let main = &profile.node(2).unwrap().call_frame;

        assert_eq!(main.function_name, "main");
        assert_eq!(main.script_id, "12");
        assert_eq!(main.url, "file:///app/main.js");
        assert_eq!(profile.nodes[0].call_frame.function_name, "(root)");
        assert_eq!(profile.nodes[0].call_frame.line_number, -1);
    }

    #[test]
    fn empty_buffer_gives_root_only() {
        let buffer = SampleBuffer {
            start_time_us: START,
            traces: Vec::new(),
        };
        let profile = ProfileAggregator::new().aggregate(&buffer);

        assert_eq!(profile.nodes.len(), 1);
        assert!(profile.samples.is_empty());
        assert_eq!(profile.end_time, START);
        profile.validate().unwrap();
    }

    #[test]
    fn children_are_deduplicated() {
        let node = TreeNode {
            id: 1,
            function_name: "(root)".to_string(),
            url: String::new(),
            script_id: 0,
            line_number: -1,
            column_number: -1,
            hit_count: 0,
            children: vec![2, 3, 2, 4, 3],
        };
        assert_eq!(to_profile_node(&node).children, vec![2, 3, 4]);
    }

    #[test]
    fn custom_resolver() {
        let aggregator = ProfileAggregator::with_resolver(|frame: &CapturedFrame| {
            (frame.function_name == "foo").then(|| SourceLocation {
                url: "https://cdn.example.com/foo.js".to_string(),
                line_number: 0,
                column_number: 0,
            })
        });
        let profile = aggregator.aggregate(&buffer());
        let foo = profile
            .nodes
            .iter()
            .find(|n| n.call_frame.function_name == "foo")
            .unwrap();
        assert_eq!(foo.call_frame.url, "https://cdn.example.com/foo.js");
    }

    #[test]
    fn convert_writes_parseable_profile() {
        let mut output = Vec::new();
        let written = ProfileAggregator::new()
            .convert(&buffer(), &mut output, false)
            .unwrap();
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("\"startTime\":1712345678901234"));

        let reparsed = CpuProfile::parse(Cursor::new(text)).unwrap();
        assert_eq!(reparsed, written);
    }
}
