//! Retained-size analysis of heap snapshots.
//!
//! The pipeline runs in four steps over a parsed [`HeapSnapshot`]:
//!
//! 1. [`graph`] indexes node ids and builds incoming/outgoing edge lists.
//! 2. [`dominators`] numbers the graph in DFS post-order, computes immediate
//!    dominators (Cooper, Harvey and Kennedy, "A Simple, Fast Dominance
//!    Algorithm") and folds self sizes up the dominator tree.
//! 3. [`stats`] groups nodes by class name and ranks objects by retained size.
//! 4. [`retainers`] walks incoming edges from an object back to a GC root.
//!
//! [`report`] renders the result as markdown or NDJSON.
//!
//! # Example
//!
//! ```no_run
//! use jsprof::heap::{AnalysisOptions, HeapAnalysis, ReportOptions};
//! use std::fs::File;
//! use std::io::{BufReader, BufWriter};
//!
//! let input = BufReader::new(File::open("heap.json").unwrap());
//! let output = BufWriter::new(File::create("heap.md").unwrap());
//!
//! let analysis = HeapAnalysis::parse(input, &AnalysisOptions::default()).unwrap();
//! analysis.write_markdown(output, &ReportOptions::default()).unwrap();
//! ```

use jsprof_format::{HeapNode, HeapSnapshot, ParseError};
use std::io::Read;
use thiserror::Error;
use tracing::info;

pub mod dominators;
pub mod graph;
pub mod report;
pub mod retainers;
pub mod stats;

pub use dominators::DominatorTree;
pub use graph::GraphIndex;
pub use report::ReportOptions;
pub use retainers::{Hop, RetainerChain};
pub use stats::TypeStats;

/// Errors that can occur during heap analysis.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot error: {0}")]
    Format(#[from] ParseError),

    #[error("dominator computation did not converge within {passes} passes")]
    DominatorPassLimit { passes: usize },
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Tuning for [`HeapAnalysis::analyze`].
#[derive(Debug, Clone, Default)]
pub struct AnalysisOptions {
    /// Upper bound on full passes of the dominator fixed-point loop,
    /// counting the final pass that observes no change. `None` runs until
    /// convergence.
    pub max_dominator_passes: Option<usize>,
}

/// A snapshot together with everything computed from it.
pub struct HeapAnalysis {
    pub snapshot: HeapSnapshot,
    pub index: GraphIndex,
    pub tree: DominatorTree,
    /// Per-class statistics, largest total retained size first.
    pub types: Vec<TypeStats>,
    /// Every node ordinal, largest retained size first.
    pub largest: Vec<usize>,
    /// Sum of all self sizes, saturating at `u64::MAX`.
    pub total_size: u64,
}

impl HeapAnalysis {
    /// Parse a snapshot and analyze it.
    pub fn parse<R: Read>(reader: R, options: &AnalysisOptions) -> Result<Self> {
        let snapshot = HeapSnapshot::parse(reader)?;
        Self::analyze(snapshot, options)
    }

    /// Run the full pipeline over a parsed snapshot.
    pub fn analyze(snapshot: HeapSnapshot, options: &AnalysisOptions) -> Result<Self> {
        let index = GraphIndex::build(&snapshot);
        let tree = DominatorTree::compute(&snapshot, &index, options.max_dominator_passes)?;
        let types = stats::aggregate_types(&snapshot, &tree);
        let largest = stats::largest_objects(&tree);
        let total_size = snapshot
            .nodes
            .iter()
            .map(|n| n.size)
            .fold(0, u64::saturating_add);

        info!(
            nodes = snapshot.nodes.len(),
            edges = snapshot.edges.len(),
            types = types.len(),
            gc_roots = tree.gc_root_ids().len(),
            total_size,
            "heap analysis complete"
        );

        Ok(HeapAnalysis {
            snapshot,
            index,
            tree,
            types,
            largest,
            total_size,
        })
    }

    /// Whether the snapshot had no nodes at all.
    pub fn is_empty(&self) -> bool {
        self.snapshot.nodes.is_empty()
    }

    /// Look up a node and its ordinal by id.
    pub fn node_by_id(&self, id: u64) -> Option<(usize, &HeapNode)> {
        let ordinal = self.index.ordinal(id)?;
        Some((ordinal, &self.snapshot.nodes[ordinal]))
    }

    /// Class name of the node at `ordinal`, or `(unknown)`.
    pub fn class_name(&self, ordinal: usize) -> &str {
        self.snapshot
            .class_name(&self.snapshot.nodes[ordinal])
            .unwrap_or(stats::UNKNOWN_CLASS)
    }

    /// Shortest chain of retainers from a GC root down to `id`.
    pub fn retainer_chain(&self, id: u64) -> RetainerChain {
        retainers::find_retainer_chain(&self.snapshot, &self.index, &self.tree, id)
    }
}
