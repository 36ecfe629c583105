//! Per-class totals and the largest objects.

use jsprof_format::HeapSnapshot;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::HashMap;
use tracing::debug;

use super::dominators::DominatorTree;

/// Class name used when a node's class index is missing or out of range.
pub const UNKNOWN_CLASS: &str = "(unknown)";

/// Totals for every node sharing a class name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeStats {
    pub name: String,
    pub count: u64,
    pub total_size: u64,
    pub total_retained_size: u64,
    /// Retained size of `largest_instance_id`.
    pub largest_retained: u64,
    pub largest_instance_id: u64,
}

impl TypeStats {
    fn new(name: &str, first_id: u64) -> Self {
        TypeStats {
            name: name.to_string(),
            count: 0,
            total_size: 0,
            total_retained_size: 0,
            largest_retained: 0,
            largest_instance_id: first_id,
        }
    }
}

/// Group nodes by class name, ordered by total retained size (largest first)
/// and then by name.
///
/// The largest instance of a class is the first one seen with the maximum
/// retained size.
pub fn aggregate_types(snapshot: &HeapSnapshot, tree: &DominatorTree) -> Vec<TypeStats> {
    let mut slots: HashMap<&str, usize> = HashMap::new();
    let mut types: Vec<TypeStats> = Vec::new();

    for (ordinal, node) in snapshot.nodes.iter().enumerate() {
        let name = snapshot.class_name(node).unwrap_or(UNKNOWN_CLASS);
        let slot = *slots.entry(name).or_insert_with(|| {
            types.push(TypeStats::new(name, node.id));
            types.len() - 1
        });

        let retained = tree.retained_size(ordinal);
        let stats = &mut types[slot];
        stats.count += 1;
        stats.total_size = stats.total_size.saturating_add(node.size);
        stats.total_retained_size = stats.total_retained_size.saturating_add(retained);
        if retained > stats.largest_retained {
            stats.largest_retained = retained;
            stats.largest_instance_id = node.id;
        }
    }

    types.sort_by(|a, b| {
        b.total_retained_size
            .cmp(&a.total_retained_size)
            .then_with(|| a.name.cmp(&b.name))
    });

    debug!(types = types.len(), "aggregated type statistics");
    types
}

/// Every node ordinal ordered by retained size, largest first. Equal sizes
/// keep snapshot order.
pub fn largest_objects(tree: &DominatorTree) -> Vec<usize> {
    let mut ordinals: Vec<usize> = (0..tree.len()).collect();
    ordinals.sort_by_key(|&ordinal| Reverse(tree.retained_size(ordinal)));
    ordinals
}
