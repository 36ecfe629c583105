//! Shortest retainer path from a GC root down to an object.

use jsprof_format::HeapSnapshot;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};

use super::dominators::DominatorTree;
use super::graph::GraphIndex;

/// One object on a retainer path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    pub id: u64,
    /// Edge ordinal from this object to the next hop. `None` on the target.
    pub edge: Option<usize>,
}

/// Outcome of a retainer search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetainerChain {
    /// Hops from a GC root (first) to the target (last).
    Path(Vec<Hop>),
    /// The target is itself a GC root.
    TargetIsRoot,
    /// No GC root retains the target.
    NoPath,
    /// No node has the requested id.
    UnknownTarget,
}

/// Breadth-first search over incoming edges from `target` until a GC root
/// other than the target is dequeued.
///
/// Each discovered retainer remembers the hop it was reached from, which
/// doubles as the visited set. Retainers with no node are skipped.
pub fn find_retainer_chain(
    snapshot: &HeapSnapshot,
    index: &GraphIndex,
    tree: &DominatorTree,
    target: u64,
) -> RetainerChain {
    if index.ordinal(target).is_none() {
        return RetainerChain::UnknownTarget;
    }
    if tree.is_gc_root_id(target) {
        return RetainerChain::TargetIsRoot;
    }

    // retainer id -> (id one hop closer to the target, edge between them)
    let mut next_hop: HashMap<u64, (u64, Option<usize>)> = HashMap::new();
    next_hop.insert(target, (target, None));
    let mut queue = VecDeque::from([target]);

    while let Some(current) = queue.pop_front() {
        if current != target && tree.is_gc_root_id(current) {
            return RetainerChain::Path(walk_down(&next_hop, current, target));
        }

        for &edge_idx in index.incoming(current) {
            let retainer = snapshot.edges[edge_idx].from_id;
            if index.ordinal(retainer).is_none() {
                continue;
            }
            if let Entry::Vacant(slot) = next_hop.entry(retainer) {
                slot.insert((current, Some(edge_idx)));
                queue.push_back(retainer);
            }
        }
    }

    RetainerChain::NoPath
}

fn walk_down(next_hop: &HashMap<u64, (u64, Option<usize>)>, root: u64, target: u64) -> Vec<Hop> {
    let mut path = Vec::new();
    let mut current = root;
    while let Some(&(next, edge)) = next_hop.get(&current) {
        path.push(Hop { id: current, edge });
        if current == target {
            break;
        }
        current = next;
    }
    path
}
