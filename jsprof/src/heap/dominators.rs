//! Dominator tree and retained sizes.
//!
//! Nodes live in two coordinate systems: the *ordinal* (position in the
//! snapshot's node array) and the *post-order index* (finishing rank of a DFS
//! from ordinal 0). The fixed-point loop works in post-order so that the root,
//! which always finishes last, bounds every "walk up" in the intersection
//! routine.
//!
//! Reference: K. Cooper, T. Harvey and K. Kennedy,
//! "A Simple, Fast Dominance Algorithm".

use jsprof_format::HeapSnapshot;
use std::collections::HashSet;
use tracing::{debug, warn};

use super::graph::GraphIndex;
use super::{AnalysisError, Result};

/// The synthetic root is always the first node in the snapshot.
pub const ROOT_ORDINAL: usize = 0;

/// Immediate dominators, retained sizes and GC-root flags for one snapshot.
#[derive(Debug, Default)]
pub struct DominatorTree {
    ordinal_to_post_order: Vec<usize>,
    post_order_to_ordinal: Vec<usize>,
    ordinal_to_dominator: Vec<usize>,
    retained_sizes: Vec<u64>,
    is_gc_root: Vec<bool>,
    gc_root_ids: HashSet<u64>,
    passes: usize,
    unreached: usize,
}

/// Successor and predecessor ordinals, with dangling edges already dropped.
struct Adjacency {
    successor_offsets: Vec<usize>,
    successors: Vec<usize>,
    predecessor_offsets: Vec<usize>,
    predecessors: Vec<usize>,
}

impl Adjacency {
    fn build(snapshot: &HeapSnapshot, index: &GraphIndex) -> Self {
        let mut successor_offsets = Vec::with_capacity(snapshot.nodes.len() + 1);
        let mut successors = Vec::with_capacity(snapshot.edges.len());
        let mut predecessor_offsets = Vec::with_capacity(snapshot.nodes.len() + 1);
        let mut predecessors = Vec::with_capacity(snapshot.edges.len());

        successor_offsets.push(0);
        predecessor_offsets.push(0);

        for node in &snapshot.nodes {
            successors.extend(
                index
                    .outgoing(node.id)
                    .iter()
                    .filter_map(|&e| index.ordinal(snapshot.edges[e].to_id)),
            );
            successor_offsets.push(successors.len());

            predecessors.extend(
                index
                    .incoming(node.id)
                    .iter()
                    .filter_map(|&e| index.ordinal(snapshot.edges[e].from_id)),
            );
            predecessor_offsets.push(predecessors.len());
        }

        Adjacency {
            successor_offsets,
            successors,
            predecessor_offsets,
            predecessors,
        }
    }

    fn successors(&self, ordinal: usize) -> &[usize] {
        &self.successors[self.successor_offsets[ordinal]..self.successor_offsets[ordinal + 1]]
    }

    fn predecessors(&self, ordinal: usize) -> &[usize] {
        &self.predecessors
            [self.predecessor_offsets[ordinal]..self.predecessor_offsets[ordinal + 1]]
    }
}

/// Post-order numbering of every node, root last.
struct PostOrder {
    ordinal_to_post_order: Vec<usize>,
    post_order_to_ordinal: Vec<usize>,
    unreached: usize,
}

impl PostOrder {
    /// Iterative DFS from the root. The stack is a pair of preallocated
    /// arrays (node, next edge) indexed by depth; each node is pushed at most
    /// once, so `node_count` frames always suffice.
    fn compute(adjacency: &Adjacency, node_count: usize) -> Self {
        let mut ordinal_to_post_order = vec![0usize; node_count];
        let mut post_order_to_ordinal = vec![0usize; node_count];
        let mut stack_nodes = vec![0usize; node_count];
        let mut stack_edge_idx = vec![0usize; node_count];
        let mut visited = vec![false; node_count];

        let mut next_index = 0usize;
        let mut depth = 1usize;
        stack_nodes[0] = ROOT_ORDINAL;
        visited[ROOT_ORDINAL] = true;

        while depth > 0 {
            let top = depth - 1;
            let ordinal = stack_nodes[top];
            let successors = adjacency.successors(ordinal);

            let mut pushed = false;
            while stack_edge_idx[top] < successors.len() {
                let to = successors[stack_edge_idx[top]];
                stack_edge_idx[top] += 1;
                if visited[to] {
                    continue;
                }
                visited[to] = true;
                stack_nodes[depth] = to;
                stack_edge_idx[depth] = 0;
                depth += 1;
                pushed = true;
                break;
            }

            if !pushed {
                ordinal_to_post_order[ordinal] = next_index;
                post_order_to_ordinal[next_index] = ordinal;
                next_index += 1;
                depth -= 1;
            }
        }

        let reached = next_index;
        if reached != node_count {
            // Give the root's slot to the unreached nodes, then put it back last.
            if next_index > 0 && post_order_to_ordinal[next_index - 1] == ROOT_ORDINAL {
                next_index -= 1;
            }
            for ordinal in 1..node_count {
                if !visited[ordinal] {
                    ordinal_to_post_order[ordinal] = next_index;
                    post_order_to_ordinal[next_index] = ordinal;
                    next_index += 1;
                }
            }
            if ordinal_to_post_order[ROOT_ORDINAL] != node_count - 1 {
                ordinal_to_post_order[ROOT_ORDINAL] = next_index;
                post_order_to_ordinal[next_index] = ROOT_ORDINAL;
            }
        }

        PostOrder {
            ordinal_to_post_order,
            post_order_to_ordinal,
            unreached: node_count - reached,
        }
    }
}

/// Walk two fingers up the dominator chain until they meet. Post-order
/// indices grow toward the root, so the smaller finger always moves.
///
/// `limit` bounds the walk on inconsistent intermediate states.
fn intersect(dominators: &[usize], mut finger1: usize, mut finger2: usize, limit: usize) -> usize {
    let mut steps = 0usize;
    while finger1 != finger2 && steps < limit {
        while finger1 < finger2 && steps < limit {
            finger1 = dominators[finger1];
            steps += 1;
        }
        while finger2 < finger1 && steps < limit {
            finger2 = dominators[finger2];
            steps += 1;
        }
    }
    finger1
}

impl DominatorTree {
    /// Compute dominators and retained sizes for every node.
    ///
    /// Every direct child of the root is flagged as a GC root, in addition to
    /// the ids in the snapshot's own root list. Nodes that the root cannot
    /// reach end up with the root as their dominator.
    pub fn compute(
        snapshot: &HeapSnapshot,
        index: &GraphIndex,
        max_passes: Option<usize>,
    ) -> Result<Self> {
        let node_count = snapshot.nodes.len();
        if node_count == 0 {
            return Ok(DominatorTree::default());
        }

        let adjacency = Adjacency::build(snapshot, index);
        let PostOrder {
            ordinal_to_post_order,
            post_order_to_ordinal,
            unreached,
        } = PostOrder::compute(&adjacency, node_count);

        if unreached > 0 {
            warn!(unreached, "nodes not reachable from the snapshot root");
        }

        let mut is_gc_root = vec![false; node_count];
        let mut gc_root_ids = snapshot.roots.clone();
        for &id in &snapshot.roots {
            if let Some(ordinal) = index.ordinal(id) {
                is_gc_root[ordinal] = true;
            }
        }

        let root = node_count - 1;
        let no_entry = node_count;
        let mut affected = vec![false; node_count];
        let mut dominators = vec![no_entry; node_count];
        dominators[root] = root;

        for &child in adjacency.successors(ROOT_ORDINAL) {
            affected[ordinal_to_post_order[child]] = true;
            is_gc_root[child] = true;
            gc_root_ids.insert(snapshot.nodes[child].id);
        }

        let intersect_limit = node_count * 2;
        let mut passes = 0usize;
        let mut changed = true;
        while changed {
            changed = false;
            passes += 1;
            if let Some(limit) = max_passes {
                if passes > limit {
                    return Err(AnalysisError::DominatorPassLimit { passes: limit });
                }
            }

            for post_order in (0..root).rev() {
                if !affected[post_order] {
                    continue;
                }
                affected[post_order] = false;

                // Nothing dominates more tightly than the root.
                if dominators[post_order] == root {
                    continue;
                }

                let ordinal = post_order_to_ordinal[post_order];
                let mut new_dominator = no_entry;
                for &predecessor in adjacency.predecessors(ordinal) {
                    let predecessor_post_order = ordinal_to_post_order[predecessor];
                    if dominators[predecessor_post_order] == no_entry {
                        continue;
                    }
                    new_dominator = if new_dominator == no_entry {
                        predecessor_post_order
                    } else {
                        intersect(
                            &dominators,
                            predecessor_post_order,
                            new_dominator,
                            intersect_limit,
                        )
                    };
                    if new_dominator == root {
                        break;
                    }
                }

                if new_dominator != no_entry && dominators[post_order] != new_dominator {
                    dominators[post_order] = new_dominator;
                    changed = true;
                    for &successor in adjacency.successors(ordinal) {
                        affected[ordinal_to_post_order[successor]] = true;
                    }
                }
            }
        }

        let mut ordinal_to_dominator = vec![ROOT_ORDINAL; node_count];
        for (post_order, &ordinal) in post_order_to_ordinal.iter().enumerate() {
            let dominator = dominators[post_order];
            ordinal_to_dominator[ordinal] = if dominator < node_count {
                post_order_to_ordinal[dominator]
            } else {
                ROOT_ORDINAL
            };
        }

        // Children strictly before parents; the root is never added to itself.
        // Sizes saturate at u64::MAX.
        let mut retained_sizes: Vec<u64> = snapshot.nodes.iter().map(|n| n.size).collect();
        for &ordinal in &post_order_to_ordinal[..root] {
            let dominator = ordinal_to_dominator[ordinal];
            retained_sizes[dominator] =
                retained_sizes[dominator].saturating_add(retained_sizes[ordinal]);
        }

        debug!(
            nodes = node_count,
            passes,
            unreached,
            gc_roots = gc_root_ids.len(),
            "computed dominator tree"
        );

        Ok(DominatorTree {
            ordinal_to_post_order,
            post_order_to_ordinal,
            ordinal_to_dominator,
            retained_sizes,
            is_gc_root,
            gc_root_ids,
            passes,
            unreached,
        })
    }

    pub fn len(&self) -> usize {
        self.retained_sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retained_sizes.is_empty()
    }

    /// Ordinal of the immediate dominator. The root dominates itself.
    pub fn immediate_dominator(&self, ordinal: usize) -> usize {
        self.ordinal_to_dominator[ordinal]
    }

    pub fn post_order_index(&self, ordinal: usize) -> usize {
        self.ordinal_to_post_order[ordinal]
    }

    pub fn ordinal_at(&self, post_order: usize) -> usize {
        self.post_order_to_ordinal[post_order]
    }

    /// Bytes freed if the node at `ordinal` were collected.
    pub fn retained_size(&self, ordinal: usize) -> u64 {
        self.retained_sizes[ordinal]
    }

    pub fn retained_sizes(&self) -> &[u64] {
        &self.retained_sizes
    }

    pub fn is_gc_root(&self, ordinal: usize) -> bool {
        self.is_gc_root[ordinal]
    }

    /// Explicit roots plus every direct child of the root. May contain ids
    /// with no node.
    pub fn gc_root_ids(&self) -> &HashSet<u64> {
        &self.gc_root_ids
    }

    pub fn is_gc_root_id(&self, id: u64) -> bool {
        self.gc_root_ids.contains(&id)
    }

    /// Full passes the fixed-point loop needed, including the last one.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Nodes the DFS from the root did not reach.
    pub fn unreached(&self) -> usize {
        self.unreached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsprof_format::{HeapEdge, HeapNode};

    fn node(id: u64, size: u64) -> HeapNode {
        HeapNode {
            id,
            size,
            class_name_index: -1,
            flags: 0,
            label_index: -1,
        }
    }

    fn edge(from_id: u64, to_id: u64) -> HeapEdge {
        HeapEdge {
            from_id,
            to_id,
            type_index: 0,
            data_index: 0,
        }
    }

    fn build(nodes: Vec<HeapNode>, edges: Vec<HeapEdge>, roots: &[u64]) -> DominatorTree {
        let mut snapshot = HeapSnapshot::empty();
        snapshot.nodes = nodes;
        snapshot.edges = edges;
        snapshot.roots = roots.iter().copied().collect();
        let index = GraphIndex::build(&snapshot);
        DominatorTree::compute(&snapshot, &index, None).unwrap()
    }

    #[test]
    fn diamond_is_dominated_by_root() {
        // root -> A -> B, root -> B
        let tree = build(
            vec![node(100, 10), node(101, 20), node(102, 30)],
            vec![edge(100, 101), edge(101, 102), edge(100, 102)],
            &[],
        );

        assert_eq!(tree.immediate_dominator(2), 0);
        assert_eq!(tree.immediate_dominator(1), 0);
        assert_eq!(tree.retained_size(0), 60);
        assert_eq!(tree.retained_size(1), 20);
        assert_eq!(tree.retained_size(2), 30);
    }

    #[test]
    fn chain_folds_into_each_ancestor() {
        // root -> A -> B -> C
        let tree = build(
            vec![node(1, 1), node(2, 2), node(3, 4), node(4, 8)],
            vec![edge(1, 2), edge(2, 3), edge(3, 4)],
            &[],
        );

        assert_eq!(tree.immediate_dominator(3), 2);
        assert_eq!(tree.immediate_dominator(2), 1);
        assert_eq!(tree.retained_size(3), 8);
        assert_eq!(tree.retained_size(2), 12);
        assert_eq!(tree.retained_size(1), 14);
        assert_eq!(tree.retained_size(0), 15);
    }

    #[test]
    fn root_is_numbered_last() {
        let tree = build(
            vec![node(1, 1), node(2, 1), node(3, 1)],
            vec![edge(1, 2), edge(2, 3)],
            &[],
        );

        assert_eq!(tree.post_order_index(0), 2);
        assert_eq!(tree.post_order_index(2), 0);
        assert_eq!(tree.ordinal_at(2), 0);
    }

    #[test]
    fn unreached_nodes_attach_to_root() {
        // root -> A; U is disconnected.
        let tree = build(
            vec![node(1, 1), node(2, 2), node(3, 4)],
            vec![edge(1, 2)],
            &[],
        );

        assert_eq!(tree.unreached(), 1);
        assert_eq!(tree.post_order_index(0), 2);
        assert_eq!(tree.post_order_index(2), 1);
        assert_eq!(tree.immediate_dominator(2), 0);
        assert_eq!(tree.retained_size(0), 7);
        assert_eq!(tree.retained_size(2), 4);
    }

    #[test]
    fn cycles_converge() {
        // root -> A <-> B
        let tree = build(
            vec![node(1, 1), node(2, 2), node(3, 4)],
            vec![edge(1, 2), edge(2, 3), edge(3, 2)],
            &[],
        );

        assert_eq!(tree.immediate_dominator(2), 1);
        assert_eq!(tree.immediate_dominator(1), 0);
        assert_eq!(tree.retained_size(1), 6);
        assert_eq!(tree.retained_size(0), 7);
    }

    #[test]
    fn dangling_edges_are_skipped() {
        let tree = build(
            vec![node(1, 1), node(2, 2)],
            vec![edge(1, 2), edge(2, 999), edge(888, 2)],
            &[],
        );

        assert_eq!(tree.unreached(), 0);
        assert_eq!(tree.retained_size(0), 3);
    }

    #[test]
    fn root_children_become_gc_roots() {
        // root -> A -> B, explicit root list names B and a missing id.
        let tree = build(
            vec![node(1, 1), node(2, 1), node(3, 1)],
            vec![edge(1, 2), edge(2, 3)],
            &[3, 77],
        );

        assert!(!tree.is_gc_root(0));
        assert!(tree.is_gc_root(1));
        assert!(tree.is_gc_root(2));
        assert_eq!(tree.gc_root_ids().len(), 3);
        assert!(tree.gc_root_ids().contains(&2));
        assert!(tree.gc_root_ids().contains(&77));
    }

    #[test]
    fn single_node() {
        let tree = build(vec![node(5, 42)], vec![], &[]);

        assert_eq!(tree.len(), 1);
        assert_eq!(tree.immediate_dominator(0), 0);
        assert_eq!(tree.retained_size(0), 42);
    }

    #[test]
    fn empty_snapshot() {
        let tree = build(vec![], vec![], &[]);
        assert!(tree.is_empty());
        assert_eq!(tree.passes(), 0);
    }

    #[test]
    fn deep_chain_does_not_recurse() {
        let count = 50_000u64;
        let nodes = (0..count).map(|id| node(id, 1)).collect();
        let edges = (0..count - 1).map(|id| edge(id, id + 1)).collect();
        let tree = build(nodes, edges, &[]);

        assert_eq!(tree.retained_size(0), count);
        assert_eq!(tree.retained_size(1), count - 1);
        assert_eq!(tree.immediate_dominator((count - 1) as usize), (count - 2) as usize);
    }

    #[test]
    fn intersect_meets_at_common_ancestor() {
        // post-order chain: 0 -> 2, 1 -> 2, 2 -> 3 (root)
        let dominators = vec![2, 2, 3, 3];
        assert_eq!(intersect(&dominators, 0, 1, 8), 2);
        assert_eq!(intersect(&dominators, 0, 3, 8), 3);
        assert_eq!(intersect(&dominators, 1, 1, 8), 1);
    }

    #[test]
    fn retained_sizes_saturate() {
        let big = 12_000_000_000_000_000_000;
        let tree = build(
            vec![node(1, big), node(2, big), node(3, big)],
            vec![edge(1, 2), edge(2, 3)],
            &[],
        );

        assert_eq!(tree.retained_size(2), big);
        assert_eq!(tree.retained_size(1), u64::MAX);
        assert_eq!(tree.retained_size(0), u64::MAX);
    }
}
