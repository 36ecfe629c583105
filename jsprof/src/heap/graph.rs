//! Id and adjacency indexes over a heap snapshot.

use jsprof_format::HeapSnapshot;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use tracing::{debug, warn};

/// Read-only lookup structures built once per snapshot.
///
/// Edge lists hold edge ordinals (indices into `HeapSnapshot::edges`) and are
/// keyed by node id, so edges whose ends have no node are still recorded;
/// callers skip them when resolving to ordinals.
#[derive(Debug, Default)]
pub struct GraphIndex {
    id_to_index: HashMap<u64, usize>,
    outgoing: HashMap<u64, Vec<usize>>,
    incoming: HashMap<u64, Vec<usize>>,
}

impl GraphIndex {
    pub fn build(snapshot: &HeapSnapshot) -> Self {
        let mut id_to_index = HashMap::with_capacity(snapshot.nodes.len());
        let mut duplicate_ids = 0usize;

        for (ordinal, node) in snapshot.nodes.iter().enumerate() {
            match id_to_index.entry(node.id) {
                Entry::Vacant(slot) => {
                    slot.insert(ordinal);
                }
                // First occurrence keeps the id.
                Entry::Occupied(_) => duplicate_ids += 1,
            }
        }

        let mut outgoing: HashMap<u64, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<u64, Vec<usize>> = HashMap::new();
        let mut dangling = 0usize;

        for (edge_idx, edge) in snapshot.edges.iter().enumerate() {
            outgoing.entry(edge.from_id).or_default().push(edge_idx);
            incoming.entry(edge.to_id).or_default().push(edge_idx);

            if !id_to_index.contains_key(&edge.from_id) || !id_to_index.contains_key(&edge.to_id)
            {
                dangling += 1;
            }
        }

        if duplicate_ids > 0 {
            warn!(duplicate_ids, "snapshot contains duplicate node ids");
        }
        if dangling > 0 {
            warn!(dangling, "snapshot contains edges to or from unknown nodes");
        }
        debug!(
            ids = id_to_index.len(),
            sources = outgoing.len(),
            targets = incoming.len(),
            "built graph index"
        );

        GraphIndex {
            id_to_index,
            outgoing,
            incoming,
        }
    }

    /// Ordinal of the first node with this id.
    pub fn ordinal(&self, id: u64) -> Option<usize> {
        self.id_to_index.get(&id).copied()
    }

    /// Edge ordinals leaving `id`, in snapshot order.
    pub fn outgoing(&self, id: u64) -> &[usize] {
        self.outgoing.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Edge ordinals arriving at `id`, in snapshot order.
    pub fn incoming(&self, id: u64) -> &[usize] {
        self.incoming.get(&id).map(Vec::as_slice).unwrap_or_default()
    }
}
