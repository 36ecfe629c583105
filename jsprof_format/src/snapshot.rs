//! Flat-array heap snapshot reader.
//!
//! A snapshot arrives as a single JSON object whose graph is stored in flat
//! integer arrays:
//!
//! - `nodes`: `[id, size, classNameIndex, flags]` per node, or seven fields per
//!   node when `type` is `"GCDebugging"` (the fifth being a label index).
//! - `edges`: `[fromId, toId, typeIndex, dataIndex]` per edge.
//! - `roots`: `[nodeId, _, _]` per GC root.
//!
//! String tables (`nodeClassNames`, `edgeTypes`, `edgeNames`, `labels`) are
//! indexed by the integer fields above.
//!
//! Snapshots are diagnostic data, so the reader is lenient: a missing array is
//! empty, a wrong-typed number reads as 0, a wrong-typed string reads as "".
//! Only I/O and JSON syntax failures are reported as errors.

use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashSet;
use std::io::Read;
use tracing::{debug, warn};

use crate::Result;

/// Node stride of the compact snapshot format.
pub const COMPACT_NODE_STRIDE: usize = 4;
/// Node stride of the GC-debugging snapshot format.
pub const GC_DEBUGGING_NODE_STRIDE: usize = 7;
/// Fields per edge.
pub const EDGE_STRIDE: usize = 4;
/// Fields per GC root entry. Only the first is consumed.
pub const ROOT_STRIDE: usize = 3;

/// Bit 0 of a node's flags marks engine-internal cells.
pub const INTERNAL_FLAG: u32 = 1;

/// Which node layout the snapshot uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    /// Four fields per node, no labels.
    Compact,
    /// Seven fields per node, with a label index at offset 4.
    GcDebugging,
}

impl SnapshotKind {
    /// Select the layout from the snapshot's top-level `type` field.
    pub fn from_type_field(ty: Option<&str>) -> Self {
        match ty {
            Some("GCDebugging") => SnapshotKind::GcDebugging,
            _ => SnapshotKind::Compact,
        }
    }

    /// Number of integers per node in the flat `nodes` array.
    pub fn node_stride(self) -> usize {
        match self {
            SnapshotKind::Compact => COMPACT_NODE_STRIDE,
            SnapshotKind::GcDebugging => GC_DEBUGGING_NODE_STRIDE,
        }
    }
}

/// A heap object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapNode {
    /// Snapshot-unique object id.
    pub id: u64,
    /// Self size in bytes.
    pub size: u64,
    /// Index into `class_names`, or -1.
    pub class_name_index: i64,
    /// Flag bits; see [`INTERNAL_FLAG`].
    pub flags: u32,
    /// Index into `labels`, or -1 (always -1 in compact snapshots).
    pub label_index: i64,
}

impl HeapNode {
    /// Whether the engine marked this cell as internal.
    pub fn is_internal(&self) -> bool {
        self.flags & INTERNAL_FLAG != 0
    }
}

/// A reference from one heap object to another.
///
/// Either end may name an id that has no node; consumers skip such edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapEdge {
    pub from_id: u64,
    pub to_id: u64,
    /// Index into `edge_types`.
    pub type_index: i64,
    /// Property/variable name index, or the element index for `Index` edges.
    pub data_index: i64,
}

/// A decoded heap snapshot.
#[derive(Debug, Clone)]
pub struct HeapSnapshot {
    pub kind: SnapshotKind,
    /// Nodes in snapshot order. Ordinal 0 is the synthetic root.
    pub nodes: Vec<HeapNode>,
    pub edges: Vec<HeapEdge>,
    /// Ids listed in the snapshot's `roots` array.
    pub roots: HashSet<u64>,
    pub class_names: Vec<String>,
    pub edge_types: Vec<String>,
    pub edge_names: Vec<String>,
    pub labels: Vec<String>,
}

impl HeapSnapshot {
    /// A snapshot with no nodes, edges, roots or strings.
    pub fn empty() -> Self {
        HeapSnapshot {
            kind: SnapshotKind::Compact,
            nodes: Vec::new(),
            edges: Vec::new(),
            roots: HashSet::new(),
            class_names: Vec::new(),
            edge_types: Vec::new(),
            edge_names: Vec::new(),
            labels: Vec::new(),
        }
    }

    /// Parse a snapshot from any `Read`-able source.
    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        let value: Value = serde_json::from_reader(reader)?;
        Ok(Self::from_value(&value))
    }

    /// Decode a snapshot from an already-parsed JSON value.
    ///
    /// Never fails: a value that is not an object yields an empty snapshot.
    pub fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            warn!("heap snapshot is not a JSON object; treating it as empty");
            return Self::empty();
        };

        let kind = SnapshotKind::from_type_field(object.get("type").and_then(Value::as_str));
        let node_stride = kind.node_stride();

        let class_names = string_table(object.get("nodeClassNames"));
        let edge_types = string_table(object.get("edgeTypes"));
        let edge_names = string_table(object.get("edgeNames"));
        let labels = string_table(object.get("labels"));

        let raw_nodes = int_array(object.get("nodes"));
        let nodes: Vec<HeapNode> = raw_nodes
            .chunks_exact(node_stride)
            .map(|chunk| HeapNode {
                id: read_u64(&chunk[0]),
                size: read_u64(&chunk[1]),
                class_name_index: read_int(&chunk[2]),
                flags: read_int(&chunk[3]) as u32,
                label_index: match kind {
                    SnapshotKind::GcDebugging => read_int(&chunk[4]),
                    SnapshotKind::Compact => -1,
                },
            })
            .collect();

        let raw_edges = int_array(object.get("edges"));
        let edges: Vec<HeapEdge> = raw_edges
            .chunks_exact(EDGE_STRIDE)
            .map(|chunk| HeapEdge {
                from_id: read_u64(&chunk[0]),
                to_id: read_u64(&chunk[1]),
                type_index: read_int(&chunk[2]),
                data_index: read_int(&chunk[3]),
            })
            .collect();

        let roots: HashSet<u64> = int_array(object.get("roots"))
            .iter()
            .step_by(ROOT_STRIDE)
            .map(read_u64)
            .collect();

        debug!(
            ?kind,
            nodes = nodes.len(),
            edges = edges.len(),
            roots = roots.len(),
            "decoded heap snapshot"
        );

        HeapSnapshot {
            kind,
            nodes,
            edges,
            roots,
            class_names,
            edge_types,
            edge_names,
            labels,
        }
    }

    /// Class name of a node, if its index resolves.
    pub fn class_name(&self, node: &HeapNode) -> Option<&str> {
        lookup(&self.class_names, node.class_name_index)
    }

    /// Label of a node, or "" when it has none.
    pub fn label(&self, node: &HeapNode) -> &str {
        lookup(&self.labels, node.label_index).unwrap_or_default()
    }

    /// Edge type name (`Internal`, `Property`, `Index`, `Variable`), if it resolves.
    pub fn edge_type(&self, edge: &HeapEdge) -> Option<&str> {
        lookup(&self.edge_types, edge.type_index)
    }

    /// Human-facing name for an edge: the property or variable name, `[n]` for
    /// element edges, and "" for anything else.
    pub fn edge_name(&self, edge: &HeapEdge) -> Cow<'_, str> {
        match self.edge_type(edge) {
            Some("Property") | Some("Variable") => {
                Cow::Borrowed(lookup(&self.edge_names, edge.data_index).unwrap_or_default())
            }
            Some("Index") => Cow::Owned(format!("[{}]", edge.data_index)),
            _ => Cow::Borrowed(""),
        }
    }
}

fn lookup(table: &[String], index: i64) -> Option<&str> {
    usize::try_from(index)
        .ok()
        .and_then(|i| table.get(i))
        .map(String::as_str)
}

fn string_table(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|v| v.as_str().unwrap_or_default().to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn int_array(value: Option<&Value>) -> &[Value] {
    value
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Ids and sizes can exceed 32 bits, and some producers write them as doubles.
fn read_u64(value: &Value) -> u64 {
    if let Some(n) = value.as_u64() {
        return n;
    }
    value
        .as_f64()
        .filter(|f| f.is_finite() && *f >= 0.0 && *f < u64::MAX as f64)
        .map(|f| f as u64)
        .unwrap_or(0)
}

/// Table indices and flags are platform ints.
fn read_int(value: &Value) -> i64 {
    value
        .as_i64()
        .or_else(|| {
            value
                .as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        })
        .filter(|n| i32::try_from(*n).is_ok())
        .unwrap_or(0)
}
