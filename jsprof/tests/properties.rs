//! Property-based tests over generated heap graphs and sample streams.
//!
//! Heap graphs may be cyclic, disconnected and contain edges to ids with no
//! node. Sample streams arrive out of order and include idle samples.

use jsprof::cpu::{CapturedFrame, CapturedTrace, ProfileAggregator, ROOT_ID, SampleBuffer};
use jsprof::heap::report::{escape, unescape};
use jsprof::heap::stats::aggregate_types;
use jsprof::heap::{AnalysisOptions, HeapAnalysis};
use jsprof::jsprof_format::{HeapEdge, HeapNode, HeapSnapshot};
use proptest::prelude::*;

const START: u64 = 1_700_000_000_000_000;

// -- Heap graphs --

fn node_id(ordinal: usize, node_count: usize) -> u64 {
    if ordinal < node_count {
        ordinal as u64 * 2 + 1
    } else {
        // No node carries this id.
        10_000 + ordinal as u64
    }
}

fn build_snapshot(sizes: Vec<u64>, edges: Vec<(usize, usize)>) -> HeapSnapshot {
    let count = sizes.len();
    let mut snapshot = HeapSnapshot::empty();
    snapshot.class_names = vec!["Object".into(), "Array".into(), "string".into()];
    snapshot.nodes = sizes
        .into_iter()
        .enumerate()
        .map(|(ordinal, size)| HeapNode {
            id: node_id(ordinal, count),
            size,
            class_name_index: (ordinal % 4) as i64,
            flags: 0,
            label_index: -1,
        })
        .collect();
    snapshot.edges = edges
        .into_iter()
        .map(|(from, to)| HeapEdge {
            from_id: node_id(from, count),
            to_id: node_id(to, count),
            type_index: 0,
            data_index: 0,
        })
        .collect();
    snapshot
}

/// Up to 40 nodes with random edges; targets past the node count dangle.
fn snapshot_strategy() -> impl Strategy<Value = HeapSnapshot> {
    (1usize..40)
        .prop_flat_map(|n| {
            (
                prop::collection::vec(0u64..1_000, n),
                prop::collection::vec((0..n, 0..n + 2), 0..n * 3),
            )
        })
        .prop_map(|(sizes, edges)| build_snapshot(sizes, edges))
}

/// A chain from the root through every node, plus random extra edges.
fn connected_snapshot_strategy() -> impl Strategy<Value = HeapSnapshot> {
    (1usize..40)
        .prop_flat_map(|n| {
            (
                prop::collection::vec(0u64..1_000, n),
                prop::collection::vec((0..n, 0..n), 0..n * 2),
            )
        })
        .prop_map(|(sizes, extra)| {
            let n = sizes.len();
            let mut edges: Vec<(usize, usize)> = (1..n).map(|i| (i - 1, i)).collect();
            edges.extend(extra);
            build_snapshot(sizes, edges)
        })
}

fn analyze(snapshot: HeapSnapshot) -> HeapAnalysis {
    HeapAnalysis::analyze(snapshot, &AnalysisOptions::default()).unwrap()
}

proptest! {
    #[test]
    fn root_retains_everything_when_connected(snapshot in connected_snapshot_strategy()) {
        let total: u64 = snapshot.nodes.iter().map(|n| n.size).sum();
        let analysis = analyze(snapshot);

        prop_assert_eq!(analysis.tree.unreached(), 0);
        prop_assert_eq!(analysis.tree.retained_size(0), total);
    }

    #[test]
    fn root_retained_size_is_total_size(snapshot in snapshot_strategy()) {
        // Unreached nodes hang off the root, so nothing is lost.
        let total: u64 = snapshot.nodes.iter().map(|n| n.size).sum();
        let analysis = analyze(snapshot);

        prop_assert_eq!(analysis.tree.retained_size(0), total);
        prop_assert_eq!(analysis.total_size, total);
    }

    #[test]
    fn retained_sizes_grow_toward_root(snapshot in snapshot_strategy()) {
        let analysis = analyze(snapshot);
        let tree = &analysis.tree;

        prop_assert_eq!(tree.immediate_dominator(0), 0);
        prop_assert_eq!(tree.post_order_index(0), tree.len() - 1);

        for ordinal in 1..tree.len() {
            let size = analysis.snapshot.nodes[ordinal].size;
            let dominator = tree.immediate_dominator(ordinal);

            prop_assert!(tree.retained_size(ordinal) >= size);
            prop_assert!(tree.retained_size(dominator) >= tree.retained_size(ordinal));
            prop_assert!(tree.post_order_index(dominator) > tree.post_order_index(ordinal));
        }
    }

    #[test]
    fn type_statistics_are_repeatable(snapshot in snapshot_strategy()) {
        let analysis = analyze(snapshot);
        let again = aggregate_types(&analysis.snapshot, &analysis.tree);

        prop_assert_eq!(&analysis.types, &again);

        let count: u64 = again.iter().map(|t| t.count).sum();
        prop_assert_eq!(count, analysis.snapshot.nodes.len() as u64);
        for pair in again.windows(2) {
            prop_assert!(pair[0].total_retained_size >= pair[1].total_retained_size);
        }
    }

    #[test]
    fn largest_objects_are_sorted(snapshot in snapshot_strategy()) {
        let analysis = analyze(snapshot);

        prop_assert_eq!(analysis.largest.len(), analysis.snapshot.nodes.len());
        for pair in analysis.largest.windows(2) {
            prop_assert!(
                analysis.tree.retained_size(pair[0]) >= analysis.tree.retained_size(pair[1])
            );
        }
    }
}

// -- Sample streams --

fn frame(name: u8) -> CapturedFrame {
    CapturedFrame {
        function_name: format!("fn{name}"),
        url: "/app/index.js".to_string(),
        script_id: 1,
        line_number: i64::from(name),
        column_number: 0,
    }
}

/// Traces with stacks drawn from five functions, empty stacks included.
fn buffer_strategy() -> impl Strategy<Value = SampleBuffer> {
    prop::collection::vec(
        (0u64..1_000_000, prop::collection::vec(0u8..5, 0..6)),
        0..60,
    )
    .prop_map(|traces| SampleBuffer {
        start_time_us: START,
        traces: traces
            .into_iter()
            .map(|(offset, names)| CapturedTrace {
                timestamp_us: START + offset,
                frames: names.into_iter().map(frame).collect(),
            })
            .collect(),
    })
}

proptest! {
    #[test]
    fn every_busy_sample_hits_one_node(buffer in buffer_strategy()) {
        let busy = buffer.traces.iter().filter(|t| !t.frames.is_empty()).count();
        let idle = buffer.traces.len() - busy;
        let profile = ProfileAggregator::new().aggregate(&buffer);

        prop_assert_eq!(profile.total_hits(), busy as u64);
        prop_assert_eq!(profile.samples.iter().filter(|&&id| id == ROOT_ID).count(), idle);
        prop_assert_eq!(profile.node(ROOT_ID).map(|n| n.hit_count), Some(0));
        prop_assert!(profile.validate().is_ok());
    }

    #[test]
    fn deltas_rebuild_sorted_timestamps(buffer in buffer_strategy()) {
        let mut timestamps: Vec<u64> = buffer.traces.iter().map(|t| t.timestamp_us).collect();
        timestamps.sort_unstable();
        let profile = ProfileAggregator::new().aggregate(&buffer);

        prop_assert_eq!(profile.time_deltas.len(), profile.samples.len());
        let mut now = profile.start_time;
        for (delta, expected) in profile.time_deltas.iter().zip(&timestamps) {
            prop_assert!(*delta >= 0);
            now += *delta as u64;
            prop_assert_eq!(now, *expected);
        }
        prop_assert_eq!(profile.end_time, timestamps.last().copied().unwrap_or(START));
    }
}

// -- Report escaping --

proptest! {
    #[test]
    fn unescape_inverts_escape(text in any::<String>()) {
        prop_assert_eq!(unescape(&escape(&text)), text);
    }

    #[test]
    fn escaped_text_stays_on_one_line(text in r#"[a-z|"\\`\n\r\t\x00-\x1F\x7F]{0,40}"#) {
        let escaped = escape(&text);
        prop_assert!(!escaped.contains('\n'));
        prop_assert!(!escaped.contains('\r'));
        prop_assert!(!escaped.contains('\t'));
        prop_assert!(!escaped.chars().any(|c| c.is_ascii_control()));
    }
}
