use jsprof_format::{CpuProfile, HeapSnapshot};
use std::env;
use std::fs::File;
use std::io::BufReader;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <file.cpuprofile | snapshot.json>", args[0]);
        return ExitCode::from(2);
    }

    let path = &args[1];

    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    let value: serde_json::Value = match serde_json::from_reader(BufReader::new(file)) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Invalid JSON in '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    // A cpuprofile carries session times; a heap snapshot never does.
    if value.get("startTime").is_some() {
        let profile = match serde_json::from_value::<CpuProfile>(value) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Invalid CPU profile '{}': {}", path, e);
                return ExitCode::FAILURE;
            }
        };
        match profile.validate() {
            Ok(()) => {
                println!("Valid CPU profile: {}", path);
                println!("  Nodes: {}", profile.nodes.len());
                println!("  Samples: {}", profile.samples.len());
                println!("  Total hits: {}", profile.total_hits());
                println!(
                    "  Duration: {} us",
                    profile.end_time.saturating_sub(profile.start_time)
                );
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Invalid CPU profile '{}': {}", path, e);
                ExitCode::FAILURE
            }
        }
    } else {
        let snapshot = HeapSnapshot::from_value(&value);
        if snapshot.nodes.is_empty() {
            eprintln!("Heap snapshot '{}' has no nodes", path);
            return ExitCode::FAILURE;
        }
        let total_size = snapshot
            .nodes
            .iter()
            .map(|n| n.size)
            .fold(0, u64::saturating_add);
        println!("Heap snapshot: {}", path);
        println!("  Format: {:?}", snapshot.kind);
        println!("  Nodes: {}", snapshot.nodes.len());
        println!("  Edges: {}", snapshot.edges.len());
        println!("  GC roots: {}", snapshot.roots.len());
        println!("  Types: {}", snapshot.class_names.len());
        println!("  Total self size: {} bytes", total_size);
        ExitCode::SUCCESS
    }
}
