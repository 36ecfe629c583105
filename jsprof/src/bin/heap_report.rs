//! Render a heap snapshot as a retained-size report.
//!
//! The markdown report lists the heaviest types and objects, how the largest
//! objects are kept alive, and every object and edge in grep-friendly tables.
//! `--format ndjson` writes the same analysis as one JSON record per line.
//!
//! # Usage
//!
//! ```bash
//! heap_report snapshot.json -o heap.md
//! heap_report snapshot.json.gz --format ndjson
//! heap_report snapshot.json --retainers-of 12345
//! ```

use clap::{Parser, ValueEnum};
use jsprof::heap::{AnalysisOptions, HeapAnalysis, ReportOptions};
use jsprof::input::open_input;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Markdown,
    Ndjson,
}

#[derive(Parser, Debug)]
#[command(name = "heap_report")]
#[command(about = "Compute retained sizes for a heap snapshot and render a report")]
#[command(version)]
struct Args {
    /// Heap snapshot (plain, gzip or zstd)
    input: PathBuf,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum, default_value_t = Format::Markdown)]
    format: Format,

    /// Types listed by retained size
    #[arg(long, default_value = "50")]
    top_types: usize,

    /// Objects listed by retained size
    #[arg(long, default_value = "50")]
    top_objects: usize,

    /// Largest objects to trace back to a GC root
    #[arg(long, default_value = "20")]
    retainer_chains: usize,

    /// GC roots listed before truncating
    #[arg(long, default_value = "100")]
    gc_roots: usize,

    /// Fail if the dominator computation needs more passes than this
    #[arg(long)]
    max_dominator_passes: Option<usize>,

    /// Only print the retainer chain of this object id
    #[arg(long, value_name = "ID")]
    retainers_of: Option<u64>,
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("Loading snapshot: {}", args.input.display());
    let input = open_input(&args.input).map_err(|e| {
        format!(
            "Failed to open input file '{}': {}",
            args.input.display(),
            e
        )
    })?;

    let options = AnalysisOptions {
        max_dominator_passes: args.max_dominator_passes,
    };
    let analysis = HeapAnalysis::parse(input, &options)?;
    eprintln!(
        "  {} nodes, {} edges, {} types",
        analysis.snapshot.nodes.len(),
        analysis.snapshot.edges.len(),
        analysis.types.len()
    );

    let report = ReportOptions {
        top_types: args.top_types,
        top_objects: args.top_objects,
        retainer_chains: args.retainer_chains,
        gc_roots: args.gc_roots,
    };

    let mut writer: Box<dyn Write> = match &args.output {
        Some(path) => {
            let file = File::create(path).map_err(|e| {
                format!("Failed to create output file '{}': {}", path.display(), e)
            })?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(std::io::stdout().lock()),
    };

    match (args.retainers_of, args.format) {
        (Some(id), _) => analysis.write_retainer_chain(&mut writer, id)?,
        (None, Format::Markdown) => analysis.write_markdown(&mut writer, &report)?,
        (None, Format::Ndjson) => analysis.write_ndjson(&mut writer, &report)?,
    }
    writer.flush()?;

    if let Some(path) = &args.output {
        eprintln!("Wrote report to {}", path.display());
    }

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
