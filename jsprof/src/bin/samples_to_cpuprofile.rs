//! Fold a buffer of captured stack samples into a `.cpuprofile`.
//!
//! The output loads in Chrome DevTools, VS Code and speedscope.
//!
//! # Usage
//!
//! ```bash
//! samples_to_cpuprofile samples.json
//! samples_to_cpuprofile samples.bin --input-format postcard -o app.cpuprofile
//! ```

use clap::{Parser, ValueEnum};
use jsprof::cpu::{ProfileAggregator, SampleBuffer};
use jsprof::input::open_input;
use std::fs::File;
use std::io::{BufWriter, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum InputFormat {
    Json,
    Postcard,
}

#[derive(Parser, Debug)]
#[command(name = "samples_to_cpuprofile")]
#[command(about = "Convert captured stack samples to a .cpuprofile")]
#[command(version)]
struct Args {
    /// Sample buffer (plain, gzip or zstd)
    input: PathBuf,

    /// Output file (defaults to input filename with .cpuprofile extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Encoding of the sample buffer
    #[arg(long, value_enum, default_value_t = InputFormat::Json)]
    input_format: InputFormat,

    /// Indent the output JSON
    #[arg(long)]
    pretty: bool,
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let output_path = args.output.unwrap_or_else(|| {
        let mut path = args.input.clone();
        path.set_extension("cpuprofile");
        path
    });

    let mut input = open_input(&args.input).map_err(|e| {
        format!(
            "Failed to open input file '{}': {}",
            args.input.display(),
            e
        )
    })?;

    let buffer = match args.input_format {
        InputFormat::Json => SampleBuffer::from_json(input)?,
        InputFormat::Postcard => {
            let mut bytes = Vec::new();
            input.read_to_end(&mut bytes)?;
            SampleBuffer::from_postcard(&bytes)?
        }
    };
    eprintln!("Loaded {} samples", buffer.traces.len());

    let output_file = File::create(&output_path).map_err(|e| {
        format!(
            "Failed to create output file '{}': {}",
            output_path.display(),
            e
        )
    })?;
    let writer = BufWriter::new(output_file);
    let profile = ProfileAggregator::new().convert(&buffer, writer, args.pretty)?;

    eprintln!(
        "Converted '{}' -> '{}' ({} nodes, {} samples)",
        args.input.display(),
        output_path.display(),
        profile.nodes.len(),
        profile.samples.len()
    );

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
