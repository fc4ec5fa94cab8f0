//! hindsight CLI: analyze a recorded trace directory.
//!
//! This is the thin orchestration shim around the library; rendering
//! beyond plain text or JSON is out of scope.

use clap::{ArgAction, Parser};
use hindsight::analysis::AnalysisConfig;
use hindsight::trace::ReaderConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hindsight", version, about = "Post-mortem concurrency analyzer")]
struct Cli {
    /// Directory containing the trace_<routine>.log files.
    trace_dir: PathBuf,

    /// Drop atomic events while reading the trace.
    #[arg(long)]
    ignore_atomics: bool,

    /// Skip the resource-deadlock (lock-order cycle) detector.
    #[arg(long)]
    no_resource_deadlock: bool,

    /// Emit the report as JSON instead of plain text.
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (-v, -vv).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbosity: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let reader = ReaderConfig::new().with_ignore_atomics(cli.ignore_atomics);
    let analysis = AnalysisConfig::new().with_resource_deadlock(!cli.no_resource_deadlock);

    let report = match hindsight::analyze_dir(&cli.trace_dir, &reader, &analysis) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("hindsight: {err}");
            return ExitCode::FAILURE;
        }
    };

    if cli.json {
        match report.to_json() {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("hindsight: {err}");
                return ExitCode::FAILURE;
            }
        }
    } else if report.is_empty() {
        println!("No bugs, possible bugs or leaks found.");
    } else {
        print!("{report}");
    }

    ExitCode::SUCCESS
}
