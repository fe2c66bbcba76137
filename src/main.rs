//! Tally - running averages for timed actions
//!
//! CLI entry point with global panic handler.

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tally::cli::{IngestCommand, IngestOptions, IngestOutput};
use tally::config::{crash_log_path, Config, StoreKind};
use tally::error::{exit_codes, TallyError};
use tally::{create_store, Aggregator};

/// Payloads ingested by `tally demo`.
const DEMO_PAYLOADS: [&str; 3] = [
    r#"{"AcTion":"jump", "tIMe":100}"#,
    r#"{"action":"run", "time":75}"#,
    r#"{"action":"jump", "time":200}"#,
];

// =============================================================================
// CLI Definition
// =============================================================================

/// Tally - running averages for timed actions
#[derive(Parser)]
#[command(name = "tally")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest newline-delimited event payloads and print per-action averages
    Ingest {
        /// Input file (reads stdin when omitted or "-")
        file: Option<PathBuf>,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
        /// Threads used to feed the batch
        #[arg(long, short)]
        workers: Option<usize>,
        /// Use the sharded store
        #[arg(long)]
        sharded: bool,
        /// Shard count for the sharded store
        #[arg(long)]
        shards: Option<usize>,
    },

    /// Ingest three sample events and print the export
    Demo {
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
    },
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> ExitCode {
    init_tracing();
    setup_panic_handler();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("tally error: {}", e);
            ExitCode::from(exit_codes::ERROR as u8)
        }
    }
}

/// Install the stderr log subscriber, filtered by `TALLY_LOG`.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TALLY_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_target(true)
        .init();
}

/// Set up the global panic handler.
///
/// On panic, logs to ~/.tally/crash.log and exits with code 3.
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|info| {
        eprintln!("tally panic: {}", info);

        if let Some(crash_log) = crash_log_path() {
            if let Some(parent) = crash_log.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Ok(mut file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&crash_log)
            {
                let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
                let _ = writeln!(file, "[{}] {}", timestamp, info);
            }
        }

        std::process::exit(exit_codes::CRASH);
    }));
}

/// Run the CLI and return the exit code.
fn run() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            file,
            json,
            quiet,
            workers,
            sharded,
            shards,
        } => run_ingest(file, json, quiet, workers, sharded, shards),
        Commands::Demo { json } => run_demo(json),
    }
}

// =============================================================================
// Command Implementations
// =============================================================================

/// Map an ingest result to an exit code.
fn output_to_exit_code(output: &IngestOutput) -> ExitCode {
    let code = if !output.success {
        exit_codes::ERROR
    } else if !output.rejected.is_empty() {
        exit_codes::REJECTED
    } else {
        exit_codes::SUCCESS
    };
    ExitCode::from(code as u8)
}

fn run_ingest(
    file: Option<PathBuf>,
    json: bool,
    quiet: bool,
    workers: Option<usize>,
    sharded: bool,
    shards: Option<usize>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut config = Config::load();

    // Flags override every config layer
    if sharded || shards.is_some() {
        config.store.kind = StoreKind::Sharded;
    }
    if let Some(n) = shards {
        config.store.shards = n;
    }
    if let Some(n) = workers {
        config.ingest.workers = n;
    }
    config.validate()?;

    tracing::info!(
        store = config.store.kind.as_str(),
        shards = config.store.shards,
        workers = config.ingest.workers,
        "starting ingest"
    );

    let aggregator = Aggregator::new(create_store(&config.store));
    let cmd = IngestCommand::new(aggregator, config.ingest);
    let options = IngestOptions { json, quiet };

    let output = match file.filter(|p| p.as_os_str() != "-") {
        Some(path) => {
            let handle = File::open(&path).map_err(|e| TallyError::storage(&path, e))?;
            cmd.run(BufReader::new(handle), &options)
        }
        None => cmd.run(io::stdin().lock(), &options),
    };

    let formatted = cmd.format_output(&output, &options);
    if !formatted.is_empty() {
        println!("{}", formatted);
    }

    Ok(output_to_exit_code(&output))
}

fn run_demo(json: bool) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cmd = IngestCommand::new(Aggregator::in_memory(), Config::default().ingest);
    let options = IngestOptions::default();
    let output = cmd.run_payloads(DEMO_PAYLOADS, &options);

    if json {
        println!("{}", cmd.aggregator().export_json()?);
    } else {
        println!("{}", cmd.format_output(&output, &options));
    }

    Ok(output_to_exit_code(&output))
}

// =============================================================================
// Tests
// =============================================================================
