//! `catl`: catalogue archive tooling.
//!
//! Subcommands:
//! - `convert`: replay a legacy v1 catalogue into a v2 archive
//! - `info`: print a v2 archive's header and ledger range
//! - `verify`: re-derive node hashes against the perma-cached values
//! - `walk`: enumerate a ledger's state leaves, optionally in parallel
//!
//! Run with `-v` for debug logging, `-vv` for trace; `RUST_LOG` overrides.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use catl::v2::Reader;
use catl::{import_file, CatlError};

/// Command-line arguments for the catalogue tooling
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase output verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a v1 catalogue into a v2 archive
    Convert {
        /// Source v1 catalogue
        input: PathBuf,
        /// Destination v2 archive
        output: PathBuf,
        /// Override the network id recorded in the source header
        #[arg(long)]
        network_id: Option<u32>,
        /// Emit the summary as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print a v2 archive's header and ledger range
    Info {
        /// v2 archive to inspect
        file: PathBuf,
        /// Emit the summary as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Re-derive tree hashes against the perma-cached values
    Verify {
        /// v2 archive to verify
        file: PathBuf,
        /// Verify a single ledger instead of the whole file
        #[arg(long)]
        ledger: Option<u32>,
    },
    /// Walk a ledger's state leaves and report counts
    Walk {
        /// v2 archive to walk
        file: PathBuf,
        /// Ledger sequence (defaults to the last ledger)
        #[arg(long)]
        ledger: Option<u32>,
        /// Fan out over a worker pool
        #[arg(long, default_value_t = false)]
        parallel: bool,
        /// Touch pages in a single-threaded pass before dispatch
        #[arg(long, default_value_t = false)]
        prefetch: bool,
        /// Worker threads for --parallel, clamped to 1..=32
        #[arg(long, default_value_t = catl::config::DEFAULT_WALK_THREADS)]
        threads: usize,
    },
}

#[derive(Serialize)]
struct ArchiveSummary {
    network_id: u32,
    version: u32,
    ledger_count: u64,
    first_ledger_seq: u64,
    last_ledger_seq: u64,
    file_size: u64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Convert {
            input,
            output,
            network_id,
            json,
        } => convert(&input, &output, network_id, json),
        Command::Info { file, json } => print_info(&file, json),
        Command::Verify { file, ledger } => verify(&file, ledger),
        Command::Walk {
            file,
            ledger,
            parallel,
            prefetch,
            threads,
        } => walk(&file, ledger, parallel, prefetch, threads),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn convert(
    input: &PathBuf,
    output: &PathBuf,
    network_id: Option<u32>,
    json: bool,
) -> Result<(), CatlError> {
    let summary = import_file(input, output, network_id)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).expect("summary serializes")
        );
    } else {
        info!(
            "converted {} ledgers ({}..{}) into {} ({} bytes, {} inners, {} leaves)",
            summary.ledgers,
            summary.first_ledger_seq,
            summary.last_ledger_seq,
            output.display(),
            summary.total_bytes_written,
            summary.inner_nodes_written,
            summary.leaf_nodes_written,
        );
    }
    Ok(())
}

fn print_info(file: &PathBuf, json: bool) -> Result<(), CatlError> {
    let reader = Reader::open(file)?;
    let header = reader.header();
    let summary = ArchiveSummary {
        network_id: header.network_id,
        version: header.version,
        ledger_count: header.ledger_count,
        first_ledger_seq: header.first_ledger_seq,
        last_ledger_seq: header.last_ledger_seq,
        file_size: reader.file_size(),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).expect("summary serializes")
        );
    } else {
        println!("Archive: {}", file.display());
        println!("  Network ID:   {}", summary.network_id);
        println!("  Version:      {}", summary.version);
        println!("  Ledgers:      {}", summary.ledger_count);
        println!(
            "  Range:        {}..{}",
            summary.first_ledger_seq, summary.last_ledger_seq
        );
        println!("  File size:    {} bytes", summary.file_size);
    }
    Ok(())
}

fn verify(file: &PathBuf, ledger: Option<u32>) -> Result<(), CatlError> {
    let mut reader = Reader::open(file)?;

    let mut ledgers = 0u64;
    let mut nodes = 0u64;

    if let Some(sequence) = ledger {
        if !reader.seek_to_ledger(sequence) {
            return Err(CatlError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("ledger {sequence} is not in this archive"),
            )));
        }
        reader.read_ledger_info()?;
        let (state, tx) = reader.verify_current_trees()?;
        ledgers = 1;
        nodes = state + tx;
    } else {
        while !reader.at_end_of_ledgers() {
            reader.read_ledger_info()?;
            let (state, tx) = reader.verify_current_trees()?;
            nodes += state + tx;
            ledgers += 1;
            reader.skip_state_trie();
            reader.skip_tx_trie();
        }
    }

    info!(ledgers, nodes, "verification passed");
    println!("OK: {ledgers} ledger(s), {nodes} node(s) verified");
    Ok(())
}

fn walk(
    file: &PathBuf,
    ledger: Option<u32>,
    parallel: bool,
    prefetch: bool,
    threads: usize,
) -> Result<(), CatlError> {
    let mut reader = Reader::open(file)?;

    let sequence = match ledger {
        Some(sequence) => sequence,
        None => reader.header().last_ledger_seq as u32,
    };
    if !reader.seek_to_ledger(sequence) {
        return Err(CatlError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("ledger {sequence} is not in this archive"),
        )));
    }
    reader.read_ledger_info()?;

    let options = catl::WalkOptions {
        parallel,
        prefetch,
        threads: threads.clamp(1, catl::config::MAX_WALK_THREADS),
    };

    let bytes = std::sync::atomic::AtomicU64::new(0);
    let leaves = reader.walk_state_leaves(
        |_key, payload| {
            bytes.fetch_add(payload.len() as u64, std::sync::atomic::Ordering::Relaxed);
            true
        },
        &options,
    )?;

    println!(
        "ledger {sequence}: {leaves} leaves, {} payload bytes",
        bytes.into_inner()
    );
    Ok(())
}

/// Initialize tracing with a verbosity-derived filter; `RUST_LOG` wins when
/// set.
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
