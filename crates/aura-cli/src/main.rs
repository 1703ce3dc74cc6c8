//! # aura CLI entry point
//!
//! Parses command-line arguments and dispatches to subcommand handlers.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use aura_cli::audit::{run_audit, AuditArgs};
use aura_cli::config::{run_config, ConfigArgs};
use aura_cli::scan::{run_scan, ScanArgs};
use aura_cli::EXIT_ERROR;

/// Aura verification gate toolchain.
///
/// Checks scanned QR presentations offline, verifies and exports the
/// hash-chained audit trail, and shows the effective verifier configuration.
#[derive(Parser, Debug)]
#[command(name = "aura", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    /// Path to the verifier configuration file (YAML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse and validate a scanned presentation without consuming its nonce.
    Scan(ScanArgs),

    /// Verify or export a JSON lines audit trail.
    Audit(AuditArgs),

    /// Show or check the effective configuration.
    Config(ConfigArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "aura CLI starting");

    let config = cli.config.as_deref();
    let result = match &cli.command {
        Commands::Scan(args) => run_scan(args, config),
        Commands::Audit(args) => run_audit(args),
        Commands::Config(args) => run_config(args, config),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}
