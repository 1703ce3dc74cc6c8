//! # aura-cli: Command-Line Interface for the Verification Gate
//!
//! ## Subcommands
//!
//! - `aura scan`: offline parse and validation of a scanned code.
//! - `aura audit verify`: hash chain check of a JSON lines audit file.
//! - `aura audit export`: CSV or JSON lines export of an audit file.
//! - `aura config show`: effective configuration after file and
//!   environment overrides.
//! - `aura config check`: load and validate the configuration only.
//!
//! ```bash
//! aura scan 'aura://verify?data=eyJ2Ijoi...'
//! echo "$CODE" | aura scan - --lenient
//! aura audit verify /var/log/aura/audit.jsonl
//! aura audit export /var/log/aura/audit.jsonl --format csv > audit.csv
//! aura --config verifier.yaml config show
//! ```
//!
//! ## Exit codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Valid presentation, intact chain, or command succeeded |
//! | 1 | Invalid presentation or broken chain |
//! | 2 | Usage or I/O error |
//!
//! Handlers return the exit code; errors that prevent a verdict bubble up as
//! `anyhow::Error` and map to 2.

pub mod audit;
pub mod config;
pub mod scan;

/// Exit code for a successful check.
pub const EXIT_OK: u8 = 0;
/// Exit code for a negative verdict.
pub const EXIT_INVALID: u8 = 1;
/// Exit code for usage and I/O errors.
pub const EXIT_ERROR: u8 = 2;

/// Print `value` as pretty JSON on stdout.
pub(crate) fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
