//! # Audit Subcommand
//!
//! Offline operations on a JSON lines audit file written by
//! `JsonLinesAuditStore`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use aura_audit::{export, parse_json_lines, verify_chain, AuditError, ChainViolation, ExportFormat};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::{print_json, EXIT_INVALID, EXIT_OK};

/// Arguments for the audit subcommand.
#[derive(Args, Debug)]
pub struct AuditArgs {
    #[command(subcommand)]
    pub command: AuditCommand,
}

/// Available audit subcommands.
#[derive(Subcommand, Debug)]
pub enum AuditCommand {
    /// Check sequence numbers and hash links of every entry.
    Verify {
        /// Audit file (JSON lines).
        file: PathBuf,
    },

    /// Convert the audit file for compliance tooling.
    Export {
        /// Audit file (JSON lines).
        file: PathBuf,

        /// Output format: csv or jsonl.
        #[arg(long, default_value = "jsonl")]
        format: ExportFormat,

        /// Write to this file instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

/// Result printed by `aura audit verify`.
#[derive(Debug, Serialize)]
pub struct ChainReport {
    pub file: String,
    pub entries: usize,
    pub intact: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<ChainViolation>,
    /// Set when a line could not be decoded at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrupt: Option<String>,
}

/// Execute the audit subcommand.
pub fn run_audit(args: &AuditArgs) -> Result<u8> {
    match &args.command {
        AuditCommand::Verify { file } => {
            let report = verify_file(file)?;
            print_json(&report)?;
            Ok(if report.intact { EXIT_OK } else { EXIT_INVALID })
        }
        AuditCommand::Export { file, format, output } => {
            let text = read(file)?;
            let entries = parse_json_lines(&text).with_context(|| format!("cannot decode {}", file.display()))?;
            let rendered = export(&entries, *format)?;
            match output {
                Some(path) => {
                    std::fs::write(path, rendered).with_context(|| format!("cannot write {}", path.display()))?;
                    tracing::info!(entries = entries.len(), output = %path.display(), "audit trail exported");
                }
                None => print!("{rendered}"),
            }
            Ok(EXIT_OK)
        }
    }
}

/// Verify the chain stored in `file`.
pub fn verify_file(file: &Path) -> Result<ChainReport> {
    let text = read(file)?;
    let mut report = ChainReport {
        file: file.display().to_string(),
        entries: 0,
        intact: false,
        violation: None,
        corrupt: None,
    };
    match parse_json_lines(&text) {
        Ok(entries) => {
            report.entries = entries.len();
            match verify_chain(&entries) {
                Ok(()) => report.intact = true,
                Err(violation) => {
                    tracing::warn!(%violation, "audit chain broken");
                    report.violation = Some(violation);
                }
            }
        }
        Err(e @ AuditError::Corrupt { .. }) => report.corrupt = Some(e.to_string()),
        Err(e) => return Err(e.into()),
    }
    Ok(report)
}

fn read(file: &Path) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("cannot read {}", file.display()))
}
