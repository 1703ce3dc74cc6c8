//! # Scan Subcommand
//!
//! Parses and validates one scanned code without contacting any resolver
//! and without consuming its nonce. Prints a JSON verdict.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use aura_core::{Clock, ManualClock, SystemClock};
use aura_qr::{QrParser, QrValidator, SafeParseResult, ValidationResult};
use aura_verifier::VerifierConfig;
use clap::Args;
use serde::Serialize;

use crate::{print_json, EXIT_INVALID, EXIT_OK};

/// Arguments for the scan subcommand.
#[derive(Args, Debug)]
pub struct ScanArgs {
    /// The scanned payload, or `-` to read it from stdin.
    pub payload: String,

    /// Skip strict field checks and accept unknown protocol versions.
    #[arg(long)]
    pub lenient: bool,

    /// Evaluate expiry at this Unix time instead of now.
    #[arg(long, value_name = "UNIX_SECS")]
    pub at: Option<i64>,
}

/// Verdict printed by `aura scan`.
#[derive(Debug, Serialize)]
pub struct ScanReport {
    pub valid: bool,
    pub parse: SafeParseResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
}

/// Execute the scan subcommand.
pub fn run_scan(args: &ScanArgs, config_path: Option<&Path>) -> Result<u8> {
    let payload = if args.payload == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read payload from stdin")?;
        buf
    } else {
        args.payload.clone()
    };

    let config = VerifierConfig::load(config_path).context("failed to load configuration")?;
    let report = scan(payload.trim(), args, &config);
    tracing::debug!(valid = report.valid, "scan finished");
    print_json(&report)?;
    Ok(if report.valid { EXIT_OK } else { EXIT_INVALID })
}

/// Parse and validate `payload` under `config`.
pub fn scan(payload: &str, args: &ScanArgs, config: &VerifierConfig) -> ScanReport {
    let clock: Arc<dyn Clock> = match args.at {
        Some(secs) => Arc::new(ManualClock::new(secs.saturating_mul(1000))),
        None => Arc::new(SystemClock),
    };
    let mut parse_options = config.parse.clone();
    let mut validation_options = config.validation.clone();
    if args.lenient {
        parse_options.strict = false;
        validation_options.validate_version = false;
    }

    let parse = QrParser::with_clock(parse_options, Arc::clone(&clock)).parse_safe(payload);
    let validation = parse
        .data
        .as_ref()
        .map(|p| QrValidator::with_clock(validation_options, clock).validate(p));
    ScanReport {
        valid: validation.as_ref().is_some_and(|v| v.valid),
        parse,
        validation,
    }
}
