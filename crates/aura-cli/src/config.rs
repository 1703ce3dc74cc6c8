//! # Config Subcommand
//!
//! Prints the configuration a verifier would run with: defaults, then the
//! YAML file given by `--config`, then `AURA_*` environment overrides.

use std::path::Path;

use anyhow::{Context, Result};
use aura_verifier::VerifierConfig;
use clap::{Args, Subcommand};

use crate::EXIT_OK;

/// Arguments for the config subcommand.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Available config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration as YAML.
    Show,
    /// Load and validate the configuration without printing it.
    Check,
}

/// Execute the config subcommand.
pub fn run_config(args: &ConfigArgs, config_path: Option<&Path>) -> Result<u8> {
    let config = VerifierConfig::load(config_path).context("invalid configuration")?;
    match args.command {
        ConfigCommand::Show => print!("{}", render(&config)?),
        ConfigCommand::Check => {
            tracing::info!(verifier_id = %config.verifier_id, "configuration is valid");
        }
    }
    Ok(EXIT_OK)
}

/// Render `config` as YAML.
pub fn render(config: &VerifierConfig) -> Result<String> {
    Ok(serde_yaml::to_string(config)?)
}
