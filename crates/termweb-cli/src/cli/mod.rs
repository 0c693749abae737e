//! CLI for the termweb connection scheduler and cache.

mod commands;
mod file_protocol;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use termweb_core::config;

use commands::{run_config, run_fetch};

/// Top-level CLI for termweb.
#[derive(Debug, Parser)]
#[command(name = "termweb")]
#[command(about = "termweb: connection scheduler and fragment cache engine", long_about = None)]
pub struct Cli {
    /// Use this config file instead of ~/.config/termweb/config.toml.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Load local files (paths or file: URLs) through the engine and report
    /// what ended up in the cache.
    Fetch {
        /// Paths or file: URLs to load.
        #[arg(required = true)]
        targets: Vec<String>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration.
    Config {
        /// Print as JSON instead of TOML.
        #[arg(long)]
        json: bool,
    },
}

impl CliCommand {
    pub fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = match &cli.config {
            Some(path) => config::load_or_init_at(path)?,
            None => config::load_or_init()?,
        };
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Fetch { targets, json } => run_fetch(&cfg, &targets, json)?,
            CliCommand::Config { json } => run_config(&cfg, json)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
