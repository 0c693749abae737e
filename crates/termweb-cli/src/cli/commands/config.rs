//! `termweb config` – print the effective configuration.

use anyhow::{Context, Result};
use termweb_core::config::EngineConfig;

pub fn run_config(cfg: &EngineConfig, json: bool) -> Result<()> {
    let text = if json {
        serde_json::to_string_pretty(cfg).context("serialize config as JSON")?
    } else {
        toml::to_string_pretty(cfg).context("serialize config as TOML")?
    };
    println!("{}", text.trim_end());
    Ok(())
}
