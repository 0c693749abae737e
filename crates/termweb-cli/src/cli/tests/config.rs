//! Tests for the config subcommand and the global --config flag.

use std::path::PathBuf;

use super::{parse, CliCommand};

#[test]
fn cli_parse_config() {
    let cli = parse(&["termweb", "config"]);
    assert!(cli.config.is_none());
    match cli.command {
        CliCommand::Config { json } => assert!(!json),
        _ => panic!("expected Config"),
    }
}

#[test]
fn cli_parse_config_path_after_subcommand() {
    let cli = parse(&["termweb", "config", "--json", "--config", "/etc/termweb.toml"]);
    assert_eq!(cli.config, Some(PathBuf::from("/etc/termweb.toml")));
    match cli.command {
        CliCommand::Config { json } => assert!(json),
        _ => panic!("expected Config"),
    }
}

#[test]
fn cli_parse_config_path_before_subcommand() {
    let cli = parse(&["termweb", "--config", "cfg.toml", "fetch", "x"]);
    assert_eq!(cli.config, Some(PathBuf::from("cfg.toml")));
}
