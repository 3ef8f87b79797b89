use crate::Cli;
use clap::Parser;
use std::path::PathBuf;

#[test]
fn flags_are_optional() {
    let cli = Cli::parse_from(["scribe"]);
    assert!(cli.model.is_none());
    assert!(cli.bind.is_none());
    assert!(!cli.log_json);
}

#[test]
fn parses_server_flags() {
    let cli = Cli::parse_from([
        "scribe",
        "--bind",
        "0.0.0.0:9000",
        "--records",
        "/data/records.json",
        "--max-rounds",
        "3",
        "--log-level",
        "debug",
        "--log-json",
    ]);
    assert_eq!(cli.bind.as_deref(), Some("0.0.0.0:9000"));
    assert_eq!(cli.records, Some(PathBuf::from("/data/records.json")));
    assert_eq!(cli.max_rounds, Some(3));
    assert_eq!(cli.log_level.as_deref(), Some("debug"));
    assert!(cli.log_json);
}

#[test]
fn rejects_non_numeric_rounds() {
    assert!(Cli::try_parse_from(["scribe", "--max-rounds", "many"]).is_err());
}
