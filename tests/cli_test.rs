use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

fn config_file() -> Result<NamedTempFile, Box<dyn std::error::Error>> {
    let mut file = NamedTempFile::new()?;
    write!(
        file,
        r#"{{
            "router_identifier": "router",
            "deposit": {{ "chain_id": 1, "provider_url": "http://localhost:8545", "asset_id": "0xaaa" }},
            "withdraw": {{ "chain_id": 137, "provider_url": "http://localhost:8546", "asset_id": "0xbbb" }},
            "withdrawal_address": "0xrecipient",
            "timeouts": {{ "stall_ms": 2000, "reclaim_ms": 200, "poll_interval_ms": 20 }}
        }}"#
    )?;
    Ok(file)
}

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let config = config_file()?;
    let mut cmd = Command::new(cargo_bin!("channel-bridge"));
    cmd.arg(config.path()).args(["--amount", "12.5"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#""phase": "complete""#))
        .stdout(predicate::str::contains(r#""amount": "12.5""#))
        .stdout(predicate::str::contains("transaction_hash"));

    Ok(())
}

#[test]
fn test_cli_router_cancel_fails() -> Result<(), Box<dyn std::error::Error>> {
    let config = config_file()?;
    let mut cmd = Command::new(cargo_bin!("channel-bridge"));
    cmd.arg(config.path()).args(["--scenario", "cancel"]);

    cmd.assert()
        .failure()
        .stdout(predicate::str::contains(r#""phase": "error""#))
        .stdout(predicate::str::contains("funds_preserved"))
        .stderr(predicate::str::contains("transfer was cancelled"));

    Ok(())
}

#[test]
fn test_cli_missing_config() {
    let mut cmd = Command::new(cargo_bin!("channel-bridge"));
    cmd.arg("does/not/exist.json");

    cmd.assert().failure();
}

#[test]
fn test_cli_rejects_non_positive_amount() -> Result<(), Box<dyn std::error::Error>> {
    let config = config_file()?;
    let mut cmd = Command::new(cargo_bin!("channel-bridge"));
    cmd.arg(config.path()).args(["--amount", "0"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid amount"));

    Ok(())
}
