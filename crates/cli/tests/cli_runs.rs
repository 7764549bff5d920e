use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use httpmock::prelude::*;
use serde_json::{json, Value};

const PASSWORD: &str = "correct horse";
const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon \
                      abandon abandon abandon about";

/// Config file with cheap key stretching and a single node attempt.
fn write_config(dir: &Path, node_url: &str) -> PathBuf {
    let path = dir.join("config.json");
    let cfg = json!({
        "chain": "floonet",
        "data_dir": dir.join("wallet"),
        "node_url": node_url,
        "kdf": {"memory_kib": 64, "iterations": 1, "parallelism": 1},
        "node_retry": {"max_attempts": 1, "base_delay_ms": 0, "max_delay_ms": 0, "jitter": 0.0},
    });
    std::fs::write(&path, cfg.to_string()).unwrap();
    path
}

fn run(config: &Path, args: &[&str]) -> std::process::Output {
    cargo_bin_cmd!("mw-cli")
        .arg("--config")
        .arg(config)
        .env("MW_WALLET_PASSWORD", PASSWORD)
        .args(args)
        .output()
        .expect("CLI execution failed")
}

fn stdout(output: &std::process::Output) -> String {
    assert!(
        output.status.success(),
        "exited with {:?}\nstderr: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn init_address_and_balances() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), "http://127.0.0.1:9");

    let out = stdout(&run(&cfg, &["init", "--name", "dev"]));
    let phrase = out
        .lines()
        .find_map(|l| l.strip_prefix("recovery phrase: "))
        .expect("phrase printed");
    assert_eq!(phrase.split(' ').count(), 24);

    let again = run(&cfg, &["init"]);
    assert_eq!(again.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&again.stderr).contains("error:"));

    let address = stdout(&run(
        &cfg,
        &["address", "--index", "1", "--relay-domain", "mqs.example.org"],
    ));
    assert!(address.trim().ends_with("@mqs.example.org"));

    let balances: Value = serde_json::from_str(&stdout(&run(&cfg, &["balances"]))).unwrap();
    assert_eq!(balances["total"], "0.000000000");

    let txs: Value = serde_json::from_str(&stdout(&run(&cfg, &["txs"]))).unwrap();
    assert_eq!(txs, json!([]));
}

#[test]
fn wrong_password_fails() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), "http://127.0.0.1:9");
    stdout(&run(&cfg, &["recover", "--mnemonic", PHRASE]));

    let out = cargo_bin_cmd!("mw-cli")
        .arg("--config")
        .arg(&cfg)
        .env("MW_WALLET_PASSWORD", "not the password")
        .arg("balances")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("invalid password"));
}

#[test]
fn recover_rejects_a_bad_phrase() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), "http://127.0.0.1:9");
    let out = run(&cfg, &["recover", "--mnemonic", "abandon abandon abandon"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("invalid mnemonic"));
}

#[test]
fn chain_height_and_scan_against_a_node() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v2/foreign").body_contains("get_tip");
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"height": 12, "last_block_pushed": "00"}
        }));
    });
    server.mock(|when, then| {
        when.method(POST).path("/v2/foreign").body_contains("get_block");
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "header": {"height": 5, "hash": "05"},
                "inputs": [],
                "outputs": [],
                "kernels": []
            }
        }));
    });

    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), &server.base_url());
    assert_eq!(stdout(&run(&cfg, &["chain-height"])).trim(), "12");

    stdout(&run(&cfg, &["recover", "--mnemonic", PHRASE]));
    let report: Value =
        serde_json::from_str(&stdout(&run(&cfg, &["scan", "--start", "5", "--blocks", "1"])))
            .unwrap();
    assert_eq!(report["blocks_scanned"], 1);
    assert_eq!(report["next_height"], 6);
    assert_eq!(report["tip_height"], 12);
}

#[test]
fn unreachable_node_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), "http://127.0.0.1:9");
    let out = run(&cfg, &["chain-height"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("network unavailable"));
}

#[test]
fn fees_and_cancel_report_state_errors() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), "http://127.0.0.1:9");
    stdout(&run(&cfg, &["recover", "--mnemonic", PHRASE]));

    let out = run(&cfg, &["fees", "--amount", "1.5"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("insufficient funds"));

    let out = run(
        &cfg,
        &["cancel", "--id", "0f6bb5e4-8a3c-4a57-b3d2-6f3c2c1d9e10"],
    );
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("not found"));
}

#[test]
fn password_sources() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), "http://127.0.0.1:9");
    stdout(&run(&cfg, &["recover", "--mnemonic", PHRASE]));

    let file = dir.path().join("password");
    std::fs::write(&file, format!("{PASSWORD}\nignored\n")).unwrap();
    let out = cargo_bin_cmd!("mw-cli")
        .arg("--config")
        .arg(&cfg)
        .env_remove("MW_WALLET_PASSWORD")
        .arg("--password-file")
        .arg(&file)
        .arg("balances")
        .output()
        .unwrap();
    stdout(&out);

    let out = cargo_bin_cmd!("mw-cli")
        .arg("--config")
        .arg(&cfg)
        .env("ALT_PASSWORD", PASSWORD)
        .args(["--password-env", "ALT_PASSWORD", "txs"])
        .output()
        .unwrap();
    stdout(&out);

    let out = cargo_bin_cmd!("mw-cli")
        .arg("--config")
        .arg(&cfg)
        .args(["--password-env", "UNSET_PASSWORD_VAR", "txs"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("UNSET_PASSWORD_VAR is not set"));

    // the password is never taken from argv
    let out = run(&cfg, &["--password", PASSWORD, "balances"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn post_retries_nothing_on_a_clean_wallet() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), "http://127.0.0.1:9");
    stdout(&run(&cfg, &["recover", "--mnemonic", PHRASE]));

    assert_eq!(stdout(&run(&cfg, &["post"])).trim(), "nothing to post");
    let out = run(&cfg, &["post", "--id", "0f6bb5e4-8a3c-4a57-b3d2-6f3c2c1d9e10"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("not found"));
}
