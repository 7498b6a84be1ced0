//! Tests for config file handling. None of these reach Google Cloud.

use cli_test_dir::*;
use std::fs;

#[test]
fn rejects_config_without_json_extension() {
    let testdir = TestDir::new("bq-external-table", "rejects_config_without_json_extension");
    testdir.create_file("config.toml", "{}");
    let output = testdir.cmd().args(["-j", "config.toml"]).expect_failure();
    assert!(output
        .stderr_str()
        .contains("config.toml - JSON config location is not valid"));
}

#[test]
fn rejects_missing_config() {
    let testdir = TestDir::new("bq-external-table", "rejects_missing_config");
    let output = testdir.cmd().args(["-j", "missing.json"]).expect_failure();
    assert!(output
        .stderr_str()
        .contains("missing.json - JSON config location is not valid"));
}

#[test]
fn rejects_malformed_config() {
    let testdir = TestDir::new("bq-external-table", "rejects_malformed_config");
    testdir.create_file("config.json", "{ not json");
    let output = testdir.cmd().args(["-j", "config.json"]).expect_failure();
    assert!(output.stderr_str().contains("ERROR:"));
    assert!(output.stderr_str().contains("config.json"));
}

#[test]
fn rejects_zero_parallelism() {
    let testdir = TestDir::new("bq-external-table", "rejects_zero_parallelism");
    testdir.create_file(
        "config.json",
        r#"{
            "credentials_file_path": "creds.json",
            "dataset_name": "raw",
            "load_options": { "parallelism": 0 }
        }"#,
    );
    let output = testdir.cmd().args(["-j", "config.json"]).expect_failure();
    assert!(output.stderr_str().contains("parallelism"));
}

#[test]
fn reports_missing_credentials() {
    let testdir = TestDir::new("bq-external-table", "reports_missing_credentials");
    testdir.create_file(
        "config.json",
        r#"{
            "credentials_file_path": "no-such-creds.json",
            "dataset_name": "raw",
            "buckets": { "landing": [{ "table_name": "users" }] }
        }"#,
    );
    let output = testdir.cmd().args(["-j", "config.json"]).expect_failure();
    assert!(output.stderr_str().contains("no-such-creds.json"));
}

#[test]
fn rejects_non_service_account_credentials() {
    let testdir =
        TestDir::new("bq-external-table", "rejects_non_service_account_credentials");
    testdir.create_file(
        "creds.json",
        r#"{
            "type": "authorized_user",
            "client_email": "someone@example.com",
            "private_key": "unused"
        }"#,
    );
    testdir.create_file(
        "config.json",
        r#"{ "credentials_file_path": "creds.json", "dataset_name": "raw" }"#,
    );
    let output = testdir
        .cmd()
        .args(["-j", "config.json", "dataset", "create"])
        .expect_failure();
    assert!(output.stderr_str().contains("service_account"));
}

#[test]
fn log_file_records_config_loading() {
    let testdir = TestDir::new("bq-external-table", "log_file_records_config_loading");
    testdir.create_file(
        "config.json",
        r#"{
            "log_location": "logs/run.log",
            "credentials_file_path": "no-such-creds.json",
            "dataset_name": "raw"
        }"#,
    );
    testdir
        .cmd()
        .env("RUST_LOG", "bq_external_table=info")
        .args(["-j", "config.json"])
        .expect_failure();

    let logged = fs::read_dir(testdir.path("logs"))
        .unwrap()
        .map(|entry| fs::read_to_string(entry.unwrap().path()).unwrap())
        .collect::<String>();
    assert!(logged.contains("loaded JSON config"));
    assert!(logged.contains("config.json"));
}
