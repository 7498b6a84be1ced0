//! Tests for the `bq-external-table` command line.

use cli_test_dir::*;

mod config;

#[test]
fn help_flag() {
    let testdir = TestDir::new("bq-external-table", "help_flag");
    let output = testdir.cmd().arg("--help").expect_success();
    assert!(output.stdout_str().contains("--json-config"));
    assert!(output.stdout_str().contains("load"));
}

#[test]
fn version_flag() {
    let testdir = TestDir::new("bq-external-table", "version_flag");
    let output = testdir.cmd().arg("--version").expect_success();
    assert!(output.stdout_str().contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn object_help_flag() {
    let testdir = TestDir::new("bq-external-table", "object_help_flag");
    testdir.create_file("unused.json", "{}");
    let output = testdir
        .cmd()
        .args(["-j", "unused.json", "object", "--help"])
        .expect_success();
    assert!(output.stdout_str().contains("ls"));
    assert!(output.stdout_str().contains("put"));
}

#[test]
fn json_config_is_required() {
    let testdir = TestDir::new("bq-external-table", "json_config_is_required");
    let output = testdir.cmd().expect_failure();
    assert!(output.stderr_str().contains("--json-config"));
}
