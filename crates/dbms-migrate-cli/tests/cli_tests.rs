//! CLI integration tests for dbms-migrate.
//!
//! These tests cover argument parsing, help output and exit codes for
//! configuration errors. None of them need a live database.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the dbms-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("dbms-migrate").unwrap()
}

/// A config that passes validation but points at unreachable hosts.
fn valid_config() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"source:
  host: mssql.invalid
  database: sales
  user: sa
target:
  host: pg.invalid
  database: sales
  user: postgres
"#
    )
    .unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("list-tables"))
        .stdout(predicate::str::contains("health-check"))
        .stdout(predicate::str::contains("spatial-wkt"));
}

#[test]
fn test_spatial_wkt_requires_table_and_column() {
    cmd()
        .args(["spatial-wkt", "--table", "parcels"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--column"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--yes"))
        .stdout(predicate::str::contains("--update"))
        .stdout(predicate::str::contains("--exclude"))
        .stdout(predicate::str::contains("--include-file-tables"))
        .stdout(predicate::str::contains("--chunk-size"))
        .stdout(predicate::str::contains("--workers"))
        .stdout(predicate::str::contains("--error-log"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dbms-migrate"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flags_exist() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("--log-level"));
}

#[test]
fn test_log_format_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"));
}

#[test]
fn test_config_default_path() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_1() {
    // A missing file is an IO error, not a config error
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("IO error"));
}

#[test]
fn test_invalid_yaml_exits_with_code_3() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(3);
}

#[test]
fn test_missing_required_fields_exits_with_code_3() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "source:").unwrap();
    writeln!(file, "  type: mssql").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "list-tables"])
        .assert()
        .code(3);
}

#[test]
fn test_wrong_target_type_exits_with_code_3() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"source:
  host: mssql.invalid
  database: sales
  user: sa
target:
  type: mysql
  host: db.invalid
  database: sales
  user: root
"#
    )
    .unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run", "--yes"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("target.type"));
}

#[test]
fn test_unknown_verbosity_exits_with_code_3() {
    let file = valid_config();

    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "--verbosity",
            "loud",
            "run",
            "--yes",
        ])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Unknown verbosity"));
}

// =============================================================================
// Argument Parsing Tests
// =============================================================================

#[test]
fn test_non_numeric_chunk_size_is_rejected() {
    cmd()
        .args(["run", "--chunk-size", "lots"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--chunk-size"));
}

#[test]
fn test_no_subcommand_shows_usage() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
