//! Integration tests for the lcovmerge CLI.
//!
//! These tests run the binary as a subprocess against the golden fixtures
//! and temporary files, checking exit codes, output and error handling.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Get a Command for the lcovmerge binary, run from an empty directory so
/// no config file is discovered by accident.
fn lcovmerge(cwd: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_lcovmerge"));
    cmd.current_dir(cwd).env_remove("RUST_LOG");
    cmd
}

/// Get the project root directory (for accessing fixtures).
fn project_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .to_path_buf()
}

fn fixture(path: &str) -> PathBuf {
    project_root().join("fixtures").join(path)
}

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

// ============================================================================
// Help and Version Tests
// ============================================================================

#[test]
fn test_help_lists_options() {
    let dir = TempDir::new().unwrap();
    lcovmerge(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--discard-checksum"))
        .stdout(predicate::str::contains("--generate-checksum"))
        .stdout(predicate::str::contains("--output-file"))
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--root"));
}

#[test]
fn test_version_displays_version() {
    let dir = TempDir::new().unwrap();
    lcovmerge(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("lcovmerge"));
}

// ============================================================================
// Fixture Tests
// ============================================================================

#[test]
fn test_two_runs_fixture() {
    let dir = TempDir::new().unwrap();
    let expected = fs::read_to_string(fixture("two-runs/expected.info")).unwrap();
    lcovmerge(dir.path())
        .arg("-d")
        .arg(fixture("two-runs/inputs/01-run1.info"))
        .arg(fixture("two-runs/inputs/02-run2.info"))
        .assert()
        .success()
        .stdout(expected);
}

#[test]
fn test_branches_fixture() {
    let dir = TempDir::new().unwrap();
    let expected = fs::read_to_string(fixture("branches-and-tests/expected.info")).unwrap();
    lcovmerge(dir.path())
        .arg("--discard-checksum")
        .arg(fixture("branches-and-tests/inputs/01-unit.info"))
        .arg(fixture("branches-and-tests/inputs/02-integration.info"))
        .assert()
        .success()
        .stdout(expected);
}

#[test]
fn test_checksums_fixture_with_root() {
    let dir = TempDir::new().unwrap();
    let expected = fs::read_to_string(fixture("checksums/expected.info")).unwrap();
    lcovmerge(dir.path())
        .arg("-g")
        .arg("--root")
        .arg(fixture("checksums/src"))
        .arg(fixture("checksums/inputs/01-smoke.info"))
        .assert()
        .success()
        .stdout(expected);
}

#[test]
fn test_checksums_fixture_with_config_file() {
    let dir = TempDir::new().unwrap();
    let expected = fs::read_to_string(fixture("checksums/expected.info")).unwrap();
    lcovmerge(dir.path())
        .arg("-c")
        .arg(fixture("checksums/lcovmerge.toml"))
        .arg(fixture("checksums/inputs/01-smoke.info"))
        .assert()
        .success()
        .stdout(expected);
}

// ============================================================================
// Output File Tests
// ============================================================================

#[test]
fn test_output_file() {
    let dir = TempDir::new().unwrap();
    let input = write(dir.path(), "a.info", "SF:/a.c\nDA:1,1\nend_of_record\n");
    let out = dir.path().join("merged.info");

    lcovmerge(dir.path())
        .arg("-d")
        .arg("-o")
        .arg(&out)
        .arg(&input)
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let merged = fs::read_to_string(&out).unwrap();
    assert!(merged.contains("DA:1,2\n"));
}

#[test]
fn test_failed_merge_leaves_no_output_file() {
    let dir = TempDir::new().unwrap();
    let input = write(dir.path(), "bad.info", "SF:/a.c\nDA:x,1\n");
    let out = dir.path().join("merged.info");

    lcovmerge(dir.path())
        .args(["-d", "-o"])
        .arg(&out)
        .arg(&input)
        .assert()
        .failure()
        .code(1);

    assert!(!out.exists());
}

// ============================================================================
// Config Discovery Tests
// ============================================================================

#[test]
fn test_discovered_config_applies() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "lcovmerge.toml", "[checksums]\ndiscard = true\n");
    let nested = dir.path().join("nested");
    fs::create_dir(&nested).unwrap();
    // The source file does not exist; discarding checksums skips reading it.
    let input = write(dir.path(), "a.info", "SF:/does/not/exist.c\nDA:1,1\nend_of_record\n");

    lcovmerge(&nested)
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("DA:1,1\n"));
}

#[test]
fn test_invalid_config_is_reported() {
    let dir = TempDir::new().unwrap();
    let config = write(dir.path(), "bad.toml", "[checksums]\nunknown = 1\n");
    let input = write(dir.path(), "a.info", "SF:/a.c\nend_of_record\n");

    lcovmerge(dir.path())
        .arg("--config")
        .arg(&config)
        .arg(&input)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("failed to parse config file"));
}

// ============================================================================
// Error Tests
// ============================================================================

#[test]
fn test_no_input_files() {
    let dir = TempDir::new().unwrap();
    lcovmerge(dir.path())
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error: no input files"));
}

#[test]
fn test_missing_input_file() {
    let dir = TempDir::new().unwrap();
    lcovmerge(dir.path())
        .args(["-d", "missing.info"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("failed to read file 'missing.info'"));
}

#[test]
fn test_record_error_is_located() {
    let dir = TempDir::new().unwrap();
    let input = write(dir.path(), "a.info", "TN:t\nSF:/a.c\nFNDA:1,f\n");

    lcovmerge(dir.path())
        .arg("-d")
        .arg(&input)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains(":3: <FNDA>"))
        .stderr(predicate::str::contains("undefined function 'f'"));
}

#[test]
fn test_default_mode_requires_sources() {
    let dir = TempDir::new().unwrap();
    let input = write(dir.path(), "a.info", "SF:/does/not/exist.c\nend_of_record\n");

    lcovmerge(dir.path())
        .arg(&input)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("failed to load source file '/does/not/exist.c'"));
}

#[test]
fn test_checksum_mismatch_against_real_source() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "main.c", "int a;\n");
    let input = write(
        dir.path(),
        "a.info",
        "SF:main.c\nDA:1,1,AAAAAAAAAAAAAAAAAAAAAA==\nend_of_record\n",
    );

    lcovmerge(dir.path())
        .arg("--root")
        .arg(dir.path())
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("<DA> checksum mismatch"));
}
