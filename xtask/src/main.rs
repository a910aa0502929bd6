//! xtask - Development tasks for lcovmerge
//!
//! Golden fixtures live in `fixtures/<case>/`:
//! - `lcovmerge.toml`: configuration for the case (optional)
//! - `inputs/*.info`: traces, merged in file name order
//! - `expected.info`: the merged trace
//!
//! `cargo xtask fixtures --check` re-runs every case and compares;
//! `--update` rewrites `expected.info`.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use lcovmerge_adapters_source::FsSourceReader;
use lcovmerge_app::{MergeRequest, TraceInput, merge};
use lcovmerge_config::{CONFIG_FILE_NAME, CliOverrides, load_config, resolve_config};
use std::fs;
use std::path::{Path, PathBuf};

const EXPECTED_FILE: &str = "expected.info";

/// Development tasks for lcovmerge
#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Development tasks for lcovmerge", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage golden test fixtures
    Fixtures {
        /// Check fixtures match expected output (exits non-zero if different)
        #[arg(long, conflicts_with = "update")]
        check: bool,

        /// Update fixtures with current output
        #[arg(long, conflicts_with = "check")]
        update: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Fixtures { check, update } => {
            let fixtures_dir = find_project_root()?.join("fixtures");
            cmd_fixtures(&fixtures_dir, check, update)
        }
    }
}

// ============================================================================
// Fixtures Command
// ============================================================================

fn cmd_fixtures(fixtures_dir: &Path, check: bool, update: bool) -> Result<()> {
    if !fixtures_dir.is_dir() {
        bail!("fixtures directory not found at {}", fixtures_dir.display());
    }

    let cases = fixture_cases(fixtures_dir)?;
    if check {
        let mut differing = Vec::new();
        for case in &cases {
            let actual = run_case(case)?;
            let expected_path = case.join(EXPECTED_FILE);
            let expected = fs::read_to_string(&expected_path)
                .with_context(|| format!("failed to read {}", expected_path.display()))?;

            // Normalize line endings for comparison
            if expected.replace("\r\n", "\n") != actual {
                eprintln!("differs: {}", case_name(case));
                differing.push(case_name(case));
            }
        }
        if !differing.is_empty() {
            eprintln!("\nRun 'cargo xtask fixtures --update' to update fixtures.");
            bail!("{} fixture(s) differ", differing.len());
        }
        println!("All {} fixture(s) match.", cases.len());
    } else if update {
        for case in &cases {
            let actual = run_case(case)?;
            let expected_path = case.join(EXPECTED_FILE);
            fs::write(&expected_path, actual)
                .with_context(|| format!("failed to write {}", expected_path.display()))?;
            println!("updated: {}", case_name(case));
        }
        println!("\nUpdated {} fixture(s).", cases.len());
    } else {
        println!("Fixture cases:");
        for case in &cases {
            println!("  {}", case_name(case));
        }
        println!("\nUse --check to verify or --update to regenerate.");
    }

    Ok(())
}

/// Case directories, i.e. subdirectories with an `inputs/` directory.
fn fixture_cases(fixtures_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut cases = Vec::new();
    for entry in fs::read_dir(fixtures_dir)
        .with_context(|| format!("failed to list {}", fixtures_dir.display()))?
    {
        let path = entry?.path();
        if path.join("inputs").is_dir() {
            cases.push(path);
        }
    }
    cases.sort();
    Ok(cases)
}

fn case_name(case: &Path) -> String {
    case.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| case.display().to_string())
}

/// Merge a case's inputs the way the CLI would with that case's config.
fn run_case(case: &Path) -> Result<String> {
    let config_path = case.join(CONFIG_FILE_NAME);
    let config = if config_path.is_file() {
        Some(load_config(&config_path)?)
    } else {
        None
    };
    let effective = resolve_config(config.as_ref(), &CliOverrides::default());

    let inputs_dir = case.join("inputs");
    let mut inputs: Vec<PathBuf> = fs::read_dir(&inputs_dir)
        .with_context(|| format!("failed to list {}", inputs_dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    inputs.retain(|p| p.extension().is_some_and(|e| e == "info"));
    inputs.sort();

    let mut traces = Vec::with_capacity(inputs.len());
    for path in &inputs {
        let content =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let name = path
            .strip_prefix(case)
            .unwrap_or(path)
            .display()
            .to_string();
        traces.push(TraceInput::new(name, content));
    }

    let sources = match &effective.source_root {
        Some(root) => FsSourceReader::with_root(root),
        None => FsSourceReader::with_root(case),
    };
    let request = MergeRequest {
        traces,
        config: effective.merge,
    };
    let output = merge(&request, &sources)
        .with_context(|| format!("fixture {} failed to merge", case_name(case)))?;
    Ok(output.lcov)
}

fn find_project_root() -> Result<PathBuf> {
    let mut current = std::env::current_dir()?;

    loop {
        let cargo_toml = current.join("Cargo.toml");
        if cargo_toml.exists() {
            let content = fs::read_to_string(&cargo_toml)?;
            if content.contains("[workspace]") {
                return Ok(current);
            }
        }

        if !current.pop() {
            bail!("could not find workspace root (no Cargo.toml with [workspace] found)");
        }
    }
}
