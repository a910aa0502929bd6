//! lcovmerge merges LCOV coverage traces into a single trace.
//!
//! Records of the same test and source file are combined by summing their
//! execution counts. Line checksums are verified against the source files
//! unless they are discarded.

mod logging;

use clap::Parser;
use lcovmerge_adapters_source::FsSourceReader;
use lcovmerge_app::{AppError, MergeRequest, TraceInput, merge};
use lcovmerge_config::{
    CliOverrides, ConfigError, EffectiveConfig, discover_config, load_config, resolve_config,
};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Merge LCOV coverage traces into one.
#[derive(Debug, Parser)]
#[command(name = "lcovmerge")]
#[command(version)]
struct Cli {
    /// Discard and ignore line checksums found in the input
    #[arg(short = 'd', long = "discard-checksum")]
    discard_checksum: bool,

    /// Generate a checksum for each line record
    #[arg(short = 'g', long = "generate-checksum")]
    generate_checksum: bool,

    /// Write the merged trace to FILE instead of stdout
    #[arg(short = 'o', long = "output-file", value_name = "FILE")]
    output_file: Option<PathBuf>,

    /// Configuration file (default: nearest lcovmerge.toml)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory that relative source paths are resolved against
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Input trace files, merged in the given order
    #[arg(value_name = "INPUT")]
    inputs: Vec<PathBuf>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write file '{path}': {source}")]
    FileWrite {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write to stdout: {0}")]
    Stdout(#[source] io::Error),

    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    App(#[from] AppError),
}

const EXIT_CODE_ERROR: i32 = 1;

fn main() {
    logging::init();
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(()) => 0,
        Err(e) => {
            tracing::debug!(error = ?e, "merge failed");
            eprintln!("error: {e}");
            EXIT_CODE_ERROR
        }
    };
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<(), CliError> {
    let effective = effective_config(&cli)?;
    tracing::debug!(config = ?effective, "resolved configuration");

    let traces = cli
        .inputs
        .iter()
        .map(|path| read_trace(path))
        .collect::<Result<Vec<_>, _>>()?;
    let request = MergeRequest {
        traces,
        config: effective.merge,
    };
    let sources = match &effective.source_root {
        Some(root) => FsSourceReader::with_root(root),
        None => FsSourceReader::new(),
    };

    let output = merge(&request, &sources)?;
    write_output(effective.output_file.as_deref(), &output.lcov)
}

fn effective_config(cli: &Cli) -> Result<EffectiveConfig, CliError> {
    let config = match &cli.config {
        Some(path) => Some(load_config(path)?),
        None => {
            let cwd = std::env::current_dir().map_err(CliError::CurrentDir)?;
            discover_config(&cwd)?.map(|(path, config)| {
                tracing::debug!(path = %path.display(), "using discovered config file");
                config
            })
        }
    };

    let overrides = CliOverrides {
        discard_checksums: cli.discard_checksum.then_some(true),
        generate_checksums: cli.generate_checksum.then_some(true),
        source_root: cli.root.clone(),
        output_file: cli.output_file.clone(),
    };
    Ok(resolve_config(config.as_ref(), &overrides))
}

fn read_trace(path: &Path) -> Result<TraceInput, CliError> {
    let content = fs::read(path).map_err(|source| CliError::FileRead {
        path: path.display().to_string(),
        source,
    })?;
    Ok(TraceInput::new(path.display().to_string(), content))
}

/// Write the merged trace; a partially written output file is removed.
fn write_output(path: Option<&Path>, lcov: &str) -> Result<(), CliError> {
    let Some(path) = path else {
        let mut stdout = io::stdout().lock();
        return stdout
            .write_all(lcov.as_bytes())
            .and_then(|()| stdout.flush())
            .map_err(CliError::Stdout);
    };

    if let Err(source) = fs::write(path, lcov) {
        let _ = fs::remove_file(path);
        return Err(CliError::FileWrite {
            path: path.display().to_string(),
            source,
        });
    }
    tracing::info!(path = %path.display(), bytes = lcov.len(), "wrote merged trace");
    Ok(())
}
