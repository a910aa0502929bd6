//! Configuration parsing and management for lcovmerge.
//!
//! This crate provides:
//! - Configuration types (`Config` and its sections)
//! - TOML parsing and discovery of `lcovmerge.toml`
//! - Precedence handling (CLI > config file > defaults)

use std::path::{Path, PathBuf};

use lcovmerge_adapters_lcov::MergeConfig;
use serde::Deserialize;
use thiserror::Error;

/// File name searched for by [`discover_config`].
pub const CONFIG_FILE_NAME: &str = "lcovmerge.toml";

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration value.
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

// ============================================================================
// Configuration Types
// ============================================================================

/// `[checksums]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChecksumConfig {
    /// Ignore checksums found in input traces.
    #[serde(default)]
    pub discard: Option<bool>,
    /// Attach a freshly computed checksum to every line record.
    #[serde(default)]
    pub generate: Option<bool>,
}

/// `[sources]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourcesConfig {
    /// Directory that relative `SF` paths are resolved against.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

/// `[output]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Write the merged trace here instead of stdout.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Full configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub checksums: ChecksumConfig,

    #[serde(default)]
    pub sources: SourcesConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Make relative paths relative to `dir` instead of the working directory.
    fn rebase(&mut self, dir: &Path) {
        for path in [&mut self.sources.root, &mut self.output.file]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = dir.join(&*path);
            }
        }
    }
}

// ============================================================================
// Effective Configuration
// ============================================================================

/// Effective configuration with all values resolved.
///
/// This represents the final configuration after applying:
/// 1. Defaults
/// 2. Config file values
/// 3. CLI overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub merge: MergeConfig,
    /// `None` resolves relative source paths against the working directory.
    pub source_root: Option<PathBuf>,
    /// `None` writes to stdout.
    pub output_file: Option<PathBuf>,
}

// ============================================================================
// Configuration Loading
// ============================================================================

/// Load configuration from a TOML file.
///
/// Relative paths in the file are taken relative to the file's directory.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = parse_config(&content)?;
    if let Some(dir) = path.parent() {
        config.rebase(dir);
    }
    tracing::debug!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Load configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config
        .sources
        .root
        .as_ref()
        .is_some_and(|p| p.as_os_str().is_empty())
    {
        return Err(ConfigError::InvalidValue(
            "sources.root must not be empty".to_string(),
        ));
    }
    if config
        .output
        .file
        .as_ref()
        .is_some_and(|p| p.as_os_str().is_empty())
    {
        return Err(ConfigError::InvalidValue(
            "output.file must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Find and load `lcovmerge.toml` in `start` or the nearest parent
/// directory that has one.
///
/// A config file that exists but fails to load is an error.
pub fn discover_config(start: &Path) -> Result<Option<(PathBuf, Config)>, ConfigError> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE_NAME);
        if config_path.is_file() {
            let config = load_config(&config_path)?;
            return Ok(Some((config_path, config)));
        }

        if !current.pop() {
            break;
        }
    }

    Ok(None)
}

// ============================================================================
// Precedence Resolution
// ============================================================================

/// CLI override options. `None` leaves the config file value in place.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub discard_checksums: Option<bool>,
    pub generate_checksums: Option<bool>,
    pub source_root: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
}

/// Resolve effective configuration from the config file and CLI overrides.
///
/// Precedence: CLI > config file > defaults
pub fn resolve_config(config: Option<&Config>, cli: &CliOverrides) -> EffectiveConfig {
    let mut effective = EffectiveConfig::default();

    if let Some(config) = config {
        if let Some(discard) = config.checksums.discard {
            effective.merge.discard_checksums = discard;
        }
        if let Some(generate) = config.checksums.generate {
            effective.merge.generate_checksums = generate;
        }
        effective.source_root = config.sources.root.clone();
        effective.output_file = config.output.file.clone();
    }

    if let Some(discard) = cli.discard_checksums {
        effective.merge.discard_checksums = discard;
    }
    if let Some(generate) = cli.generate_checksums {
        effective.merge.generate_checksums = generate;
    }
    if let Some(root) = &cli.source_root {
        effective.source_root = Some(root.clone());
    }
    if let Some(file) = &cli.output_file {
        effective.output_file = Some(file.clone());
    }

    effective
}
