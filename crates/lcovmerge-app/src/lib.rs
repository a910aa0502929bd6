//! Application orchestration for lcovmerge.
//!
//! [`merge`] runs the whole pipeline over traces that have already been
//! read into memory:
//!
//! 1. Parse every trace, in order, into one merge session
//! 2. Resolve source files through the given reader when checksums need them
//! 3. Export the merged trace and its coverage totals
//!
//! # Example
//!
//! ```rust
//! use lcovmerge_adapters_lcov::MergeConfig;
//! use lcovmerge_adapters_source::InMemoryReader;
//! use lcovmerge_app::{MergeRequest, TraceInput, merge};
//!
//! let trace = b"SF:/a.c\nDA:1,1\nend_of_record\n".to_vec();
//! let request = MergeRequest {
//!     traces: vec![
//!         TraceInput::new("a.info", trace.clone()),
//!         TraceInput::new("b.info", trace),
//!     ],
//!     config: MergeConfig { discard_checksums: true, ..MergeConfig::default() },
//! };
//!
//! let output = merge(&request, &InMemoryReader::new())?;
//! assert!(output.lcov.contains("DA:1,2\n"));
//! # Ok::<(), lcovmerge_app::AppError>(())
//! ```

pub use lcovmerge_adapters_lcov::{ErrorClass, MergeConfig, MergeError, TraceStats};
pub use lcovmerge_domain::CoverageSummary;

use lcovmerge_adapters_lcov::MergeSession;
use lcovmerge_ports::SourceReader;
use thiserror::Error;

// ============================================================================
// Request and Result Types
// ============================================================================

/// One input trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceInput {
    /// Where the trace came from, for diagnostics.
    pub path: String,
    pub content: Vec<u8>,
}

impl TraceInput {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Request for a merge operation.
#[derive(Debug, Clone, Default)]
pub struct MergeRequest {
    /// Traces in merge order.
    pub traces: Vec<TraceInput>,
    pub config: MergeConfig,
}

/// Result of a merge operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutput {
    /// The merged trace in LCOV format.
    pub lcov: String,
    /// Totals across all tests and files.
    pub summary: CoverageSummary,
    /// Number of distinct test records, the anonymous test included.
    pub tests: usize,
    /// Per-input counters, in request order.
    pub inputs: Vec<(String, TraceStats)>,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur during the merge operation.
#[derive(Debug, Error)]
pub enum AppError {
    /// The request has no traces.
    #[error("no input files")]
    NoInputs,

    /// A trace was rejected.
    #[error(transparent)]
    Merge(#[from] MergeError),
}

impl AppError {
    /// Category of the failure; `None` for usage errors.
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            AppError::NoInputs => None,
            AppError::Merge(e) => Some(e.class()),
        }
    }
}

// ============================================================================
// Main Merge Function
// ============================================================================

/// Merge every trace of `request` into one.
///
/// Source files named by `SF` records are read through `sources`, and only
/// when the configuration needs line checksums.
///
/// # Errors
///
/// Returns `AppError` for an empty request or the first rejected record.
pub fn merge(request: &MergeRequest, sources: &dyn SourceReader) -> Result<MergeOutput, AppError> {
    if request.traces.is_empty() {
        return Err(AppError::NoInputs);
    }

    let mut session = MergeSession::new(sources, request.config);
    let mut inputs = Vec::with_capacity(request.traces.len());
    for trace in &request.traces {
        let stats = session.parse_bytes(&trace.path, &trace.content)?;
        inputs.push((trace.path.clone(), stats));
    }

    let summary = session.summary();
    let output = MergeOutput {
        lcov: session.to_lcov_string(),
        summary,
        tests: session.tests().count(),
        inputs,
    };
    tracing::info!(
        inputs = output.inputs.len(),
        tests = output.tests,
        lines_found = summary.lines_found,
        lines_hit = summary.lines_hit,
        "merge complete"
    );
    Ok(output)
}

// ============================================================================
// Tests
// ============================================================================
