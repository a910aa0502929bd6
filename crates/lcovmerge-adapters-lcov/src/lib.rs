//! LCOV trace parsing and merging for lcovmerge.
//!
//! A [`MergeSession`] reads any number of LCOV traces, one after another,
//! and folds every record into a shared [`TestRecord`] set. Each line goes
//! through two stages:
//!
//! 1. [`tokenize`] splits it into a [`RecordType`] and up to four arguments.
//! 2. The session validates the record against the current test/file cursor
//!    and merges it into the model.
//!
//! The first invalid record aborts the whole session.
//!
//! # Examples
//!
//! ```
//! use lcovmerge_adapters_lcov::{MergeConfig, MergeSession};
//! use lcovmerge_adapters_source::InMemoryReader;
//!
//! let trace = "TN:t1\nSF:/x.c\nFN:1,f\nFNDA:2,f\nDA:1,2\nend_of_record\n";
//! let reader = InMemoryReader::new()
//!     .with_file("a.info", trace)
//!     .with_file("b.info", trace);
//! let config = MergeConfig { discard_checksums: true, ..MergeConfig::default() };
//!
//! let mut session = MergeSession::new(&reader, config);
//! session.parse_file("a.info").unwrap();
//! session.parse_file("b.info").unwrap();
//!
//! let merged = session.to_lcov_string();
//! assert!(merged.contains("FNDA:4,f\n"));
//! assert!(merged.contains("DA:1,4\n"));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};

use lcovmerge_checksum::{ChecksumError, ENCODED_CHECKSUM_LEN, decode_checksum};
use lcovmerge_domain::{
    BranchHits, CoverageSummary, ModelError, SourceFileInfo, TestRecord,
};
use lcovmerge_ports::{ReadError, SourceReader};
use thiserror::Error;

// ============================================================================
// Configuration
// ============================================================================

/// Checksum handling for a merge session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeConfig {
    /// Ignore checksums found in the input and skip reading source files.
    pub discard_checksums: bool,
    /// Compute and attach a checksum to every line record.
    pub generate_checksums: bool,
}

impl MergeConfig {
    /// Whether source files must be read when they are opened.
    pub fn needs_line_map(&self) -> bool {
        !self.discard_checksums || self.generate_checksums
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Broad category of a rejected record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The record is malformed on its own.
    Format,
    /// The record contradicts earlier records or the parse state.
    Consistency,
    /// A file could not be read.
    Io,
}

/// Why a single record was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("field is not valid UTF-8")]
    InvalidUtf8,

    #[error("unknown record type")]
    UnknownRecord,

    #[error("trailing commas")]
    TrailingComma,

    #[error("too many arguments (max: {MAX_ARGUMENTS})")]
    TooManyArguments,

    #[error("expected {0}")]
    ArgumentCount(&'static str),

    #[error("invalid line number")]
    InvalidLineNumber,

    #[error("invalid execution count")]
    InvalidCount,

    #[error("invalid block or branch number")]
    InvalidBranchId,

    #[error("invalid integer")]
    InvalidInteger,

    #[error("invalid version ID")]
    InvalidVersion,

    #[error("invalid checksum")]
    InvalidChecksum,

    #[error("malformed checksum: {0}")]
    MalformedChecksum(ChecksumError),

    #[error("a TN and/or SF record is missing")]
    MissingFile,

    #[error("expected end_of_record")]
    FileStillOpen,

    #[error("function origin '{found}' doesn't match the current source file '{expected}'")]
    FunctionOrigin { expected: String, found: String },

    #[error("function coverage info references an undefined function '{0}'")]
    UndefinedFunction(String),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("failed to load source file '{path}': {source}")]
    SourceUnavailable {
        path: String,
        #[source]
        source: ReadError,
    },

    #[error("line {0} is not available for checksumming")]
    LineUnavailable(u32),
}

impl RecordError {
    /// Category used for reporting.
    pub fn class(&self) -> ErrorClass {
        match self {
            RecordError::InvalidUtf8
            | RecordError::UnknownRecord
            | RecordError::TrailingComma
            | RecordError::TooManyArguments
            | RecordError::ArgumentCount(_)
            | RecordError::InvalidLineNumber
            | RecordError::InvalidCount
            | RecordError::InvalidBranchId
            | RecordError::InvalidInteger
            | RecordError::InvalidVersion
            | RecordError::InvalidChecksum
            | RecordError::MalformedChecksum(_) => ErrorClass::Format,
            RecordError::MissingFile
            | RecordError::FileStillOpen
            | RecordError::FunctionOrigin { .. }
            | RecordError::UndefinedFunction(_)
            | RecordError::ChecksumMismatch
            | RecordError::Model(_) => ErrorClass::Consistency,
            RecordError::SourceUnavailable { .. } | RecordError::LineUnavailable(_) => {
                ErrorClass::Io
            }
        }
    }
}

/// A failed merge, located in its input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    /// A trace file could not be read.
    #[error("{path}: {source}")]
    Input {
        path: String,
        #[source]
        source: ReadError,
    },

    /// A record was rejected.
    #[error("{path}:{line}: {}{error}", record_label(.record))]
    Record {
        path: String,
        line: usize,
        record: Option<RecordType>,
        #[source]
        error: RecordError,
    },
}

fn record_label(record: &Option<RecordType>) -> String {
    record.map(|r| format!("<{r}> ")).unwrap_or_default()
}

impl MergeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            MergeError::Input { .. } => ErrorClass::Io,
            MergeError::Record { error, .. } => error.class(),
        }
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

/// Upper bound on the number of comma-separated arguments of any record.
pub const MAX_ARGUMENTS: usize = 4;

/// Longest accepted line, version or block/branch number.
const MAX_DIGITS: usize = 10;

/// Longest accepted execution count; counts merge as `u64`.
const MAX_COUNT_DIGITS: usize = 20;

/// Block and branch numbers must stay below this value.
const MAX_BRANCH_ID: u32 = u16::MAX as u32;

const END_OF_RECORD: &str = "end_of_record";

/// The LCOV record types understood by the merger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    TestName,
    SourceFile,
    Version,
    FunctionName,
    FunctionData,
    FunctionsFound,
    FunctionsHit,
    LineData,
    BranchData,
    BranchesFound,
    BranchesHit,
    LinesFound,
    LinesHit,
    EndOfRecord,
}

impl RecordType {
    /// The tag as written in a trace.
    pub fn tag(self) -> &'static str {
        match self {
            RecordType::TestName => "TN",
            RecordType::SourceFile => "SF",
            RecordType::Version => "VER",
            RecordType::FunctionName => "FN",
            RecordType::FunctionData => "FNDA",
            RecordType::FunctionsFound => "FNF",
            RecordType::FunctionsHit => "FNH",
            RecordType::LineData => "DA",
            RecordType::BranchData => "BRDA",
            RecordType::BranchesFound => "BRF",
            RecordType::BranchesHit => "BRH",
            RecordType::LinesFound => "LF",
            RecordType::LinesHit => "LH",
            RecordType::EndOfRecord => END_OF_RECORD,
        }
    }

    fn from_tag(tag: &[u8]) -> Option<Self> {
        let kind = match tag {
            b"TN" => RecordType::TestName,
            b"SF" => RecordType::SourceFile,
            b"VER" => RecordType::Version,
            b"FN" => RecordType::FunctionName,
            b"FNDA" => RecordType::FunctionData,
            b"FNF" => RecordType::FunctionsFound,
            b"FNH" => RecordType::FunctionsHit,
            b"DA" => RecordType::LineData,
            b"BRDA" => RecordType::BranchData,
            b"BRF" => RecordType::BranchesFound,
            b"BRH" => RecordType::BranchesHit,
            b"LF" => RecordType::LinesFound,
            b"LH" => RecordType::LinesHit,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One tokenized trace line.
///
/// Arguments stay raw bytes; only names and paths must be UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<'a> {
    pub kind: RecordType,
    pub args: Vec<&'a [u8]>,
}

/// Split a line into its record type and the text after the tag.
///
/// Returns `None` for unknown tags.
///
/// ```
/// use lcovmerge_adapters_lcov::{RecordType, classify};
///
/// assert_eq!(classify(b"DA:3,1"), Some((RecordType::LineData, &b"3,1"[..])));
/// assert_eq!(classify(b"end_of_record"), Some((RecordType::EndOfRecord, &b""[..])));
/// assert_eq!(classify(b"XX:1"), None);
/// ```
pub fn classify(line: &[u8]) -> Option<(RecordType, &[u8])> {
    if line == END_OF_RECORD.as_bytes() {
        let rest: &[u8] = &[];
        return Some((RecordType::EndOfRecord, rest));
    }
    let colon = line.iter().position(|&b| b == b':')?;
    let (tag, rest) = (&line[..colon], &line[colon + 1..]);
    RecordType::from_tag(tag).map(|kind| (kind, rest))
}

/// Split the text after a tag on commas.
///
/// Empty fields (a doubled or trailing comma) and more than
/// [`MAX_ARGUMENTS`] fields are rejected. Empty text has no arguments.
pub fn split_arguments(rest: &[u8]) -> Result<Vec<&[u8]>, RecordError> {
    let mut args = Vec::with_capacity(MAX_ARGUMENTS);
    if rest.is_empty() {
        return Ok(args);
    }
    for field in rest.split(|&b| b == b',') {
        if field.is_empty() {
            return Err(RecordError::TrailingComma);
        }
        args.push(field);
        if args.len() > MAX_ARGUMENTS {
            return Err(RecordError::TooManyArguments);
        }
    }
    Ok(args)
}

/// Tokenize a non-blank, non-comment trace line.
pub fn tokenize(line: &[u8]) -> Result<Record<'_>, RecordError> {
    let (kind, rest) = classify(line).ok_or(RecordError::UnknownRecord)?;
    let args = split_arguments(rest)?;
    Ok(Record { kind, args })
}

/// Parse an unsigned decimal field of at most `max_digits` digits.
fn parse_decimal<T: std::str::FromStr>(field: &[u8], max_digits: usize) -> Option<T> {
    if field.is_empty() || field.len() > max_digits || !field.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(field).ok()?.parse().ok()
}

fn parse_u32(field: &[u8]) -> Option<u32> {
    parse_decimal(field, MAX_DIGITS)
}

fn parse_count(field: &[u8]) -> Option<u64> {
    parse_decimal(field, MAX_COUNT_DIGITS)
}

/// A name or path field.
fn text(field: &[u8]) -> Result<&str, RecordError> {
    std::str::from_utf8(field).map_err(|_| RecordError::InvalidUtf8)
}

// ============================================================================
// Merge Session
// ============================================================================

/// Counters for one parsed trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceStats {
    /// Records merged (comments and blank lines excluded).
    pub records: usize,
    /// Source-file sections opened.
    pub files: usize,
}

/// Accumulates any number of traces into one set of test records.
pub struct MergeSession<'r> {
    reader: &'r dyn SourceReader,
    config: MergeConfig,
    tests: BTreeMap<String, TestRecord>,
    current_test: Option<String>,
}

impl<'r> MergeSession<'r> {
    pub fn new(reader: &'r dyn SourceReader, config: MergeConfig) -> Self {
        if config.discard_checksums && config.generate_checksums {
            tracing::debug!("input checksums are discarded and regenerated");
        }
        Self {
            reader,
            config,
            tests: BTreeMap::new(),
            current_test: None,
        }
    }

    pub fn config(&self) -> MergeConfig {
        self.config
    }

    /// Read `path` through the session's reader and merge it.
    pub fn parse_file(&mut self, path: &str) -> Result<TraceStats, MergeError> {
        let content = self.reader.read(path).map_err(|source| MergeError::Input {
            path: path.to_string(),
            source,
        })?;
        self.parse_bytes(path, &content)
    }

    /// Merge trace `content`; `path` is only used for diagnostics.
    ///
    /// The selected test carries over from the previous trace, so a trace
    /// without `TN` continues the last named test.
    pub fn parse_bytes(&mut self, path: &str, content: &[u8]) -> Result<TraceStats, MergeError> {
        let mut stats = TraceStats::default();

        for (index, raw) in content.split(|&b| b == b'\n').enumerate() {
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() || raw[0] == b'#' {
                continue;
            }
            let fail = |record, error| MergeError::Record {
                path: path.to_string(),
                line: index + 1,
                record,
                error,
            };
            let record = tokenize(raw).map_err(|e| fail(None, e))?;
            let kind = record.kind;
            self.dispatch(record).map_err(|e| fail(Some(kind), e))?;

            stats.records += 1;
            if kind == RecordType::SourceFile {
                stats.files += 1;
            }
        }

        self.close_dangling_file(path);
        tracing::info!(
            path,
            records = stats.records,
            files = stats.files,
            "merged trace"
        );
        Ok(stats)
    }

    /// File sections never span traces; the test selection does.
    fn close_dangling_file(&mut self, path: &str) {
        let Some(test) = self.current_test_mut() else {
            return;
        };
        if test.close_file() {
            tracing::warn!(path, "trace ended without end_of_record");
        }
    }

    fn current_test_mut(&mut self) -> Option<&mut TestRecord> {
        let name = self.current_test.as_deref()?;
        self.tests.get_mut(name)
    }

    fn current_file_mut(&mut self) -> Result<&mut SourceFileInfo, RecordError> {
        self.current_test_mut()
            .and_then(TestRecord::current_file_mut)
            .ok_or(RecordError::MissingFile)
    }

    fn select_test(&mut self, name: &str) {
        if !self.tests.contains_key(name) {
            tracing::debug!(test = name, "new test record");
            self.tests.insert(name.to_string(), TestRecord::new(name));
        }
        self.current_test = Some(name.to_string());
    }

    fn dispatch(&mut self, record: Record<'_>) -> Result<(), RecordError> {
        let Record { kind, args } = record;
        match kind {
            RecordType::TestName => self.handle_test_name(&args),
            RecordType::SourceFile => self.handle_source_file(&args),
            RecordType::EndOfRecord => {
                let test = self.current_test_mut().ok_or(RecordError::MissingFile)?;
                if test.close_file() {
                    Ok(())
                } else {
                    Err(RecordError::MissingFile)
                }
            }
            RecordType::Version => handle_version(self.current_file_mut()?, &args),
            RecordType::FunctionName => handle_function_name(self.current_file_mut()?, &args),
            RecordType::FunctionData => handle_function_data(self.current_file_mut()?, &args),
            RecordType::LineData => {
                let config = self.config;
                handle_line_data(self.current_file_mut()?, &args, config)
            }
            RecordType::BranchData => handle_branch_data(self.current_file_mut()?, &args),
            RecordType::FunctionsFound
            | RecordType::FunctionsHit
            | RecordType::BranchesFound
            | RecordType::BranchesHit
            | RecordType::LinesFound
            | RecordType::LinesHit => {
                self.current_file_mut()?;
                handle_summary(&args)
            }
        }
    }

    fn handle_test_name(&mut self, args: &[&[u8]]) -> Result<(), RecordError> {
        let name = match args {
            [] => "",
            [name] => text(name)?,
            _ => return Err(RecordError::ArgumentCount("1 argument")),
        };
        if self.current_test_mut().is_some_and(|t| t.has_open_file()) {
            return Err(RecordError::FileStillOpen);
        }
        self.select_test(name);
        Ok(())
    }

    fn handle_source_file(&mut self, args: &[&[u8]]) -> Result<(), RecordError> {
        let [path] = args else {
            return Err(RecordError::ArgumentCount("1 argument"));
        };
        let path = text(path)?;
        if self.current_test.is_none() {
            self.select_test("");
        }
        let reader = self.reader;
        let needs_line_map = self.config.needs_line_map();
        let test = self.current_test_mut().ok_or(RecordError::MissingFile)?;
        let file = test.open_file(path)?;
        if needs_line_map {
            file.load_line_map(reader)
                .map_err(|source| RecordError::SourceUnavailable {
                    path: path.to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Test records in name order; the anonymous test sorts first.
    pub fn tests(&self) -> impl Iterator<Item = &TestRecord> {
        self.tests.values()
    }

    pub fn test(&self, name: &str) -> Option<&TestRecord> {
        self.tests.get(name)
    }

    /// Totals across every test and file.
    pub fn summary(&self) -> CoverageSummary {
        let mut total = CoverageSummary::default();
        for test in self.tests.values() {
            total += test.summary();
        }
        total
    }

    /// Write the merged trace.
    pub fn export<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for test in self.tests.values() {
            test.export(out)?;
        }
        Ok(())
    }

    /// The merged trace as a string.
    pub fn to_lcov_string(&self) -> String {
        let mut out = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.export(&mut out);
        String::from_utf8_lossy(&out).into_owned()
    }
}

// ============================================================================
// Record Handlers
// ============================================================================

/// Strip a `basename:` qualifier, checking it names the open file.
///
/// Returns the bare name and whether it was qualified.
fn split_function_name<'a>(
    file: &SourceFileInfo,
    name: &'a str,
) -> Result<(&'a str, bool), RecordError> {
    match name.split_once(':') {
        Some((origin, bare)) => {
            if origin != file.basename() {
                return Err(RecordError::FunctionOrigin {
                    expected: file.basename().to_string(),
                    found: origin.to_string(),
                });
            }
            Ok((bare, true))
        }
        None => Ok((name, false)),
    }
}

fn handle_version(file: &mut SourceFileInfo, args: &[&[u8]]) -> Result<(), RecordError> {
    let [version] = args else {
        return Err(RecordError::ArgumentCount("1 argument"));
    };
    let version = parse_u32(version).ok_or(RecordError::InvalidVersion)?;
    file.set_version(version)?;
    Ok(())
}

fn handle_function_name(file: &mut SourceFileInfo, args: &[&[u8]]) -> Result<(), RecordError> {
    let [lineno, name] = args else {
        return Err(RecordError::ArgumentCount("2 arguments"));
    };
    let (name, private) = split_function_name(file, text(name)?)?;
    let lineno = parse_u32(lineno)
        .filter(|&n| file.line_in_range(n))
        .ok_or(RecordError::InvalidLineNumber)?;
    file.get_or_create_function(name, lineno, private)?;
    Ok(())
}

fn handle_function_data(file: &mut SourceFileInfo, args: &[&[u8]]) -> Result<(), RecordError> {
    let [count, name] = args else {
        return Err(RecordError::ArgumentCount("2 arguments"));
    };
    let count = parse_count(count).ok_or(RecordError::InvalidCount)?;
    let (name, _) = split_function_name(file, text(name)?)?;
    let func = file
        .lookup_function(name)
        .ok_or_else(|| RecordError::UndefinedFunction(name.to_string()))?;
    func.count = func.count.saturating_add(count);
    Ok(())
}

fn handle_line_data(
    file: &mut SourceFileInfo,
    args: &[&[u8]],
    config: MergeConfig,
) -> Result<(), RecordError> {
    let (lineno, count, supplied) = match args {
        [lineno, count] => (lineno, count, None),
        [lineno, count, checksum] => (lineno, count, Some(*checksum)),
        _ => return Err(RecordError::ArgumentCount("2 or 3 arguments")),
    };
    let lineno = parse_u32(lineno)
        .filter(|&n| file.line_in_range(n))
        .ok_or(RecordError::InvalidLineNumber)?;
    let count = parse_count(count).ok_or(RecordError::InvalidCount)?;
    let supplied = match supplied {
        Some(field) if !config.discard_checksums => {
            if field.len() != ENCODED_CHECKSUM_LEN {
                return Err(RecordError::InvalidChecksum);
            }
            let encoded = std::str::from_utf8(field).map_err(|_| RecordError::InvalidChecksum)?;
            Some(decode_checksum(encoded).map_err(RecordError::MalformedChecksum)?)
        }
        _ => None,
    };

    let stored = file.line(lineno).and_then(|line| line.checksum());
    let checksum = match stored {
        Some(existing) => {
            if supplied.is_some_and(|s| s != existing) {
                return Err(ModelError::ConflictingChecksum.into());
            }
            None
        }
        None if config.generate_checksums || supplied.is_some() => {
            let computed = file
                .compute_line_checksum(lineno)
                .ok_or(RecordError::LineUnavailable(lineno))?;
            if supplied.is_some_and(|s| s != computed) {
                return Err(RecordError::ChecksumMismatch);
            }
            Some(computed)
        }
        None => None,
    };

    let line = file.get_line(lineno);
    if let Some(checksum) = checksum {
        line.attach_checksum(checksum)?;
    }
    line.record(count);
    Ok(())
}

fn handle_branch_data(file: &mut SourceFileInfo, args: &[&[u8]]) -> Result<(), RecordError> {
    let [lineno, block, branch, count] = args else {
        return Err(RecordError::ArgumentCount("4 arguments"));
    };
    let hits = match *count {
        b"-" => BranchHits::NeverExecuted,
        count => BranchHits::Taken(parse_count(count).ok_or(RecordError::InvalidCount)?),
    };
    let lineno = parse_u32(lineno)
        .filter(|&n| file.line_in_range(n))
        .ok_or(RecordError::InvalidLineNumber)?;
    let branch_id = |field: &[u8]| {
        parse_u32(field)
            .filter(|&id| id < MAX_BRANCH_ID)
            .and_then(|id| u16::try_from(id).ok())
            .ok_or(RecordError::InvalidBranchId)
    };
    let (block, branch) = (branch_id(*block)?, branch_id(*branch)?);

    file.get_branch(lineno, block, branch).record(hits);
    Ok(())
}

/// `FNF`, `FNH`, `BRF`, `BRH`, `LF` and `LH` are recomputed on export, so
/// the input values are only validated.
fn handle_summary(args: &[&[u8]]) -> Result<(), RecordError> {
    let [value] = args else {
        return Err(RecordError::ArgumentCount("1 argument"));
    };
    parse_count(value).map(|_| ()).ok_or(RecordError::InvalidInteger)
}

// ============================================================================
// Tests
// ============================================================================


// ============================================================================
// Property Tests
// ============================================================================
