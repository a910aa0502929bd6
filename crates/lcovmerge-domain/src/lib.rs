//! Coverage data model for lcovmerge.
//!
//! The model is owned top-down: a [`TestRecord`] owns its
//! [`SourceFileInfo`]s, which own their functions, lines and branches.
//! Everything here is pure merge logic; parsing lives in
//! `lcovmerge-adapters-lcov` and the only side effect is the lazy,
//! cached read of a source file's content for line checksums.

use std::collections::BTreeMap;
use std::io::{self, Write};

use lcovmerge_checksum::{Checksum, encode_checksum, line_checksum};
use lcovmerge_ports::{ReadError, SourceReader};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Merge conflicts detected by the model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// A second `SF` record arrived before `end_of_record`.
    #[error("expected end_of_record before opening '{path}'")]
    FileAlreadyOpen { path: String },

    /// The same function was declared on a different line or with different locality.
    #[error("conflicting function definitions for '{name}'")]
    ConflictingFunction { name: String },

    /// A line already carries a different checksum.
    #[error("conflicting checksum")]
    ConflictingChecksum,

    /// The file already has a different format version.
    #[error("version {found} conflicts with the existing version {existing}")]
    IncompatibleVersion { existing: u32, found: u32 },
}

// ============================================================================
// Line Map
// ============================================================================

/// A source file's content with the byte offset of every line.
///
/// Each line's span includes its terminator. A final line without a
/// terminator still counts as a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineMap {
    content: Vec<u8>,
    // offsets[n - 1]..offsets[n] is line n.
    offsets: Vec<usize>,
}

impl LineMap {
    pub fn new(content: Vec<u8>) -> Self {
        let mut offsets = vec![0];
        offsets.extend(
            content
                .iter()
                .enumerate()
                .filter(|&(_, &b)| b == b'\n')
                .map(|(i, _)| i + 1),
        );
        if content.last().is_some_and(|&b| b != b'\n') {
            offsets.push(content.len());
        }
        Self { content, offsets }
    }

    /// Number of lines in the file.
    pub fn line_count(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Raw bytes of 1-based line `lineno`, optionally without the terminator.
    pub fn line(&self, lineno: u32, strip_terminator: bool) -> Option<&[u8]> {
        let n = usize::try_from(lineno).ok()?;
        if n == 0 || n > self.line_count() {
            return None;
        }
        let span = &self.content[self.offsets[n - 1]..self.offsets[n]];
        if strip_terminator {
            let end = span
                .iter()
                .position(|&b| b == b'\r' || b == b'\n')
                .unwrap_or(span.len());
            Some(&span[..end])
        } else {
            Some(span)
        }
    }
}

/// Load state of a file's [`LineMap`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LineMapState {
    #[default]
    NotLoaded,
    Loaded(LineMap),
    Failed(ReadError),
}

// ============================================================================
// Coverage Entities
// ============================================================================

/// Coverage of one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionCoverage {
    /// Line the function is declared on. Fixed by the first declaration.
    pub line: u32,
    /// Accumulated execution count.
    pub count: u64,
    /// The function is file-local and is written as `basename:name`.
    pub private: bool,
}

/// Coverage of one source line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineCoverage {
    count: u64,
    defined: bool,
    checksum: Option<Checksum>,
}

impl LineCoverage {
    /// Accumulated execution count.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// True once at least one `DA` record referenced this line.
    pub fn is_defined(&self) -> bool {
        self.defined
    }

    pub fn checksum(&self) -> Option<Checksum> {
        self.checksum
    }

    /// Add `count` executions and mark the line as defined.
    pub fn record(&mut self, count: u64) {
        self.count = self.count.saturating_add(count);
        self.defined = true;
    }

    /// Attach a checksum. Once set, only an identical checksum is accepted.
    pub fn attach_checksum(&mut self, checksum: Checksum) -> Result<(), ModelError> {
        match self.checksum {
            None => {
                self.checksum = Some(checksum);
                Ok(())
            }
            Some(existing) if existing == checksum => Ok(()),
            Some(_) => Err(ModelError::ConflictingChecksum),
        }
    }
}

/// Execution state of a single branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BranchHits {
    /// `-` in the trace: the branch exists but its block never ran.
    #[default]
    NeverExecuted,
    Taken(u64),
}

impl BranchHits {
    /// Combine two observations of the same branch.
    ///
    /// A concrete count replaces the sentinel; two counts add up.
    pub fn merge(self, other: BranchHits) -> BranchHits {
        match (self, other) {
            (BranchHits::NeverExecuted, hits) => hits,
            (hits, BranchHits::NeverExecuted) => hits,
            (BranchHits::Taken(a), BranchHits::Taken(b)) => BranchHits::Taken(a.saturating_add(b)),
        }
    }
}

/// Coverage of one branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BranchCoverage {
    pub hits: BranchHits,
    pub defined: bool,
}

impl BranchCoverage {
    pub fn record(&mut self, hits: BranchHits) {
        self.hits = self.hits.merge(hits);
        self.defined = true;
    }
}

/// Branches of one source line, grouped by block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineBranchCoverage {
    pub blocks: Vec<Vec<BranchCoverage>>,
    pub defined: bool,
}

/// Totals recomputed from the merged data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoverageSummary {
    pub functions_found: usize,
    pub functions_hit: usize,
    pub lines_found: usize,
    pub lines_hit: usize,
    pub branches_found: usize,
    pub branches_hit: usize,
}

impl std::ops::AddAssign for CoverageSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.functions_found += rhs.functions_found;
        self.functions_hit += rhs.functions_hit;
        self.lines_found += rhs.lines_found;
        self.lines_hit += rhs.lines_hit;
        self.branches_found += rhs.branches_found;
        self.branches_hit += rhs.branches_hit;
    }
}

// ============================================================================
// Source File
// ============================================================================

/// Coverage of one source file under one test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFileInfo {
    basename: String,
    path: String,
    line_map: LineMapState,
    functions: BTreeMap<String, FunctionCoverage>,
    lines: BTreeMap<u32, LineCoverage>,
    branches: BTreeMap<u32, LineBranchCoverage>,
    version: Option<u32>,
}

/// Final path component, split on either separator.
pub fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

impl SourceFileInfo {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            basename: basename(&path).to_string(),
            path,
            line_map: LineMapState::NotLoaded,
            functions: BTreeMap::new(),
            lines: BTreeMap::new(),
            branches: BTreeMap::new(),
            version: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    pub fn version(&self) -> Option<u32> {
        self.version
    }

    pub fn line_map_state(&self) -> &LineMapState {
        &self.line_map
    }

    /// Read the file once through `reader` and index its lines.
    ///
    /// The outcome is cached: later calls return the same map or the same
    /// error without touching the reader again.
    pub fn load_line_map(&mut self, reader: &dyn SourceReader) -> Result<&LineMap, ReadError> {
        if matches!(self.line_map, LineMapState::NotLoaded) {
            self.line_map = match reader.read(&self.path) {
                Ok(content) => {
                    let map = LineMap::new(content);
                    tracing::debug!(path = %self.path, lines = map.line_count(), "loaded line map");
                    LineMapState::Loaded(map)
                }
                Err(err) => {
                    tracing::debug!(path = %self.path, error = %err, "failed to load line map");
                    LineMapState::Failed(err)
                }
            };
        }
        match &self.line_map {
            LineMapState::Loaded(map) => Ok(map),
            LineMapState::Failed(err) => Err(err.clone()),
            LineMapState::NotLoaded => unreachable!("line map state was just resolved"),
        }
    }

    pub fn line_map(&self) -> Option<&LineMap> {
        match &self.line_map {
            LineMapState::Loaded(map) => Some(map),
            _ => None,
        }
    }

    /// Raw bytes of line `lineno`. `None` unless the line map is loaded and
    /// the line exists.
    pub fn read_line(&self, lineno: u32, strip_terminator: bool) -> Option<&[u8]> {
        self.line_map()?.line(lineno, strip_terminator)
    }

    /// Checksum of line `lineno` as it currently reads on disk.
    pub fn compute_line_checksum(&self, lineno: u32) -> Option<Checksum> {
        self.read_line(lineno, false).map(line_checksum)
    }

    /// Whether `lineno` is a valid line number.
    ///
    /// Without a loaded line map every positive number is accepted. Traces
    /// merged with checksums discarded are therefore only checked for `0`.
    pub fn line_in_range(&self, lineno: u32) -> bool {
        match self.line_map() {
            Some(map) => lineno > 0 && (lineno as usize) <= map.line_count(),
            None => lineno > 0,
        }
    }

    /// Set the format version, or check it against the one already set.
    pub fn set_version(&mut self, version: u32) -> Result<(), ModelError> {
        match self.version {
            None => {
                self.version = Some(version);
                Ok(())
            }
            Some(existing) if existing == version => Ok(()),
            Some(existing) => Err(ModelError::IncompatibleVersion {
                existing,
                found: version,
            }),
        }
    }

    /// Declare a function, or confirm an earlier identical declaration.
    pub fn get_or_create_function(
        &mut self,
        name: &str,
        line: u32,
        private: bool,
    ) -> Result<&mut FunctionCoverage, ModelError> {
        let func = self
            .functions
            .entry(name.to_string())
            .or_insert(FunctionCoverage {
                line,
                count: 0,
                private,
            });
        if func.line != line || func.private != private {
            return Err(ModelError::ConflictingFunction {
                name: name.to_string(),
            });
        }
        Ok(func)
    }

    pub fn lookup_function(&mut self, name: &str) -> Option<&mut FunctionCoverage> {
        self.functions.get_mut(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = (&str, &FunctionCoverage)> {
        self.functions.iter().map(|(name, f)| (name.as_str(), f))
    }

    /// Entry for line `lineno`, created empty on first access.
    pub fn get_line(&mut self, lineno: u32) -> &mut LineCoverage {
        self.lines.entry(lineno).or_default()
    }

    pub fn line(&self, lineno: u32) -> Option<&LineCoverage> {
        self.lines.get(&lineno)
    }

    /// Lines referenced by at least one `DA` record, in ascending order.
    pub fn defined_lines(&self) -> impl Iterator<Item = (u32, &LineCoverage)> {
        self.lines
            .iter()
            .filter(|(_, l)| l.defined)
            .map(|(&n, l)| (n, l))
    }

    /// Entry for one branch, growing the line's block and branch lists as needed.
    pub fn get_branch(&mut self, lineno: u32, block: u16, branch: u16) -> &mut BranchCoverage {
        let line = self.branches.entry(lineno).or_default();
        line.defined = true;
        let block = extend_to(&mut line.blocks, usize::from(block));
        let branch = extend_to(block, usize::from(branch));
        branch.defined = true;
        branch
    }

    pub fn branch(&self, lineno: u32, block: u16, branch: u16) -> Option<&BranchCoverage> {
        self.branches
            .get(&lineno)?
            .blocks
            .get(usize::from(block))?
            .get(usize::from(branch))
    }

    /// Totals over the current data.
    pub fn summary(&self) -> CoverageSummary {
        let mut summary = CoverageSummary {
            functions_found: self.functions.len(),
            functions_hit: self.functions.values().filter(|f| f.count > 0).count(),
            ..CoverageSummary::default()
        };
        for (_, line) in self.defined_lines() {
            summary.lines_found += 1;
            if line.count > 0 {
                summary.lines_hit += 1;
            }
        }
        for branch in self.defined_branches().map(|(_, _, _, b)| b) {
            summary.branches_found += 1;
            if matches!(branch.hits, BranchHits::Taken(n) if n > 0) {
                summary.branches_hit += 1;
            }
        }
        summary
    }

    fn defined_branches(&self) -> impl Iterator<Item = (u32, usize, usize, &BranchCoverage)> {
        self.branches
            .iter()
            .filter(|(_, line)| line.defined)
            .flat_map(|(&lineno, line)| {
                line.blocks.iter().enumerate().flat_map(move |(blkno, block)| {
                    block
                        .iter()
                        .enumerate()
                        .filter(|(_, br)| br.defined)
                        .map(move |(brno, br)| (lineno, blkno, brno, br))
                })
            })
    }

    fn qualified_name(&self, name: &str, func: &FunctionCoverage) -> String {
        if func.private {
            format!("{}:{}", self.basename, name)
        } else {
            name.to_string()
        }
    }

    /// Write this file's records, without the leading `SF:` line.
    ///
    /// Order: `FN`, `FNDA`, `FNF`/`FNH`, `DA`, `BRDA`, `BRF`/`BRH`,
    /// `LF`/`LH`, `end_of_record`. Totals are always recomputed.
    pub fn export<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let summary = self.summary();

        for (name, func) in &self.functions {
            writeln!(out, "FN:{},{}", func.line, self.qualified_name(name, func))?;
        }
        for (name, func) in &self.functions {
            writeln!(out, "FNDA:{},{}", func.count, self.qualified_name(name, func))?;
        }
        writeln!(out, "FNF:{}", summary.functions_found)?;
        writeln!(out, "FNH:{}", summary.functions_hit)?;

        for (lineno, line) in self.defined_lines() {
            match line.checksum {
                Some(checksum) => writeln!(
                    out,
                    "DA:{},{},{}",
                    lineno,
                    line.count,
                    encode_checksum(&checksum)
                )?,
                None => writeln!(out, "DA:{},{}", lineno, line.count)?,
            }
        }

        for (lineno, blkno, brno, branch) in self.defined_branches() {
            match branch.hits {
                BranchHits::NeverExecuted => writeln!(out, "BRDA:{lineno},{blkno},{brno},-")?,
                BranchHits::Taken(n) => writeln!(out, "BRDA:{lineno},{blkno},{brno},{n}")?,
            }
        }
        writeln!(out, "BRF:{}", summary.branches_found)?;
        writeln!(out, "BRH:{}", summary.branches_hit)?;

        writeln!(out, "LF:{}", summary.lines_found)?;
        writeln!(out, "LH:{}", summary.lines_hit)?;
        writeln!(out, "end_of_record")
    }
}

/// Grow `vec` with defaults so that `index` is valid, then return that slot.
fn extend_to<T: Default>(vec: &mut Vec<T>, index: usize) -> &mut T {
    if index >= vec.len() {
        vec.resize_with(index + 1, T::default);
    }
    &mut vec[index]
}

// ============================================================================
// Test Record
// ============================================================================

/// Accumulated coverage of one named (or anonymous) test.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestRecord {
    name: String,
    files: BTreeMap<String, SourceFileInfo>,
    current: Option<String>,
}

impl TestRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            files: BTreeMap::new(),
            current: None,
        }
    }

    /// Test name; empty for the anonymous test.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn files(&self) -> impl Iterator<Item = &SourceFileInfo> {
        self.files.values()
    }

    pub fn file(&self, path: &str) -> Option<&SourceFileInfo> {
        self.files.get(path)
    }

    /// Select (creating if needed) the file at `path` as the open file.
    pub fn open_file(&mut self, path: &str) -> Result<&mut SourceFileInfo, ModelError> {
        if self.current.is_some() {
            return Err(ModelError::FileAlreadyOpen {
                path: path.to_string(),
            });
        }
        if !self.files.contains_key(path) {
            tracing::debug!(test = %self.name, path, "new source file");
        }
        self.current = Some(path.to_string());
        Ok(self
            .files
            .entry(path.to_string())
            .or_insert_with(|| SourceFileInfo::new(path)))
    }

    pub fn current_file_mut(&mut self) -> Option<&mut SourceFileInfo> {
        let path = self.current.as_deref()?;
        self.files.get_mut(path)
    }

    pub fn has_open_file(&self) -> bool {
        self.current.is_some()
    }

    /// Close the open file. Returns false when no file was open.
    pub fn close_file(&mut self) -> bool {
        self.current.take().is_some()
    }

    pub fn summary(&self) -> CoverageSummary {
        let mut total = CoverageSummary::default();
        for file in self.files.values() {
            total += file.summary();
        }
        total
    }

    /// Write this test's records: `TN:` (unless anonymous), then every file
    /// in path order.
    pub fn export<W: Write>(&self, out: &mut W) -> io::Result<()> {
        if !self.name.is_empty() {
            writeln!(out, "TN:{}", self.name)?;
        }
        for (path, file) in &self.files {
            writeln!(out, "SF:{path}")?;
            file.export(out)?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use lcovmerge_adapters_source::InMemoryReader;
    use lcovmerge_checksum::decode_checksum;

    fn export_to_string(file: &SourceFileInfo) -> String {
        let mut out = Vec::new();
        file.export(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    // ------------------------------------------------------------------------
    // Line Map Tests
    // ------------------------------------------------------------------------

    fn assert_lines(content: &str, expected: &[&str]) {
        let map = LineMap::new(content.as_bytes().to_vec());
        assert_eq!(map.line_count(), expected.len(), "content {content:?}");
        for (i, line) in expected.iter().enumerate() {
            let lineno = u32::try_from(i + 1).unwrap();
            assert_eq!(map.line(lineno, false), Some(line.as_bytes()));
        }
        assert_eq!(map.line(0, false), None);
        assert_eq!(map.line(expected.len() as u32 + 1, false), None);
    }

    #[test]
    fn test_line_map_empty_lines() {
        assert_lines("\n\n\r\n\n", &["\n", "\n", "\r\n", "\n"]);
    }

    #[test]
    fn test_line_map_abnormal_newlines() {
        assert_lines(
            "#include abcdefg\n\r\x0b\t\ntttuuu sshhd\n388477",
            &["#include abcdefg\n", "\r\x0b\t\n", "tttuuu sshhd\n", "388477"],
        );
    }

    #[test]
    fn test_line_map_single_line_without_terminator() {
        assert_lines("helloworld, helloworld", &["helloworld, helloworld"]);
    }

    #[test]
    fn test_line_map_empty_file() {
        assert_lines("", &[]);
    }

    #[test]
    fn test_line_map_strip_terminator() {
        let map = LineMap::new(b"a\r\nb\n".to_vec());
        assert_eq!(map.line(1, true), Some(&b"a"[..]));
        assert_eq!(map.line(2, true), Some(&b"b"[..]));
    }

    #[test]
    fn test_load_line_map_is_cached() {
        let reader = InMemoryReader::new().with_file("/a.c", "one\ntwo\n");
        let mut file = SourceFileInfo::new("/a.c");
        assert_eq!(file.load_line_map(&reader).unwrap().line_count(), 2);

        // A reader that knows nothing still yields the cached map.
        let empty = InMemoryReader::new();
        assert_eq!(file.load_line_map(&empty).unwrap().line_count(), 2);
    }

    #[test]
    fn test_load_line_map_failure_is_cached() {
        let mut file = SourceFileInfo::new("/missing.c");
        assert_eq!(
            file.load_line_map(&InMemoryReader::new()),
            Err(ReadError::NotFound)
        );

        let reader = InMemoryReader::new().with_file("/missing.c", "late\n");
        assert_eq!(file.load_line_map(&reader), Err(ReadError::NotFound));
        assert!(matches!(file.line_map_state(), LineMapState::Failed(_)));
        assert_eq!(file.compute_line_checksum(1), None);
    }

    #[test]
    fn test_line_in_range_depends_on_line_map() {
        let mut file = SourceFileInfo::new("/a.c");
        assert!(!file.line_in_range(0));
        assert!(file.line_in_range(u32::MAX));

        let reader = InMemoryReader::new().with_file("/a.c", "x\ny\nz");
        file.load_line_map(&reader).unwrap();
        assert!(file.line_in_range(3));
        assert!(!file.line_in_range(4));
        assert!(!file.line_in_range(0));
    }

    #[test]
    fn test_compute_line_checksum_includes_terminator() {
        let reader = InMemoryReader::new().with_file("/a.c", "int x;\n");
        let mut file = SourceFileInfo::new("/a.c");
        file.load_line_map(&reader).unwrap();
        assert_eq!(
            file.compute_line_checksum(1),
            Some(line_checksum(b"int x;\n"))
        );
    }

    // ------------------------------------------------------------------------
    // Merge Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_basename_handles_both_separators() {
        assert_eq!(basename("/src/a.c"), "a.c");
        assert_eq!(basename("C:\\src\\b.c"), "b.c");
        assert_eq!(basename("c.c"), "c.c");
    }

    #[test]
    fn test_line_counts_are_summed() {
        let mut file = SourceFileInfo::new("/a.c");
        file.get_line(10).record(3);
        file.get_line(10).record(3);
        assert_eq!(file.line(10).unwrap().count(), 6);
    }

    #[test]
    fn test_get_line_creates_undefined_entry() {
        let mut file = SourceFileInfo::new("/a.c");
        assert!(!file.get_line(4).is_defined());
        assert_eq!(file.defined_lines().count(), 0);
        assert!(file.line(3).is_none());
    }

    #[test]
    fn test_checksum_conflict() {
        let first = decode_checksum("AAAAAAAAAAAAAAAAAAAAAA==").unwrap();
        let second = decode_checksum("BBBBBBBBBBBBBBBBBBBBBB==").unwrap();

        let mut file = SourceFileInfo::new("/a.c");
        let line = file.get_line(5);
        line.attach_checksum(first).unwrap();
        line.attach_checksum(first).unwrap();
        assert_eq!(
            line.attach_checksum(second),
            Err(ModelError::ConflictingChecksum)
        );
        assert_eq!(line.checksum(), Some(first));
    }

    #[test]
    fn test_branch_sentinel_is_replaced() {
        let mut file = SourceFileInfo::new("/a.c");
        file.get_branch(7, 0, 0).record(BranchHits::NeverExecuted);
        file.get_branch(7, 0, 0).record(BranchHits::Taken(3));
        assert_eq!(file.branch(7, 0, 0).unwrap().hits, BranchHits::Taken(3));
    }

    #[test]
    fn test_branch_counts_are_summed() {
        let mut file = SourceFileInfo::new("/a.c");
        file.get_branch(7, 0, 0).record(BranchHits::Taken(3));
        file.get_branch(7, 0, 0).record(BranchHits::Taken(2));
        file.get_branch(7, 0, 0).record(BranchHits::NeverExecuted);
        assert_eq!(file.branch(7, 0, 0).unwrap().hits, BranchHits::Taken(5));
    }

    #[test]
    fn test_get_branch_fills_gaps_with_undefined_branches() {
        let mut file = SourceFileInfo::new("/a.c");
        file.get_branch(2, 1, 2).record(BranchHits::Taken(1));
        let gap = file.branch(2, 0, 0);
        assert_eq!(gap, None);
        assert!(!file.branch(2, 1, 0).unwrap().defined);
        assert!(file.branch(2, 1, 2).unwrap().defined);
        assert_eq!(file.summary().branches_found, 1);
    }

    #[test]
    fn test_function_redeclaration_must_agree() {
        let mut file = SourceFileInfo::new("/a.c");
        file.get_or_create_function("f", 3, false).unwrap();
        file.get_or_create_function("f", 3, false).unwrap();
        assert_eq!(
            file.get_or_create_function("f", 4, false),
            Err(ModelError::ConflictingFunction { name: "f".into() })
        );
        assert_eq!(
            file.get_or_create_function("f", 3, true),
            Err(ModelError::ConflictingFunction { name: "f".into() })
        );
    }

    #[test]
    fn test_version_is_immutable() {
        let mut file = SourceFileInfo::new("/a.c");
        file.set_version(2).unwrap();
        file.set_version(2).unwrap();
        assert_eq!(
            file.set_version(3),
            Err(ModelError::IncompatibleVersion {
                existing: 2,
                found: 3
            })
        );
        assert_eq!(file.version(), Some(2));
    }

    #[test]
    fn test_open_file_requires_close() {
        let mut test = TestRecord::new("t");
        test.open_file("/a.c").unwrap();
        assert!(matches!(
            test.open_file("/b.c"),
            Err(ModelError::FileAlreadyOpen { .. })
        ));
        assert!(test.close_file());
        assert!(!test.close_file());
        test.open_file("/a.c").unwrap();
        assert_eq!(test.files().count(), 1);
    }

    // ------------------------------------------------------------------------
    // Export Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_export_order_and_totals() {
        let mut file = SourceFileInfo::new("/src/a.c");
        file.get_or_create_function("main", 1, false).unwrap().count += 2;
        file.get_or_create_function("helper", 5, true).unwrap();
        file.get_line(1).record(2);
        file.get_line(5).record(0);
        file.get_branch(1, 0, 0).record(BranchHits::Taken(2));
        file.get_branch(1, 0, 1).record(BranchHits::NeverExecuted);

        assert_eq!(
            export_to_string(&file),
            "FN:5,a.c:helper\n\
             FN:1,main\n\
             FNDA:0,a.c:helper\n\
             FNDA:2,main\n\
             FNF:2\n\
             FNH:1\n\
             DA:1,2\n\
             DA:5,0\n\
             BRDA:1,0,0,2\n\
             BRDA:1,0,1,-\n\
             BRF:2\n\
             BRH:1\n\
             LF:2\n\
             LH:1\n\
             end_of_record\n"
        );
    }

    #[test]
    fn test_export_appends_checksum() {
        let mut file = SourceFileInfo::new("/a.c");
        let line = file.get_line(1);
        line.record(1);
        line.attach_checksum(line_checksum(b"")).unwrap();
        assert!(export_to_string(&file).contains("DA:1,1,1B2M2Y8AsgTpgAmY7PhCfg==\n"));
    }

    #[test]
    fn test_export_empty_file() {
        let file = SourceFileInfo::new("/a.c");
        assert_eq!(
            export_to_string(&file),
            "FNF:0\nFNH:0\nBRF:0\nBRH:0\nLF:0\nLH:0\nend_of_record\n"
        );
    }

    #[test]
    fn test_anonymous_test_has_no_tn_line() {
        let mut test = TestRecord::new("");
        test.open_file("/a.c").unwrap();
        let mut out = Vec::new();
        test.export(&mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("SF:/a.c\n"));
    }
}

// ============================================================================
// Property Tests
// ============================================================================
