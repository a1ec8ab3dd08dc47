//! Compute the difference between two unified diffs.
//!
//! `interpatch` answers a question the ordinary `diff` tool cannot: given two
//! patches made against the *same* base, what is the patch between the two
//! patched results? It does this in two modes:
//!
//! - **Interdiff** ([`inter_diff()`]): only the two patches are available.
//!   The base source is never read; overlapping hunks from both patches are
//!   merged directly, anchor line by anchor line.
//! - **Mixed mode** ([`mixed_mode_file()`], [`mixed_mode_path()`]): the
//!   sources are available. Each patch is applied to its source and the two
//!   patched texts are diffed line by line.
//!
//! ## Interdiff
//!
//! ````rust
//! use interpatch::inter_diff;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Two patches against the same (unseen) three-line file. The first
//! // replaces the middle line with `B`, the second replaces it with `Z`.
//! let old_diff = "--- a.txt\n+++ a.txt\n@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n";
//! let new_diff = "--- a.txt\n+++ a.txt\n@@ -1,3 +1,3 @@\n a\n-b\n+Z\n c\n";
//!
//! // The result converts the first patched state into the second.
//! let result = inter_diff(old_diff.as_bytes(), new_diff.as_bytes())?;
//! assert_eq!(
//!     result,
//!     "--- a.txt\n+++ a.txt\n@@ -1,3 +1,3 @@\n a\n-B\n+Z\n c\n"
//! );
//! # Ok(())
//! # }
//! ````
//!
//! ## Mixed mode
//!
//! When the sources are at hand, the patches do not need to overlap cleanly;
//! each side is applied and the patched texts are compared directly.
//!
//! ````rust
//! use interpatch::mixed_mode_file;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let old_source = "apple\nbanana\ncherry\n";
//! let new_source = "apple\nbanana\ncherry\n";
//! let old_diff = "--- a.txt\n+++ a.txt\n@@ -1,2 +1,2 @@\n-apple\n+apricot\n banana\n";
//! let new_diff = "--- a.txt\n+++ a.txt\n@@ -3 +3 @@\n-cherry\n+citron\n";
//!
//! let patch = mixed_mode_file(
//!     old_source.as_bytes(),
//!     new_source.as_bytes(),
//!     old_diff.as_bytes(),
//!     new_diff.as_bytes(),
//! )?;
//! assert_eq!(
//!     patch,
//!     "--- a.txt\n+++ a.txt\n@@ -1,3 +1,3 @@\n-apricot\n+apple\n banana\n-cherry\n+citron\n"
//! );
//! # Ok(())
//! # }
//! ````
//!
//! The building blocks are public as well: [`parse_file_diffs()`] and the
//! [`Display`](std::fmt::Display) impls form a unified-diff codec,
//! [`apply_file_diff()`] applies a parsed diff to a source string with strict
//! context checking, and [`inter_file_diff()`] merges two parsed diffs for a
//! single file.
//!
//! ## Feature Flags
//!
//! ### `parallel`
//!
//! - **Enabled by default.**
//! - [`inter_diff()`] merges independent files on a
//!   [`rayon`](https://crates.io/crates/rayon) thread pool. Per-file results
//!   are collected into a map keyed by original file name and emitted in
//!   ascending order, so the output bytes are identical with and without the
//!   feature. Disable it with `default-features = false` for single-threaded
//!   builds.
use log::{debug, trace};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use similar::{capture_diff_slices, Algorithm, DiffTag};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

// --- Error Types ---

/// Represents errors that can occur while parsing a unified diff.
///
/// Returned by [`parse_file_diffs()`]. Every variant carries the 1-based line
/// number in the diff input where parsing failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A `--- ` header was not followed by the matching `+++ ` header.
    #[error("line {line}: expected '+++' file header after '---' header")]
    MissingNewName {
        /// The line number where the `+++ ` header was expected.
        line: usize,
    },
    /// A hunk header did not match `@@ -a[,b] +c[,d] @@`.
    #[error("line {line}: malformed hunk header {header:?}")]
    BadHunkHeader { line: usize, header: String },
    /// The input ended before the hunk body reached the line counts promised
    /// by its header.
    #[error("line {line}: hunk body ends early (expected {missing} more line(s))")]
    TruncatedHunk { line: usize, missing: usize },
    /// A line inside a hunk body carried no valid prefix, or carried a prefix
    /// for a side whose line count was already exhausted.
    #[error("line {line}: unexpected {found:?} in hunk body")]
    BadHunkLine { line: usize, found: String },
    /// A hunk started at or before the end of the previous hunk. Hunks must
    /// be ordered by original line and must not overlap.
    #[error("line {line}: hunk overlaps or precedes the previous hunk")]
    MisorderedHunk { line: usize },
}

/// An anchor or context line disagreed with what the diff expected.
///
/// Produced while applying a diff to a source (the source line disagrees with
/// the diff body) and while merging two overlapping diffs (the two diffs
/// disagree about the same original line). `line` is the 1-based line number
/// in the original file; `left` and `right` are the two payloads that failed
/// to match.
///
/// # Example
///
/// ````rust
/// use interpatch::{apply_file_diff, parse_file_diffs};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let diffs = parse_file_diffs("--- a.txt\n+++ a.txt\n@@ -1 +1 @@\n-expected\n+replaced\n")?;
///
/// let err = apply_file_diff("something else\n", Some(&diffs[0])).unwrap_err();
/// assert_eq!(err.line, 1);
/// assert_eq!(err.left, "something else");
/// assert_eq!(err.right, "expected");
/// # Ok(())
/// # }
/// ````
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("original line {line}: {left:?} does not match {right:?}")]
pub struct ContentMismatch {
    /// 1-based line number in the original file.
    pub line: usize,
    /// What the source (or the old diff) holds at that line.
    pub left: String,
    /// What the diff (or the new diff) expected at that line.
    pub right: String,
}

/// Represents failures of the high-level operations: [`inter_diff()`],
/// [`mixed_mode_file()`] and [`mixed_mode_path()`].
///
/// Each variant wraps the failing stage with enough context (which diff,
/// which file) to report the error without further bookkeeping by the caller.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum InterPatchError {
    /// One of the diff inputs was not a well-formed unified diff.
    #[error("parsing {role} diff")]
    Parse {
        /// Which input failed: `"old"` or `"new"`.
        role: &'static str,
        #[source]
        source: ParseError,
    },
    /// One of the diff inputs parsed successfully but contained no file diffs.
    #[error("{role} diff contains no file diffs")]
    EmptyDiff { role: &'static str },
    /// A diff could not be applied to its source.
    #[error("applying {role} diff to {target:?}")]
    Apply {
        role: &'static str,
        /// The original file name recorded in the failing diff.
        target: String,
        #[source]
        source: ContentMismatch,
    },
    /// Two overlapping diffs disagreed about the content of the shared base.
    #[error("merging diffs for file {file:?}")]
    Merge {
        file: String,
        #[source]
        source: ContentMismatch,
    },
    /// In path mode, a diff's original file name did not match the source
    /// path it was paired with.
    #[error("source path {source_path:?} does not match diff original name {diff_name:?}")]
    PathMismatch {
        source_path: PathBuf,
        diff_name: String,
    },
    /// [`mixed_mode_path()`] was given one file and one directory.
    #[error("sources must be both files or both directories")]
    SourceKindMismatch,
    /// An underlying stream or file operation failed.
    #[error("reading {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

// --- Core Data Structures ---

/// A contiguous change region within a [`FileDiff`].
///
/// The body is held in `lines`, each element prefixed with exactly one of
/// `' '` (context), `'+'` (added) or `'-'` (removed). The four coordinate
/// fields mirror the `@@ -a,b +c,d @@` header: within the body, the count of
/// `' '`/`'-'` lines equals `orig_lines` and the count of `' '`/`'+'` lines
/// equals `new_lines`.
///
/// ````rust
/// use interpatch::parse_file_diffs;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let diffs = parse_file_diffs("--- a.txt\n+++ a.txt\n@@ -10,2 +10,2 @@\n ctx\n-old\n+new\n")?;
/// let hunk = &diffs[0].hunks[0];
///
/// assert_eq!(hunk.orig_start_line, 10);
/// assert_eq!(hunk.lines, vec![" ctx", "-old", "+new"]);
/// assert_eq!(hunk.to_string(), "@@ -10,2 +10,2 @@\n ctx\n-old\n+new\n");
/// # Ok(())
/// # }
/// ````
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Hunk {
    /// Starting line in the original file (1-based).
    pub orig_start_line: usize,
    /// Number of original lines spanned by the hunk.
    pub orig_lines: usize,
    /// Starting line in the new file (1-based).
    pub new_start_line: usize,
    /// Number of new lines spanned by the hunk.
    pub new_lines: usize,
    /// Optional section heading carried after the closing `@@`.
    pub section: String,
    /// Byte offset of the hunk header in the diff input it was parsed from.
    pub start_position: usize,
    /// Byte offset of a `\ No newline at end of file` marker, 0 when absent.
    pub orig_no_newline_at: usize,
    /// The body lines, prefixed with `' '`, `'+'` or `'-'`.
    pub lines: Vec<String>,
}

impl Hunk {
    /// Creates a new `Hunk` that undoes this one.
    ///
    /// Additions become deletions and vice versa; context lines are kept.
    /// The orig and new coordinate pairs are swapped.
    ///
    /// # Example
    ///
    /// ```
    /// # use interpatch::Hunk;
    /// let hunk = Hunk {
    ///     orig_start_line: 10,
    ///     orig_lines: 2,
    ///     new_start_line: 12,
    ///     new_lines: 2,
    ///     lines: vec![" context".to_string(), "-removed".to_string(), "+added".to_string()],
    ///     ..Default::default()
    /// };
    /// let inverted = hunk.invert();
    /// assert_eq!(inverted.lines, vec![" context", "+removed", "-added"]);
    /// assert_eq!(inverted.orig_start_line, 12);
    /// assert_eq!(inverted.new_start_line, 10);
    /// ```
    pub fn invert(&self) -> Hunk {
        Hunk {
            orig_start_line: self.new_start_line,
            orig_lines: self.new_lines,
            new_start_line: self.orig_start_line,
            new_lines: self.orig_lines,
            section: self.section.clone(),
            start_position: self.start_position,
            orig_no_newline_at: self.orig_no_newline_at,
            lines: self.lines.iter().map(|line| reverted_line(line)).collect(),
        }
    }

    /// Checks whether the hunk contains any added or removed lines.
    pub fn has_changes(&self) -> bool {
        self.lines.iter().any(|l| l.starts_with(['+', '-']))
    }

    /// One past the last original line covered by the hunk.
    fn orig_end(&self) -> usize {
        self.orig_start_line + self.orig_lines
    }
}

impl fmt::Display for Hunk {
    /// Formats the hunk as a unified-diff hunk block.
    ///
    /// Following GNU convention, a line count of exactly 1 is omitted from
    /// the header. A non-zero `orig_no_newline_at` re-emits the
    /// `\ No newline at end of file` marker after the body.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@@ -{}", self.orig_start_line)?;
        if self.orig_lines != 1 {
            write!(f, ",{}", self.orig_lines)?;
        }
        write!(f, " +{}", self.new_start_line)?;
        if self.new_lines != 1 {
            write!(f, ",{}", self.new_lines)?;
        }
        write!(f, " @@")?;
        if !self.section.is_empty() {
            write!(f, " {}", self.section)?;
        }
        writeln!(f)?;
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        if self.orig_no_newline_at > 0 {
            writeln!(f, "\\ No newline at end of file")?;
        }
        Ok(())
    }
}

/// A parsed unified diff for a single file.
///
/// An empty `new_name` denotes deletion and an empty `orig_name` denotes
/// creation; the parser maps `/dev/null` headers to the empty string and the
/// [`Display`](std::fmt::Display) impl maps it back. Timestamps are carried
/// as opaque strings and never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileDiff {
    /// Name of the original file; empty for a creation.
    pub orig_name: String,
    /// Name of the new file; empty for a deletion.
    pub new_name: String,
    /// Timestamp following `orig_name` in the `---` header, if any.
    pub orig_time: Option<String>,
    /// Timestamp following `new_name` in the `+++` header, if any.
    pub new_time: Option<String>,
    /// Header lines preceding the `---` header, kept verbatim.
    pub extended: Vec<String>,
    /// The hunks, ordered by `orig_start_line` and non-overlapping.
    pub hunks: Vec<Hunk>,
}

impl FileDiff {
    /// Creates a new `FileDiff` with every hunk inverted.
    ///
    /// File names and times are left untouched; the result describes the
    /// reverse line changes under the same headers.
    pub fn invert(&self) -> FileDiff {
        FileDiff {
            orig_name: self.orig_name.clone(),
            new_name: self.new_name.clone(),
            orig_time: self.orig_time.clone(),
            new_time: self.new_time.clone(),
            extended: self.extended.clone(),
            hunks: self.hunks.iter().map(Hunk::invert).collect(),
        }
    }

    /// True when the diff creates the file (`orig_name` is empty, i.e. the
    /// `---` header was `/dev/null`).
    pub fn is_creation(&self) -> bool {
        self.orig_name.is_empty()
    }

    /// True when the diff deletes the file (`new_name` is empty, i.e. the
    /// `+++` header was `/dev/null`).
    pub fn is_deletion(&self) -> bool {
        self.new_name.is_empty()
    }
}

impl fmt::Display for FileDiff {
    /// Formats the file diff in unified format: extended header lines, the
    /// `---`/`+++` headers (with tab-separated timestamps when present), then
    /// every hunk. Parsing and printing round-trip byte-exactly for
    /// well-formed GNU-style input.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.extended {
            writeln!(f, "{line}")?;
        }
        write!(f, "--- {}", header_name(&self.orig_name))?;
        if let Some(time) = &self.orig_time {
            write!(f, "\t{time}")?;
        }
        writeln!(f)?;
        write!(f, "+++ {}", header_name(&self.new_name))?;
        if let Some(time) = &self.new_time {
            write!(f, "\t{time}")?;
        }
        writeln!(f)?;
        for hunk in &self.hunks {
            write!(f, "{hunk}")?;
        }
        Ok(())
    }
}

fn header_name(name: &str) -> &str {
    if name.is_empty() {
        "/dev/null"
    } else {
        name
    }
}

// --- Parsing ---

/// Parses a unified diff into its [`FileDiff`]s.
///
/// Lines preceding a `--- ` header accumulate as that file's `extended`
/// headers, so `diff -u`/git preambles survive a parse/print round-trip.
/// Hunk bodies are consumed by the line counts in their headers, which is
/// also how the end of one file diff and the start of the next are found.
/// An input without any file diff parses to an empty vector.
///
/// # Example
///
/// ````rust
/// use interpatch::parse_file_diffs;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let input = "--- old/a.txt\t2024-03-01 10:00:00\n+++ new/a.txt\t2024-03-02 11:30:00\n@@ -1,2 +1,2 @@\n-one\n+uno\n two\n";
///
/// let diffs = parse_file_diffs(input)?;
/// assert_eq!(diffs.len(), 1);
/// assert_eq!(diffs[0].orig_name, "old/a.txt");
/// assert_eq!(diffs[0].new_name, "new/a.txt");
/// assert_eq!(diffs[0].hunks[0].orig_lines, 2);
///
/// // Printing a parsed diff reproduces the input.
/// assert_eq!(diffs[0].to_string(), input);
/// # Ok(())
/// # }
/// ````
pub fn parse_file_diffs(input: &str) -> Result<Vec<FileDiff>, ParseError> {
    // Lines paired with their byte offset in the input; hunk start positions
    // refer to these offsets.
    let mut lines: Vec<(usize, &str)> = Vec::new();
    let mut offset = 0;
    for raw in input.split_inclusive('\n') {
        lines.push((offset, raw.strip_suffix('\n').unwrap_or(raw)));
        offset += raw.len();
    }

    let mut file_diffs = Vec::new();
    let mut extended: Vec<String> = Vec::new();
    let mut idx = 0;
    while idx < lines.len() {
        let (_, line) = lines[idx];
        let Some(orig_header) = line.strip_prefix("--- ") else {
            extended.push(line.to_string());
            idx += 1;
            continue;
        };
        let Some(new_header) = lines
            .get(idx + 1)
            .and_then(|&(_, next)| next.strip_prefix("+++ "))
        else {
            return Err(ParseError::MissingNewName { line: idx + 2 });
        };
        let (orig_name, orig_time) = parse_file_header(orig_header);
        let (new_name, new_time) = parse_file_header(new_header);
        idx += 2;

        let mut file_diff = FileDiff {
            orig_name,
            new_name,
            orig_time,
            new_time,
            extended: std::mem::take(&mut extended),
            hunks: Vec::new(),
        };

        while let Some(&(hunk_offset, header)) = lines.get(idx) {
            if !header.starts_with("@@ -") {
                break;
            }
            let (orig_start_line, orig_lines, new_start_line, new_lines, section) =
                parse_hunk_header(header).ok_or_else(|| ParseError::BadHunkHeader {
                    line: idx + 1,
                    header: header.to_string(),
                })?;
            if let Some(prev) = file_diff.hunks.last() {
                if orig_start_line < prev.orig_end() {
                    return Err(ParseError::MisorderedHunk { line: idx + 1 });
                }
            }
            trace!(
                "hunk header at byte {}: -{},{} +{},{}",
                hunk_offset,
                orig_start_line,
                orig_lines,
                new_start_line,
                new_lines
            );
            idx += 1;

            let mut hunk = Hunk {
                orig_start_line,
                orig_lines,
                new_start_line,
                new_lines,
                section,
                start_position: hunk_offset,
                orig_no_newline_at: 0,
                lines: Vec::new(),
            };
            let mut orig_left = orig_lines;
            let mut new_left = new_lines;
            while orig_left > 0 || new_left > 0 {
                let Some(&(line_offset, body_line)) = lines.get(idx) else {
                    return Err(ParseError::TruncatedHunk {
                        line: idx,
                        missing: orig_left.max(new_left),
                    });
                };
                match body_line.chars().next() {
                    Some(' ') if orig_left > 0 && new_left > 0 => {
                        orig_left -= 1;
                        new_left -= 1;
                        hunk.lines.push(body_line.to_string());
                    }
                    Some('+') if new_left > 0 => {
                        new_left -= 1;
                        hunk.lines.push(body_line.to_string());
                    }
                    Some('-') if orig_left > 0 => {
                        orig_left -= 1;
                        hunk.lines.push(body_line.to_string());
                    }
                    Some('\\') => {
                        // "\ No newline at end of file" for the side that
                        // just ended; consumes no line count.
                        hunk.orig_no_newline_at = line_offset;
                    }
                    // A completely empty line is an empty context line.
                    None if orig_left > 0 && new_left > 0 => {
                        orig_left -= 1;
                        new_left -= 1;
                        hunk.lines.push(" ".to_string());
                    }
                    _ => {
                        return Err(ParseError::BadHunkLine {
                            line: idx + 1,
                            found: body_line.to_string(),
                        });
                    }
                }
                idx += 1;
            }
            if let Some(&(marker_offset, marker)) = lines.get(idx) {
                if marker.starts_with('\\') {
                    hunk.orig_no_newline_at = marker_offset;
                    idx += 1;
                }
            }
            file_diff.hunks.push(hunk);
        }

        debug!(
            "parsed file diff {:?} -> {:?} with {} hunk(s)",
            file_diff.orig_name,
            file_diff.new_name,
            file_diff.hunks.len()
        );
        file_diffs.push(file_diff);
    }

    if !extended.is_empty() {
        debug!(
            "ignoring {} trailing non-diff line(s) after the last file diff",
            extended.len()
        );
    }

    Ok(file_diffs)
}

/// Splits a `---`/`+++` header payload into name and optional timestamp.
/// `/dev/null` becomes the empty name.
fn parse_file_header(rest: &str) -> (String, Option<String>) {
    let (name, time) = match rest.split_once('\t') {
        Some((name, time)) => (name, Some(time.to_string())),
        None => (rest, None),
    };
    let name = if name == "/dev/null" {
        String::new()
    } else {
        name.to_string()
    };
    (name, time)
}

/// Parses `@@ -a[,b] +c[,d] @@[ section]`. Counts default to 1 when omitted.
fn parse_hunk_header(header: &str) -> Option<(usize, usize, usize, usize, String)> {
    let rest = header.strip_prefix("@@ -")?;
    let (ranges, tail) = rest.split_once(" @@")?;
    let (orig, new) = ranges.split_once(" +")?;
    let (orig_start_line, orig_lines) = parse_line_range(orig)?;
    let (new_start_line, new_lines) = parse_line_range(new)?;
    let section = tail.strip_prefix(' ').unwrap_or(tail).to_string();
    Some((orig_start_line, orig_lines, new_start_line, new_lines, section))
}

fn parse_line_range(range: &str) -> Option<(usize, usize)> {
    match range.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}

// --- Applying ---

/// Applies a file diff to a source string, validating every context line.
///
/// `None` is treated as the empty patch and returns the source unchanged.
/// Context and removed lines are compared against the source; any
/// disagreement, including a hunk that runs past the end of the source,
/// fails with [`ContentMismatch`].
///
/// # Example
///
/// ````rust
/// use interpatch::{apply_file_diff, parse_file_diffs};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let diffs = parse_file_diffs("--- a.txt\n+++ a.txt\n@@ -2 +2 @@\n-two\n+TWO\n")?;
///
/// let patched = apply_file_diff("one\ntwo\nthree\n", Some(&diffs[0]))?;
/// assert_eq!(patched, "one\nTWO\nthree\n");
/// # Ok(())
/// # }
/// ````
pub fn apply_file_diff(
    source: &str,
    file_diff: Option<&FileDiff>,
) -> Result<String, ContentMismatch> {
    let Some(file_diff) = file_diff else {
        return Ok(source.to_string());
    };
    let source_lines: Vec<&str> = source.split('\n').collect();
    let mut patched: Vec<&str> = Vec::new();
    // 1-based cursor over the original lines.
    let mut cursor: usize = 1;

    for hunk in &file_diff.hunks {
        // A start of 0 appears in creation hunks (`@@ -0,0 ...`).
        let start = hunk.orig_start_line.max(1);
        while cursor < start {
            let Some(line) = source_lines.get(cursor - 1) else {
                let expected = hunk
                    .lines
                    .iter()
                    .find(|l| !l.starts_with('+'))
                    .map(|l| line_content(l))
                    .unwrap_or_default();
                return Err(ContentMismatch {
                    line: cursor,
                    left: String::new(),
                    right: expected.to_string(),
                });
            };
            patched.push(line);
            cursor += 1;
        }

        for line in &hunk.lines {
            if let Some(added) = line.strip_prefix('+') {
                patched.push(added);
                continue;
            }
            let content = line_content(line);
            let Some(source_line) = source_lines.get(cursor - 1) else {
                return Err(ContentMismatch {
                    line: cursor,
                    left: String::new(),
                    right: content.to_string(),
                });
            };
            if *source_line != content {
                return Err(ContentMismatch {
                    line: cursor,
                    left: source_line.to_string(),
                    right: content.to_string(),
                });
            }
            if line.starts_with(' ') {
                patched.push(source_line);
            }
            cursor += 1;
        }
    }

    patched.extend(&source_lines[cursor - 1..]);
    Ok(patched.join("\n"))
}

/// The payload of a body line, without its prefix character.
fn line_content(line: &str) -> &str {
    line.get(1..).unwrap_or("")
}

/// Swaps the `+`/`-` prefix of a body line; context lines pass through.
fn reverted_line(line: &str) -> String {
    if let Some(rest) = line.strip_prefix('+') {
        format!("-{rest}")
    } else if let Some(rest) = line.strip_prefix('-') {
        format!("+{rest}")
    } else {
        line.to_string()
    }
}

// --- Line Diffing ---

/// One group of lines from a line diff. At most one of `added` and `deleted`
/// is non-empty; `equal` never shares a chunk with either.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Chunk {
    added: Vec<String>,
    deleted: Vec<String>,
    equal: Vec<String>,
}

impl Chunk {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.equal.is_empty()
    }
}

/// Computes the line diff of two line sequences as one-sided [`Chunk`]s.
/// A replacement yields its deleted chunk before its added chunk.
fn diff_chunks(old: &[&str], new: &[&str]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for op in capture_diff_slices(Algorithm::Myers, old, new) {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        match tag {
            DiffTag::Equal => chunks.push(Chunk {
                equal: to_owned_lines(&old[old_range]),
                ..Default::default()
            }),
            DiffTag::Delete => chunks.push(Chunk {
                deleted: to_owned_lines(&old[old_range]),
                ..Default::default()
            }),
            DiffTag::Insert => chunks.push(Chunk {
                added: to_owned_lines(&new[new_range]),
                ..Default::default()
            }),
            DiffTag::Replace => {
                chunks.push(Chunk {
                    deleted: to_owned_lines(&old[old_range]),
                    ..Default::default()
                });
                chunks.push(Chunk {
                    added: to_owned_lines(&new[new_range]),
                    ..Default::default()
                });
            }
        }
    }
    chunks
}

fn to_owned_lines(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|line| line.to_string()).collect()
}

// --- Hunk Merging ---

/// Collects the maximal chain of mutually overlapping hunks starting at
/// `old_hunks[i]` and `new_hunks[j]`, which the caller has found to overlap.
/// A hunk joins the chain while its `orig_start_line` lies inside the
/// original-line interval of the last hunk consumed from the opposite side.
/// Returns the chain extents on both sides.
fn overlapping_hunk_set(
    old_hunks: &[Hunk],
    new_hunks: &[Hunk],
    i: usize,
    j: usize,
) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
    let starts_within = |hunk: &Hunk, prev: &Hunk| {
        hunk.orig_start_line >= prev.orig_start_line && hunk.orig_start_line < prev.orig_end()
    };

    let (old_from, new_from) = (i, j);
    let (mut i, mut j) = (i + 1, j + 1);
    loop {
        if i < old_hunks.len() && starts_within(&old_hunks[i], &new_hunks[j - 1]) {
            i += 1;
        } else if j < new_hunks.len() && starts_within(&new_hunks[j], &old_hunks[i - 1]) {
            j += 1;
        } else {
            break;
        }
    }
    (old_from..i, new_from..j)
}

/// Reconciles the runs of added lines both sides carry at the same anchor
/// position. Old additions that the new diff does not make are emitted as
/// deletions, new additions the old diff lacks as additions, and shared
/// additions as context. Returns the merged lines with the advanced body
/// cursors.
fn inter_added_lines(
    old_body: &[String],
    new_body: &[String],
    mut i: usize,
    mut j: usize,
) -> (Vec<String>, usize, usize) {
    let mut old_added = Vec::new();
    while i < old_body.len() && old_body[i].starts_with('+') {
        old_added.push(line_content(&old_body[i]));
        i += 1;
    }
    let mut new_added = Vec::new();
    while j < new_body.len() && new_body[j].starts_with('+') {
        new_added.push(line_content(&new_body[j]));
        j += 1;
    }

    let mut merged = Vec::new();
    for chunk in diff_chunks(&old_added, &new_added) {
        for line in chunk.added {
            merged.push(format!("+{line}"));
        }
        for line in chunk.deleted {
            merged.push(format!("-{line}"));
        }
        for line in chunk.equal {
            merged.push(format!(" {line}"));
        }
    }
    (merged, i, j)
}

/// Builds the coordinate frame of the hunk that merges two overlapping
/// chains, and the original line where the anchor walk starts.
///
/// The result maps the old-patched state to the new-patched state, so its
/// orig side starts where the chain-opening side landed in its own patched
/// file, and the other side's start is shifted by that diff's running line
/// delta. The end boundaries extend the side that finishes first by the
/// original-line gap to the side that finishes last.
fn configure_result_hunk(old_hunks: &[Hunk], new_hunks: &[Hunk]) -> Option<(Hunk, usize)> {
    let (first_old, first_new) = (old_hunks.first()?, new_hunks.first()?);
    let (last_old, last_new) = (old_hunks.last()?, new_hunks.last()?);

    let cur_orig;
    let orig_start;
    let new_start;
    if first_old.orig_start_line < first_new.orig_start_line {
        // The chain opens on the old side.
        cur_orig = first_old.orig_start_line;
        orig_start = first_old.new_start_line as i64;
        new_start =
            cur_orig as i64 + first_new.new_start_line as i64 - first_new.orig_start_line as i64;
    } else {
        cur_orig = first_new.orig_start_line;
        orig_start =
            cur_orig as i64 + first_old.new_start_line as i64 - first_old.orig_start_line as i64;
        new_start = first_new.new_start_line as i64;
    }

    let orig_lines;
    let new_lines;
    if last_old.orig_end() > last_new.orig_end() {
        // The old chain finishes last; its own patched end bounds the orig
        // side, and the new side is extended by the original-line gap.
        orig_lines = (last_old.new_start_line + last_old.new_lines) as i64 - orig_start;
        new_lines = (last_new.new_start_line + last_new.new_lines) as i64
            + last_old.orig_end() as i64
            - last_new.orig_end() as i64
            - new_start;
    } else {
        orig_lines = (last_old.new_start_line + last_old.new_lines) as i64
            + last_new.orig_end() as i64
            - last_old.orig_end() as i64
            - orig_start;
        new_lines = (last_new.new_start_line + last_new.new_lines) as i64 - new_start;
    }

    let hunk = Hunk {
        orig_start_line: orig_start.max(0) as usize,
        orig_lines: orig_lines.max(0) as usize,
        new_start_line: new_start.max(0) as usize,
        new_lines: new_lines.max(0) as usize,
        // TODO: concatenate the section headings of the merged hunks.
        section: String::new(),
        start_position: first_old.start_position,
        orig_no_newline_at: 0,
        lines: Vec::new(),
    };
    Some((hunk, cur_orig))
}

/// Merges two chains of overlapping hunks over the same base into a single
/// hunk mapping the old-patched state to the new-patched state.
///
/// The walk advances `cur_orig` through the shared base one anchor line at a
/// time, opening each hunk body when the walk reaches its start. Where only
/// one side has an open hunk, its lines pass through (inverted for the old
/// side). Where both are open, runs of added lines are reconciled against
/// each other and anchor lines must agree on the base content, else the
/// merge fails with [`ContentMismatch`].
///
/// Returns `Ok(None)` when the merged body contains no changes, i.e. the two
/// chains make the same edit.
fn merge_overlapping_hunks(
    old_hunks: &[Hunk],
    new_hunks: &[Hunk],
) -> Result<Option<Hunk>, ContentMismatch> {
    let Some((mut result, mut cur_orig)) = configure_result_hunk(old_hunks, new_hunks) else {
        return Ok(None);
    };

    let mut old_hunk_idx = 0;
    let mut new_hunk_idx = 0;
    let mut old_body: &[String] = &[];
    let mut new_body: &[String] = &[];
    // Body cursors; None while no hunk on that side is open at cur_orig.
    let mut i: Option<usize> = None;
    let mut j: Option<usize> = None;
    let mut merged: Vec<String> = Vec::new();

    while old_hunk_idx < old_hunks.len() || new_hunk_idx < new_hunks.len() {
        if i.is_none()
            && old_hunk_idx < old_hunks.len()
            && cur_orig == old_hunks[old_hunk_idx].orig_start_line
        {
            i = Some(0);
            old_body = &old_hunks[old_hunk_idx].lines;
        }
        if j.is_none()
            && new_hunk_idx < new_hunks.len()
            && cur_orig == new_hunks[new_hunk_idx].orig_start_line
        {
            j = Some(0);
            new_body = &new_hunks[new_hunk_idx].lines;
        }

        match (i, j) {
            (None, None) => cur_orig += 1,
            (Some(oi), None) => {
                merged.push(reverted_line(&old_body[oi]));
                if !old_body[oi].starts_with('+') {
                    cur_orig += 1;
                }
                i = Some(oi + 1);
            }
            (None, Some(nj)) => {
                merged.push(new_body[nj].clone());
                if !new_body[nj].starts_with('+') {
                    cur_orig += 1;
                }
                j = Some(nj + 1);
            }
            (Some(oi), Some(nj)) => {
                if old_body[oi].starts_with('+') || new_body[nj].starts_with('+') {
                    // Added lines live between anchors and are reconciled
                    // against each other, not against the base.
                    let (lines, next_i, next_j) = inter_added_lines(old_body, new_body, oi, nj);
                    merged.extend(lines);
                    i = Some(next_i);
                    j = Some(next_j);
                } else {
                    let old_content = line_content(&old_body[oi]);
                    let new_content = line_content(&new_body[nj]);
                    if old_content != new_content {
                        return Err(ContentMismatch {
                            line: cur_orig,
                            left: old_content.to_string(),
                            right: new_content.to_string(),
                        });
                    }
                    match (old_body[oi].starts_with('-'), new_body[nj].starts_with('-')) {
                        (false, false) => merged.push(old_body[oi].clone()),
                        // Old removed it but new keeps it: add it back.
                        (true, false) => merged.push(reverted_line(&old_body[oi])),
                        (false, true) => merged.push(new_body[nj].clone()),
                        // Removed on both sides.
                        (true, true) => {}
                    }
                    cur_orig += 1;
                    i = Some(oi + 1);
                    j = Some(nj + 1);
                }
            }
        }

        if matches!(i, Some(n) if n >= old_body.len()) {
            i = None;
            old_hunk_idx += 1;
        }
        if matches!(j, Some(n) if n >= new_body.len()) {
            j = None;
            new_hunk_idx += 1;
        }
    }

    if !merged.iter().any(|l| l.starts_with(['+', '-'])) {
        // Both chains make the same edit here.
        return Ok(None);
    }
    result.lines = merged;
    Ok(Some(result))
}

/// Merges two file diffs over the same base file into the file diff from the
/// old-patched state to the new-patched state.
///
/// Hunks disjoint in original-line coordinates pass through directly
/// (inverted for the old side); overlapping hunks are collected into chains
/// and merged. Extended headers are not carried into the result.
pub fn inter_file_diff(old: &FileDiff, new: &FileDiff) -> Result<FileDiff, ContentMismatch> {
    let mut result = FileDiff {
        orig_name: old.new_name.clone(),
        orig_time: old.new_time.clone(),
        new_name: new.new_name.clone(),
        new_time: new.new_time.clone(),
        extended: Vec::new(),
        hunks: Vec::new(),
    };

    let (mut i, mut j) = (0, 0);
    while i < old.hunks.len() && j < new.hunks.len() {
        let old_hunk = &old.hunks[i];
        let new_hunk = &new.hunks[j];
        if old_hunk.orig_end() < new_hunk.orig_start_line {
            // The whole old hunk sits before the new hunk starts.
            result.hunks.push(old_hunk.invert());
            i += 1;
        } else if new_hunk.orig_end() < old_hunk.orig_start_line {
            result.hunks.push(new_hunk.clone());
            j += 1;
        } else {
            let (old_range, new_range) = overlapping_hunk_set(&old.hunks, &new.hunks, i, j);
            trace!(
                "merging chain of {} old and {} new hunk(s) at original line {}",
                old_range.len(),
                new_range.len(),
                old_hunk.orig_start_line
            );
            let merged = merge_overlapping_hunks(
                &old.hunks[old_range.clone()],
                &new.hunks[new_range.clone()],
            )?;
            i = old_range.end;
            j = new_range.end;
            if let Some(hunk) = merged {
                result.hunks.push(hunk);
            }
        }
    }
    for hunk in &old.hunks[i..] {
        result.hunks.push(hunk.invert());
    }
    for hunk in &new.hunks[j..] {
        result.hunks.push(hunk.clone());
    }
    Ok(result)
}

// --- Interdiff ---

/// Computes the diff between a source patched with `old_diff` and the same
/// source patched with `new_diff`, without reading the source.
///
/// Both inputs are multi-file unified diffs. Files are paired by original
/// name; files touched by only one side pass through (inverted for the old
/// side), and files touched by both are merged hunk by hunk. A file deleted
/// by one side but not the other, or a file diff without any counterpart, is
/// reported as an `Only in <dir>: <base>` line like recursive `diff` emits.
/// Output sections are concatenated in ascending original-name order.
///
/// Two patches that make the same change produce no output at all:
///
/// ````rust
/// use interpatch::inter_diff;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let diff = "--- f.txt\n+++ f.txt\n@@ -2 +2 @@\n-beta\n+B\n";
/// assert_eq!(inter_diff(diff.as_bytes(), diff.as_bytes())?, "");
/// # Ok(())
/// # }
/// ````
pub fn inter_diff(old_diff: impl Read, new_diff: impl Read) -> Result<String, InterPatchError> {
    let old_input = read_stream(old_diff, "old diff")?;
    let new_input = read_stream(new_diff, "new diff")?;

    let mut old_diffs = parse_file_diffs(&old_input)
        .map_err(|source| InterPatchError::Parse { role: "old", source })?;
    if old_diffs.is_empty() {
        return Err(InterPatchError::EmptyDiff { role: "old" });
    }
    let mut new_diffs = parse_file_diffs(&new_input)
        .map_err(|source| InterPatchError::Parse { role: "new", source })?;
    if new_diffs.is_empty() {
        return Err(InterPatchError::EmptyDiff { role: "new" });
    }

    old_diffs.sort_by(|a, b| a.orig_name.cmp(&b.orig_name));
    new_diffs.sort_by(|a, b| a.orig_name.cmp(&b.orig_name));
    debug!(
        "interdiff: {} old file diff(s), {} new file diff(s)",
        old_diffs.len(),
        new_diffs.len()
    );

    // Pair the two sorted sets by original name. Merge work is collected
    // first so independent files can be merged in parallel.
    let mut sections: BTreeMap<String, String> = BTreeMap::new();
    let mut merge_jobs: Vec<(FileDiff, FileDiff)> = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < old_diffs.len() && j < new_diffs.len() {
        let old_fd = &old_diffs[i];
        let new_fd = &new_diffs[j];
        match old_fd.orig_name.cmp(&new_fd.orig_name) {
            Ordering::Equal => {
                if old_fd.is_deletion() && new_fd.is_deletion() {
                    // Deleted in both patched versions.
                } else if old_fd.is_deletion() {
                    sections.insert(new_fd.orig_name.clone(), only_in_line(&new_fd.new_name));
                } else if new_fd.is_deletion() {
                    sections.insert(old_fd.orig_name.clone(), only_in_line(&old_fd.new_name));
                } else {
                    merge_jobs.push((old_fd.clone(), new_fd.clone()));
                }
                i += 1;
                j += 1;
            }
            Ordering::Less => {
                // Only the old diff touches this file.
                sections.insert(
                    old_fd.orig_name.clone(),
                    print_single_file_diff(&old_fd.invert()),
                );
                i += 1;
            }
            Ordering::Greater => {
                sections.insert(new_fd.orig_name.clone(), print_single_file_diff(new_fd));
                j += 1;
            }
        }
    }
    for old_fd in &old_diffs[i..] {
        sections.insert(
            old_fd.orig_name.clone(),
            print_single_file_diff(&old_fd.invert()),
        );
    }
    for new_fd in &new_diffs[j..] {
        sections.insert(new_fd.orig_name.clone(), print_single_file_diff(new_fd));
    }

    let run_merge =
        |(old_fd, new_fd): &(FileDiff, FileDiff)| -> Result<(String, String), InterPatchError> {
            let merged =
                inter_file_diff(old_fd, new_fd).map_err(|source| InterPatchError::Merge {
                    file: old_fd.orig_name.clone(),
                    source,
                })?;
            // Equivalent patches merge to zero hunks and print as nothing.
            let text = if merged.hunks.is_empty() {
                String::new()
            } else {
                merged.to_string()
            };
            Ok((old_fd.orig_name.clone(), text))
        };

    #[cfg(feature = "parallel")]
    let merge_results: Vec<Result<(String, String), InterPatchError>> =
        merge_jobs.par_iter().map(run_merge).collect();
    #[cfg(not(feature = "parallel"))]
    let merge_results: Vec<Result<(String, String), InterPatchError>> =
        merge_jobs.iter().map(run_merge).collect();

    for entry in merge_results {
        let (name, text) = entry?;
        sections.insert(name, text);
    }

    Ok(sections.into_values().collect())
}

/// Prints a file diff that appears on only one side of an interdiff. A diff
/// that deletes its file shows up as an `Only in` line instead of hunks.
fn print_single_file_diff(file_diff: &FileDiff) -> String {
    if file_diff.new_name.is_empty() {
        only_in_line(&file_diff.orig_name)
    } else {
        file_diff.to_string()
    }
}

/// Formats the `Only in <dir>: <base>` line recursive `diff` uses for
/// one-sided files.
fn only_in_line(name: &str) -> String {
    let path = Path::new(name);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_string_lossy().into_owned(),
        _ => ".".to_string(),
    };
    let base = path
        .file_name()
        .map(|base| base.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    format!("Only in {dir}: {base}\n")
}

fn read_stream(mut stream: impl Read, what: &str) -> Result<String, InterPatchError> {
    let mut buffer = String::new();
    stream
        .read_to_string(&mut buffer)
        .map_err(|source| InterPatchError::Io {
            context: what.to_string(),
            source,
        })?;
    Ok(buffer)
}

// --- Mixed Mode ---

/// Number of context lines kept on each side of a change in generated hunks.
const CONTEXT_LINES: usize = 2;

/// Converts a line-diff chunk stream into hunks with [`CONTEXT_LINES`]
/// context lines around each change, appended to `file_diff`.
///
/// An equal run longer than `2 * CONTEXT_LINES + 1` closes the open hunk
/// (keeping its leading lines as trailing context) and opens the next hunk
/// just before the following change. Identical inputs produce no hunks.
fn chunks_into_file_diff(mut chunks: Vec<Chunk>, file_diff: &mut FileDiff) {
    while chunks.first().is_some_and(|c| c.is_empty()) {
        chunks.remove(0);
    }
    while chunks.last().is_some_and(|c| c.is_empty()) {
        chunks.pop();
    }

    // A single all-equal chunk means the inputs are identical.
    if chunks.len() == 1 && chunks[0].added.is_empty() && chunks[0].deleted.is_empty() {
        return;
    }
    if chunks.is_empty() {
        return;
    }

    let mut cur_old: usize = 1;
    let mut cur_new: usize = 1;
    let mut hunk = Hunk {
        orig_start_line: 1,
        new_start_line: 1,
        ..Default::default()
    };
    let mut body: Vec<String> = Vec::new();

    // A leading all-equal chunk contributes at most CONTEXT_LINES of leading
    // context; the hunk start moves past the rest.
    if chunks[0].added.is_empty() && chunks[0].deleted.is_empty() {
        let equal = &chunks[0].equal;
        cur_old += equal.len();
        cur_new += equal.len();
        if equal.len() > CONTEXT_LINES {
            for line in &equal[equal.len() - CONTEXT_LINES..] {
                body.push(format!(" {line}"));
            }
            hunk.orig_start_line = cur_old - CONTEXT_LINES;
            hunk.new_start_line = cur_new - CONTEXT_LINES;
        } else {
            for line in equal {
                body.push(format!(" {line}"));
            }
        }
        chunks.remove(0);
    }

    // Reserve up to CONTEXT_LINES equal lines of the final chunk as the very
    // last trailing context; the rest of that run is beyond any hunk.
    let mut trailing: Vec<String> = Vec::new();
    if let Some(last) = chunks.last_mut() {
        if !last.equal.is_empty() {
            for line in last.equal.iter().take(CONTEXT_LINES) {
                trailing.push(format!(" {line}"));
            }
            last.equal.clear();
        }
    }

    for chunk in &chunks {
        for line in &chunk.added {
            body.push(format!("+{line}"));
            cur_new += 1;
        }
        for line in &chunk.deleted {
            body.push(format!("-{line}"));
            cur_old += 1;
        }

        if chunk.equal.len() > 2 * CONTEXT_LINES + 1 {
            // Too many unchanged lines to keep in one hunk: close the open
            // hunk and anchor the next one just before the coming change.
            if !body.is_empty() {
                for line in chunk.equal.iter().take(CONTEXT_LINES) {
                    body.push(format!(" {line}"));
                }
                hunk.orig_lines = cur_old + CONTEXT_LINES - hunk.orig_start_line;
                hunk.new_lines = cur_new + CONTEXT_LINES - hunk.new_start_line;
                hunk.lines = std::mem::take(&mut body);
                file_diff.hunks.push(hunk);
            }

            cur_old += chunk.equal.len();
            cur_new += chunk.equal.len();
            hunk = Hunk {
                orig_start_line: cur_old - CONTEXT_LINES,
                new_start_line: cur_new - CONTEXT_LINES,
                ..Default::default()
            };
            body = chunk.equal[chunk.equal.len() - CONTEXT_LINES..]
                .iter()
                .map(|line| format!(" {line}"))
                .collect();
        } else {
            for line in &chunk.equal {
                body.push(format!(" {line}"));
                cur_old += 1;
                cur_new += 1;
            }
        }
    }

    for line in trailing {
        body.push(line);
        cur_old += 1;
        cur_new += 1;
    }

    hunk.orig_lines = cur_old - hunk.orig_start_line;
    hunk.new_lines = cur_new - hunk.new_start_line;
    hunk.lines = body;
    file_diff.hunks.push(hunk);
}

/// Applies each diff to its source and diffs the two patched texts. A `None`
/// diff is the identity patch; the result inherits each side's `new_name`
/// and `new_time` from the diff that produced it.
fn mixed_mode(
    old_source: &str,
    new_source: &str,
    old_fd: Option<&FileDiff>,
    new_fd: Option<&FileDiff>,
) -> Result<FileDiff, InterPatchError> {
    let updated_old =
        apply_file_diff(old_source, old_fd).map_err(|source| InterPatchError::Apply {
            role: "old",
            target: old_fd.map(|d| d.orig_name.clone()).unwrap_or_default(),
            source,
        })?;
    let updated_new =
        apply_file_diff(new_source, new_fd).map_err(|source| InterPatchError::Apply {
            role: "new",
            target: new_fd.map(|d| d.orig_name.clone()).unwrap_or_default(),
            source,
        })?;

    let old_lines: Vec<&str> = updated_old
        .strip_suffix('\n')
        .unwrap_or(&updated_old)
        .split('\n')
        .collect();
    let new_lines: Vec<&str> = updated_new
        .strip_suffix('\n')
        .unwrap_or(&updated_new)
        .split('\n')
        .collect();
    let chunks = diff_chunks(&old_lines, &new_lines);

    let mut result = FileDiff::default();
    if let Some(old_fd) = old_fd {
        result.orig_name = old_fd.new_name.clone();
        result.orig_time = old_fd.new_time.clone();
    }
    if let Some(new_fd) = new_fd {
        result.new_name = new_fd.new_name.clone();
        result.new_time = new_fd.new_time.clone();
    }
    chunks_into_file_diff(chunks, &mut result);
    Ok(result)
}

/// Computes the diff of `old_source` patched with `old_diff` against
/// `new_source` patched with `new_diff`.
///
/// Each diff stream must contain exactly one file diff. Identical patched
/// results produce an empty string.
///
/// # Example
///
/// ````rust
/// use interpatch::mixed_mode_file;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let source = "one\ntwo\nthree\n";
/// let old_diff = "--- a.txt\n+++ a.txt\n@@ -2 +2 @@\n-two\n+TWO\n";
/// let new_diff = "--- a.txt\n+++ a.txt\n@@ -2 +2 @@\n-two\n+deux\n";
///
/// let patch = mixed_mode_file(
///     source.as_bytes(),
///     source.as_bytes(),
///     old_diff.as_bytes(),
///     new_diff.as_bytes(),
/// )?;
/// assert_eq!(
///     patch,
///     "--- a.txt\n+++ a.txt\n@@ -1,3 +1,3 @@\n one\n-TWO\n+deux\n three\n"
/// );
/// # Ok(())
/// # }
/// ````
pub fn mixed_mode_file(
    old_source: impl Read,
    new_source: impl Read,
    old_diff: impl Read,
    new_diff: impl Read,
) -> Result<String, InterPatchError> {
    let old_source = read_stream(old_source, "old source")?;
    let new_source = read_stream(new_source, "new source")?;
    let old_input = read_stream(old_diff, "old diff")?;
    let new_input = read_stream(new_diff, "new diff")?;

    let old_fd = parse_single_file_diff(&old_input, "old")?;
    let new_fd = parse_single_file_diff(&new_input, "new")?;

    let result = mixed_mode(&old_source, &new_source, Some(&old_fd), Some(&new_fd))?;
    if result.hunks.is_empty() {
        return Ok(String::new());
    }
    Ok(result.to_string())
}

/// Computes the diff between two patched sources given by path.
///
/// The two source paths must be both files or both directories
/// ([`InterPatchError::SourceKindMismatch`] otherwise). For files, each diff
/// stream must hold one file diff whose original name equals the source path
/// ([`InterPatchError::PathMismatch`] otherwise). For directories, both
/// trees are walked recursively and files are paired by their path relative
/// to each root; files present on only one side come out as `Only in <dir>:
/// <base>` lines, unless the matching diff deletes them.
pub fn mixed_mode_path(
    old_source_path: &Path,
    new_source_path: &Path,
    old_diff: impl Read,
    new_diff: impl Read,
) -> Result<String, InterPatchError> {
    let old_meta = fs::metadata(old_source_path).map_err(|source| InterPatchError::Io {
        context: old_source_path.display().to_string(),
        source,
    })?;
    let new_meta = fs::metadata(new_source_path).map_err(|source| InterPatchError::Io {
        context: new_source_path.display().to_string(),
        source,
    })?;

    let old_input = read_stream(old_diff, "old diff")?;
    let new_input = read_stream(new_diff, "new diff")?;

    if old_meta.is_file() && new_meta.is_file() {
        let old_fd = parse_single_file_diff(&old_input, "old")?;
        if Path::new(&old_fd.orig_name) != old_source_path {
            return Err(InterPatchError::PathMismatch {
                source_path: old_source_path.to_path_buf(),
                diff_name: old_fd.orig_name,
            });
        }
        let new_fd = parse_single_file_diff(&new_input, "new")?;
        if Path::new(&new_fd.orig_name) != new_source_path {
            return Err(InterPatchError::PathMismatch {
                source_path: new_source_path.to_path_buf(),
                diff_name: new_fd.orig_name,
            });
        }
        mixed_mode_file_path(
            old_source_path,
            new_source_path,
            Some(&old_fd),
            Some(&new_fd),
        )
    } else if old_meta.is_dir() && new_meta.is_dir() {
        mixed_mode_dir_path(old_source_path, new_source_path, &old_input, &new_input)
    } else {
        Err(InterPatchError::SourceKindMismatch)
    }
}

fn parse_single_file_diff(input: &str, role: &'static str) -> Result<FileDiff, InterPatchError> {
    parse_file_diffs(input)
        .map_err(|source| InterPatchError::Parse { role, source })?
        .into_iter()
        .next()
        .ok_or(InterPatchError::EmptyDiff { role })
}

/// Mixed mode for a single pair of file paths, where either diff may be
/// absent. Handles the deletion cases before touching the file system: a
/// file deleted in both patched versions yields nothing, and a file deleted
/// in only one yields the `Only in` line for the surviving side.
fn mixed_mode_file_path(
    old_path: &Path,
    new_path: &Path,
    old_fd: Option<&FileDiff>,
    new_fd: Option<&FileDiff>,
) -> Result<String, InterPatchError> {
    let old_deleted = old_fd.is_some_and(|d| !d.orig_name.is_empty() && d.new_name.is_empty());
    let new_deleted = new_fd.is_some_and(|d| !d.orig_name.is_empty() && d.new_name.is_empty());
    if old_deleted && new_deleted {
        return Ok(String::new());
    }
    if old_deleted {
        return Ok(match new_fd {
            Some(d) if !d.new_name.is_empty() => only_in_line(&d.new_name),
            _ => only_in_line(&new_path.to_string_lossy()),
        });
    }
    if new_deleted {
        return Ok(match old_fd {
            Some(d) if !d.new_name.is_empty() => only_in_line(&d.new_name),
            _ => only_in_line(&old_path.to_string_lossy()),
        });
    }

    let old_source = fs::read_to_string(old_path).map_err(|source| InterPatchError::Io {
        context: old_path.display().to_string(),
        source,
    })?;
    let new_source = fs::read_to_string(new_path).map_err(|source| InterPatchError::Io {
        context: new_path.display().to_string(),
        source,
    })?;

    let mut result = mixed_mode(&old_source, &new_source, old_fd, new_fd)?;
    if old_fd.is_none() {
        result.orig_name = old_path.to_string_lossy().into_owned();
    }
    if new_fd.is_none() {
        result.new_name = new_path.to_string_lossy().into_owned();
    }
    if result.hunks.is_empty() {
        return Ok(String::new());
    }
    Ok(result.to_string())
}

/// Mixed mode over two directory trees. Walks both roots, pairs files by
/// their root-relative path and runs the per-file mixed mode on each pair.
/// File diffs that match no file on disk describe additions and are reported
/// as `Only in` lines at the end.
fn mixed_mode_dir_path(
    old_root: &Path,
    new_root: &Path,
    old_diff: &str,
    new_diff: &str,
) -> Result<String, InterPatchError> {
    let old_files = collect_file_names(old_root)?;
    let new_files = collect_file_names(new_root)?;
    debug!(
        "mixed mode: {} file(s) under {:?}, {} file(s) under {:?}",
        old_files.len(),
        old_root,
        new_files.len(),
        new_root
    );

    let mut old_diffs: BTreeMap<String, FileDiff> = BTreeMap::new();
    for fd in parse_file_diffs(old_diff)
        .map_err(|source| InterPatchError::Parse { role: "old", source })?
    {
        old_diffs.insert(fd.orig_name.clone(), fd);
    }
    let mut new_diffs: BTreeMap<String, FileDiff> = BTreeMap::new();
    for fd in parse_file_diffs(new_diff)
        .map_err(|source| InterPatchError::Parse { role: "new", source })?
    {
        new_diffs.insert(fd.orig_name.clone(), fd);
    }

    let mut result = String::new();
    let (mut i, mut j) = (0, 0);
    while i < old_files.len() && j < new_files.len() {
        let old_file = &old_files[i];
        let new_file = &new_files[j];
        match relative_part(old_file, old_root).cmp(relative_part(new_file, new_root)) {
            Ordering::Equal => {
                let old_fd = old_diffs.remove(old_file);
                let new_fd = new_diffs.remove(new_file);
                result.push_str(&mixed_mode_file_path(
                    Path::new(old_file),
                    Path::new(new_file),
                    old_fd.as_ref(),
                    new_fd.as_ref(),
                )?);
                i += 1;
                j += 1;
            }
            Ordering::Less => {
                match old_diffs.remove(old_file) {
                    // Deleted by the old patch: gone from that side's tree.
                    Some(fd) if fd.new_name.is_empty() => {}
                    Some(fd) => result.push_str(&only_in_line(&fd.new_name)),
                    None => result.push_str(&only_in_line(old_file)),
                }
                i += 1;
            }
            Ordering::Greater => {
                match new_diffs.remove(new_file) {
                    Some(fd) if fd.new_name.is_empty() => {}
                    Some(fd) => result.push_str(&only_in_line(&fd.new_name)),
                    None => result.push_str(&only_in_line(new_file)),
                }
                j += 1;
            }
        }
    }
    for old_file in &old_files[i..] {
        match old_diffs.remove(old_file) {
            Some(fd) if fd.new_name.is_empty() => {}
            _ => result.push_str(&only_in_line(old_file)),
        }
    }
    for new_file in &new_files[j..] {
        match new_diffs.remove(new_file) {
            Some(fd) if fd.new_name.is_empty() => {}
            _ => result.push_str(&only_in_line(new_file)),
        }
    }

    // Remaining diffs name files absent from both trees: additions.
    for name in old_diffs.into_keys() {
        result.push_str(&only_in_line(&name));
    }
    for name in new_diffs.into_keys() {
        result.push_str(&only_in_line(&name));
    }

    Ok(result)
}

/// All files under `root`, recursively, lexicographically sorted.
fn collect_file_names(root: &Path) -> Result<Vec<String>, InterPatchError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|source| InterPatchError::Io {
            context: root.display().to_string(),
            source: source.into(),
        })?;
        if entry.file_type().is_file() {
            files.push(entry.path().to_string_lossy().into_owned());
        }
    }
    files.sort();
    Ok(files)
}

/// The part of `path` below `root`, used to pair files across the two trees.
fn relative_part<'a>(path: &'a str, root: &Path) -> &'a str {
    let root = root.to_string_lossy();
    path.strip_prefix(root.as_ref()).unwrap_or(path)
}
