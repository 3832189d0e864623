//! Bookmark relocation: find where a mark lives in current content, and
//! compute fresh pegs for live lines.
//!
//! Two strategies, tried in order: blame pinpoints the pegged line in the
//! current content; failing that, diff hunks map the recorded line into a
//! candidate range that is searched outward. Both fall back to a plain
//! spiral search around the recorded line. Expected misses
//! (`MarkNotFound`, blame's `LineNotFound`) move silently to the next
//! strategy; anything else is logged first.

use std::fs;
use std::path::Path;
use std::thread;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::casefile::Bookmark;
use crate::diff::{Change, Content, DiffDriver, DiffError};
use crate::git::{GitDriver, GitError};

/// How far the untracked spiral search looks on either side of a line.
pub const UNTRACKED_WINDOW_SIZE: u32 = 15;

#[derive(Debug, Error)]
pub enum RelocateError {
    #[error("mark text not found near line {line} of {file}")]
    MarkNotFound { file: String, line: u32 },

    #[error("failed to read {file}: {source}")]
    ReadContent {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Diff(#[from] DiffError),
}

/// Where a mark was found: 1-based line, 1-based byte column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkLocation {
    pub file: String,
    pub line: u32,
    pub col: u32,
}

/// A freshly computed peg. `commit` is absent when the line only exists in
/// uncommitted content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinePeg {
    pub line: u32,
    pub commit: Option<String>,
}

/// A candidate range in current content, with the best single guess
/// (`prime`) inside `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentLineRange {
    pub start: u32,
    pub prime: u32,
    pub end: u32,
}

pub struct Relocator<'a> {
    git: &'a GitDriver,
    diff: &'a DiffDriver,
    /// Relative file paths are resolved against this when reading from
    /// disk, mirroring where the git invocations run.
    root: Option<std::path::PathBuf>,
}

impl<'a> Relocator<'a> {
    pub fn new(git: &'a GitDriver, diff: &'a DiffDriver) -> Self {
        Relocator {
            git,
            diff,
            root: None,
        }
    }

    pub fn with_root(mut self, root: impl Into<std::path::PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    fn disk_path(&self, file: &Path) -> std::path::PathBuf {
        match &self.root {
            Some(root) if file.is_relative() => root.join(file),
            _ => file.to_path_buf(),
        }
    }

    /// Locate `mark` in `content`. Succeeds with the mark's current line
    /// and column, or fails with [`RelocateError::MarkNotFound`].
    pub fn current_location(
        &self,
        mark: &Bookmark,
        content: &str,
    ) -> Result<MarkLocation, RelocateError> {
        let lines: Vec<&str> = content.lines().collect();
        let file = Path::new(&mark.file);

        if let Some(peg) = &mark.peg {
            match self.git.find_current_line_position(file, peg, Some(content)) {
                Ok(row) => {
                    if let Some(found) = find_in_row(&lines, &mark.file, row, &mark.text) {
                        return Ok(found);
                    }
                    warn!(
                        "line {row} of {} no longer carries the mark text",
                        mark.file
                    );
                }
                Err(GitError::LineNotFound { .. }) => {}
                Err(err) => error!("blame pinpoint for {} failed: {err}", mark.file),
            }

            match self.compute_current_line_range(file, mark.line, &peg.commit, Some(content)) {
                Ok(range) => {
                    if let Some(found) = search_range(&lines, &mark.file, range, &mark.text) {
                        return Ok(found);
                    }
                }
                Err(err) => error!("current line range for {} failed: {err}", mark.file),
            }
        }

        spiral_search(&lines, &mark.file, mark.line, &mark.text).ok_or_else(|| {
            RelocateError::MarkNotFound {
                file: mark.file.clone(),
                line: mark.line,
            }
        })
    }

    /// Compute the peg for `current_line` of `file`: where that line was
    /// introduced, or — when blame cannot say — a projection through the
    /// hunks between `commit` (default `HEAD`) and the current content.
    ///
    /// Degrades to `{line: current_line}` when the inputs cannot be read.
    pub fn compute_line_peg(
        &self,
        file: &Path,
        current_line: u32,
        commit: Option<&str>,
        live_content: Option<&str>,
    ) -> LinePeg {
        match self
            .git
            .line_introduction(file, current_line, commit, live_content)
        {
            Ok(peg) => {
                return LinePeg {
                    line: peg.line,
                    commit: Some(peg.commit),
                };
            }
            Err(err) => debug!("line introduction for {} failed: {err}", file.display()),
        }

        let fallback = LinePeg {
            line: current_line,
            commit: None,
        };
        let committish = commit.unwrap_or("HEAD");
        let (resolved, current, base) = thread::scope(|scope| {
            let resolved = scope.spawn(|| self.git.rev_parse(committish));
            let base = scope.spawn(|| {
                self.git
                    .get_blob_content(&file.to_string_lossy(), committish)
            });
            let current = match live_content {
                Some(text) => Ok(text.to_owned()),
                None => fs::read_to_string(self.disk_path(file)),
            };
            (
                resolved.join().expect("rev-parse task panicked"),
                current,
                base.join().expect("blob read task panicked"),
            )
        });
        let (Ok(resolved), Ok(current), Ok(base)) = (resolved, current, base) else {
            return fallback;
        };
        let hunks = match self
            .diff
            .hunks(&Content::Immediate(base), &Content::Immediate(current))
        {
            Ok(hunks) => hunks,
            Err(_) => return fallback,
        };

        let (line, committed) = map_line_to_base(&hunks, current_line);
        LinePeg {
            line,
            commit: committed.then_some(resolved),
        }
    }

    /// Project `line` (a position recorded against `commit`-era content)
    /// into the current content of `file`.
    pub fn compute_current_line_range(
        &self,
        file: &Path,
        line: u32,
        commit: &str,
        live_content: Option<&str>,
    ) -> Result<CurrentLineRange, RelocateError> {
        let base = self.git.get_blob_content(&file.to_string_lossy(), commit)?;
        let current = match live_content {
            Some(text) => text.to_owned(),
            None => fs::read_to_string(self.disk_path(file)).map_err(|source| {
                RelocateError::ReadContent {
                    file: file.display().to_string(),
                    source,
                }
            })?,
        };
        let hunks = self
            .diff
            .hunks(&Content::Immediate(base), &Content::Immediate(current))?;
        Ok(map_line_to_current(&hunks, line))
    }
}

/// Map a base-side line through the hunks into a current-side range.
fn map_line_to_current(hunks: &[Change], line: u32) -> CurrentLineRange {
    let mut offset: i64 = 0;
    for hunk in hunks {
        if line < hunk.base_start {
            break;
        }
        if line < hunk.base_end {
            let prime = hunk.current_start
                + (u64::from(line - hunk.base_start)
                    * u64::from(hunk.current_end - hunk.current_start)
                    / u64::from(hunk.base_end - hunk.base_start)) as u32;
            return CurrentLineRange {
                start: hunk.current_start,
                prime,
                end: hunk.current_end,
            };
        }
        offset = i64::from(hunk.current_end) - i64::from(hunk.base_end);
    }
    let start = (i64::from(line) + offset).max(1) as u32;
    CurrentLineRange {
        start,
        prime: start,
        end: start + 1,
    }
}

/// Map a current-side line back into base coordinates. The second value is
/// false when the line precedes every change, i.e. no commit applies.
fn map_line_to_base(hunks: &[Change], current_line: u32) -> (u32, bool) {
    let mut offset: i64 = 0;
    for hunk in hunks {
        if current_line < hunk.current_start {
            return ((i64::from(current_line) - offset).max(1) as u32, false);
        }
        if current_line < hunk.current_end {
            let line = hunk.base_start
                + (u64::from(current_line - hunk.current_start)
                    * u64::from(hunk.base_end - hunk.base_start)
                    / u64::from(hunk.current_end - hunk.current_start)) as u32;
            return (line, true);
        }
        offset = i64::from(hunk.current_end) - i64::from(hunk.base_end);
    }
    ((i64::from(current_line) - offset).max(1) as u32, true)
}

fn find_in_row(lines: &[&str], file: &str, row: u32, text: &str) -> Option<MarkLocation> {
    if row == 0 {
        return None;
    }
    let line = lines.get(row as usize - 1)?;
    let col = line.find(text)? as u32 + 1;
    Some(MarkLocation {
        file: file.to_owned(),
        line: row,
        col,
    })
}

/// Check `start`, then radiate ±1..±window, positive offset first.
fn spiral_search(lines: &[&str], file: &str, start: u32, text: &str) -> Option<MarkLocation> {
    if let Some(found) = find_in_row(lines, file, start, text) {
        return Some(found);
    }
    for offset in 1..=UNTRACKED_WINDOW_SIZE {
        if let Some(found) = find_in_row(lines, file, start + offset, text) {
            return Some(found);
        }
        if let Some(row) = start.checked_sub(offset)
            && let Some(found) = find_in_row(lines, file, row, text)
        {
            return Some(found);
        }
    }
    None
}

/// Check `prime`, then radiate outward while staying inside `[start, end)`.
fn search_range(
    lines: &[&str],
    file: &str,
    range: CurrentLineRange,
    text: &str,
) -> Option<MarkLocation> {
    if let Some(found) = find_in_row(lines, file, range.prime, text) {
        return Some(found);
    }
    let below = range.prime.saturating_sub(range.start);
    let above = range.end.saturating_sub(range.prime);
    for offset in 1..=below.max(above) {
        if let Some(row) = range.prime.checked_sub(offset)
            && row >= range.start
            && let Some(found) = find_in_row(lines, file, row, text)
        {
            return Some(found);
        }
        let row = range.prime + offset;
        if row < range.end
            && let Some(found) = find_in_row(lines, file, row, text)
        {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(base_start: u32, base_end: u32, current_start: u32, current_end: u32) -> Change {
        Change {
            base_start,
            base_end,
            current_start,
            current_end,
        }
    }

    #[test]
    fn find_in_row_reports_one_based_column() {
        let lines = vec!["first", "has the penne here"];
        let found = find_in_row(&lines, "f", 2, "penne").unwrap();
        assert_eq!(found.line, 2);
        assert_eq!(found.col, 9);
        assert_eq!(find_in_row(&lines, "f", 2, "rigatoni"), None);
        assert_eq!(find_in_row(&lines, "f", 0, "penne"), None);
        assert_eq!(find_in_row(&lines, "f", 9, "penne"), None);
    }

    #[test]
    fn spiral_checks_positive_offset_first() {
        // The text is both one above and one below; +1 wins.
        let lines = vec!["mark", "x", "mark"];
        let found = spiral_search(&lines, "f", 2, "mark").unwrap();
        assert_eq!(found.line, 3);
    }

    #[test]
    fn spiral_respects_window() {
        let mut rows = vec!["x"; 40];
        rows[35] = "mark here";
        let found = spiral_search(&rows, "f", 21, "mark").unwrap();
        assert_eq!(found.line, 36);
        // One line further out than the window can reach.
        rows[35] = "x";
        rows[37] = "mark here";
        assert_eq!(spiral_search(&rows, "f", 21, "mark"), None);
    }

    #[test]
    fn range_search_radiates_within_bounds() {
        let range = CurrentLineRange {
            start: 2,
            prime: 4,
            end: 8,
        };
        // Text below start is out of bounds even though it is closer.
        let lines = vec!["mark", "x", "x", "x", "x", "x", "mark", "x"];
        let found = search_range(&lines, "f", range, "mark").unwrap();
        assert_eq!(found.line, 7);
    }

    #[test]
    fn range_search_prefers_low_side() {
        let range = CurrentLineRange {
            start: 2,
            prime: 4,
            end: 8,
        };
        let lines = vec!["x", "x", "mark", "x", "mark", "x", "x", "x"];
        let found = search_range(&lines, "f", range, "mark").unwrap();
        assert_eq!(found.line, 3);
    }

    #[test]
    fn map_to_current_inside_hunk_interpolates() {
        // One base line grew into three current lines.
        let hunks = [change(2, 3, 2, 5)];
        let range = map_line_to_current(&hunks, 2);
        assert_eq!(
            range,
            CurrentLineRange {
                start: 2,
                prime: 2,
                end: 5
            }
        );
    }

    #[test]
    fn map_to_current_outside_hunks_offsets() {
        let hunks = [change(2, 3, 2, 5)];
        // Before the hunk: untouched.
        assert_eq!(
            map_line_to_current(&hunks, 1),
            CurrentLineRange {
                start: 1,
                prime: 1,
                end: 2
            }
        );
        // After the hunk: shifted by the growth.
        assert_eq!(
            map_line_to_current(&hunks, 5),
            CurrentLineRange {
                start: 7,
                prime: 7,
                end: 8
            }
        );
    }

    #[test]
    fn map_to_base_before_inside_after() {
        let hunks = [change(4, 6, 4, 8)];
        // Before any hunk: no commit applies.
        assert_eq!(map_line_to_base(&hunks, 2), (2, false));
        // Inside: interpolated, committed.
        assert_eq!(map_line_to_base(&hunks, 6), (5, true));
        // After: shifted back by the growth, committed.
        assert_eq!(map_line_to_base(&hunks, 10), (8, true));
    }

    #[test]
    fn pegged_fallback_finds_displaced_mark() {
        // The diff-fallback range misses, the spiral from the recorded line
        // then finds the mark: file has "penne" only at line 7, the range
        // projected from line 2 is [2, 5).
        let content = "zero\none\ntwo\nthree\nfour\nfive\nand penne  here\n";
        let lines: Vec<&str> = content.lines().collect();
        let range = map_line_to_current(&[change(2, 3, 2, 5)], 2);
        assert_eq!(
            range,
            CurrentLineRange {
                start: 2,
                prime: 2,
                end: 5
            }
        );
        assert_eq!(search_range(&lines, "f", range, "penne"), None);
        let found = spiral_search(&lines, "f", 2, "penne").unwrap();
        assert_eq!(found.line, 7);
        assert_eq!(found.col, 5);
    }

    #[test]
    fn unique_text_is_found_regardless_of_starting_line() {
        let lines = vec!["a", "b", "needle once", "d", "e"];
        for start in 1..=5 {
            let found = spiral_search(&lines, "f", start, "needle").unwrap();
            assert_eq!(found.line, 3);
            assert_eq!(found.col, 1);
        }
    }
}
