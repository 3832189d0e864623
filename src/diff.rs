//! External `diff -U 0` invocation and hunk-header parsing.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::warn;

use crate::janitor::{CleanupError, Janitor};
use crate::runner::{CommandRunner, Invocation, OptStyle, Options, RunError, RunnerOptions};
use crate::stream::Separator;

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("diff exited with code {exit_code} comparing {base} against {current}")]
    DiffFailed {
        exit_code: i32,
        base: String,
        current: String,
    },
    #[error("failed to materialise {what} content: {source}")]
    Materialise {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Cleanup(#[from] CleanupError),
}

/// One side of a comparison: bytes already on disk, or in-memory text that
/// is written to a temporary file for the duration of the call.
#[derive(Debug, Clone)]
pub enum Content {
    Path(PathBuf),
    Immediate(String),
}

impl Content {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Content::Path(path.into())
    }

    pub fn immediate(text: impl Into<String>) -> Self {
        Content::Immediate(text.into())
    }
}

impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Path(path) => write!(f, "path {}", path.display()),
            Content::Immediate(text) => write!(f, "immediate content ({} bytes)", text.len()),
        }
    }
}

/// A contiguous differing range between two text versions. Both sides are
/// 1-based half-open `[start, end)` line ranges: a pure insertion has
/// `base_start == base_end`, a pure deletion `current_start == current_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    pub base_start: u32,
    pub base_end: u32,
    pub current_start: u32,
    pub current_end: u32,
}

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("hunk header regex")
});

/// Parse one `diff -U0` hunk header line into a [`Change`], or `None` when
/// the line is not a hunk header.
pub(crate) fn parse_hunk_header(line: &str) -> Option<Change> {
    let caps = HUNK_HEADER.captures(line)?;
    let number = |i: usize| caps.get(i).map(|m| m.as_str().parse::<u32>().ok()).flatten();
    let base_start = number(1)?;
    let base_len = number(2);
    let current_start = number(3)?;
    let current_len = number(4);

    // A zero length means the range sits *between* lines: diff reports the
    // line before the gap, so the real position is one further down.
    let (base_start, base_end) = match base_len {
        Some(0) => (base_start + 1, base_start + 1),
        Some(len) => (base_start, base_start + len),
        None => (base_start, base_start + 1),
    };
    let (current_start, current_end) = match current_len {
        Some(0) => (current_start + 1, current_start + 1),
        Some(len) => (current_start, current_start + len),
        None => (current_start, current_start + 1),
    };
    Some(Change {
        base_start,
        base_end,
        current_start,
        current_end,
    })
}

/// Runs the external `diff` tool and parses its unified-zero-context output.
pub struct DiffDriver {
    runner: CommandRunner,
}

impl DiffDriver {
    pub fn new(diff_binary: impl Into<String>) -> Self {
        let mut opts = RunnerOptions::new(diff_binary);
        opts.opt_style = OptStyle::OneDash;
        DiffDriver {
            runner: CommandRunner::new(opts),
        }
    }

    pub fn with_runner(runner: CommandRunner) -> Self {
        DiffDriver { runner }
    }

    /// Compare `base` to `current` and return the changed line ranges.
    ///
    /// Immediate content is written to temp files which are removed before
    /// this returns, on success and failure alike.
    pub fn hunks(&self, base: &Content, current: &Content) -> Result<Vec<Change>, DiffError> {
        let mut janitor = Janitor::new();
        let result = self.hunks_inner(base, current, &mut janitor);
        match janitor.clean_up_sync() {
            Ok(()) => result,
            Err(cleanup) => match result {
                // The comparison already failed; the cleanup failure is
                // secondary, log it rather than mask the original error.
                Err(err) => {
                    warn!("temp file cleanup after failed diff also failed: {cleanup}");
                    Err(err)
                }
                Ok(_) => Err(cleanup.into()),
            },
        }
    }

    fn hunks_inner(
        &self,
        base: &Content,
        current: &Content,
        janitor: &mut Janitor,
    ) -> Result<Vec<Change>, DiffError> {
        let base_path = materialise(base, "base", janitor)?;
        let current_path = materialise(current, "current", janitor)?;

        let mut changes = Vec::new();
        let exit_code = self.runner.run_with_exit(
            Invocation::new()
                .options(Options::new().value("U", "0"))
                .arg(base_path.to_string_lossy())
                .arg(current_path.to_string_lossy())
                .stdout_records(Separator::newline(), |record, _stop| {
                    if let Some(change) = parse_hunk_header(record) {
                        changes.push(change);
                    }
                }),
            Ok,
        )?;
        match exit_code {
            // 1 just means the inputs differ.
            0 | 1 => Ok(changes),
            exit_code => Err(DiffError::DiffFailed {
                exit_code,
                base: base.to_string(),
                current: current.to_string(),
            }),
        }
    }
}

/// Resolve a content spec to an on-disk path, creating (and registering for
/// cleanup) a temp file for immediate content.
fn materialise(
    content: &Content,
    what: &'static str,
    janitor: &mut Janitor,
) -> Result<PathBuf, DiffError> {
    match content {
        Content::Path(path) => Ok(path.clone()),
        Content::Immediate(text) => {
            let mut file = tempfile::NamedTempFile::new()
                .map_err(|source| DiffError::Materialise { what, source })?;
            file.write_all(text.as_bytes())
                .map_err(|source| DiffError::Materialise { what, source })?;
            let path = file.path().to_path_buf();
            janitor.add_task(format!("remove {what} temp file"), move || {
                file.close().map_err(Into::into)
            });
            Ok(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hunk_header_ranges() {
        // Plain replacement, implicit length 1 on both sides.
        assert_eq!(
            parse_hunk_header("@@ -3 +3 @@ fn main() {"),
            Some(Change {
                base_start: 3,
                base_end: 4,
                current_start: 3,
                current_end: 4
            })
        );
        // Multi-line ranges.
        assert_eq!(
            parse_hunk_header("@@ -2,3 +2,5 @@"),
            Some(Change {
                base_start: 2,
                base_end: 5,
                current_start: 2,
                current_end: 7
            })
        );
        assert_eq!(parse_hunk_header("+added line"), None);
        assert_eq!(parse_hunk_header("@@ garbage @@"), None);
    }

    #[test]
    fn zero_length_marks_pure_insertion_and_deletion() {
        // Pure insertion: base side empty, shifted past the reported line.
        let change = parse_hunk_header("@@ -4,0 +5,2 @@").unwrap();
        assert_eq!(change.base_start, 5);
        assert_eq!(change.base_end, 5);
        assert_eq!(change.current_start, 5);
        assert_eq!(change.current_end, 7);

        // Pure deletion: current side empty.
        let change = parse_hunk_header("@@ -7,2 +6,0 @@").unwrap();
        assert_eq!(change.base_start, 7);
        assert_eq!(change.base_end, 9);
        assert_eq!(change.current_start, 7);
        assert_eq!(change.current_end, 7);
    }

    #[test]
    fn diffs_immediate_content() {
        let driver = DiffDriver::new("diff");
        let base = Content::immediate("a\nb\nc\n");
        let current = Content::immediate("a\nB\nc\nd\n");
        let changes = driver.hunks(&base, &current).unwrap();
        assert_eq!(
            changes,
            [
                Change {
                    base_start: 2,
                    base_end: 3,
                    current_start: 2,
                    current_end: 3
                },
                Change {
                    base_start: 4,
                    base_end: 4,
                    current_start: 4,
                    current_end: 5
                },
            ]
        );
    }

    #[test]
    fn identical_content_yields_no_hunks() {
        let driver = DiffDriver::new("diff");
        let text = Content::immediate("same\n");
        assert_eq!(driver.hunks(&text, &text.clone()).unwrap(), []);
    }

    #[test]
    fn missing_file_fails_with_descriptors() {
        let driver = DiffDriver::new("diff");
        let base = Content::path("/definitely/not/here");
        let current = Content::immediate("x\n");
        let err = driver.hunks(&base, &current).unwrap_err();
        match err {
            DiffError::DiffFailed { exit_code, base, .. } => {
                assert!(exit_code > 1);
                assert!(base.contains("/definitely/not/here"));
            }
            other => panic!("expected DiffFailed, got {other}"),
        }
    }
}
