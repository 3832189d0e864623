//! Parsers for `git log` output: author lists, commit dates, and the
//! NUL-separated deletion history of the shared ref.

use std::sync::LazyLock;

use regex::Regex;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use super::error::GitError;
use crate::casefile::DeletedCasefileRef;
use crate::stream::StopToken;

/// `git log --pretty=%ci` dates: `2023-01-02 03:04:05 +0600`.
static COMMIT_DATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
);

pub(crate) fn parse_commit_date(text: &str) -> Result<OffsetDateTime, GitError> {
    OffsetDateTime::parse(text.trim(), COMMIT_DATE).map_err(|_| GitError::InvalidLogOutput {
        line: text.to_owned(),
    })
}

/// Deduplicate preserving first occurrence, then sort ascending.
pub(crate) fn dedup_and_sort_authors(lines: Vec<String>) -> Vec<String> {
    let mut authors: Vec<String> = Vec::with_capacity(lines.len());
    for line in lines {
        if !line.is_empty() && !authors.contains(&line) {
            authors.push(line);
        }
    }
    authors.sort();
    authors
}

static COMMIT_INFO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^- (\S+) (\S+ \S+ \S+)$").expect("commit info regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Expecting a name-status action, possibly prefixed by commit info.
    Action,
    /// Expecting the path the preceding action applied to.
    Path,
}

/// Two-state machine over the NUL-separated records of
/// `git log -z --diff-filter=D --name-status --pretty=format:"- %H %ci"`.
///
/// Records alternate between an action (the first record of each commit
/// additionally carries a `- <sha> <date>` header line) and the deleted
/// path; an empty record separates commits.
pub(crate) struct DeletedLogParser {
    state: State,
    commit: String,
    committed: Option<OffsetDateTime>,
    records: Vec<DeletedCasefileRef>,
    error: Option<GitError>,
}

impl DeletedLogParser {
    pub(crate) fn new() -> Self {
        DeletedLogParser {
            state: State::Action,
            commit: String::new(),
            committed: None,
            records: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn on_record(&mut self, record: &str, stop: &StopToken) {
        if self.error.is_some() {
            return;
        }
        match self.state {
            State::Action => {
                if record.is_empty() {
                    return;
                }
                if record.starts_with('-') {
                    // Peel the commit-info line; the record continues with
                    // the action itself (always `D` under --diff-filter=D).
                    let info = record.split('\n').next().unwrap_or(record);
                    let Some(caps) = COMMIT_INFO.captures(info) else {
                        self.fail(info, stop);
                        return;
                    };
                    let Ok(committed) = parse_commit_date(&caps[2]) else {
                        self.fail(info, stop);
                        return;
                    };
                    self.commit = caps[1].to_owned();
                    self.committed = Some(committed);
                }
                self.state = State::Path;
            }
            State::Path => {
                let Some(committed) = self.committed else {
                    self.fail(record, stop);
                    return;
                };
                self.records.push(DeletedCasefileRef {
                    deletion_commit: self.commit.clone(),
                    committed,
                    path: record.to_owned(),
                });
                self.state = State::Action;
            }
        }
    }

    fn fail(&mut self, line: &str, stop: &StopToken) {
        self.error = Some(GitError::InvalidLogOutput {
            line: line.to_owned(),
        });
        stop.stop();
    }

    pub(crate) fn finish(self) -> Result<Vec<DeletedCasefileRef>, GitError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.records),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const C1: &str = "1111111111111111111111111111111111111111";
    const C2: &str = "2222222222222222222222222222222222222222";

    fn run_parser(stream_text: &str) -> Result<Vec<DeletedCasefileRef>, GitError> {
        let mut parser = DeletedLogParser::new();
        let stop = StopToken::default();
        for record in stream_text.split('\0') {
            if stop.is_stopped() {
                break;
            }
            parser.on_record(record, &stop);
        }
        parser.finish()
    }

    #[test]
    fn parses_alternating_records() {
        let input = format!(
            "- {C1} 2023-01-02 03:04:05 +0000\nD\0p1\0\0- {C2} 2023-02-03 04:05:06 +0600\nD\0p2\0D\0p3\0\0"
        );
        let refs = run_parser(&input).unwrap();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].deletion_commit, C1);
        assert_eq!(refs[0].path, "p1");
        assert_eq!(refs[1].deletion_commit, C2);
        assert_eq!(refs[1].path, "p2");
        assert_eq!(refs[2].deletion_commit, C2);
        assert_eq!(refs[2].path, "p3");
        assert_eq!(refs[0].committed.year(), 2023);
        assert_eq!(refs[1].committed.offset().whole_hours(), 6);
    }

    #[test]
    fn malformed_commit_info_fails() {
        let err = run_parser("- not-enough-fields\nD\0p1\0").unwrap_err();
        assert!(matches!(err, GitError::InvalidLogOutput { .. }));
    }

    #[test]
    fn bad_date_fails() {
        let input = format!("- {C1} yesterday at noon-ish\nD\0p1\0");
        let err = run_parser(&input).unwrap_err();
        assert!(matches!(err, GitError::InvalidLogOutput { .. }));
    }

    #[test]
    fn commit_dates_parse() {
        let date = parse_commit_date("2024-12-31 23:59:59 +0130").unwrap();
        assert_eq!(date.year(), 2024);
        assert_eq!(date.offset().whole_minutes(), 90);
        assert!(parse_commit_date("not a date").is_err());
    }

    #[test]
    fn authors_dedup_then_sort() {
        let input = vec![
            "Zoe".to_owned(),
            "Ann".to_owned(),
            "Zoe".to_owned(),
            "Mia".to_owned(),
            "Ann".to_owned(),
        ];
        assert_eq!(dedup_and_sort_authors(input), ["Ann", "Mia", "Zoe"]);
    }
}
