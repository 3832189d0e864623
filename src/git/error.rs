//! Git driver error types.

use thiserror::Error;

use crate::runner::RunError;

/// Errors that can occur while driving git plumbing.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GitError {
    #[error("committish {committish:?} did not resolve")]
    InvalidCommittish { committish: String },

    #[error("git refused to write {what}")]
    WriteFailed { what: String },

    #[error("tree entry name {name:?} contains '/'")]
    InvalidTreeEntry { name: String },

    #[error("mktree returned an unusable tree {hash:?}")]
    InvalidTreeResult { hash: String },

    #[error("commit-tree produced no commit")]
    InvalidCommit,

    #[error("unparseable git log output: {line:?}")]
    InvalidLogOutput { line: String },

    #[error("no originating commit found for {file}:{line}")]
    NoCommitFound { file: String, line: u32 },

    #[error("line {line} of {commit} not found in current content")]
    LineNotFound { commit: String, line: u32 },

    #[error("casefile blob is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Run(#[from] RunError),

    /// An internal invariant was violated. Never recovered locally: every
    /// rescue that substitutes a fallback re-raises this variant untouched.
    #[error("bug: {0}")]
    Bug(String),
}

impl GitError {
    pub(crate) fn bug(message: impl Into<String>) -> Self {
        GitError::Bug(message.into())
    }

    /// True for errors no local rescue is allowed to swallow.
    pub(crate) fn is_bug(&self) -> bool {
        matches!(self, GitError::Bug(_))
    }
}
