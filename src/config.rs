//! Driver configuration.
//!
//! The core is a library: no file discovery happens here. Callers build (or
//! deserialize) a [`DriverConfig`] and hand it to
//! [`CasefileKeeper::new`](crate::keeper::CasefileKeeper::new).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::git::SHARED_CASEFILES_REF;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Binary used for git plumbing.
    pub git_binary: String,

    /// Binary used for text comparison; must understand `-U 0`.
    pub diff_binary: String,

    /// Working directory for git invocations, normally the repository root.
    /// Defaults to the process working directory.
    pub repo_dir: Option<PathBuf>,

    /// Per-invocation timeout in milliseconds. A timed-out invocation fails
    /// but the child process is left to finish on its own.
    pub timeout_ms: Option<u64>,

    /// Ref under which shared casefiles are stored.
    pub shared_ref: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            git_binary: "git".to_owned(),
            diff_binary: "diff".to_owned(),
            repo_dir: None,
            timeout_ms: None,
            shared_ref: SHARED_CASEFILES_REF.to_owned(),
        }
    }
}

impl DriverConfig {
    /// A config rooted at `repo_dir` with everything else defaulted.
    pub fn for_repo(repo_dir: impl Into<PathBuf>) -> Self {
        DriverConfig {
            repo_dir: Some(repo_dir.into()),
            ..DriverConfig::default()
        }
    }
}
