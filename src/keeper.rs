//! Façade wiring: one [`CasefileKeeper`] owns the drivers; remote handles
//! borrow it for per-remote operations.

use std::collections::HashSet;
use std::time::Duration;

use uuid::Uuid;

use crate::casefile::{Bookmark, Casefile, CasefileGroup, CasefileRef, DeletedCasefileRef};
use crate::config::DriverConfig;
use crate::diff::DiffDriver;
use crate::git::{GitDriver, GitError, ShareOutcome};
use crate::relocate::Relocator;
use crate::runner::{CommandRunner, OptStyle, RunnerOptions};

/// Whether a remote already knows every commit referenced by a casefile's
/// bookmark pegs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitsKnown {
    AllKnown,
    Unknown(Vec<String>),
}

impl CommitsKnown {
    pub fn is_all_known(&self) -> bool {
        matches!(self, CommitsKnown::AllKnown)
    }
}

/// Entry point: constructs the git and diff drivers from a [`DriverConfig`]
/// and hands out borrowing handles for remotes and relocation.
pub struct CasefileKeeper {
    git: GitDriver,
    diff: DiffDriver,
    repo_dir: Option<std::path::PathBuf>,
}

impl CasefileKeeper {
    pub fn new(config: DriverConfig) -> Self {
        let timeout = config.timeout_ms.map(Duration::from_millis);

        let mut git_opts = RunnerOptions::new(config.git_binary);
        git_opts.uses_subcommands = true;
        git_opts.cwd = config.repo_dir.clone();
        git_opts.timeout = timeout;
        let git = GitDriver::new(CommandRunner::new(git_opts)).with_shared_ref(config.shared_ref);

        let mut diff_opts = RunnerOptions::new(config.diff_binary);
        diff_opts.opt_style = OptStyle::OneDash;
        diff_opts.timeout = timeout;
        let diff = DiffDriver::with_runner(CommandRunner::new(diff_opts));

        CasefileKeeper {
            git,
            diff,
            repo_dir: config.repo_dir,
        }
    }

    pub fn git(&self) -> &GitDriver {
        &self.git
    }

    pub fn diff(&self) -> &DiffDriver {
        &self.diff
    }

    pub fn relocator(&self) -> Relocator<'_> {
        let relocator = Relocator::new(&self.git, &self.diff);
        match &self.repo_dir {
            Some(dir) => relocator.with_root(dir),
            None => relocator,
        }
    }

    /// A handle for `name`; the remote is not checked for existence.
    pub fn remote(&self, name: impl Into<String>) -> GitRemote<'_> {
        GitRemote {
            name: name.into(),
            git: &self.git,
        }
    }

    pub fn remotes(&self) -> Result<Vec<GitRemote<'_>>, GitError> {
        Ok(self
            .git
            .get_list_of_remotes()?
            .into_iter()
            .map(|name| GitRemote {
                name,
                git: &self.git,
            })
            .collect())
    }

    pub fn casefile_groups(&self) -> Result<Vec<CasefileGroup>, GitError> {
        self.git.get_list_of_casefiles()
    }

    pub fn load(&self, casefile: &CasefileRef) -> Result<Casefile, GitError> {
        self.git.get_casefile(&casefile.path(), None)
    }

    pub fn authors(&self, casefile: &CasefileRef) -> Result<Vec<String>, GitError> {
        self.git.get_casefile_authors(&casefile.path())
    }

    pub fn deleted_casefiles(
        &self,
        partial: Option<&str>,
    ) -> Result<Vec<DeletedCasefileRef>, GitError> {
        self.git.get_deleted_casefile_refs(partial)
    }

    pub fn deleted_authors(&self, deleted: &DeletedCasefileRef) -> Result<Vec<String>, GitError> {
        self.git.get_casefile_authors(&deleted.path)
    }

    /// Recover the content a casefile had just before it was deleted.
    pub fn retrieve_deleted(&self, deleted: &DeletedCasefileRef) -> Result<Casefile, GitError> {
        self.git
            .get_casefile(&deleted.path, Some(&deleted.deletion_commit))
    }

    /// Mint a fresh casefile path in `group`.
    pub fn new_instance_path(group: &str) -> String {
        format!("{group}/{}", Uuid::new_v4())
    }
}

/// Per-remote operations, borrowing the keeper's git driver.
pub struct GitRemote<'a> {
    name: String,
    git: &'a GitDriver,
}

impl GitRemote<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fetch(&self) -> Result<(), GitError> {
        self.git.fetch_from_remote(&self.name)
    }

    pub fn fetch_shared_casefiles(&self) -> Result<(), GitError> {
        self.git.fetch_shared_casefiles_from_remote(&self.name)
    }

    pub fn share(&self, path: &str, bookmarks: &[Bookmark]) -> Result<ShareOutcome, GitError> {
        self.git.share_casefile(&self.name, path, bookmarks)
    }

    pub fn delete(&self, paths: &[String]) -> Result<(), GitError> {
        self.git.delete_casefile_paths(&self.name, paths)
    }

    /// Anchor commits on the remote under the referenced-commits namespace.
    pub fn push_commit_refs(&self, commits: &[String]) -> Result<(), GitError> {
        self.git.push_commit_refs(&self.name, commits)
    }

    /// Share a casefile, first anchoring any peg commits the remote does
    /// not know yet so the pegs stay resolvable there after gc.
    pub fn share_anchored(&self, casefile: &Casefile) -> Result<ShareOutcome, GitError> {
        if let CommitsKnown::Unknown(commits) = self.commits_unknown(casefile)? {
            self.push_commit_refs(&commits)?;
        }
        self.share(&casefile.path, &casefile.bookmarks)
    }

    /// Which of the casefile's pegged commits the remote does not know yet.
    pub fn commits_unknown(&self, casefile: &Casefile) -> Result<CommitsKnown, GitError> {
        let commits = peg_commits(&casefile.bookmarks);
        let unknown = self.git.select_commits_unknown_to_remote(&self.name, &commits)?;
        Ok(if unknown.is_empty() {
            CommitsKnown::AllKnown
        } else {
            CommitsKnown::Unknown(unknown)
        })
    }
}

/// Collect peg commits from a bookmark forest, depth-first, deduplicated,
/// in first-seen order.
fn peg_commits(bookmarks: &[Bookmark]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut commits = Vec::new();
    let mut stack: Vec<&Bookmark> = bookmarks.iter().rev().collect();
    while let Some(mark) = stack.pop() {
        if let Some(peg) = &mark.peg
            && seen.insert(&peg.commit)
        {
            commits.push(peg.commit.clone());
        }
        for child in mark.children.iter().rev() {
            stack.push(child);
        }
    }
    commits
}
