//! The git plumbing driver.
//!
//! Owns every git subprocess invocation: listing and retrieving shared
//! casefiles, the share and delete pipelines over the shared-casefiles ref,
//! deletion history, and blame-based line tracking. All repository state
//! lives in git; the driver itself is stateless and callable from multiple
//! threads at once.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::thread;

use time::OffsetDateTime;
use tracing::debug;

use super::blame;
use super::error::GitError;
use super::log::{DeletedLogParser, dedup_and_sort_authors, parse_commit_date};
use super::tree::{GIT_EMPTY_TREE, TreeEntry, parse_ls_tree_record, render_mktree_input};
use crate::casefile::{
    Bookmark, BookmarkPeg, Casefile, CasefileBlob, CasefileGroup, CasefileRef, DeletedCasefileRef,
    casefile_blob_bytes, split_path,
};
use crate::runner::{CommandRunner, Invocation, Options};
use crate::stream::Separator;

/// The ref whose tip tree encodes every shared casefile.
pub const SHARED_CASEFILES_REF: &str = "refs/collaboration/shared-casefiles";

/// Anchor refs pushed so commits referenced by bookmark pegs survive gc on
/// the remote.
pub const REFERENCED_COMMITS_PREFIX: &str = "refs/collaboration/referenced-commits/";

/// Batch width for per-commit remote probes.
const REMOTE_PROBE_BATCH: usize = 8;

/// What a push spec pushes: a commit, or nothing (deleting the remote ref).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushSource {
    Commit(String),
    Delete,
}

/// One `<source>:<dest>` refspec for `git push`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSpec {
    pub source: PushSource,
    pub dest: String,
    pub force: bool,
}

impl PushSpec {
    /// Push a local branch to the same-named remote branch.
    pub fn branch(name: impl Into<String>) -> Self {
        let name = name.into();
        PushSpec {
            dest: format!("refs/heads/{name}"),
            source: PushSource::Commit(name),
            force: false,
        }
    }

    pub fn to(source: PushSource, dest: impl Into<String>) -> Self {
        PushSpec {
            source,
            dest: dest.into(),
            force: false,
        }
    }

    fn render(&self) -> String {
        let force = if self.force { "+" } else { "" };
        let source = match &self.source {
            PushSource::Commit(commit) => commit.as_str(),
            PushSource::Delete => "",
        };
        format!("{force}{source}:{}", self.dest)
    }
}

/// Result of [`GitDriver::share_casefile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareOutcome {
    /// A new commit was created, pushed, and recorded locally.
    Shared { commit: String },
    /// The identical blob was already shared; nothing was pushed and the
    /// local ref was left untouched.
    NoChanges { commit: String },
}

impl ShareOutcome {
    pub fn commit(&self) -> &str {
        match self {
            ShareOutcome::Shared { commit } | ShareOutcome::NoChanges { commit } => commit,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ShareOutcome::Shared { .. } => "casefile shared",
            ShareOutcome::NoChanges { .. } => "no changes to share",
        }
    }
}

/// Recover from an expected git absence (unborn ref, missing subtree) by
/// substituting a fallback. Bugs are never swallowed.
fn recover<T>(
    result: Result<T, GitError>,
    fallback: impl FnOnce() -> T,
) -> Result<T, GitError> {
    match result {
        Ok(value) => Ok(value),
        Err(err) if err.is_bug() => Err(err),
        Err(err) => {
            debug!("recovering from expected git absence: {err}");
            Ok(fallback())
        }
    }
}

/// Group adjacent same-group entries, preserving git's traversal order.
/// Non-adjacent duplicates intentionally become separate groups, mirroring
/// ls-tree ordering; sorted output never produces them.
fn group_casefiles(entries: Vec<TreeEntry>) -> Vec<CasefileGroup> {
    let mut groups: Vec<CasefileGroup> = Vec::new();
    for entry in entries {
        let Some((group, instance)) = split_path(&entry.name) else {
            continue;
        };
        match groups.last_mut() {
            Some(last) if last.name == group => {
                last.instances.push(CasefileRef::new(group, instance));
            }
            _ => groups.push(CasefileGroup {
                name: group.to_owned(),
                instances: vec![CasefileRef::new(group, instance)],
            }),
        }
    }
    groups
}

enum GroupChange {
    Remove,
    Replace(String),
}

pub struct GitDriver {
    runner: CommandRunner,
    shared_ref: String,
}

impl GitDriver {
    pub fn new(runner: CommandRunner) -> Self {
        GitDriver {
            runner,
            shared_ref: SHARED_CASEFILES_REF.to_owned(),
        }
    }

    pub fn with_shared_ref(mut self, shared_ref: impl Into<String>) -> Self {
        self.shared_ref = shared_ref.into();
        self
    }

    pub fn shared_ref(&self) -> &str {
        &self.shared_ref
    }

    // ---- small capture helpers ------------------------------------------

    /// Run and return the first non-blank stdout line, trimmed.
    fn single_line(&self, invocation: Invocation<'_>) -> Result<Option<String>, GitError> {
        let mut line: Option<String> = None;
        self.runner.run(invocation.stdout_records(
            Separator::newline(),
            |record, stop| {
                if line.is_none() && !record.trim().is_empty() {
                    line = Some(record.trim().to_owned());
                    stop.stop();
                }
            },
        ))?;
        Ok(line)
    }

    /// Run and return all non-blank stdout lines, trimmed.
    fn all_lines(&self, invocation: Invocation<'_>) -> Result<Vec<String>, GitError> {
        let mut lines = Vec::new();
        self.runner.run(invocation.stdout_records(
            Separator::newline(),
            |record, _stop| {
                let trimmed = record.trim();
                if !trimmed.is_empty() {
                    lines.push(trimmed.to_owned());
                }
            },
        ))?;
        Ok(lines)
    }

    /// Run and return the entire stdout verbatim.
    fn capture_all(&self, invocation: Invocation<'_>) -> Result<String, GitError> {
        let mut output = String::new();
        // A separator that never matches: the whole output arrives as the
        // stream's terminal carryover.
        self.runner.run(invocation.stdout_records(
            Separator::scanner(|_| None),
            |record, _stop| output.push_str(record),
        ))?;
        Ok(output)
    }

    // ---- remotes and fetching -------------------------------------------

    pub fn get_list_of_remotes(&self) -> Result<Vec<String>, GitError> {
        self.all_lines(Invocation::new().subcommand("remote"))
    }

    pub fn fetch_from_remote(&self, remote: &str) -> Result<(), GitError> {
        self.runner
            .run(Invocation::new().subcommand("fetch").arg(remote))?;
        Ok(())
    }

    /// Fetch the shared-casefiles ref (and any sub-refs) from `remote`.
    pub fn fetch_shared_casefiles_from_remote(&self, remote: &str) -> Result<(), GitError> {
        let refspec = format!("+{0}*:{0}*", self.shared_ref);
        self.runner.run(
            Invocation::new()
                .subcommand("fetch")
                .arg(remote)
                .arg(refspec),
        )?;
        Ok(())
    }

    // ---- listing and retrieval ------------------------------------------

    /// List every shared casefile, grouped the way git lists them. An
    /// absent shared ref yields an empty list.
    pub fn get_list_of_casefiles(&self) -> Result<Vec<CasefileGroup>, GitError> {
        let mut entries = Vec::new();
        let exit_code = self.runner.run_with_exit(
            Invocation::new()
                .subcommand("ls-tree")
                .options(Options::new().short_flags("rz").flag("full-tree"))
                .arg(&self.shared_ref)
                .stdout_records(Separator::nul(), |record, _stop| {
                    if let Some(entry) = parse_ls_tree_record(record)
                        && entry.mode == "100644"
                        && entry.is_blob()
                    {
                        entries.push(entry);
                    }
                }),
            Ok,
        )?;
        if exit_code != 0 {
            return Ok(Vec::new());
        }
        Ok(group_casefiles(entries))
    }

    /// Authors that ever touched `path` on the shared ref, deduplicated and
    /// sorted.
    pub fn get_casefile_authors(&self, path: &str) -> Result<Vec<String>, GitError> {
        let lines = self.all_lines(
            Invocation::new()
                .subcommand("log")
                .options(Options::new().value("pretty", "format:%aN"))
                .arg(&self.shared_ref)
                .arg("--")
                .arg(path),
        )?;
        Ok(dedup_and_sort_authors(lines))
    }

    /// Raw blob content at `<commit>:<path>`.
    pub fn get_blob_content(&self, path: &str, commit: &str) -> Result<String, GitError> {
        self.capture_all(
            Invocation::new()
                .subcommand("cat-file")
                .arg("blob")
                .arg(format!("{commit}:{path}")),
        )
    }

    /// Load the casefile at `path` from the shared ref, or — when
    /// `before_commit` names a deletion commit — from the parent in which
    /// the path was most recently alive.
    pub fn get_casefile(
        &self,
        path: &str,
        before_commit: Option<&str>,
    ) -> Result<Casefile, GitError> {
        let content = match before_commit {
            None => self.get_blob_content(path, &self.shared_ref)?,
            Some(committish) => {
                let parent = self.find_latest_commit_parent_with_path(path, committish)?;
                self.get_blob_content(path, &parent)?
            }
        };
        let blob: CasefileBlob = serde_json::from_str(&content)?;
        Ok(blob.into_casefile(path))
    }

    // ---- plumbing --------------------------------------------------------

    /// Resolve a committish to a full object name.
    pub fn rev_parse(&self, committish: &str) -> Result<String, GitError> {
        let mut line: Option<String> = None;
        let exit_code = self.runner.run_with_exit(
            Invocation::new()
                .subcommand("rev-parse")
                .arg(committish)
                .stdout_records(Separator::newline(), |record, stop| {
                    if line.is_none() && !record.trim().is_empty() {
                        line = Some(record.trim().to_owned());
                        stop.stop();
                    }
                }),
            Ok,
        )?;
        if exit_code != 0 {
            return Err(GitError::InvalidCommittish {
                committish: committish.to_owned(),
            });
        }
        line.ok_or_else(|| GitError::InvalidCommittish {
            committish: committish.to_owned(),
        })
    }

    /// All parents of `committish`, in order. Empty for a root commit.
    fn rev_parse_parents(&self, committish: &str) -> Result<Vec<String>, GitError> {
        let mut lines = Vec::new();
        let exit_code = self.runner.run_with_exit(
            Invocation::new()
                .subcommand("rev-parse")
                .arg(format!("{committish}^@"))
                .stdout_records(Separator::newline(), |record, _stop| {
                    let trimmed = record.trim();
                    if !trimmed.is_empty() {
                        lines.push(trimmed.to_owned());
                    }
                }),
            Ok,
        )?;
        if exit_code != 0 {
            return Err(GitError::InvalidCommittish {
                committish: committish.to_owned(),
            });
        }
        Ok(lines)
    }

    /// List the immediate entries of a tree-ish. Fails if the tree-ish does
    /// not resolve; callers treat that as "not there yet" where expected.
    pub fn ls_tree(&self, treeish: &str) -> Result<Vec<TreeEntry>, GitError> {
        let mut entries = Vec::new();
        self.runner.run(
            Invocation::new()
                .subcommand("ls-tree")
                .options(Options::new().short_flags("z"))
                .arg(treeish)
                .stdout_records(Separator::nul(), |record, _stop| {
                    if let Some(entry) = parse_ls_tree_record(record) {
                        entries.push(entry);
                    }
                }),
        )?;
        Ok(entries)
    }

    /// Build a tree object from entries. A non-empty input may not degrade
    /// to an empty or absent tree.
    pub fn mktree(&self, entries: &[TreeEntry]) -> Result<String, GitError> {
        let input = render_mktree_input(entries)?;
        let line = self.single_line(
            Invocation::new()
                .subcommand("mktree")
                .options(Options::new().short_flags("z"))
                .feed_stdin(move |sink| sink.write_all(&input)),
        )?;
        let hash = line.unwrap_or_default();
        if hash.is_empty() || hash == GIT_EMPTY_TREE {
            return Err(GitError::InvalidTreeResult { hash });
        }
        Ok(hash)
    }

    /// Write the casefile blob for `bookmarks` into the object store and
    /// return its hash. Content-addressed: identical bookmark sets yield
    /// identical hashes.
    pub fn get_hash_of_casefile(&self, bookmarks: &[Bookmark]) -> Result<String, GitError> {
        let bytes = casefile_blob_bytes(bookmarks);
        let line = self.single_line(
            Invocation::new()
                .subcommand("hash-object")
                .options(Options::new().short_flags("w").value("t", "blob").flag("stdin"))
                .feed_stdin(move |sink| sink.write_all(&bytes)),
        )?;
        line.ok_or_else(|| GitError::WriteFailed {
            what: "casefile blob".to_owned(),
        })
    }

    /// Create a commit object for `tree` with the given parents.
    pub fn commit_casefiles_tree(
        &self,
        tree: &str,
        message: &str,
        parents: &[String],
    ) -> Result<String, GitError> {
        let mut options = Options::new().value("m", message);
        for parent in parents {
            options = options.value("p", parent);
        }
        let line = self.single_line(
            Invocation::new()
                .subcommand("commit-tree")
                .options(options)
                .arg(tree),
        )?;
        line.ok_or(GitError::InvalidCommit)
    }

    pub fn push(&self, remote: &str, specs: &[PushSpec]) -> Result<(), GitError> {
        self.runner.run(
            Invocation::new()
                .subcommand("push")
                .arg(remote)
                .args(specs.iter().map(|spec| spec.render())),
        )?;
        Ok(())
    }

    pub fn update_ref(&self, ref_name: &str, target: &PushSource) -> Result<(), GitError> {
        let invocation = match target {
            PushSource::Commit(commit) => Invocation::new()
                .subcommand("update-ref")
                .arg(ref_name)
                .arg(commit),
            PushSource::Delete => Invocation::new()
                .subcommand("update-ref")
                .options(Options::new().short_flags("d"))
                .arg(ref_name),
        };
        self.runner.run(invocation)?;
        Ok(())
    }

    // ---- share and delete pipelines -------------------------------------

    /// Share `bookmarks` as the casefile at `path`, pushing to `remote` and
    /// only then updating the local shared ref. Sharing an identical blob
    /// is a no-op that touches neither.
    pub fn share_casefile(
        &self,
        remote: &str,
        path: &str,
        bookmarks: &[Bookmark],
    ) -> Result<ShareOutcome, GitError> {
        let (group, instance) = split_path(path)
            .ok_or_else(|| GitError::bug(format!("casefile path {path:?} lacks a group")))?;

        let parents = recover(self.rev_parse(&self.shared_ref).map(|tip| vec![tip]), Vec::new)?;
        let base_tree = parents
            .first()
            .cloned()
            .unwrap_or_else(|| GIT_EMPTY_TREE.to_owned());

        let blob_hash = self.get_hash_of_casefile(bookmarks)?;

        let mut group_entries =
            recover(self.ls_tree(&format!("{base_tree}:{group}")), Vec::new)?;
        match group_entries.iter().position(|e| e.name == instance) {
            None => group_entries.push(TreeEntry::blob(&blob_hash, instance)),
            Some(at) if group_entries[at].hash == blob_hash => {
                return Ok(ShareOutcome::NoChanges { commit: base_tree });
            }
            Some(at) => group_entries[at].hash = blob_hash.clone(),
        }
        let group_tree = self.mktree(&group_entries)?;

        let mut root_entries = recover(self.ls_tree(&base_tree), Vec::new)?;
        root_entries.retain(|e| e.name != group);
        root_entries.push(TreeEntry::tree(group_tree, group));
        let root_tree = self.mktree(&root_entries)?;

        let commit = self.commit_casefiles_tree(&root_tree, "Share casefile", &parents)?;
        self.push(
            remote,
            &[PushSpec::to(PushSource::Commit(commit.clone()), &self.shared_ref)],
        )?;
        self.update_ref(&self.shared_ref, &PushSource::Commit(commit.clone()))?;
        Ok(ShareOutcome::Shared { commit })
    }

    /// Remove the given casefile paths from the shared ref. Paths (or whole
    /// groups) that are already gone are skipped; if nothing remains to do,
    /// neither the remote nor the local ref is touched. Deleting the last
    /// casefile deletes the ref itself.
    pub fn delete_casefile_paths(&self, remote: &str, paths: &[String]) -> Result<(), GitError> {
        let doomed: HashSet<&str> = paths.iter().map(String::as_str).collect();
        let mut groups: Vec<&str> = Vec::new();
        for path in paths {
            if let Some((group, _)) = split_path(path)
                && !groups.contains(&group)
            {
                groups.push(group);
            }
        }

        let tip = match self.rev_parse(&self.shared_ref) {
            Ok(tip) => tip,
            Err(err) if err.is_bug() => return Err(err),
            // No shared ref: nothing to delete.
            Err(_) => return Ok(()),
        };

        // Groups address disjoint subtrees, so their listings fan out.
        let changes: Vec<(String, GroupChange)> = thread::scope(|scope| {
            let handles: Vec<_> = groups
                .iter()
                .map(|&group| {
                    let tip = tip.as_str();
                    let doomed = &doomed;
                    scope.spawn(move || self.plan_group_change(tip, group, doomed))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("group listing panicked"))
                .collect::<Result<Vec<_>, GitError>>()
        })?
        .into_iter()
        .flatten()
        .collect();

        if changes.is_empty() {
            return Ok(());
        }

        let mut root_entries = self.ls_tree(&tip)?;
        for (group, change) in &changes {
            root_entries.retain(|e| &e.name != group);
            if let GroupChange::Replace(hash) = change {
                root_entries.push(TreeEntry::tree(hash.clone(), group.clone()));
            }
        }

        let target = if root_entries.is_empty() {
            PushSource::Delete
        } else {
            let root_tree = self.mktree(&root_entries)?;
            let commit =
                self.commit_casefiles_tree(&root_tree, "Delete casefiles", &[tip.clone()])?;
            PushSource::Commit(commit)
        };

        self.push(remote, &[PushSpec::to(target.clone(), &self.shared_ref)])?;
        self.update_ref(&self.shared_ref, &target)?;
        Ok(())
    }

    /// Decide what happens to one group: removed entirely, rebuilt without
    /// the doomed members, or left alone (`None`).
    fn plan_group_change(
        &self,
        tip: &str,
        group: &str,
        doomed: &HashSet<&str>,
    ) -> Result<Option<(String, GroupChange)>, GitError> {
        let entries = match self.ls_tree(&format!("{tip}:{group}")) {
            Ok(entries) => entries,
            Err(err) if err.is_bug() => return Err(err),
            // Group no longer present; nothing to do for it.
            Err(_) => return Ok(None),
        };
        let kept: Vec<TreeEntry> = entries
            .iter()
            .filter(|e| !doomed.contains(format!("{group}/{}", e.name).as_str()))
            .cloned()
            .collect();
        if kept.len() == entries.len() {
            return Ok(None);
        }
        if kept.is_empty() {
            return Ok(Some((group.to_owned(), GroupChange::Remove)));
        }
        let tree = self.mktree(&kept)?;
        Ok(Some((group.to_owned(), GroupChange::Replace(tree))))
    }

    // ---- deletion history ------------------------------------------------

    /// Casefiles deleted from the shared ref, newest first, optionally
    /// filtered to groups whose name contains `partial`.
    pub fn get_deleted_casefile_refs(
        &self,
        partial: Option<&str>,
    ) -> Result<Vec<DeletedCasefileRef>, GitError> {
        let mut parser = DeletedLogParser::new();
        let mut invocation = Invocation::new()
            .subcommand("log")
            .options(
                Options::new()
                    .short_flags("z")
                    .value("diff-filter", "D")
                    .flag("name-status")
                    .value("pretty", "format:- %H %ci"),
            )
            .arg(&self.shared_ref);
        if let Some(partial) = partial {
            invocation = invocation.arg("--").arg(format!("*{partial}*/*"));
        }
        let exit_code = self.runner.run_with_exit(
            invocation.stdout_records(Separator::nul(), |record, stop| {
                parser.on_record(record, stop);
            }),
            Ok,
        )?;
        if exit_code != 0 {
            return Ok(Vec::new());
        }
        parser.finish()
    }

    // ---- blame-based line tracking ---------------------------------------

    /// Find the commit and line that introduced line `line` of `file`.
    ///
    /// Precedence of the blamed content: an explicit `commit` beats
    /// `live_content`, which beats what is on disk. Uncommitted lines have
    /// no originating commit and fail with [`GitError::NoCommitFound`].
    pub fn line_introduction(
        &self,
        file: &Path,
        line: u32,
        commit: Option<&str>,
        live_content: Option<&str>,
    ) -> Result<BookmarkPeg, GitError> {
        let (dir, base_name) = split_file(file)?;
        let feed_live = commit.is_none() && live_content.is_some();

        let mut options = Options::new()
            .value("L", format!("{line},{line}"))
            .flag("porcelain");
        if feed_live {
            options = options.value("contents", "-");
        }
        let mut invocation = Invocation::new().subcommand("blame").options(options);
        if let Some(commit) = commit {
            invocation = invocation.arg(commit);
        }
        invocation = invocation.arg("--").arg(&base_name);
        if let Some(dir) = dir {
            invocation = invocation.cwd(dir);
        }
        if feed_live {
            let content = live_content.unwrap_or_default().to_owned();
            invocation = invocation.feed_stdin(move |sink| sink.write_all(content.as_bytes()));
        }

        let mut head: Option<String> = None;
        self.runner.run(invocation.stdout_records(
            Separator::newline(),
            |record, stop| {
                if head.is_none() {
                    head = Some(record.to_owned());
                    stop.stop();
                }
            },
        ))?;

        let no_commit = || GitError::NoCommitFound {
            file: file.display().to_string(),
            line,
        };
        let head = head.ok_or_else(no_commit)?;
        let (sha, source_line) = blame::parse_porcelain_head(&head).ok_or_else(no_commit)?;
        if blame::is_null_sha(&sha) {
            return Err(no_commit());
        }
        Ok(BookmarkPeg {
            commit: sha,
            line: source_line,
        })
    }

    /// Map a pegged line into the current content of `file` (live content
    /// if given, the working tree otherwise) via incremental blame.
    pub fn find_current_line_position(
        &self,
        file: &Path,
        peg: &BookmarkPeg,
        live_content: Option<&str>,
    ) -> Result<u32, GitError> {
        let (dir, base_name) = split_file(file)?;

        let mut options = Options::new().flag("incremental");
        if live_content.is_some() {
            options = options.value("contents", "-");
        }
        let mut invocation = Invocation::new()
            .subcommand("blame")
            .options(options)
            .arg("--")
            .arg(&base_name);
        if let Some(dir) = dir {
            invocation = invocation.cwd(dir);
        }
        if let Some(content) = live_content {
            let content = content.to_owned();
            invocation = invocation.feed_stdin(move |sink| sink.write_all(content.as_bytes()));
        }

        let mut found: Option<u32> = None;
        self.runner.run(invocation.stdout_records(
            Separator::newline(),
            |record, stop| {
                if let Some(mapping) = blame::parse_incremental_mapping(record, &peg.commit)
                    && let Some(line) = blame::map_through_group(peg.line, mapping)
                {
                    found = Some(line);
                    stop.stop();
                }
            },
        ))?;

        found.ok_or_else(|| GitError::LineNotFound {
            commit: peg.commit.clone(),
            line: peg.line,
        })
    }

    // ---- remote knowledge probes -----------------------------------------

    /// True iff some remote-tracking branch of `remote` contains `commit`.
    pub fn test_if_commit_known_to_remote(
        &self,
        remote: &str,
        commit: &str,
    ) -> Result<bool, GitError> {
        let mut known = false;
        self.runner.run(
            Invocation::new()
                .subcommand("branch")
                .options(Options::new().short_flags("r").value("contains", commit))
                .arg(format!("{remote}/*"))
                .stdout_records(Separator::newline(), |record, stop| {
                    if !record.trim().is_empty() {
                        known = true;
                        stop.stop();
                    }
                }),
        )?;
        Ok(known)
    }

    /// Filter `commits` down to those not reachable from any branch of
    /// `remote`, probing in bounded-width batches.
    pub fn select_commits_unknown_to_remote(
        &self,
        remote: &str,
        commits: &[String],
    ) -> Result<Vec<String>, GitError> {
        let mut unknown = Vec::new();
        for batch in commits.chunks(REMOTE_PROBE_BATCH) {
            let results: Vec<Result<bool, GitError>> = thread::scope(|scope| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|commit| {
                        scope.spawn(move || self.test_if_commit_known_to_remote(remote, commit))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join().expect("remote probe panicked"))
                    .collect()
            });
            for (commit, known) in batch.iter().zip(results) {
                if !known? {
                    unknown.push(commit.clone());
                }
            }
        }
        Ok(unknown)
    }

    /// Anchor `commits` on the remote so bookmark pegs stay resolvable
    /// after gc.
    pub fn push_commit_refs(&self, remote: &str, commits: &[String]) -> Result<(), GitError> {
        if commits.is_empty() {
            return Ok(());
        }
        let specs: Vec<PushSpec> = commits
            .iter()
            .map(|commit| {
                PushSpec::to(
                    PushSource::Commit(commit.clone()),
                    format!("{REFERENCED_COMMITS_PREFIX}{commit}"),
                )
            })
            .collect();
        self.push(remote, &specs)
    }

    // ---- history around deletions ----------------------------------------

    /// When `path` last changed, as seen from `commit`.
    pub fn get_date_of_last_change(
        &self,
        path: &str,
        commit: &str,
    ) -> Result<OffsetDateTime, GitError> {
        let line = self.single_line(
            Invocation::new()
                .subcommand("log")
                .options(Options::new().value("pretty", "%ci").value("n", "1"))
                .arg(commit)
                .arg("--")
                .arg(path),
        )?;
        let line = line.ok_or_else(|| GitError::InvalidLogOutput {
            line: String::new(),
        })?;
        parse_commit_date(&line)
    }

    /// Of the parents of `committish`, the one in which `path` changed most
    /// recently. Parents where the path lookup fails are skipped; for equal
    /// dates the earlier parent wins.
    pub fn find_latest_commit_parent_with_path(
        &self,
        path: &str,
        committish: &str,
    ) -> Result<String, GitError> {
        let parents = self.rev_parse_parents(committish)?;
        let mut best_date = OffsetDateTime::UNIX_EPOCH;
        let mut best_commit: Option<String> = None;
        for parent in parents {
            let date = match self.get_date_of_last_change(path, &parent) {
                Ok(date) => date,
                Err(err) if err.is_bug() => return Err(err),
                Err(_) => continue,
            };
            if date > best_date {
                best_date = date;
                best_commit = Some(parent);
            }
        }
        best_commit.ok_or_else(|| GitError::InvalidCommittish {
            committish: committish.to_owned(),
        })
    }
}

/// Split a file path into its directory (if any, for the cwd override) and
/// base name; blame runs in the file's directory.
fn split_file(file: &Path) -> Result<(Option<&Path>, String), GitError> {
    let base_name = file
        .file_name()
        .ok_or_else(|| GitError::bug(format!("file path {:?} has no base name", file)))?
        .to_string_lossy()
        .into_owned();
    let dir = file.parent().filter(|dir| !dir.as_os_str().is_empty());
    Ok((dir, base_name))
}
