//! Tree entries: `ls-tree` record parsing and `mktree` input rendering.

use std::sync::LazyLock;

use regex::Regex;

use super::error::GitError;

/// The hash of the empty tree, identical in every repository. Serves as the
/// sentinel for "no tree yet".
pub const GIT_EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// One entry of a git tree object.
///
/// `name` is a single path segment and never contains `/`; nested paths are
/// expressed as entries of type `tree`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: String,
    pub kind: String,
    pub hash: String,
    pub name: String,
}

impl TreeEntry {
    pub fn blob(hash: impl Into<String>, name: impl Into<String>) -> Self {
        TreeEntry {
            mode: "100644".to_owned(),
            kind: "blob".to_owned(),
            hash: hash.into(),
            name: name.into(),
        }
    }

    pub fn tree(hash: impl Into<String>, name: impl Into<String>) -> Self {
        TreeEntry {
            mode: "040000".to_owned(),
            kind: "tree".to_owned(),
            hash: hash.into(),
            name: name.into(),
        }
    }

    pub fn is_blob(&self) -> bool {
        self.kind == "blob"
    }
}

// Names may contain any byte except NUL, newlines included, hence (?s).
static LS_TREE_RECORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^(\S+) (\S+) (\S+)\t(.+)$").expect("ls-tree record regex")
});

/// Parse one NUL-terminated `ls-tree -z` record.
pub(crate) fn parse_ls_tree_record(record: &str) -> Option<TreeEntry> {
    let caps = LS_TREE_RECORD.captures(record)?;
    Some(TreeEntry {
        mode: caps[1].to_owned(),
        kind: caps[2].to_owned(),
        hash: caps[3].to_owned(),
        name: caps[4].to_owned(),
    })
}

/// Render entries as `git mktree -z` input. Rejects names containing `/`:
/// mktree would accept them and silently build a corrupt tree.
pub(crate) fn render_mktree_input(entries: &[TreeEntry]) -> Result<Vec<u8>, GitError> {
    let mut input = Vec::new();
    for entry in entries {
        if entry.name.contains('/') {
            return Err(GitError::InvalidTreeEntry {
                name: entry.name.clone(),
            });
        }
        input.extend_from_slice(entry.mode.as_bytes());
        input.push(b' ');
        input.extend_from_slice(entry.kind.as_bytes());
        input.push(b' ');
        input.extend_from_slice(entry.hash.as_bytes());
        input.push(b'\t');
        input.extend_from_slice(entry.name.as_bytes());
        input.push(0);
    }
    Ok(input)
}
