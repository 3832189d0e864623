//! Data carriers for casefiles, bookmarks, and shared-ref listings.
//!
//! A casefile is a JSON document holding a forest of bookmarks. Identity is
//! structural: two bookmarks are the same bookmark iff their contents match.
//! The only persistent home for these values is the git object store; nothing
//! here outlives the process.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Persistent `(commit, line)` identity attached to a bookmark.
///
/// `commit` is a full git object name (40 or 64 hex characters); abbreviated
/// names are rejected at construction so pegs survive repacking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkPeg {
    pub commit: String,
    pub line: u32,
}

impl BookmarkPeg {
    pub fn new(commit: impl Into<String>, line: u32) -> Option<Self> {
        let commit = commit.into();
        if is_full_object_name(&commit) {
            Some(BookmarkPeg { commit, line })
        } else {
            None
        }
    }
}

/// True iff `name` is a full (unabbreviated) git object name.
pub fn is_full_object_name(name: &str) -> bool {
    (name.len() == 40 || name.len() == 64) && name.bytes().all(|b| b.is_ascii_hexdigit())
}

/// A single bookmark: a file/line plus the text expected on that line.
///
/// Field order is load-bearing: serialization must be byte-stable so that
/// identical bookmark sets hash to identical git blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub file: String,
    pub line: u32,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Bookmark>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peg: Option<BookmarkPeg>,
}

impl Bookmark {
    pub fn new(file: impl Into<String>, line: u32, text: impl Into<String>) -> Self {
        Bookmark {
            file: file.into(),
            line,
            text: text.into(),
            children: Vec::new(),
            peg: None,
        }
    }
}

/// A casefile as handed to callers: its tree path plus the bookmark forest.
///
/// `path` is never stored inside the blob; it is derived from the tree
/// location and injected on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Casefile {
    #[serde(default)]
    pub path: String,
    pub bookmarks: Vec<Bookmark>,
}

/// On-disk blob shapes. Legacy blobs are a bare bookmark array; current
/// blobs wrap the array in an object. Both normalize to [`Casefile`].
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum CasefileBlob {
    Document { bookmarks: Vec<Bookmark> },
    Legacy(Vec<Bookmark>),
}

impl CasefileBlob {
    pub(crate) fn into_casefile(self, path: &str) -> Casefile {
        let bookmarks = match self {
            CasefileBlob::Document { bookmarks } => bookmarks,
            CasefileBlob::Legacy(bookmarks) => bookmarks,
        };
        Casefile {
            path: path.to_owned(),
            bookmarks,
        }
    }
}

/// The stored form of a casefile: `{"bookmarks": [...]}` compact JSON.
pub(crate) fn casefile_blob_bytes(bookmarks: &[Bookmark]) -> Vec<u8> {
    #[derive(Serialize)]
    struct Blob<'a> {
        bookmarks: &'a [Bookmark],
    }
    // Vec<u8> never fails to write and Bookmark has no non-string map keys.
    serde_json::to_vec(&Blob { bookmarks }).expect("bookmark serialization is infallible")
}

/// Split a casefile path into `(group, instance)` on the right-most `/`.
///
/// The group may itself contain `/`; the instance never does. Returns `None`
/// for paths without a separator, which cannot address a shared casefile.
pub fn split_path(path: &str) -> Option<(&str, &str)> {
    path.rsplit_once('/')
}

/// One shared casefile within a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasefileRef {
    pub group_name: String,
    pub instance: String,
}

impl CasefileRef {
    pub fn new(group_name: impl Into<String>, instance: impl Into<String>) -> Self {
        CasefileRef {
            group_name: group_name.into(),
            instance: instance.into(),
        }
    }

    /// The tree path of this casefile: `<group>/<instance>`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.group_name, self.instance)
    }
}

/// A group of shared casefiles, in the order git lists them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasefileGroup {
    pub name: String,
    pub instances: Vec<CasefileRef>,
}

/// A casefile recovered from the deletion history of the shared ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedCasefileRef {
    /// The commit that deleted the casefile.
    pub deletion_commit: String,
    /// When the deletion was committed.
    pub committed: OffsetDateTime,
    /// The path the casefile lived at.
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_splits_on_rightmost_slash() {
        assert_eq!(split_path("a/b"), Some(("a", "b")));
        assert_eq!(split_path("a group/with/depth/uuid"), Some(("a group/with/depth", "uuid")));
        assert_eq!(split_path("no-separator"), None);
    }

    #[test]
    fn ref_path_is_group_slash_instance() {
        let r = CasefileRef::new("a group/with/depth", "uuid");
        assert_eq!(r.path(), "a group/with/depth/uuid");
        let path = r.path();
        let (g, i) = split_path(&path).unwrap();
        assert_eq!(g, r.group_name);
        assert_eq!(i, r.instance);
    }

    #[test]
    fn peg_requires_full_object_name() {
        let full = "0123456789abcdef0123456789abcdef01234567";
        assert!(BookmarkPeg::new(full, 3).is_some());
        assert!(BookmarkPeg::new(&full[..12], 3).is_none());
        assert!(BookmarkPeg::new("z".repeat(40), 3).is_none());
        let sha256 = "0".repeat(64);
        assert!(BookmarkPeg::new(sha256, 1).is_some());
    }

    #[test]
    fn legacy_blob_normalizes_to_document() {
        let legacy: CasefileBlob =
            serde_json::from_str(r#"[{"file":"a.rs","line":3,"text":"fn"}]"#).unwrap();
        let cf = legacy.into_casefile("g/i");
        assert_eq!(cf.path, "g/i");
        assert_eq!(cf.bookmarks.len(), 1);

        let doc: CasefileBlob =
            serde_json::from_str(r#"{"bookmarks":[{"file":"a.rs","line":3,"text":"fn"}]}"#)
                .unwrap();
        let cf2 = doc.into_casefile("g/i");
        assert_eq!(cf, cf2);
    }

    #[test]
    fn blob_bytes_are_compact_and_stable() {
        let mut b = Bookmark::new("src/lib.rs", 10, "hello");
        b.peg = BookmarkPeg::new("0123456789abcdef0123456789abcdef01234567", 9);
        let bytes = casefile_blob_bytes(std::slice::from_ref(&b));
        let expected = concat!(
            r#"{"bookmarks":[{"file":"src/lib.rs","line":10,"text":"hello","#,
            r#""peg":{"commit":"0123456789abcdef0123456789abcdef01234567","line":9}}]}"#
        );
        assert_eq!(String::from_utf8(bytes).unwrap(), expected);

        // Empty children and absent pegs are omitted entirely.
        let plain = Bookmark::new("a", 1, "t");
        let bytes = casefile_blob_bytes(&[plain]);
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"bookmarks":[{"file":"a","line":1,"text":"t"}]}"#
        );
    }

    #[test]
    fn blob_roundtrip_preserves_forest() {
        let mut root = Bookmark::new("a.rs", 1, "root");
        root.children.push(Bookmark::new("b.rs", 2, "leaf"));
        let bytes = casefile_blob_bytes(std::slice::from_ref(&root));
        let blob: CasefileBlob = serde_json::from_slice(&bytes).unwrap();
        let cf = blob.into_casefile("g/i");
        assert_eq!(cf.bookmarks, vec![root]);
    }
}
