//! Git integration: subprocess plumbing over the shared-casefiles ref.
//!
//! Provides:
//! - `GitDriver` - every git invocation, plus the share/delete pipelines
//! - ls-tree / mktree tree handling
//! - log parsers (authors, commit dates, deletion history)
//! - blame parsers for line tracking

mod blame;
mod driver;
pub mod error;
mod log;
mod tree;

pub use driver::{
    GitDriver, PushSource, PushSpec, REFERENCED_COMMITS_PREFIX, SHARED_CASEFILES_REF, ShareOutcome,
};
pub use error::GitError;
pub use tree::{GIT_EMPTY_TREE, TreeEntry};
