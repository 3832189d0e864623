#![forbid(unsafe_code)]

pub mod casefile;
pub mod config;
pub mod diff;
pub mod error;
pub mod git;
pub mod janitor;
pub mod keeper;
pub mod relocate;
pub mod runner;
pub mod stream;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the working vocabulary at the crate root.
pub use crate::casefile::{
    Bookmark, BookmarkPeg, Casefile, CasefileGroup, CasefileRef, DeletedCasefileRef, split_path,
};
pub use crate::config::DriverConfig;
pub use crate::diff::{Change, Content, DiffDriver, DiffError};
pub use crate::git::{
    GIT_EMPTY_TREE, GitDriver, GitError, PushSource, PushSpec, REFERENCED_COMMITS_PREFIX,
    SHARED_CASEFILES_REF, ShareOutcome, TreeEntry,
};
pub use crate::janitor::{CleanupError, Janitor};
pub use crate::keeper::{CasefileKeeper, CommitsKnown, GitRemote};
pub use crate::relocate::{
    CurrentLineRange, LinePeg, MarkLocation, RelocateError, Relocator, UNTRACKED_WINDOW_SIZE,
};
pub use crate::runner::{
    CommandRunner, Invocation, OptStyle, Options, RunError, RunnerOptions, StdoutSink, Tracer,
};
pub use crate::stream::{Encoding, RecordStream, SepMatch, Separator, StopToken, StreamError};
