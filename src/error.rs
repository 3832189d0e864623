//! Crate-level convenience error.
//!
//! Not a "god error": a thin wrapper over the per-module errors, for
//! callers that drive several subsystems through one `Result` type.

use thiserror::Error;

use crate::diff::DiffError;
use crate::git::GitError;
use crate::janitor::CleanupError;
use crate::relocate::RelocateError;
use crate::runner::RunError;
use crate::stream::StreamError;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    Cleanup(#[from] CleanupError),

    #[error(transparent)]
    Diff(#[from] DiffError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Relocate(#[from] RelocateError),
}
