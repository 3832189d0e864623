//! Scoped acquisition and release of resources with aggregated errors.
//!
//! Callers push zero-argument cleanup tasks as they acquire resources; the
//! janitor releases them afterwards on both success and failure paths. A
//! single failing task surfaces as-is (labelled); several failures are
//! aggregated so none is silently dropped.

use std::thread;

use thiserror::Error;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;
type Task = Box<dyn FnOnce() -> Result<(), BoxedError> + Send>;

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("cleanup task {task:?} failed: {source}")]
    Task {
        /// Label of the offending task.
        task: String,
        source: BoxedError,
    },
    #[error("{} cleanup tasks failed", errors.len())]
    Multiple { errors: Vec<CleanupError> },
}

fn aggregate(mut errors: Vec<CleanupError>) -> Result<(), CleanupError> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(CleanupError::Multiple { errors }),
    }
}

/// A stack of labelled cleanup tasks.
#[derive(Default)]
pub struct Janitor {
    tasks: Vec<(String, Task)>,
}

impl Janitor {
    pub fn new() -> Self {
        Janitor::default()
    }

    pub fn add_task(
        &mut self,
        label: impl Into<String>,
        task: impl FnOnce() -> Result<(), BoxedError> + Send + 'static,
    ) {
        self.tasks.push((label.into(), Box::new(task)));
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run all tasks in LIFO order on the calling thread.
    pub fn clean_up_sync(&mut self) -> Result<(), CleanupError> {
        let mut errors = Vec::new();
        while let Some((label, task)) = self.tasks.pop() {
            if let Err(source) = task() {
                errors.push(CleanupError::Task { task: label, source });
            }
        }
        aggregate(errors)
    }

    /// Run all tasks concurrently, one thread each, and wait for all of them.
    pub fn clean_up_async(&mut self) -> Result<(), CleanupError> {
        let tasks = std::mem::take(&mut self.tasks);
        let mut errors = Vec::new();
        thread::scope(|scope| {
            let handles: Vec<_> = tasks
                .into_iter()
                .map(|(label, task)| (label, scope.spawn(task)))
                .collect();
            for (label, handle) in handles {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(source)) => errors.push(CleanupError::Task { task: label, source }),
                    Err(_panic) => errors.push(CleanupError::Task {
                        task: label,
                        source: "cleanup task panicked".into(),
                    }),
                }
            }
        });
        aggregate(errors)
    }
}
