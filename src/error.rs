//! Error taxonomy for the supervision core.
//!
//! Per-task failures (`Directory`, `Launch`, `Kill`) abort only the operation that
//! raised them. `InvariantViolation` marks an internal bug and is never swallowed.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The working directory is missing or cannot be entered.
    #[error("working directory {} is not usable: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The OS refused to create the process.
    #[error("failed to launch {task} ({command}): {source}")]
    Launch {
        task: String,
        command: String,
        #[source]
        source: io::Error,
    },

    /// The kill request was rejected and the process is still alive.
    #[error("failed to kill {task} (pid {pid}): {source}")]
    Kill {
        task: String,
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("no task at index {0}")]
    UnknownTask(usize),

    #[error(transparent)]
    Bulk(#[from] BulkFailure),
}

/// A failure attributed to one task inside a bulk operation.
#[derive(Debug)]
pub struct TaskFailure {
    pub index: usize,
    pub name: String,
    pub error: SupervisorError,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.error)
    }
}

/// Every per-task failure collected by `start_all` / `kill_all`.
#[derive(Debug)]
pub struct BulkFailure {
    pub operation: &'static str,
    pub succeeded: usize,
    pub failures: Vec<TaskFailure>,
}

impl fmt::Display for BulkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} of {} task(s) failed",
            self.operation,
            self.failures.len(),
            self.failures.len() + self.succeeded
        )?;
        for failure in &self.failures {
            write!(f, "\n  - {}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for BulkFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_failure_lists_every_task() {
        let failure = BulkFailure {
            operation: "start all",
            succeeded: 2,
            failures: vec![TaskFailure {
                index: 1,
                name: "api".to_string(),
                error: SupervisorError::Directory {
                    path: PathBuf::from("/missing"),
                    source: io::Error::from(io::ErrorKind::NotFound),
                },
            }],
        };
        let rendered = failure.to_string();
        assert!(rendered.starts_with("start all: 1 of 3 task(s) failed"));
        assert!(rendered.contains("\n  - api: working directory /missing is not usable"));
    }
}
