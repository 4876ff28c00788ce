//! The set of supervised tasks and the bulk operations over it.
//!
//! The task list is fixed once `build` returns; after that any number of threads may
//! read it and invoke task operations concurrently through a shared reference.

use std::fmt;

use tracing::{info, warn};

use crate::error::{BulkFailure, SupervisorError, TaskFailure};
use crate::process::{TaskDescriptor, TaskSnapshot, Visibility};
use crate::task::Task;

/// Visibility policy for `start_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartAllMode {
    /// Each task uses its own selected visibility.
    #[default]
    Delegate,
    /// Every task started uses this visibility.
    Force(Visibility),
}

impl StartAllMode {
    pub const ALL: [StartAllMode; 5] = [
        StartAllMode::Delegate,
        StartAllMode::Force(Visibility::Hidden),
        StartAllMode::Force(Visibility::Minimized),
        StartAllMode::Force(Visibility::Normal),
        StartAllMode::Force(Visibility::Maximized),
    ];

    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|mode| *mode == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

impl fmt::Display for StartAllMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartAllMode::Delegate => f.write_str("per task"),
            StartAllMode::Force(visibility) => write!(f, "all {}", visibility),
        }
    }
}

/// Ordered, fixed collection of tasks.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<Task>,
}

impl TaskRegistry {
    /// Creates one task per descriptor, in order, then auto-starts the flagged ones.
    ///
    /// Auto-start failures are isolated per task: they are logged and returned, and the
    /// registry is built regardless.
    pub fn build(descriptors: Vec<TaskDescriptor>) -> (Self, Vec<TaskFailure>) {
        let registry = Self {
            tasks: descriptors.into_iter().map(Task::new).collect(),
        };
        let mut failures = Vec::new();
        for (index, task) in registry.tasks.iter().enumerate() {
            let descriptor = task.descriptor();
            if !descriptor.auto_start {
                continue;
            }
            if let Err(error) = task.start(descriptor.default_visibility) {
                warn!(task = %task.name(), error = %error, "auto-start failed");
                failures.push(TaskFailure {
                    index,
                    name: task.name().to_string(),
                    error,
                });
            }
        }
        info!(
            tasks = registry.tasks.len(),
            failed = failures.len(),
            "registry built"
        );
        (registry, failures)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn get(&self, index: usize) -> Option<&Task> {
        self.tasks.get(index)
    }

    fn task(&self, index: usize) -> Result<&Task, SupervisorError> {
        self.get(index).ok_or(SupervisorError::UnknownTask(index))
    }

    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        self.tasks.iter().map(Task::snapshot).collect()
    }

    /// Starts one task with an explicit visibility.
    pub fn start(&self, index: usize, visibility: Visibility) -> Result<u32, SupervisorError> {
        self.task(index)?.start(visibility)
    }

    /// Starts one task with its own selected visibility.
    pub fn start_selected(&self, index: usize) -> Result<u32, SupervisorError> {
        let task = self.task(index)?;
        task.start(task.selected_visibility())
    }

    pub fn kill(&self, index: usize) -> Result<(), SupervisorError> {
        self.task(index)?.kill()
    }

    /// Polls every task; returns the indices of those that stopped since the last poll.
    pub fn poll_all(&self) -> Vec<usize> {
        self.tasks
            .iter()
            .enumerate()
            .filter_map(|(index, task)| task.poll_liveness().then_some(index))
            .collect()
    }

    /// Starts every idle task, attempting all of them even after a failure.
    ///
    /// Returns the number of tasks started.
    pub fn start_all(&self, mode: StartAllMode) -> Result<usize, BulkFailure> {
        let mut started = 0;
        let mut failures = Vec::new();
        for (index, task) in self.tasks.iter().enumerate() {
            if task.is_running() {
                continue;
            }
            let visibility = match mode {
                StartAllMode::Delegate => task.selected_visibility(),
                StartAllMode::Force(visibility) => visibility,
            };
            match task.start(visibility) {
                Ok(_) => started += 1,
                Err(error) => failures.push(TaskFailure {
                    index,
                    name: task.name().to_string(),
                    error,
                }),
            }
        }
        finish_bulk("start all", started, failures)
    }

    /// Kills every running task, attempting all of them even after a failure.
    ///
    /// Returns the number of tasks killed.
    pub fn kill_all(&self) -> Result<usize, BulkFailure> {
        let mut killed = 0;
        let mut failures = Vec::new();
        for (index, task) in self.tasks.iter().enumerate() {
            if !task.is_running() {
                continue;
            }
            match task.kill() {
                Ok(()) => killed += 1,
                Err(error) => failures.push(TaskFailure {
                    index,
                    name: task.name().to_string(),
                    error,
                }),
            }
        }
        finish_bulk("kill all", killed, failures)
    }

    pub fn any_running(&self) -> bool {
        self.tasks.iter().any(Task::is_running)
    }

    pub fn any_idle(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_running())
    }

    /// Name and pid of every running task.
    pub fn running(&self) -> Vec<(String, u32)> {
        self.tasks
            .iter()
            .filter_map(|task| task.pid().map(|pid| (task.name().to_string(), pid)))
            .collect()
    }
}

fn finish_bulk(
    operation: &'static str,
    succeeded: usize,
    failures: Vec<TaskFailure>,
) -> Result<usize, BulkFailure> {
    if failures.is_empty() {
        return Ok(succeeded);
    }
    let failure = BulkFailure {
        operation,
        succeeded,
        failures,
    };
    warn!(error = %failure, "bulk operation incomplete");
    Err(failure)
}
