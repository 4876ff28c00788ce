//! The per-task state machine: `Idle -> Running -> Idle`.
//!
//! A task owns its child process exclusively while running. The handle lives inside the
//! `Running` variant, so "handle present" and "state is running" cannot disagree. All
//! operations take `&self`; the mutable state sits behind a per-task mutex and only
//! `start` additionally contends on the process-wide launch lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::error::SupervisorError;
use crate::process::{ExitOutcome, TaskDescriptor, TaskSnapshot, TaskState, Visibility};
use crate::runner::{self, ProcessHandle};

/// A supervised task.
#[derive(Debug)]
pub struct Task {
    descriptor: Arc<TaskDescriptor>,
    inner: Mutex<TaskInner>,
}

#[derive(Debug)]
struct TaskInner {
    slot: Slot,
    selected: Visibility,
}

#[derive(Debug)]
enum Slot {
    Idle {
        last_pid: Option<u32>,
        last_exit: Option<ExitOutcome>,
    },
    Running(RunningProcess),
}

#[derive(Debug)]
struct RunningProcess {
    child: Box<dyn ProcessHandle>,
    pid: u32,
    visibility: Visibility,
    started_at: Instant,
}

impl Task {
    pub fn new(descriptor: TaskDescriptor) -> Self {
        let selected = descriptor.default_visibility;
        Self {
            descriptor: Arc::new(descriptor),
            inner: Mutex::new(TaskInner {
                slot: Slot::Idle {
                    last_pid: None,
                    last_exit: None,
                },
                selected,
            }),
        }
    }

    pub fn descriptor(&self) -> &Arc<TaskDescriptor> {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn lock(&self) -> MutexGuard<'_, TaskInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> TaskState {
        match self.lock().slot {
            Slot::Idle { .. } => TaskState::Idle,
            Slot::Running(_) => TaskState::Running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    /// Pid of the live process.
    pub fn pid(&self) -> Option<u32> {
        match &self.lock().slot {
            Slot::Running(running) => Some(running.pid),
            Slot::Idle { .. } => None,
        }
    }

    pub fn selected_visibility(&self) -> Visibility {
        self.lock().selected
    }

    /// Chooses the visibility used by the next delegated start.
    pub fn set_selected_visibility(&self, visibility: Visibility) {
        self.lock().selected = visibility;
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let inner = self.lock();
        let (state, pid, last_exit, launched_visibility, uptime) = match &inner.slot {
            Slot::Running(running) => (
                TaskState::Running,
                Some(running.pid),
                None,
                Some(running.visibility),
                Some(running.started_at.elapsed()),
            ),
            Slot::Idle {
                last_pid,
                last_exit,
            } => (TaskState::Idle, *last_pid, *last_exit, None, None),
        };
        TaskSnapshot {
            name: self.descriptor.name.clone(),
            command: self.descriptor.command_line(),
            cwd: self.descriptor.cwd.clone(),
            state,
            pid,
            last_exit,
            selected_visibility: inner.selected,
            launched_visibility,
            uptime,
        }
    }

    /// Launches the task and returns its pid.
    ///
    /// Starting a task that is already running spawns nothing and returns the existing
    /// pid. On failure the task stays idle.
    pub fn start(&self, visibility: Visibility) -> Result<u32, SupervisorError> {
        let mut inner = self.lock();
        if let Slot::Running(running) = &inner.slot {
            debug!(task = %self.name(), pid = running.pid, "already running, start ignored");
            return Ok(running.pid);
        }

        let command = self.descriptor.command_line();
        info!(
            task = %self.name(),
            cwd = %self.descriptor.cwd.display(),
            command = %command,
            visibility = %visibility,
            show_window = visibility.show_window_code(),
            "starting task"
        );
        match runner::launch(&self.descriptor, visibility) {
            Ok(launched) => {
                info!(
                    task = %self.name(),
                    cwd = %launched.cwd.display(),
                    pid = launched.pid,
                    "task started"
                );
                let pid = launched.pid;
                inner.slot = Slot::Running(RunningProcess {
                    child: Box::new(launched.child),
                    pid,
                    visibility,
                    started_at: Instant::now(),
                });
                Ok(pid)
            }
            Err(err) => {
                error!(task = %self.name(), error = %err, "task failed to start");
                Err(err)
            }
        }
    }

    /// Forcefully terminates the running process. Idle tasks are left alone.
    ///
    /// Returns once the kill has been issued; the process is reaped in the background.
    /// A process that already exited counts as killed.
    pub fn kill(&self) -> Result<(), SupervisorError> {
        let mut inner = self.lock();
        let Slot::Running(running) = &mut inner.slot else {
            debug!(task = %self.name(), "not running, kill ignored");
            return Ok(());
        };
        let pid = running.pid;

        if let Ok(Some(status)) = running.child.try_wait() {
            let code = status.code();
            inner.slot = Slot::Idle {
                last_pid: Some(pid),
                last_exit: Some(ExitOutcome::Exited { code }),
            };
            info!(task = %self.name(), pid, code = ?code, "task had already ended");
            return Ok(());
        }

        if let Err(source) = running.child.force_kill() {
            let Ok(Some(status)) = running.child.try_wait() else {
                warn!(task = %self.name(), pid, error = %source, "kill request failed");
                return Err(SupervisorError::Kill {
                    task: self.descriptor.name.clone(),
                    pid,
                    source,
                });
            };
            let code = status.code();
            inner.slot = Slot::Idle {
                last_pid: Some(pid),
                last_exit: Some(ExitOutcome::Exited { code }),
            };
            debug!(task = %self.name(), pid, code = ?code, "process exited before the kill landed");
            return Ok(());
        }

        inner.slot = Slot::Idle {
            last_pid: Some(pid),
            last_exit: Some(ExitOutcome::Killed),
        };
        info!(task = %self.name(), pid, "task killed");
        Ok(())
    }

    /// Checks, without blocking, whether the process has exited.
    ///
    /// Returns `true` when the task moved to `Idle` during this call.
    pub fn poll_liveness(&self) -> bool {
        let mut inner = self.lock();
        let Slot::Running(running) = &mut inner.slot else {
            return false;
        };
        let pid = running.pid;
        match running.child.try_wait() {
            Ok(None) => false,
            Ok(Some(status)) => {
                let code = status.code();
                inner.slot = Slot::Idle {
                    last_pid: Some(pid),
                    last_exit: Some(ExitOutcome::Exited { code }),
                };
                info!(task = %self.name(), pid, code = ?code, "task ended");
                true
            }
            Err(err) => {
                warn!(task = %self.name(), pid, error = %err, "liveness check failed");
                false
            }
        }
    }
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::os::unix::process::ExitStatusExt;
    use std::path::Path;
    use std::process::ExitStatus;
    use std::time::Duration;

    /// A process handle whose answers are scripted.
    #[derive(Debug, Default)]
    struct ScriptedProcess {
        waits: VecDeque<io::Result<Option<ExitStatus>>>,
        kill_error: Option<io::ErrorKind>,
    }

    impl ProcessHandle for ScriptedProcess {
        fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
            self.waits.pop_front().unwrap_or(Ok(None))
        }

        fn force_kill(&mut self) -> io::Result<()> {
            match self.kill_error {
                Some(kind) => Err(io::Error::from(kind)),
                None => Ok(()),
            }
        }
    }

    fn running_with(process: ScriptedProcess, pid: u32) -> Task {
        let task = Task::new(descriptor("scripted", Path::new("."), "sleep 30"));
        task.lock().slot = Slot::Running(RunningProcess {
            child: Box::new(process),
            pid,
            visibility: Visibility::Normal,
            started_at: Instant::now(),
        });
        task
    }

    fn exit_code(code: i32) -> ExitStatus {
        ExitStatus::from_raw(code << 8)
    }

    pub(crate) fn descriptor(name: &str, cwd: &Path, cmd: &str) -> TaskDescriptor {
        let mut parts = shell_words::split(cmd).unwrap();
        let program = parts.remove(0);
        TaskDescriptor {
            name: name.to_string(),
            program,
            args: parts,
            cwd: cwd.to_path_buf(),
            default_visibility: Visibility::Normal,
            auto_start: false,
        }
    }

    pub(crate) async fn wait_until_idle(task: &Task) {
        for _ in 0..250 {
            if task.poll_liveness() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{} never exited", task.name());
    }

    #[test]
    fn new_task_is_idle_and_kill_is_a_no_op() {
        let task = Task::new(descriptor("idle", Path::new("."), "sleep 30"));
        assert_eq!(task.state(), TaskState::Idle);
        assert_eq!(task.pid(), None);
        assert!(task.kill().is_ok());
        assert!(!task.poll_liveness());
        assert_eq!(task.state(), TaskState::Idle);
        assert_eq!(task.snapshot().last_exit, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_twice_does_not_spawn_a_second_process() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task::new(descriptor("sleeper", dir.path(), "sleep 30"));
        let pid = task.start(Visibility::Normal).unwrap();
        assert_eq!(task.state(), TaskState::Running);
        assert_eq!(task.pid(), Some(pid));

        let again = task.start(Visibility::Hidden).unwrap();
        assert_eq!(again, pid);
        assert_eq!(task.snapshot().launched_visibility, Some(Visibility::Normal));

        task.kill().unwrap();
        assert_eq!(task.state(), TaskState::Idle);
        assert_eq!(task.pid(), None);
        let snapshot = task.snapshot();
        assert_eq!(snapshot.pid, Some(pid));
        assert_eq!(snapshot.last_exit, Some(ExitOutcome::Killed));
        assert!(task.kill().is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn polling_detects_exit_and_records_the_code() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task::new(descriptor("short", dir.path(), "sh -c 'exit 3'"));
        let pid = task.start(Visibility::Normal).unwrap();
        wait_until_idle(&task).await;
        assert_eq!(task.state(), TaskState::Idle);
        assert_eq!(task.pid(), None);
        let snapshot = task.snapshot();
        assert_eq!(snapshot.pid, Some(pid));
        assert_eq!(snapshot.last_exit, Some(ExitOutcome::Exited { code: Some(3) }));
        assert!(!task.poll_liveness());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn task_can_be_restarted_after_it_exits() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task::new(descriptor("again", dir.path(), "true"));
        task.start(Visibility::Normal).unwrap();
        wait_until_idle(&task).await;
        task.start(Visibility::Normal).unwrap();
        assert_eq!(task.state(), TaskState::Running);
        assert_eq!(task.snapshot().last_exit, None);
        wait_until_idle(&task).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn kill_after_silent_exit_reports_the_exit() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task::new(descriptor("quick", dir.path(), "true"));
        task.start(Visibility::Normal).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        task.kill().unwrap();
        assert_eq!(task.state(), TaskState::Idle);
        assert!(task.snapshot().last_exit.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_start_leaves_the_task_idle() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task::new(descriptor("lost", &dir.path().join("missing"), "true"));
        let err = task.start(Visibility::Normal).unwrap_err();
        assert!(matches!(err, SupervisorError::Directory { .. }));
        assert_eq!(task.state(), TaskState::Idle);
        assert_eq!(task.snapshot().pid, None);

        let ghost = Task::new(descriptor("ghost", dir.path(), "no-such-binary-4711"));
        let err = ghost.start(Visibility::Normal).unwrap_err();
        assert!(matches!(err, SupervisorError::Launch { .. }));
        assert_eq!(ghost.state(), TaskState::Idle);
    }

    #[test]
    fn undeliverable_kill_keeps_the_task_running() {
        let task = running_with(
            ScriptedProcess {
                kill_error: Some(io::ErrorKind::PermissionDenied),
                ..Default::default()
            },
            4242,
        );
        let err = task.kill().unwrap_err();
        assert!(matches!(err, SupervisorError::Kill { pid: 4242, .. }));
        assert_eq!(task.state(), TaskState::Running);
        assert_eq!(task.pid(), Some(4242));
    }

    #[test]
    fn failed_kill_of_an_exited_process_keeps_its_exit_code() {
        let task = running_with(
            ScriptedProcess {
                waits: VecDeque::from([Ok(None), Ok(Some(exit_code(7)))]),
                kill_error: Some(io::ErrorKind::InvalidInput),
            },
            99,
        );
        task.kill().unwrap();
        let snapshot = task.snapshot();
        assert_eq!(snapshot.state, TaskState::Idle);
        assert_eq!(snapshot.pid, Some(99));
        assert_eq!(snapshot.last_exit, Some(ExitOutcome::Exited { code: Some(7) }));
    }

    #[test]
    fn liveness_error_counts_as_no_change() {
        let task = running_with(
            ScriptedProcess {
                waits: VecDeque::from([
                    Err(io::Error::from(io::ErrorKind::Interrupted)),
                    Ok(Some(exit_code(0))),
                ]),
                ..Default::default()
            },
            7,
        );
        assert!(!task.poll_liveness());
        assert_eq!(task.state(), TaskState::Running);
        assert!(task.poll_liveness());
        assert_eq!(task.snapshot().last_exit, Some(ExitOutcome::Exited { code: Some(0) }));
    }

    #[test]
    fn selected_visibility_starts_at_the_default() {
        let mut desc = descriptor("vis", Path::new("."), "true");
        desc.default_visibility = Visibility::Minimized;
        let task = Task::new(desc);
        assert_eq!(task.selected_visibility(), Visibility::Minimized);
        task.set_selected_visibility(Visibility::Hidden);
        assert_eq!(task.snapshot().selected_visibility, Visibility::Hidden);
    }
}
