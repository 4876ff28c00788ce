//! Process creation and termination.
//!
//! Every launch runs under the working-directory lock: enter the task's directory,
//! spawn, return. The child is detached from the supervisor's terminal (its own session
//! on Unix, its own console or none on Windows) so it outlives the supervisor unless
//! it is killed explicitly.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};

use crate::error::SupervisorError;
use crate::process::{TaskDescriptor, Visibility};
use crate::workdir::WorkingDirectoryStack;

/// A freshly spawned task process.
#[derive(Debug)]
pub struct Launched {
    pub child: Child,
    pub pid: u32,
    /// The resolved directory the process was started in.
    pub cwd: PathBuf,
}

/// Spawns `descriptor` in its working directory with the requested visibility.
///
/// Must be called from within a tokio runtime.
pub fn launch(
    descriptor: &TaskDescriptor,
    visibility: Visibility,
) -> Result<Launched, SupervisorError> {
    launch_with(descriptor, |cwd| spawn_detached(descriptor, visibility, cwd))
}

/// Holds the launch lock around `spawn`, which receives the resolved directory while
/// the process cwd is set to it.
pub(crate) fn launch_with<F>(
    descriptor: &TaskDescriptor,
    spawn: F,
) -> Result<Launched, SupervisorError>
where
    F: FnOnce(&Path) -> Result<Child, SupervisorError>,
{
    let mut stack = WorkingDirectoryStack::lock_shared();
    if stack.depth() != 1 {
        return Err(SupervisorError::InvariantViolation(format!(
            "launch of {} found the working directory stack {} deep",
            descriptor.name,
            stack.depth()
        )));
    }
    launch_in(&mut stack, descriptor, spawn)
}

fn launch_in<F>(
    stack: &mut WorkingDirectoryStack,
    descriptor: &TaskDescriptor,
    spawn: F,
) -> Result<Launched, SupervisorError>
where
    F: FnOnce(&Path) -> Result<Child, SupervisorError>,
{
    let mut spawned = None;
    let entered = stack.scoped(&descriptor.cwd, |cwd| {
        spawned = Some(spawn(cwd)?);
        Ok(cwd.to_path_buf())
    });
    let cwd = match entered {
        Ok(cwd) => cwd,
        Err(err) => {
            // The child started but the directory could not be restored; nobody would own it.
            if let Some(mut child) = spawned {
                let _ = force_kill(&mut child);
            }
            return Err(err);
        }
    };
    let Some(child) = spawned else {
        return Err(SupervisorError::InvariantViolation(format!(
            "launch of {} returned without a child",
            descriptor.name
        )));
    };
    let Some(pid) = child.id() else {
        return Err(SupervisorError::InvariantViolation(format!(
            "spawned {} but the child reports no pid",
            descriptor.name
        )));
    };
    Ok(Launched { child, pid, cwd })
}

fn spawn_detached(
    descriptor: &TaskDescriptor,
    visibility: Visibility,
    cwd: &Path,
) -> Result<Child, SupervisorError> {
    let mut command = Command::new(&descriptor.program);
    command
        .args(&descriptor.args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    command.kill_on_drop(false);

    #[cfg(windows)]
    {
        command.creation_flags(visibility.creation_flags());
    }

    #[cfg(unix)]
    {
        // No window exists on Unix; visibility only shows up in the logs.
        let _ = visibility;
        unsafe {
            command.pre_exec(|| {
                // New session: no controlling terminal, and the child leads its own process group.
                let _ = libc::setsid();
                Ok(())
            });
        }
    }

    command.spawn().map_err(|source| SupervisorError::Launch {
        task: descriptor.name.clone(),
        command: descriptor.command_line(),
        source,
    })
}

/// The operations a task needs on the process it owns.
pub trait ProcessHandle: fmt::Debug + Send {
    /// Reaps the process if it has exited. Never blocks.
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;

    /// Issues a forceful termination without waiting for the process to be reaped.
    fn force_kill(&mut self) -> io::Result<()>;
}

impl ProcessHandle for Child {
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        Child::try_wait(self)
    }

    fn force_kill(&mut self) -> io::Result<()> {
        force_kill(self)
    }
}

/// Issues a forceful termination without waiting for the process to be reaped.
pub fn force_kill(child: &mut Child) -> io::Result<()> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            kill_process_group(pid);
        }
    }
    child.start_kill()
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    unsafe {
        let _ = libc::kill(-pid, libc::SIGKILL);
    }
}
