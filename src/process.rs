//! Data structures describing supervised tasks.
//!
//! `TaskDescriptor` is the immutable definition loaded from configuration, `Visibility`
//! is the window-show policy applied at launch, and `TaskSnapshot` is the read-only view
//! handed to the presentation layer.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Immutable definition of one supervised command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    /// Display name; not required to be unique.
    pub name: String,
    /// The executable.
    pub program: String,
    /// Arguments for the executable.
    pub args: Vec<String>,
    /// Directory the process is launched in. Relative paths resolve against the startup directory.
    pub cwd: PathBuf,
    /// Visibility used for auto-start and as the initial per-task selection.
    pub default_visibility: Visibility,
    /// Start as soon as the registry is built.
    pub auto_start: bool,
}

impl TaskDescriptor {
    /// Program and arguments, shell-quoted for display.
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(1 + self.args.len());
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        shell_words::join(parts)
    }
}

// Win32 ShowWindow codes.
const SW_HIDE: u16 = 0;
const SW_NORMAL: u16 = 1;
const SW_MAXIMIZE: u16 = 3;
const SW_MINIMIZE: u16 = 6;

/// Initial presentation of a spawned process's window.
///
/// Applied once, at process creation. Config files encode it as `0..=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "u8")]
pub enum Visibility {
    Hidden,
    Minimized,
    #[default]
    Normal,
    Maximized,
}

impl Visibility {
    pub const ALL: [Visibility; 4] = [
        Visibility::Hidden,
        Visibility::Minimized,
        Visibility::Normal,
        Visibility::Maximized,
    ];

    pub fn from_setting(value: u8) -> Option<Self> {
        Self::ALL.get(usize::from(value)).copied()
    }

    pub fn setting(self) -> u8 {
        match self {
            Visibility::Hidden => 0,
            Visibility::Minimized => 1,
            Visibility::Normal => 2,
            Visibility::Maximized => 3,
        }
    }

    /// The next value in `ALL`, wrapping around.
    pub fn next(self) -> Self {
        let idx = (usize::from(self.setting()) + 1) % Self::ALL.len();
        Self::ALL[idx]
    }

    pub fn label(self) -> &'static str {
        match self {
            Visibility::Hidden => "hidden",
            Visibility::Minimized => "minimized",
            Visibility::Normal => "normal",
            Visibility::Maximized => "maximized",
        }
    }

    /// The `ShowWindow` directive this visibility corresponds to.
    pub fn show_window_code(self) -> u16 {
        match self {
            Visibility::Hidden => SW_HIDE,
            Visibility::Minimized => SW_MINIMIZE,
            Visibility::Normal => SW_NORMAL,
            Visibility::Maximized => SW_MAXIMIZE,
        }
    }

    /// Process creation flags: hidden tasks get no console at all, the rest get their own.
    ///
    /// Minimized, normal and maximized are indistinguishable here: the std/tokio process
    /// builders expose no stable way to set `STARTUPINFO.wShowWindow`, so the
    /// `show_window_code` is only logged. Windows opens the new console in its default state.
    #[cfg(windows)]
    pub fn creation_flags(self) -> u32 {
        use windows_sys::Win32::System::Threading::{CREATE_NEW_CONSOLE, CREATE_NO_WINDOW};
        match self {
            Visibility::Hidden => CREATE_NO_WINDOW,
            _ => CREATE_NEW_CONSOLE,
        }
    }
}

impl TryFrom<u8> for Visibility {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_setting(value)
            .ok_or_else(|| format!("window setting {} out of range (expected 0..=3)", value))
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Idle => f.write_str("idle"),
            TaskState::Running => f.write_str("running"),
        }
    }
}

/// How the last run of a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Observed by polling. `None` means the process was terminated by a signal.
    Exited { code: Option<i32> },
    /// Terminated by `kill`.
    Killed,
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Exited { code: Some(code) } => write!(f, "exited with code {}", code),
            ExitOutcome::Exited { code: None } => f.write_str("terminated by signal"),
            ExitOutcome::Killed => f.write_str("killed"),
        }
    }
}

/// Point-in-time view of a task for rendering.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub name: String,
    pub command: String,
    pub cwd: PathBuf,
    pub state: TaskState,
    /// Pid of the live process, or of the last one until the next start.
    pub pid: Option<u32>,
    pub last_exit: Option<ExitOutcome>,
    /// Visibility the next single-task start will use.
    pub selected_visibility: Visibility,
    /// Visibility the running process was launched with.
    pub launched_visibility: Option<Visibility>,
    pub uptime: Option<Duration>,
}

impl TaskSnapshot {
    pub fn is_running(&self) -> bool {
        self.state == TaskState::Running
    }
}
