//! Application state and UI logic.
//!
//! `App` mirrors the registry as a list of snapshots refreshed every poll tick, holds the
//! selection and the start-all mode, and translates key presses into `AppAction`s. It
//! never touches processes itself; `main` carries actions out against the registry.

use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::error::TaskFailure;
use crate::events::ActionOutcome;
use crate::output::{ActivityLevel, ActivityLog};
use crate::process::{ExitOutcome, TaskSnapshot};
use crate::registry::StartAllMode;

/// The main application state container.
#[derive(Debug)]
pub struct App {
    /// Latest view of every task, in registry order.
    pub tasks: Vec<TaskSnapshot>,
    /// Index of the currently selected task.
    pub selected: usize,
    /// Visibility policy for start-all.
    pub start_all_mode: StartAllMode,
    /// Flag indicating if the application should exit.
    pub should_quit: bool,
    /// Whether to show the help overlay.
    pub show_help: bool,
    /// Whether to use Unicode symbols.
    pub use_symbols: bool,
    /// Supervisor messages, newest last.
    pub activity: ActivityLog,
    status_message: Option<StatusMessage>,
}

/// Actions resulting from user interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    /// No action required.
    None,
    /// Exit the application.
    Quit,
    /// Start a task with its selected visibility.
    Start(usize),
    /// Kill a task.
    Kill(usize),
    /// Advance a task's selected visibility.
    CycleVisibility(usize),
    /// Start every idle task.
    StartAll(StartAllMode),
    /// Kill every running task.
    KillAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Warning,
}

#[derive(Debug)]
struct StatusMessage {
    text: String,
    at: Instant,
    ttl: Option<Duration>,
    level: StatusLevel,
}

impl App {
    /// Creates a new `App` instance.
    pub fn new(tasks: Vec<TaskSnapshot>, max_activity: usize, use_symbols: bool) -> Self {
        Self {
            tasks,
            selected: 0,
            start_all_mode: StartAllMode::Delegate,
            should_quit: false,
            show_help: false,
            use_symbols,
            activity: ActivityLog::new(max_activity),
            status_message: None,
        }
    }

    pub fn selected_task(&self) -> Option<&TaskSnapshot> {
        self.tasks.get(self.selected)
    }

    pub fn any_running(&self) -> bool {
        self.tasks.iter().any(TaskSnapshot::is_running)
    }

    pub fn any_idle(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_running())
    }

    /// Replaces the task view with fresh snapshots.
    pub fn refresh(&mut self, tasks: Vec<TaskSnapshot>) {
        self.tasks = tasks;
        if self.selected >= self.tasks.len() {
            self.selected = self.tasks.len().saturating_sub(1);
        }
    }

    fn task_name(&self, id: usize) -> &str {
        self.tasks
            .get(id)
            .map(|task| task.name.as_str())
            .unwrap_or("task")
    }

    /// Records a task the poller found stopped.
    pub fn on_task_ended(&mut self, id: usize) {
        let Some(task) = self.tasks.get(id) else {
            return;
        };
        let outcome = task
            .last_exit
            .map(|exit| exit.to_string())
            .unwrap_or_else(|| "ended".to_string());
        let level = match task.last_exit {
            Some(ExitOutcome::Exited { code: Some(0) }) | Some(ExitOutcome::Killed) => {
                ActivityLevel::Info
            }
            _ => ActivityLevel::Error,
        };
        let message = format!("{} {}", task.name, outcome);
        self.activity.push(level, message.clone());
        self.set_status_message(message);
    }

    /// Records auto-start failures reported by the registry build and selects the first
    /// task that failed.
    pub fn on_build_failures(&mut self, failures: &[TaskFailure]) {
        for failure in failures {
            self.activity.push(
                ActivityLevel::Error,
                format!("{} failed to auto-start: {}", failure.name, failure.error),
            );
        }
        let Some(first) = failures.first() else {
            return;
        };
        if first.index < self.tasks.len() {
            self.selected = first.index;
        }
        self.set_status_warning_persistent(format!(
            "{} task(s) failed to auto-start",
            failures.len()
        ));
    }

    pub fn on_action_outcome(&mut self, outcome: ActionOutcome) {
        match outcome {
            ActionOutcome::Started { id, pid } => {
                let message = format!("{} started, pid: {}", self.task_name(id), pid);
                self.activity.push(ActivityLevel::Info, message.clone());
                self.set_status_message(message);
            }
            ActionOutcome::Killed { id } => {
                let message = format!("{} killed", self.task_name(id));
                self.activity.push(ActivityLevel::Info, message.clone());
                self.set_status_message(message);
            }
            ActionOutcome::StartedAll { count } => {
                let message = format!("started {} task(s)", count);
                self.activity.push(ActivityLevel::Info, message.clone());
                self.set_status_message(message);
            }
            ActionOutcome::KilledAll { count } => {
                let message = format!("killed {} task(s)", count);
                self.activity.push(ActivityLevel::Info, message.clone());
                self.set_status_message(message);
            }
            ActionOutcome::Failed { id, error } => {
                for line in error.lines() {
                    self.activity.push(ActivityLevel::Error, line.trim().to_string());
                }
                let subject = id.map(|id| self.task_name(id).to_string());
                let message = match subject {
                    Some(name) => format!("{} failed: {}", name, first_line(&error)),
                    None => first_line(&error).to_string(),
                };
                self.set_status_warning_for(message, Duration::from_secs(5));
            }
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> AppAction {
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                AppAction::Quit
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true;
                AppAction::Quit
            }
            KeyCode::Esc if self.show_help => {
                self.show_help = false;
                AppAction::None
            }
            KeyCode::Char('?') => {
                self.show_help = !self.show_help;
                AppAction::None
            }
            KeyCode::Up => {
                if self.selected > 0 {
                    self.selected -= 1;
                }
                AppAction::None
            }
            KeyCode::Down => {
                if self.selected + 1 < self.tasks.len() {
                    self.selected += 1;
                }
                AppAction::None
            }
            KeyCode::Tab => {
                if !self.tasks.is_empty() {
                    self.selected = (self.selected + 1) % self.tasks.len();
                }
                AppAction::None
            }
            KeyCode::Char('r') | KeyCode::Enter => {
                let Some(task) = self.selected_task() else {
                    return AppAction::None;
                };
                if task.is_running() {
                    let message = format!("{} is already running", task.name);
                    self.set_status_message(message);
                    return AppAction::None;
                }
                AppAction::Start(self.selected)
            }
            KeyCode::Char('k') => {
                let Some(task) = self.selected_task() else {
                    return AppAction::None;
                };
                if !task.is_running() {
                    let message = format!("{} is not running", task.name);
                    self.set_status_message(message);
                    return AppAction::None;
                }
                AppAction::Kill(self.selected)
            }
            KeyCode::Char('v') => {
                let Some(task) = self.selected_task() else {
                    return AppAction::None;
                };
                if task.is_running() {
                    let message = format!("kill {} before changing its visibility", task.name);
                    self.set_status_message(message);
                    return AppAction::None;
                }
                AppAction::CycleVisibility(self.selected)
            }
            KeyCode::Char('m') => {
                self.start_all_mode = self.start_all_mode.next();
                self.set_status_message(format!("start all: {}", self.start_all_mode));
                AppAction::None
            }
            KeyCode::Char('R') => {
                if !self.any_idle() {
                    self.set_status_message("every task is already running");
                    return AppAction::None;
                }
                AppAction::StartAll(self.start_all_mode)
            }
            KeyCode::Char('K') => {
                if !self.any_running() {
                    self.set_status_message("no tasks are running");
                    return AppAction::None;
                }
                AppAction::KillAll
            }
            _ => AppAction::None,
        }
    }

    pub fn status_line(&self) -> String {
        let Some(task) = self.selected_task() else {
            return "No tasks".to_string();
        };
        let pid = task
            .pid
            .filter(|_| task.is_running())
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".into());
        let uptime = task
            .uptime
            .map(format_duration)
            .unwrap_or_else(|| "-".into());
        let running = self.tasks.iter().filter(|t| t.is_running()).count();
        format!(
            "{} | status: {} | pid: {} | uptime: {} | window: {} | running: {}/{} | start all: {}",
            task.name,
            task.state,
            pid,
            uptime,
            task.selected_visibility,
            running,
            self.tasks.len(),
            self.start_all_mode
        )
    }

    pub fn status_message(&self) -> Option<(&str, StatusLevel)> {
        if let Some(message) = &self.status_message {
            let still_visible = match message.ttl {
                Some(ttl) => message.at.elapsed() < ttl,
                None => true,
            };
            if still_visible {
                return Some((message.text.as_str(), message.level));
            }
        }
        None
    }

    pub fn set_status_message(&mut self, message: impl Into<String>) {
        self.set_status_message_with_level(message, StatusLevel::Info, Some(Duration::from_secs(3)));
    }

    pub fn set_status_warning_for(&mut self, message: impl Into<String>, ttl: Duration) {
        self.set_status_message_with_level(message, StatusLevel::Warning, Some(ttl));
    }

    pub fn set_status_warning_persistent(&mut self, message: impl Into<String>) {
        self.set_status_message_with_level(message, StatusLevel::Warning, None);
    }

    fn set_status_message_with_level(
        &mut self,
        message: impl Into<String>,
        level: StatusLevel,
        ttl: Option<Duration>,
    ) {
        self.status_message = Some(StatusMessage {
            text: message.into(),
            at: Instant::now(),
            ttl,
            level,
        });
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{}h{:02}m{:02}s", hours, minutes, seconds)
    } else {
        format!("{:02}m{:02}s", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{TaskState, Visibility};
    use std::path::PathBuf;

    fn snapshot(name: &str, state: TaskState) -> TaskSnapshot {
        TaskSnapshot {
            name: name.to_string(),
            command: "true".to_string(),
            cwd: PathBuf::from("."),
            state,
            pid: (state == TaskState::Running).then_some(42),
            last_exit: None,
            selected_visibility: Visibility::Normal,
            launched_visibility: None,
            uptime: None,
        }
    }

    fn make_app(states: &[TaskState]) -> App {
        let tasks = states
            .iter()
            .enumerate()
            .map(|(idx, state)| snapshot(&format!("t{}", idx), *state))
            .collect();
        App::new(tasks, 100, false)
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn start_and_kill_respect_task_state() {
        let mut app = make_app(&[TaskState::Idle, TaskState::Running]);
        assert_eq!(app.handle_key(key(KeyCode::Char('r'))), AppAction::Start(0));
        assert_eq!(app.handle_key(key(KeyCode::Char('k'))), AppAction::None);
        assert_eq!(app.status_message().unwrap().0, "t0 is not running");

        app.handle_key(key(KeyCode::Down));
        assert_eq!(app.handle_key(key(KeyCode::Enter)), AppAction::None);
        assert_eq!(app.handle_key(key(KeyCode::Char('k'))), AppAction::Kill(1));
        assert_eq!(app.handle_key(key(KeyCode::Char('v'))), AppAction::None);
    }

    #[test]
    fn aggregate_actions_are_gated() {
        let mut app = make_app(&[TaskState::Idle, TaskState::Idle]);
        assert_eq!(app.handle_key(key(KeyCode::Char('K'))), AppAction::None);
        assert_eq!(
            app.handle_key(key(KeyCode::Char('R'))),
            AppAction::StartAll(StartAllMode::Delegate)
        );

        app.handle_key(key(KeyCode::Char('m')));
        assert_eq!(
            app.handle_key(key(KeyCode::Char('R'))),
            AppAction::StartAll(StartAllMode::Force(Visibility::Hidden))
        );

        app.refresh(vec![
            snapshot("t0", TaskState::Running),
            snapshot("t1", TaskState::Running),
        ]);
        assert_eq!(app.handle_key(key(KeyCode::Char('R'))), AppAction::None);
        assert_eq!(app.handle_key(key(KeyCode::Char('K'))), AppAction::KillAll);
    }

    #[test]
    fn selection_wraps_with_tab_and_clamps_on_refresh() {
        let mut app = make_app(&[TaskState::Idle, TaskState::Idle, TaskState::Idle]);
        app.handle_key(key(KeyCode::Tab));
        app.handle_key(key(KeyCode::Tab));
        assert_eq!(app.selected, 2);
        app.handle_key(key(KeyCode::Tab));
        assert_eq!(app.selected, 0);
        app.handle_key(key(KeyCode::Up));
        assert_eq!(app.selected, 0);

        app.selected = 2;
        app.refresh(vec![snapshot("only", TaskState::Idle)]);
        assert_eq!(app.selected, 0);
    }

    #[test]
    fn ended_tasks_are_logged_with_their_exit() {
        let mut app = make_app(&[TaskState::Idle]);
        app.tasks[0].last_exit = Some(ExitOutcome::Exited { code: Some(2) });
        app.on_task_ended(0);
        let entry = app.activity.tail(1).next().unwrap();
        assert_eq!(entry.text, "t0 exited with code 2");
        assert_eq!(entry.level, ActivityLevel::Error);
    }

    #[test]
    fn bulk_failures_are_split_into_activity_lines() {
        let mut app = make_app(&[TaskState::Idle]);
        app.on_action_outcome(ActionOutcome::Failed {
            id: None,
            error: "start all: 2 of 3 task(s) failed\n  - a: boom\n  - b: bang".to_string(),
        });
        assert_eq!(app.activity.tail(10).count(), 3);
        let (message, level) = app.status_message().unwrap();
        assert_eq!(message, "start all: 2 of 3 task(s) failed");
        assert_eq!(level, StatusLevel::Warning);
    }

    #[test]
    fn build_failures_select_the_first_failed_task() {
        use crate::error::SupervisorError;
        use std::io;

        let mut app = make_app(&[TaskState::Running, TaskState::Idle, TaskState::Idle]);
        let failure = |index: usize| TaskFailure {
            index,
            name: format!("t{}", index),
            error: SupervisorError::Directory {
                path: PathBuf::from("/missing"),
                source: io::Error::from(io::ErrorKind::NotFound),
            },
        };
        app.on_build_failures(&[failure(2), failure(1)]);
        assert_eq!(app.selected, 2);
        let texts: Vec<_> = app.activity.tail(10).map(|entry| entry.text.clone()).collect();
        assert_eq!(texts.len(), 2);
        assert!(texts[0].starts_with("t2 failed to auto-start: working directory /missing"));
        assert!(texts[1].starts_with("t1 failed to auto-start"));
        let (message, level) = app.status_message().unwrap();
        assert_eq!(message, "2 task(s) failed to auto-start");
        assert_eq!(level, StatusLevel::Warning);
    }

    #[test]
    fn quit_keys_set_should_quit() {
        let mut app = make_app(&[]);
        assert_eq!(
            app.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            AppAction::Quit
        );
        assert!(app.should_quit);
        assert_eq!(app.status_line(), "No tasks");
    }

    #[test]
    fn durations_are_compact() {
        assert_eq!(format_duration(Duration::from_secs(65)), "01m05s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h02m05s");
    }
}
