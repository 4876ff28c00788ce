//! taskrack: a local process supervisor with a TUI.
//!
//! This is the entry point of the application. It parses command-line arguments,
//! loads the task configuration, builds the task registry, and runs the event loop
//! that polls task liveness and reacts to user input. On exit it asks what to do with
//! tasks that are still running.

mod app;
mod config;
mod error;
mod events;
mod output;
mod process;
mod registry;
mod runner;
mod shutdown;
mod task;
mod tui;
mod workdir;

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use crossterm::event::KeyEventKind;
use ratatui::layout::Rect;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::{App, AppAction};
use crate::config::Config;
use crate::events::{ActionOutcome, Event, ShutdownSignal};
use crate::registry::TaskRegistry;
use crate::shutdown::OnExit;
use crate::workdir::WorkingDirectoryStack;

const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const MIN_POLL_INTERVAL_MS: u64 = 10;
const DEFAULT_LOG_FILE: &str = "taskrack.log";
const MAX_ACTIVITY_ENTRIES: usize = 500;

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "taskrack",
    version,
    about = "Local process supervisor with TUI",
    styles = help_styles(),
    color = clap::ColorChoice::Always,
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Path to the task configuration file (JSON; TOML if it ends in .toml).
    #[arg(long, default_value = "tasks.json")]
    config: PathBuf,
    /// Liveness poll interval (ms). Overrides poll_interval_ms from the config file.
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    /// Run without the TUI; log to stderr and stop on Ctrl-C.
    #[arg(long)]
    no_ui: bool,
    /// Log file (default: taskrack.log in TUI mode, stderr with --no-ui).
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Log filter, e.g. "info" or "taskrack=debug". RUST_LOG takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,
    /// What to do with running tasks on exit.
    #[arg(long, value_enum, default_value_t = OnExit::Ask)]
    on_exit: OnExit,
    /// Use plain ASCII instead of Unicode symbols.
    #[arg(long)]
    ascii: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate the configuration and list the tasks it defines.
    Check,
    /// Show version information.
    Version,
}

#[derive(Debug, Clone)]
struct RunSettings {
    no_ui: bool,
    poll_interval: Duration,
    log_file: Option<PathBuf>,
    log_level: String,
    on_exit: OnExit,
    use_symbols: bool,
}

impl RunSettings {
    fn from_cli(cli: &Cli, config: &Config, startup_dir: &Path) -> Self {
        let poll_ms = cli
            .poll_interval_ms
            .or(config.poll_interval_ms)
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
            .max(MIN_POLL_INTERVAL_MS);
        // Anchor the log file to the startup directory; launches move the process cwd.
        let log_file = match (&cli.log_file, cli.no_ui) {
            (Some(path), _) => Some(startup_dir.join(path)),
            (None, false) => Some(startup_dir.join(DEFAULT_LOG_FILE)),
            (None, true) => None,
        };
        Self {
            no_ui: cli.no_ui,
            poll_interval: Duration::from_millis(poll_ms),
            log_file,
            log_level: cli.log_level.clone(),
            on_exit: cli.on_exit,
            use_symbols: !cli.ascii,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // First touch records the startup directory as the bottom of the stack.
    let startup_dir = WorkingDirectoryStack::lock_shared().bottom().to_path_buf();

    match &cli.command {
        Some(Commands::Version) => {
            println!("taskrack {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(Commands::Check) => return check_config(&cli.config),
        None => {}
    }

    let config = config::load_config(&cli.config)?;
    let descriptors = config
        .descriptors()
        .with_context(|| format!("invalid config file {}", cli.config.display()))?;
    if descriptors.is_empty() {
        bail!("no active tasks defined in {}", cli.config.display());
    }
    let settings = RunSettings::from_cli(&cli, &config, &startup_dir);
    init_tracing(&settings)?;
    info!(
        config = %cli.config.display(),
        tasks = descriptors.len(),
        cwd = %startup_dir.display(),
        "supervisor starting"
    );

    let (registry, failures) = TaskRegistry::build(descriptors);
    let registry = Arc::new(registry);
    info!(tasks = registry.len(), failed = failures.len(), "tasks loaded");
    let mut app = App::new(registry.snapshots(), MAX_ACTIVITY_ENTRIES, settings.use_symbols);
    app.on_build_failures(&failures);

    let result = run(&registry, &mut app, &settings).await;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    shutdown::finish(&registry, settings.on_exit, &mut stdin.lock(), &mut stdout)?;
    info!("supervisor stopped");
    result
}

async fn run(registry: &Arc<TaskRegistry>, app: &mut App, settings: &RunSettings) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::channel(256);
    let mut terminal = if settings.no_ui {
        None
    } else {
        Some(tui::init_terminal()?)
    };
    let input = if settings.no_ui {
        None
    } else {
        Some(InputListener::spawn(event_tx.clone()))
    };
    spawn_signal_listener(event_tx.clone());

    let mut ticker = tokio::time::interval(settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pending = JoinSet::new();
    let mut result = Ok(());

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    Event::Key(key) => {
                        let action = app.handle_key(key);
                        handle_app_action(action, registry, app, &event_tx, &mut pending);
                    }
                    Event::Resize { width, height } => {
                        if let Some(term) = terminal.as_mut() {
                            let _ = term.resize(Rect::new(0, 0, width, height));
                        }
                    }
                    Event::ActionDone(outcome) => {
                        app.refresh(registry.snapshots());
                        app.on_action_outcome(outcome);
                    }
                    Event::Shutdown { signal } => {
                        info!(signal = signal.label(), "shutdown requested");
                        app.should_quit = true;
                    }
                }
            }
            Some(joined) = pending.join_next(), if !pending.is_empty() => {
                if let Err(err) = joined {
                    warn!(error = %err, "task operation did not complete");
                }
            }
            _ = ticker.tick() => {
                let ended = registry.poll_all();
                app.refresh(registry.snapshots());
                for id in ended {
                    app.on_task_ended(id);
                }
            }
        }

        if let Some(term) = terminal.as_mut() {
            if let Err(err) = tui::draw(app, term) {
                result = Err(err.into());
                break;
            }
        }
        if app.should_quit {
            break;
        }
    }

    if let Some(input) = input {
        input.stop();
    }
    // Nobody reads outcomes anymore; closing the channel keeps in-flight senders from blocking.
    drop(event_rx);
    drain_actions(&mut pending).await;
    if let Some(term) = terminal {
        tui::restore_terminal(term)?;
    }
    result
}

/// Waits for every dispatched task operation, so shutdown sees the tasks they started.
async fn drain_actions(pending: &mut JoinSet<()>) {
    if !pending.is_empty() {
        info!(pending = pending.len(), "waiting for task operations in flight");
    }
    while let Some(joined) = pending.join_next().await {
        if let Err(err) = joined {
            warn!(error = %err, "task operation did not complete");
        }
    }
}

fn handle_app_action(
    action: AppAction,
    registry: &Arc<TaskRegistry>,
    app: &mut App,
    event_tx: &mpsc::Sender<Event>,
    pending: &mut JoinSet<()>,
) {
    match action {
        AppAction::None | AppAction::Quit => {}
        AppAction::CycleVisibility(id) => {
            if let Some(task) = registry.get(id) {
                task.set_selected_visibility(task.selected_visibility().next());
            }
            app.refresh(registry.snapshots());
        }
        action => {
            // Launches contend on the working-directory lock; keep them off the event loop.
            let registry = Arc::clone(registry);
            let tx = event_tx.clone();
            pending.spawn_blocking(move || {
                if let Some(outcome) = perform(action, &registry) {
                    let _ = tx.blocking_send(Event::ActionDone(outcome));
                }
            });
        }
    }
}

/// Carries out a task operation. Returns `None` for actions that touch no process.
fn perform(action: AppAction, registry: &TaskRegistry) -> Option<ActionOutcome> {
    let outcome = match action {
        AppAction::Start(id) => match registry.start_selected(id) {
            Ok(pid) => ActionOutcome::Started { id, pid },
            Err(err) => ActionOutcome::Failed {
                id: Some(id),
                error: err.to_string(),
            },
        },
        AppAction::Kill(id) => match registry.kill(id) {
            Ok(()) => ActionOutcome::Killed { id },
            Err(err) => ActionOutcome::Failed {
                id: Some(id),
                error: err.to_string(),
            },
        },
        AppAction::StartAll(mode) => match registry.start_all(mode) {
            Ok(count) => ActionOutcome::StartedAll { count },
            Err(err) => ActionOutcome::Failed {
                id: None,
                error: err.to_string(),
            },
        },
        AppAction::KillAll => match registry.kill_all() {
            Ok(count) => ActionOutcome::KilledAll { count },
            Err(err) => ActionOutcome::Failed {
                id: None,
                error: err.to_string(),
            },
        },
        AppAction::None | AppAction::Quit | AppAction::CycleVisibility(_) => return None,
    };
    Some(outcome)
}

fn init_tracing(settings: &RunSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let installed = match &settings.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(io::stderr).try_init(),
    };
    installed.map_err(|err| anyhow!("failed to initialize logging: {}", err))
}

fn check_config(path: &Path) -> Result<()> {
    let config = config::load_config(path)?;
    let descriptors = config
        .descriptors()
        .with_context(|| format!("invalid config file {}", path.display()))?;
    let skipped = config.tasks.len() - descriptors.len();
    println!(
        "{}: {} active task(s), {} inactive",
        path.display(),
        descriptors.len(),
        skipped
    );
    let mut missing = 0;
    for descriptor in &descriptors {
        let cwd_note = if descriptor.cwd.is_dir() {
            ""
        } else {
            missing += 1;
            " (missing)"
        };
        println!(
            "  - {} [{}{}] in {}{}: {}",
            descriptor.name,
            descriptor.default_visibility,
            if descriptor.auto_start { ", auto-start" } else { "" },
            descriptor.cwd.display(),
            cwd_note,
            descriptor.command_line()
        );
    }
    if missing > 0 {
        bail!("{} task(s) point at a missing working directory", missing);
    }
    Ok(())
}

/// Terminal input reader; stopped before the exit prompt so it does not eat the answer.
struct InputListener {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl InputListener {
    fn spawn(tx: mpsc::Sender<Event>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                if !crossterm::event::poll(Duration::from_millis(100)).unwrap_or(false) {
                    continue;
                }
                let event = match crossterm::event::read() {
                    Ok(crossterm::event::Event::Key(key)) if key.kind == KeyEventKind::Press => {
                        Event::Key(key)
                    }
                    Ok(crossterm::event::Event::Resize(width, height)) => {
                        Event::Resize { width, height }
                    }
                    _ => continue,
                };
                if tx.blocking_send(event).is_err() {
                    break;
                }
            }
        });
        Self { stop, handle }
    }

    fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.handle.join();
    }
}

fn spawn_signal_listener(tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    let _ = tx.send(Event::Shutdown { signal: ShutdownSignal::Interrupt }).await;
                }
                _ = sigterm.recv() => {
                    let _ = tx.send(Event::Shutdown { signal: ShutdownSignal::Terminate }).await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            let _ = tx
                .send(Event::Shutdown {
                    signal: ShutdownSignal::Interrupt,
                })
                .await;
        }
    });
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}
