//! Event definitions for the application event loop.
//!
//! Terminal input, OS signals, and the results of task operations that ran off the
//! loop all arrive as `Event`s on one channel.

use crossterm::event::KeyEvent;

/// Represents an event in the application's main event loop.
#[derive(Debug, Clone)]
pub enum Event {
    /// A keyboard event received from the user.
    Key(KeyEvent),
    /// The terminal window was resized.
    Resize { width: u16, height: u16 },
    /// A task operation dispatched from the UI has finished.
    ActionDone(ActionOutcome),
    /// The supervisor was asked to exit.
    Shutdown { signal: ShutdownSignal },
}

/// Result of a user-triggered task operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Started { id: usize, pid: u32 },
    Killed { id: usize },
    StartedAll { count: usize },
    KilledAll { count: usize },
    /// `id` is `None` for bulk operations.
    Failed { id: Option<usize>, error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    pub fn label(self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
        }
    }
}
