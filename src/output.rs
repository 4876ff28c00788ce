//! Supervisor activity log shown in the TUI.
//!
//! A bounded buffer of timestamped lifecycle messages (started, killed, ended, failed).
//! Task output itself is never captured.

use std::collections::VecDeque;

use chrono::Local;

const TIMESTAMP_FORMAT: &str = "%d/%m/%Y, %H:%M:%S";

/// Severity of an activity entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityLevel {
    Info,
    Error,
}

#[derive(Debug, Clone)]
pub struct ActivityEntry {
    /// Local time the entry was recorded, preformatted.
    pub at: String,
    pub text: String,
    pub level: ActivityLevel,
}

/// A fixed-capacity ring buffer of `ActivityEntry`s.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    max_entries: usize,
    entries: VecDeque<ActivityEntry>,
}

impl ActivityLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: VecDeque::with_capacity(max_entries.min(1024)),
        }
    }

    /// Records a message stamped with the current local time.
    ///
    /// Returns `true` if an old entry was dropped to make room.
    pub fn push(&mut self, level: ActivityLevel, text: impl Into<String>) -> bool {
        let entry = ActivityEntry {
            at: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            text: text.into(),
            level,
        };
        let mut dropped = false;
        self.entries.push_back(entry);
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
            dropped = true;
        }
        dropped
    }

    /// The newest `count` entries, oldest first.
    pub fn tail(&self, count: usize) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter().skip(self.entries.len().saturating_sub(count))
    }
}
