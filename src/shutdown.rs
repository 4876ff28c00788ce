//! Supervisor shutdown.
//!
//! Tasks run detached, so quitting the supervisor leaves them alive. Before exiting, any
//! that are still running are listed and the operator decides whether to kill them.

use std::io::{BufRead, Write};

use anyhow::Result;
use tracing::info;

use crate::registry::TaskRegistry;

/// What to do with running tasks when the supervisor exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OnExit {
    /// Ask on the terminal.
    #[default]
    Ask,
    /// Kill them without asking.
    Kill,
    /// Leave them running.
    Leave,
}

/// Reports running tasks and applies `policy`. Returns `true` if tasks were killed.
pub fn finish<R: BufRead, W: Write>(
    registry: &TaskRegistry,
    policy: OnExit,
    input: &mut R,
    output: &mut W,
) -> Result<bool> {
    registry.poll_all();
    let running = registry.running();
    if running.is_empty() {
        return Ok(false);
    }

    writeln!(output, "Tasks still running:")?;
    for (name, pid) in &running {
        writeln!(output, "  - {} - pid:{}", name, pid)?;
    }

    let kill = match policy {
        OnExit::Ask => prompt_yn("Kill all?", input, output)?,
        OnExit::Kill => true,
        OnExit::Leave => false,
    };
    if !kill {
        info!(tasks = running.len(), "leaving tasks running");
        return Ok(false);
    }
    let killed = registry.kill_all()?;
    writeln!(output, "Killed {} task(s).", killed)?;
    Ok(true)
}

/// Asks until the answer is Y or N. End of input counts as N.
fn prompt_yn<R: BufRead, W: Write>(prompt: &str, input: &mut R, output: &mut W) -> Result<bool> {
    let mut line = String::new();
    loop {
        write!(output, "{} Y/N: ", prompt)?;
        output.flush()?;
        line.clear();
        if input.read_line(&mut line)? == 0 {
            writeln!(output)?;
            return Ok(false);
        }
        match line.trim().to_ascii_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            _ => continue,
        }
    }
}
