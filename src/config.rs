//! Configuration management for taskrack.
//!
//! Task definitions are read once at startup from `tasks.json` (or a `.toml` file with
//! the same fields) and turned into validated `TaskDescriptor`s.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::process::{TaskDescriptor, Visibility};

/// Top-level configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Liveness poll interval in milliseconds.
    pub poll_interval_ms: Option<u64>,
    /// Task definitions, in display order.
    #[serde(alias = "task")]
    pub tasks: Vec<TaskConfig>,
}

/// Configuration for a single task.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Display name of the task.
    pub name: String,
    /// Command line to execute.
    pub cmd: String,
    /// Working directory for the task.
    pub cwd: String,
    /// Inactive tasks are left out of the registry entirely.
    pub active: bool,
    /// Start the task as soon as the supervisor comes up.
    #[serde(default)]
    pub auto_start: bool,
    /// 0 = hidden, 1 = minimized, 2 = normal, 3 = maximized.
    #[serde(default)]
    pub default_window_setting: Visibility,
}

impl Config {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Validated descriptors for every active task, in file order.
    pub fn descriptors(&self) -> Result<Vec<TaskDescriptor>> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, task)| task.active)
            .map(|(index, task)| task.to_descriptor(index))
            .collect()
    }
}

impl TaskConfig {
    fn to_descriptor(&self, index: usize) -> Result<TaskDescriptor> {
        let label = || format!("task #{} ({:?})", index, self.name);
        if self.name.trim().is_empty() {
            bail!("task #{}: name must not be empty", index);
        }
        if self.cwd.trim().is_empty() {
            bail!("{}: cwd must not be empty", label());
        }
        let mut parts = shell_words::split(&self.cmd)
            .with_context(|| format!("{}: failed to parse cmd", label()))?;
        if parts.is_empty() {
            return Err(anyhow!("{}: cmd must not be empty", label()));
        }
        let program = parts.remove(0);
        Ok(TaskDescriptor {
            name: self.name.clone(),
            program,
            args: parts,
            cwd: PathBuf::from(&self.cwd),
            default_visibility: self.default_window_setting,
            auto_start: self.auto_start,
        })
    }
}

/// Loads and parses the configuration from a file path.
///
/// `.toml` files are parsed as TOML, anything else as JSON.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let config = if is_toml {
        Config::from_toml(&raw)
    } else {
        Config::from_json(&raw)
    };
    config.with_context(|| format!("failed to parse config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_with_optional_fields() {
        let raw = r#"{
            "poll_interval_ms": 250,
            "tasks": [
                {"name": "api", "cmd": "cargo run --release", "cwd": "server", "active": true,
                 "auto_start": true, "default_window_setting": 1},
                {"name": "web", "cmd": "pnpm dev", "cwd": "web", "active": true},
                {"name": "old", "cmd": "legacy", "cwd": ".", "active": false}
            ]
        }"#;
        let config = Config::from_json(raw).unwrap();
        assert_eq!(config.poll_interval_ms, Some(250));
        assert_eq!(config.tasks.len(), 3);
        assert!(!config.tasks[1].auto_start);
        assert_eq!(config.tasks[1].default_window_setting, Visibility::Normal);

        let descriptors = config.descriptors().unwrap();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].program, "cargo");
        assert_eq!(descriptors[0].args, vec!["run", "--release"]);
        assert_eq!(descriptors[0].cwd, PathBuf::from("server"));
        assert_eq!(descriptors[0].default_visibility, Visibility::Minimized);
        assert!(descriptors[0].auto_start);
        assert_eq!(descriptors[1].name, "web");
    }

    #[test]
    fn parses_toml_task_tables() {
        let raw = r#"
poll_interval_ms = 1000

[[task]]
name = "api"
cmd = "cargo run"
cwd = "."
active = true
default_window_setting = 0
"#;
        let config = Config::from_toml(raw).unwrap();
        let descriptors = config.descriptors().unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].default_visibility, Visibility::Hidden);
        assert!(!descriptors[0].auto_start);
    }

    #[test]
    fn rejects_out_of_range_window_setting() {
        let raw = r#"{"tasks":[{"name":"a","cmd":"true","cwd":".","active":true,"default_window_setting":7}]}"#;
        let err = Config::from_json(raw).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn rejects_missing_active_flag() {
        let raw = r#"{"tasks":[{"name":"a","cmd":"true","cwd":"."}]}"#;
        assert!(Config::from_json(raw).is_err());
    }

    #[test]
    fn rejects_empty_fields_on_active_tasks() {
        for (name, cmd, cwd) in [("", "true", "."), ("a", "   ", "."), ("a", "true", "")] {
            let config = Config {
                poll_interval_ms: None,
                tasks: vec![TaskConfig {
                    name: name.to_string(),
                    cmd: cmd.to_string(),
                    cwd: cwd.to_string(),
                    active: true,
                    auto_start: false,
                    default_window_setting: Visibility::Normal,
                }],
            };
            assert!(config.descriptors().is_err(), "{:?}", (name, cmd, cwd));
        }
    }

    #[test]
    fn inactive_tasks_skip_validation() {
        let config = Config {
            poll_interval_ms: None,
            tasks: vec![TaskConfig {
                name: String::new(),
                cmd: String::new(),
                cwd: String::new(),
                active: false,
                auto_start: true,
                default_window_setting: Visibility::Normal,
            }],
        };
        assert!(config.descriptors().unwrap().is_empty());
    }

    #[test]
    fn unbalanced_quotes_are_reported() {
        let raw = r#"{"tasks":[{"name":"a","cmd":"echo 'oops","cwd":".","active":true}]}"#;
        let err = Config::from_json(raw).unwrap().descriptors().unwrap_err();
        assert!(format!("{:#}", err).contains("failed to parse cmd"));
    }

    #[test]
    fn load_config_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("tasks.json");
        std::fs::write(&json, r#"{"tasks":[]}"#).unwrap();
        assert!(load_config(&json).unwrap().tasks.is_empty());

        let toml_path = dir.path().join("tasks.toml");
        std::fs::write(&toml_path, "tasks = []\n").unwrap();
        assert!(load_config(&toml_path).unwrap().tasks.is_empty());

        let err = load_config(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
