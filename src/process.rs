//! Data structures describing managed servers and live processes.
//!
//! This module defines the validated description of a server to launch (`ServerDescriptor`),
//! the snapshot of a live OS process believed to belong to it (`RunningProcess`), and the
//! values that flow through a single descriptor's check/resolve/kill loop.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

/// How the startup script for a server is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    /// A Python script run by the interpreter of an activated environment.
    Python,
    /// A literal shell command, optionally wrapped in `cmd` or PowerShell.
    Command,
    /// A literal command run after activating an environment.
    VenvCommand,
}

impl ServerKind {
    /// Whether this kind needs an environment activated before the command runs.
    pub fn requires_env(self) -> bool {
        matches!(self, ServerKind::Python | ServerKind::VenvCommand)
    }

    pub fn label(self) -> &'static str {
        match self {
            ServerKind::Python => "python",
            ServerKind::Command => "command",
            ServerKind::VenvCommand => "venv-command",
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Shell that hosts a `command` kind server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShellKind {
    /// Run the command directly in the startup script.
    #[default]
    None,
    /// Run through `cmd /c`.
    Cmd,
    /// Run through a nested `powershell -Command`.
    PowerShell,
}

impl ShellKind {
    /// Executable name fragment the shell process shows up as in the process table.
    pub fn process_name(self) -> Option<&'static str> {
        match self {
            ShellKind::None => None,
            ShellKind::Cmd => Some("cmd"),
            ShellKind::PowerShell => Some("powershell"),
        }
    }
}

/// Screen rectangle for a terminal window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct WindowPosition {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Window placement and color theme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplaySettings {
    /// Terminal color scheme name.
    pub color_scheme: String,
    /// Position and size of the window.
    pub position: WindowPosition,
}

/// A validated server entry from the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    /// Unique key, used in logs and temp-file names.
    pub id: String,
    /// Window title.
    pub title: String,
    /// Startup script flavor.
    pub kind: ServerKind,
    /// Script path (python) or literal command line (other kinds).
    pub command: String,
    /// Hosting shell, only meaningful for `ServerKind::Command`.
    pub shell: ShellKind,
    /// Directory the server runs in.
    pub working_dir: String,
    /// Environment directory whose activation script is sourced first.
    pub env_activation_path: Option<String>,
    /// Inactive servers are skipped before validation.
    pub active: bool,
    /// Window placement.
    pub display: DisplaySettings,
}

impl ServerDescriptor {
    /// File name portion of `command`, accepting both separator styles.
    pub fn script_file_name(&self) -> &str {
        self.command
            .rsplit(['\\', '/'])
            .next()
            .unwrap_or(self.command.as_str())
    }
}

/// A live OS process believed to correspond to a descriptor.
///
/// Built fresh from every process-table snapshot and never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningProcess {
    pub pid: u32,
    pub parent_pid: Option<u32>,
    /// Executable name as reported by the OS.
    pub name: String,
    /// Full command line joined with spaces.
    pub command_line: String,
    /// Start time in seconds since the Unix epoch. Advisory only.
    pub start_time: u64,
    /// Resident memory in bytes. Advisory only.
    pub memory: u64,
    /// CPU usage percentage. Advisory only.
    pub cpu_usage: f32,
}

impl RunningProcess {
    /// Time since the process started, relative to `now` (seconds since the epoch).
    pub fn uptime(&self, now: u64) -> Duration {
        Duration::from_secs(now.saturating_sub(self.start_time))
    }
}

/// What the operator (or the force policy) decided to do about a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchAction {
    /// Re-run the process check.
    Retry,
    /// Go ahead and start the server.
    Start,
    /// Leave this server alone.
    Skip,
}

/// Result of conflict resolution for one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchDecision {
    pub action: LaunchAction,
    /// Terminate the matched processes before starting.
    pub stop_existing: bool,
}

impl LaunchDecision {
    pub fn retry() -> Self {
        Self {
            action: LaunchAction::Retry,
            stop_existing: false,
        }
    }

    pub fn start(stop_existing: bool) -> Self {
        Self {
            action: LaunchAction::Start,
            stop_existing,
        }
    }

    pub fn skip() -> Self {
        Self {
            action: LaunchAction::Skip,
            stop_existing: false,
        }
    }
}

/// Terminal state of a descriptor after one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerOutcome {
    /// A window was opened for the server.
    Launched,
    /// The server was not started, with a short reason.
    Skipped { reason: String },
    /// The window host refused to open the window.
    Failed { error: String },
}
