//! Boundary to the operating system: the live process table and the terminal window host.
//!
//! Everything above this module works against the [`ProcessTable`] and [`TerminalHost`]
//! traits so the supervision logic can run against recorded fakes in tests.

use std::path::PathBuf;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::process::Command;

use crate::error::{LaunchError, Result};
use crate::process::{RunningProcess, WindowPosition};

/// Read and terminate access to the live OS process table.
pub trait ProcessTable {
    /// Returns every live process whose details could be read.
    fn snapshot(&mut self) -> Vec<RunningProcess>;
    /// Kills a single process. Returns `false` if the kill call failed.
    fn kill(&mut self, pid: u32) -> bool;
    /// OS-level forced termination, used when `kill` did not work.
    fn force_terminate(&mut self, pid: u32) -> bool;
    fn is_alive(&mut self, pid: u32) -> bool;
}

/// A request to open one terminal window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRequest {
    pub title: String,
    pub color_scheme: String,
    pub position: WindowPosition,
    /// Startup script the window's shell executes.
    pub script_path: PathBuf,
}

/// Something that can open a terminal window running a script.
pub trait TerminalHost {
    /// Opens the window without waiting for it to close.
    fn open(&self, request: &WindowRequest) -> Result<()>;
}

/// [`ProcessTable`] backed by `sysinfo`.
pub struct SystemProcessTable {
    system: System,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    fn refresh_pid(&mut self, pid: u32) {
        let pids = [Pid::from_u32(pid)];
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            true,
            ProcessRefreshKind::nothing(),
        );
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn snapshot(&mut self) -> Vec<RunningProcess> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );
        let mut processes: Vec<RunningProcess> = self
            .system
            .processes()
            .values()
            .filter_map(|process| {
                let command_line = process
                    .cmd()
                    .iter()
                    .map(|part| part.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ");
                // Access denied or exited mid-scan: nothing usable to match on.
                if command_line.is_empty() && process.exe().is_none() {
                    return None;
                }
                Some(RunningProcess {
                    pid: process.pid().as_u32(),
                    parent_pid: process.parent().map(|pid| pid.as_u32()),
                    name: process.name().to_string_lossy().into_owned(),
                    command_line,
                    start_time: process.start_time(),
                    memory: process.memory(),
                    cpu_usage: process.cpu_usage(),
                })
            })
            .collect();
        processes.sort_by_key(|process| process.pid);
        processes
    }

    fn kill(&mut self, pid: u32) -> bool {
        self.refresh_pid(pid);
        self.system
            .process(Pid::from_u32(pid))
            .map(|process| process.kill())
            .unwrap_or(false)
    }

    fn force_terminate(&mut self, pid: u32) -> bool {
        force_terminate_pid(pid)
    }

    fn is_alive(&mut self, pid: u32) -> bool {
        self.refresh_pid(pid);
        self.system.process(Pid::from_u32(pid)).is_some()
    }
}

#[cfg(windows)]
fn force_terminate_pid(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};
    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
        if handle == 0 {
            return false;
        }
        let terminated = TerminateProcess(handle, 1) != 0;
        CloseHandle(handle);
        terminated
    }
}

#[cfg(unix)]
fn force_terminate_pid(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    unsafe { libc::kill(pid, libc::SIGKILL) == 0 }
}

#[cfg(all(not(unix), not(windows)))]
fn force_terminate_pid(_pid: u32) -> bool {
    false
}

/// [`TerminalHost`] that drives Windows Terminal (`wt.exe`).
pub struct WindowsTerminal {
    executable: String,
}

impl WindowsTerminal {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl TerminalHost for WindowsTerminal {
    fn open(&self, request: &WindowRequest) -> Result<()> {
        let args = terminal_args(request);
        tracing::debug!(
            "opening window: {}",
            shell_words::join(std::iter::once(self.executable.as_str()).chain(args.iter().map(String::as_str)))
        );
        Command::new(&self.executable)
            .args(&args)
            .spawn()
            .map(|_| ())
            .map_err(|err| LaunchError::Launch(format!("{}: {}", self.executable, err)))
    }
}

/// Arguments for a new Windows Terminal window running a PowerShell script.
pub fn terminal_args(request: &WindowRequest) -> Vec<String> {
    let position = request.position;
    vec![
        "-w".to_string(),
        "new".to_string(),
        "--pos".to_string(),
        format!("{},{}", position.x, position.y),
        "--size".to_string(),
        format!("{},{}", position.width, position.height),
        "new-tab".to_string(),
        "--title".to_string(),
        escape_wt(&request.title),
        "--colorScheme".to_string(),
        escape_wt(&request.color_scheme),
        "powershell.exe".to_string(),
        "-NoProfile".to_string(),
        "-NoExit".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-File".to_string(),
        request.script_path.to_string_lossy().into_owned(),
    ]
}

// wt treats a bare `;` as a subcommand separator.
fn escape_wt(value: &str) -> String {
    value.replace(';', "\\;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_args_place_window_and_run_script() {
        let request = WindowRequest {
            title: "Inference; GPU".into(),
            color_scheme: "Campbell".into(),
            position: WindowPosition {
                x: 10,
                y: -5,
                width: 120,
                height: 30,
            },
            script_path: PathBuf::from("start-s01.ps1"),
        };
        let args = terminal_args(&request);
        let joined = args.join(" ");
        assert!(joined.starts_with("-w new --pos 10,-5 --size 120,30 new-tab"));
        assert!(args.contains(&"Inference\\; GPU".to_string()));
        assert!(joined.ends_with("-NoProfile -NoExit -ExecutionPolicy Bypass -File start-s01.ps1"));
    }

    #[test]
    fn system_table_sees_current_process() {
        let mut table = SystemProcessTable::new();
        let me = std::process::id();
        assert!(table.is_alive(me));
        assert!(table.snapshot().iter().any(|process| process.pid == me));
    }

    #[tokio::test]
    async fn missing_terminal_is_a_launch_failure() {
        let host = WindowsTerminal::new("definitely-not-a-terminal-host-binary");
        let request = WindowRequest {
            title: "t".into(),
            color_scheme: "c".into(),
            position: WindowPosition {
                x: 0,
                y: 0,
                width: 1,
                height: 1,
            },
            script_path: PathBuf::from("x.ps1"),
        };
        assert!(matches!(host.open(&request), Err(LaunchError::Launch(_))));
    }
}
