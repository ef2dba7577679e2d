//! Fakes and fixtures shared by the unit tests.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::path::Path;

use crate::config::GlobalConfig;
use crate::error::{LaunchError, Result};
use crate::host::{ProcessTable, TerminalHost, WindowRequest};
use crate::process::{
    DisplaySettings, RunningProcess, ServerDescriptor, ServerKind, ShellKind, WindowPosition,
};
use crate::resolver::{ConflictChoice, Prompter};

pub fn python_server(id: &str, working_dir: &str) -> ServerDescriptor {
    ServerDescriptor {
        id: id.to_string(),
        title: format!("{} server", id),
        kind: ServerKind::Python,
        command: format!("{}.py", id),
        shell: ShellKind::None,
        working_dir: working_dir.to_string(),
        env_activation_path: Some(format!("C:\\Servers\\venv_{}", id)),
        active: true,
        display: DisplaySettings {
            color_scheme: "Campbell".to_string(),
            position: WindowPosition {
                x: 0,
                y: 0,
                width: 800,
                height: 600,
            },
        },
    }
}

pub fn command_server(id: &str, working_dir: &str, command: &str) -> ServerDescriptor {
    ServerDescriptor {
        kind: ServerKind::Command,
        command: command.to_string(),
        env_activation_path: None,
        ..python_server(id, working_dir)
    }
}

/// A python server whose working directory, script and activation script exist
/// under `root`.
pub fn fixture_server(root: &Path, id: &str) -> ServerDescriptor {
    let working_dir = root.join(id);
    std::fs::create_dir_all(&working_dir).unwrap();
    std::fs::write(working_dir.join(format!("{}.py", id)), "print('hi')\n").unwrap();
    let env_dir = root.join(format!("venv_{}", id));
    std::fs::create_dir_all(env_dir.join("Scripts")).unwrap();
    std::fs::write(env_dir.join("Scripts").join("Activate.ps1"), "").unwrap();

    let mut server = python_server(id, &working_dir.to_string_lossy());
    server.env_activation_path = Some(env_dir.to_string_lossy().into_owned());
    server
}

/// Configuration with every delay zeroed and scripts written under `root`.
pub fn quick_config(root: &Path) -> GlobalConfig {
    GlobalConfig {
        temp_dir: Some(root.join("scripts")),
        process_check_interval_ms: 0,
        graceful_shutdown_timeout_ms: 0,
        settle_delay_ms: 0,
        launch_delay_ms: 0,
        cleanup_delay_ms: 0,
        ..GlobalConfig::default()
    }
}

pub fn proc(pid: u32, parent: u32, name: &str, command_line: &str) -> RunningProcess {
    RunningProcess {
        pid,
        parent_pid: Some(parent),
        name: name.to_string(),
        command_line: command_line.to_string(),
        start_time: 0,
        memory: 0,
        cpu_usage: 0.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Kill(u32),
    Force(u32),
}

/// In-memory process table that records every termination attempt.
#[derive(Debug, Default)]
pub struct FakeProcessTable {
    live: Vec<RunningProcess>,
    refused: HashSet<u32>,
    unkillable: HashSet<u32>,
    exits: Vec<(u32, usize)>,
    pub calls: Vec<Call>,
    pub snapshots: usize,
}

impl FakeProcessTable {
    pub fn new(processes: Vec<RunningProcess>) -> Self {
        Self {
            live: processes,
            ..Self::default()
        }
    }

    pub fn process(&self, pid: u32) -> RunningProcess {
        self.live
            .iter()
            .find(|process| process.pid == pid)
            .cloned()
            .unwrap_or_else(|| panic!("no process {pid}"))
    }

    /// `kill` fails for `pid`, forced termination still works.
    pub fn refuse_kill(&mut self, pid: u32) {
        self.refused.insert(pid);
    }

    /// Neither `kill` nor forced termination work for `pid`.
    pub fn make_unkillable(&mut self, pid: u32) {
        self.unkillable.insert(pid);
    }

    /// `pid` exits on its own once `count` snapshots were taken.
    pub fn exit_after_snapshots(&mut self, pid: u32, count: usize) {
        self.exits.push((pid, count));
    }

    /// Pids passed to `kill`, in call order.
    pub fn kill_order(&self) -> Vec<u32> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Kill(pid) => Some(*pid),
                Call::Force(_) => None,
            })
            .collect()
    }

    fn remove(&mut self, pid: u32) -> bool {
        let before = self.live.len();
        self.live.retain(|process| process.pid != pid);
        self.live.len() != before
    }
}

impl ProcessTable for FakeProcessTable {
    fn snapshot(&mut self) -> Vec<RunningProcess> {
        let snapshot = self.live.clone();
        self.snapshots += 1;
        let taken = self.snapshots;
        let exiting: Vec<u32> = self
            .exits
            .iter()
            .filter(|(_, count)| taken >= *count)
            .map(|(pid, _)| *pid)
            .collect();
        for pid in exiting {
            self.remove(pid);
        }
        snapshot
    }

    fn kill(&mut self, pid: u32) -> bool {
        self.calls.push(Call::Kill(pid));
        if self.refused.contains(&pid) || self.unkillable.contains(&pid) {
            return false;
        }
        self.remove(pid)
    }

    fn force_terminate(&mut self, pid: u32) -> bool {
        self.calls.push(Call::Force(pid));
        if self.unkillable.contains(&pid) {
            return false;
        }
        self.remove(pid)
    }

    fn is_alive(&mut self, pid: u32) -> bool {
        self.live.iter().any(|process| process.pid == pid)
    }
}

/// Terminal host that records each request with the script contents at open time.
#[derive(Debug, Default)]
pub struct RecordingTerminal {
    opened: RefCell<Vec<(WindowRequest, String)>>,
    fail_all: bool,
    fail_script: Option<String>,
}

impl RecordingTerminal {
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    /// Fails only for the server with the given id.
    pub fn failing_for(id: &str) -> Self {
        Self {
            fail_script: Some(format!("start-{}.ps1", id)),
            ..Self::default()
        }
    }

    pub fn opened(&self) -> Vec<(WindowRequest, String)> {
        self.opened.borrow().clone()
    }
}

impl TerminalHost for RecordingTerminal {
    fn open(&self, request: &WindowRequest) -> Result<()> {
        let targeted = self
            .fail_script
            .as_deref()
            .is_some_and(|name| request.script_path.ends_with(name));
        if self.fail_all || targeted {
            return Err(LaunchError::Launch("terminal host unavailable".to_string()));
        }
        let contents = std::fs::read_to_string(&request.script_path)?;
        self.opened.borrow_mut().push((request.clone(), contents));
        Ok(())
    }
}

/// Prompter that replays canned answers.
///
/// Conflict prompts beyond the scripted ones answer `Skip`; confirmations beyond the
/// scripted ones take the default.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    pub choices: VecDeque<ConflictChoice>,
    pub confirms: VecDeque<bool>,
    pub prompts: usize,
}

impl ScriptedPrompter {
    pub fn with_choices(choices: impl IntoIterator<Item = ConflictChoice>) -> Self {
        Self {
            choices: choices.into_iter().collect(),
            ..Self::default()
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn choose(
        &mut self,
        _server: &ServerDescriptor,
        _matches: &[RunningProcess],
    ) -> Result<ConflictChoice> {
        self.prompts += 1;
        Ok(self.choices.pop_front().unwrap_or(ConflictChoice::Skip))
    }

    fn confirm(&mut self, _question: &str, default: bool) -> Result<bool> {
        self.prompts += 1;
        Ok(self.confirms.pop_front().unwrap_or(default))
    }
}
