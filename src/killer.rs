//! Best-effort teardown of a running server and the shells that host it.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::time::Duration;

use regex::{Regex, RegexBuilder};

use crate::config::GlobalConfig;
use crate::host::ProcessTable;
use crate::launcher::{file_safe_id, SCRIPT_DIR_PREFIX};
use crate::process::{RunningProcess, ServerDescriptor};

const SHELL_NAMES: [&str; 3] = ["powershell", "pwsh", "cmd"];

/// Kills a process tree: descendants first, then the root, then its host shells.
#[derive(Debug, Clone)]
pub struct ProcessTreeKiller {
    settle_delay: Duration,
    check_interval: Duration,
    confirm_timeout: Duration,
    own_pid: u32,
}

impl ProcessTreeKiller {
    pub fn new(settle_delay: Duration, check_interval: Duration, confirm_timeout: Duration) -> Self {
        Self {
            settle_delay,
            check_interval,
            confirm_timeout,
            own_pid: std::process::id(),
        }
    }

    #[cfg(test)]
    pub fn with_own_pid(mut self, pid: u32) -> Self {
        self.own_pid = pid;
        self
    }

    pub fn from_config(config: &GlobalConfig) -> Self {
        Self::new(
            config.settle_delay(),
            config.process_check_interval(),
            config.graceful_shutdown_timeout(),
        )
    }

    /// Stops `target` and everything attached to it.
    ///
    /// Every step tolerates failure on its own. Returns `false` only when the root
    /// process is still alive after all steps.
    pub async fn stop(
        &self,
        server: &ServerDescriptor,
        target: &RunningProcess,
        table: &mut dyn ProcessTable,
    ) -> bool {
        tracing::info!(server = %server.id, "stopping process {} and its children", target.pid);
        let snapshot = table.snapshot();
        let protected = ancestry(&snapshot, self.own_pid);

        for child in descendants(&snapshot, target.pid) {
            if protected.contains(&child) {
                continue;
            }
            if !kill_with_fallback(table, child) {
                tracing::warn!(server = %server.id, "failed to kill child process {}", child);
            } else {
                tracing::debug!(server = %server.id, "killed child process {}", child);
            }
        }

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        if table.is_alive(target.pid) {
            if table.kill(target.pid) {
                tracing::debug!(server = %server.id, "killed process {}", target.pid);
            } else {
                tracing::warn!(
                    server = %server.id,
                    "kill of process {} failed, forcing termination",
                    target.pid
                );
                if !table.force_terminate(target.pid) {
                    tracing::error!(server = %server.id, "forced termination of {} failed", target.pid);
                }
            }
        }

        let snapshot = table.snapshot();
        for pid in host_shells(server, target, &snapshot) {
            if protected.contains(&pid) {
                continue;
            }
            if kill_with_fallback(table, pid) {
                tracing::debug!(server = %server.id, "killed host shell {}", pid);
            } else {
                tracing::warn!(server = %server.id, "failed to kill host shell {}", pid);
            }
        }

        let stopped = self.wait_for_exit(table, target.pid).await;
        if stopped {
            tracing::info!(server = %server.id, success = true, "process {} stopped", target.pid);
        } else {
            tracing::error!(server = %server.id, "process {} is still running", target.pid);
        }
        stopped
    }

    async fn wait_for_exit(&self, table: &mut dyn ProcessTable, pid: u32) -> bool {
        let deadline = tokio::time::Instant::now() + self.confirm_timeout;
        loop {
            if !table.is_alive(pid) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline || self.check_interval.is_zero() {
                return false;
            }
            tokio::time::sleep(self.check_interval).await;
        }
    }
}

fn kill_with_fallback(table: &mut dyn ProcessTable, pid: u32) -> bool {
    table.kill(pid) || table.force_terminate(pid)
}

/// All live descendants of `root`, deepest first.
fn descendants(snapshot: &[RunningProcess], root: u32) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for process in snapshot {
        if let Some(parent) = process.parent_pid {
            if parent != process.pid {
                children.entry(parent).or_default().push(process.pid);
            }
        }
    }
    let mut order = Vec::new();
    let mut seen = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        for &child in children.get(&pid).into_iter().flatten() {
            if seen.insert(child) {
                order.push(child);
                queue.push_back(child);
            }
        }
    }
    order.reverse();
    order
}

/// Wrapper shells running this server's startup script, plus the target's parent
/// when that parent is a shell. Deduplicated and excluding the target itself.
fn host_shells(
    server: &ServerDescriptor,
    target: &RunningProcess,
    snapshot: &[RunningProcess],
) -> BTreeSet<u32> {
    let mut pids = BTreeSet::new();
    if let Some(pattern) = wrapper_pattern(&server.id) {
        pids.extend(
            snapshot
                .iter()
                .filter(|process| pattern.is_match(&process.command_line))
                .map(|process| process.pid),
        );
    }
    if let Some(parent) = target
        .parent_pid
        .and_then(|ppid| snapshot.iter().find(|process| process.pid == ppid))
    {
        if is_shell(&parent.name) {
            pids.insert(parent.pid);
        }
    }
    pids.remove(&target.pid);
    pids
}

// Anchored on the script file too, so `s01` never matches the wrapper of `s01-2`.
fn wrapper_pattern(id: &str) -> Option<Regex> {
    let safe_id = regex::escape(&file_safe_id(id));
    RegexBuilder::new(&format!(
        r"{}{}-\d+[\\/]start-{}\.ps1",
        regex::escape(SCRIPT_DIR_PREFIX),
        safe_id,
        safe_id
    ))
    .case_insensitive(true)
    .build()
    .ok()
}

fn is_shell(name: &str) -> bool {
    let name = name.to_lowercase();
    let stem = name.strip_suffix(".exe").unwrap_or(&name);
    SHELL_NAMES.contains(&stem)
}

// The launcher itself and the shells it was started from are never killed.
fn ancestry(snapshot: &[RunningProcess], own_pid: u32) -> HashSet<u32> {
    let parents: HashMap<u32, Option<u32>> = snapshot
        .iter()
        .map(|process| (process.pid, process.parent_pid))
        .collect();
    let mut protected = HashSet::new();
    let mut current = Some(own_pid);
    while let Some(pid) = current {
        if !protected.insert(pid) {
            break;
        }
        current = parents.get(&pid).copied().flatten();
    }
    protected
}
