//! Identification of running server instances in a process-table snapshot.
//!
//! Matching is a substring heuristic on executable names and command lines: the same
//! script name started from two directories will collide. It sits behind the
//! [`ProcessMatcher`] trait so a stricter identity scheme can replace it without touching
//! the orchestrator.

use crate::launcher::SCRIPT_DIR_PREFIX;
use crate::process::{RunningProcess, ServerDescriptor, ServerKind};

/// Finds the processes in a snapshot that plausibly belong to a server.
pub trait ProcessMatcher {
    /// Returns the matching processes, best candidate first. An empty result means
    /// "not running" and is not an error.
    fn find_running(
        &self,
        server: &ServerDescriptor,
        processes: &[RunningProcess],
    ) -> Vec<RunningProcess>;
}

/// The default matcher: interpreter name plus script file name for Python servers,
/// verbatim command substring for everything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandLineMatcher;

impl ProcessMatcher for CommandLineMatcher {
    fn find_running(
        &self,
        server: &ServerDescriptor,
        processes: &[RunningProcess],
    ) -> Vec<RunningProcess> {
        let matches: Vec<RunningProcess> = processes
            .iter()
            .filter(|process| matches_server(server, process))
            .cloned()
            .collect();

        if matches.len() > 1 {
            if let Some(env_path) = server.env_activation_path.as_deref() {
                let env_path = env_path.to_lowercase();
                let preferred: Vec<RunningProcess> = matches
                    .iter()
                    .filter(|process| process.command_line.to_lowercase().contains(&env_path))
                    .cloned()
                    .collect();
                if !preferred.is_empty() {
                    return preferred;
                }
            }
        }
        matches
    }
}

fn matches_server(server: &ServerDescriptor, process: &RunningProcess) -> bool {
    match server.kind {
        ServerKind::Python => {
            let script = server.script_file_name().to_lowercase();
            !script.is_empty()
                && process.name.to_lowercase().contains("python")
                && process.command_line.to_lowercase().contains(&script)
        }
        ServerKind::Command | ServerKind::VenvCommand => {
            if !process.command_line.contains(server.command.as_str()) {
                return false;
            }
            match server.shell.process_name() {
                Some(shell) => {
                    process.name.to_lowercase().contains(shell) && !is_launcher_wrapper(process)
                }
                None => true,
            }
        }
    }
}

/// Whether a process is a shell hosting one of our own temporary startup scripts.
pub fn is_launcher_wrapper(process: &RunningProcess) -> bool {
    process
        .command_line
        .to_lowercase()
        .contains(SCRIPT_DIR_PREFIX)
}
