//! The per-server launch pipeline.
//!
//! Servers are processed strictly one at a time, in file order:
//!
//! ```text
//! validate -> check running -> (resolve -> kill)* -> queued -> launched
//!         \-> skipped                 \-> skipped
//! ```
//!
//! No error crosses a server boundary: every failure is logged against the server's id
//! and the next server is processed as usual.

use std::path::Path;

use tokio::task::JoinHandle;

use crate::config::GlobalConfig;
use crate::error::{LaunchError, Result};
use crate::host::{ProcessTable, TerminalHost};
use crate::killer::ProcessTreeKiller;
use crate::launcher::WindowLauncher;
use crate::matcher::{CommandLineMatcher, ProcessMatcher};
use crate::process::{LaunchAction, ServerDescriptor, ServerKind, ServerOutcome};
use crate::resolver::{ConflictResolver, Prompter};
use crate::script::{activation_script_path, build_script};

/// Run-wide switches from the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Never prompt; always terminate running instances and restart.
    pub force: bool,
    /// Skip the running check and queue every valid server.
    pub ignore_running: bool,
}

/// What happened to each server during a run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Terminal state per active server, in processing order. Entries rejected by the
    /// configuration come first, as skipped.
    pub outcomes: Vec<(String, ServerOutcome)>,
    /// Servers ignored because they are marked inactive.
    pub inactive: usize,
    cleanup: Vec<JoinHandle<()>>,
}

impl RunSummary {
    pub fn launched(&self) -> usize {
        self.count(|outcome| matches!(outcome, ServerOutcome::Launched))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, ServerOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, ServerOutcome::Failed { .. }))
    }

    #[cfg(test)]
    pub fn outcome(&self, id: &str) -> Option<&ServerOutcome> {
        self.outcomes
            .iter()
            .find(|(server, _)| server == id)
            .map(|(_, outcome)| outcome)
    }

    /// Number of startup-script cleanups still scheduled.
    pub fn pending_cleanup(&self) -> usize {
        self.cleanup.len()
    }

    /// Waits for the deferred startup-script cleanups scheduled by this run.
    pub async fn finish_cleanup(&mut self) {
        for handle in self.cleanup.drain(..) {
            let _ = handle.await;
        }
    }

    fn count(&self, predicate: impl Fn(&ServerOutcome) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| predicate(outcome))
            .count()
    }
}

// Where a server ends up after the check/resolve/kill loop.
enum Disposition {
    Queued,
    Skipped(String),
}

/// Drives validation, conflict handling and window launches for a list of servers.
pub struct LaunchOrchestrator<'a> {
    config: &'a GlobalConfig,
    options: RunOptions,
    table: &'a mut dyn ProcessTable,
    prompter: &'a mut dyn Prompter,
    host: &'a dyn TerminalHost,
    matcher: Box<dyn ProcessMatcher + 'a>,
    resolver: ConflictResolver,
    killer: ProcessTreeKiller,
    rejected: Vec<(String, String)>,
}

impl<'a> LaunchOrchestrator<'a> {
    pub fn new(
        config: &'a GlobalConfig,
        options: RunOptions,
        table: &'a mut dyn ProcessTable,
        prompter: &'a mut dyn Prompter,
        host: &'a dyn TerminalHost,
    ) -> Self {
        Self {
            config,
            options,
            table,
            prompter,
            host,
            matcher: Box::new(CommandLineMatcher),
            resolver: ConflictResolver::new(options.force),
            killer: ProcessTreeKiller::from_config(config),
            rejected: Vec::new(),
        }
    }

    /// Config entries that never became servers; they are reported as skipped.
    pub fn with_rejected<'e>(mut self, rejected: impl IntoIterator<Item = &'e LaunchError>) -> Self {
        self.rejected = rejected
            .into_iter()
            .map(|err| (err.server().unwrap_or("-").to_string(), err.to_string()))
            .collect();
        self
    }

    /// Replaces the default command-line matcher.
    pub fn with_matcher(mut self, matcher: impl ProcessMatcher + 'a) -> Self {
        self.matcher = Box::new(matcher);
        self
    }

    pub async fn run(&mut self, servers: &[ServerDescriptor]) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut queued = Vec::new();

        for (label, reason) in &self.rejected {
            tracing::error!(server = %label, "rejected: {}", reason);
            summary.outcomes.push((
                label.clone(),
                ServerOutcome::Skipped {
                    reason: reason.clone(),
                },
            ));
        }

        for server in servers {
            if !server.active {
                tracing::debug!(server = %server.id, "inactive, skipping");
                summary.inactive += 1;
                continue;
            }
            match self.process_server(server).await {
                Disposition::Queued => {
                    tracing::info!(server = %server.id, "queued for launch");
                    queued.push(server);
                }
                Disposition::Skipped(reason) => {
                    tracing::warn!(server = %server.id, "skipped: {}", reason);
                    summary
                        .outcomes
                        .push((server.id.clone(), ServerOutcome::Skipped { reason }));
                }
            }
        }

        if queued.is_empty() {
            tracing::info!("nothing to launch");
            return summary;
        }

        if !self.options.force && !self.confirm_launch(&queued) {
            for server in queued {
                summary.outcomes.push((
                    server.id.clone(),
                    ServerOutcome::Skipped {
                        reason: "launch cancelled by operator".to_string(),
                    },
                ));
            }
            tracing::info!("launch cancelled");
            return summary;
        }

        let launcher = WindowLauncher::from_config(self.host, self.config);
        for (index, server) in queued.into_iter().enumerate() {
            if index > 0 && !self.config.launch_delay().is_zero() {
                tokio::time::sleep(self.config.launch_delay()).await;
            }
            let script = build_script(server);
            match launcher.launch(server, &script) {
                Ok(cleanup) => {
                    tracing::info!(server = %server.id, success = true, "window opened: {}", server.title);
                    summary.cleanup.push(cleanup);
                    summary
                        .outcomes
                        .push((server.id.clone(), ServerOutcome::Launched));
                }
                Err(err) => {
                    tracing::error!(server = %server.id, "launch failed: {}", err);
                    summary.outcomes.push((
                        server.id.clone(),
                        ServerOutcome::Failed {
                            error: err.to_string(),
                        },
                    ));
                }
            }
        }

        tracing::info!(
            "launched {}, skipped {}, failed {}",
            summary.launched(),
            summary.skipped(),
            summary.failed()
        );
        summary
    }

    async fn process_server(&mut self, server: &ServerDescriptor) -> Disposition {
        if let Err(err) = validate(server) {
            tracing::error!(server = %server.id, "validation failed: {}", err);
            return Disposition::Skipped(err.to_string());
        }
        if self.options.ignore_running {
            return Disposition::Queued;
        }

        loop {
            let snapshot = self.table.snapshot();
            let matches = self.matcher.find_running(server, &snapshot);
            if matches.is_empty() {
                tracing::debug!(server = %server.id, "not running");
                return Disposition::Queued;
            }

            let decision = match self.resolver.resolve(server, &matches, &mut *self.prompter) {
                Ok(decision) => decision,
                Err(err) => {
                    tracing::error!(server = %server.id, "conflict prompt failed: {}", err);
                    return Disposition::Skipped(err.to_string());
                }
            };

            match decision.action {
                LaunchAction::Retry => {
                    tracing::info!(server = %server.id, "checking again");
                }
                LaunchAction::Skip => {
                    return Disposition::Skipped("already running, skipped by operator".to_string());
                }
                LaunchAction::Start if !decision.stop_existing => {
                    tracing::warn!(
                        server = %server.id,
                        "starting alongside {} running process(es)",
                        matches.len()
                    );
                    return Disposition::Queued;
                }
                LaunchAction::Start => {
                    let mut survivors = Vec::new();
                    for target in &matches {
                        if !self.killer.stop(server, target, &mut *self.table).await {
                            survivors.push(target.pid);
                        }
                    }
                    if survivors.is_empty() {
                        return Disposition::Queued;
                    }
                    for pid in &survivors {
                        tracing::error!(server = %server.id, "{}", LaunchError::KillFailed { pid: *pid });
                    }
                    if !self.retry_after_failed_kill(server) {
                        return Disposition::Skipped("could not stop the running instance".to_string());
                    }
                }
            }
        }
    }

    // Force runs never block on the operator, so a failed kill ends the server's loop.
    fn retry_after_failed_kill(&mut self, server: &ServerDescriptor) -> bool {
        if self.resolver.is_forced() {
            return false;
        }
        let question = format!(
            "Could not stop the running instance of {}. Check again?",
            server.id
        );
        match self.prompter.confirm(&question, true) {
            Ok(answer) => answer,
            Err(err) => {
                tracing::error!(server = %server.id, "prompt failed: {}", err);
                false
            }
        }
    }

    fn confirm_launch(&mut self, queued: &[&ServerDescriptor]) -> bool {
        let ids: Vec<&str> = queued.iter().map(|server| server.id.as_str()).collect();
        let question = format!("Launch {} server(s): {}?", queued.len(), ids.join(", "));
        match self.prompter.confirm(&question, true) {
            Ok(answer) => answer,
            Err(err) => {
                tracing::error!("prompt failed: {}", err);
                false
            }
        }
    }
}

/// Checks that everything the startup script relies on exists.
pub fn validate(server: &ServerDescriptor) -> Result<()> {
    let working_dir = Path::new(&server.working_dir);
    if !working_dir.is_dir() {
        return Err(LaunchError::WorkingDirMissing(server.working_dir.clone()));
    }
    if server.kind.requires_env() {
        let env_dir = server
            .env_activation_path
            .as_deref()
            .ok_or_else(|| LaunchError::MissingField {
                server: server.id.clone(),
                fields: vec!["venv".to_string()],
            })?;
        let activation = activation_script_path(env_dir);
        if !activation.is_file() {
            return Err(LaunchError::ActivationMissing(activation));
        }
    }
    if server.kind == ServerKind::Python {
        let script = working_dir.join(&server.command);
        if !script.is_file() {
            return Err(LaunchError::ScriptMissing(script));
        }
    }
    Ok(())
}
