//! Conflict resolution when a server already appears to be running.
//!
//! The orchestrator asks the [`ConflictResolver`] what to do with a set of matched
//! processes. Interactive runs ask the operator through a [`Prompter`]; runs with the
//! force policy never prompt and always terminate and restart.

use std::time::Duration;

use dialoguer::console::{style, Term};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input};

use crate::error::Result;
use crate::process::{LaunchDecision, RunningProcess, ServerDescriptor};

/// One of the four answers an operator can give to a conflict prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Check the process table again.
    Retry,
    /// Kill the running instance, then start a new one.
    TerminateAndStart,
    /// Start a second instance next to the running one.
    StartAlongside,
    /// Leave the server alone.
    Skip,
}

impl ConflictChoice {
    pub fn decision(self) -> LaunchDecision {
        match self {
            ConflictChoice::Retry => LaunchDecision::retry(),
            ConflictChoice::TerminateAndStart => LaunchDecision::start(true),
            ConflictChoice::StartAlongside => LaunchDecision::start(false),
            ConflictChoice::Skip => LaunchDecision::skip(),
        }
    }
}

/// Parses an operator answer: a menu number or the first letter of the action.
pub fn parse_choice(input: &str) -> Option<ConflictChoice> {
    match input.trim().to_lowercase().as_str() {
        "1" | "r" | "retry" => Some(ConflictChoice::Retry),
        "2" | "t" | "terminate" => Some(ConflictChoice::TerminateAndStart),
        "3" | "a" | "anyway" => Some(ConflictChoice::StartAlongside),
        "4" | "s" | "skip" => Some(ConflictChoice::Skip),
        _ => None,
    }
}

/// Blocking operator interaction at the orchestrator's decision points.
pub trait Prompter {
    /// Asks what to do about a server that is already running. Must not return
    /// until a valid choice was made.
    fn choose(
        &mut self,
        server: &ServerDescriptor,
        matches: &[RunningProcess],
    ) -> Result<ConflictChoice>;

    /// Asks a yes/no question.
    fn confirm(&mut self, question: &str, default: bool) -> Result<bool>;
}

/// Turns matched processes into a [`LaunchDecision`].
#[derive(Debug, Clone, Copy)]
pub struct ConflictResolver {
    force: bool,
}

impl ConflictResolver {
    pub fn new(force: bool) -> Self {
        Self { force }
    }

    pub fn is_forced(&self) -> bool {
        self.force
    }

    pub fn resolve(
        &self,
        server: &ServerDescriptor,
        matches: &[RunningProcess],
        prompter: &mut dyn Prompter,
    ) -> Result<LaunchDecision> {
        if self.force {
            tracing::info!(
                server = %server.id,
                "already running ({} process(es)), force policy: terminating and restarting",
                matches.len()
            );
            return Ok(LaunchDecision::start(true));
        }
        let choice = prompter.choose(server, matches)?;
        tracing::debug!(server = %server.id, "operator chose {:?}", choice);
        Ok(choice.decision())
    }
}

/// [`Prompter`] that talks to the operator on the console.
pub struct TerminalPrompter {
    theme: ColorfulTheme,
    term: Term,
}

impl TerminalPrompter {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
            term: Term::stderr(),
        }
    }

    fn print_matches(&self, server: &ServerDescriptor, matches: &[RunningProcess]) -> Result<()> {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.term.write_line("")?;
        self.term.write_line(&format!(
            "{} {} ({}) is already running:",
            style("!").yellow().bold(),
            style(&server.title).bold(),
            server.id
        ))?;
        for process in matches {
            self.term.write_line(&format!(
                "  pid {:<7} up {:<12} mem {:<10} {}",
                process.pid,
                format_uptime(process.uptime(now)),
                format_memory(process.memory),
                style(&process.command_line).dim()
            ))?;
        }
        Ok(())
    }
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompter for TerminalPrompter {
    fn choose(
        &mut self,
        server: &ServerDescriptor,
        matches: &[RunningProcess],
    ) -> Result<ConflictChoice> {
        self.print_matches(server, matches)?;
        let answer: String = Input::with_theme(&self.theme)
            .with_prompt("[1] check again  [2] terminate and start  [3] start anyway  [4] skip")
            .validate_with(|input: &String| -> std::result::Result<(), String> {
                parse_choice(input)
                    .map(|_| ())
                    .ok_or_else(|| "enter 1, 2, 3 or 4".to_string())
            })
            .interact_text_on(&self.term)?;
        // validate_with only lets valid answers through
        Ok(parse_choice(&answer).unwrap_or(ConflictChoice::Retry))
    }

    fn confirm(&mut self, question: &str, default: bool) -> Result<bool> {
        Ok(Confirm::with_theme(&self.theme)
            .with_prompt(question)
            .default(default)
            .interact_on(&self.term)?)
    }
}

/// Formats an uptime as `1h 02m 03s`, dropping leading zero units.
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

pub fn format_memory(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}
