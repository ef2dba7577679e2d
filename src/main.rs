//! py-win-server-launcher: opens a terminal window per configured server.
//!
//! This is the entry point of the application. It parses command-line arguments,
//! loads the JSON configuration, sets up logging and hands the server list to the
//! launch orchestrator.

mod config;
mod error;
mod host;
mod killer;
mod launcher;
mod logging;
mod matcher;
mod orchestrator;
mod process;
mod resolver;
mod script;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{ArgAction, Parser};
use dialoguer::console::style;

use crate::config::DEFAULT_CONFIG_FILE;
use crate::host::{SystemProcessTable, WindowsTerminal};
use crate::orchestrator::{LaunchOrchestrator, RunOptions, RunSummary};
use crate::process::ServerOutcome;
use crate::resolver::TerminalPrompter;

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "py-win-server-launcher",
    version,
    about = "Launch configured servers in their own terminal windows",
    styles = help_styles(),
    disable_help_flag = true
)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Never prompt: terminate running instances and restart them.
    #[arg(short, long)]
    force: bool,
    /// Launch every server without checking for running instances.
    #[arg(long)]
    ignore_running: bool,
    /// Print help.
    #[arg(short = 'h', long = "help", short_alias = '?', action = ArgAction::Help)]
    help: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = config::load_config(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    logging::init_logging(&loaded.global.logging)?;

    tracing::info!(
        "loaded {} server(s) from {}",
        loaded.servers.len(),
        cli.config.display()
    );
    for label in &loaded.ignored {
        tracing::debug!(server = %label, "ignoring incomplete inactive server");
    }

    let options = RunOptions {
        force: cli.force,
        ignore_running: cli.ignore_running,
    };
    let mut table = SystemProcessTable::new();
    let mut prompter = TerminalPrompter::new();
    let terminal = WindowsTerminal::new(loaded.global.terminal.clone());

    let mut summary = LaunchOrchestrator::new(
        &loaded.global,
        options,
        &mut table,
        &mut prompter,
        &terminal,
    )
    .with_rejected(&loaded.rejected)
    .run(&loaded.servers)
    .await;

    print_summary(&summary);
    if summary.pending_cleanup() > 0 {
        println!("{}", cleanup_notice(summary.pending_cleanup(), loaded.global.cleanup_delay()));
    }
    summary.finish_cleanup().await;
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    if !summary.outcomes.is_empty() {
        println!();
    }
    for (id, outcome) in &summary.outcomes {
        match outcome {
            ServerOutcome::Launched => {
                println!("  {} {}", style("launched").green().bold(), id);
            }
            ServerOutcome::Skipped { reason } => {
                println!("  {} {} ({})", style("skipped ").yellow(), id, reason);
            }
            ServerOutcome::Failed { error } => {
                println!("  {} {} ({})", style("failed  ").red().bold(), id, error);
            }
        }
    }
    println!(
        "launched {}, skipped {}, failed {}",
        summary.launched(),
        summary.skipped(),
        summary.failed()
    );
}

// The windows are already open; the wait only covers deleting their startup scripts.
fn cleanup_notice(pending: usize, delay: Duration) -> String {
    format!(
        "removing {} startup script(s) in up to {}s (windows stay open; Ctrl+C leaves the scripts in the temp directory)",
        pending,
        delay.as_secs_f64().ceil() as u64
    )
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}
