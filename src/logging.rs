//! Log sink: timestamped, leveled lines appended to a size-rotated file and echoed
//! to the console.
//!
//! Every component logs through `tracing`. Events carry an optional `server` field
//! with the descriptor id and an optional `success = true` flag, which turns an
//! INFO line into a SUCCESS line.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context as _, Result};
use dialoguer::console::{style, Term};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Installs the global subscriber. `RUST_LOG` overrides `logging.level`.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let layer = LogFileLayer::open(config)?;
    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .context("failed to install logger")?;
    Ok(())
}

/// `tracing` layer that renders events as log lines.
pub struct LogFileLayer {
    file: Mutex<RotatingFile>,
    console: bool,
}

impl LogFileLayer {
    pub fn open(config: &LoggingConfig) -> Result<Self> {
        let file = RotatingFile::open(
            &config.file,
            config.max_size_kb.saturating_mul(1024),
            config.max_files,
        )
        .with_context(|| format!("failed to open log file {}", config.file.display()))?;
        Ok(Self {
            file: Mutex::new(file),
            console: config.console,
        })
    }
}

impl<S> Layer<S> for LogFileLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = EventFields::default();
        event.record(&mut fields);
        let label = level_label(event.metadata().level(), fields.success);
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let mut message = fields.message;
        for extra in &fields.extra {
            message.push(' ');
            message.push_str(extra);
        }
        let line = format_line(&timestamp, label, fields.server.as_deref(), &message);

        if self.console {
            echo(label, &timestamp, fields.server.as_deref(), &message);
        }
        if let Ok(mut file) = self.file.lock() {
            // A failing log write must never take the launcher down.
            let _ = file.append(&line);
        }
    }
}

/// Level name written to the log.
pub fn level_label(level: &Level, success: bool) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARNING",
        Level::INFO if success => "SUCCESS",
        Level::INFO => "INFO",
        _ => "DEBUG",
    }
}

pub fn format_line(timestamp: &str, label: &str, server: Option<&str>, message: &str) -> String {
    format!(
        "[{}][{}][{}] {}",
        timestamp,
        label,
        server.unwrap_or("-"),
        message
    )
}

fn echo(label: &str, timestamp: &str, server: Option<&str>, message: &str) {
    let styled = match label {
        "ERROR" => style(label).red().bold(),
        "WARNING" => style(label).yellow(),
        "SUCCESS" => style(label).green(),
        "DEBUG" => style(label).dim(),
        _ => style(label).cyan(),
    }
    .for_stderr();
    let _ = Term::stderr().write_line(&format!(
        "[{}][{}][{}] {}",
        timestamp,
        styled,
        server.unwrap_or("-"),
        message
    ));
}

#[derive(Default)]
struct EventFields {
    message: String,
    server: Option<String>,
    success: bool,
    extra: Vec<String>,
}

impl Visit for EventFields {
    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "success" {
            self.success = value;
        } else {
            self.extra.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "server" => self.server = Some(value.to_string()),
            name => self.extra.push(format!("{}={}", name, value)),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            "server" => self.server = Some(format!("{:?}", value)),
            name => self.extra.push(format!("{}={:?}", name, value)),
        }
    }
}

/// Append-only file rotated by size: `name.log -> name.1.log -> ... -> name.N.log`.
struct RotatingFile {
    path: PathBuf,
    file: File,
    size: u64,
    max_bytes: u64,
    max_files: usize,
}

impl RotatingFile {
    fn open(path: &Path, max_bytes: u64, max_files: usize) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = open_append(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
            max_bytes,
            max_files,
        })
    }

    fn append(&mut self, line: &str) -> io::Result<()> {
        if self.max_bytes > 0 && self.size >= self.max_bytes {
            self.rotate()?;
        }
        writeln!(self.file, "{}", line)?;
        self.size += line.len() as u64 + 1;
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        if self.max_files == 0 {
            self.file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?;
            self.size = 0;
            return Ok(());
        }
        let _ = fs::remove_file(rotated_path(&self.path, self.max_files));
        for index in (1..self.max_files).rev() {
            let from = rotated_path(&self.path, index);
            if from.exists() {
                fs::rename(&from, rotated_path(&self.path, index + 1))?;
            }
        }
        fs::rename(&self.path, rotated_path(&self.path, 1))?;
        self.file = open_append(&self.path)?;
        self.size = 0;
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// `logs/app.log` with index 2 becomes `logs/app.2.log`.
fn rotated_path(path: &Path, index: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}.{}.{}", stem, index, ext.to_string_lossy()),
        None => format!("{}.{}", stem, index),
    };
    path.with_file_name(name)
}
