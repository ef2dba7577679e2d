//! Opening server windows.
//!
//! The [`WindowLauncher`] writes a server's startup script to its own temporary
//! directory, asks the terminal host to open a window running it, and schedules the
//! script's deletion. The deletion races the terminal host reading the file; the delay
//! is chosen long enough that the host has normally started the script by then, and a
//! lost race only leaves a few bytes of temp litter behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;

use crate::config::GlobalConfig;
use crate::error::Result;
use crate::host::{TerminalHost, WindowRequest};
use crate::process::ServerDescriptor;

/// Prefix of every temporary script directory. Shells whose command line contains it
/// are our own wrappers.
pub const SCRIPT_DIR_PREFIX: &str = "server-launcher-";

/// Server id reduced to characters that are safe in file names.
pub fn file_safe_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub struct WindowLauncher<'a> {
    host: &'a dyn TerminalHost,
    temp_root: PathBuf,
    cleanup_delay: Duration,
}

impl<'a> WindowLauncher<'a> {
    pub fn new(host: &'a dyn TerminalHost, temp_root: PathBuf, cleanup_delay: Duration) -> Self {
        Self {
            host,
            temp_root,
            cleanup_delay,
        }
    }

    pub fn from_config(host: &'a dyn TerminalHost, config: &GlobalConfig) -> Self {
        Self::new(host, config.temp_root(), config.cleanup_delay())
    }

    /// Opens a window for `server` running `script`.
    ///
    /// Returns the handle of the deferred cleanup task; the window itself is not
    /// waited for.
    pub fn launch(&self, server: &ServerDescriptor, script: &str) -> Result<JoinHandle<()>> {
        let safe_id = file_safe_id(&server.id);
        let dir = create_script_dir(&self.temp_root, &safe_id)?;
        let script_path = dir.join(format!("start-{}.ps1", safe_id));
        // Windows PowerShell only reads UTF-8 scripts correctly with a BOM.
        if let Err(err) = std::fs::write(&script_path, format!("\u{feff}{}", script)) {
            remove_script_dir(&dir);
            return Err(err.into());
        }
        tracing::debug!(server = %server.id, "wrote startup script {}", script_path.display());

        let request = WindowRequest {
            title: server.title.clone(),
            color_scheme: server.display.color_scheme.clone(),
            position: server.display.position,
            script_path,
        };
        if let Err(err) = self.host.open(&request) {
            remove_script_dir(&dir);
            return Err(err);
        }

        let delay = self.cleanup_delay;
        let server_id = server.id.clone();
        Ok(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            remove_script_dir(&dir);
            tracing::debug!(server = %server_id, "removed startup script directory {}", dir.display());
        }))
    }
}

fn create_script_dir(root: &Path, safe_id: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(root)?;
    let mut stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    loop {
        let dir = root.join(format!("{}{}-{}", SCRIPT_DIR_PREFIX, safe_id, stamp));
        match std::fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => stamp += 1,
            Err(err) => return Err(err.into()),
        }
    }
}

// Best effort: the terminal may still hold the file open.
fn remove_script_dir(dir: &Path) {
    let _ = std::fs::remove_dir_all(dir);
}
