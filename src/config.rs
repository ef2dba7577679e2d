//! Configuration management for the launcher.
//!
//! This module defines the structure of the `py_win_server_launcher.json` configuration file
//! and turns its `servers` list into validated [`ServerDescriptor`]s. Each server entry is
//! decoded on its own, so one broken entry never prevents the others from loading.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{LaunchError, Result};
use crate::launcher::file_safe_id;
use crate::process::{DisplaySettings, ServerDescriptor, ServerKind, ShellKind, WindowPosition};

/// Default configuration file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "py_win_server_launcher.json";

/// Top-level document: global settings plus the raw server list.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    config: GlobalConfig,
    #[serde(default)]
    servers: Vec<serde_json::Value>,
}

/// Process-wide settings, loaded once per run and passed by reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GlobalConfig {
    /// Log file target and rotation policy.
    pub logging: LoggingConfig,
    /// Fallback window settings.
    pub defaults: WindowDefaults,
    /// Named lists of window positions, addressable from `display.layout`.
    pub layouts: BTreeMap<String, Vec<WindowPosition>>,
    /// Terminal host executable.
    pub terminal: String,
    /// Directory for temporary startup scripts (system temp dir when unset).
    pub temp_dir: Option<PathBuf>,
    /// Poll interval while waiting for a killed process to disappear.
    pub process_check_interval_ms: u64,
    /// Upper bound on waiting for a killed process to disappear.
    pub graceful_shutdown_timeout_ms: u64,
    /// Pause between killing children and killing the root process.
    pub settle_delay_ms: u64,
    /// Pause between opening two windows.
    pub launch_delay_ms: u64,
    /// Delay before a startup script is deleted.
    pub cleanup_delay_ms: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            defaults: WindowDefaults::default(),
            layouts: BTreeMap::new(),
            terminal: "wt.exe".to_string(),
            temp_dir: None,
            process_check_interval_ms: 500,
            graceful_shutdown_timeout_ms: 5_000,
            settle_delay_ms: 1_000,
            launch_delay_ms: 1_500,
            cleanup_delay_ms: 10_000,
        }
    }
}

impl GlobalConfig {
    pub fn process_check_interval(&self) -> Duration {
        Duration::from_millis(self.process_check_interval_ms)
    }

    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_shutdown_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn launch_delay(&self) -> Duration {
        Duration::from_millis(self.launch_delay_ms)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_delay_ms)
    }

    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Log file settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Log file path; relative paths resolve against the working directory.
    pub file: PathBuf,
    /// Rotate once the file grows beyond this many kilobytes.
    pub max_size_kb: u64,
    /// Number of rotated files to keep.
    pub max_files: usize,
    /// Minimum level ("debug", "info", ...), overridden by `RUST_LOG`.
    pub level: String,
    /// Echo log lines to the console.
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("logs").join("py_win_server_launcher.log"),
            max_size_kb: 1024,
            max_files: 5,
            level: "info".to_string(),
            console: true,
        }
    }
}

/// Window settings used when a server omits them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WindowDefaults {
    pub color_scheme: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Raw configuration for a single server, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub id: Option<String>,
    pub title: Option<String>,
    /// "python", "command" or "venv-command".
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub command: Option<String>,
    /// "none", "cmd" or "powershell"; only used by "command" servers.
    pub shell: Option<String>,
    pub working_dir: Option<String>,
    /// Environment directory containing `Scripts\Activate.ps1`.
    pub venv: Option<String>,
    pub active: Option<bool>,
    pub display: Option<DisplayConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayConfig {
    pub color_scheme: Option<String>,
    pub position: Option<PositionConfig>,
    /// Take the position from a named layout preset instead.
    pub layout: Option<LayoutSlot>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PositionConfig {
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LayoutSlot {
    pub preset: String,
    pub slot: usize,
}

/// Result of loading a configuration file.
#[derive(Debug)]
pub struct LoadedConfig {
    pub global: GlobalConfig,
    /// Servers that passed field validation, in file order.
    pub servers: Vec<ServerDescriptor>,
    /// Entries that were rejected; the rest of the list is unaffected.
    pub rejected: Vec<LaunchError>,
    /// Labels of inactive entries too incomplete to validate.
    pub ignored: Vec<String>,
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<LoadedConfig> {
    if !path.is_file() {
        return Err(LaunchError::ConfigNotFound(path.to_path_buf()));
    }
    let raw = std::fs::read_to_string(path)?;
    parse_config(&raw).map_err(|source| LaunchError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses a configuration document. Only a malformed top-level document is an error.
pub fn parse_config(raw: &str) -> std::result::Result<LoadedConfig, serde_json::Error> {
    let file: ConfigFile = serde_json::from_str(raw)?;
    let mut servers = Vec::new();
    let mut rejected = Vec::new();
    let mut ignored = Vec::new();
    // file-safe id -> id that claimed it; temp script names must stay unique
    let mut claimed: HashMap<String, String> = HashMap::new();

    for (index, value) in file.servers.into_iter().enumerate() {
        let label = entry_label(&value, index);
        let config: ServerConfig = match serde_json::from_value(value) {
            Ok(config) => config,
            Err(err) => {
                rejected.push(LaunchError::InvalidField {
                    server: label,
                    field: "entry".to_string(),
                    message: err.to_string(),
                });
                continue;
            }
        };
        if config.active == Some(false) && !is_complete(&config, &file.config) {
            ignored.push(label);
            continue;
        }
        match descriptor_from_config(config, &file.config, index) {
            Ok(descriptor) => {
                let safe_id = file_safe_id(&descriptor.id);
                match claimed.get(&safe_id) {
                    Some(owner) => {
                        let message = if *owner == descriptor.id {
                            "duplicate server id".to_string()
                        } else {
                            format!("file name {:?} is already used by server {}", safe_id, owner)
                        };
                        rejected.push(LaunchError::InvalidField {
                            server: descriptor.id,
                            field: "id".to_string(),
                            message,
                        });
                    }
                    None => {
                        claimed.insert(safe_id, descriptor.id.clone());
                        servers.push(descriptor);
                    }
                }
            }
            Err(err) => rejected.push(err),
        }
    }

    Ok(LoadedConfig {
        global: file.config,
        servers,
        rejected,
        ignored,
    })
}

fn is_complete(config: &ServerConfig, global: &GlobalConfig) -> bool {
    descriptor_from_config(config.clone(), global, 0).is_ok()
}

// Name used in error messages for entries that may lack an id.
fn entry_label(value: &serde_json::Value, index: usize) -> String {
    value
        .get("id")
        .and_then(|id| id.as_str())
        .filter(|id| !id.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{}", index + 1))
}

/// Validates a raw server entry, collecting every missing field at once.
pub fn descriptor_from_config(
    config: ServerConfig,
    global: &GlobalConfig,
    index: usize,
) -> Result<ServerDescriptor> {
    let id = non_empty(config.id);
    let label = id.clone().unwrap_or_else(|| format!("#{}", index + 1));
    let mut missing = Vec::new();

    let title = non_empty(config.title);
    let kind_raw = non_empty(config.kind);
    let command = non_empty(config.command);
    let working_dir = non_empty(config.working_dir);
    let venv = non_empty(config.venv);
    let display = config.display.unwrap_or_default();

    if id.is_none() {
        missing.push("id");
    }
    if title.is_none() {
        missing.push("title");
    }
    if kind_raw.is_none() {
        missing.push("type");
    }
    if command.is_none() {
        missing.push("command");
    }
    if working_dir.is_none() {
        missing.push("workingDir");
    }

    let kind = match kind_raw.as_deref() {
        Some(raw) => Some(parse_kind(raw).ok_or_else(|| LaunchError::InvalidField {
            server: label.clone(),
            field: "type".to_string(),
            message: format!("unknown server type {:?}", raw),
        })?),
        None => None,
    };
    if kind.map(ServerKind::requires_env).unwrap_or(false) && venv.is_none() {
        missing.push("venv");
    }

    let shell = match non_empty(config.shell) {
        Some(raw) => parse_shell(&raw).ok_or_else(|| LaunchError::InvalidField {
            server: label.clone(),
            field: "shell".to_string(),
            message: format!("unknown shell {:?}", raw),
        })?,
        None => ShellKind::None,
    };

    let color_scheme = non_empty(display.color_scheme).or_else(|| global.defaults.color_scheme.clone());
    if color_scheme.is_none() {
        missing.push("display.colorScheme");
    }

    let position = match &display.layout {
        Some(slot) => Some(layout_position(slot, global, &label)?),
        None => {
            let mut position = display.position.unwrap_or_default();
            position.width = position.width.or(global.defaults.width);
            position.height = position.height.or(global.defaults.height);
            if position.x.is_none() {
                missing.push("display.position.x");
            }
            if position.y.is_none() {
                missing.push("display.position.y");
            }
            if position.width.is_none() {
                missing.push("display.position.width");
            }
            if position.height.is_none() {
                missing.push("display.position.height");
            }
            match (position.x, position.y, position.width, position.height) {
                (Some(x), Some(y), Some(width), Some(height)) => Some(WindowPosition {
                    x,
                    y,
                    width,
                    height,
                }),
                _ => None,
            }
        }
    };

    if !missing.is_empty() {
        return Err(LaunchError::MissingField {
            server: label,
            fields: missing.into_iter().map(str::to_string).collect(),
        });
    }

    match (id, title, kind, command, working_dir, color_scheme, position) {
        (
            Some(id),
            Some(title),
            Some(kind),
            Some(command),
            Some(working_dir),
            Some(color_scheme),
            Some(position),
        ) => Ok(ServerDescriptor {
            id,
            title,
            kind,
            command,
            shell,
            working_dir,
            env_activation_path: venv,
            active: config.active.unwrap_or(true),
            display: DisplaySettings {
                color_scheme,
                position,
            },
        }),
        _ => Err(LaunchError::MissingField {
            server: label,
            fields: Vec::new(),
        }),
    }
}

fn layout_position(slot: &LayoutSlot, global: &GlobalConfig, label: &str) -> Result<WindowPosition> {
    let preset = global
        .layouts
        .get(&slot.preset)
        .ok_or_else(|| LaunchError::InvalidField {
            server: label.to_string(),
            field: "display.layout.preset".to_string(),
            message: format!("unknown layout preset {:?}", slot.preset),
        })?;
    preset
        .get(slot.slot)
        .copied()
        .ok_or_else(|| LaunchError::InvalidField {
            server: label.to_string(),
            field: "display.layout.slot".to_string(),
            message: format!(
                "slot {} out of range for preset {:?} ({} positions)",
                slot.slot,
                slot.preset,
                preset.len()
            ),
        })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_kind(value: &str) -> Option<ServerKind> {
    match value.to_lowercase().as_str() {
        "python" => Some(ServerKind::Python),
        "command" => Some(ServerKind::Command),
        "venv-command" | "venvcommand" | "venv_command" => Some(ServerKind::VenvCommand),
        _ => None,
    }
}

fn parse_shell(value: &str) -> Option<ShellKind> {
    match value.to_lowercase().as_str() {
        "none" => Some(ShellKind::None),
        "cmd" => Some(ShellKind::Cmd),
        "powershell" | "pwsh" => Some(ShellKind::PowerShell),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
{
  "config": {
    "logging": { "file": "logs/test.log", "maxSizeKb": 64, "maxFiles": 2, "level": "debug" },
    "defaults": { "colorScheme": "Campbell", "width": 100, "height": 25 },
    "layouts": {
      "pair": [
        { "x": 0, "y": 0, "width": 90, "height": 25 },
        { "x": 960, "y": 0, "width": 90, "height": 25 }
      ]
    },
    "processCheckIntervalMs": 250,
    "launchDelayMs": 0
  },
  "servers": [
    {
      "id": "s01",
      "title": "Inference",
      "type": "python",
      "command": "s01.py",
      "workingDir": "C:\\Servers\\s01",
      "venv": "C:\\Servers\\venv_s01",
      "display": { "colorScheme": "One Half Dark",
                   "position": { "x": 10, "y": 20, "width": 120, "height": 30 } }
    },
    {
      "id": "web",
      "title": "Web UI",
      "type": "command",
      "shell": "cmd",
      "command": "npm run dev",
      "workingDir": "C:\\Servers\\web",
      "active": false,
      "display": { "layout": { "preset": "pair", "slot": 1 } }
    }
  ]
}
"#;

    #[test]
    fn parses_servers_and_globals() {
        let loaded = parse_config(FULL).unwrap();
        assert!(loaded.rejected.is_empty());
        assert_eq!(loaded.servers.len(), 2);
        assert_eq!(loaded.global.logging.max_files, 2);
        assert_eq!(loaded.global.process_check_interval_ms, 250);
        assert_eq!(loaded.global.launch_delay_ms, 0);
        // untouched keys keep their defaults
        assert_eq!(loaded.global.settle_delay_ms, 1_000);
        assert_eq!(loaded.global.terminal, "wt.exe");

        let s01 = &loaded.servers[0];
        assert_eq!(s01.kind, ServerKind::Python);
        assert_eq!(s01.env_activation_path.as_deref(), Some("C:\\Servers\\venv_s01"));
        assert!(s01.active);
        assert_eq!(s01.display.color_scheme, "One Half Dark");
        assert_eq!(s01.display.position.x, 10);

        let web = &loaded.servers[1];
        assert_eq!(web.shell, ShellKind::Cmd);
        assert!(!web.active);
        assert_eq!(web.display.color_scheme, "Campbell");
        assert_eq!(web.display.position.x, 960);
    }

    #[test]
    fn python_without_venv_is_rejected_but_others_load() {
        let raw = r#"
{
  "servers": [
    { "id": "a", "title": "A", "type": "python", "command": "a.py", "workingDir": "C:\\a",
      "display": { "colorScheme": "x", "position": { "x": 0, "y": 0, "width": 1, "height": 1 } } },
    { "id": "b", "title": "B", "type": "command", "command": "b.exe", "workingDir": "C:\\b",
      "display": { "colorScheme": "x", "position": { "x": 0, "y": 0, "width": 1, "height": 1 } } }
  ]
}
"#;
        let loaded = parse_config(raw).unwrap();
        assert_eq!(loaded.servers.len(), 1);
        assert_eq!(loaded.servers[0].id, "b");
        assert_eq!(loaded.rejected.len(), 1);
        match &loaded.rejected[0] {
            LaunchError::MissingField { server, fields } => {
                assert_eq!(server, "a");
                assert_eq!(fields, &vec!["venv".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn reports_all_missing_fields_with_index_label() {
        let raw = r#"{ "servers": [ { "type": "command", "command": "  " } ] }"#;
        let loaded = parse_config(raw).unwrap();
        assert!(loaded.servers.is_empty());
        match &loaded.rejected[0] {
            LaunchError::MissingField { server, fields } => {
                assert_eq!(server, "#1");
                assert_eq!(loaded.rejected[0].server(), Some("#1"));
                assert!(fields.contains(&"id".to_string()));
                assert!(fields.contains(&"command".to_string()));
                assert!(fields.contains(&"display.colorScheme".to_string()));
                assert!(fields.contains(&"display.position.height".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_unknown_type_and_bad_layout_slot() {
        let raw = r#"
{
  "config": { "layouts": { "solo": [ { "x": 0, "y": 0, "width": 1, "height": 1 } ] } },
  "servers": [
    { "id": "a", "title": "A", "type": "node", "command": "x", "workingDir": "C:\\a",
      "display": { "colorScheme": "x", "position": { "x": 0, "y": 0, "width": 1, "height": 1 } } },
    { "id": "b", "title": "B", "type": "command", "command": "x", "workingDir": "C:\\b",
      "display": { "colorScheme": "x", "layout": { "preset": "solo", "slot": 3 } } },
    { "id": "c", "title": "C", "type": "command", "command": "x", "workingDir": "C:\\c",
      "display": { "colorScheme": "x", "position": { "x": "left" } } }
  ]
}
"#;
        let loaded = parse_config(raw).unwrap();
        assert!(loaded.servers.is_empty());
        let fields: Vec<String> = loaded
            .rejected
            .iter()
            .map(|err| match err {
                LaunchError::InvalidField { field, .. } => field.clone(),
                other => panic!("unexpected error: {other}"),
            })
            .collect();
        assert_eq!(fields, vec!["type", "display.layout.slot", "entry"]);
    }

    #[test]
    fn window_size_falls_back_to_defaults() {
        let raw = r#"
{
  "config": { "defaults": { "width": 100, "height": 25 } },
  "servers": [
    { "id": "a", "title": "A", "type": "command", "command": "x", "workingDir": "C:\\a",
      "display": { "colorScheme": "x", "position": { "x": 5, "y": 6 } } }
  ]
}
"#;
        let loaded = parse_config(raw).unwrap();
        let position = loaded.servers[0].display.position;
        assert_eq!((position.x, position.y, position.width, position.height), (5, 6, 100, 25));
    }

    #[test]
    fn duplicate_ids_keep_first_entry() {
        let entry = r#"{ "id": "dup", "title": "T", "type": "command", "command": "x", "workingDir": "C:\\d",
            "display": { "colorScheme": "x", "position": { "x": 0, "y": 0, "width": 1, "height": 1 } } }"#;
        let raw = format!(r#"{{ "servers": [ {entry}, {entry} ] }}"#);
        let loaded = parse_config(&raw).unwrap();
        assert_eq!(loaded.servers.len(), 1);
        assert_eq!(loaded.rejected.len(), 1);
        assert_eq!(loaded.rejected[0].server(), Some("dup"));
    }

    #[test]
    fn ids_colliding_as_file_names_are_rejected() {
        let entry = |id: &str| {
            format!(
                r#"{{ "id": "{id}", "title": "T", "type": "command", "command": "x", "workingDir": "C:\\d",
            "display": {{ "colorScheme": "x", "position": {{ "x": 0, "y": 0, "width": 1, "height": 1 }} }} }}"#
            )
        };
        let raw = format!(
            r#"{{ "servers": [ {}, {}, {} ] }}"#,
            entry("web ui"),
            entry("web_ui"),
            entry("web-ui")
        );
        let loaded = parse_config(&raw).unwrap();
        let ids: Vec<&str> = loaded.servers.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["web ui", "web-ui"]);
        assert_eq!(loaded.rejected.len(), 1);
        match &loaded.rejected[0] {
            LaunchError::InvalidField { server, field, message } => {
                assert_eq!(server, "web_ui");
                assert_eq!(field, "id");
                assert!(message.contains("web ui"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn incomplete_inactive_entries_are_ignored() {
        let raw = r#"{ "servers": [ { "id": "old", "active": false } ] }"#;
        let loaded = parse_config(raw).unwrap();
        assert!(loaded.servers.is_empty());
        assert!(loaded.rejected.is_empty());
        assert_eq!(loaded.ignored, vec!["old".to_string()]);
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        assert!(matches!(
            load_config(&path),
            Err(LaunchError::ConfigNotFound(_))
        ));
    }

    #[test]
    fn malformed_document_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ servers: ").unwrap();
        assert!(matches!(
            load_config(&path),
            Err(LaunchError::ConfigParse { .. })
        ));
    }
}
