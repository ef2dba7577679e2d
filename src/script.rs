//! Startup script generation.
//!
//! Each window runs a short PowerShell script: change into the working directory,
//! optionally activate the server's environment, then run its command. Any failure is
//! caught and the window waits for a key press so the error stays readable.

use std::path::{Path, PathBuf};

use crate::process::{ServerDescriptor, ServerKind, ShellKind};

/// Path of the PowerShell activation script inside an environment directory, as it
/// appears in the generated script.
pub fn activation_script(env_dir: &str) -> String {
    format!(
        "{}\\Scripts\\Activate.ps1",
        env_dir.trim_end_matches(['\\', '/'])
    )
}

/// Filesystem location of the activation script, for existence checks.
pub fn activation_script_path(env_dir: &str) -> PathBuf {
    Path::new(env_dir).join("Scripts").join("Activate.ps1")
}

/// Builds the startup script for a server. Pure: the same descriptor always yields
/// the same text.
pub fn build_script(server: &ServerDescriptor) -> String {
    let mut body = Vec::new();
    body.push(format!("Set-Location -LiteralPath {}", quote(&server.working_dir)));

    if server.kind.requires_env() {
        if let Some(env_dir) = server.env_activation_path.as_deref() {
            body.push(format!(". {}", quote(&activation_script(env_dir))));
        }
    }

    body.push(match server.kind {
        ServerKind::Python => format!("python {}", arg(&server.command)),
        ServerKind::VenvCommand => server.command.clone(),
        ServerKind::Command => match server.shell {
            ShellKind::None => server.command.clone(),
            ShellKind::Cmd => format!("cmd /c {}", server.command),
            ShellKind::PowerShell => {
                format!("powershell -NoProfile -Command {}", quote(&server.command))
            }
        },
    });
    body.push(
        "if ($null -ne $LASTEXITCODE -and $LASTEXITCODE -ne 0) { throw \"command exited with code $LASTEXITCODE\" }"
            .to_string(),
    );

    let mut script = String::new();
    script.push_str(&format!(
        "# {} ({})\n",
        single_line(&server.title),
        server.id
    ));
    script.push_str("$ErrorActionPreference = 'Stop'\n");
    script.push_str("try {\n");
    for line in body {
        script.push_str("    ");
        script.push_str(&line);
        script.push('\n');
    }
    script.push_str("} catch {\n");
    script.push_str(&format!(
        "    Write-Host \"[{}] startup failed: $_\" -ForegroundColor Red\n",
        escape_double(&server.id)
    ));
    script.push_str("    Write-Host 'Press any key to close this window...'\n");
    script.push_str("    $null = $Host.UI.RawUI.ReadKey('NoEcho,IncludeKeyDown')\n");
    script.push_str("    exit 1\n");
    script.push_str("}\n");
    script
}

/// Single-quoted PowerShell literal.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Bare argument when it cannot be misparsed, quoted otherwise.
fn arg(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '\\' | '/' | ':'));
    if safe {
        value.to_string()
    } else {
        quote(value)
    }
}

fn escape_double(value: &str) -> String {
    value.replace('`', "``").replace('"', "`\"").replace('$', "`$")
}

fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}
