//! Shell detection for command execution.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::ShellConfig;

/// Shell used to run command strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedShell {
    /// Path or name of the shell binary.
    pub binary: PathBuf,
    /// Arguments to pass before the command (e.g., `["-c"]` or `["/c"]`).
    pub args: Vec<String>,
    /// Human-readable name for logging.
    pub name: String,
}

impl fmt::Display for DetectedShell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl DetectedShell {
    /// Whether the shell understands POSIX `{ ...; }` grouping and `$?`.
    #[must_use]
    pub fn is_posix(&self) -> bool {
        !matches!(shell_stem(&self.binary).as_str(), "cmd" | "pwsh" | "powershell")
    }

    /// Build the argv for running `command`.
    #[must_use]
    pub fn command_args(&self, command: &str) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(command.to_string());
        args
    }
}

/// Pick the shell: config override first, then the platform default.
///
/// Unix prefers `bash` and falls back to `/bin/sh`; `$SHELL` is ignored since
/// commands are written for a POSIX shell regardless of the user's login shell.
#[must_use]
pub fn detect_shell(config: Option<&ShellConfig>) -> DetectedShell {
    if let Some(cfg) = config
        && let Some(binary) = &cfg.binary
    {
        let args = cfg.args.clone().unwrap_or_else(|| default_args_for(binary));
        return DetectedShell {
            binary: PathBuf::from(binary),
            args,
            name: shell_stem(Path::new(binary)),
        };
    }

    detect_platform_shell()
}

fn shell_stem(binary: &Path) -> String {
    binary
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_lowercase()
}

/// Single-quote `value` for a POSIX shell.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Infer default args for a shell binary name.
fn default_args_for(binary: &str) -> Vec<String> {
    match shell_stem(Path::new(binary)).as_str() {
        "cmd" => vec!["/c".to_string()],
        "pwsh" | "powershell" => vec!["-NoProfile".to_string(), "-Command".to_string()],
        _ => vec!["-c".to_string()],
    }
}

#[cfg(windows)]
fn detect_platform_shell() -> DetectedShell {
    let comspec = std::env::var("ComSpec")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(r"C:\Windows\System32\cmd.exe"));
    DetectedShell {
        binary: comspec,
        args: vec!["/c".to_string()],
        name: "cmd".into(),
    }
}

#[cfg(not(windows))]
fn detect_platform_shell() -> DetectedShell {
    if let Ok(path) = which::which("bash") {
        return DetectedShell {
            binary: path,
            args: vec!["-c".to_string()],
            name: "bash".into(),
        };
    }

    DetectedShell {
        binary: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string()],
        name: "sh".into(),
    }
}
