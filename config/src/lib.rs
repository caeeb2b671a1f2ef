//! `~/.anvil/config.toml` loading.
//!
//! ```toml
//! [app]
//! approval_mode = "auto_edit"
//! editor = "nvim"
//!
//! [tools]
//! exclude = ["web_fetch"]
//!
//! [tools.shell]
//! allowed_commands = ["git status"]
//!
//! [mcp_servers.github]
//! command = "npx"
//! env = { GITHUB_TOKEN = "${GITHUB_TOKEN}" }
//! ```

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::{env, io};

use anvil_tools::{DiscoveryConfig, McpServerConfig, ShellConfig};
use anvil_types::ApprovalMode;
use serde::Deserialize;
use thiserror::Error;

/// Environment variable that points at an alternative config file.
pub const CONFIG_ENV: &str = "ANVIL_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AnvilConfig {
    pub app: AppConfig,
    pub tools: ToolsConfig,
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub debug: bool,
    /// Root for file and shell tools. Relative paths resolve against the
    /// working directory.
    pub target_dir: Option<PathBuf>,
    pub approval_mode: ApprovalMode,
    /// Editor for modify-with-editor (`code`, `vim`, `nvim`, `emacs`, or a
    /// program taking two paths).
    pub editor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub exclude: Vec<String>,
    pub discovery_command: Option<String>,
    pub call_command: Option<String>,
    pub shell: ShellConfig,
}

/// Replace every `${VAR}` with the variable's value. Unset variables expand
/// to nothing; an unterminated `${` is kept literally.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

impl AnvilConfig {
    /// Load from [`AnvilConfig::path`]. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::path() {
            Some(path) => Self::load_from(&path),
            None => {
                tracing::debug!("no home directory; using default config");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found; using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let config = Self::parse(&content, path)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `$ANVIL_CONFIG`, else `~/.anvil/config.toml`.
    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path(env::var_os(CONFIG_ENV), dirs::home_dir())
    }

    /// Discovery sources with `${VAR}` expanded in MCP server environments.
    #[must_use]
    pub fn discovery(&self) -> DiscoveryConfig {
        let mcp_servers = self
            .mcp_servers
            .iter()
            .map(|(name, server)| {
                let mut server = server.clone();
                for value in server.env.values_mut() {
                    *value = expand_env_vars(value);
                }
                (name.clone(), server)
            })
            .collect();
        DiscoveryConfig {
            discovery_command: self.tools.discovery_command.clone(),
            call_command: self.tools.call_command.clone(),
            mcp_servers,
            exclude: self.tools.exclude.clone(),
        }
    }

    /// Configured target directory resolved against `cwd`, or `cwd` itself.
    #[must_use]
    pub fn target_dir(&self, cwd: &Path) -> PathBuf {
        match &self.app.target_dir {
            Some(dir) => cwd.join(dir),
            None => cwd.to_path_buf(),
        }
    }
}

fn config_path(override_path: Option<OsString>, home: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = override_path.filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    home.map(|home| home.join(".anvil").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::{AnvilConfig, ConfigError, config_path, expand_env_vars};
    use anvil_types::ApprovalMode;
    use std::ffi::OsString;
    use std::path::{Path, PathBuf};

    const FULL: &str = r#"
[app]
debug = true
target_dir = "project"
approval_mode = "auto_edit"
editor = "nvim"

[tools]
exclude = ["web_fetch"]
discovery_command = "./tools/discover"
call_command = "./tools/call"

[tools.shell]
binary = "bash"
args = ["-c"]
allowed_commands = ["git status"]
blocked_commands = ["rm"]
max_output_chars = 1000

[mcp_servers.github]
command = "npx"
args = ["-y", "@modelcontextprotocol/server-github"]
env = { TOKEN = "${ANVIL_TEST_SURELY_UNSET_VAR}", STATIC = "plain" }
trust = true
timeout_ms = 5000
"#;

    #[test]
    fn parses_every_section() {
        let config = AnvilConfig::parse(FULL, Path::new("config.toml")).unwrap();

        assert!(config.app.debug);
        assert_eq!(config.app.approval_mode, ApprovalMode::AutoEdit);
        assert_eq!(config.app.editor.as_deref(), Some("nvim"));
        assert_eq!(
            config.target_dir(Path::new("/work")),
            PathBuf::from("/work/project")
        );
        assert_eq!(config.tools.exclude, vec!["web_fetch"]);
        assert_eq!(config.tools.shell.allowed_commands, vec!["git status"]);
        assert_eq!(config.tools.shell.max_output_chars, Some(1000));

        let server = &config.mcp_servers["github"];
        assert_eq!(server.command, "npx");
        assert!(server.trust);
        assert_eq!(server.timeout_ms, Some(5000));
    }

    #[test]
    fn discovery_expands_mcp_env() {
        let config = AnvilConfig::parse(FULL, Path::new("config.toml")).unwrap();
        let discovery = config.discovery();

        assert_eq!(discovery.discovery_command.as_deref(), Some("./tools/discover"));
        assert_eq!(discovery.call_command.as_deref(), Some("./tools/call"));
        assert_eq!(discovery.exclude, vec!["web_fetch"]);
        let env = &discovery.mcp_servers["github"].env;
        assert_eq!(env["TOKEN"], "");
        assert_eq!(env["STATIC"], "plain");
    }

    #[test]
    fn empty_file_is_default() {
        let config = AnvilConfig::parse("", Path::new("config.toml")).unwrap();
        assert!(!config.app.debug);
        assert_eq!(config.app.approval_mode, ApprovalMode::Default);
        assert!(config.mcp_servers.is_empty());
        assert_eq!(config.target_dir(Path::new("/work")), PathBuf::from("/work"));
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnvilConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert!(config.tools.exclude.is_empty());
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[app\ndebug = ").unwrap();

        let err = AnvilConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn unknown_approval_mode_is_rejected() {
        let err = AnvilConfig::parse("[app]\napproval_mode = \"sometimes\"", Path::new("c.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn directory_path_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AnvilConfig::load_from(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn override_wins_over_home() {
        assert_eq!(
            config_path(
                Some(OsString::from("/etc/anvil.toml")),
                Some(PathBuf::from("/home/u"))
            ),
            Some(PathBuf::from("/etc/anvil.toml"))
        );
        assert_eq!(
            config_path(Some(OsString::new()), Some(PathBuf::from("/home/u"))),
            Some(PathBuf::from("/home/u/.anvil/config.toml"))
        );
        assert_eq!(config_path(None, None), None);
    }

    #[test]
    fn env_expansion() {
        let path = std::env::var("PATH").unwrap_or_default();
        assert_eq!(expand_env_vars("${PATH}"), path);
        assert_eq!(expand_env_vars("a${ANVIL_TEST_SURELY_UNSET_VAR}b"), "ab");
        assert_eq!(expand_env_vars("x${}y"), "xy");
        assert_eq!(expand_env_vars("keep ${OPEN"), "keep ${OPEN");
        assert_eq!(expand_env_vars("no vars"), "no vars");
    }
}
