use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ConfigError;
use crate::runtime::RuntimeProfile;
use rtsandbox_protocol::INTERCEPT_TAG;

pub const CONFIG_TOML_FILE: &str = "config.toml";

/// Overrides the directory holding `config.toml` (defaults to `~/.rtsandbox`).
pub const SANDBOX_HOME_ENV_VAR: &str = "RTSANDBOX_HOME";

const DEFAULT_GRACE_PERIOD_MS: u64 = 3_000;
const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_LOG_FILE_NAME: &str = "events.jsonl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// How long `stop` waits after the graceful signal before killing.
    pub grace_period_ms: u64,
    /// How long `stop` waits for the output reader to reach end-of-stream.
    pub drain_timeout_ms: u64,
    pub tag: String,
    pub log_file_name: String,
    /// Hand the supervisor's stdin to the target. Off for the interactive
    /// console, which reads stdin itself.
    pub inherit_stdin: bool,
    pub display: DisplayOptions,
    pub runtime: RuntimeProfile,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
            tag: INTERCEPT_TAG.to_string(),
            log_file_name: DEFAULT_LOG_FILE_NAME.to_string(),
            inherit_stdin: false,
            display: DisplayOptions::default(),
            runtime: RuntimeProfile::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayOptions {
    /// Shown in place of the port when a socket address cannot be split.
    pub unknown_port: String,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            unknown_port: "?".to_string(),
        }
    }
}

impl SupervisorConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn from_toml_str(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.runtime.load_payload()?;
        Ok(config)
    }

    /// Resolve configuration: an explicit path must exist; otherwise the file
    /// under the sandbox home is used when present, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match find_sandbox_home().map(|home| home.join(CONFIG_TOML_FILE)) {
                Some(path) if path.is_file() => path,
                _ => {
                    tracing::debug!("no config file found; using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Self::from_toml_str(&path, &contents)
    }
}

/// `$RTSANDBOX_HOME`, falling back to `~/.rtsandbox`.
pub fn find_sandbox_home() -> Option<PathBuf> {
    if let Some(home) = std::env::var_os(SANDBOX_HOME_ENV_VAR)
        && !home.is_empty()
    {
        return Some(PathBuf::from(home));
    }
    dirs::home_dir().map(|home| home.join(".rtsandbox"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_documented_values() {
        let config = SupervisorConfig::default();
        assert_eq!(config.grace_period(), Duration::from_secs(3));
        assert_eq!(config.tag, "[INTERCEPT]");
        assert_eq!(config.log_file_name, "events.jsonl");
        assert_eq!(config.display.unknown_port, "?");
        assert_eq!(config.runtime.search_path_var, "PYTHONPATH");
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let config = SupervisorConfig::from_toml_str(
            Path::new("config.toml"),
            r#"
grace_period_ms = 500

[display]
unknown_port = "-"

[runtime]
executable_prefix = "pypy"
"#,
        )
        .expect("parse config");

        assert_eq!(config.grace_period(), Duration::from_millis(500));
        assert_eq!(config.display.unknown_port, "-");
        assert_eq!(config.runtime.executable_prefix, "pypy");
        assert_eq!(config.runtime.script_extension, ".py");
        assert_eq!(config.drain_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = SupervisorConfig::from_toml_str(Path::new("bad.toml"), "grace_period_ms = [")
            .expect_err("should fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn explicit_missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            SupervisorConfig::load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn explicit_file_is_loaded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_TOML_FILE);
        std::fs::write(&path, "tag = \"@@EV\"\n").expect("write config");
        let config = SupervisorConfig::load(Some(&path)).expect("load");
        assert_eq!(config.tag, "@@EV");
    }
}
