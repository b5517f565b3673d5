//! Description of the instrumentable runtime family.
//!
//! Everything runtime-specific lives here: how to recognise a command that
//! belongs to the runtime, which environment variables make the runtime load
//! the payload, and the payload itself. The supervisor and the demultiplexer
//! only ever see the event protocol.

use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ConfigError;

/// Python `sitecustomize` hook shipped with the crate.
pub const BUILTIN_PYTHON_PAYLOAD: &str = include_str!("../payload/sitecustomize.py");

/// Environment variable the payload reads to learn which tag to print.
pub const TAG_ENV_VAR: &str = "RTSANDBOX_TAG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeProfile {
    pub name: String,
    /// Script extension recognised on `argv[0]`, e.g. `.py`.
    pub script_extension: String,
    /// Executable base-name prefix recognised on `argv[0]`, e.g. `python`.
    pub executable_prefix: String,
    /// Module search-path variable the workspace is prepended to.
    pub search_path_var: String,
    /// Variable set to `1` so the child does not buffer its output.
    pub unbuffered_var: String,
    pub payload_file_name: String,
    /// Replaces the built-in payload when set.
    pub payload_path: Option<PathBuf>,
    #[serde(skip)]
    pub(crate) payload_override: Option<String>,
}

impl Default for RuntimeProfile {
    fn default() -> Self {
        Self::python()
    }
}

impl RuntimeProfile {
    pub fn python() -> Self {
        Self {
            name: "python".to_string(),
            script_extension: ".py".to_string(),
            executable_prefix: "python".to_string(),
            search_path_var: "PYTHONPATH".to_string(),
            unbuffered_var: "PYTHONUNBUFFERED".to_string(),
            payload_file_name: "sitecustomize.py".to_string(),
            payload_path: None,
            payload_override: None,
        }
    }

    /// Loads `payload_path` into memory so provisioning never touches the
    /// caller's filesystem after startup.
    pub fn load_payload(&mut self) -> Result<(), ConfigError> {
        let Some(path) = self.payload_path.as_ref() else {
            self.payload_override = None;
            return Ok(());
        };
        let body = std::fs::read_to_string(path).map_err(|source| ConfigError::Payload {
            path: path.clone(),
            source,
        })?;
        self.payload_override = Some(body);
        Ok(())
    }

    pub fn with_payload(mut self, body: impl Into<String>) -> Self {
        self.payload_override = Some(body.into());
        self
    }

    pub fn payload(&self) -> &str {
        self.payload_override
            .as_deref()
            .unwrap_or(BUILTIN_PYTHON_PAYLOAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builtin_payload_reads_tag_from_environment() {
        let profile = RuntimeProfile::python();
        assert!(profile.payload().contains(TAG_ENV_VAR));
        assert!(profile.payload().contains("[INTERCEPT]"));
    }

    #[test]
    fn external_payload_replaces_builtin() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hook.py");
        std::fs::write(&path, "print('hooked')\n").expect("write payload");

        let mut profile = RuntimeProfile {
            payload_path: Some(path),
            ..RuntimeProfile::python()
        };
        profile.load_payload().expect("load payload");
        assert_eq!(profile.payload(), "print('hooked')\n");
    }

    #[test]
    fn missing_external_payload_is_reported() {
        let mut profile = RuntimeProfile {
            payload_path: Some(PathBuf::from("/definitely/not/here.py")),
            ..RuntimeProfile::python()
        };
        assert!(matches!(
            profile.load_payload(),
            Err(ConfigError::Payload { .. })
        ));
    }
}
