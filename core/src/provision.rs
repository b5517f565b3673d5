//! Ephemeral workspace that makes the runtime payload load inside the target.

use std::ffi::OsStr;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use tempfile::TempDir;
use tracing::debug;

use crate::config::SupervisorConfig;
use crate::runtime::TAG_ENV_VAR;

const WORKSPACE_PREFIX: &str = "rtsandbox-";

/// A scratch directory holding the payload and the session's event log.
///
/// Owned by exactly one session. [`Workspace::release`] removes it and may be
/// called any number of times; dropping an unreleased workspace removes it too.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
    log_path: PathBuf,
    env_overlay: Vec<(OsString, OsString)>,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Variables to set on top of the inherited environment.
    pub fn env_overlay(&self) -> &[(OsString, OsString)] {
        &self.env_overlay
    }

    pub fn is_released(&self) -> bool {
        self.dir.is_none()
    }

    pub fn release(&mut self) -> io::Result<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        debug!(path = %self.path.display(), "releasing instrumentation workspace");
        dir.close()
    }
}

/// Create a fresh workspace for `config.runtime`, write the payload into it and
/// compute the environment overlay against the current process environment.
pub fn provision(config: &SupervisorConfig) -> io::Result<Workspace> {
    let runtime = &config.runtime;
    let dir = tempfile::Builder::new()
        .prefix(WORKSPACE_PREFIX)
        .tempdir()?;
    let path = dir.path().to_path_buf();

    fs::write(path.join(&runtime.payload_file_name), runtime.payload())?;

    let log_path = path.join(&config.log_file_name);
    fs::File::create(&log_path)?;

    let prior = std::env::var_os(&runtime.search_path_var);
    let search_path = prepend_search_path(&path, prior.as_deref())?;
    let env_overlay = vec![
        (OsString::from(&runtime.search_path_var), search_path),
        (OsString::from(&runtime.unbuffered_var), OsString::from("1")),
        (OsString::from(TAG_ENV_VAR), OsString::from(&config.tag)),
    ];

    debug!(path = %path.display(), "provisioned instrumentation workspace");
    Ok(Workspace {
        dir: Some(dir),
        path,
        log_path,
        env_overlay,
    })
}

/// `workspace` followed by the previous search path, if it had any entries.
fn prepend_search_path(workspace: &Path, prior: Option<&OsStr>) -> io::Result<OsString> {
    let mut entries = vec![workspace.to_path_buf()];
    if let Some(prior) = prior
        && !prior.is_empty()
    {
        entries.extend(std::env::split_paths(prior));
    }
    std::env::join_paths(entries).map_err(io::Error::other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeProfile;
    use pretty_assertions::assert_eq;

    fn overlay_value<'a>(workspace: &'a Workspace, key: &str) -> Option<&'a OsStr> {
        workspace
            .env_overlay()
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_os_str())
    }

    #[test]
    fn provision_writes_payload_and_log_inside_workspace() {
        let config = SupervisorConfig {
            runtime: RuntimeProfile::python().with_payload("# hook\n"),
            ..SupervisorConfig::default()
        };
        let mut workspace = provision(&config).expect("provision");

        let payload = workspace.path().join("sitecustomize.py");
        assert_eq!(fs::read_to_string(&payload).expect("payload"), "# hook\n");
        assert!(workspace.log_path().starts_with(workspace.path()));
        assert!(workspace.log_path().is_file());
        assert_eq!(overlay_value(&workspace, "PYTHONUNBUFFERED"), Some(OsStr::new("1")));
        assert_eq!(
            overlay_value(&workspace, TAG_ENV_VAR),
            Some(OsStr::new("[INTERCEPT]"))
        );
        let search_path = overlay_value(&workspace, "PYTHONPATH").expect("search path");
        let first = std::env::split_paths(search_path).next().expect("entry");
        assert_eq!(first, workspace.path());

        workspace.release().expect("release");
    }

    #[test]
    fn release_is_idempotent_and_removes_everything() {
        let mut workspace = provision(&SupervisorConfig::default()).expect("provision");
        let path = workspace.path().to_path_buf();
        assert!(path.is_dir());

        workspace.release().expect("first release");
        assert!(!path.exists());
        assert!(workspace.is_released());
        workspace.release().expect("second release");
    }

    #[test]
    fn dropping_a_workspace_removes_it() {
        let workspace = provision(&SupervisorConfig::default()).expect("provision");
        let path = workspace.path().to_path_buf();
        drop(workspace);
        assert!(!path.exists());
    }

    #[test]
    fn prior_search_path_is_preserved_after_workspace() {
        let workspace = Path::new("/tmp/ws");
        let prior = std::env::join_paths(["/opt/lib", "/srv/lib"]).expect("join");
        let joined = prepend_search_path(workspace, Some(&prior)).expect("prepend");
        let entries: Vec<PathBuf> = std::env::split_paths(&joined).collect();
        assert_eq!(
            entries,
            vec![
                PathBuf::from("/tmp/ws"),
                PathBuf::from("/opt/lib"),
                PathBuf::from("/srv/lib"),
            ]
        );
    }

    #[test]
    fn empty_prior_search_path_adds_no_trailing_entry() {
        let joined = prepend_search_path(Path::new("/tmp/ws"), Some(OsStr::new(""))).expect("prepend");
        assert_eq!(joined, OsString::from("/tmp/ws"));
        let joined = prepend_search_path(Path::new("/tmp/ws"), None).expect("prepend");
        assert_eq!(joined, OsString::from("/tmp/ws"));
    }
}
