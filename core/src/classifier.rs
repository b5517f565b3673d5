use std::fmt;

use crate::error::SupervisorError;
use crate::runtime::RuntimeProfile;

/// The command to supervise: argv plus the "force instrumentation" flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    argv: Vec<String>,
    force_instrumented: bool,
}

impl TargetSpec {
    pub fn new(argv: Vec<String>, force_instrumented: bool) -> Result<Self, SupervisorError> {
        if argv.is_empty() {
            return Err(SupervisorError::EmptyCommand);
        }
        Ok(Self {
            argv,
            force_instrumented,
        })
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    pub fn force_instrumented(&self) -> bool {
        self.force_instrumented
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Raw,
    Instrumented,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::Raw => write!(f, "raw"),
            SessionMode::Instrumented => write!(f, "instrumented"),
        }
    }
}

/// Decide whether `argv` should run with the runtime payload loaded.
///
/// Forced sessions are always instrumented. Otherwise `argv[0]` is compared
/// case-insensitively: a script with the runtime's extension, or an
/// executable whose base name starts with the runtime's prefix.
pub fn classify_command(argv: &[String], force: bool, runtime: &RuntimeProfile) -> SessionMode {
    if force {
        return SessionMode::Instrumented;
    }
    let Some(head) = argv.first() else {
        return SessionMode::Raw;
    };

    let head = head.to_lowercase();
    let extension = runtime.script_extension.to_lowercase();
    if !extension.is_empty() && head.ends_with(&extension) {
        return SessionMode::Instrumented;
    }

    let prefix = runtime.executable_prefix.to_lowercase();
    if !prefix.is_empty() && base_name(&head).starts_with(&prefix) {
        return SessionMode::Instrumented;
    }

    SessionMode::Raw
}

// Accept both separators so Windows-style paths classify the same everywhere.
fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
