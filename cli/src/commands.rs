//! Parsing of console input lines.

use rtsandbox_core::TargetSpec;
use thiserror::Error;

pub const RUN_USAGE: &str = "run [--python|--py] <command...>";

const FORCE_FLAGS: [&str; 2] = ["--python", "--py"];
const HELP_FLAGS: [&str; 2] = ["-h", "--help"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Run(RunRequest),
    Stop,
    Status,
    Help,
    Exit,
    Empty,
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunRequest {
    Start(TargetSpec),
    /// `run --help`: print usage, start nothing.
    Usage,
}

/// Malformed console input. Reported to the user; session state is untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("No command provided.")]
    NoCommand,
    #[error("No command provided after flags.")]
    NoCommandAfterFlags,
    #[error("Could not parse command: unbalanced quotes.")]
    UnbalancedQuotes,
}

/// Interpret one line typed at the console prompt.
pub fn parse_console_line(line: &str) -> Result<ConsoleCommand, UsageError> {
    let line = line.trim();
    let command = match line {
        "" => ConsoleCommand::Empty,
        "stop" => ConsoleCommand::Stop,
        "status" => ConsoleCommand::Status,
        "exit" => ConsoleCommand::Exit,
        "help" | "-h" | "--help" => ConsoleCommand::Help,
        "run" => return Err(UsageError::NoCommand),
        _ => match run_arguments(line) {
            Some(rest) => ConsoleCommand::Run(parse_run_args(rest)?),
            None => ConsoleCommand::Unknown(line.to_string()),
        },
    };
    Ok(command)
}

/// Whether `line` is a `run` command, well-formed or not.
pub fn is_run_command(line: &str) -> bool {
    let line = line.trim();
    line == "run" || run_arguments(line).is_some()
}

fn run_arguments(line: &str) -> Option<&str> {
    line.strip_prefix("run")
        .filter(|rest| rest.starts_with(char::is_whitespace))
}

/// Tokenize the arguments of `run` with shell-style quoting.
///
/// Leading `--python`/`--py` flags (any case) force instrumentation; a
/// following `-h`/`--help` asks for usage instead of a launch.
pub fn parse_run_args(raw: &str) -> Result<RunRequest, UsageError> {
    let tokens = shlex::split(raw).ok_or(UsageError::UnbalancedQuotes)?;
    if tokens.is_empty() {
        return Err(UsageError::NoCommand);
    }

    let mut rest = tokens.as_slice();
    let mut force_instrumented = false;
    while let Some((first, tail)) = rest.split_first()
        && FORCE_FLAGS.contains(&first.to_lowercase().as_str())
    {
        force_instrumented = true;
        rest = tail;
    }

    let mut help_requested = false;
    if let Some((first, tail)) = rest.split_first()
        && HELP_FLAGS.contains(&first.as_str())
    {
        help_requested = true;
        rest = tail;
    }

    if help_requested {
        return Ok(RunRequest::Usage);
    }
    if rest.is_empty() {
        return Err(UsageError::NoCommandAfterFlags);
    }

    TargetSpec::new(rest.to_vec(), force_instrumented)
        .map(RunRequest::Start)
        .map_err(|_| UsageError::NoCommand)
}
