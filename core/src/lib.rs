//! Process supervision for sandboxed runtime inspection.
//!
//! A [`Supervisor`] launches one target at a time. Targets recognised as
//! scripts for the configured runtime are started inside a throwaway
//! workspace whose payload reports network and process activity as tagged
//! lines on the target's own output; the [`Demultiplexer`] separates those
//! events from ordinary output and persists them to the session log.

mod classifier;
mod config;
mod demux;
mod display;
mod error;
mod event_log;
mod provision;
mod runtime;
mod sink;
mod supervisor;
mod termination;

pub use classifier::SessionMode;
pub use classifier::TargetSpec;
pub use classifier::classify_command;
pub use config::CONFIG_TOML_FILE;
pub use config::DisplayOptions;
pub use config::SANDBOX_HOME_ENV_VAR;
pub use config::SupervisorConfig;
pub use config::find_sandbox_home;
pub use demux::Demultiplexer;
pub use demux::DemuxStats;
pub use demux::InterceptEvent;
pub use display::DisplayLine;
pub use display::LineTag;
pub use display::classify;
pub use error::ConfigError;
pub use error::Result;
pub use error::SupervisorError;
pub use event_log::EventLog;
pub use provision::Workspace;
pub use provision::provision;
pub use runtime::BUILTIN_PYTHON_PAYLOAD;
pub use runtime::RuntimeProfile;
pub use runtime::TAG_ENV_VAR;
pub use sink::ConsoleLine;
pub use sink::ConsoleReceiver;
pub use sink::ConsoleSender;
pub use sink::console_channel;
pub use supervisor::SessionHandle;
pub use supervisor::SessionId;
pub use supervisor::SessionStatus;
pub use supervisor::StopOutcome;
pub use supervisor::Supervisor;
