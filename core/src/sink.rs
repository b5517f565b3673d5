use std::fmt;

use tokio::sync::mpsc;

use crate::display::DisplayLine;
use crate::display::LineTag;

/// Everything the supervisor wants shown on the console, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleLine {
    /// A raw line of target output.
    Output(String),
    /// A decoded instrumentation event.
    Event(DisplayLine),
    /// A tagged line that failed to decode; carries the raw line.
    DecodeWarning(String),
    /// The target exited on its own.
    Exited(i32),
}

impl ConsoleLine {
    pub fn tag(&self) -> LineTag {
        match self {
            ConsoleLine::Output(_) => LineTag::Out,
            ConsoleLine::Event(line) => line.tag,
            ConsoleLine::DecodeWarning(_) => LineTag::Warn,
            ConsoleLine::Exited(_) => LineTag::Info,
        }
    }

    /// Text after the tag label.
    pub fn body(&self) -> String {
        match self {
            ConsoleLine::Output(text) => text.clone(),
            ConsoleLine::Event(line) => line.text.clone(),
            ConsoleLine::DecodeWarning(raw) => {
                format!("Could not decode intercept line: {}", raw.trim())
            }
            ConsoleLine::Exited(code) => format!("Target exited with code {code}"),
        }
    }
}

impl fmt::Display for ConsoleLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tag().label(), self.body())
    }
}

pub type ConsoleSender = mpsc::UnboundedSender<ConsoleLine>;
pub type ConsoleReceiver = mpsc::UnboundedReceiver<ConsoleLine>;

pub fn console_channel() -> (ConsoleSender, ConsoleReceiver) {
    mpsc::unbounded_channel()
}
