use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

/// Literal prefix that marks a line as an instrumentation event.
pub const INTERCEPT_TAG: &str = "[INTERCEPT]";

/// One event as reported by the payload. This is also the canonical record
/// persisted to the session log (one JSON object per line, tag removed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// ISO-8601 timestamp as written by the payload. Kept verbatim; payloads
    /// are free to emit naive or zoned timestamps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    pub event: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            time: None,
            event: event.into(),
            data,
        }
    }

    pub fn with_time(mut self, time: impl Into<String>) -> Self {
        self.time = Some(time.into());
        self
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from_name(&self.event)
    }

    /// Canonical single-line JSON form, without the tag.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Socket,
    Dns,
    Http,
    Process,
    Other(String),
}

impl EventKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "socket" => Self::Socket,
            "dns" => Self::Dns,
            "http" => Self::Http,
            "process" => Self::Process,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Socket => "socket",
            Self::Dns => "dns",
            Self::Http => "http",
            Self::Process => "process",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("line does not start with the intercept tag")]
    MissingTag,
    #[error("malformed event envelope: {0}")]
    Json(#[from] serde_json::Error),
}

/// Whether `line` carries `tag` and should be treated as an event.
pub fn is_tagged(line: &str, tag: &str) -> bool {
    !tag.is_empty() && line.starts_with(tag)
}

/// Decode a tagged line using a caller-supplied tag.
pub fn decode_tagged(line: &str, tag: &str) -> Result<Envelope, DecodeError> {
    if !is_tagged(line, tag) {
        return Err(DecodeError::MissingTag);
    }
    let body = line[tag.len()..].trim();
    Ok(serde_json::from_str(body)?)
}

/// Encode an envelope as a tagged wire line (no trailing newline).
pub fn encode_tagged(envelope: &Envelope, tag: &str) -> Result<String, serde_json::Error> {
    Ok(format!("{tag} {}", envelope.to_json_line()?))
}

pub fn decode_line(line: &str) -> Result<Envelope, DecodeError> {
    decode_tagged(line, INTERCEPT_TAG)
}

pub fn encode_line(envelope: &Envelope) -> Result<String, serde_json::Error> {
    encode_tagged(envelope, INTERCEPT_TAG)
}
