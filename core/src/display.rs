//! Human-readable rendering of decoded events and console lines.

use std::fmt;

use rtsandbox_protocol::Envelope;
use rtsandbox_protocol::EventKind;
use serde_json::Map;
use serde_json::Value;

use crate::config::DisplayOptions;

const MISSING: &str = "?";
const UNREPRESENTABLE: &str = "<unrepresentable>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineTag {
    Out,
    Http,
    Dns,
    Socket,
    Process,
    Event,
    Warn,
    Info,
}

impl LineTag {
    pub fn label(self) -> &'static str {
        match self {
            LineTag::Out => "[OUT ]",
            LineTag::Http => "[HTTP]",
            LineTag::Dns => "[DNS ]",
            LineTag::Socket => "[SOCK]",
            LineTag::Process => "[PROC]",
            LineTag::Event => "[EVNT]",
            LineTag::Warn => "[WARN]",
            LineTag::Info => "[*]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayLine {
    pub tag: LineTag,
    pub text: String,
}

impl DisplayLine {
    pub fn new(tag: LineTag, text: impl Into<String>) -> Self {
        Self {
            tag,
            text: text.into(),
        }
    }
}

impl fmt::Display for DisplayLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tag.label(), self.text)
    }
}

/// Render one event envelope for the console.
pub fn classify(envelope: &Envelope, options: &DisplayOptions) -> DisplayLine {
    let data = &envelope.data;
    match envelope.kind() {
        EventKind::Http => {
            let method = field_text(data, "method").to_uppercase();
            let url = field_text(data, "url");
            DisplayLine::new(LineTag::Http, format!("{method} {url}"))
        }
        EventKind::Dns => DisplayLine::new(LineTag::Dns, field_text(data, "host")),
        EventKind::Socket => {
            let (host, port) = socket_endpoint(data.get("address"), &options.unknown_port);
            DisplayLine::new(LineTag::Socket, format!("{host}:{port}"))
        }
        EventKind::Process => DisplayLine::new(LineTag::Process, command_line(data.get("cmd"))),
        EventKind::Other(name) => {
            let payload = Value::Object(data.clone());
            DisplayLine::new(LineTag::Event, format!("{name}: {payload}"))
        }
    }
}

fn field_text(data: &Map<String, Value>, key: &str) -> String {
    data.get(key)
        .map_or_else(|| MISSING.to_string(), value_text)
}

/// Strings verbatim, null as the missing marker, anything else as JSON.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => MISSING.to_string(),
        other => other.to_string(),
    }
}

fn socket_endpoint(address: Option<&Value>, unknown_port: &str) -> (String, String) {
    match address {
        Some(Value::Array(parts)) if parts.len() >= 2 => {
            (value_text(&parts[0]), value_text(&parts[1]))
        }
        Some(other) => (value_text(other), unknown_port.to_string()),
        None => (MISSING.to_string(), unknown_port.to_string()),
    }
}

fn command_line(cmd: Option<&Value>) -> String {
    match cmd {
        Some(Value::Array(parts)) => {
            let mut pieces = Vec::with_capacity(parts.len());
            for part in parts {
                match part {
                    Value::String(text) => pieces.push(text.as_str()),
                    _ => return UNREPRESENTABLE.to_string(),
                }
            }
            pieces.join(" ")
        }
        Some(Value::String(text)) => text.clone(),
        _ => UNREPRESENTABLE.to_string(),
    }
}
