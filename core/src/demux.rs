//! Splits the target's merged output into raw lines and tagged events.

use chrono::DateTime;
use chrono::Utc;
use rtsandbox_protocol::Envelope;
use rtsandbox_protocol::EventKind;
use rtsandbox_protocol::decode_tagged;
use rtsandbox_protocol::is_tagged;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tracing::debug;
use tracing::warn;

use crate::classifier::SessionMode;
use crate::config::DisplayOptions;
use crate::display::classify;
use crate::event_log::EventLog;
use crate::sink::ConsoleLine;
use crate::sink::ConsoleSender;

const LINE_BUFFER_INITIAL_CAPACITY: usize = 1024;

/// A decoded event together with its arrival metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct InterceptEvent {
    /// Zero-based arrival index among decoded events of the session.
    pub sequence: u64,
    pub received_at: DateTime<Utc>,
    pub kind: EventKind,
    pub envelope: Envelope,
    /// The line as it appeared on the stream.
    pub raw: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    pub raw_lines: u64,
    pub events: u64,
    pub decode_failures: u64,
}

#[derive(Debug)]
pub struct Demultiplexer {
    mode: SessionMode,
    tag: String,
    display: DisplayOptions,
    log: Option<EventLog>,
    console: ConsoleSender,
    stats: DemuxStats,
}

impl Demultiplexer {
    pub fn new(
        mode: SessionMode,
        tag: impl Into<String>,
        display: DisplayOptions,
        log: Option<EventLog>,
        console: ConsoleSender,
    ) -> Self {
        Self {
            mode,
            tag: tag.into(),
            display,
            log,
            console,
            stats: DemuxStats::default(),
        }
    }

    /// Consume `reader` line by line until end-of-stream.
    ///
    /// Read errors end the stream early; they never surface as a failure of
    /// the session.
    pub async fn run<R>(mut self, mut reader: R) -> DemuxStats
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buf = Vec::with_capacity(LINE_BUFFER_INITIAL_CAPACITY);
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(strip_line_ending(&buf));
                    self.handle_line(&line);
                }
                Err(err) => {
                    warn!(error = %err, "failed to read target output; closing stream");
                    break;
                }
            }
        }
        debug!(stats = ?self.stats, "target output stream closed");
        self.stats
    }

    /// Route a single line (without its terminator).
    pub fn handle_line(&mut self, line: &str) -> Option<InterceptEvent> {
        if self.mode == SessionMode::Instrumented && is_tagged(line, &self.tag) {
            return self.handle_tagged(line);
        }
        self.stats.raw_lines += 1;
        self.send(ConsoleLine::Output(line.to_string()));
        None
    }

    fn handle_tagged(&mut self, line: &str) -> Option<InterceptEvent> {
        let envelope = match decode_tagged(line, &self.tag) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.stats.decode_failures += 1;
                debug!(error = %err, "dropping undecodable intercept line");
                self.send(ConsoleLine::DecodeWarning(line.to_string()));
                return None;
            }
        };

        let event = InterceptEvent {
            sequence: self.stats.events,
            received_at: Utc::now(),
            kind: envelope.kind(),
            envelope,
            raw: line.to_string(),
        };
        self.stats.events += 1;

        if let Some(log) = self.log.as_mut()
            && let Err(err) = log.append(&event.envelope)
        {
            warn!(
                error = %err,
                path = %log.path().display(),
                "failed to append intercept event to log"
            );
        }
        self.send(ConsoleLine::Event(classify(&event.envelope, &self.display)));
        Some(event)
    }

    fn send(&self, line: ConsoleLine) {
        // A closed console only means nobody is watching any more.
        let _ = self.console.send(line);
    }
}

fn strip_line_ending(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::DisplayLine;
    use crate::display::LineTag;
    use crate::sink::ConsoleReceiver;
    use crate::sink::console_channel;
    use pretty_assertions::assert_eq;
    use rtsandbox_protocol::INTERCEPT_TAG;

    fn demux(mode: SessionMode, log: Option<EventLog>) -> (Demultiplexer, ConsoleReceiver) {
        let (tx, rx) = console_channel();
        let demux = Demultiplexer::new(mode, INTERCEPT_TAG, DisplayOptions::default(), log, tx);
        (demux, rx)
    }

    fn drain(rx: &mut ConsoleReceiver) -> Vec<ConsoleLine> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn separates_events_from_raw_output_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log_path = dir.path().join("events.jsonl");
        let log = EventLog::open(&log_path).expect("open log");
        let (demux, mut rx) = demux(SessionMode::Instrumented, Some(log));

        let input = concat!(
            "[INTERCEPT] {\"time\":\"t\",\"event\":\"http\",\"data\":{\"method\":\"get\",\"url\":\"http://example.com\"}}\n",
            "hello\n",
            "[INTERCEPT] {broken\n",
            "[INTERCEPT] {\"event\":\"dns\",\"data\":{\"host\":\"example.com\"}}\r\n",
            "tail without newline",
        );
        let stats = demux.run(input.as_bytes()).await;

        assert_eq!(
            stats,
            DemuxStats {
                raw_lines: 2,
                events: 2,
                decode_failures: 1,
            }
        );
        assert_eq!(
            drain(&mut rx),
            vec![
                ConsoleLine::Event(DisplayLine::new(LineTag::Http, "GET http://example.com")),
                ConsoleLine::Output("hello".to_string()),
                ConsoleLine::DecodeWarning("[INTERCEPT] {broken".to_string()),
                ConsoleLine::Event(DisplayLine::new(LineTag::Dns, "example.com")),
                ConsoleLine::Output("tail without newline".to_string()),
            ]
        );

        let logged = std::fs::read_to_string(&log_path).expect("read log");
        let records: Vec<serde_json::Value> = logged
            .lines()
            .map(|line| serde_json::from_str(line).expect("json record"))
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["event"], "http");
        assert_eq!(records[1]["event"], "dns");
    }

    #[tokio::test]
    async fn raw_sessions_never_decode_tags() {
        let (demux, mut rx) = demux(SessionMode::Raw, None);
        let line = "[INTERCEPT] {\"event\":\"dns\",\"data\":{\"host\":\"x\"}}";
        let stats = demux.run(format!("{line}\n").as_bytes()).await;

        assert_eq!(stats.events, 0);
        assert_eq!(stats.raw_lines, 1);
        assert_eq!(drain(&mut rx), vec![ConsoleLine::Output(line.to_string())]);
    }

    #[test]
    fn events_are_sequenced_by_arrival() {
        let (mut demux, _rx) = demux(SessionMode::Instrumented, None);
        let first = demux
            .handle_line("[INTERCEPT] {\"event\":\"socket\",\"data\":{\"address\":[\"a\",1]}}")
            .expect("first event");
        assert!(demux.handle_line("plain").is_none());
        let second = demux
            .handle_line("[INTERCEPT] {\"event\":\"custom\",\"data\":{}}")
            .expect("second event");

        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(first.kind, EventKind::Socket);
        assert_eq!(second.kind, EventKind::Other("custom".to_string()));
        assert!(second.received_at >= first.received_at);
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced_not_fatal() {
        let (demux, mut rx) = demux(SessionMode::Raw, None);
        let stats = demux.run(&b"caf\xff\nnext\n"[..]).await;
        assert_eq!(stats.raw_lines, 2);
        assert_eq!(
            drain(&mut rx),
            vec![
                ConsoleLine::Output("caf\u{fffd}".to_string()),
                ConsoleLine::Output("next".to_string()),
            ]
        );
    }
}
