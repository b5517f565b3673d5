use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use rtsandbox_protocol::Envelope;

/// Append-only JSON Lines log of one session's decoded events.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    file: File,
    records: u64,
}

impl EventLog {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this handle.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Write the canonical form of `envelope` and flush before returning.
    pub fn append(&mut self, envelope: &Envelope) -> io::Result<()> {
        let mut line = envelope.to_json_line().map_err(io::Error::other)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.records += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn appends_one_record_per_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.jsonl");
        std::fs::write(&path, "{\"event\":\"earlier\",\"data\":{}}\n").expect("seed");

        let mut log = EventLog::open(&path).expect("open");
        let Some(data) = json!({"host": "example.org"}).as_object().cloned() else {
            panic!("object");
        };
        log.append(&Envelope::new("dns", data.clone()).with_time("t1"))
            .expect("append");
        log.append(&Envelope::new("dns", data)).expect("append");
        assert_eq!(log.records(), 2);

        let contents = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines,
            vec![
                "{\"event\":\"earlier\",\"data\":{}}",
                "{\"time\":\"t1\",\"event\":\"dns\",\"data\":{\"host\":\"example.org\"}}",
                "{\"event\":\"dns\",\"data\":{\"host\":\"example.org\"}}",
            ]
        );
    }
}
