//! JSONL replay source.
//!
//! Reads packet frames from a capture file (one JSON object per line) so
//! historical traffic can be run through the same pipeline as a live
//! session. Bad lines are counted and skipped, never fatal.

use crate::Result;
use meshlog_core::RawPacket;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Counters from a replay run.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonlStats {
    /// Non-blank lines read.
    pub lines: usize,
    /// Lines that failed to parse and were skipped.
    pub skipped: usize,
}

/// File-based packet source.
pub struct JsonlSource {
    reader: BufReader<File>,
    path: PathBuf,
    line_no: usize,
    stats: JsonlStats,
}

impl JsonlSource {
    /// Open a capture file for replay.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            reader: BufReader::new(file),
            path,
            line_no: 0,
            stats: JsonlStats::default(),
        })
    }

    /// The next parseable packet, or `None` at end of file.
    pub fn next_packet(&mut self) -> Result<Option<RawPacket>> {
        let mut line = String::new();
        loop {
            line.clear();
            self.line_no += 1;
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            self.stats.lines += 1;
            match RawPacket::parse(trimmed) {
                Ok(packet) => return Ok(Some(packet)),
                Err(e) => {
                    self.stats.skipped += 1;
                    warn!(
                        "Skipping line {} of {}: {}",
                        self.line_no,
                        self.path.display(),
                        e
                    );
                }
            }
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> JsonlStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_replay_skips_bad_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("capture.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"from\":1,\"decoded\":{\"portnum\":\"POSITION_APP\"}}\n",
                "garbage line\n",
                "\n",
                "{\"from\":2,\"decoded\":{\"portnum\":\"TELEMETRY_APP\"}}\n",
            ),
        )
        .unwrap();

        let mut source = JsonlSource::open(&path).unwrap();

        let first = source.next_packet().unwrap().unwrap();
        assert_eq!(first.from, Some(1));
        let second = source.next_packet().unwrap().unwrap();
        assert_eq!(second.from, Some(2));
        assert!(source.next_packet().unwrap().is_none());

        let stats = source.stats();
        assert_eq!(stats.lines, 3);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(JsonlSource::open(tmp.path().join("absent.jsonl")).is_err());
    }
}
