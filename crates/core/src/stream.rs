//! Captured event streams: one JSON event per line.
//!
//! ```jsonl
//! {"type":"chunk","id":"e1","sessionId":"s1","messageId":"m1","delta":"Hel"}
//! {"type":"chunk","id":"e2","sessionId":"s1","messageId":"m1","delta":"lo"}
//! {"type":"done","id":"e3","sessionId":"s1","messageId":"m1"}
//! ```
//!
//! Blank lines are skipped. A line that is not JSON is kept as
//! [`StreamLine::Undecodable`] rather than failing the whole capture, because
//! a noisy channel is exactly what captures are recorded to reproduce.

use serde_json::Value;
use std::io::{self, BufRead, Write};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StreamError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error at line {line}: {source}")]
    Json {
        line: usize,
        source: serde_json::Error,
    },
}

/// One non-blank line of a capture.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamLine {
    Value { line: usize, value: Value },
    Undecodable { line: usize, reason: String },
}

impl StreamLine {
    pub fn line(&self) -> usize {
        match self {
            Self::Value { line, .. } | Self::Undecodable { line, .. } => *line,
        }
    }
}

/// Read every line of a capture. Only I/O failures are errors; a line that
/// is not UTF-8 or not JSON comes back as [`StreamLine::Undecodable`].
pub fn read_stream<R: BufRead>(reader: R) -> Result<Vec<StreamLine>, StreamError> {
    let mut out = Vec::new();
    for (index, bytes) in reader.split(b'\n').enumerate() {
        let bytes = bytes?;
        let line = index + 1;
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                out.push(StreamLine::Undecodable {
                    line,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        out.push(match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => StreamLine::Value { line, value },
            Err(e) => StreamLine::Undecodable {
                line,
                reason: e.to_string(),
            },
        });
    }
    Ok(out)
}

pub fn from_stream_str(s: &str) -> Vec<StreamLine> {
    // Reading from a byte slice cannot fail with an I/O error.
    read_stream(io::BufReader::new(s.as_bytes())).unwrap_or_default()
}

/// Write values as JSONL, one per line.
pub fn write_stream<W: Write, T: serde::Serialize>(
    items: &[T],
    mut writer: W,
) -> Result<(), StreamError> {
    for (index, item) in items.iter().enumerate() {
        serde_json::to_writer(&mut writer, item).map_err(|e| StreamError::Json {
            line: index + 1,
            source: e,
        })?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}
