//! Append-only capture log file I/O

use std::path::Path;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

use crate::capture::CapturedExchange;
use crate::Result;

/// Appends capture records to a JSONL log file.
///
/// The file handle is owned exclusively; the recorder funnels every record
/// through a single writer task so lines never interleave.
pub struct CaptureLogWriter {
    file: File,
    written: usize,
}

impl CaptureLogWriter {
    /// Open the log file for appending, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .await?;

        Ok(Self { file, written: 0 })
    }

    /// Append one record as a JSON line and flush.
    ///
    /// Flushing per record keeps the log tailable while recording.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the write fails
    pub async fn append(&mut self, record: &CapturedExchange) -> Result<()> {
        let mut line = record.to_json_line()?;
        line.push('\n');

        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        self.written += 1;

        Ok(())
    }

    /// Number of records appended by this writer
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }
}

/// Read all replay-eligible records from a capture log.
///
/// Lines that fail to parse are skipped with a warning and processing
/// continues. Blank lines are ignored. Records with a status outside the
/// 2xx range are dropped: replay only exercises endpoints that worked when
/// captured. Order follows the file.
///
/// # Errors
///
/// Returns error if the file cannot be opened or read
pub async fn read_capture_log(path: impl AsRef<Path>) -> Result<Vec<CapturedExchange>> {
    let file = File::open(path.as_ref()).await?;
    let mut lines = BufReader::new(file).lines();

    let mut records = Vec::new();
    let mut line_number = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match CapturedExchange::from_json_line(trimmed) {
            Ok(record) => {
                if record.is_success() {
                    records.push(record);
                }
            }
            Err(e) => {
                warn!(line_number, error = %e, "skipping malformed capture log line");
            }
        }
    }

    Ok(records)
}
