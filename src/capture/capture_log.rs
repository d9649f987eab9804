//! Side-channel command/response log written by the agent.
//!
//! With `NFC_CAPTURE_LOG=1` the agent appends one line per exchange:
//!
//! ```text
//! 2025-01-14T10:02:11Z | GET_UID | cmd=FFCA000000 | rsp=04A2B3C4D5E6F79000
//! ```
//!
//! The file is owned by the agent; this side only reads it and deletes it
//! between capture windows.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{CaptureError, Result};

const FIELD_DELIMITER: char = '|';
const CMD_PREFIX: &str = "cmd=";
const RSP_PREFIX: &str = "rsp=";

/// One command/response exchange
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogExchange {
    pub cmd: String,
    pub rsp: String,
}

/// Exchanges keyed by lower-cased operation name
pub type LogSnapshot = BTreeMap<String, LogExchange>;

/// Parse log text. Lines with fewer than four fields are skipped; a later
/// line for the same operation replaces an earlier one.
pub fn parse_log(text: &str) -> LogSnapshot {
    let mut exchanges = LogSnapshot::new();

    for line in text.lines() {
        let fields: Vec<&str> = line.split(FIELD_DELIMITER).map(str::trim).collect();
        if fields.len() < 4 {
            continue;
        }

        let operation = fields[1].to_lowercase();
        if operation.is_empty() {
            continue;
        }

        exchanges.insert(
            operation,
            LogExchange {
                cmd: strip_marker(fields[2], CMD_PREFIX),
                rsp: strip_marker(fields[3], RSP_PREFIX),
            },
        );
    }

    exchanges
}

fn strip_marker(field: &str, marker: &str) -> String {
    field.strip_prefix(marker).unwrap_or(field).trim().to_string()
}

/// Handle on the agent's capture log file
#[derive(Debug, Clone)]
pub struct CaptureLog {
    path: PathBuf,
}

impl CaptureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot the current log. A missing file reads as empty.
    pub async fn read(&self) -> Result<LogSnapshot> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(parse_log(&String::from_utf8_lossy(&bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(LogSnapshot::new()),
            Err(e) => Err(CaptureError::io(&self.path, e)),
        }
    }

    /// Delete the log so the next window starts empty. A missing file is fine.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CaptureError::io(&self.path, e)),
        }
    }

    async fn len(&self) -> u64 {
        tokio::fs::metadata(&self.path)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0)
    }

    /// Wait until the file size holds steady across one `poll` interval,
    /// giving up after `max_wait`. Returns whether the log went quiet.
    pub async fn wait_quiescent(&self, poll: Duration, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        let mut last = self.len().await;

        loop {
            if Instant::now() + poll > deadline {
                return false;
            }
            tokio::time::sleep(poll).await;
            let current = self.len().await;
            if current == last {
                return true;
            }
            last = current;
        }
    }
}
