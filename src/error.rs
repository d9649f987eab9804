//! Error types for capture runs.

use std::path::PathBuf;

use thiserror::Error;

use crate::agent::error::ChannelError;

pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// `list_readers` returned an empty list
    #[error("No readers connected to the agent")]
    NoReader,

    #[error("Reader index {index} out of range ({count} reader(s) connected)")]
    ReaderIndexOutOfRange { index: usize, count: usize },

    /// The agent answered a request with an `error` field
    #[error("Agent rejected {request}: {message}")]
    Agent { request: String, message: String },

    #[error("Failed to decode {request} reply: {source}")]
    Decode {
        request: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize fixture: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CaptureError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
