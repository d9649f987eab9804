use thiserror::Error;

/// Errors raised by the message channel to the device agent.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to connect to agent at {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    #[error("No message received within {0}ms")]
    Timeout(u64),

    #[error("Channel closed by peer")]
    ChannelClosed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ChannelError {
    /// Whether the caller can keep waiting on the same session.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ChannelError::Timeout(_))
    }
}
