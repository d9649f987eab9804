//! Duplex message channel to the device agent.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::agent::envelope::Envelope;
use crate::agent::error::ChannelError;

/// A session that can exchange envelopes with the agent.
///
/// `receive` must return [`ChannelError::Timeout`] when nothing arrives within
/// the bound so callers can keep polling for cancellation.
#[async_trait]
pub trait EventChannel: Send {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), ChannelError>;

    async fn receive(&mut self, timeout: Duration) -> Result<Envelope, ChannelError>;

    /// Release the transport. Calling this more than once is a no-op.
    async fn close(&mut self) -> Result<(), ChannelError>;
}

/// WebSocket session against the agent's `/v1/ws` endpoint.
pub struct WsSession {
    endpoint: String,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl WsSession {
    pub async fn connect(endpoint: &str) -> Result<Self, ChannelError> {
        let (stream, _) = connect_async(endpoint)
            .await
            .map_err(|e| ChannelError::Connect {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;

        tracing::debug!(endpoint, "Connected to agent");
        Ok(Self {
            endpoint: endpoint.to_string(),
            stream,
            closed: false,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn parse_frame(text: &str) -> Option<Envelope> {
        match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                tracing::warn!("Skipping malformed frame from agent: {e}. Frame: {text}");
                None
            }
        }
    }
}

fn map_transport_error(err: tungstenite::Error) -> ChannelError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            ChannelError::ChannelClosed
        }
        other => ChannelError::Transport(other.to_string()),
    }
}

#[async_trait]
impl EventChannel for WsSession {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::ChannelClosed);
        }
        let raw = serde_json::to_string(envelope)?;
        tracing::trace!("WS send: {}", &raw);
        self.stream
            .send(Message::Text(raw.into()))
            .await
            .map_err(map_transport_error)
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Envelope, ChannelError> {
        if self.closed {
            return Err(ChannelError::ChannelClosed);
        }
        let deadline = Instant::now() + timeout;

        loop {
            let frame = match tokio::time::timeout_at(deadline, self.stream.next()).await {
                Err(_) => return Err(ChannelError::Timeout(timeout.as_millis() as u64)),
                Ok(None) => return Err(ChannelError::ChannelClosed),
                Ok(Some(Err(e))) => return Err(map_transport_error(e)),
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                Message::Text(text) => {
                    tracing::trace!("WS recv: {}", &text);
                    if let Some(envelope) = Self::parse_frame(&text) {
                        return Ok(envelope);
                    }
                }
                Message::Binary(bytes) => {
                    if let Some(envelope) = Self::parse_frame(&String::from_utf8_lossy(&bytes)) {
                        return Ok(envelope);
                    }
                }
                Message::Close(_) => return Err(ChannelError::ChannelClosed),
                // Pings are answered by tungstenite on the next read
                _ => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(ChannelError::Transport(e.to_string())),
        }
    }
}
