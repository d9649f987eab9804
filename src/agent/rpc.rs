//! Request/response correlation on top of an [`EventChannel`].
//!
//! The agent interleaves unsolicited events with replies. While a call waits
//! for its reply, every other envelope is queued and handed back, in arrival
//! order, through [`RpcClient::next_envelope`].

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::agent::channel::EventChannel;
use crate::agent::envelope::{Envelope, LIST_READERS, SUBSCRIBE, UNSUBSCRIBE};
use crate::agent::error::ChannelError;
use crate::error::{CaptureError, Result};

/// Reader descriptor as returned by `list_readers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl ReaderInfo {
    /// Display name, falling back to the reader's position.
    pub fn display_name(&self, index: usize) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("Reader {}", index),
        }
    }
}

pub struct RpcClient<C: EventChannel> {
    channel: C,
    backlog: VecDeque<Envelope>,
    id_counter: u64,
}

impl<C: EventChannel> RpcClient<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            backlog: VecDeque::new(),
            id_counter: 1,
        }
    }

    fn next_request_id(&mut self, kind: &str) -> String {
        let id = format!("{}-{}", kind, self.id_counter);
        self.id_counter += 1;
        id
    }

    /// Send a request with an auto-assigned id and wait for its reply payload.
    pub async fn call(
        &mut self,
        kind: &str,
        payload: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_request_id(kind);
        self.call_with_id(kind, &id, payload, timeout).await
    }

    /// Send a request under a caller-supplied id and wait for the matching reply.
    ///
    /// `timeout` bounds the whole wait, not each individual receive.
    pub async fn call_with_id(
        &mut self,
        kind: &str,
        id: &str,
        payload: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        self.channel
            .send(&Envelope::request(kind, id, payload))
            .await?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ChannelError::Timeout(timeout.as_millis() as u64).into());
            }

            let envelope = self.channel.receive(remaining).await.map_err(|e| match e {
                ChannelError::Timeout(_) => ChannelError::Timeout(timeout.as_millis() as u64),
                other => other,
            })?;

            if envelope.id != id {
                tracing::trace!(kind = %envelope.kind, "Queueing envelope received during {kind}");
                self.backlog.push_back(envelope);
                continue;
            }

            if let Some(message) = envelope.error_message() {
                return Err(CaptureError::Agent {
                    request: kind.to_string(),
                    message: message.to_string(),
                });
            }

            return envelope
                .decoded_payload()
                .map_err(|source| CaptureError::Decode {
                    request: kind.to_string(),
                    source,
                });
        }
    }

    /// Next envelope in arrival order, draining queued ones first.
    pub async fn next_envelope(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<Envelope, ChannelError> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Ok(envelope);
        }
        self.channel.receive(timeout).await
    }

    pub async fn list_readers(&mut self, timeout: Duration) -> Result<Vec<ReaderInfo>> {
        let payload = self.call(LIST_READERS, None, timeout).await?;
        if payload.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(payload).map_err(|source| CaptureError::Decode {
            request: LIST_READERS.to_string(),
            source,
        })
    }

    pub async fn subscribe(
        &mut self,
        reader_index: usize,
        interval_ms: u64,
        timeout: Duration,
    ) -> Result<()> {
        self.call(
            SUBSCRIBE,
            Some(json!({ "readerIndex": reader_index, "intervalMs": interval_ms })),
            timeout,
        )
        .await
        .map(|_| ())
    }

    pub async fn unsubscribe(&mut self, reader_index: usize, timeout: Duration) -> Result<()> {
        self.call(
            UNSUBSCRIBE,
            Some(json!({ "readerIndex": reader_index })),
            timeout,
        )
        .await
        .map(|_| ())
    }

    /// Drop queued envelopes. Returns how many were discarded.
    pub fn discard_backlog(&mut self) -> usize {
        let discarded = self.backlog.len();
        self.backlog.clear();
        discarded
    }

    /// Close the underlying channel. Safe to call on every exit path.
    pub async fn close(&mut self) {
        if let Err(e) = self.channel.close().await {
            tracing::debug!(error = %e, "Error while closing agent channel");
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }
}
