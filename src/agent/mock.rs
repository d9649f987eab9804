//! Scripted in-memory agent channel for deterministic testing
//!
//! Implements [`EventChannel`] without opening a socket. Requests are answered
//! from a reply table; unsolicited events follow a script that is released
//! once the client subscribes, mirroring how the real agent only starts
//! polling a reader after `subscribe`.
//!
//! # Example
//! ```no_run
//! use tagcap::agent::mock::{MockChannel, MockScriptBuilder};
//!
//! let script = MockScriptBuilder::new()
//!     .tag_present("04AB12", "NTAG213")
//!     .tag_removed()
//!     .build();
//!
//! let channel = MockChannel::with_readers(&["ACS ACR122U PICC Interface"]).with_script(script);
//! // Hand `channel` to a CaptureEngine...
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::agent::channel::EventChannel;
use crate::agent::envelope::{
    Envelope, CARD_DETECTED, CARD_REMOVED, LIST_READERS, SUBSCRIBE, UNSUBSCRIBE,
};
use crate::agent::error::ChannelError;

/// Upper bound on how long an idle mock receive actually sleeps
const IDLE_SLEEP: Duration = Duration::from_millis(5);

/// How the mock answers a request type
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Reply with a native JSON payload
    Payload(Value),
    /// Reply with the payload serialized into a JSON string
    StringEncoded(Value),
    /// Reply with an `error` field
    Error(String),
    /// Never reply
    Silent,
}

/// One step of the unsolicited event script
#[derive(Clone)]
pub enum MockStep {
    Event(Envelope),
    /// Report a receive timeout
    Idle,
    /// Run a side effect (e.g. append to the capture log), then continue
    Run(Arc<dyn Fn() + Send + Sync>),
    /// Peer hangs up
    Close,
}

impl std::fmt::Debug for MockStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockStep::Event(env) => f.debug_tuple("Event").field(env).finish(),
            MockStep::Idle => write!(f, "Idle"),
            MockStep::Run(_) => write!(f, "Run(..)"),
            MockStep::Close => write!(f, "Close"),
        }
    }
}

#[derive(Default)]
struct MockState {
    replies: HashMap<String, MockReply>,
    before_reply: HashMap<String, Vec<Envelope>>,
    inbound: VecDeque<Envelope>,
    script: VecDeque<MockStep>,
    script_released: bool,
    sent: Vec<Envelope>,
    close_calls: usize,
    closed: bool,
}

/// Mock agent channel for testing
///
/// Clones share state, so a test can keep one handle for assertions while the
/// engine owns another.
#[derive(Clone, Default)]
pub struct MockChannel {
    state: Arc<Mutex<MockState>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel whose agent lists the given readers and accepts (un)subscribe
    pub fn with_readers(names: &[&str]) -> Self {
        let readers: Vec<Value> = names.iter().map(|name| json!({ "name": name })).collect();
        Self::new()
            .with_reply(LIST_READERS, MockReply::Payload(Value::Array(readers)))
            .with_reply(SUBSCRIBE, MockReply::Payload(json!({ "intervalMs": 500 })))
            .with_reply(UNSUBSCRIBE, MockReply::Payload(json!({})))
    }

    pub fn with_reply(self, kind: &str, reply: MockReply) -> Self {
        self.state.lock().replies.insert(kind.to_string(), reply);
        self
    }

    /// Deliver `events` ahead of the next reply to `kind`, as if the agent
    /// emitted them while the request was in flight. Used once.
    pub fn with_events_before_reply(self, kind: &str, events: Vec<Envelope>) -> Self {
        self.state
            .lock()
            .before_reply
            .insert(kind.to_string(), events);
        self
    }

    /// Queue an envelope that is delivered before anything else
    pub fn with_inbound(self, envelope: Envelope) -> Self {
        self.state.lock().inbound.push_back(envelope);
        self
    }

    pub fn with_script(self, steps: Vec<MockStep>) -> Self {
        self.state.lock().script.extend(steps);
        self
    }

    /// All envelopes sent by the client so far
    pub fn sent(&self) -> Vec<Envelope> {
        self.state.lock().sent.clone()
    }

    /// Request types sent by the client, in order
    pub fn sent_kinds(&self) -> Vec<String> {
        self.state
            .lock()
            .sent
            .iter()
            .map(|env| env.kind.clone())
            .collect()
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn reply_kind(kind: &str) -> String {
        match kind {
            LIST_READERS => "readers".to_string(),
            SUBSCRIBE => "subscribed".to_string(),
            UNSUBSCRIBE => "unsubscribed".to_string(),
            other => other.to_string(),
        }
    }
}

#[async_trait]
impl EventChannel for MockChannel {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ChannelError::ChannelClosed);
        }
        state.sent.push(envelope.clone());

        let reply = state.replies.get(&envelope.kind).cloned();
        let response = match reply {
            Some(MockReply::Payload(payload)) => Some(Envelope::request(
                Self::reply_kind(&envelope.kind),
                envelope.id.clone(),
                Some(payload),
            )),
            Some(MockReply::StringEncoded(payload)) => Some(Envelope::request(
                Self::reply_kind(&envelope.kind),
                envelope.id.clone(),
                Some(Value::String(payload.to_string())),
            )),
            Some(MockReply::Error(message)) => Some(Envelope {
                kind: "error".to_string(),
                id: envelope.id.clone(),
                payload: None,
                error: Some(message),
            }),
            Some(MockReply::Silent) | None => None,
        };

        if let Some(response) = response {
            if let Some(events) = state.before_reply.remove(&envelope.kind) {
                state.inbound.extend(events);
            }
            state.inbound.push_back(response);
            if envelope.kind == SUBSCRIBE {
                state.script_released = true;
            }
        }
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Envelope, ChannelError> {
        loop {
            let step = {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(ChannelError::ChannelClosed);
                }
                if let Some(envelope) = state.inbound.pop_front() {
                    return Ok(envelope);
                }
                if state.script_released {
                    state.script.pop_front()
                } else {
                    None
                }
            };

            match step {
                Some(MockStep::Event(envelope)) => return Ok(envelope),
                Some(MockStep::Run(action)) => action(),
                Some(MockStep::Close) => {
                    self.state.lock().closed = true;
                    return Err(ChannelError::ChannelClosed);
                }
                Some(MockStep::Idle) | None => {
                    tokio::time::sleep(timeout.min(IDLE_SLEEP)).await;
                    return Err(ChannelError::Timeout(timeout.as_millis() as u64));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        state.close_calls += 1;
        state.closed = true;
        Ok(())
    }
}

/// Builder for unsolicited event scripts
#[derive(Default)]
pub struct MockScriptBuilder {
    steps: Vec<MockStep>,
}

impl MockScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `card_detected` with a native payload
    pub fn tag_present(mut self, uid: &str, kind: &str) -> Self {
        self.steps.push(MockStep::Event(card_detected(uid, kind)));
        self
    }

    /// `card_detected` reported by a specific reader
    pub fn tag_present_on(mut self, reader_index: usize, uid: &str, kind: &str) -> Self {
        self.steps
            .push(MockStep::Event(card_detected_on(reader_index, uid, kind)));
        self
    }

    /// `card_detected` whose payload is a JSON string
    pub fn tag_present_encoded(mut self, uid: &str, kind: &str) -> Self {
        let mut envelope = card_detected(uid, kind);
        envelope.payload = envelope.payload.map(|p| Value::String(p.to_string()));
        self.steps.push(MockStep::Event(envelope));
        self
    }

    pub fn tag_removed(self) -> Self {
        self.tag_removed_on(0)
    }

    pub fn tag_removed_on(mut self, reader_index: usize) -> Self {
        self.steps.push(MockStep::Event(card_removed_on(reader_index)));
        self
    }

    pub fn event(mut self, envelope: Envelope) -> Self {
        self.steps.push(MockStep::Event(envelope));
        self
    }

    pub fn idle(mut self) -> Self {
        self.steps.push(MockStep::Idle);
        self
    }

    pub fn run(mut self, action: impl Fn() + Send + Sync + 'static) -> Self {
        self.steps.push(MockStep::Run(Arc::new(action)));
        self
    }

    pub fn close(mut self) -> Self {
        self.steps.push(MockStep::Close);
        self
    }

    pub fn build(self) -> Vec<MockStep> {
        self.steps
    }
}

/// `card_detected` envelope shaped like the agent's poller output
pub fn card_detected(uid: &str, kind: &str) -> Envelope {
    card_detected_on(0, uid, kind)
}

pub fn card_detected_on(reader_index: usize, uid: &str, kind: &str) -> Envelope {
    Envelope::event(
        CARD_DETECTED,
        Some(json!({
            "readerIndex": reader_index,
            "card": {
                "uid": uid,
                "atr": "3B8F8001804F0CA0000003060300030000000068",
                "protocol": "NFC-A",
                "protocolISO": "ISO 14443-3A",
                "type": kind,
                "size": 144
            }
        })),
    )
}

pub fn card_removed_on(reader_index: usize) -> Envelope {
    Envelope::event(CARD_REMOVED, Some(json!({ "readerIndex": reader_index })))
}
