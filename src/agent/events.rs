use serde::{Deserialize, Serialize};

use crate::agent::envelope::{Envelope, CARD_DETECTED, CARD_REMOVED};

/// Tag attributes reported by the agent with a `card_detected` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedTag {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub atr: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default, rename = "protocolISO")]
    pub protocol_iso: String,
    /// Type label inferred by the agent (e.g. "NTAG215")
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Inferred storage size in bytes
    #[serde(default)]
    pub size: u64,
}

/// Classified form of an incoming envelope
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Reply to a request we sent
    RpcReply(Envelope),
    TagPresent(DetectedTag),
    TagRemoved,
    Unknown,
}

impl ChannelEvent {
    pub fn event_type_name(&self) -> &'static str {
        match self {
            ChannelEvent::RpcReply(_) => "RpcReply",
            ChannelEvent::TagPresent(_) => "TagPresent",
            ChannelEvent::TagRemoved => "TagRemoved",
            ChannelEvent::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Deserialize)]
struct CardDetectedPayload {
    card: Option<DetectedTag>,
}

/// Classify an envelope. Malformed `card_detected` payloads become `Unknown`.
pub fn classify(envelope: &Envelope) -> ChannelEvent {
    match envelope.kind.as_str() {
        CARD_DETECTED => match decode_detected_tag(envelope) {
            Some(tag) => ChannelEvent::TagPresent(tag),
            None => ChannelEvent::Unknown,
        },
        CARD_REMOVED => ChannelEvent::TagRemoved,
        _ if !envelope.id.is_empty() => ChannelEvent::RpcReply(envelope.clone()),
        _ => ChannelEvent::Unknown,
    }
}

/// Reader a `card_detected`/`card_removed` event came from, when the agent says.
pub fn event_reader_index(envelope: &Envelope) -> Option<usize> {
    if envelope.kind != CARD_DETECTED && envelope.kind != CARD_REMOVED {
        return None;
    }
    let payload = envelope.decoded_payload().ok()?;
    payload
        .get("readerIndex")
        .and_then(|index| index.as_u64())
        .and_then(|index| usize::try_from(index).ok())
}

fn decode_detected_tag(envelope: &Envelope) -> Option<DetectedTag> {
    let payload = match envelope.decoded_payload() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::debug!("Ignoring card_detected with undecodable payload: {e}");
            return None;
        }
    };

    match serde_json::from_value::<CardDetectedPayload>(payload) {
        // A card_detected without a card object still means "something is there";
        // the empty uid keeps it from ever qualifying as a presentation.
        Ok(parsed) => Some(parsed.card.unwrap_or_default()),
        Err(e) => {
            tracing::debug!("Ignoring card_detected with unexpected shape: {e}");
            None
        }
    }
}
