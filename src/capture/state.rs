//! Sequencer state and the debounce rule.

use std::fmt;

use crate::agent::events::{ChannelEvent, DetectedTag};

/// Where the sequencer is in a capture run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerState {
    AwaitingSubscription,
    WaitingForTag(usize),
    Settling(usize),
    Saving(usize),
    Complete,
    Cancelled(CancelReason),
}

impl SequencerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SequencerState::Complete | SequencerState::Cancelled(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Cancellation token fired
    Requested,
    /// Total run budget exhausted
    TimedOut,
    /// Operator declined to keep waiting for a tag
    OperatorDeclined,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CancelReason::Requested => "cancelled",
            CancelReason::TimedOut => "timed out",
            CancelReason::OperatorDeclined => "stopped by operator",
        };
        f.write_str(text)
    }
}

/// Profile index plus the remembered uid.
///
/// The index only moves through [`CaptureProgress::advance`], which the
/// sequencer calls after a fixture has been written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureProgress {
    index: usize,
    total: usize,
    last_uid: Option<String>,
}

impl CaptureProgress {
    pub fn new(total: usize) -> Self {
        Self {
            index: 0,
            total,
            last_uid: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn last_uid(&self) -> Option<&str> {
        self.last_uid.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.index >= self.total
    }

    /// Apply an event. Returns the tag when it is a new presentation that
    /// should be captured for the current profile.
    pub fn observe(&mut self, event: &ChannelEvent) -> Option<DetectedTag> {
        if self.is_complete() {
            return None;
        }
        match event {
            ChannelEvent::TagPresent(tag) => {
                if tag.uid.is_empty() || self.last_uid.as_deref() == Some(tag.uid.as_str()) {
                    return None;
                }
                self.last_uid = Some(tag.uid.clone());
                Some(tag.clone())
            }
            ChannelEvent::TagRemoved => {
                self.last_uid = None;
                None
            }
            ChannelEvent::RpcReply(_) | ChannelEvent::Unknown => None,
        }
    }

    /// Move to the next profile. The remembered uid stays set.
    pub fn advance(&mut self) {
        if !self.is_complete() {
            self.index += 1;
        }
    }
}
