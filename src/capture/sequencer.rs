//! Capture sequencer: walks a reader through the configured tag profiles.

use std::path::PathBuf;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::agent::channel::{EventChannel, WsSession};
use crate::agent::events::{classify, event_reader_index};
use crate::agent::rpc::RpcClient;
use crate::capture::capture_log::CaptureLog;
use crate::capture::fixture::FixtureWriter;
use crate::capture::operator::Operator;
use crate::capture::profile::TagProfile;
use crate::capture::reader::{derive_reader_id, supports_iso15693};
use crate::capture::state::{CancelReason, CaptureProgress, SequencerState};
use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};

/// Which readers a run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderScope {
    Index(usize),
    All,
}

/// A reader as listed by the agent, with its derived id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderSummary {
    pub index: usize,
    pub name: String,
    pub reader_id: String,
}

/// Outcome of one reader's capture sequence
#[derive(Debug, Clone)]
pub struct CaptureReport {
    pub reader_index: usize,
    pub reader_name: String,
    pub reader_id: String,
    /// Profiles attempted on this reader
    pub profiles: Vec<TagProfile>,
    /// Written fixtures, in profile order
    pub fixtures: Vec<PathBuf>,
    /// `Complete` or `Cancelled`
    pub state: SequencerState,
}

impl CaptureReport {
    pub fn is_complete(&self) -> bool {
        self.state == SequencerState::Complete
    }
}

/// Connect, list readers and close again.
pub async fn list_readers<C: EventChannel>(
    channel: C,
    config: &CaptureConfig,
) -> Result<Vec<ReaderSummary>> {
    let mut rpc = RpcClient::new(channel);
    let result = rpc.list_readers(config.rpc_timeout).await;
    rpc.close().await;

    Ok(result?
        .iter()
        .enumerate()
        .map(|(index, reader)| {
            let name = reader.display_name(index);
            ReaderSummary {
                index,
                reader_id: derive_reader_id(&name),
                name,
            }
        })
        .collect())
}

pub struct CaptureEngine {
    config: CaptureConfig,
    log: CaptureLog,
    writer: FixtureWriter,
    operator: Box<dyn Operator>,
    cancel: CancellationToken,
}

impl CaptureEngine {
    pub fn new(config: CaptureConfig, operator: Box<dyn Operator>) -> Self {
        let log = CaptureLog::new(config.capture_log.clone());
        let writer = FixtureWriter::new(config.testdata_root.clone(), config.response_format);
        Self {
            config,
            log,
            writer,
            operator,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Open a WebSocket session to the configured endpoint and run.
    pub async fn connect_and_run(&mut self, scope: ReaderScope) -> Result<Vec<CaptureReport>> {
        let session = WsSession::connect(&self.config.endpoint).await?;
        self.run(session, scope).await
    }

    /// Run over an already open channel. The channel is closed on return,
    /// whatever the outcome.
    pub async fn run<C: EventChannel>(
        &mut self,
        channel: C,
        scope: ReaderScope,
    ) -> Result<Vec<CaptureReport>> {
        let mut rpc = RpcClient::new(channel);
        let result = self.run_session(&mut rpc, scope).await;
        rpc.close().await;
        result
    }

    async fn run_session<C: EventChannel>(
        &mut self,
        rpc: &mut RpcClient<C>,
        scope: ReaderScope,
    ) -> Result<Vec<CaptureReport>> {
        let readers = rpc.list_readers(self.config.rpc_timeout).await?;
        if readers.is_empty() {
            return Err(CaptureError::NoReader);
        }

        let indices: Vec<usize> = match scope {
            ReaderScope::Index(index) if index >= readers.len() => {
                return Err(CaptureError::ReaderIndexOutOfRange {
                    index,
                    count: readers.len(),
                });
            }
            ReaderScope::Index(index) => vec![index],
            ReaderScope::All => (0..readers.len()).collect(),
        };

        // one budget for the whole run, however many readers it covers
        let run_deadline = self.config.max_wait.map(|wait| Instant::now() + wait);

        let mut reports = Vec::with_capacity(indices.len());
        for index in indices {
            let name = readers[index].display_name(index);
            let report = self
                .capture_reader(rpc, index, &name, run_deadline)
                .await?;
            let stop = matches!(report.state, SequencerState::Cancelled(_));
            reports.push(report);
            if stop {
                break;
            }
        }
        Ok(reports)
    }

    async fn capture_reader<C: EventChannel>(
        &mut self,
        rpc: &mut RpcClient<C>,
        index: usize,
        name: &str,
        run_deadline: Option<Instant>,
    ) -> Result<CaptureReport> {
        let reader_id = derive_reader_id(name);
        let profiles = self.config.profiles_for_reader(supports_iso15693(name));
        if profiles.len() < self.config.profiles.len() {
            tracing::info!(
                reader = %name,
                skipped = self.config.profiles.len() - profiles.len(),
                "Reader does not support ISO 15693; skipping those profiles"
            );
        }
        tracing::info!(reader = %name, reader_id = %reader_id, index, tags = profiles.len(), "Capturing reader");

        let mut report = CaptureReport {
            reader_index: index,
            reader_name: name.to_string(),
            reader_id,
            profiles,
            fixtures: Vec::new(),
            state: SequencerState::AwaitingSubscription,
        };
        if report.profiles.is_empty() {
            report.state = SequencerState::Complete;
            return Ok(report);
        }

        self.log.clear().await?;
        rpc.subscribe(index, self.config.poll_interval_ms, self.config.rpc_timeout)
            .await?;

        let outcome = self.sequence(rpc, &mut report, run_deadline).await;

        if let Err(e) = rpc.unsubscribe(index, self.config.rpc_timeout).await {
            tracing::warn!(reader = %name, error = %e, "Failed to unsubscribe from reader");
        }
        // whatever queued up for this reader must not reach the next one
        let stale = rpc.discard_backlog();
        if stale > 0 {
            tracing::debug!(reader = %name, stale, "Discarded queued events after unsubscribe");
        }

        outcome.map(|()| report)
    }

    fn transition(report: &mut CaptureReport, state: SequencerState) {
        tracing::debug!(reader = %report.reader_id, from = ?report.state, to = ?state, "Sequencer transition");
        report.state = state;
    }

    fn window_deadline(&self) -> Option<Instant> {
        self.operator
            .detection_window()
            .map(|window| Instant::now() + window)
    }

    async fn sequence<C: EventChannel>(
        &mut self,
        rpc: &mut RpcClient<C>,
        report: &mut CaptureReport,
        run_deadline: Option<Instant>,
    ) -> Result<()> {
        let profiles = report.profiles.clone();
        let total = profiles.len();
        let mut progress = CaptureProgress::new(total);

        Self::transition(report, SequencerState::WaitingForTag(0));
        self.operator.request_tag(&profiles[0], 1, total).await;
        let mut window_deadline = self.window_deadline();

        while !progress.is_complete() {
            let profile = &profiles[progress.index()];

            if run_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                tracing::warn!(reader = %report.reader_id, tag = %profile.label, "Capture run timed out");
                Self::transition(report, SequencerState::Cancelled(CancelReason::TimedOut));
                return Ok(());
            }

            if window_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                if self.operator.retry_after_miss(profile).await {
                    window_deadline = self.window_deadline();
                } else if self.cancel.is_cancelled() {
                    Self::transition(report, SequencerState::Cancelled(CancelReason::Requested));
                    return Ok(());
                } else {
                    Self::transition(
                        report,
                        SequencerState::Cancelled(CancelReason::OperatorDeclined),
                    );
                    return Ok(());
                }
            }

            let received = tokio::select! {
                _ = self.cancel.cancelled() => None,
                received = rpc.next_envelope(self.config.receive_timeout) => Some(received),
            };
            let Some(received) = received else {
                tracing::info!(reader = %report.reader_id, "Capture cancelled");
                Self::transition(report, SequencerState::Cancelled(CancelReason::Requested));
                return Ok(());
            };

            let envelope = match received {
                Ok(envelope) => envelope,
                Err(e) if e.is_timeout() => continue,
                Err(e) => return Err(e.into()),
            };

            if let Some(source) = event_reader_index(&envelope) {
                if source != report.reader_index {
                    tracing::debug!(source, kind = %envelope.kind, "Ignoring event from another reader");
                    continue;
                }
            }

            let event = classify(&envelope);
            tracing::trace!(kind = %envelope.kind, event = event.event_type_name(), "Agent event");

            let Some(tag) = progress.observe(&event) else {
                continue;
            };

            if !profile.matches_detected(&tag.kind)
                && !self.operator.accept_mismatch(profile, &tag).await
            {
                tracing::info!(uid = %tag.uid, expected = %profile.label, "Detection not saved");
                continue;
            }

            let index = progress.index();
            Self::transition(report, SequencerState::Settling(index));
            self.settle().await;

            Self::transition(report, SequencerState::Saving(index));
            let snapshot = self.log.read().await?;
            let path = self
                .writer
                .write(&report.reader_id, profile, &report.reader_name, &tag, &snapshot)
                .await?;
            self.log.clear().await?;

            tracing::info!(
                tag = %profile.label,
                uid = %tag.uid,
                detected = %tag.kind,
                exchanges = snapshot.len(),
                path = %path.display(),
                "Captured tag"
            );
            self.operator
                .captured(profile, &tag, &path, snapshot.len())
                .await;
            report.fixtures.push(path);
            progress.advance();

            if !progress.is_complete() {
                let next = progress.index();
                Self::transition(report, SequencerState::WaitingForTag(next));
                self.operator
                    .request_tag(&profiles[next], next + 1, total)
                    .await;
                window_deadline = self.window_deadline();
            }
        }

        Self::transition(report, SequencerState::Complete);
        Ok(())
    }

    /// Fixed settle delay, optionally followed by waiting for the log to go quiet.
    async fn settle(&self) {
        let settle = self.config.settle;
        tokio::time::sleep(settle.delay).await;

        if let Some(poll) = settle.quiescence_poll {
            if !self.log.wait_quiescent(poll, settle.quiescence_max).await {
                tracing::warn!(
                    max_ms = settle.quiescence_max.as_millis() as u64,
                    "Capture log still growing; reading it anyway"
                );
            }
        }
    }
}
