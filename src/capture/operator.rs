//! Operator strategies: who confirms what during a capture run.
//!
//! The automatic operator never asks anything and keeps waiting for tags until
//! the run budget runs out. The interactive operator prompts on a terminal,
//! bounds each wait by a detection window and asks before saving a tag whose
//! detected type does not match the expected profile.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio_util::sync::CancellationToken;

use crate::agent::events::DetectedTag;
use crate::capture::profile::TagProfile;

#[async_trait]
pub trait Operator: Send {
    /// Waiting starts for `profile` (1-based `position` of `total`).
    async fn request_tag(&mut self, profile: &TagProfile, position: usize, total: usize);

    /// How long to wait for a detection before asking to retry. `None` waits
    /// until the run budget is exhausted.
    fn detection_window(&self) -> Option<Duration>;

    /// No tag arrived within the detection window. `true` keeps waiting.
    async fn retry_after_miss(&mut self, profile: &TagProfile) -> bool;

    /// Detected type does not match the profile. `true` saves anyway.
    async fn accept_mismatch(&mut self, profile: &TagProfile, tag: &DetectedTag) -> bool;

    async fn captured(
        &mut self,
        profile: &TagProfile,
        tag: &DetectedTag,
        path: &Path,
        exchanges: usize,
    );
}

async fn write_line<W: AsyncWrite + Unpin + Send>(out: &mut W, line: &str) {
    let result = async {
        out.write_all(line.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await
    }
    .await;
    if let Err(e) = result {
        tracing::debug!(error = %e, "Failed to write operator output");
    }
}

fn describe_capture(profile: &TagProfile, tag: &DetectedTag, path: &Path, exchanges: usize) -> String {
    format!(
        "  {}: UID {} detected as {} (size={}), {} / {}, {} exchange(s)\n  -> Saved: {}",
        profile.label,
        tag.uid,
        if tag.kind.is_empty() { "?" } else { tag.kind.as_str() },
        tag.size,
        tag.protocol,
        tag.protocol_iso,
        exchanges,
        path.display()
    )
}

/// Prints progress and accepts every detection
pub struct AutomaticOperator<W> {
    out: W,
}

impl AutomaticOperator<Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin + Send> AutomaticOperator<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Operator for AutomaticOperator<W> {
    async fn request_tag(&mut self, profile: &TagProfile, position: usize, total: usize) {
        let line = if position == 1 {
            format!("Waiting for tag {}/{}: {}...", position, total, profile.label)
        } else {
            format!(
                "Remove tag, then scan {}/{}: {}...",
                position, total, profile.label
            )
        };
        write_line(&mut self.out, &line).await;
    }

    fn detection_window(&self) -> Option<Duration> {
        None
    }

    async fn retry_after_miss(&mut self, _profile: &TagProfile) -> bool {
        true
    }

    async fn accept_mismatch(&mut self, profile: &TagProfile, tag: &DetectedTag) -> bool {
        tracing::warn!(
            expected = %profile.label,
            detected = %tag.kind,
            uid = %tag.uid,
            "Detected tag type does not match expected profile; saving anyway"
        );
        true
    }

    async fn captured(
        &mut self,
        profile: &TagProfile,
        tag: &DetectedTag,
        path: &Path,
        exchanges: usize,
    ) {
        write_line(&mut self.out, &describe_capture(profile, tag, path, exchanges)).await;
    }
}

/// Prompts on a terminal and reads the operator's answers
pub struct InteractiveOperator<R, W> {
    input: R,
    out: W,
    window: Duration,
    cancel: CancellationToken,
}

impl InteractiveOperator<BufReader<Stdin>, Stdout> {
    pub fn stdio(window: Duration) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), window)
    }
}

impl<R, W> InteractiveOperator<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(input: R, out: W, window: Duration) -> Self {
        Self {
            input,
            out,
            window,
            cancel: CancellationToken::new(),
        }
    }

    /// Abandon pending prompts when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Read one answer line. EOF and cancellation read as an empty answer.
    async fn read_answer(&mut self) -> String {
        let mut line = String::new();
        let read = tokio::select! {
            _ = self.cancel.cancelled() => return String::new(),
            read = self.input.read_line(&mut line) => read,
        };
        match read {
            Ok(_) => line.trim().to_lowercase(),
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read operator input");
                String::new()
            }
        }
    }

    async fn confirm(&mut self, question: &str) -> bool {
        write_line(&mut self.out, &format!("{} (y/n): ", question)).await;
        self.read_answer().await == "y"
    }
}

#[async_trait]
impl<R, W> Operator for InteractiveOperator<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn request_tag(&mut self, profile: &TagProfile, position: usize, total: usize) {
        write_line(
            &mut self.out,
            &format!(
                "\n--- [{}/{}] {} ---\nPlace {} on the reader and press Enter...",
                position, total, profile.label, profile.label
            ),
        )
        .await;
        self.read_answer().await;
        if !self.cancel.is_cancelled() {
            write_line(&mut self.out, "  Waiting for card...").await;
        }
    }

    fn detection_window(&self) -> Option<Duration> {
        Some(self.window)
    }

    async fn retry_after_miss(&mut self, profile: &TagProfile) -> bool {
        write_line(
            &mut self.out,
            &format!("  ERROR: No {} detected within timeout", profile.label),
        )
        .await;
        self.confirm("  Retry?").await
    }

    async fn accept_mismatch(&mut self, profile: &TagProfile, tag: &DetectedTag) -> bool {
        write_line(
            &mut self.out,
            &format!(
                "  WARNING: Detected type '{}' doesn't match expected '{}'",
                tag.kind, profile.label
            ),
        )
        .await;
        self.confirm("  Save anyway?").await
    }

    async fn captured(
        &mut self,
        profile: &TagProfile,
        tag: &DetectedTag,
        path: &Path,
        exchanges: usize,
    ) {
        write_line(&mut self.out, &describe_capture(profile, tag, path, exchanges)).await;
        write_line(&mut self.out, "  Remove the card...").await;
    }
}
