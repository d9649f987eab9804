//! Fixture records consumed by the tag-detection regression tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::agent::events::DetectedTag;
use crate::capture::capture_log::{LogExchange, LogSnapshot};
use crate::capture::profile::TagProfile;
use crate::error::{CaptureError, Result};

/// Shape of the `responses` map
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseFormat {
    /// operation -> response hex
    #[default]
    ResponseOnly,
    /// operation -> {cmd, rsp}
    WithCommand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapturedResponse {
    Response(String),
    Exchange(LogExchange),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fixture {
    pub reader: String,
    pub reader_id: String,
    pub tag_type: String,
    pub uid: String,
    pub atr: String,
    pub protocol: String,
    pub protocol_iso: String,
    pub responses: BTreeMap<String, CapturedResponse>,
    pub detected_type: String,
    pub detected_size: u64,
    pub captured_at: DateTime<Local>,
}

impl Fixture {
    pub fn build(
        reader_name: &str,
        reader_id: &str,
        profile: &TagProfile,
        tag: &DetectedTag,
        snapshot: &LogSnapshot,
        format: ResponseFormat,
    ) -> Self {
        let responses = snapshot
            .iter()
            .map(|(operation, exchange)| {
                let entry = match format {
                    ResponseFormat::ResponseOnly => CapturedResponse::Response(exchange.rsp.clone()),
                    ResponseFormat::WithCommand => CapturedResponse::Exchange(exchange.clone()),
                };
                (operation.clone(), entry)
            })
            .collect();

        Self {
            reader: reader_name.to_string(),
            reader_id: reader_id.to_string(),
            tag_type: profile.label.clone(),
            uid: tag.uid.clone(),
            atr: tag.atr.clone(),
            protocol: tag.protocol.clone(),
            protocol_iso: tag.protocol_iso.clone(),
            responses,
            detected_type: tag.kind.clone(),
            detected_size: tag.size,
            captured_at: Local::now(),
        }
    }
}

/// Writes fixtures under `<root>/<reader_id>/<slug>.json`
#[derive(Debug, Clone)]
pub struct FixtureWriter {
    root: PathBuf,
    format: ResponseFormat,
}

impl FixtureWriter {
    pub fn new(root: impl Into<PathBuf>, format: ResponseFormat) -> Self {
        Self {
            root: root.into(),
            format,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fixture_path(&self, reader_id: &str, profile: &TagProfile) -> PathBuf {
        self.root
            .join(reader_id)
            .join(format!("{}.json", profile.slug))
    }

    /// Build and persist one fixture, replacing any previous file.
    pub async fn write(
        &self,
        reader_id: &str,
        profile: &TagProfile,
        reader_name: &str,
        tag: &DetectedTag,
        snapshot: &LogSnapshot,
    ) -> Result<PathBuf> {
        let fixture = Fixture::build(reader_name, reader_id, profile, tag, snapshot, self.format);
        let path = self.fixture_path(reader_id, profile);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CaptureError::io(parent, e))?;
        }

        let contents = serde_json::to_string_pretty(&fixture)?;
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| CaptureError::io(&path, e))?;

        tracing::debug!(path = %path.display(), responses = fixture.responses.len(), "Wrote fixture");
        Ok(path)
    }
}
