use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::capture::fixture::ResponseFormat;
use crate::capture::profile::{default_profiles, TagProfile};
use crate::util::paths::config_path;

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:32145/v1/ws";
pub const DEFAULT_CAPTURE_LOG: &str = "nfc_capture.log";
pub const DEFAULT_TESTDATA_ROOT: &str = "internal/core/testdata";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How long to let the agent finish logging after a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleConfig {
    /// Fixed wait, always applied
    pub delay: Duration,
    /// When set, keep polling the log at this interval until it stops growing
    pub quiescence_poll: Option<Duration>,
    /// Upper bound on the quiescence poll
    pub quiescence_max: Duration,
}

/// Capture run configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Agent WebSocket endpoint
    pub endpoint: String,
    /// Command/response log written by the agent
    pub capture_log: PathBuf,
    /// Root directory for fixture files
    pub testdata_root: PathBuf,
    /// Poll interval requested from the agent on subscribe
    pub poll_interval_ms: u64,
    /// Bound on each receive; also how often cancellation is checked
    pub receive_timeout: Duration,
    /// Bound on each request/reply round trip
    pub rpc_timeout: Duration,
    pub settle: SettleConfig,
    /// Total budget for a capture run, shared by every reader it covers
    pub max_wait: Option<Duration>,
    /// Per-tag wait before the interactive operator is asked to retry
    pub detection_window: Duration,
    pub response_format: ResponseFormat,
    /// Tags to capture, in order
    pub profiles: Vec<TagProfile>,
    /// Drop ISO 15693 profiles on readers that cannot read them
    pub skip_unsupported: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            capture_log: PathBuf::from(DEFAULT_CAPTURE_LOG),
            testdata_root: PathBuf::from(DEFAULT_TESTDATA_ROOT),
            poll_interval_ms: 500,
            receive_timeout: Duration::from_secs(1),
            rpc_timeout: Duration::from_secs(5),
            settle: SettleConfig {
                delay: Duration::from_millis(300),
                quiescence_poll: None,
                quiescence_max: Duration::from_secs(2),
            },
            max_wait: None,
            detection_window: Duration::from_secs(30),
            response_format: ResponseFormat::ResponseOnly,
            profiles: default_profiles(),
            skip_unsupported: true,
        }
    }
}

/// TOML representation of the settle section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlSettleConfig {
    pub delay_ms: Option<u64>,
    pub quiescence_poll_ms: Option<u64>,
    pub quiescence_max_ms: Option<u64>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub endpoint: Option<String>,
    pub capture_log: Option<PathBuf>,
    pub testdata_root: Option<PathBuf>,
    pub poll_interval_ms: Option<u64>,
    pub receive_timeout_ms: Option<u64>,
    pub rpc_timeout_ms: Option<u64>,
    pub max_wait_secs: Option<u64>,
    pub detection_window_secs: Option<u64>,
    pub response_format: Option<ResponseFormat>,
    pub skip_unsupported: Option<bool>,
    pub settle: Option<TomlSettleConfig>,
    pub profiles: Option<Vec<TagProfile>>,
}

impl CaptureConfig {
    /// Defaults overlaid with `~/.tagcap/config.toml` when it exists
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Defaults overlaid with the given TOML file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let toml_config =
            toml::from_str::<TomlConfig>(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let mut config = Self::default();
        config.apply_toml(toml_config);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_toml(&mut self, toml_config: TomlConfig) {
        if let Some(endpoint) = toml_config.endpoint {
            self.endpoint = endpoint;
        }
        if let Some(path) = toml_config.capture_log {
            self.capture_log = path;
        }
        if let Some(path) = toml_config.testdata_root {
            self.testdata_root = path;
        }
        if let Some(ms) = toml_config.poll_interval_ms {
            self.poll_interval_ms = ms;
        }
        if let Some(ms) = toml_config.receive_timeout_ms {
            self.receive_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = toml_config.rpc_timeout_ms {
            self.rpc_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = toml_config.max_wait_secs {
            self.max_wait = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = toml_config.detection_window_secs {
            self.detection_window = Duration::from_secs(secs);
        }
        if let Some(format) = toml_config.response_format {
            self.response_format = format;
        }
        if let Some(skip) = toml_config.skip_unsupported {
            self.skip_unsupported = skip;
        }

        // Load settle configuration
        if let Some(settle) = toml_config.settle {
            if let Some(ms) = settle.delay_ms {
                self.settle.delay = Duration::from_millis(ms);
            }
            if let Some(ms) = settle.quiescence_poll_ms {
                self.settle.quiescence_poll = (ms > 0).then(|| Duration::from_millis(ms));
            }
            if let Some(ms) = settle.quiescence_max_ms {
                self.settle.quiescence_max = Duration::from_millis(ms);
            }
        }

        if let Some(profiles) = toml_config.profiles {
            self.profiles = profiles;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "endpoint must be a ws:// or wss:// URL, got '{}'",
                self.endpoint
            )));
        }
        if self.profiles.is_empty() {
            return Err(ConfigError::Invalid("no tag profiles configured".into()));
        }
        if self.receive_timeout.is_zero() {
            return Err(ConfigError::Invalid("receive timeout must be non-zero".into()));
        }

        let mut seen = HashSet::new();
        for profile in &self.profiles {
            if profile.label.trim().is_empty() || !profile.has_safe_slug() {
                return Err(ConfigError::Invalid(format!(
                    "profile '{}' has an unusable slug '{}'",
                    profile.label, profile.slug
                )));
            }
            if !seen.insert(profile.slug.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate profile slug '{}'",
                    profile.slug
                )));
            }
        }
        Ok(())
    }

    /// Profiles to capture on a given reader
    pub fn profiles_for_reader(&self, supports_iso15693: bool) -> Vec<TagProfile> {
        self.profiles
            .iter()
            .filter(|profile| supports_iso15693 || !self.skip_unsupported || !profile.iso15693)
            .cloned()
            .collect()
    }
}
