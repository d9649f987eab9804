//! CLI argument parsing using Clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::capture::fixture::ResponseFormat;
use crate::capture::profile::TagProfile;
use crate::capture::sequencer::ReaderScope;
use crate::config::{CaptureConfig, ConfigError};

/// tagcap - capture NFC reader fixtures from a running nfc-agent
#[derive(Parser, Debug)]
#[command(name = "tagcap")]
#[command(version, about, long_about = None)]
#[command(after_help = "Examples:
  tagcap capture                          Capture the default tags on reader 0
  tagcap capture --all-readers            Capture every connected reader in turn
  tagcap capture -i --reader 1            Prompt before each tag on reader 1
  tagcap capture --profile NTAG424=ntag424
  tagcap readers                          List readers and their fixture ids
")]
pub struct Cli {
    /// Config file (defaults to ~/.tagcap/config.toml)
    #[arg(long, global = true, env = "TAGCAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Agent WebSocket endpoint
    #[arg(long, global = true, env = "TAGCAP_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Walk one or more readers through the tag profiles and write fixtures
    Capture(CaptureArgs),
    /// List readers connected to the agent
    Readers,
    /// Print an example config file
    ExampleConfig,
}

#[derive(Args, Debug, Default)]
pub struct CaptureArgs {
    /// Reader index to capture
    #[arg(long, default_value_t = 0, conflicts_with = "all_readers")]
    pub reader: usize,

    /// Capture every connected reader, one after another
    #[arg(long)]
    pub all_readers: bool,

    /// Prompt before each tag and confirm type mismatches
    #[arg(short, long)]
    pub interactive: bool,

    /// Capture log written by the agent
    #[arg(long)]
    pub capture_log: Option<PathBuf>,

    /// Fixture output root
    #[arg(long)]
    pub testdata: Option<PathBuf>,

    /// Settle delay after a detection, in milliseconds
    #[arg(long)]
    pub settle_ms: Option<u64>,

    /// Give up on the whole run after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Store each command next to its response
    #[arg(long)]
    pub with_commands: bool,

    /// Tag to capture as LABEL=slug (repeatable; replaces configured profiles)
    #[arg(long = "profile", value_name = "LABEL=SLUG", value_parser = parse_profile, action = clap::ArgAction::Append)]
    pub profiles: Vec<TagProfile>,
}

fn parse_profile(value: &str) -> Result<TagProfile, String> {
    TagProfile::parse(value)
        .ok_or_else(|| format!("invalid profile '{value}', expected LABEL=slug"))
}

impl Cli {
    /// Load the config file and apply global overrides
    pub fn load_config(&self) -> Result<CaptureConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => CaptureConfig::load_from(path)?,
            None => CaptureConfig::load()?,
        };
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

impl CaptureArgs {
    pub fn scope(&self) -> ReaderScope {
        if self.all_readers {
            ReaderScope::All
        } else {
            ReaderScope::Index(self.reader)
        }
    }

    /// Overlay command-line flags on a loaded config
    pub fn apply(&self, config: &mut CaptureConfig) -> Result<(), ConfigError> {
        if let Some(path) = &self.capture_log {
            config.capture_log = path.clone();
        }
        if let Some(path) = &self.testdata {
            config.testdata_root = path.clone();
        }
        if let Some(ms) = self.settle_ms {
            config.settle.delay = Duration::from_millis(ms);
        } else if self.interactive {
            // operators take longer to settle a tag by hand
            config.settle.delay = config.settle.delay.max(Duration::from_millis(500));
        }
        if let Some(secs) = self.timeout_secs {
            config.max_wait = Some(Duration::from_secs(secs));
        }
        if self.with_commands {
            config.response_format = ResponseFormat::WithCommand;
        }
        if !self.profiles.is_empty() {
            config.profiles = self.profiles.clone();
        }
        config.validate()
    }
}
