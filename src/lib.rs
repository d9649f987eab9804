pub mod agent;
pub mod capture;
pub mod cli;
pub mod config;
pub mod error;
pub mod util;

pub use agent::{ChannelError, Envelope, EventChannel, RpcClient, WsSession};
pub use capture::{CaptureEngine, CaptureReport, ReaderScope, SequencerState, TagProfile};
pub use config::CaptureConfig;
pub use error::{CaptureError, Result};
