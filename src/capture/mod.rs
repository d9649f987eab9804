pub mod capture_log;
pub mod fixture;
pub mod operator;
pub mod profile;
pub mod reader;
pub mod sequencer;
pub mod state;

pub use capture_log::{parse_log, CaptureLog, LogExchange, LogSnapshot};
pub use fixture::{CapturedResponse, Fixture, FixtureWriter, ResponseFormat};
pub use operator::{AutomaticOperator, InteractiveOperator, Operator};
pub use profile::{default_profiles, TagProfile};
pub use reader::{derive_reader_id, supports_iso15693};
pub use sequencer::{list_readers, CaptureEngine, CaptureReport, ReaderScope, ReaderSummary};
pub use state::{CancelReason, CaptureProgress, SequencerState};
