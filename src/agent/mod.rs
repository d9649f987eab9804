pub mod channel;
pub mod envelope;
pub mod error;
pub mod events;
pub mod mock;
pub mod rpc;

pub use channel::{EventChannel, WsSession};
pub use envelope::{decode_payload, Envelope};
pub use error::ChannelError;
pub use events::{classify, event_reader_index, ChannelEvent, DetectedTag};
pub use rpc::{ReaderInfo, RpcClient};
