mod channel;
mod frame;
mod payload;

pub use channel::{ChannelError, FrameChannel, MessageChannel};
pub use frame::{DEFAULT_MAX_FRAME, DEFAULT_MAX_PAYLOAD, FrameCodec};
pub use payload::{BincodeCodec, decode_payload, encode_payload};
