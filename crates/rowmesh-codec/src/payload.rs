use rowmesh_core::error::CodecError;
use rowmesh_core::traits::Codec;
use rowmesh_core::types::{Frame, MessageType};
use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl BincodeCodec {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl<M> Codec<M> for BincodeCodec
where
    M: Serialize + DeserializeOwned,
{
    fn encode(&self, msg: &M) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(msg).map_err(|e| CodecError::EncodeFailed(e.to_string()))
    }

    fn decode(&self, data: &[u8]) -> Result<M, CodecError> {
        bincode::deserialize(data).map_err(|e| CodecError::DecodeFailed(e.to_string()))
    }
}

pub fn encode_payload<P: Serialize + DeserializeOwned>(
    message_type: MessageType,
    sender: &str,
    body: &P,
) -> Result<Frame, CodecError> {
    let payload = BincodeCodec.encode(body)?;
    Ok(Frame::new(message_type, sender, payload))
}

pub fn decode_payload<P: Serialize + DeserializeOwned>(frame: &Frame) -> Result<P, CodecError> {
    BincodeCodec.decode(&frame.payload)
}
