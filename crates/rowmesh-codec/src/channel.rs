use std::marker::PhantomData;

use rowmesh_core::error::{CodecError, TransportError};
use rowmesh_core::traits::{Codec, FramedTransport};
use rowmesh_core::types::Frame;
use thiserror::Error;

use crate::frame::FrameCodec;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl ChannelError {
    /// A transport failure ends the connection; a codec failure only spoils
    /// one frame.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

pub struct MessageChannel<M, T, C> {
    transport: T,
    codec: C,
    _phantom: PhantomData<M>,
}

pub type FrameChannel<T> = MessageChannel<Frame, T, FrameCodec>;

impl<M, T, C> MessageChannel<M, T, C> {
    pub const fn new(transport: T, codec: C) -> Self {
        Self {
            transport,
            codec,
            _phantom: PhantomData,
        }
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    pub const fn codec(&self) -> &C {
        &self.codec
    }
}

impl<M, T, C> MessageChannel<M, T, C>
where
    T: FramedTransport,
    C: Codec<M>,
{
    #[allow(clippy::future_not_send)]
    pub async fn send(&self, msg: &M) -> Result<(), ChannelError> {
        let bytes = self.codec.encode(msg)?;
        self.transport.send_frame(&bytes).await?;
        Ok(())
    }

    #[allow(clippy::future_not_send)]
    pub async fn recv(&self) -> Result<M, ChannelError> {
        let bytes = self.transport.recv_frame().await?;
        let msg = self.codec.decode(&bytes)?;
        Ok(msg)
    }
}

impl<M, T: std::fmt::Debug, C: std::fmt::Debug> std::fmt::Debug for MessageChannel<M, T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("transport", &self.transport)
            .field("codec", &self.codec)
            .finish()
    }
}
