use std::time::Duration;

use rowmesh_codec::{FrameChannel, FrameCodec, MessageChannel, decode_payload, encode_payload};
use rowmesh_core::{
    ConnectionId, Frame, FramedTransport, MessageType, RegisterWorker, TaskCompletion,
    TransportFactory, WorkerAck,
};
use rowmesh_transport_tcp::{TcpTransport, TcpTransportFactory};
use tokio::time::Instant;

use crate::config::WorkerConfig;
use crate::error::WorkerError;

pub struct CoordinatorClient<T> {
    channel: FrameChannel<T>,
    worker_id: String,
    connection_id: Option<ConnectionId>,
}

impl CoordinatorClient<TcpTransport> {
    pub async fn connect(config: &WorkerConfig) -> Result<Self, WorkerError> {
        let factory = TcpTransportFactory::with_config(config.tcp.clone());
        let transport = factory.connect(config.coordinator_addr).await?;
        let codec = FrameCodec::new()
            .with_max_payload(config.tcp.max_message_size)
            .with_max_frame(config.tcp.max_message_size);
        Ok(Self::new(transport, codec, config.worker_id.as_str()))
    }
}

impl<T> CoordinatorClient<T>
where
    T: FramedTransport,
{
    pub fn new(transport: T, codec: FrameCodec, worker_id: impl Into<String>) -> Self {
        Self {
            channel: MessageChannel::new(transport, codec),
            worker_id: worker_id.into(),
            connection_id: None,
        }
    }

    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    #[must_use]
    pub const fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id
    }

    #[must_use]
    pub const fn is_registered(&self) -> bool {
        self.connection_id.is_some()
    }

    /// Sends `REGISTER_WORKER` and waits for `WORKER_ACK`. Heartbeats that
    /// arrive first are answered; invalid frames are skipped.
    pub async fn register(&mut self, timeout: Duration) -> Result<ConnectionId, WorkerError> {
        let body = RegisterWorker::new(self.worker_id.as_str());
        let frame = encode_payload(MessageType::RegisterWorker, &self.worker_id, &body)?;
        self.send(&frame).await?;

        let deadline = Instant::now() + timeout;
        loop {
            let frame = match tokio::time::timeout_at(deadline, self.recv()).await {
                Err(_) => return Err(WorkerError::RegistrationTimeout(timeout)),
                Ok(Ok(frame)) => frame,
                Ok(Err(e)) if e.is_fatal() => return Err(e),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Dropping invalid frame during registration");
                    continue;
                }
            };

            match frame.message_type {
                MessageType::WorkerAck => {
                    let ack: WorkerAck = decode_payload(&frame)?;
                    self.connection_id = Some(ack.connection_id);
                    return Ok(ack.connection_id);
                }
                MessageType::Heartbeat => self.heartbeat_ack().await?,
                other => {
                    tracing::warn!(message_type = %other, "Ignoring message before WORKER_ACK");
                }
            }
        }
    }

    pub async fn heartbeat_ack(&self) -> Result<(), WorkerError> {
        self.send(&Frame::empty(MessageType::HeartbeatAck, self.worker_id.as_str()))
            .await
    }

    pub async fn complete(&self, completion: &TaskCompletion) -> Result<(), WorkerError> {
        if !self.is_registered() {
            return Err(WorkerError::NotRegistered);
        }
        let frame = encode_payload(MessageType::TaskComplete, &self.worker_id, completion)?;
        self.send(&frame).await
    }

    pub async fn send(&self, frame: &Frame) -> Result<(), WorkerError> {
        self.channel.send(frame).await?;
        Ok(())
    }

    /// Receives the next frame that passes header validation.
    pub async fn recv(&self) -> Result<Frame, WorkerError> {
        let frame = self.channel.recv().await?;
        frame.validate()?;
        Ok(frame)
    }
}

impl<T> std::fmt::Debug for CoordinatorClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorClient")
            .field("worker_id", &self.worker_id)
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}
