use std::net::SocketAddr;
use std::sync::Arc;

use rowmesh_codec::{ChannelError, FrameChannel, FrameCodec, MessageChannel, decode_payload, encode_payload};
use rowmesh_core::{
    ConnectionId, CoordError, Frame, MessageType, RegisterWorker, TaskCompletion, TransportError,
    WorkerAck,
};
use rowmesh_transport_tcp::TcpTransport;
use tokio::sync::{broadcast, mpsc};

use crate::dispatcher::{CompletionOutcome, Dispatcher};
use crate::registry::ConnectionRegistry;

/// Serves one accepted socket: a reader loop here plus a writer task that
/// drains the connection's outbound queue.
pub struct ConnectionHandler {
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    channel: Arc<FrameChannel<TcpTransport>>,
    node_tag: String,
    remote_addr: SocketAddr,
}

impl std::fmt::Debug for ConnectionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandler")
            .field("node_tag", &self.node_tag)
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

impl ConnectionHandler {
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<Dispatcher>,
        transport: TcpTransport,
        codec: FrameCodec,
        node_tag: impl Into<String>,
        remote_addr: SocketAddr,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            channel: Arc::new(MessageChannel::new(transport, codec)),
            node_tag: node_tag.into(),
            remote_addr,
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), CoordError> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let conn_id = self.registry.accept(self.remote_addr, outbound_tx).await;
        let mut writer = tokio::spawn(write_loop(
            Arc::clone(&self.channel),
            outbound_rx,
            conn_id,
        ));

        let result = tokio::select! {
            result = self.read_loop(conn_id) => result,
            _ = &mut writer => {
                tracing::debug!(%conn_id, "Outbound side closed");
                Ok(())
            }
            _ = shutdown_rx.recv() => {
                tracing::debug!(%conn_id, "Closing connection for shutdown");
                Ok(())
            }
        };

        writer.abort();
        self.cleanup(conn_id).await;
        result
    }

    async fn cleanup(&self, conn_id: ConnectionId) {
        self.registry.mark_dead(conn_id).await;
        let requeued = self.dispatcher.on_connection_lost(conn_id).await;
        if let Some(info) = self.registry.remove(conn_id).await {
            tracing::info!(
                %conn_id,
                addr = %self.remote_addr,
                worker = info.worker_name.as_deref().unwrap_or("-"),
                requeued = requeued.len(),
                "Connection closed"
            );
        }
    }

    async fn read_loop(&self, conn_id: ConnectionId) -> Result<(), CoordError> {
        loop {
            let frame = match self.channel.recv().await {
                Ok(frame) => frame,
                Err(ChannelError::Transport(TransportError::Closed)) => {
                    tracing::debug!(%conn_id, addr = %self.remote_addr, "Connection closed by peer");
                    return Ok(());
                }
                Err(ChannelError::Transport(e)) => {
                    tracing::warn!(%conn_id, addr = %self.remote_addr, error = %e, "Transport error");
                    return Err(e.into());
                }
                Err(ChannelError::Codec(e)) => {
                    tracing::warn!(%conn_id, addr = %self.remote_addr, error = %e, "Dropping undecodable frame");
                    continue;
                }
            };

            if let Err(e) = frame.validate() {
                tracing::warn!(%conn_id, addr = %self.remote_addr, error = %e, "Dropping invalid frame");
                continue;
            }

            self.registry.touch(conn_id).await;
            self.handle_frame(conn_id, frame).await;
        }
    }

    async fn handle_frame(&self, conn_id: ConnectionId, frame: Frame) {
        match frame.message_type {
            MessageType::RegisterWorker => self.handle_register(conn_id, &frame).await,
            MessageType::HeartbeatAck => {
                tracing::trace!(%conn_id, "Heartbeat acknowledged");
            }
            MessageType::Heartbeat => {
                self.reply(conn_id, Frame::empty(MessageType::HeartbeatAck, self.node_tag.as_str()))
                    .await;
            }
            MessageType::TaskComplete => self.handle_task_complete(conn_id, &frame).await,
            MessageType::WorkerAck | MessageType::RpcRequest => {
                tracing::warn!(
                    %conn_id,
                    message_type = %frame.message_type,
                    sender = %frame.sender,
                    "Unexpected message type from worker"
                );
            }
        }
    }

    async fn handle_register(&self, conn_id: ConnectionId, frame: &Frame) {
        let worker_name = decode_payload::<RegisterWorker>(frame).map_or_else(
            |e| {
                tracing::debug!(%conn_id, error = %e, "Registration without body, using sender");
                frame.sender.clone()
            },
            |body| body.worker_id,
        );

        match self.registry.register(conn_id, &worker_name).await {
            Ok(()) => self.dispatcher.notify(),
            Err(CoordError::AlreadyRegistered(_)) => {
                tracing::warn!(%conn_id, worker = %worker_name, "Duplicate registration");
            }
            Err(e) => {
                tracing::warn!(%conn_id, error = %e, "Registration failed");
                return;
            }
        }

        let ack = WorkerAck {
            connection_id: conn_id,
        };
        match encode_payload(MessageType::WorkerAck, &self.node_tag, &ack) {
            Ok(frame) => self.reply(conn_id, frame).await,
            Err(e) => tracing::error!(%conn_id, error = %e, "Failed to encode WORKER_ACK"),
        }
    }

    async fn handle_task_complete(&self, conn_id: ConnectionId, frame: &Frame) {
        let completion: TaskCompletion = match decode_payload(frame) {
            Ok(completion) => completion,
            Err(e) => {
                tracing::warn!(%conn_id, error = %e, "Dropping TASK_COMPLETE with bad body");
                return;
            }
        };
        let task_id = completion.task_id;

        match self.dispatcher.on_complete(conn_id, completion).await {
            CompletionOutcome::Recorded { .. } => {}
            CompletionOutcome::Duplicate { job_id, partition } => {
                tracing::debug!(%conn_id, %task_id, %job_id, partition, "Duplicate result discarded");
            }
            CompletionOutcome::Rejected { job_id, partition } => {
                tracing::warn!(%conn_id, %task_id, %job_id, partition, "Result rejected");
            }
            CompletionOutcome::Ignored => {
                tracing::debug!(%conn_id, %task_id, "Stale completion ignored");
            }
        }
    }

    async fn reply(&self, conn_id: ConnectionId, frame: Frame) {
        if let Err(e) = self.registry.send(conn_id, frame).await {
            tracing::debug!(%conn_id, error = %e, "Reply dropped");
        }
    }
}

async fn write_loop(
    channel: Arc<FrameChannel<TcpTransport>>,
    mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
    conn_id: ConnectionId,
) {
    while let Some(frame) = outbound_rx.recv().await {
        match channel.send(&frame).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                tracing::warn!(%conn_id, error = %e, "Write failed, closing connection");
                break;
            }
            Err(e) => {
                tracing::warn!(%conn_id, message_type = %frame.message_type, error = %e, "Dropping unencodable frame");
            }
        }
    }
}
