use rowmesh_codec::decode_payload;
use rowmesh_core::{
    ConnectionId, Frame, FramedTransport, MessageType, TaskAssignment, TaskCompletion,
    TransportError,
};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::client::CoordinatorClient;
use crate::compute::multiply_row;
use crate::config::WorkerConfig;
use crate::error::WorkerError;

/// Counters reported when [`WorkerNode::run`] returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub heartbeats: u64,
    pub frames_dropped: u64,
}

pub struct WorkerNode {
    config: WorkerConfig,
    connection_id: Option<ConnectionId>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WorkerNode {
    #[must_use]
    pub fn new(config: WorkerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            connection_id: None,
            shutdown_tx,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    #[must_use]
    pub const fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id
    }

    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Connects, registers and serves the coordinator until shutdown or until
    /// the coordinator closes the connection.
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id, coordinator = %self.config.coordinator_addr))]
    pub async fn run(&mut self) -> Result<WorkerStats, WorkerError> {
        self.config
            .validate()
            .map_err(|e| WorkerError::config(e.to_string()))?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!("Connecting to coordinator");
        let mut client = tokio::select! {
            client = CoordinatorClient::connect(&self.config) => client?,
            _ = shutdown_rx.recv() => {
                info!("Shutdown requested before connecting");
                return Ok(WorkerStats::default());
            }
        };

        let connection_id = tokio::select! {
            id = client.register(self.config.register_timeout) => id?,
            _ = shutdown_rx.recv() => {
                info!("Shutdown requested before registration completed");
                return Ok(WorkerStats::default());
            }
        };
        self.connection_id = Some(connection_id);
        info!(%connection_id, "Registered with coordinator");

        let stats = serve(&client, &mut shutdown_rx).await?;
        info!(
            tasks_completed = stats.tasks_completed,
            tasks_failed = stats.tasks_failed,
            heartbeats = stats.heartbeats,
            "Worker stopped"
        );
        Ok(stats)
    }
}

impl std::fmt::Debug for WorkerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerNode")
            .field("config", &self.config)
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

async fn serve<T: FramedTransport>(
    client: &CoordinatorClient<T>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> Result<WorkerStats, WorkerError> {
    let mut stats = WorkerStats::default();

    loop {
        let received = tokio::select! {
            received = client.recv() => received,
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received");
                return Ok(stats);
            }
        };

        let frame = match received {
            Ok(frame) => frame,
            Err(WorkerError::Transport(TransportError::Closed)) => {
                info!("Coordinator closed the connection");
                return Ok(stats);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Dropping invalid frame");
                stats.frames_dropped += 1;
                continue;
            }
        };

        if let Err(e) = handle_frame(client, frame, &mut stats).await {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(error = %e, "Failed to handle frame");
        }
    }
}

async fn handle_frame<T: FramedTransport>(
    client: &CoordinatorClient<T>,
    frame: Frame,
    stats: &mut WorkerStats,
) -> Result<(), WorkerError> {
    match frame.message_type {
        MessageType::Heartbeat => {
            client.heartbeat_ack().await?;
            stats.heartbeats += 1;
        }
        MessageType::RpcRequest => {
            let task: TaskAssignment = match decode_payload(&frame) {
                Ok(task) => task,
                Err(e) => {
                    stats.frames_dropped += 1;
                    return Err(e.into());
                }
            };
            debug!(task_id = %task.task_id, partition = task.partition, "Task received");

            match multiply_row(&task.row, &task.rhs) {
                Ok(row) => {
                    client
                        .complete(&TaskCompletion::new(task.task_id, task.partition, row))
                        .await?;
                    stats.tasks_completed += 1;
                }
                Err(e) => {
                    // No reply; the coordinator's task timeout reassigns it.
                    warn!(task_id = %task.task_id, partition = task.partition, error = %e, "Task failed");
                    stats.tasks_failed += 1;
                }
            }
        }
        MessageType::WorkerAck => {
            debug!(sender = %frame.sender, "Repeated WORKER_ACK");
        }
        other @ (MessageType::RegisterWorker
        | MessageType::TaskComplete
        | MessageType::HeartbeatAck) => {
            return Err(WorkerError::UnexpectedMessage(other));
        }
    }
    Ok(())
}
