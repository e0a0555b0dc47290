use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rowmesh_codec::FrameCodec;
use rowmesh_core::{CoordError, JobDescriptor, JobId, JobResult, Listener};
use rowmesh_transport_tcp::TcpListener;
use tokio::sync::{Mutex, Semaphore, broadcast};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use crate::config::CoordinatorConfig;
use crate::dispatcher::Dispatcher;
use crate::handler::ConnectionHandler;
use crate::monitor::HeartbeatMonitor;
use crate::registry::ConnectionRegistry;

const HANDLER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
struct Running {
    local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Debug)]
pub struct CoordinatorServer {
    config: CoordinatorConfig,
    codec: FrameCodec,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    shutdown_tx: broadcast::Sender<()>,
    running: Mutex<Option<Running>>,
}

impl CoordinatorServer {
    #[must_use]
    pub fn new(config: CoordinatorConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let registry = Arc::new(ConnectionRegistry::new());
        let codec = FrameCodec::new()
            .with_max_payload(config.tcp.max_message_size)
            .with_max_frame(config.tcp.max_message_size);
        let dispatcher = Arc::new(
            Dispatcher::new(Arc::clone(&registry), config.node_tag.clone()).with_codec(codec),
        );

        Self {
            config,
            codec,
            registry,
            dispatcher,
            shutdown_tx,
            running: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    pub async fn start_listening(&self) -> Result<SocketAddr, CoordError> {
        self.config.validate()?;

        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(CoordError::AlreadyListening);
        }

        let listener = TcpListener::bind_with_config(self.config.listen_addr, self.config.tcp.clone())
            .await
            .map_err(|e| CoordError::ListenFailed {
                addr: self.config.listen_addr.to_string(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, max_connections = self.config.max_connections, "Coordinator listening");

        let accept = AcceptLoop {
            listener,
            registry: Arc::clone(&self.registry),
            dispatcher: Arc::clone(&self.dispatcher),
            codec: self.codec,
            node_tag: self.config.node_tag.clone(),
            permits: Arc::new(Semaphore::new(self.config.max_connections)),
            max_connections: self.config.max_connections,
            shutdown_tx: self.shutdown_tx.clone(),
            shutdown_rx: self.shutdown_tx.subscribe(),
        };

        let monitor = HeartbeatMonitor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.dispatcher),
            self.config.node_tag.clone(),
            self.config.heartbeat_interval,
            self.config.liveness_timeout,
            self.shutdown_tx.subscribe(),
        );

        let dispatcher = Arc::clone(&self.dispatcher);
        let sweep_interval = self.config.sweep_interval;
        let task_timeout = self.config.task_timeout;
        let dispatch_shutdown = self.shutdown_tx.subscribe();

        let tasks = vec![
            tokio::spawn(accept.run()),
            tokio::spawn(monitor.run()),
            tokio::spawn(async move {
                dispatcher
                    .run(sweep_interval, task_timeout, dispatch_shutdown)
                    .await;
            }),
        ];

        *running = Some(Running { local_addr, tasks });
        drop(running);
        Ok(local_addr)
    }

    /// Runs one job to completion or to the job deadline.
    ///
    /// Waits up to `connect_wait` for `worker_target` registered workers and
    /// proceeds with however many arrived; fails only if none did.
    pub async fn submit_job(
        &self,
        descriptor: JobDescriptor,
        worker_target: usize,
    ) -> Result<JobResult, CoordError> {
        descriptor.validate()?;

        let target = worker_target.max(1);
        let registered = self
            .registry
            .wait_for_registered(target, self.config.connect_wait)
            .await;
        if registered == 0 {
            tracing::warn!(waited = ?self.config.connect_wait, "No workers registered");
            return Err(CoordError::NoWorkers {
                waited: self.config.connect_wait,
            });
        }
        if registered < target {
            tracing::warn!(registered, target, "Proceeding with fewer workers than requested");
        }

        let total = descriptor.num_partitions();
        let deadline = Instant::now() + self.config.job_deadline;
        let (job_id, aggregator) = self.dispatcher.create_job(descriptor).await?;
        let guard = RetireOnDrop::new(Arc::clone(&self.dispatcher), job_id);

        let rows = aggregator.assemble(total, deadline).await;
        guard.retire().await;

        let result = JobResult { job_id, rows };
        if result.is_complete() {
            tracing::info!(%job_id, partitions = total, "Job complete");
        } else {
            tracing::warn!(
                %job_id,
                missing = ?result.missing_partitions(),
                "Job finished with missing partitions"
            );
        }
        Ok(result)
    }

    /// Stops accepting, closes every connection and waits for the
    /// background tasks to exit. The server can listen again afterwards.
    pub async fn shutdown(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        tracing::info!(addr = %running.local_addr, "Coordinator shutting down");

        let _ = self.shutdown_tx.send(());
        self.registry.clear().await;
        for task in running.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        self.registry.clear().await;
    }
}

/// Retires a job even when `submit_job` is dropped before it returns.
struct RetireOnDrop {
    dispatcher: Arc<Dispatcher>,
    job_id: Option<JobId>,
}

impl RetireOnDrop {
    const fn new(dispatcher: Arc<Dispatcher>, job_id: JobId) -> Self {
        Self {
            dispatcher,
            job_id: Some(job_id),
        }
    }

    async fn retire(mut self) {
        if let Some(job_id) = self.job_id.take() {
            self.dispatcher.retire_job(job_id).await;
        }
    }
}

impl Drop for RetireOnDrop {
    fn drop(&mut self) {
        let Some(job_id) = self.job_id.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(%job_id, "No runtime to retire abandoned job");
            return;
        };
        tracing::info!(%job_id, "Job abandoned by caller, retiring");
        let dispatcher = Arc::clone(&self.dispatcher);
        runtime.spawn(async move {
            dispatcher.retire_job(job_id).await;
        });
    }
}

struct AcceptLoop {
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    codec: FrameCodec,
    node_tag: String,
    permits: Arc<Semaphore>,
    max_connections: usize,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl AcceptLoop {
    async fn run(mut self) {
        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((transport, addr)) => {
                            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                                tracing::warn!(%addr, max = self.max_connections, "Connection limit reached, refusing connection");
                                drop(transport);
                                continue;
                            };
                            tracing::debug!(%addr, "Accepted connection");

                            let handler = ConnectionHandler::new(
                                Arc::clone(&self.registry),
                                Arc::clone(&self.dispatcher),
                                transport,
                                self.codec,
                                self.node_tag.clone(),
                                addr,
                            );
                            let handler_shutdown = self.shutdown_tx.subscribe();
                            handlers.spawn(async move {
                                let _permit = permit;
                                if let Err(e) = handler.run(handler_shutdown).await {
                                    tracing::debug!(%addr, error = %e, "Connection handler finished with error");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
                _ = self.shutdown_rx.recv() => {
                    tracing::info!("Shutdown signal received, stopping accept loop");
                    break;
                }
            }
        }

        drop(self.listener);

        let drained = tokio::time::timeout(HANDLER_DRAIN_TIMEOUT, async {
            while handlers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(remaining = handlers.len(), "Aborting connection handlers");
            handlers.shutdown().await;
        }
    }
}
