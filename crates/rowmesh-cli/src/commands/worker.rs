use std::net::SocketAddr;

use anyhow::Result;
use clap::Args;
use rowmesh_core::RowmeshConfig;
use rowmesh_worker::{WorkerConfig, WorkerNode};
use tokio::signal;

#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// Coordinator address to connect to (overrides the config file).
    #[arg(long, env = "ROWMESH_COORDINATOR_ADDR")]
    pub coordinator: Option<SocketAddr>,

    /// Worker id reported at registration (default: generated).
    #[arg(long, env = "ROWMESH_WORKER_ID")]
    pub worker_id: Option<String>,
}

pub async fn run_worker(args: WorkerArgs, rowmesh_config: &RowmeshConfig) -> Result<()> {
    let mut config = WorkerConfig::from_file(&rowmesh_config.worker, &rowmesh_config.transport)?;
    if let Some(addr) = args.coordinator {
        config = config.with_coordinator_addr(addr);
    }
    if let Some(id) = args.worker_id {
        config = config.with_worker_id(id);
    }
    config.validate()?;

    tracing::info!(
        coordinator = %config.coordinator_addr,
        worker_id = %config.worker_id,
        "Starting worker"
    );

    let mut node = WorkerNode::new(config);
    let shutdown = node.shutdown_handle();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
            let _ = shutdown.send(());
        }
    });

    match node.run().await {
        Ok(stats) => {
            tracing::info!(
                tasks_completed = stats.tasks_completed,
                tasks_failed = stats.tasks_failed,
                "Worker shut down cleanly"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Worker error");
            Err(e.into())
        }
    }
}
