use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use rowmesh_coordinator::{CoordinatorConfig, CoordinatorServer};
use rowmesh_core::{JobDescriptor, RowmeshConfig};
use tokio::signal;

use crate::output::JobOutput;

#[derive(Debug, Args)]
pub struct CoordinatorArgs {
    /// Address to listen on (overrides the config file).
    #[arg(short, long, env = "ROWMESH_LISTEN_ADDR")]
    pub listen_addr: Option<SocketAddr>,

    /// JSON job file to run once workers connect. Without it the
    /// coordinator only serves connections until interrupted.
    #[arg(short, long, value_name = "FILE")]
    pub job: Option<PathBuf>,

    /// Number of workers to wait for before dispatching the job.
    #[arg(short, long, default_value = "1")]
    pub workers: usize,

    /// Maximum concurrent connections (overrides the config file).
    #[arg(long, env = "ROWMESH_MAX_CONNECTIONS")]
    pub max_connections: Option<usize>,
}

pub fn load_job(path: &Path) -> Result<JobDescriptor> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file {}", path.display()))?;
    parse_job(&content).with_context(|| format!("Invalid job file {}", path.display()))
}

fn parse_job(content: &str) -> Result<JobDescriptor> {
    let job: JobDescriptor = serde_json::from_str(content)?;
    job.validate()?;
    Ok(job)
}

pub async fn run_coordinator(args: CoordinatorArgs, rowmesh_config: &RowmeshConfig) -> Result<()> {
    let mut config =
        CoordinatorConfig::from_file(&rowmesh_config.coordinator, &rowmesh_config.transport)?;
    if let Some(addr) = args.listen_addr {
        config = config.with_listen_addr(addr);
    }
    if let Some(max) = args.max_connections {
        config = config.with_max_connections(max);
    }
    config.validate()?;

    let job = args.job.as_deref().map(load_job).transpose()?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        heartbeat_interval = ?config.heartbeat_interval,
        liveness_timeout = ?config.liveness_timeout,
        task_timeout = ?config.task_timeout,
        max_connections = config.max_connections,
        "Starting coordinator"
    );

    let server = CoordinatorServer::new(config);
    let local_addr = server.start_listening().await?;
    tracing::info!(%local_addr, "Coordinator ready");

    let result = match job {
        Some(job) => {
            tracing::info!(
                partitions = job.num_partitions(),
                workers = args.workers,
                "Submitting job"
            );
            tokio::select! {
                result = server.submit_job(job, args.workers) => Some(result),
                _ = signal::ctrl_c() => {
                    tracing::info!("Received shutdown signal");
                    None
                }
            }
        }
        None => {
            signal::ctrl_c().await?;
            tracing::info!("Received shutdown signal");
            None
        }
    };

    server.shutdown().await;

    match result {
        Some(Ok(result)) => {
            let output = JobOutput::from(result);
            println!("{}", serde_json::to_string_pretty(&output)?);
            if !output.complete {
                anyhow::bail!("Job finished with missing partitions {:?}", output.missing);
            }
            tracing::info!("Coordinator shut down cleanly");
            Ok(())
        }
        Some(Err(e)) => {
            tracing::error!(error = %e, "Job failed");
            Err(e.into())
        }
        None => {
            tracing::info!("Coordinator shut down cleanly");
            Ok(())
        }
    }
}
