use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rowmesh_codec::{FrameCodec, encode_payload};
use rowmesh_core::{
    Codec, ConnectionId, CoordError, JobDescriptor, JobId, Matrix, MessageType, Operation, Row,
    TaskAssignment, TaskCompletion, TaskId,
};
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::time::Instant;

use crate::aggregator::ResultAggregator;
use crate::registry::ConnectionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Recorded { job_id: JobId, partition: usize },
    /// Accepted, but the partition already had a value.
    Duplicate { job_id: JobId, partition: usize },
    /// Malformed result; the task went back to pending.
    Rejected { job_id: JobId, partition: usize },
    /// Unknown task, not in flight, or owned by another connection.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub total: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub done: usize,
}

#[derive(Debug)]
struct Task {
    id: TaskId,
    partition: usize,
    row: Row,
}

#[derive(Debug)]
struct InFlight {
    task: Task,
    owner: ConnectionId,
    submitted_at: Instant,
}

#[derive(Debug)]
struct JobState {
    rhs: Matrix,
    total: usize,
    pending: VecDeque<Task>,
    in_flight: HashMap<TaskId, InFlight>,
    done: usize,
    aggregator: Arc<ResultAggregator>,
}

impl JobState {
    fn requeue(&mut self, task_id: TaskId) -> Option<ConnectionId> {
        let entry = self.in_flight.remove(&task_id)?;
        self.pending.push_back(entry.task);
        Some(entry.owner)
    }

    const fn width(&self) -> usize {
        self.rhs.num_cols()
    }
}

#[derive(Debug, Default)]
struct DispatchState {
    jobs: BTreeMap<JobId, JobState>,
    busy: HashMap<ConnectionId, TaskId>,
    task_job: HashMap<TaskId, JobId>,
}

/// Task queue, in-flight table and assignment policy.
///
/// Every operation runs under one lock, so transitions of a single task are
/// totally ordered. The registry is only ever locked after this one.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    node_tag: String,
    codec: FrameCodec,
    next_job_id: AtomicU64,
    next_task_id: AtomicU64,
    state: Mutex<DispatchState>,
    wake: Notify,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("node_tag", &self.node_tag)
            .field("codec", &self.codec)
            .field("next_job_id", &self.next_job_id)
            .field("next_task_id", &self.next_task_id)
            .field("state", &"...")
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, node_tag: impl Into<String>) -> Self {
        Self {
            registry,
            node_tag: node_tag.into(),
            codec: FrameCodec::new(),
            next_job_id: AtomicU64::new(1),
            next_task_id: AtomicU64::new(1),
            state: Mutex::new(DispatchState::default()),
            wake: Notify::new(),
        }
    }

    #[must_use]
    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn notify(&self) {
        self.wake.notify_one();
    }

    pub async fn create_job(
        &self,
        descriptor: JobDescriptor,
    ) -> Result<(JobId, Arc<ResultAggregator>), CoordError> {
        descriptor.validate()?;

        let job_id = JobId::new(self.next_job_id.fetch_add(1, Ordering::Relaxed));
        let aggregator = Arc::new(ResultAggregator::new(job_id));
        let JobDescriptor { operation, input } = descriptor;
        let rhs = match operation {
            Operation::Multiply { rhs } => rhs,
            Operation::Square => input.clone(),
        };
        self.ensure_task_fits(&input, &rhs)?;

        let pending: VecDeque<Task> = input
            .into_rows()
            .into_iter()
            .enumerate()
            .map(|(partition, row)| Task {
                id: TaskId::new(self.next_task_id.fetch_add(1, Ordering::Relaxed)),
                partition,
                row,
            })
            .collect();
        let total = pending.len();

        {
            let mut state = self.state.lock().await;
            for task in &pending {
                state.task_job.insert(task.id, job_id);
            }
            state.jobs.insert(
                job_id,
                JobState {
                    rhs,
                    total,
                    pending,
                    in_flight: HashMap::new(),
                    done: 0,
                    aggregator: Arc::clone(&aggregator),
                },
            );
        }

        tracing::info!(%job_id, partitions = total, "Job created");
        self.notify();
        Ok((job_id, aggregator))
    }

    // Rows share one width and bincode ints are fixed size, so one task's
    // frame size stands for all of them.
    fn ensure_task_fits(&self, input: &Matrix, rhs: &Matrix) -> Result<(), CoordError> {
        let Some(row) = input.rows().first() else {
            return Ok(());
        };
        let sample = TaskAssignment {
            task_id: TaskId::new(0),
            partition: 0,
            row: row.clone(),
            rhs: rhs.clone(),
        };
        let frame = encode_payload(MessageType::RpcRequest, &self.node_tag, &sample)?;
        self.codec
            .encode(&frame)
            .map(drop)
            .map_err(|e| CoordError::InvalidJob(format!("task frame too large to send: {e}")))
    }

    /// Assigns the oldest pending task to the lowest-id free connection.
    pub async fn assign_next(&self) -> Option<(TaskId, ConnectionId)> {
        let mut state = self.state.lock().await;
        self.assign_locked(&mut state).await
    }

    pub async fn dispatch_pending(&self) -> usize {
        let mut state = self.state.lock().await;
        let mut assigned = 0;
        while self.assign_locked(&mut state).await.is_some() {
            assigned += 1;
        }
        assigned
    }

    async fn assign_locked(&self, state: &mut DispatchState) -> Option<(TaskId, ConnectionId)> {
        loop {
            let job_id = state
                .jobs
                .iter()
                .find(|(_, job)| !job.pending.is_empty())
                .map(|(id, _)| *id)?;

            let conn_id = self
                .registry
                .list_alive()
                .await
                .into_iter()
                .find(|conn| conn.registered && !state.busy.contains_key(&conn.id))
                .map(|conn| conn.id)?;

            let job = state.jobs.get_mut(&job_id)?;
            let task = job.pending.pop_front()?;
            let body = TaskAssignment {
                task_id: task.id,
                partition: task.partition,
                row: task.row.clone(),
                rhs: job.rhs.clone(),
            };

            let frame = match encode_payload(MessageType::RpcRequest, &self.node_tag, &body) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(%job_id, task_id = %task.id, error = %e, "Failed to encode task");
                    job.pending.push_front(task);
                    return None;
                }
            };

            if let Err(e) = self.registry.send(conn_id, frame).await {
                tracing::warn!(%conn_id, task_id = %task.id, error = %e, "Task send failed, dropping connection from rotation");
                job.pending.push_front(task);
                self.registry.mark_dead(conn_id).await;
                continue;
            }

            let task_id = task.id;
            tracing::debug!(%job_id, %task_id, partition = task.partition, %conn_id, "Task assigned");
            job.in_flight.insert(
                task_id,
                InFlight {
                    task,
                    owner: conn_id,
                    submitted_at: Instant::now(),
                },
            );
            state.busy.insert(conn_id, task_id);
            return Some((task_id, conn_id));
        }
    }

    pub async fn on_complete(
        &self,
        conn_id: ConnectionId,
        completion: TaskCompletion,
    ) -> CompletionOutcome {
        let outcome = {
            let mut state = self.state.lock().await;
            Self::complete_locked(&mut state, conn_id, completion)
        };
        if !matches!(outcome, CompletionOutcome::Ignored) {
            self.notify();
        }
        outcome
    }

    fn complete_locked(
        state: &mut DispatchState,
        conn_id: ConnectionId,
        completion: TaskCompletion,
    ) -> CompletionOutcome {
        let task_id = completion.task_id;
        let Some(&job_id) = state.task_job.get(&task_id) else {
            tracing::debug!(%conn_id, %task_id, "Completion for unknown task ignored");
            return CompletionOutcome::Ignored;
        };
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return CompletionOutcome::Ignored;
        };
        match job.in_flight.get(&task_id) {
            Some(entry) if entry.owner == conn_id => {}
            Some(entry) => {
                tracing::debug!(%conn_id, %task_id, owner = %entry.owner, "Completion from non-owner ignored");
                return CompletionOutcome::Ignored;
            }
            None => {
                tracing::debug!(%conn_id, %task_id, "Completion for task not in flight ignored");
                return CompletionOutcome::Ignored;
            }
        }

        if state.busy.get(&conn_id) == Some(&task_id) {
            state.busy.remove(&conn_id);
        }

        let width = job.width();
        let Some(entry) = job.in_flight.remove(&task_id) else {
            return CompletionOutcome::Ignored;
        };
        let partition = entry.task.partition;

        if completion.partition != partition || completion.row.len() != width {
            tracing::warn!(
                %conn_id,
                %task_id,
                expected_partition = partition,
                got_partition = completion.partition,
                expected_width = width,
                got_width = completion.row.len(),
                "Malformed completion, requeueing task"
            );
            job.pending.push_back(entry.task);
            return CompletionOutcome::Rejected { job_id, partition };
        }

        job.done += 1;
        state.task_job.remove(&task_id);

        if job.aggregator.record(partition, completion.row) {
            tracing::debug!(%job_id, %task_id, partition, %conn_id, "Task completed");
            CompletionOutcome::Recorded { job_id, partition }
        } else {
            CompletionOutcome::Duplicate { job_id, partition }
        }
    }

    /// Requeues every in-flight task older than `timeout`, whatever the state
    /// of its owner.
    pub async fn sweep_timeouts(&self, now: Instant, timeout: Duration) -> Vec<TaskId> {
        let mut requeued = Vec::new();
        {
            let mut state = self.state.lock().await;
            let DispatchState { jobs, busy, .. } = &mut *state;

            for (job_id, job) in jobs.iter_mut() {
                let expired: Vec<TaskId> = job
                    .in_flight
                    .iter()
                    .filter(|(_, entry)| now.saturating_duration_since(entry.submitted_at) > timeout)
                    .map(|(id, _)| *id)
                    .collect();

                for task_id in expired {
                    if let Some(owner) = job.requeue(task_id) {
                        if busy.get(&owner) == Some(&task_id) {
                            busy.remove(&owner);
                        }
                        tracing::warn!(%job_id, %task_id, conn_id = %owner, "Task timed out, requeued");
                        requeued.push(task_id);
                    }
                }
            }
        }

        if !requeued.is_empty() {
            self.notify();
        }
        requeued
    }

    /// Requeues whatever `conn_id` was working on. A second call is a no-op.
    pub async fn on_connection_lost(&self, conn_id: ConnectionId) -> Vec<TaskId> {
        let mut requeued = Vec::new();
        {
            let mut state = self.state.lock().await;
            if let Some(task_id) = state.busy.remove(&conn_id)
                && let Some(&job_id) = state.task_job.get(&task_id)
                && let Some(job) = state.jobs.get_mut(&job_id)
                && job.requeue(task_id).is_some()
            {
                tracing::info!(%job_id, %task_id, %conn_id, "Connection lost, task requeued");
                requeued.push(task_id);
            }
        }

        if !requeued.is_empty() {
            self.notify();
        }
        requeued
    }

    pub async fn retire_job(&self, job_id: JobId) -> Option<JobSnapshot> {
        let snapshot = {
            let mut state = self.state.lock().await;
            let job = state.jobs.remove(&job_id)?;

            for (task_id, entry) in &job.in_flight {
                if state.busy.get(&entry.owner) == Some(task_id) {
                    state.busy.remove(&entry.owner);
                }
                state.task_job.remove(task_id);
            }
            for task in &job.pending {
                state.task_job.remove(&task.id);
            }
            snapshot_of(job_id, &job)
        };

        tracing::info!(
            %job_id,
            done = snapshot.done,
            total = snapshot.total,
            "Job retired"
        );
        self.notify();
        Some(snapshot)
    }

    pub async fn snapshot(&self) -> Vec<JobSnapshot> {
        let state = self.state.lock().await;
        state
            .jobs
            .iter()
            .map(|(job_id, job)| snapshot_of(*job_id, job))
            .collect()
    }

    pub async fn owner_of(&self, task_id: TaskId) -> Option<ConnectionId> {
        let state = self.state.lock().await;
        let job_id = state.task_job.get(&task_id)?;
        state
            .jobs
            .get(job_id)?
            .in_flight
            .get(&task_id)
            .map(|entry| entry.owner)
    }

    pub async fn run(
        &self,
        sweep_interval: Duration,
        task_timeout: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        tracing::info!(
            sweep_interval_ms = sweep_interval.as_millis(),
            task_timeout_ms = task_timeout.as_millis(),
            "Dispatcher started"
        );

        let mut sweep = tokio::time::interval(sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Dispatcher shutting down");
                    break;
                }
                () = self.wake.notified() => {}
                _ = sweep.tick() => {
                    self.sweep_timeouts(Instant::now(), task_timeout).await;
                }
            }

            let assigned = self.dispatch_pending().await;
            if assigned > 0 {
                tracing::trace!(assigned, "Dispatched pending tasks");
            }
        }
    }
}

fn snapshot_of(job_id: JobId, job: &JobState) -> JobSnapshot {
    JobSnapshot {
        job_id,
        total: job.total,
        pending: job.pending.len(),
        in_flight: job.in_flight.len(),
        done: job.done,
    }
}
