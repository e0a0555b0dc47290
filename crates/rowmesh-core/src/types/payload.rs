use serde::{Deserialize, Serialize};

use crate::types::id::{ConnectionId, TaskId};
use crate::types::job::{Matrix, Row};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterWorker {
    pub worker_id: String,
}

impl RegisterWorker {
    #[must_use]
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAck {
    pub connection_id: ConnectionId,
}

/// `RPC_REQUEST` body: one row of the left operand plus the full right operand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: TaskId,
    pub partition: usize,
    pub row: Row,
    pub rhs: Matrix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub task_id: TaskId,
    pub partition: usize,
    pub row: Row,
}

impl TaskCompletion {
    #[must_use]
    pub const fn new(task_id: TaskId, partition: usize, row: Row) -> Self {
        Self {
            task_id,
            partition,
            row,
        }
    }
}
