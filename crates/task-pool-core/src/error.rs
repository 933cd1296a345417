use thiserror::Error;

use crate::task::{TaskId, WorkerId};

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("task queue is full")]
    QueueFull,

    #[error("task failed: {0}")]
    TaskFailed(String),

    #[error("worker {worker_id} exited while running task {task_id}")]
    WorkerExited { worker_id: WorkerId, task_id: TaskId },

    #[error("task was wiped before completion")]
    Wiped,

    #[error("pool is closed")]
    Closed,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PoolError>;
