//! Bounded worker pool with a task queue, automatic retry, and a periodic
//! drain tick.
//!
//! Callers submit payloads with [`Pool::send`] and await the returned
//! [`TaskHandle`]. Each task runs on a pooled worker whose execution body is
//! resolved through an [`ExecBackend`]; the in-process [`BodyRegistry`]
//! backend resolves sources against registered [`TaskBody`] implementations.

mod config;
mod pool;
mod queue;
mod runtime;
mod worker;

pub use config::{PoolOptions, MIN_TASK_LOOP_TIME_MS};
pub use pool::{Pool, PoolEvent, TaskHandle};
pub use queue::TaskQueue;
pub use runtime::{BodyRegistry, BodyResult, EchoBody, ExecBackend, FnBody, TaskBody};

pub use task_pool_core::{
    ExecMode, ExecSource, PoolError, Result, Task, TaskId, TaskOptions, WorkerId, MAX_TASK_RETRY,
};
