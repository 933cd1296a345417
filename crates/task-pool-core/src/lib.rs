mod error;
mod task;

pub use error::{PoolError, Result};
pub use task::{ExecMode, ExecSource, Task, TaskId, TaskOptions, WorkerId};

/// Upper bound on the per-task retry budget.
pub const MAX_TASK_RETRY: u32 = 5;
