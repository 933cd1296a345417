use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{PoolError, Result, MAX_TASK_RETRY};

/// Unique identifier for a task.
pub type TaskId = Uuid;

/// Identifier of a worker, unique within one pool.
pub type WorkerId = u64;

/// How a pool's execution content string is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// The content is a path to the execution body.
    Exec,
    /// The content is inline source.
    Eval,
}

impl Default for ExecMode {
    fn default() -> Self {
        ExecMode::Exec
    }
}

/// Location of an execution body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecSource {
    Path(String),
    Inline(String),
}

impl ExecSource {
    pub fn new(mode: ExecMode, content: impl Into<String>) -> Self {
        match mode {
            ExecMode::Exec => ExecSource::Path(content.into()),
            ExecMode::Eval => ExecSource::Inline(content.into()),
        }
    }

    /// The raw content string, whichever flavor the source is.
    pub fn content(&self) -> &str {
        match self {
            ExecSource::Path(content) | ExecSource::Inline(content) => content,
        }
    }
}

/// One submission to the pool, plus its retry accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// Caller-supplied payload, forwarded verbatim to the worker.
    pub payload: Value,

    /// Per-task execution body overriding the pool default. A task carrying
    /// one is *dynamic*.
    pub exec_override: Option<ExecSource>,

    /// When the task was submitted.
    pub created_at: DateTime<Utc>,

    retries_left: u32,
}

impl Task {
    /// Create a new task. The retry budget is clamped to `[0, MAX_TASK_RETRY]`.
    pub fn new(payload: Value, retries: u32, exec_override: Option<ExecSource>) -> Self {
        Task {
            id: Uuid::new_v4(),
            payload,
            exec_override,
            created_at: Utc::now(),
            retries_left: retries.min(MAX_TASK_RETRY),
        }
    }

    /// A dynamic task carries its own execution body.
    pub fn is_dynamic(&self) -> bool {
        self.exec_override.is_some()
    }

    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }

    pub fn is_retryable(&self) -> bool {
        self.retries_left > 0
    }

    /// Consume one retry from the budget.
    pub fn decrement_retry(&mut self) -> Result<()> {
        if self.retries_left == 0 {
            return Err(PoolError::InvalidState(format!(
                "task {} has no retries left",
                self.id
            )));
        }
        self.retries_left -= 1;
        Ok(())
    }
}

/// Per-submission overrides for `Pool::send_with`.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Retry budget for this task; the pool default applies when absent.
    pub retry: Option<u32>,

    /// Execution body overriding the pool default.
    pub exec: Option<ExecSource>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_creation() {
        let task = Task::new(json!({"n": 1}), 2, None);

        assert_eq!(task.payload, json!({"n": 1}));
        assert_eq!(task.retries_left(), 2);
        assert!(task.is_retryable());
        assert!(!task.is_dynamic());
    }

    #[test]
    fn test_retry_budget_clamped() {
        let task = Task::new(json!(null), 99, None);
        assert_eq!(task.retries_left(), MAX_TASK_RETRY);
    }

    #[test]
    fn test_decrement_retry() {
        let mut task = Task::new(json!(null), 1, None);

        task.decrement_retry().unwrap();
        assert_eq!(task.retries_left(), 0);
        assert!(!task.is_retryable());

        let result = task.decrement_retry();
        assert!(matches!(result, Err(PoolError::InvalidState(_))));
        assert_eq!(task.retries_left(), 0);
    }

    #[test]
    fn test_dynamic_task() {
        let source = ExecSource::Inline("double".to_string());
        let task = Task::new(json!(2), 0, Some(source.clone()));

        assert!(task.is_dynamic());
        assert_eq!(task.exec_override, Some(source));
    }

    #[test]
    fn test_exec_source_from_mode() {
        let path = ExecSource::new(ExecMode::Exec, "bodies/echo");
        assert_eq!(path, ExecSource::Path("bodies/echo".to_string()));

        let inline = ExecSource::new(ExecMode::Eval, "echo");
        assert_eq!(inline, ExecSource::Inline("echo".to_string()));
        assert_eq!(inline.content(), "echo");
    }
}
