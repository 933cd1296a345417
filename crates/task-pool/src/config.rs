use std::path::Path;

use serde::{Deserialize, Serialize};
use task_pool_core::{ExecMode, PoolError, Result, MAX_TASK_RETRY};

/// Minimum drain-tick period in milliseconds.
pub const MIN_TASK_LOOP_TIME_MS: u64 = 100;

/// Pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    /// Create workers on demand instead of up front.
    pub lazy_load: bool,

    /// Maximum number of live workers.
    pub max_threads: usize,

    /// Maximum number of queued tasks.
    pub max_tasks: usize,

    /// Default per-task retry budget.
    pub task_retry: u32,

    /// Drain-tick period in milliseconds.
    pub task_loop_time: u64,

    /// How the pool execution content is interpreted.
    pub mode: ExecMode,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            lazy_load: true,
            max_threads: 50,
            max_tasks: 100,
            task_retry: 0,
            task_loop_time: 1_000,
            mode: ExecMode::Exec,
        }
    }
}

impl PoolOptions {
    /// Reject invalid option combinations up front.
    pub fn validate(&self) -> Result<()> {
        check_max_threads(self.max_threads)?;
        check_max_tasks(self.max_tasks)?;
        check_task_retry(self.task_retry)?;
        check_task_loop_time(self.task_loop_time)?;
        Ok(())
    }

    /// Load options from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let options: PoolOptions = serde_yaml::from_str(&contents)
            .map_err(|e| PoolError::InvalidArgument(format!("invalid options file: {}", e)))?;
        options.validate()?;
        Ok(options)
    }
}

pub(crate) fn check_max_threads(max_threads: usize) -> Result<()> {
    if max_threads < 1 {
        return Err(PoolError::InvalidArgument(
            "max_threads must be at least 1".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn check_max_tasks(max_tasks: usize) -> Result<()> {
    if max_tasks < 1 {
        return Err(PoolError::InvalidArgument(
            "max_tasks must be at least 1".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn check_task_retry(task_retry: u32) -> Result<()> {
    if task_retry > MAX_TASK_RETRY {
        return Err(PoolError::InvalidArgument(format!(
            "task_retry must be in 0..={}",
            MAX_TASK_RETRY
        )));
    }
    Ok(())
}

pub(crate) fn check_task_loop_time(task_loop_time: u64) -> Result<()> {
    if task_loop_time < MIN_TASK_LOOP_TIME_MS {
        return Err(PoolError::InvalidArgument(format!(
            "task_loop_time must be at least {}ms",
            MIN_TASK_LOOP_TIME_MS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = PoolOptions::default();
        options.validate().unwrap();

        assert!(options.lazy_load);
        assert_eq!(options.max_threads, 50);
        assert_eq!(options.max_tasks, 100);
        assert_eq!(options.task_retry, 0);
        assert_eq!(options.task_loop_time, 1_000);
        assert_eq!(options.mode, ExecMode::Exec);
    }

    #[test]
    fn test_invalid_options_rejected() {
        let mut options = PoolOptions::default();
        options.max_threads = 0;
        assert!(matches!(
            options.validate(),
            Err(PoolError::InvalidArgument(_))
        ));

        let mut options = PoolOptions::default();
        options.max_tasks = 0;
        assert!(options.validate().is_err());

        let mut options = PoolOptions::default();
        options.task_retry = MAX_TASK_RETRY + 1;
        assert!(options.validate().is_err());

        let mut options = PoolOptions::default();
        options.task_loop_time = 99;
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let yaml = "max_threads: 4\nmax_tasks: 8\ntask_retry: 2\nmode: eval\n";
        let options: PoolOptions = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(options.max_threads, 4);
        assert_eq!(options.max_tasks, 8);
        assert_eq!(options.task_retry, 2);
        assert_eq!(options.mode, ExecMode::Eval);
        // unspecified fields fall back to defaults
        assert!(options.lazy_load);
        assert_eq!(options.task_loop_time, 1_000);
    }
}
