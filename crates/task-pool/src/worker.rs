use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use task_pool_core::{ExecSource, Task, TaskId, WorkerId};

use crate::runtime::{ExecBackend, ExecRequest, ExecResponse, ResponseCode, WorkerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerState {
    Idle,
    Running,
    Exited,
}

/// One pooled worker: owns a single execution context and runs at most one
/// task at a time.
pub(crate) struct Worker {
    id: WorkerId,
    state: WorkerState,
    current: Option<Task>,
    requests: UnboundedSender<ExecRequest>,
    context: JoinHandle<()>,
}

impl Worker {
    /// Create the worker and spawn its execution context.
    pub fn spawn(
        id: WorkerId,
        backend: Arc<dyn ExecBackend>,
        default_source: ExecSource,
        events: UnboundedSender<WorkerEvent>,
    ) -> Self {
        let (requests, inbox) = mpsc::unbounded_channel();
        let context = tokio::spawn(run_context(id, backend, default_source, inbox, events));
        Worker {
            id,
            state: WorkerState::Idle,
            current: None,
            requests,
            context,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn is_idle(&self) -> bool {
        self.state == WorkerState::Idle
    }

    pub fn current_task_id(&self) -> Option<TaskId> {
        self.current.as_ref().map(|task| task.id)
    }

    /// Ship a task to the execution context. Valid only while idle; the
    /// task is handed back when the worker cannot take it.
    pub fn run_task(&mut self, task: Task) -> Result<(), Task> {
        if self.state != WorkerState::Idle {
            return Err(task);
        }
        let request = ExecRequest {
            task_id: task.id,
            payload: task.payload.clone(),
            exec_override: task.exec_override.clone(),
        };
        if self.requests.send(request).is_err() {
            return Err(task);
        }
        self.state = WorkerState::Running;
        self.current = Some(task);
        Ok(())
    }

    /// Normal completion: back to idle, handing the finished task out.
    pub fn finish(&mut self) -> Option<Task> {
        self.state = WorkerState::Idle;
        self.current.take()
    }

    /// Terminal transition: the execution context is gone.
    pub fn mark_exited(&mut self) -> Option<Task> {
        self.state = WorkerState::Exited;
        self.current.take()
    }

    /// Tear the execution context down.
    pub fn terminate(self) {
        self.context.abort();
    }
}

/// The execution context: resolves the default body once, then serves
/// requests until its channel closes or the body panics.
async fn run_context(
    worker_id: WorkerId,
    backend: Arc<dyn ExecBackend>,
    default_source: ExecSource,
    mut inbox: mpsc::UnboundedReceiver<ExecRequest>,
    events: UnboundedSender<WorkerEvent>,
) {
    let default_body = match backend.resolve(&default_source).await {
        Ok(body) => body,
        Err(error) => {
            warn!(
                "Worker {} failed to resolve its default body: {}",
                worker_id, error
            );
            let _ = events.send(WorkerEvent::Error { worker_id, error });
            let _ = events.send(WorkerEvent::Exit {
                worker_id,
                task_id: None,
            });
            return;
        }
    };

    while let Some(request) = inbox.recv().await {
        let task_id = request.task_id;

        let body = match &request.exec_override {
            Some(source) => match backend.resolve(source).await {
                Ok(body) => body,
                Err(error) => {
                    // a bad dynamic body fails the task; the context stays up
                    let _ = events.send(WorkerEvent::Error {
                        worker_id,
                        error: error.clone(),
                    });
                    let _ = events.send(WorkerEvent::Response(ExecResponse {
                        worker_id,
                        task_id,
                        code: ResponseCode::Failed,
                        result: None,
                        error: Some(error),
                    }));
                    continue;
                }
            },
            None => default_body.clone(),
        };

        let payload = request.payload;
        let invocation = tokio::spawn(async move { body.run(payload).await });

        let response = match invocation.await {
            Ok(Ok(result)) => ExecResponse {
                worker_id,
                task_id,
                code: ResponseCode::Success,
                result: Some(result),
                error: None,
            },
            Ok(Err(error)) => ExecResponse {
                worker_id,
                task_id,
                code: ResponseCode::Failed,
                result: None,
                error: Some(error),
            },
            Err(join_error) => {
                // a panicking body takes the whole context down
                debug!(
                    "Worker {} context died running task {}: {}",
                    worker_id, task_id, join_error
                );
                let _ = events.send(WorkerEvent::Exit {
                    worker_id,
                    task_id: Some(task_id),
                });
                return;
            }
        };

        if events.send(WorkerEvent::Response(response)).is_err() {
            return;
        }
    }
}
