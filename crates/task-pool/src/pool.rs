use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use task_pool_core::{ExecSource, PoolError, Result, Task, TaskId, TaskOptions, WorkerId};

use crate::config::{self, PoolOptions};
use crate::queue::TaskQueue;
use crate::runtime::{ExecBackend, ExecResponse, ResponseCode, WorkerEvent};
use crate::worker::Worker;

const POOL_EVENT_CAPACITY: usize = 64;

/// Pool-level observer events.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A worker's execution context died. Carries the task it was running,
    /// if any.
    WorkerExit {
        worker_id: WorkerId,
        task_id: Option<TaskId>,
    },
    /// Non-terminal error reported by a worker context.
    WorkerError { worker_id: WorkerId, error: String },
}

type CompletionSink = oneshot::Sender<Result<Value>>;

/// Completion handle for one submitted task. Await it to get the task's
/// result; wrap it in `tokio::time::timeout` for caller-side deadlines.
pub struct TaskHandle {
    task_id: TaskId,
    receiver: oneshot::Receiver<Result<Value>>,
}

impl TaskHandle {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }
}

impl Future for TaskHandle {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(PoolError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct PoolState {
    options: PoolOptions,
    workers: HashMap<WorkerId, Worker>,
    queue: TaskQueue,
    pending: HashMap<TaskId, CompletionSink>,
    next_worker_id: WorkerId,
    closed: bool,
}

impl PoolState {
    fn idle_worker_id(&self) -> Option<WorkerId> {
        self.workers
            .values()
            .find(|worker| worker.is_idle())
            .map(|worker| worker.id())
    }

    fn can_place(&self) -> bool {
        self.workers.len() < self.options.max_threads || self.idle_worker_id().is_some()
    }
}

struct PoolInner {
    state: Mutex<PoolState>,
    backend: Arc<dyn ExecBackend>,
    default_source: ExecSource,
    worker_events: mpsc::UnboundedSender<WorkerEvent>,
    pool_events: broadcast::Sender<PoolEvent>,
    shutdown: watch::Sender<bool>,
}

/// A bounded worker pool.
///
/// The dispatcher couples a bounded set of workers to a bounded FIFO task
/// queue. All dispatcher state lives behind a single mutex, so admission
/// decisions are atomic under concurrent submissions. Two background tasks
/// run per pool: one consuming worker lifecycle events, one draining the
/// queue every `task_loop_time` milliseconds.
///
/// Dropping the pool closes it: workers are terminated and outstanding
/// handles settle with [`PoolError::Closed`].
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a pool whose default execution body is `exec_content`,
    /// interpreted per `options.mode`, resolved through `backend`.
    ///
    /// Fails fast with [`PoolError::InvalidArgument`] on bad options. With
    /// `lazy_load` off, `max_threads` workers are created up front. Must be
    /// called within a Tokio runtime.
    pub fn new(
        backend: Arc<dyn ExecBackend>,
        exec_content: impl Into<String>,
        options: PoolOptions,
    ) -> Result<Pool> {
        options.validate()?;

        let default_source = ExecSource::new(options.mode, exec_content);
        let lazy_load = options.lazy_load;
        let queue = TaskQueue::new(options.max_tasks);

        let (worker_events, worker_inbox) = mpsc::unbounded_channel();
        let (pool_events, _) = broadcast::channel(POOL_EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        let inner = Arc::new(PoolInner {
            state: Mutex::new(PoolState {
                options,
                workers: HashMap::new(),
                queue,
                pending: HashMap::new(),
                next_worker_id: 0,
                closed: false,
            }),
            backend,
            default_source,
            worker_events,
            pool_events,
            shutdown,
        });

        if !lazy_load {
            let mut state = inner.state.lock();
            for _ in 0..state.options.max_threads {
                inner.spawn_worker(&mut state);
            }
            info!("Pre-created {} workers", state.workers.len());
        }

        let event_inner = inner.clone();
        tokio::spawn(async move {
            event_inner.run_event_loop(worker_inbox).await;
        });

        let drain_inner = inner.clone();
        tokio::spawn(async move {
            drain_inner.run_drain_loop().await;
        });

        Ok(Pool { inner })
    }

    /// Submit a task with the pool defaults.
    pub fn send(&self, payload: Value) -> Result<TaskHandle> {
        self.send_with(payload, TaskOptions::default())
    }

    /// Submit a task.
    ///
    /// Placement is grow-first: while the pool is under `max_threads` a new
    /// worker is created even when an idle one exists, so a fresh submission
    /// may run before a queued predecessor. FIFO order is guaranteed only
    /// between tasks that actually wait in the queue.
    ///
    /// Never blocks: the task is placed and a handle returned, or the call
    /// fails with [`PoolError::QueueFull`] (no state mutated) or
    /// [`PoolError::InvalidArgument`].
    pub fn send_with(&self, payload: Value, options: TaskOptions) -> Result<TaskHandle> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }

        let retries = options.retry.unwrap_or(state.options.task_retry);
        config::check_task_retry(retries)?;

        let task = Task::new(payload, retries, options.exec);
        let task_id = task.id;
        let (sink, receiver) = oneshot::channel();

        match self.inner.consume_task(&mut state, task) {
            Ok(()) => {}
            Err(task) => {
                if !state.queue.push(task) {
                    return Err(PoolError::QueueFull);
                }
                debug!("Queued task {}", task_id);
            }
        }

        state.pending.insert(task_id, sink);
        Ok(TaskHandle { task_id, receiver })
    }

    /// Update the worker bound. Lowering it never kills live workers; the
    /// pool contracts as workers exit.
    pub fn set_max_threads(&self, max_threads: usize) -> Result<()> {
        config::check_max_threads(max_threads)?;
        self.inner.state.lock().options.max_threads = max_threads;
        Ok(())
    }

    /// Update the queue bound.
    pub fn set_max_tasks(&self, max_tasks: usize) -> Result<()> {
        config::check_max_tasks(max_tasks)?;
        let mut state = self.inner.state.lock();
        state.options.max_tasks = max_tasks;
        state.queue.set_max_length(max_tasks);
        Ok(())
    }

    /// Update the default retry budget for future submissions.
    pub fn set_task_retry(&self, task_retry: u32) -> Result<()> {
        config::check_task_retry(task_retry)?;
        self.inner.state.lock().options.task_retry = task_retry;
        Ok(())
    }

    /// Update the drain-tick period; picked up on the next tick.
    pub fn set_task_loop_time(&self, task_loop_time: u64) -> Result<()> {
        config::check_task_loop_time(task_loop_time)?;
        self.inner.state.lock().options.task_loop_time = task_loop_time;
        Ok(())
    }

    /// Number of live workers.
    pub fn thread_length(&self) -> usize {
        self.inner.state.lock().workers.len()
    }

    /// Number of queued tasks.
    pub fn task_length(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Any idle worker, or none.
    pub fn idle_thread(&self) -> Option<WorkerId> {
        self.inner.state.lock().idle_worker_id()
    }

    /// True when a `send` right now would be rejected with
    /// [`PoolError::QueueFull`].
    pub fn is_full(&self) -> bool {
        let state = self.inner.state.lock();
        state.workers.len() >= state.options.max_threads
            && state.idle_worker_id().is_none()
            && state.queue.is_full()
    }

    /// Subscribe to worker lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.pool_events.subscribe()
    }

    /// Empty the task queue. Each wiped task's handle settles with
    /// [`PoolError::Wiped`]; already-dispatched tasks complete normally.
    pub fn wipe_task_queue(&self) {
        let mut state = self.inner.state.lock();
        let wiped = state.queue.wipe();
        if !wiped.is_empty() {
            info!("Wiped {} queued tasks", wiped.len());
        }
        for task in wiped {
            if let Some(sink) = state.pending.remove(&task.id) {
                let _ = sink.send(Err(PoolError::Wiped));
            }
        }
    }

    /// Drop every worker, terminating its execution context, and settle all
    /// outstanding handles with [`PoolError::Wiped`]. Queued tasks are
    /// dropped too; their handles were just settled.
    pub fn wipe_thread_pool(&self) {
        let mut state = self.inner.state.lock();
        info!("Wiping thread pool ({} workers)", state.workers.len());
        for (_, worker) in state.workers.drain() {
            worker.terminate();
        }
        for (_, sink) in state.pending.drain() {
            let _ = sink.send(Err(PoolError::Wiped));
        }
        state.queue.wipe();
    }

    /// Shut the pool down: terminate workers, reject outstanding handles
    /// with [`PoolError::Closed`], and stop the background tasks.
    /// Idempotent; subsequent `send` calls fail with `Closed`.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        info!("Closing pool");
        for (_, worker) in state.workers.drain() {
            worker.terminate();
        }
        for (_, sink) in state.pending.drain() {
            let _ = sink.send(Err(PoolError::Closed));
        }
        state.queue.wipe();
        drop(state);
        let _ = self.inner.shutdown.send(true);
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.close();
    }
}

impl PoolInner {
    async fn run_event_loop(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<WorkerEvent>) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => {}
                maybe = inbox.recv() => match maybe {
                    Some(event) => self.handle_worker_event(event),
                    None => break,
                },
            }
        }
    }

    async fn run_drain_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }
            let period = Duration::from_millis(self.state.lock().options.task_loop_time);
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(period) => self.drain_queue(),
            }
        }
    }

    fn handle_worker_event(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::Response(response) => self.handle_response(response),
            WorkerEvent::Error { worker_id, error } => {
                warn!("Worker {} reported error: {}", worker_id, error);
                let _ = self.pool_events.send(PoolEvent::WorkerError { worker_id, error });
            }
            WorkerEvent::Exit { worker_id, task_id } => self.handle_exit(worker_id, task_id),
        }
    }

    fn handle_response(&self, response: ExecResponse) {
        let mut state = self.state.lock();

        let Some(worker) = state.workers.get_mut(&response.worker_id) else {
            // worker was wiped while its response was in flight
            debug!("Response from unknown worker {}", response.worker_id);
            return;
        };
        if worker.current_task_id() != Some(response.task_id) {
            warn!(
                "Worker {} responded for task {} it is not running",
                response.worker_id, response.task_id
            );
        }
        let Some(task) = worker.finish() else {
            warn!("Worker {} responded while idle", response.worker_id);
            return;
        };
        let task_id = task.id;

        match response.code {
            ResponseCode::Success => {
                debug!("Task {} completed on worker {}", task_id, response.worker_id);
                state.queue.remove_task(&task_id);
                if let Some(sink) = state.pending.remove(&task_id) {
                    let _ = sink.send(Ok(response.result.unwrap_or(Value::Null)));
                }
            }
            ResponseCode::Failed => {
                let error = response
                    .error
                    .unwrap_or_else(|| "task failed".to_string());
                if task.is_retryable() && state.queue.push(task) {
                    // retry accounting happens in the queue: decrement, tail
                    state.queue.retry_task(&task_id);
                    debug!("Task {} failed, scheduled for retry: {}", task_id, error);
                } else {
                    info!("Task {} failed: {}", task_id, error);
                    state.queue.remove_task(&task_id);
                    if let Some(sink) = state.pending.remove(&task_id) {
                        let _ = sink.send(Err(PoolError::TaskFailed(error)));
                    }
                }
            }
        }

        self.dispatch_next(&mut state);
    }

    fn handle_exit(&self, worker_id: WorkerId, task_id: Option<TaskId>) {
        let mut state = self.state.lock();

        let Some(mut worker) = state.workers.remove(&worker_id) else {
            return;
        };
        let running = worker.mark_exited();
        worker.terminate();
        warn!("Worker {} exited", worker_id);

        let dead_task_id = task_id.or_else(|| running.as_ref().map(|task| task.id));
        if let Some(task) = running {
            // an exited worker's task is not retried
            state.queue.remove_task(&task.id);
            if let Some(sink) = state.pending.remove(&task.id) {
                let _ = sink.send(Err(PoolError::WorkerExited {
                    worker_id,
                    task_id: task.id,
                }));
            }
        }

        let _ = self.pool_events.send(PoolEvent::WorkerExit {
            worker_id,
            task_id: dead_task_id,
        });

        self.dispatch_next(&mut state);
    }

    fn spawn_worker(&self, state: &mut PoolState) -> WorkerId {
        let id = state.next_worker_id;
        state.next_worker_id += 1;
        let worker = Worker::spawn(
            id,
            self.backend.clone(),
            self.default_source.clone(),
            self.worker_events.clone(),
        );
        state.workers.insert(id, worker);
        debug!("Created worker {}", id);
        id
    }

    /// Placement steps for an admitted task: grow first, then reuse an idle
    /// worker. The task is handed back when neither is possible.
    fn consume_task(&self, state: &mut PoolState, task: Task) -> std::result::Result<(), Task> {
        let task_id = task.id;
        let mut task = task;

        loop {
            let worker_id = if state.workers.len() < state.options.max_threads {
                self.spawn_worker(state)
            } else if let Some(id) = state.idle_worker_id() {
                id
            } else {
                return Err(task);
            };

            let Some(worker) = state.workers.get_mut(&worker_id) else {
                continue;
            };
            match worker.run_task(task) {
                Ok(()) => {
                    debug!("Dispatched task {} to worker {}", task_id, worker_id);
                    return Ok(());
                }
                Err(rejected) => {
                    // the context is already gone; drop the worker and retry
                    warn!("Worker {} refused a task, dropping it", worker_id);
                    if let Some(dead) = state.workers.remove(&worker_id) {
                        dead.terminate();
                    }
                    task = rejected;
                }
            }
        }
    }

    /// Move the queue head onto a worker, when placement is possible.
    fn dispatch_next(&self, state: &mut PoolState) -> bool {
        if state.queue.is_empty() || !state.can_place() {
            return false;
        }
        let Some(task) = state.queue.pop() else {
            return false;
        };
        match self.consume_task(state, task) {
            Ok(()) => true,
            Err(task) => {
                state.queue.push_front(task);
                false
            }
        }
    }

    fn drain_queue(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        while self.dispatch_next(&mut state) {}
    }
}
