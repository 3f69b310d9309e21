//! Task scopes: cancellation, failure routing and the shared execution pools.
//!
//! A [`TaskScope`] owns one [`CancellationToken`] and one failure handler.
//! Everything a pipeline run does is submitted through it:
//!
//! - [`TaskScope::submit`] spawns a top-level task on the async runtime
//! - [`TaskScope::io`] runs I/O bound work under the I/O permit pool
//! - [`TaskScope::cpu`] runs CPU bound work on the rayon pool
//!
//! All three race the scope's token, so a cancelled scope abandons its
//! continuations at the next `.await` and drops any partial result.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::PoolConfig;
use crate::error::{FailureCause, FailureRecord, PipelineError, PipelineResult, Result};

/// The I/O and CPU pools a scope multiplexes work over.
///
/// Cheap to clone; every scope created from the same `Executors` shares the
/// same permits and threads.
#[derive(Clone)]
pub struct Executors {
    io_permits: Arc<Semaphore>,
    cpu_pool: Arc<rayon::ThreadPool>,
}

impl Executors {
    /// Build the pools from configuration.
    pub fn new(config: &PoolConfig) -> Result<Self> {
        let cpu_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.cpu_workers)
            .thread_name(|i| format!("lumen-cpu-{i}"))
            .build()?;
        tracing::debug!(
            "Executors ready: {} I/O permits, {} CPU threads",
            config.io_workers,
            config.cpu_workers
        );
        Ok(Self {
            io_permits: Arc::new(Semaphore::new(config.io_workers)),
            cpu_pool: Arc::new(cpu_pool),
        })
    }
}

impl fmt::Debug for Executors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executors")
            .field("io_permits_available", &self.io_permits.available_permits())
            .field("cpu_threads", &self.cpu_pool.current_num_threads())
            .finish()
    }
}

/// Identity of a submitted task, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Pending = 0,
    Running = 1,
    Cancelled = 2,
    Completed = 3,
    Failed = 4,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Pending,
            1 => TaskState::Running,
            2 => TaskState::Cancelled,
            3 => TaskState::Completed,
            _ => TaskState::Failed,
        }
    }

    /// Whether the task has stopped for good.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Cancelled | TaskState::Completed | TaskState::Failed
        )
    }
}

/// How a task ended.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    Failed(FailureRecord),
    Cancelled,
}

impl<T> TaskOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskOutcome::Cancelled)
    }

    pub fn failure(&self) -> Option<&FailureRecord> {
        match self {
            TaskOutcome::Failed(record) => Some(record),
            _ => None,
        }
    }
}

/// Handle to a submitted unit of work.
pub struct Task<T> {
    id: TaskId,
    state: Arc<AtomicU8>,
    handle: JoinHandle<TaskOutcome<T>>,
}

impl<T> Task<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to end.
    pub async fn join(self) -> TaskOutcome<T> {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => TaskOutcome::Cancelled,
            Err(e) => TaskOutcome::Failed(FailureRecord {
                cause: FailureCause::Internal,
                message: format!("Task join error: {e}"),
            }),
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

type FailureHandler = Arc<dyn Fn(FailureRecord) + Send + Sync>;

/// Owner of related tasks sharing one cancellation lifecycle.
///
/// Clones share the token, the tracker and the failure handler, so a clone
/// moved into a task still belongs to the same scope.
#[derive(Clone)]
pub struct TaskScope {
    token: CancellationToken,
    tracker: TaskTracker,
    executors: Executors,
    handler: Arc<Mutex<Option<FailureHandler>>>,
}

impl TaskScope {
    pub fn new(executors: Executors) -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            executors,
            handler: Arc::new(Mutex::new(None)),
        }
    }

    /// Register the callback that receives failures of this scope's tasks.
    ///
    /// Replaces any previously registered handler. The handler runs on the
    /// worker that observed the failure.
    pub fn on_unhandled_failure<H>(&self, handler: H)
    where
        H: Fn(FailureRecord) + Send + Sync + 'static,
    {
        let mut slot = self.handler.lock().unwrap_or_else(|p| p.into_inner());
        *slot = Some(Arc::new(handler));
    }

    /// The token every task of this scope observes.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Number of submitted tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Signal cancellation to every outstanding task. Safe to call repeatedly.
    pub fn cancel_all(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!("Cancelling scope ({} tasks in flight)", self.tracker.len());
        }
        self.token.cancel();
        self.tracker.close();
    }

    /// Wait until every submitted task has finished.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Schedule `work` without blocking the caller.
    ///
    /// A failure is delivered to the failure handler exactly once, unless the
    /// scope was cancelled first. Panics are reported as internal failures.
    pub fn submit<F, T>(&self, work: F) -> Task<T>
    where
        F: Future<Output = PipelineResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let id = TaskId::next();
        let state = Arc::new(AtomicU8::new(TaskState::Pending as u8));
        let task_state = state.clone();
        let token = self.token.clone();
        let handler = self.handler.clone();

        let handle = self.tracker.spawn(async move {
            if token.is_cancelled() {
                task_state.store(TaskState::Cancelled as u8, Ordering::Release);
                tracing::trace!(task_id = %id, "Cancelled before start");
                return TaskOutcome::Cancelled;
            }
            task_state.store(TaskState::Running as u8, Ordering::Release);

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(PipelineError::Cancelled),
                caught = AssertUnwindSafe(work).catch_unwind() => caught
                    .unwrap_or_else(|panic| Err(PipelineError::Internal(panic_message(panic.as_ref())))),
            };

            match result {
                Ok(value) => {
                    task_state.store(TaskState::Completed as u8, Ordering::Release);
                    TaskOutcome::Completed(value)
                }
                Err(e) => match e.to_failure() {
                    Some(record) if !token.is_cancelled() => {
                        task_state.store(TaskState::Failed as u8, Ordering::Release);
                        deliver(&handler, id, record.clone());
                        TaskOutcome::Failed(record)
                    }
                    _ => {
                        task_state.store(TaskState::Cancelled as u8, Ordering::Release);
                        tracing::trace!(task_id = %id, "Cancelled");
                        TaskOutcome::Cancelled
                    }
                },
            }
        });

        Task { id, state, handle }
    }

    /// Run I/O bound work under an I/O permit, racing cancellation.
    pub async fn io<F, T, E>(&self, work: F) -> PipelineResult<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        PipelineError: From<E>,
    {
        let _permit = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(PipelineError::Cancelled),
            permit = self.executors.io_permits.acquire() => permit
                .map_err(|_| PipelineError::Internal("I/O pool closed".to_string()))?,
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(PipelineError::Cancelled),
            result = work => result.map_err(PipelineError::from),
        }
    }

    /// Run CPU bound work on the CPU pool, racing cancellation.
    ///
    /// The job is skipped if the scope is cancelled before a thread picks it
    /// up; a result that arrives after cancellation is discarded.
    pub async fn cpu<F, T, E>(&self, work: F) -> PipelineResult<T>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        PipelineError: From<E>,
    {
        if self.token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let (tx, rx) = oneshot::channel();
        let token = self.token.clone();
        self.executors.cpu_pool.spawn(move || {
            if token.is_cancelled() {
                return;
            }
            let _ = tx.send(std::panic::catch_unwind(AssertUnwindSafe(work)));
        });

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(PipelineError::Cancelled),
            received = rx => match received {
                Ok(Ok(result)) => result.map_err(PipelineError::from),
                Ok(Err(panic)) => Err(PipelineError::Internal(panic_message(panic.as_ref()))),
                Err(_) => Err(PipelineError::Cancelled),
            },
        }
    }
}

impl fmt::Debug for TaskScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScope")
            .field("cancelled", &self.token.is_cancelled())
            .field("in_flight", &self.tracker.len())
            .finish()
    }
}

fn deliver(handler: &Mutex<Option<FailureHandler>>, id: TaskId, record: FailureRecord) {
    let handler = handler.lock().unwrap_or_else(|p| p.into_inner()).clone();
    match handler {
        Some(handler) => handler(record),
        None => tracing::warn!(
            task_id = %id,
            cause = %record.cause,
            "Unhandled task failure: {}",
            record.message
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
