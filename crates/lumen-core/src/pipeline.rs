//! Pipeline orchestration: fetch, then filter, then publish.
//!
//! A run is one task on a [`TaskScope`]. Its body reads top to bottom; each
//! stage boundary is an `.await` that hands the work to the I/O pool, the
//! CPU pool or the UI loop and suspends until the result is back.

use std::sync::Arc;

use tokio::sync::{oneshot, watch};

use crate::config::Config;
use crate::error::{PipelineError, PipelineResult, Result};
use crate::fetch::FetchStage;
use crate::filter::FilterStage;
use crate::scope::{Task, TaskId, TaskOutcome, TaskScope};
use crate::types::{ImageBuffer, PipelineRequest};
use crate::ui::UiContext;

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Fetching,
    Filtering,
    Publishing,
    Done,
    Failed,
    Cancelled,
}

impl RunState {
    /// No transition leaves a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed | RunState::Cancelled)
    }

    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Fetching)
                | (Fetching, Filtering)
                | (Filtering, Publishing)
                | (Publishing, Done)
                | (Fetching | Filtering | Publishing, Failed)
                | (Idle | Fetching | Filtering | Publishing, Cancelled)
        )
    }
}

/// Publishes state transitions; marks the run cancelled if dropped early.
struct RunStateGuard {
    tx: watch::Sender<RunState>,
}

impl RunStateGuard {
    fn advance(&self, next: RunState) {
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                tracing::trace!("  {:?} -> {:?}", *state, next);
                *state = next;
                true
            } else {
                false
            }
        });
    }
}

impl Drop for RunStateGuard {
    fn drop(&mut self) {
        self.advance(RunState::Cancelled);
    }
}

/// Handle to one pipeline run.
#[derive(Debug)]
pub struct RunHandle {
    task: Task<()>,
    state: watch::Receiver<RunState>,
}

impl RunHandle {
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// Current state of the run.
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.clone()
    }

    /// Wait for the run to end.
    pub async fn join(self) -> TaskOutcome<()> {
        self.task.join().await
    }
}

/// Fetch and filter stages shared by every run.
#[derive(Clone, Debug)]
pub struct Pipeline {
    fetch: Arc<FetchStage>,
    filter: Arc<FilterStage>,
}

impl Pipeline {
    pub fn new(fetch: FetchStage, filter: FilterStage) -> Self {
        Self {
            fetch: Arc::new(fetch),
            filter: Arc::new(filter),
        }
    }

    /// Build both stages from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            FetchStage::new(config)?,
            FilterStage::new(&config.filter),
        ))
    }

    pub fn fetch_stage(&self) -> &FetchStage {
        &self.fetch
    }

    pub fn filter_stage(&self) -> &FilterStage {
        &self.filter
    }

    /// Start a run on `scope`.
    ///
    /// On success `on_complete` is invoked on `ui` exactly once. On failure
    /// it is never invoked; the failure goes to the scope's failure handler.
    /// A cancelled run invokes neither. If `on_complete` panics or the UI
    /// loop is gone, the run fails with an internal failure.
    pub fn run<F>(
        &self,
        scope: &TaskScope,
        ui: &UiContext,
        request: PipelineRequest,
        on_complete: F,
    ) -> RunHandle
    where
        F: FnOnce(ImageBuffer) + Send + 'static,
    {
        let (tx, state) = watch::channel(RunState::Idle);
        let pipeline = self.clone();
        let worker = scope.clone();
        let ui = ui.clone();

        let task = scope.submit(async move {
            let guard = RunStateGuard { tx };
            let result = pipeline
                .execute(&worker, &ui, &request, &guard, on_complete)
                .await;
            if matches!(&result, Err(e) if !e.is_cancelled()) {
                guard.advance(RunState::Failed);
            }
            result
        });
        tracing::debug!("Run {} submitted", task.id());

        RunHandle { task, state }
    }

    async fn execute<F>(
        &self,
        scope: &TaskScope,
        ui: &UiContext,
        request: &PipelineRequest,
        state: &RunStateGuard,
        on_complete: F,
    ) -> PipelineResult<()>
    where
        F: FnOnce(ImageBuffer) + Send + 'static,
    {
        let url = request.url();

        state.advance(RunState::Fetching);
        let payload = scope.io(self.fetch.download(url)).await?;
        let fetch = self.fetch.clone();
        let image = scope.cpu(move || fetch.decode(payload)).await?;

        state.advance(RunState::Filtering);
        let filter = self.filter.clone();
        let filtered = scope.cpu(move || filter.apply(image)).await?;

        state.advance(RunState::Publishing);
        let (published, delivered) = oneshot::channel();
        let posted = ui.dispatch(scope.token(), move || {
            on_complete(filtered);
            let _ = published.send(());
        });
        if !posted {
            return Err(PipelineError::Internal(
                "UI context closed before publish".to_string(),
            ));
        }
        // The job is dropped unrun on cancellation, or unwinds if the callback panics.
        if delivered.await.is_err() {
            return Err(if scope.is_cancelled() {
                PipelineError::Cancelled
            } else {
                PipelineError::Internal("completion callback did not run".to_string())
            });
        }

        state.advance(RunState::Done);
        tracing::debug!("Published {}", url);
        Ok(())
    }
}
