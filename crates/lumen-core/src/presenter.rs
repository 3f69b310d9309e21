//! The screen controller: one view, one active run, teardown on exit.

use std::sync::Arc;

use crate::config::{Config, ReporterConfig};
use crate::error::Result;
use crate::pipeline::{Pipeline, RunHandle};
use crate::reporter::ErrorReporter;
use crate::scope::{Executors, TaskScope};
use crate::types::PipelineRequest;
use crate::ui::UiContext;
use crate::view::ImageView;

/// Drives a view from pipeline runs.
///
/// Each [`show`](Self::show) gets a fresh [`TaskScope`]; the previous one is
/// cancelled and drained first, so at most one run is active at a time.
pub struct ImagePresenter {
    pipeline: Pipeline,
    executors: Executors,
    view: Arc<dyn ImageView>,
    reporter: Arc<ErrorReporter>,
    ui: UiContext,
    scope: Option<TaskScope>,
}

impl ImagePresenter {
    /// Create a presenter with stages and pools built from `config`.
    pub fn new(config: &Config, view: Arc<dyn ImageView>, ui: UiContext) -> Result<Self> {
        let executors = Executors::new(&config.pools)?;
        let pipeline = Pipeline::from_config(config)?;
        Ok(Self::with_pipeline(
            pipeline,
            executors,
            &config.reporter,
            view,
            ui,
        ))
    }

    /// Create a presenter around an existing pipeline and pools.
    pub fn with_pipeline(
        pipeline: Pipeline,
        executors: Executors,
        reporter: &ReporterConfig,
        view: Arc<dyn ImageView>,
        ui: UiContext,
    ) -> Self {
        Self {
            pipeline,
            executors,
            reporter: Arc::new(ErrorReporter::new(reporter, view.clone())),
            view,
            ui,
            scope: None,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Whether a scope is live: `show` was called and `teardown` was not.
    ///
    /// A run that already finished keeps its scope live until the next
    /// `show` or `teardown`; use [`RunHandle::state`] for the run itself.
    pub fn is_active(&self) -> bool {
        self.scope.as_ref().is_some_and(|s| !s.is_cancelled())
    }

    /// Display `request`, replacing any run in progress.
    pub async fn show(&mut self, request: PipelineRequest) -> RunHandle {
        self.teardown().await;

        let scope = TaskScope::new(self.executors.clone());
        let reporter = self.reporter.clone();
        let ui = self.ui.clone();
        let token = scope.token().clone();
        scope.on_unhandled_failure(move |record| {
            let reporter = reporter.clone();
            let cause = record.cause;
            let message = record.message.clone();
            if !ui.dispatch(&token, move || reporter.report(&record)) {
                tracing::error!(%cause, "Failure not shown, UI context closed: {}", message);
            }
        });

        tracing::info!("Showing {}", request.url());
        let view = self.view.clone();
        let handle = self
            .pipeline
            .run(&scope, &self.ui, request, move |image| view.show_image(image));
        self.scope = Some(scope);
        handle
    }

    /// Cancel the active run and wait for its tasks to finish.
    ///
    /// Safe to call any number of times.
    pub async fn teardown(&mut self) {
        if let Some(scope) = self.scope.take() {
            scope.cancel_all();
            scope.wait().await;
            tracing::debug!("Previous run torn down");
        }
    }
}

impl Drop for ImagePresenter {
    fn drop(&mut self) {
        if let Some(scope) = &self.scope {
            scope.cancel_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureCause, FetchError};
    use crate::fetch::{ByteStream, FetchStage, Transport};
    use crate::filter::FilterStage;
    use crate::scope::TaskOutcome;
    use crate::view::{ScreenSnapshot, ScreenState};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::{stream, StreamExt};
    use reqwest::Url;
    use std::time::Duration;

    /// Opens a stream that yields one chunk and then never finishes.
    struct Stalled;

    #[async_trait]
    impl Transport for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn open(&self, _url: &Url) -> std::result::Result<ByteStream, FetchError> {
            let chunks = stream::iter([Ok(Bytes::from_static(b"\x89PNG"))])
                .chain(stream::pending())
                .boxed();
            Ok(ByteStream::new(chunks, None))
        }
    }

    fn presenter_on(ui: UiContext) -> (ImagePresenter, Arc<ScreenState>) {
        let config = Config::default();
        let mut fetch = FetchStage::new(&config).unwrap();
        fetch.register("mem", Arc::new(Stalled));
        let view = Arc::new(ScreenState::new());
        let presenter = ImagePresenter::with_pipeline(
            Pipeline::new(fetch, FilterStage::new(&config.filter)),
            Executors::new(&config.pools).unwrap(),
            &config.reporter,
            view.clone(),
            ui,
        );
        (presenter, view)
    }

    fn presenter() -> (ImagePresenter, Arc<ScreenState>, UiContext) {
        let (ui, _loop) = UiContext::spawn();
        let (presenter, view) = presenter_on(ui.clone());
        (presenter, view, ui)
    }

    #[tokio::test]
    async fn test_unreachable_host_shows_template_message() {
        let (mut presenter, view, ui) = presenter();

        let outcome = presenter
            .show(PipelineRequest::new("http://127.0.0.1:1/photo.png"))
            .await
            .join()
            .await;
        ui.flush().await;

        assert!(matches!(outcome, TaskOutcome::Failed(_)));
        let snapshot = view.snapshot();
        assert_eq!(snapshot.error.as_deref(), Some("Could not load the image."));
        assert_eq!(snapshot.errors_shown, 1);
        assert_eq!(snapshot.images_shown, 0);
        assert_eq!(presenter.pipeline().filter_stage().applied_count(), 0);

        // The finished run's scope stays live until replaced or torn down.
        assert!(presenter.is_active());
        presenter.teardown().await;
        assert!(!presenter.is_active());
    }

    #[tokio::test]
    async fn test_teardown_twice_is_harmless() {
        let (mut presenter, view, ui) = presenter();
        let handle = presenter.show(PipelineRequest::new("mem://host/slow.png")).await;

        for _ in 0..200 {
            if presenter.pipeline().fetch_stage().open_streams() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(presenter.pipeline().fetch_stage().open_streams(), 1);
        assert!(presenter.is_active());

        presenter.teardown().await;
        presenter.teardown().await;
        assert!(!presenter.is_active());

        assert!(handle.join().await.is_cancelled());
        ui.flush().await;
        assert_eq!(view.snapshot(), ScreenSnapshot::default());
        assert_eq!(presenter.pipeline().fetch_stage().open_streams(), 0);
    }

    #[tokio::test]
    async fn test_failure_with_stopped_ui_loop_still_fails_run() {
        let (ui, ui_loop) = UiContext::spawn();
        ui_loop.abort();
        let _ = ui_loop.await;
        assert!(ui.is_closed());

        let (mut presenter, view) = presenter_on(ui);
        let outcome = presenter
            .show(PipelineRequest::new("http://127.0.0.1:1/photo.png"))
            .await
            .join()
            .await;

        assert_eq!(outcome.failure().unwrap().cause, FailureCause::Fetch);
        assert_eq!(view.snapshot(), ScreenSnapshot::default());
    }
}
