//! Lumen Core - cancellable image fetch, filter and publish pipeline.
//!
//! A screen asks for an image by URL; Lumen fetches it, runs a pixel effect
//! over it and hands the result back to the screen, or reports a single
//! user-facing error. Tearing the screen down cancels whatever is in flight.
//!
//! # Architecture
//!
//! ```text
//! PipelineRequest → Fetch (I/O pool) → Filter (CPU pool) → Publish (UI loop)
//!                         └──────── failures ────────┘→ ErrorReporter (UI loop)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lumen_core::{Config, ImagePresenter, PipelineRequest, ScreenState, UiContext};
//!
//! #[tokio::main]
//! async fn main() -> lumen_core::Result<()> {
//!     let (ui, _ui_loop) = UiContext::spawn();
//!     let view = Arc::new(ScreenState::new());
//!     let mut presenter = ImagePresenter::new(&Config::load()?, view.clone(), ui.clone())?;
//!
//!     let run = presenter.show(PipelineRequest::new("https://example.com/cat.png")).await;
//!     run.join().await;
//!     ui.flush().await;
//!     println!("{:?}", view.snapshot());
//!
//!     presenter.teardown().await;
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod config;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod pipeline;
pub mod presenter;
pub mod reporter;
pub mod scope;
pub mod types;
pub mod ui;
pub mod view;

// Re-exports for convenient access
pub use config::Config;
pub use error::{
    ConfigError, FailureCause, FailureRecord, FetchError, FilterError, LumenError, PipelineError,
    PipelineResult, Result,
};
pub use fetch::{ByteStream, FetchStage, Payload, Transport};
pub use filter::{Effect, EffectKind, FilterStage};
pub use pipeline::{Pipeline, RunHandle, RunState};
pub use presenter::ImagePresenter;
pub use reporter::ErrorReporter;
pub use scope::{Executors, Task, TaskId, TaskOutcome, TaskScope, TaskState};
pub use types::{ImageBuffer, PipelineRequest};
pub use ui::UiContext;
pub use view::{ImageView, ScreenSnapshot, ScreenState};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
