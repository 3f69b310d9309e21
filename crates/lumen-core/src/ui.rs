//! The UI execution context: a serial job loop.
//!
//! Completions and error reports are posted here so they run one at a time,
//! in posting order, off the I/O and CPU pools. Jobs tied to a cancelled
//! token are dropped unrun.

use std::panic::AssertUnwindSafe;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type Job = Box<dyn FnOnce() + Send>;

enum Message {
    Run {
        token: Option<CancellationToken>,
        job: Job,
    },
    Flush(oneshot::Sender<()>),
}

/// Handle for posting jobs to the UI loop. Cheap to clone.
///
/// The loop stops once every handle has been dropped.
#[derive(Clone)]
pub struct UiContext {
    sender: mpsc::UnboundedSender<Message>,
}

impl UiContext {
    /// Start the job loop on the current runtime.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_loop(receiver));
        (Self { sender }, handle)
    }

    /// Post a job unconditionally. Returns false if the loop has stopped.
    pub fn post<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(None, Box::new(job))
    }

    /// Post a job that is skipped if `token` is cancelled before it runs.
    pub fn dispatch<F>(&self, token: &CancellationToken, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Some(token.clone()), Box::new(job))
    }

    /// Resolve once every job posted before this call has been handled.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Message::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn send(&self, token: Option<CancellationToken>, job: Job) -> bool {
        let sent = self.sender.send(Message::Run { token, job }).is_ok();
        if !sent {
            tracing::warn!("UI context closed, dropping job");
        }
        sent
    }
}

async fn run_loop(mut receiver: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = receiver.recv().await {
        match message {
            Message::Run { token, job } => {
                if token.as_ref().is_some_and(|t| t.is_cancelled()) {
                    tracing::trace!("Skipping UI job of a cancelled scope");
                    continue;
                }
                if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!("UI job panicked");
                }
            }
            Message::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("UI context stopped");
}
