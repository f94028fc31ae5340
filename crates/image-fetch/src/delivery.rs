//! Single-threaded delivery context
//!
//! Callbacks never run on the async runtime: they are posted to one
//! dedicated OS thread that the context spawns and owns, which runs them in
//! submission order. Embedders that need other work serialized with the
//! callbacks (UI updates, for instance) post it through
//! [`DeliveryContext::run`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

type Task = Box<dyn FnOnce() + Send>;

/// Handle to the delivery thread; cheap to clone. The thread exits once
/// every handle is dropped.
#[derive(Clone)]
pub struct DeliveryContext {
    tx: mpsc::UnboundedSender<Task>,
}

impl DeliveryContext {
    /// Start a delivery thread called `name`
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();

        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(task) = rx.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(task)).is_err() {
                        error!("Delivery callback panicked");
                    }
                }
                debug!("Delivery thread stopped");
            })?;

        Ok(Self { tx })
    }

    /// Post `task` to the delivery thread. Returns false if the thread is gone.
    pub fn run<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(task)).is_ok()
    }

    /// Invoke `callback(value)` on the delivery thread unless `token` is
    /// cancelled by the time the thread gets to it. Resolves to whether the
    /// callback ran.
    pub(crate) async fn deliver<T, F>(
        &self,
        token: CancellationToken,
        callback: F,
        value: T,
    ) -> bool
    where
        T: Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();

        let posted = self.run(move || {
            let delivered = if token.is_cancelled() {
                false
            } else {
                callback(value);
                true
            };
            let _ = done_tx.send(delivered);
        });

        posted && done_rx.await.unwrap_or(false)
    }
}
