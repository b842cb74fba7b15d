//! Cancellable delayed tasks.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Pending {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Pending {
    fn cancel(self) {
        self.token.cancel();
        self.handle.abort();
    }
}

/// Runs only the most recently scheduled task, once its input has been quiet for `delay`.
///
/// Scheduling a task cancels the previous one, whether it is still waiting out the delay or
/// already running. Tasks receive their [`CancellationToken`] and must check it before
/// committing any result, since cancellation can land between their last await and the commit.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<Pending>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Replace any pending task with `task`, to run after the quiet period.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.take() {
            previous.cancel();
        }

        let token = CancellationToken::new();
        let delay = self.delay;
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = task_token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            task(task_token).await;
        });

        *pending = Some(Pending { token, handle });
    }

    /// Cancel the pending task, if any.
    pub fn cancel(&self) {
        if let Some(previous) = self.pending.lock().unwrap_or_else(PoisonError::into_inner).take() {
            previous.cancel();
        }
    }

    /// True while a scheduled task has neither finished nor been cancelled
    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|p| !p.handle.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
