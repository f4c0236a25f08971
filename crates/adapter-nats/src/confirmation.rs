use crate::{Error, Result};

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Deliveries that were submitted but not yet confirmed.
///
/// Each delivery's confirmation is owned by a detached task. That task always
/// runs to completion, bounded by a timeout, even if the caller stopped
/// waiting, and forwards the result into a single-slot channel.
#[derive(Clone, Debug, Default)]
pub struct PendingDeliveries {
    outstanding: Arc<AtomicUsize>,
    tracker: TaskTracker,
}

/// The caller's side of one pending delivery.
#[derive(Debug)]
pub struct Delivery<T> {
    receiver: oneshot::Receiver<Result<T>>,
}

impl PendingDeliveries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands `confirmation` to a detached task, bounded by `bound`.
    pub fn track<F, T>(&self, bound: Duration, confirmation: F) -> Delivery<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let outstanding = self.outstanding.clone();
        outstanding.fetch_add(1, Ordering::SeqCst);

        self.tracker.spawn(async move {
            let result = tokio::time::timeout(bound, confirmation)
                .await
                .unwrap_or_else(|_| Err(Error::ConfirmationTimeout(bound)));
            outstanding.fetch_sub(1, Ordering::SeqCst);

            // The caller may have given up already.
            let _ = sender.send(result);
        });

        Delivery { receiver }
    }

    /// Number of confirmations still in flight.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Waits up to `bound` for in-flight confirmations, returning how many
    /// were still outstanding afterwards.
    pub async fn drain(&self, bound: Duration) -> usize {
        self.tracker.close();
        let _ = tokio::time::timeout(bound, self.tracker.wait()).await;

        self.outstanding()
    }
}

impl<T> Delivery<T> {
    /// Waits for the confirmation or for `cancel`, whichever comes first.
    pub async fn wait(self, cancel: &CancellationToken) -> Result<T> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            result = self.receiver => result.unwrap_or_else(|_| Err(Error::ConfirmationLost)),
        }
    }
}
