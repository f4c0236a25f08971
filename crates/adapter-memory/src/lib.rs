//! In-memory adapter for local development and tests.
//!
//! Accepted messages are recorded in arrival order. A gated adapter holds
//! every call until permits are released, which makes slow sinks easy to
//! simulate.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chain_sink_adapter::Adapter;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Debug)]
struct Inner {
    failures: AtomicUsize,
    gate: Option<Semaphore>,
    messages: Mutex<Vec<Bytes>>,
    received: watch::Sender<usize>,
}

/// In-memory recording adapter.
#[derive(Clone, Debug)]
pub struct MemoryAdapter {
    inner: Arc<Inner>,
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAdapter {
    /// Creates an adapter that accepts every message immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::with_gate(None)
    }

    /// Creates an adapter whose calls block until `release` hands out permits.
    #[must_use]
    pub fn gated() -> Self {
        Self::with_gate(Some(Semaphore::new(0)))
    }

    fn with_gate(gate: Option<Semaphore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                failures: AtomicUsize::new(0),
                gate,
                messages: Mutex::new(Vec::new()),
                received: watch::Sender::new(0),
            }),
        }
    }

    /// Lets `count` more calls through the gate. No-op for ungated adapters.
    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.inner.gate {
            gate.add_permits(count);
        }
    }

    /// Makes the next `count` calls fail without recording their message.
    pub fn fail_next(&self, count: usize) {
        self.inner.failures.fetch_add(count, Ordering::SeqCst);
    }

    /// Snapshot of the messages accepted so far.
    #[must_use]
    pub fn messages(&self) -> Vec<Bytes> {
        self.inner.messages.lock().clone()
    }

    /// Waits until at least `count` messages have been accepted.
    pub async fn wait_for(&self, count: usize) {
        let mut received = self.inner.received.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = received.wait_for(|accepted| *accepted >= count).await;
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    type Error = Error;

    async fn handle(&self, message: Bytes, cancel: &CancellationToken) -> Result<(), Error> {
        if let Some(gate) = &self.inner.gate {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                permit = gate.acquire() => permit.map_err(|_| Error::Closed)?,
            };
            permit.forget();
        }

        if self
            .inner
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Injected);
        }

        trace!(len = message.len(), "recording message");
        self.inner.messages.lock().push(message);
        self.inner.received.send_modify(|accepted| *accepted += 1);

        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        if let Some(gate) = &self.inner.gate {
            gate.close();
        }

        Ok(())
    }
}
