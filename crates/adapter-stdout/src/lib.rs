//! Adapter that logs every forwarded message and accepts it immediately.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use async_trait::async_trait;
use bytes::Bytes;
use chain_sink_adapter::Adapter;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Fire-and-log adapter.
#[derive(Clone, Debug, Default)]
pub struct StdoutAdapter;

impl StdoutAdapter {
    /// Creates a new `StdoutAdapter`.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Adapter for StdoutAdapter {
    type Error = Error;

    async fn handle(&self, message: Bytes, _cancel: &CancellationToken) -> Result<(), Error> {
        info!(message = %String::from_utf8_lossy(&message), "received message");

        Ok(())
    }
}
