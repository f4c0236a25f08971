//! Abstract interface for sinks that receive messages forwarded from a stream.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

/// Marker trait for adapter errors.
pub trait AdapterError: Debug + Error + Send + Sync + 'static {}

/// A destination for forwarded messages.
///
/// Implementations must be safe to call from many workers at once. A call to
/// `handle` only returns `Ok` once the destination has accepted the message.
#[async_trait]
pub trait Adapter: Clone + Send + Sync + 'static {
    /// The error type for the adapter.
    type Error: AdapterError;

    /// Delivers one opaque payload.
    ///
    /// The adapter should stop waiting and return an error when `cancel` fires.
    async fn handle(&self, message: Bytes, cancel: &CancellationToken) -> Result<(), Self::Error>;

    /// Drains outstanding work with a bounded wait.
    async fn close(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}
