use std::error::Error as StdError;
use std::time::Duration;

use chain_sink_adapter::AdapterError;
use thiserror::Error;

/// Result type for the NATS adapter.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller stopped waiting for the confirmation.
    #[error("cancelled while waiting for delivery confirmation")]
    Cancelled,

    /// The adapter was closed.
    #[error("adapter closed")]
    Closed,

    /// The broker rejected the message.
    #[error("delivery failed: {0}")]
    Confirm(#[source] async_nats::jetstream::context::PublishError),

    /// The confirmation task went away without a result.
    #[error("delivery confirmation lost")]
    ConfirmationLost,

    /// No confirmation arrived in time.
    #[error("no delivery confirmation after {0:?}")]
    ConfirmationTimeout(Duration),

    /// Could not connect to the servers.
    #[error("failed to connect to nats: {0}")]
    Connect(#[source] async_nats::ConnectError),

    /// Creating the stream failed.
    #[error("failed to create stream: {0}")]
    CreateStream(#[source] async_nats::jetstream::context::CreateStreamError),

    /// Unsupported compression option.
    #[error("invalid compression {0:?}: expected none, uncompressed or s2")]
    InvalidCompression(String),

    /// Partition count must be at least one.
    #[error("invalid partition count: at least one partition is required")]
    InvalidPartitions,

    /// Retention is neither -1, milliseconds nor a duration.
    #[error("invalid retention {value:?}: {source}")]
    InvalidRetention {
        /// The rejected value.
        value: String,

        /// Why it did not parse as a duration.
        #[source]
        source: humantime::DurationError,
    },

    /// Listing existing streams failed.
    #[error("failed to list streams: {0}")]
    ListStreams(#[source] Box<dyn StdError + Send + Sync>),

    /// Submitting the message failed.
    #[error("failed to publish: {0}")]
    Publish(#[source] async_nats::jetstream::context::PublishError),

    /// Unknown key in the stream options.
    #[error("unknown stream option {0:?}")]
    UnknownStreamOption(String),
}

impl AdapterError for Error {}
