//! Forwards messages from a websocket feed into an adapter, optionally
//! acknowledging each one after the adapter accepted it.
//!
//! A [`Session`] owns one connection, a bounded queue and a pool of workers.
//! The reader never calls the adapter itself, so a slow adapter fills the
//! queue and stalls reads from the feed.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod codec;
mod config;
mod connection;
mod error;
mod metrics;
mod session;
mod worker;

pub use codec::{AckCodec, MessageId};
pub use config::{Header, StreamConfig, StreamMode};
pub use connection::{API_KEY_HEADER, ConnectionManager, Failure, REDIAL_REASON, ReadEvent};
pub use error::{CodecError, ConnectionError, Error, Result};
pub use metrics::StreamMetrics;
pub use session::Session;
