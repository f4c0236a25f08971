use chain_sink_adapter::AdapterError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
#[error("Stdout adapter error")]
pub struct Error;

impl AdapterError for Error {}
