use chain_sink_adapter::AdapterError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The caller cancelled while waiting on the gate.
    #[error("cancelled while waiting for gate")]
    Cancelled,

    /// The adapter was closed.
    #[error("adapter closed")]
    Closed,

    /// A failure requested through `fail_next`.
    #[error("injected failure")]
    Injected,
}

impl AdapterError for Error {}
