use std::error::Error as StdError;

use thiserror::Error;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

/// Result type for stream sessions.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can end a stream session.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured url does not have the expected shape.
    #[error(
        "invalid url: make sure the url is in the format wss://<host>:<port>/targets/<target_id>/websocket"
    )]
    InvalidUrl,

    /// The target segment of the url is not a uuid.
    #[error("invalid target id: the url is valid, but the target id is not a valid uuid")]
    InvalidTargetId(#[source] uuid::Error),

    /// A managed gateway url was configured without an API key.
    #[error(
        "API key is required: please specify the API key to authenticate with the Chain Watch API"
    )]
    MissingApiKey,

    /// The worker pool must have at least one worker.
    #[error("invalid worker pool size: at least one worker is required")]
    InvalidWorkerPoolSize,

    /// A static header or the API key is not a valid HTTP header.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// The handshake request could not be built from the url.
    #[error("failed to build websocket request: {0}")]
    Request(#[source] tungstenite::Error),

    /// Dialing the feed failed.
    #[error("failed to dial {url}: {source}")]
    Dial {
        /// The url that was dialed.
        url: String,

        /// HTTP status of the rejected handshake, if any.
        status: Option<u16>,

        /// Body of the rejected handshake response, if any.
        body: Option<String>,

        /// The underlying websocket error.
        #[source]
        source: tungstenite::Error,
    },

    /// A non-transient connection failure.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// An inbound message could not be acknowledged.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The sink rejected a message.
    #[error("adapter error: {0}")]
    Adapter(#[source] Box<dyn StdError + Send + Sync>),

    /// The session was cancelled from outside.
    #[error("session cancelled")]
    Cancelled,

    /// The message queue closed while the session was running.
    #[error("message queue closed")]
    QueueClosed,

    /// A session task panicked or was aborted.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

/// Failures of a live connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The remote sent a close frame.
    #[error("connection closed by remote: {}", describe_close(.0.as_ref()))]
    Closed(Option<CloseFrame>),

    /// The stream ended without a close frame.
    #[error("websocket stream ended")]
    EndOfStream,

    /// An acknowledgment frame was not valid utf-8.
    #[error("acknowledgment frame is not valid utf-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    /// A redial failed, so there is no connection left to use.
    #[error("connection could not be reestablished")]
    Lost,

    /// The websocket reported an error.
    #[error("websocket error: {0}")]
    Websocket(#[from] tungstenite::Error),
}

impl ConnectionError {
    /// Whether the failure should be answered with a redial.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        use std::io::ErrorKind;
        use tungstenite::error::ProtocolError;

        match self {
            Self::Closed(_) | Self::EndOfStream => true,
            Self::Encoding(_) | Self::Lost => false,
            Self::Websocket(error) => match error {
                tungstenite::Error::ConnectionClosed
                | tungstenite::Error::AlreadyClosed
                | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                    true
                }
                tungstenite::Error::Io(io) => matches!(
                    io.kind(),
                    ErrorKind::UnexpectedEof
                        | ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::BrokenPipe
                ),
                _ => false,
            },
        }
    }
}

fn describe_close(frame: Option<&CloseFrame>) -> String {
    frame.map_or_else(
        || "no close frame".to_string(),
        |frame| format!("{} {}", frame.code, frame.reason),
    )
}

/// Failures decoding inbound messages or encoding acknowledgments.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload is not a JSON record.
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The payload parsed but is not a JSON object.
    #[error("malformed message: expected a JSON object")]
    NotAnObject,

    /// The payload has no `id` field, or it is null.
    #[error("message is missing the required id field")]
    MissingId,

    /// The acknowledgment could not be serialized.
    #[error("failed to encode acknowledgment: {0}")]
    Encode(#[source] serde_json::Error),
}
