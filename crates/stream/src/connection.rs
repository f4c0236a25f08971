use crate::config::StreamConfig;
use crate::error::ConnectionError;
use crate::{Error, Result};

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Header carrying the API key on the handshake.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Reason sent in the close frame of a connection that is being replaced.
pub const REDIAL_REASON: &str = "reestablishing connection";

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type WebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The outcome of one read from the current connection.
#[derive(Debug)]
pub enum ReadEvent {
    /// A text or binary payload.
    Message(Bytes),

    /// The connection was swapped out while reading. Read again.
    Replaced,

    /// The connection failed.
    Failed(Failure),
}

/// A failure tagged with the connection generation it happened on.
#[derive(Debug)]
pub struct Failure {
    /// Generation of the failed connection.
    pub generation: u64,

    /// What went wrong.
    pub error: ConnectionError,
}

struct Connection {
    generation: u64,
    reader: Mutex<SplitStream<WebSocket>>,
    writer: Mutex<SplitSink<WebSocket, Message>>,
    closing: CancellationToken,
}

impl Connection {
    fn new(generation: u64, stream: WebSocket) -> Self {
        let (writer, reader) = stream.split();

        Self {
            generation,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closing: CancellationToken::new(),
        }
    }

    async fn close(&self, reason: &'static str) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: Utf8Bytes::from_static(reason),
        };

        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(CLOSE_TIMEOUT, writer.send(Message::Close(Some(frame)))).await {
            Ok(Ok(())) => debug!(generation = self.generation, "closed previous connection"),
            Ok(Err(error)) => {
                debug!(generation = self.generation, %error, "previous connection already gone");
            }
            Err(_) => debug!(generation = self.generation, "timed out closing previous connection"),
        }
    }
}

/// Owns the single live connection of a session.
///
/// Reads and writes take the slot's shared lock, a redial takes it exclusively.
/// Every connection carries a generation so that concurrent redial requests for
/// the same failure collapse into one. Once a redial fails the manager is lost:
/// reads and writes report [`ConnectionError::Lost`] and no further redial is
/// attempted.
pub struct ConnectionManager {
    config: StreamConfig,
    slot: RwLock<Connection>,
    lost: AtomicBool,
}

impl ConnectionManager {
    /// Dials the feed described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake cannot be built or the dial fails.
    pub async fn connect(config: StreamConfig) -> Result<Self> {
        let stream = dial(&config).await?;

        Ok(Self {
            config,
            slot: RwLock::new(Connection::new(0, stream)),
            lost: AtomicBool::new(false),
        })
    }

    /// Generation of the current connection, starting at zero.
    pub async fn generation(&self) -> u64 {
        self.slot.read().await.generation
    }

    /// Whether a redial failed and the session has no connection left.
    #[must_use]
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// Reads the next payload, skipping control frames.
    pub async fn read(&self) -> ReadEvent {
        let current = self.slot.read().await;
        if current.closing.is_cancelled() {
            if self.is_lost() {
                return ReadEvent::Failed(Failure {
                    generation: current.generation,
                    error: ConnectionError::Lost,
                });
            }
            drop(current);
            tokio::task::yield_now().await;
            return ReadEvent::Replaced;
        }

        let mut reader = current.reader.lock().await;
        loop {
            let next = tokio::select! {
                biased;
                () = current.closing.cancelled() => return ReadEvent::Replaced,
                next = reader.next() => next,
            };

            let error = match next {
                Some(Ok(Message::Text(text))) => return ReadEvent::Message(Bytes::from(text)),
                Some(Ok(Message::Binary(data))) => return ReadEvent::Message(data),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(frame))) => ConnectionError::Closed(frame),
                Some(Err(error)) => ConnectionError::Websocket(error),
                None => ConnectionError::EndOfStream,
            };

            return ReadEvent::Failed(Failure {
                generation: current.generation,
                error,
            });
        }
    }

    /// Writes one text frame on the current connection.
    ///
    /// # Errors
    ///
    /// Returns the failure together with the generation it happened on.
    pub async fn write(&self, frame: Bytes) -> std::result::Result<(), Failure> {
        let current = self.slot.read().await;
        let failed = |error| Failure {
            generation: current.generation,
            error,
        };
        if self.is_lost() {
            return Err(failed(ConnectionError::Lost));
        }

        let text = Utf8Bytes::try_from(frame).map_err(|e| failed(ConnectionError::Encoding(e)))?;

        let mut writer = current.writer.lock().await;
        writer
            .send(Message::Text(text))
            .await
            .map_err(|e| failed(ConnectionError::Websocket(e)))
    }

    /// Redials after a failure on connection `generation`.
    ///
    /// Transient failures, or no failure at all, replace the connection.
    /// Anything else is returned as fatal.
    ///
    /// # Errors
    ///
    /// Returns the cause if it is not transient, the dial error, or
    /// [`Error::Cancelled`] if `cancel` fires first.
    pub async fn reconnect(
        &self,
        generation: u64,
        cause: Option<ConnectionError>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match cause {
            Some(error) if !error.is_transient() => Err(Error::Connection(error)),
            Some(error) => {
                warn!(generation, %error, "connection lost, reestablishing");
                self.replace(generation, REDIAL_REASON, cancel).await
            }
            None => {
                info!(generation, "reestablishing connection");
                self.replace(generation, REDIAL_REASON, cancel).await
            }
        }
    }

    /// Closes connection `observed` and installs a freshly dialed one.
    ///
    /// Does nothing if `observed` was already replaced. Every wait is raced
    /// against `cancel`.
    ///
    /// # Errors
    ///
    /// Returns the dial error or [`Error::Cancelled`]. Either way the manager
    /// is lost afterwards.
    pub async fn replace(
        &self,
        observed: u64,
        reason: &'static str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.is_lost() {
            return Err(Error::Connection(ConnectionError::Lost));
        }

        {
            let current = self.slot.read().await;
            if current.generation != observed {
                return Ok(());
            }
            // Wakes the reader so it drops its shared lock.
            current.closing.cancel();
        }

        let mut slot = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.lost.store(true, Ordering::Release);
                return Err(Error::Cancelled);
            }
            slot = self.slot.write() => slot,
        };
        if slot.generation != observed {
            debug!(generation = slot.generation, "connection already replaced");
            return Ok(());
        }

        let dialed = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            dialed = async {
                slot.close(reason).await;
                dial(&self.config).await
            } => dialed,
        };

        match dialed {
            Ok(stream) => {
                *slot = Connection::new(observed + 1, stream);
                info!(generation = observed + 1, "connection reestablished");
                Ok(())
            }
            Err(error) => {
                self.lost.store(true, Ordering::Release);
                Err(error)
            }
        }
    }
}

async fn dial(config: &StreamConfig) -> Result<WebSocket> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(Error::Request)?;

    let headers = request.headers_mut();
    if let Some(api_key) = config.api_key() {
        let value = HeaderValue::from_str(api_key)
            .map_err(|_| Error::InvalidHeader("api_key".to_string()))?;
        headers.append(HeaderName::from_static(API_KEY_HEADER), value);
    }
    for header in &config.headers {
        let name = HeaderName::from_bytes(header.key.as_bytes())
            .map_err(|_| Error::InvalidHeader(header.key.clone()))?;
        let value = HeaderValue::from_str(&header.value)
            .map_err(|_| Error::InvalidHeader(header.key.clone()))?;
        headers.append(name, value);
    }

    match connect_async(request).await {
        Ok((stream, response)) => {
            debug!(url = %config.url, status = %response.status(), "websocket connected");
            Ok(stream)
        }
        Err(source) => {
            let (status, body) = match &source {
                tungstenite::Error::Http(response) => (
                    Some(response.status().as_u16()),
                    response
                        .body()
                        .as_deref()
                        .map(|body| String::from_utf8_lossy(body).into_owned()),
                ),
                _ => (None, None),
            };

            error!(
                url = %config.url,
                status = ?status,
                body = body.as_deref().unwrap_or_default(),
                error = %source,
                "failed to dial websocket"
            );

            Err(Error::Dial {
                url: config.url.clone(),
                status,
                body,
                source,
            })
        }
    }
}
