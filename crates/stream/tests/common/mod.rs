#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use chain_sink_adapter::Adapter;
use chain_sink_stream::{Result, Session, StreamConfig, StreamMode};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderMap, StatusCode};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tokio_util::sync::CancellationToken;

pub const TARGET_ID: &str = "5b8e1b5e-0c1d-4b0e-9f2e-6c1d6a3b4f10";

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy)]
enum Behavior {
    Accept,
    Reject(StatusCode),
    /// Completes this many handshakes, then holds later connections silently.
    StallAfter(usize),
}

/// A local websocket feed that hands accepted connections to the test.
pub struct FeedServer {
    addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<FeedConnection>,
    task: JoinHandle<()>,
}

pub struct FeedConnection {
    pub path: String,
    pub headers: HeaderMap,
    socket: WebSocketStream<TcpStream>,
}

impl FeedServer {
    pub async fn start() -> Self {
        Self::spawn(Behavior::Accept).await
    }

    /// A server that rejects every handshake with `status`.
    pub async fn rejecting(status: StatusCode) -> Self {
        Self::spawn(Behavior::Reject(status)).await
    }

    /// A server that accepts TCP after `handshakes` handshakes but never answers.
    pub async fn stalling_after(handshakes: usize) -> Self {
        Self::spawn(Behavior::StallAfter(handshakes)).await
    }

    async fn spawn(behavior: Behavior) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (sender, connections) = mpsc::unbounded_channel();

        let reject = match behavior {
            Behavior::Reject(status) => Some(status),
            Behavior::Accept | Behavior::StallAfter(_) => None,
        };

        let task = tokio::spawn(async move {
            let mut handshakes = 0;
            let mut stalled = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                if matches!(behavior, Behavior::StallAfter(limit) if handshakes >= limit) {
                    stalled.push(stream);
                    continue;
                }
                handshakes += 1;

                let sender = sender.clone();
                tokio::spawn(async move {
                    let mut captured = None;
                    let callback = |request: &Request, response: Response| {
                        captured = Some((request.uri().path().to_string(), request.headers().clone()));
                        match reject {
                            Some(status) => {
                                let mut rejection = ErrorResponse::new(Some("rejected".to_string()));
                                *rejection.status_mut() = status;
                                Err(rejection)
                            }
                            None => Ok(response),
                        }
                    };

                    if let Ok(socket) = accept_hdr_async(stream, callback).await {
                        let (path, headers) = captured.unwrap();
                        let _ = sender.send(FeedConnection { path, headers, socket });
                    }
                });
            }
        });

        Self { addr, connections, task }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/targets/{TARGET_ID}/websocket", self.addr)
    }

    pub fn config(&self, mode: StreamMode, worker_pool_size: usize) -> StreamConfig {
        StreamConfig {
            mode,
            worker_pool_size,
            ..StreamConfig::new(self.url())
        }
    }

    /// Drops the listener so that later dials are refused.
    pub async fn stop_listening(&mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }

    pub async fn accept(&mut self) -> FeedConnection {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("server stopped")
    }
}

impl Drop for FeedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl FeedConnection {
    pub async fn send_text(&mut self, text: &str) {
        self.socket.send(Message::text(text.to_string())).await.unwrap();
    }

    pub async fn close(&mut self) {
        self.socket.close(None).await.unwrap();
    }

    /// Drops the connection with a TCP reset instead of a close handshake.
    #[allow(deprecated)]
    pub fn reset(self) {
        self.socket.get_ref().set_linger(Some(Duration::ZERO)).unwrap();
    }

    /// Next text frame from the client, skipping control frames.
    pub async fn recv_text(&mut self) -> String {
        loop {
            let message = tokio::time::timeout(WAIT, self.socket.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection ended")
                .unwrap();

            match message {
                Message::Text(text) => return text.to_string(),
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    /// Next close frame from the client, skipping control frames.
    pub async fn recv_close(&mut self) -> Option<CloseFrame> {
        loop {
            let message = tokio::time::timeout(WAIT, self.socket.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection ended")
                .unwrap();

            match message {
                Message::Close(frame) => return frame,
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    /// Asserts no text frame arrives within `wait` or before the client leaves.
    pub async fn assert_no_text(&mut self, wait: Duration) {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.socket.next()).await {
                Err(_) | Ok(None | Some(Err(_) | Ok(Message::Close(_)))) => return,
                Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected text frame: {text}"),
                Ok(Some(Ok(_))) => {}
            }
        }
    }
}

/// Runs `session` in the background until the returned token is cancelled.
pub fn spawn_forward<A>(
    session: Session,
    adapter: A,
) -> (JoinHandle<Result<()>>, CancellationToken)
where
    A: Adapter,
{
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let handle = tokio::spawn(async move { session.forward(adapter, &token).await });

    (handle, shutdown)
}

pub async fn join(handle: JoinHandle<Result<()>>) -> Result<()> {
    tokio::time::timeout(WAIT, handle)
        .await
        .expect("session did not stop")
        .unwrap()
}
