//! Adapter that publishes forwarded messages into a NATS JetStream stream and
//! waits for the broker to confirm each one.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod admin;
mod confirmation;
mod error;

pub use admin::{
    COMPRESSION_OPTION, NatsAdmin, RETENTION_OPTION, parse_compression, parse_retention,
    stream_config,
};
pub use error::{Error, Result};

use confirmation::PendingDeliveries;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_nats::jetstream::{self, Context as JetStreamContext};
use async_nats::{ConnectOptions, Event, HeaderMap};
use async_trait::async_trait;
use bytes::Bytes;
use chain_sink_adapter::Adapter;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How the adapter authenticates with the servers.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Authentication {
    /// No credentials.
    #[default]
    None,

    /// User and password.
    UserPassword {
        /// User name.
        user: String,

        /// Password.
        password: String,
    },

    /// Bearer token.
    Token {
        /// The token.
        token: String,
    },
}

/// Options for the NATS adapter.
#[derive(Clone, Debug)]
pub struct NatsAdapterOptions {
    /// Server urls.
    pub servers: Vec<String>,

    /// Credentials.
    pub authentication: Authentication,

    /// Subject to publish on, suffixed with the partition when there is more
    /// than one.
    pub subject: String,

    /// Number of partitions.
    pub partitions: u32,

    /// Upper bound on waiting for one confirmation.
    pub ack_timeout: Duration,

    /// Upper bound on draining confirmations in `close`.
    pub flush_timeout: Duration,
}

struct Inner {
    ack_timeout: Duration,
    client: async_nats::Client,
    closed: AtomicBool,
    flush_timeout: Duration,
    jetstream: JetStreamContext,
    partitions: u32,
    pending: PendingDeliveries,
    shutdown: CancellationToken,
    subject: String,
    task_tracker: TaskTracker,
}

/// Broker-producing adapter.
#[derive(Clone)]
pub struct NatsAdapter {
    inner: Arc<Inner>,
}

impl NatsAdapter {
    /// Connects to the servers and starts the background event loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition count is zero or the connection
    /// cannot be established.
    pub async fn connect(
        NatsAdapterOptions {
            servers,
            authentication,
            subject,
            partitions,
            ack_timeout,
            flush_timeout,
        }: NatsAdapterOptions,
    ) -> Result<Self> {
        if partitions == 0 {
            return Err(Error::InvalidPartitions);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let options = ConnectOptions::new()
            .name("chain-sink")
            .event_callback(move |event| {
                let events_tx = events_tx.clone();
                async move {
                    let _ = events_tx.send(event);
                }
            });

        let options = match authentication {
            Authentication::None => options,
            Authentication::UserPassword { user, password } => {
                options.user_and_password(user, password)
            }
            Authentication::Token { token } => options.token(token),
        };

        let client = options
            .connect(servers.join(",").as_str())
            .await
            .map_err(Error::Connect)?;
        info!(servers = ?servers, subject = %subject, partitions, "connected to nats");

        Ok(Self::from_client(
            client,
            events_rx,
            subject,
            partitions,
            ack_timeout,
            flush_timeout,
        ))
    }

    fn from_client(
        client: async_nats::Client,
        events: mpsc::UnboundedReceiver<Event>,
        subject: String,
        partitions: u32,
        ack_timeout: Duration,
        flush_timeout: Duration,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let task_tracker = TaskTracker::new();
        task_tracker.spawn(event_loop(events, shutdown.clone()));

        // The context's own request timeout would otherwise cut confirmations
        // short of `ack_timeout`.
        let mut jetstream = jetstream::new(client.clone());
        jetstream.set_timeout(ack_timeout);

        Self {
            inner: Arc::new(Inner {
                ack_timeout,
                client,
                closed: AtomicBool::new(false),
                flush_timeout,
                jetstream,
                partitions,
                pending: PendingDeliveries::new(),
                shutdown,
                subject,
                task_tracker,
            }),
        }
    }

    /// The underlying client, for sharing with [`NatsAdmin`].
    #[must_use]
    pub fn client(&self) -> async_nats::Client {
        self.inner.client.clone()
    }

    /// Number of messages submitted but not yet confirmed.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.inner.pending.outstanding()
    }

    fn subject_for(&self, key: &Uuid) -> String {
        partition_subject(&self.inner.subject, self.inner.partitions, key)
    }
}

fn partition_subject(subject: &str, partitions: u32, key: &Uuid) -> String {
    if partitions > 1 {
        format!("{subject}.{}", key.as_u128() % u128::from(partitions))
    } else {
        subject.to_string()
    }
}

#[async_trait]
impl Adapter for NatsAdapter {
    type Error = Error;

    async fn handle(&self, message: Bytes, cancel: &CancellationToken) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let key = Uuid::new_v4();
        let key_header = key.to_string();
        let mut headers = HeaderMap::new();
        headers.insert(async_nats::header::NATS_MESSAGE_ID, key_header.as_str());

        let submitted = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            submitted = self.inner.jetstream.publish_with_headers(self.subject_for(&key), headers, message) => {
                submitted.map_err(Error::Publish)?
            }
        };

        let delivery = self
            .inner
            .pending
            .track(self.inner.ack_timeout, async move {
                submitted.await.map_err(Error::Confirm)
            });

        let ack = delivery.wait(cancel).await?;
        debug!(%key, stream = %ack.stream, sequence = ack.sequence, "message delivered");

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Err(error) = self.inner.client.flush().await {
            warn!(%error, "failed to flush nats client");
        }

        let outstanding = self.inner.pending.drain(self.inner.flush_timeout).await;
        if outstanding > 0 {
            warn!(outstanding_messages = outstanding, "failed to confirm all messages");
        }

        self.inner.shutdown.cancel();
        self.inner.task_tracker.close();
        self.inner.task_tracker.wait().await;

        info!("nats adapter closed");

        Ok(())
    }
}

async fn event_loop(mut events: mpsc::UnboundedReceiver<Event>, shutdown: CancellationToken) {
    loop {
        let event = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            Event::Connected => info!("nats connection established"),
            Event::Disconnected => warn!("nats connection lost, client is reconnecting"),
            Event::ServerError(error) => warn!(%error, "nats server error"),
            Event::ClientError(error) => warn!(%error, "nats client error"),
            other => debug!(event = ?other, "nats event"),
        }
    }
}
