use crate::codec::AckCodec;
use crate::config::StreamConfig;
use crate::connection::{ConnectionManager, ReadEvent};
use crate::metrics::StreamMetrics;
use crate::worker::Worker;
use crate::{Error, Result};

use std::sync::Arc;

use bytes::Bytes;
use chain_sink_adapter::Adapter;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};
use uuid::Uuid;

/// One subscription to one remote target.
pub struct Session {
    config: StreamConfig,
    target_id: Uuid,
    connection: Arc<ConnectionManager>,
    codec: AckCodec,
    metrics: StreamMetrics,
    sender: flume::Sender<Bytes>,
    receiver: flume::Receiver<Bytes>,
}

impl Session {
    /// Validates `config` and dials the feed.
    ///
    /// # Errors
    ///
    /// Returns a validation error or the dial error.
    pub async fn connect(config: StreamConfig) -> Result<Self> {
        Self::connect_with_codec(config, AckCodec::new()).await
    }

    /// Like [`Session::connect`], sharing `codec`'s buffer pool.
    ///
    /// # Errors
    ///
    /// Returns a validation error or the dial error.
    pub async fn connect_with_codec(config: StreamConfig, codec: AckCodec) -> Result<Self> {
        let target_id = config.validate()?;
        let connection = Arc::new(ConnectionManager::connect(config.clone()).await?);
        let (sender, receiver) = flume::bounded(config.worker_pool_size);

        info!(%target_id, mode = ?config.mode, "stream session connected");

        Ok(Self {
            config,
            target_id,
            connection,
            codec,
            metrics: StreamMetrics::default(),
            sender,
            receiver,
        })
    }

    /// Records message counts into `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: StreamMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// The target id parsed from the url.
    #[must_use]
    pub const fn target_id(&self) -> Uuid {
        self.target_id
    }

    /// The connection manager of this session.
    #[must_use]
    pub fn connection(&self) -> Arc<ConnectionManager> {
        self.connection.clone()
    }

    /// Forwards messages to `adapter` until `shutdown` fires or a fatal error.
    ///
    /// Runs one reader and `worker_pool_size` workers. The first fatal error
    /// cancels the rest, and this returns after all of them have unwound.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] on shutdown, otherwise the first fatal error.
    pub async fn forward<A>(self, adapter: A, shutdown: &CancellationToken) -> Result<()>
    where
        A: Adapter,
    {
        let scope = shutdown.child_token();
        let mut tasks = JoinSet::new();

        tasks.spawn(read_loop(
            self.connection.clone(),
            self.sender.clone(),
            self.metrics.clone(),
            scope.clone(),
        ));

        let worker = Arc::new(Worker::new(
            adapter,
            self.codec.clone(),
            self.connection.clone(),
            self.metrics.clone(),
            self.config.mode,
        ));
        for index in 0..self.config.worker_pool_size {
            tasks.spawn(
                worker
                    .clone()
                    .run(index, self.receiver.clone(), scope.clone()),
            );
        }

        debug!(
            target_id = %self.target_id,
            workers = self.config.worker_pool_size,
            "forwarding stream"
        );

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let Err(error) = joined.map_err(Error::from).and_then(|result| result) else {
                continue;
            };

            if first_error.is_none() {
                first_error = Some(if scope.is_cancelled() {
                    Error::Cancelled
                } else {
                    error
                });
                scope.cancel();
            }
        }

        info!(target_id = %self.target_id, "stream session stopped");

        first_error.map_or(Ok(()), Err)
    }
}

async fn read_loop(
    connection: Arc<ConnectionManager>,
    queue: flume::Sender<Bytes>,
    metrics: StreamMetrics,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            event = connection.read() => event,
        };

        match event {
            ReadEvent::Message(payload) => {
                metrics.record_received();
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(Error::Cancelled),
                    sent = queue.send_async(payload) => sent.map_err(|_| Error::QueueClosed)?,
                }
                trace!("message queued");
            }
            ReadEvent::Replaced => {}
            ReadEvent::Failed(failure) => {
                if !failure.error.is_transient() {
                    error!(error = %failure.error, "error reading from websocket");
                }
                connection
                    .reconnect(failure.generation, Some(failure.error), &cancel)
                    .await?;
            }
        }
    }
}
