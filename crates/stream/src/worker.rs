use crate::codec::AckCodec;
use crate::config::StreamMode;
use crate::connection::ConnectionManager;
use crate::metrics::StreamMetrics;
use crate::{Error, Result};

use std::sync::Arc;

use bytes::Bytes;
use chain_sink_adapter::Adapter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Dispatches dequeued messages to the adapter and acknowledges them.
pub struct Worker<A>
where
    A: Adapter,
{
    adapter: A,
    codec: AckCodec,
    connection: Arc<ConnectionManager>,
    metrics: StreamMetrics,
    mode: StreamMode,
}

impl<A> Worker<A>
where
    A: Adapter,
{
    pub const fn new(
        adapter: A,
        codec: AckCodec,
        connection: Arc<ConnectionManager>,
        metrics: StreamMetrics,
        mode: StreamMode,
    ) -> Self {
        Self {
            adapter,
            codec,
            connection,
            metrics,
            mode,
        }
    }

    /// Drains `queue` until cancelled or a message fails.
    pub async fn run(
        self: Arc<Self>,
        index: usize,
        queue: flume::Receiver<Bytes>,
        cancel: CancellationToken,
    ) -> Result<()> {
        loop {
            let message = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                message = queue.recv_async() => message.map_err(|_| Error::QueueClosed)?,
            };

            if let Err(error) = self.dispatch(message, &cancel).await {
                if !cancel.is_cancelled() {
                    error!(worker = index, %error, "failed to process message");
                }
                return Err(error);
            }
        }
    }

    async fn dispatch(&self, message: Bytes, cancel: &CancellationToken) -> Result<()> {
        match self.mode {
            StreamMode::NoAck => {
                self.deliver(message, cancel).await?;
                trace!("message delivered");
                Ok(())
            }
            StreamMode::Ack => {
                let id = self.codec.extract_id(&message)?;
                self.deliver(message.clone(), cancel).await?;

                let frame = self.codec.build_ack(&id)?;
                let written = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(Error::Cancelled),
                    written = self.connection.write(frame) => written,
                };

                match written {
                    Ok(()) => {
                        self.metrics.record_acked();
                        debug!(%id, "message acknowledged");
                    }
                    Err(failure) => {
                        warn!(%id, error = %failure.error, "failed to write acknowledgment");
                        self.connection
                            .reconnect(failure.generation, Some(failure.error), cancel)
                            .await?;
                    }
                }

                Ok(())
            }
        }
    }

    async fn deliver(&self, message: Bytes, cancel: &CancellationToken) -> Result<()> {
        self.adapter
            .handle(message, cancel)
            .await
            .map_err(|e| Error::Adapter(Box::new(e)))?;
        self.metrics.record_forwarded();

        Ok(())
    }
}
