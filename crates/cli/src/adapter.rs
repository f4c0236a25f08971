use crate::config::{AdapterConfig, AdapterType};
use crate::{Error, Result};

use async_trait::async_trait;
use bytes::Bytes;
use chain_sink_adapter::{Adapter, AdapterError};
use chain_sink_adapter_nats::{NatsAdapter, NatsAdmin};
use chain_sink_adapter_stdout::StdoutAdapter;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// The configured sink.
#[derive(Clone)]
pub enum SinkAdapter {
    Stdout(StdoutAdapter),
    Nats(NatsAdapter),
}

#[derive(Debug, thiserror::Error)]
pub enum SinkAdapterError {
    #[error(transparent)]
    Stdout(#[from] chain_sink_adapter_stdout::Error),

    #[error(transparent)]
    Nats(#[from] chain_sink_adapter_nats::Error),
}

impl AdapterError for SinkAdapterError {}

impl SinkAdapter {
    /// Builds the adapter selected by `config`, provisioning the stream if asked.
    pub async fn build(config: &AdapterConfig) -> Result<Self> {
        match config.kind {
            AdapterType::Stdout => Ok(Self::Stdout(StdoutAdapter::new())),
            AdapterType::Nats => {
                let nats = config.nats.as_ref().ok_or(Error::MissingNatsConfig)?;
                let adapter = NatsAdapter::connect(nats.adapter_options()).await?;

                if nats.create_stream {
                    let created = NatsAdmin::new(adapter.client())
                        .create_stream_if_not_exists(
                            &nats.stream_name,
                            &nats.subject,
                            nats.num_partitions,
                            nats.num_replicas,
                            &nats.stream_options(),
                        )
                        .await?;
                    info!(stream = %nats.stream_name, created, "stream ready");
                }

                Ok(Self::Nats(adapter))
            }
        }
    }
}

#[async_trait]
impl Adapter for SinkAdapter {
    type Error = SinkAdapterError;

    async fn handle(
        &self,
        message: Bytes,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), SinkAdapterError> {
        match self {
            Self::Stdout(adapter) => adapter.handle(message, cancel).await.map_err(Into::into),
            Self::Nats(adapter) => adapter.handle(message, cancel).await.map_err(Into::into),
        }
    }

    async fn close(&self) -> std::result::Result<(), SinkAdapterError> {
        match self {
            Self::Stdout(adapter) => adapter.close().await.map_err(Into::into),
            Self::Nats(adapter) => adapter.close().await.map_err(Into::into),
        }
    }
}
