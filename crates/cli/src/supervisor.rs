use crate::adapter::SinkAdapter;
use crate::config::Config;
use crate::metrics::MetricsServer;
use crate::{Error, Result};

use chain_sink_adapter::Adapter;
use chain_sink_stream::{AckCodec, Error as StreamError, Session, StreamConfig};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Builds the adapter, runs every session, then closes the adapter.
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<()> {
    let exporter = if config.metrics.enabled {
        Some(MetricsServer::bind(config.metrics.port).await?)
    } else {
        None
    };

    let adapter = tokio::select! {
        biased;
        () = shutdown.cancelled() => return Ok(()),
        adapter = SinkAdapter::build(&config.adapter) => adapter?,
    };

    let result = run_sessions(
        &config.stream,
        config.stream_count,
        adapter.clone(),
        exporter,
        &shutdown,
    )
    .await;

    if let Err(error) = adapter.close().await {
        warn!(%error, "failed to close adapter");
    }

    result
}

/// Runs `count` sessions against `stream`, and the metrics exporter if given.
///
/// The first failing task cancels the others. Shutdown is not an error.
pub async fn run_sessions<A>(
    stream: &StreamConfig,
    count: usize,
    adapter: A,
    exporter: Option<MetricsServer>,
    shutdown: &CancellationToken,
) -> Result<()>
where
    A: Adapter,
{
    let scope = shutdown.child_token();
    let codec = AckCodec::new();
    let metrics = exporter
        .as_ref()
        .map(MetricsServer::stream_metrics)
        .unwrap_or_default();
    let mut tasks = JoinSet::new();

    if let Some(exporter) = exporter {
        tasks.spawn(exporter.serve(scope.clone()));
    }

    for index in 0..count {
        let stream = stream.clone();
        let adapter = adapter.clone();
        let codec = codec.clone();
        let metrics = metrics.clone();
        let scope = scope.clone();

        tasks.spawn(async move {
            let session = tokio::select! {
                biased;
                () = scope.cancelled() => return Err(Error::Stream(StreamError::Cancelled)),
                session = Session::connect_with_codec(stream, codec) => session?,
            };
            info!(session = index, target_id = %session.target_id(), "session started");

            session.with_metrics(metrics).forward(adapter, &scope).await?;

            Ok(())
        });
    }

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined
            .map_err(|e| Error::Stream(StreamError::from(e)))
            .and_then(|result| result)
        {
            Ok(()) | Err(Error::Stream(StreamError::Cancelled)) => {}
            Err(error) => {
                error!(%error, "chain-sink task failed");
                if first_error.is_none() {
                    scope.cancel();
                    first_error = Some(error);
                }
            }
        }
    }

    first_error.map_or(Ok(()), Err)
}
