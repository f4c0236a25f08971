use crate::{Error, Result};

use std::future::IntoFuture;
use std::net::{Ipv4Addr, SocketAddr};

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chain_sink_stream::StreamMetrics;
use prometheus::{Registry, TEXT_FORMAT, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Serves the stream counters on `/metrics`.
pub struct MetricsServer {
    listener: TcpListener,
    registry: Registry,
    metrics: StreamMetrics,
}

impl MetricsServer {
    /// Registers the counters and binds `port` on all interfaces.
    pub async fn bind(port: u16) -> Result<Self> {
        let registry = Registry::new();
        let metrics = StreamMetrics::register(&registry)?;
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map_err(|source| Error::BindMetrics { port, source })?;

        Ok(Self {
            listener,
            registry,
            metrics,
        })
    }

    /// Counters for the sessions to record into.
    pub fn stream_metrics(&self) -> StreamMetrics {
        self.metrics.clone()
    }

    /// The bound address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until `shutdown` fires.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        if let Ok(addr) = self.local_addr() {
            info!(port = addr.port(), "starting metrics server");
        }

        let router = Router::new()
            .route("/metrics", get(render))
            .with_state(self.registry);

        tokio::select! {
            served = axum::serve(self.listener, router.into_make_service()).into_future() => {
                served.map_err(Error::ServeMetrics)
            }
            () = shutdown.cancelled() => Ok(()),
        }
    }
}

async fn render(State(registry): State<Registry>) -> Response {
    match TextEncoder::new().encode_to_string(&registry.gather()) {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(error) => {
            warn!(%error, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
