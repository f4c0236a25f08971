use std::error::Error as StdError;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for the CLI.
pub type Result<T> = std::result::Result<T, Error>;

/// CLI-specific error type
#[derive(Debug, Error)]
pub enum Error {
    /// The metrics listener could not be bound.
    #[error("failed to bind metrics server on port {port}: {source}")]
    BindMetrics {
        /// The configured port.
        port: u16,

        /// I/O error.
        source: std::io::Error,
    },

    /// A merged config did not match the expected shape.
    #[error("invalid config: {0}")]
    InvalidConfig(#[source] toml::de::Error),

    /// Nats adapter settings are inconsistent.
    #[error("invalid nats config: {0}")]
    InvalidNatsConfig(&'static str),

    /// `stream_count` was zero.
    #[error("invalid stream_count: at least one stream is required")]
    InvalidStreamCount,

    /// Logging could not be initialised.
    #[error("failed to initialise logging: {0}")]
    Logging(#[source] Box<dyn StdError + Send + Sync>),

    /// The stream counters could not be registered.
    #[error("failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The nats adapter was selected without settings.
    #[error("adapter type is nats but [adapter.nats] is missing")]
    MissingNatsConfig,

    /// Nats adapter error.
    #[error(transparent)]
    Nats(#[from] chain_sink_adapter_nats::Error),

    /// No config files were given.
    #[error("at least one config file is required")]
    NoConfigFiles,

    /// A config file is not valid TOML.
    #[error("failed to parse config file {}: {source}", path.display())]
    ParseConfig {
        /// The offending file.
        path: PathBuf,

        /// Parser error.
        source: toml::de::Error,
    },

    /// A config file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    ReadConfig {
        /// The offending file.
        path: PathBuf,

        /// I/O error.
        source: std::io::Error,
    },

    /// The metrics server stopped with an error.
    #[error("metrics server failed: {0}")]
    ServeMetrics(#[source] std::io::Error),

    /// Stream session error.
    #[error(transparent)]
    Stream(#[from] chain_sink_stream::Error),
}
