use crate::{Error, Result};

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chain_sink_adapter_nats::{
    Authentication, COMPRESSION_OPTION, NatsAdapterOptions, RETENTION_OPTION, stream_config,
};
use chain_sink_stream::StreamConfig;
use serde::{Deserialize, Deserializer};

/// Process configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub logger: LoggerConfig,

    pub stream: StreamConfig,

    /// Number of identical sessions run against `stream`.
    #[serde(default = "default_stream_count")]
    pub stream_count: usize,

    #[serde(default)]
    pub adapter: AdapterConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Prometheus exporter settings.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LoggerConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Emit JSON lines instead of human readable output.
    #[serde(default)]
    pub json: bool,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum AdapterType {
    #[default]
    Stdout,
    Nats,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AdapterConfig {
    #[serde(rename = "type", default)]
    pub kind: AdapterType,

    pub nats: Option<NatsConfig>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NatsConfig {
    #[serde(default)]
    pub authentication: Authentication,

    pub servers: Vec<String>,

    pub subject: String,

    /// Create `stream_name` on startup if it does not exist.
    #[serde(default)]
    pub create_stream: bool,

    #[serde(default)]
    pub stream_name: String,

    #[serde(default = "default_partitions")]
    pub num_partitions: u32,

    #[serde(default = "default_replicas")]
    pub num_replicas: usize,

    #[serde(default)]
    pub compression: String,

    #[serde(default)]
    pub retention_time: String,

    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub ack_timeout: Duration,

    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub flush_timeout: Duration,
}

const fn default_metrics_port() -> u16 {
    8421
}

const fn default_stream_count() -> usize {
    1
}

const fn default_partitions() -> u32 {
    1
}

const fn default_replicas() -> usize {
    1
}

const fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    humantime::parse_duration(&value).map_err(serde::de::Error::custom)
}

impl Config {
    /// Loads, merges and validates `paths`, later files overriding earlier ones.
    pub fn load(paths: &[PathBuf]) -> Result<Self> {
        if paths.is_empty() {
            return Err(Error::NoConfigFiles);
        }

        let mut merged = toml::Table::new();
        for path in paths {
            let contents = std::fs::read_to_string(path).map_err(|source| Error::ReadConfig {
                path: path.clone(),
                source,
            })?;
            let table: toml::Table =
                toml::from_str(&contents).map_err(|source| Error::ParseConfig {
                    path: path.clone(),
                    source,
                })?;
            merge(&mut merged, table);
        }

        let config: Self = toml::Value::Table(merged)
            .try_into()
            .map_err(Error::InvalidConfig)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.stream.validate()?;

        if self.stream_count == 0 {
            return Err(Error::InvalidStreamCount);
        }

        if self.adapter.kind == AdapterType::Nats {
            self.adapter
                .nats
                .as_ref()
                .ok_or(Error::MissingNatsConfig)?
                .validate()?;
        }

        Ok(())
    }
}

impl NatsConfig {
    fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::InvalidNatsConfig("servers must not be empty"));
        }
        if self.subject.is_empty() {
            return Err(Error::InvalidNatsConfig("subject must not be empty"));
        }
        if self.create_stream && self.stream_name.is_empty() {
            return Err(Error::InvalidNatsConfig(
                "stream_name is required when create_stream is set",
            ));
        }

        stream_config(
            &self.stream_name,
            &self.subject,
            self.num_partitions,
            self.num_replicas,
            &self.stream_options(),
        )?;

        Ok(())
    }

    pub fn stream_options(&self) -> HashMap<String, String> {
        let mut options = HashMap::new();
        if !self.retention_time.is_empty() {
            options.insert(RETENTION_OPTION.to_string(), self.retention_time.clone());
        }
        if !self.compression.is_empty() {
            options.insert(COMPRESSION_OPTION.to_string(), self.compression.clone());
        }
        options
    }

    pub fn adapter_options(&self) -> NatsAdapterOptions {
        NatsAdapterOptions {
            servers: self.servers.clone(),
            authentication: self.authentication.clone(),
            subject: self.subject.clone(),
            partitions: self.num_partitions,
            ack_timeout: self.ack_timeout,
            flush_timeout: self.flush_timeout,
        }
    }
}

fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(incoming) => match base.get_mut(&key) {
                Some(toml::Value::Table(existing)) => merge(existing, incoming),
                _ => {
                    base.insert(key, toml::Value::Table(incoming));
                }
            },
            value => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chain_sink_stream::StreamMode;
    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    use super::*;

    const URL: &str = "wss://localhost/targets/5b8e1b5e-0c1d-4b0e-9f2e-6c1d6a3b4f10/websocket";

    fn write(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn load(files: &[&NamedTempFile]) -> Result<Config> {
        let paths: Vec<PathBuf> = files.iter().map(|file| file.path().to_path_buf()).collect();
        Config::load(&paths)
    }

    #[test]
    fn test_minimal_config_defaults() {
        let file = write(&format!("[stream]\nurl = \"{URL}\"\n"));

        let config = load(&[&file]).unwrap();

        assert_eq!(
            config,
            Config {
                logger: LoggerConfig::default(),
                stream: StreamConfig::new(URL),
                stream_count: 1,
                adapter: AdapterConfig::default(),
                metrics: MetricsConfig::default(),
            }
        );
    }

    #[test]
    fn test_later_files_override_earlier_keys() {
        let base = write(&format!(
            r#"
            stream_count = 2

            [logger]
            level = "debug"

            [stream]
            url = "{URL}"
            worker_pool_size = 4

            [adapter]
            type = "nats"

            [adapter.nats]
            servers = ["nats://localhost:4222"]
            subject = "chain.events"
            "#
        ));
        let overlay = write(
            r#"
            [stream]
            mode = "noack"

            [metrics]
            enabled = true

            [adapter.nats]
            num_partitions = 3
            ack_timeout = "5s"
            authentication = { type = "token", token = "secret" }
            "#,
        );

        let config = load(&[&base, &overlay]).unwrap();

        assert_eq!(config.stream_count, 2);
        assert_eq!(config.logger.level, LogLevel::Debug);
        assert_eq!(config.stream.mode, StreamMode::NoAck);
        assert_eq!(config.stream.worker_pool_size, 4);
        assert_eq!(
            config.metrics,
            MetricsConfig {
                enabled: true,
                port: 8421
            }
        );

        let nats = config.adapter.nats.unwrap();
        assert_eq!(nats.servers, vec!["nats://localhost:4222".to_string()]);
        assert_eq!(nats.num_partitions, 3);
        assert_eq!(nats.ack_timeout, Duration::from_secs(5));
        assert_eq!(nats.flush_timeout, Duration::from_secs(30));
        assert_eq!(
            nats.authentication,
            Authentication::Token {
                token: "secret".to_string()
            }
        );
    }

    #[test]
    fn test_stream_validation_runs_on_load() {
        let file = write("[stream]\nurl = \"wss://localhost/targets/nope/websocket\"\n");

        assert!(matches!(
            load(&[&file]),
            Err(Error::Stream(chain_sink_stream::Error::InvalidTargetId(_)))
        ));
    }

    #[test]
    fn test_nats_adapter_requires_settings() {
        let file = write(&format!(
            "[stream]\nurl = \"{URL}\"\n\n[adapter]\ntype = \"nats\"\n"
        ));

        assert!(matches!(load(&[&file]), Err(Error::MissingNatsConfig)));
    }

    #[test]
    fn test_create_stream_requires_name() {
        let file = write(&format!(
            r#"
            [stream]
            url = "{URL}"

            [adapter]
            type = "nats"

            [adapter.nats]
            servers = ["nats://localhost:4222"]
            subject = "chain.events"
            create_stream = true
            "#
        ));

        assert!(matches!(load(&[&file]), Err(Error::InvalidNatsConfig(_))));
    }

    #[test]
    fn test_invalid_stream_options_are_rejected() {
        let file = write(&format!(
            r#"
            [stream]
            url = "{URL}"

            [adapter]
            type = "nats"

            [adapter.nats]
            servers = ["nats://localhost:4222"]
            subject = "chain.events"
            retention_time = "sometimes"
            "#
        ));

        assert!(matches!(
            load(&[&file]),
            Err(Error::Nats(chain_sink_adapter_nats::Error::InvalidRetention { .. }))
        ));
    }

    #[test]
    fn test_zero_stream_count() {
        let file = write(&format!("stream_count = 0\n\n[stream]\nurl = \"{URL}\"\n"));

        assert!(matches!(load(&[&file]), Err(Error::InvalidStreamCount)));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let file = write(&format!("[stream]\nurl = \"{URL}\"\nworkers = 2\n"));

        assert!(matches!(load(&[&file]), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load(&[PathBuf::from("/nonexistent/chain-sink.toml")]);

        assert!(matches!(result, Err(Error::ReadConfig { .. })));
        assert!(matches!(Config::load(&[]), Err(Error::NoConfigFiles)));
    }
}
