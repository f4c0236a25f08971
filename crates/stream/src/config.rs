use crate::{Error, Result};

use lazy_regex::{regex_captures, regex_is_match};
use serde::Deserialize;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use uuid::Uuid;

/// Whether each message is acknowledged back to the feed.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Acknowledge each message once the sink accepted it.
    #[default]
    Ack,

    /// Fire and forget.
    #[serde(alias = "no-ack")]
    NoAck,
}

/// A static header sent with the websocket handshake.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Header {
    /// Header name.
    pub key: String,

    /// Header value.
    pub value: String,
}

/// Configuration of one stream session.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    /// Acknowledgment mode.
    #[serde(default)]
    pub mode: StreamMode,

    /// Feed url, `{ws|wss}://<host>/targets/<uuid>/websocket`.
    pub url: String,

    /// Static headers, sent in order.
    #[serde(default)]
    pub headers: Vec<Header>,

    /// Number of workers, which is also the queue capacity.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Credential sent as `x-api-key`.
    #[serde(default)]
    pub api_key: Option<String>,
}

const fn default_worker_pool_size() -> usize {
    1
}

impl StreamConfig {
    /// Creates a config for `url` with default settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            mode: StreamMode::default(),
            url: url.into(),
            headers: Vec::new(),
            worker_pool_size: default_worker_pool_size(),
            api_key: None,
        }
    }

    /// The configured API key, ignoring empty strings.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.is_empty())
    }

    /// Checks the config and returns the target id parsed from the url.
    ///
    /// # Errors
    ///
    /// Returns an error if the url is malformed, the target id is not a uuid,
    /// a managed gateway url has no API key, the worker pool is empty, or a
    /// header cannot be sent.
    pub fn validate(&self) -> Result<Uuid> {
        let Some((_, _, target)) =
            regex_captures!(r"^(ws|wss)://.*?/targets/(.*?)/websocket$", self.url.as_str())
        else {
            return Err(Error::InvalidUrl);
        };

        let target_id = Uuid::parse_str(target).map_err(Error::InvalidTargetId)?;

        if regex_is_match!(
            r"^wss://(.+)?svc\.blockdaemon\.com/streaming/v2/targets/.*?/websocket$",
            self.url.as_str()
        ) && self.api_key().is_none()
        {
            return Err(Error::MissingApiKey);
        }

        if self.worker_pool_size == 0 {
            return Err(Error::InvalidWorkerPoolSize);
        }

        if let Some(api_key) = self.api_key() {
            HeaderValue::from_str(api_key)
                .map_err(|_| Error::InvalidHeader("api_key".to_string()))?;
        }

        for header in &self.headers {
            HeaderName::from_bytes(header.key.as_bytes())
                .map_err(|_| Error::InvalidHeader(header.key.clone()))?;
            HeaderValue::from_str(&header.value)
                .map_err(|_| Error::InvalidHeader(header.key.clone()))?;
        }

        Ok(target_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: &str = "5b8e1b5e-0c1d-4b0e-9f2e-6c1d6a3b4f10";

    fn with_key(url: String, api_key: &str) -> StreamConfig {
        StreamConfig {
            api_key: Some(api_key.to_string()),
            ..StreamConfig::new(url)
        }
    }

    #[test]
    fn test_valid_urls() {
        for url in [
            format!("ws://localhost:8080/targets/{TARGET}/websocket"),
            format!("wss://localhost:8080/targets/{TARGET}/websocket"),
            format!("ws://host/targets/{TARGET}/websocket"),
        ] {
            let id = StreamConfig::new(url.clone()).validate().unwrap();
            assert_eq!(id.to_string(), TARGET, "{url}");
        }
    }

    #[test]
    fn test_invalid_path() {
        let config = StreamConfig::new(format!("ws://host/targets/{TARGET}/websockets"));
        assert!(matches!(config.validate(), Err(Error::InvalidUrl)));

        let config = StreamConfig::new(format!("http://host/targets/{TARGET}/websocket"));
        assert!(matches!(config.validate(), Err(Error::InvalidUrl)));
    }

    #[test]
    fn test_invalid_target_id() {
        let config = StreamConfig::new("ws://host/targets/not-a-uuid/websocket");
        assert!(matches!(config.validate(), Err(Error::InvalidTargetId(_))));
    }

    #[test]
    fn test_managed_gateway_requires_api_key() {
        let url = format!("wss://eu.svc.blockdaemon.com/streaming/v2/targets/{TARGET}/websocket");

        let config = with_key(url.clone(), "");
        assert!(matches!(config.validate(), Err(Error::MissingApiKey)));

        let config = StreamConfig::new(url.clone());
        assert!(matches!(config.validate(), Err(Error::MissingApiKey)));

        assert!(with_key(url, "secret").validate().is_ok());
    }

    #[test]
    fn test_non_gateway_host_does_not_require_api_key() {
        let url = format!("wss://svc.blockdaemon.com/targets/{TARGET}/websocket");

        assert!(with_key(url.clone(), "secret").validate().is_ok());
        assert!(StreamConfig::new(url).validate().is_ok());
    }

    #[test]
    fn test_insecure_gateway_does_not_require_api_key() {
        let url = format!("ws://svc.blockdaemon.com/streaming/v2/targets/{TARGET}/websocket");

        assert!(StreamConfig::new(url).validate().is_ok());
    }

    #[test]
    fn test_worker_pool_size() {
        let config = StreamConfig {
            worker_pool_size: 0,
            ..StreamConfig::new(format!("ws://host/targets/{TARGET}/websocket"))
        };

        assert!(matches!(
            config.validate(),
            Err(Error::InvalidWorkerPoolSize)
        ));
    }

    #[test]
    fn test_invalid_header() {
        let config = StreamConfig {
            headers: vec![Header {
                key: "bad header".to_string(),
                value: "value".to_string(),
            }],
            ..StreamConfig::new(format!("ws://host/targets/{TARGET}/websocket"))
        };

        assert!(matches!(config.validate(), Err(Error::InvalidHeader(key)) if key == "bad header"));
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: StreamConfig = toml::from_str(&format!(
            r#"
            url = "ws://host/targets/{TARGET}/websocket"
            "#
        ))
        .unwrap();

        pretty_assertions::assert_eq!(
            config,
            StreamConfig::new(format!("ws://host/targets/{TARGET}/websocket"))
        );
    }

    #[test]
    fn test_deserialize_full() {
        let config: StreamConfig = toml::from_str(&format!(
            r#"
            mode = "noack"
            url = "wss://host/targets/{TARGET}/websocket"
            worker_pool_size = 8
            api_key = "secret"
            headers = [{{ key = "x-client", value = "chain-sink" }}]
            "#
        ))
        .unwrap();

        assert_eq!(config.mode, StreamMode::NoAck);
        assert_eq!(config.worker_pool_size, 8);
        assert_eq!(config.api_key(), Some("secret"));
        assert_eq!(
            config.headers,
            vec![Header {
                key: "x-client".to_string(),
                value: "chain-sink".to_string()
            }]
        );

        let alias: StreamMode = serde_json::from_str("\"no-ack\"").unwrap();
        assert_eq!(alias, StreamMode::NoAck);
    }
}
