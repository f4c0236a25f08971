use crate::{Error, Result};

use std::collections::HashMap;
use std::time::Duration;

use async_nats::jetstream::stream::{Compression, Config as StreamConfig};
use async_nats::jetstream::{self, Context as JetStreamContext};
use futures::TryStreamExt;
use tracing::info;

/// Option key for how long messages are retained.
pub const RETENTION_OPTION: &str = "retention";

/// Option key for stream storage compression.
pub const COMPRESSION_OPTION: &str = "compression";

/// Provisions the JetStream stream that the adapter publishes into.
#[derive(Clone, Debug)]
pub struct NatsAdmin {
    jetstream: JetStreamContext,
}

impl NatsAdmin {
    /// Creates an admin sharing `client`'s connection.
    #[must_use]
    pub fn new(client: async_nats::Client) -> Self {
        Self {
            jetstream: jetstream::new(client),
        }
    }

    /// Makes sure stream `name` exists.
    ///
    /// Returns `true` if it was created and `false` if it already existed.
    /// Options are `retention` and `compression`, see [`parse_retention`] and
    /// [`parse_compression`].
    ///
    /// # Errors
    ///
    /// Returns an error for invalid options or if the broker request fails.
    pub async fn create_stream_if_not_exists(
        &self,
        name: &str,
        subject: &str,
        partitions: u32,
        replicas: usize,
        options: &HashMap<String, String>,
    ) -> Result<bool> {
        let config = stream_config(name, subject, partitions, replicas, options)?;

        let mut names = std::pin::pin!(self.jetstream.stream_names());
        while let Some(existing) = names
            .try_next()
            .await
            .map_err(|e| Error::ListStreams(Box::new(e)))?
        {
            if existing == name {
                info!(stream = name, "stream already exists");
                return Ok(false);
            }
        }

        self.jetstream
            .create_stream(config)
            .await
            .map_err(Error::CreateStream)?;
        info!(stream = name, partitions, replicas, "created stream");

        Ok(true)
    }
}

/// Builds the stream config for `subject` split into `partitions`.
///
/// # Errors
///
/// Returns an error for a zero partition count or invalid options.
pub fn stream_config(
    name: &str,
    subject: &str,
    partitions: u32,
    replicas: usize,
    options: &HashMap<String, String>,
) -> Result<StreamConfig> {
    if partitions == 0 {
        return Err(Error::InvalidPartitions);
    }

    let mut max_age = None;
    let mut compression = None;
    for (key, value) in options {
        match key.as_str() {
            RETENTION_OPTION => max_age = parse_retention(value)?,
            COMPRESSION_OPTION => compression = parse_compression(value)?,
            _ => return Err(Error::UnknownStreamOption(key.clone())),
        }
    }

    let subjects = if partitions > 1 {
        vec![format!("{subject}.*")]
    } else {
        vec![subject.to_string()]
    };

    Ok(StreamConfig {
        name: name.to_string(),
        subjects,
        num_replicas: replicas,
        max_age: max_age.unwrap_or_default(),
        compression,
        ..Default::default()
    })
}

/// Parses a retention setting.
///
/// An empty value keeps the broker default, `-1` means unlimited, a bare
/// integer is milliseconds and anything else is read as a duration like `7d`.
///
/// # Errors
///
/// Returns an error if the value is none of the above.
pub fn parse_retention(value: &str) -> Result<Option<Duration>> {
    match value.trim() {
        "" => Ok(None),
        "-1" => Ok(Some(Duration::ZERO)),
        value => match value.parse::<u64>() {
            Ok(millis) => Ok(Some(Duration::from_millis(millis))),
            Err(_) => humantime::parse_duration(value)
                .map(Some)
                .map_err(|source| Error::InvalidRetention {
                    value: value.to_string(),
                    source,
                }),
        },
    }
}

/// Parses a compression setting. Empty keeps the broker default.
///
/// # Errors
///
/// Returns an error for anything but `none`, `uncompressed` or `s2`.
pub fn parse_compression(value: &str) -> Result<Option<Compression>> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "none" | "uncompressed" => Ok(Some(Compression::None)),
        "s2" => Ok(Some(Compression::S2)),
        _ => Err(Error::InvalidCompression(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn test_parse_retention() {
        assert_eq!(parse_retention("").unwrap(), None);
        assert_eq!(parse_retention("-1").unwrap(), Some(Duration::ZERO));
        assert_eq!(
            parse_retention("86400000").unwrap(),
            Some(Duration::from_secs(86_400))
        );
        assert_eq!(
            parse_retention("7d").unwrap(),
            Some(Duration::from_secs(7 * 86_400))
        );
        assert_eq!(
            parse_retention("1h 30m").unwrap(),
            Some(Duration::from_secs(5_400))
        );
        assert!(matches!(
            parse_retention("forever"),
            Err(Error::InvalidRetention { .. })
        ));
    }

    #[test]
    fn test_parse_compression() {
        assert_eq!(parse_compression("").unwrap(), None);
        assert_eq!(parse_compression("S2").unwrap(), Some(Compression::S2));
        assert_eq!(
            parse_compression("uncompressed").unwrap(),
            Some(Compression::None)
        );
        assert!(matches!(
            parse_compression("zstd"),
            Err(Error::InvalidCompression(_))
        ));
    }

    #[test]
    fn test_stream_config_single_partition() {
        let config = stream_config("events", "chain.events", 1, 3, &options(&[])).unwrap();

        assert_eq!(config.name, "events");
        assert_eq!(config.subjects, vec!["chain.events".to_string()]);
        assert_eq!(config.num_replicas, 3);
        assert_eq!(config.max_age, Duration::ZERO);
        assert_eq!(config.compression, None);
    }

    #[test]
    fn test_stream_config_partitioned_with_options() {
        let config = stream_config(
            "events",
            "chain.events",
            4,
            1,
            &options(&[(RETENTION_OPTION, "12h"), (COMPRESSION_OPTION, "s2")]),
        )
        .unwrap();

        assert_eq!(config.subjects, vec!["chain.events.*".to_string()]);
        assert_eq!(config.max_age, Duration::from_secs(12 * 3_600));
        assert_eq!(config.compression, Some(Compression::S2));
    }

    #[test]
    fn test_stream_config_rejects_unknown_option() {
        assert!(matches!(
            stream_config("events", "chain.events", 1, 1, &options(&[("retention.ms", "1")])),
            Err(Error::UnknownStreamOption(key)) if key == "retention.ms"
        ));
        assert!(matches!(
            stream_config("events", "chain.events", 0, 1, &options(&[])),
            Err(Error::InvalidPartitions)
        ));
    }
}
