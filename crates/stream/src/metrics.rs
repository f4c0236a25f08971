use prometheus::{IntCounter, Opts, Registry};

const NAMESPACE: &str = "chain_sink";

/// Message counters shared by the sessions of a process.
///
/// The default value is not registered anywhere and records nothing.
#[derive(Clone, Default)]
pub struct StreamMetrics {
    counters: Option<Counters>,
}

#[derive(Clone)]
struct Counters {
    received: IntCounter,
    forwarded: IntCounter,
    acked: IntCounter,
}

impl StreamMetrics {
    /// Creates the counters and registers them with `registry`.
    ///
    /// # Errors
    ///
    /// Fails if the counters are already registered there.
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let counters = Counters {
            received: counter(
                registry,
                "messages_received_total",
                "Messages read from the feed",
            )?,
            forwarded: counter(
                registry,
                "messages_forwarded_to_adapter_total",
                "Messages accepted by the adapter",
            )?,
            acked: counter(
                registry,
                "messages_acked_total",
                "Acknowledgments written to the feed",
            )?,
        };

        Ok(Self {
            counters: Some(counters),
        })
    }

    pub(crate) fn record_received(&self) {
        if let Some(counters) = &self.counters {
            counters.received.inc();
        }
    }

    pub(crate) fn record_forwarded(&self) {
        if let Some(counters) = &self.counters {
            counters.forwarded.inc();
        }
    }

    pub(crate) fn record_acked(&self) {
        if let Some(counters) = &self.counters {
            counters.acked.inc();
        }
    }

    /// Messages read from the feed so far.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.counters.as_ref().map_or(0, |c| c.received.get())
    }

    /// Messages the adapter accepted so far.
    #[must_use]
    pub fn forwarded(&self) -> u64 {
        self.counters.as_ref().map_or(0, |c| c.forwarded.get())
    }

    /// Acknowledgments written so far.
    #[must_use]
    pub fn acked(&self) -> u64 {
        self.counters.as_ref().map_or(0, |c| c.acked.get())
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
    registry.register(Box::new(counter.clone()))?;

    Ok(counter)
}

#[cfg(test)]
mod tests {
    use prometheus::TextEncoder;

    use super::*;

    #[test]
    fn test_unregistered_metrics_record_nothing() {
        let metrics = StreamMetrics::default();
        metrics.record_received();

        assert_eq!(metrics.received(), 0);
    }

    #[test]
    fn test_counters_are_exported_under_namespace() {
        let registry = Registry::new();
        let metrics = StreamMetrics::register(&registry).unwrap();
        metrics.record_received();
        metrics.clone().record_acked();

        let exported = TextEncoder::new()
            .encode_to_string(&registry.gather())
            .unwrap();
        assert!(exported.contains("chain_sink_messages_received_total 1"));
        assert!(exported.contains("chain_sink_messages_forwarded_to_adapter_total 0"));
        assert_eq!(metrics.received(), 1);
        assert_eq!(metrics.acked(), 1);

        assert!(StreamMetrics::register(&registry).is_err());
    }
}
