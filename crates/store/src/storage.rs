use std::sync::{Arc, OnceLock};

use tracestash_core::config::{Config, Layout};

use crate::client::{ClientSettings, Credential, SplunkClient};
use crate::consumer::{RecordWriter, SpanConsumer, WriteTarget};
use crate::otel_store::OtelSpanStore;
use crate::query::SearchTarget;
use crate::span_store::{ClassicSpanStore, TraceQueries};

/// Entry point. Owns the configuration and the shared client, and hands
/// out stores and writers bound to them.
#[derive(Debug)]
pub struct Storage {
    config: Config,
    client: OnceLock<Arc<SplunkClient>>,
}

impl Storage {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            client: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Built on first use. No connection is made until a call runs.
    pub fn client(&self) -> Arc<SplunkClient> {
        let client = self.client.get_or_init(|| {
            Arc::new(SplunkClient::new(
                ClientSettings::from_config(&self.config),
                Credential::from_config(&self.config),
            ))
        });
        Arc::clone(client)
    }

    pub fn span_store(&self) -> Arc<dyn TraceQueries> {
        self.store_over(self.client())
    }

    /// Same layout over a separate client authenticated with `token`. The
    /// shared session is left untouched.
    pub fn span_store_with_token(&self, token: &str) -> Arc<dyn TraceQueries> {
        let client = SplunkClient::new(
            ClientSettings::from_config(&self.config),
            Credential::Bearer(token.trim().to_string()),
        );
        self.store_over(Arc::new(client))
    }

    pub fn span_consumer(&self) -> SpanConsumer {
        SpanConsumer::new(self.client(), self.write_target(), self.config.layout)
    }

    /// Writer for OTLP trace records received by the collector.
    pub fn trace_writer(&self) -> RecordWriter {
        RecordWriter::new(self.client(), self.write_target())
    }

    /// Writer for OTLP metric records: same index and source, tagged with
    /// the metrics source type.
    pub fn metrics_writer(&self) -> RecordWriter {
        let target = WriteTarget::new(
            &self.config.index_name,
            &self.config.source,
            &self.config.metrics_source_type,
        );
        RecordWriter::new(self.client(), target)
    }

    fn write_target(&self) -> WriteTarget {
        WriteTarget::new(
            &self.config.index_name,
            &self.config.source,
            &self.config.source_type,
        )
    }

    fn store_over(&self, client: Arc<SplunkClient>) -> Arc<dyn TraceQueries> {
        let target = SearchTarget::new(&self.config.index_name, &self.config.source_type);
        let lookback = self.config.default_lookback;
        match self.config.layout {
            Layout::Classic => Arc::new(ClassicSpanStore::new(client, target, lookback)),
            Layout::Otel => Arc::new(OtelSpanStore::new(client, target, lookback)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_client_is_built_once() {
        let storage = Storage::new(Config::default());
        let a = storage.client();
        let b = storage.client();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!a.is_connected());
    }

    #[test]
    fn consumer_follows_configured_layout() {
        for layout in [Layout::Classic, Layout::Otel] {
            let storage = Storage::new(Config {
                layout,
                ..Config::default()
            });
            assert_eq!(storage.span_consumer().layout(), layout);
        }
    }

    #[test]
    fn metrics_share_index_but_not_source_type() {
        let storage = Storage::new(Config::default());
        let traces = storage.trace_writer();
        let metrics = storage.metrics_writer();
        assert_eq!(traces.target().index, metrics.target().index);
        assert_eq!(traces.target().source, metrics.target().source);
        assert_eq!(traces.target().source_type, "span");
        assert_eq!(metrics.target().source_type, "mts");
    }

    #[test]
    fn token_scoped_store_does_not_touch_shared_client() {
        let storage = Storage::new(Config::default());
        let shared = storage.client();
        let store = storage.span_store_with_token("abc");
        let call = store.get_dependencies(1, 2).unwrap();
        assert!(!call.is_executed());
        assert!(!shared.is_connected());
    }
}
