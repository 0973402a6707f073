use std::sync::Arc;

use tracestash_codec::{ClassicCodec, ResourceSpansEncoder, SpanEncoder};
use tracestash_core::config::Layout;
use tracestash_core::model::Span;
use tracestash_core::{Result, TracestashError};

use crate::call::{Call, QueryKind};
use crate::client::SplunkClient;

/// Where written records land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTarget {
    pub index: String,
    pub source: String,
    pub source_type: String,
}

impl WriteTarget {
    pub fn new(
        index: impl Into<String>,
        source: impl Into<String>,
        source_type: impl Into<String>,
    ) -> Self {
        Self {
            index: index.into(),
            source: source.into(),
            source_type: source_type.into(),
        }
    }
}

fn write_call(
    client: &Arc<SplunkClient>,
    target: &WriteTarget,
    records: Vec<Vec<u8>>,
) -> Call<()> {
    let client = Arc::clone(client);
    let target = Arc::new(target.clone());
    let records = Arc::new(records);
    Call::new(QueryKind::Write, move || {
        let client = Arc::clone(&client);
        let target = Arc::clone(&target);
        let records = Arc::clone(&records);
        async move {
            client
                .write(
                    &target.index,
                    &target.source,
                    &target.source_type,
                    records.iter(),
                )
                .await?;
            tracing::debug!(records = records.len(), index = %target.index, "batch written");
            Ok(())
        }
    })
}

/// Writes spans one record per span, in the encoding the layout's store
/// reads: Zipkin JSON for classic, OTLP `ResourceSpans` JSON for otel.
#[derive(Debug, Clone)]
pub struct SpanConsumer {
    client: Arc<SplunkClient>,
    target: WriteTarget,
    layout: Layout,
}

impl SpanConsumer {
    pub fn new(client: Arc<SplunkClient>, target: WriteTarget, layout: Layout) -> Self {
        Self {
            client,
            target,
            layout,
        }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Encoding happens up front, so a span that cannot be encoded fails
    /// the whole batch before anything is sent. Records flushed before a
    /// transport failure stay written.
    pub fn accept(&self, spans: Vec<Span>) -> Call<()> {
        if spans.is_empty() {
            return Call::done(());
        }
        let encoded = match self.layout {
            Layout::Classic => encode_all(&ClassicCodec, &spans),
            Layout::Otel => encode_all(&ResourceSpansEncoder, &spans),
        };
        match encoded {
            Ok(records) => write_call(&self.client, &self.target, records),
            Err(err) => {
                let message = format!("encoding batch: {err}");
                Call::new(QueryKind::Write, move || {
                    let message = message.clone();
                    async move { Err(TracestashError::Write(message)) }
                })
            }
        }
    }
}

fn encode_all(encoder: &impl SpanEncoder, spans: &[Span]) -> Result<Vec<Vec<u8>>> {
    spans.iter().map(|s| encoder.encode(s)).collect()
}

/// Writes already-encoded records untouched, one record each. The collector
/// uses one per signal.
#[derive(Debug, Clone)]
pub struct RecordWriter {
    client: Arc<SplunkClient>,
    target: WriteTarget,
}

impl RecordWriter {
    pub fn new(client: Arc<SplunkClient>, target: WriteTarget) -> Self {
        Self { client, target }
    }

    pub fn target(&self) -> &WriteTarget {
        &self.target
    }

    pub fn write_records(&self, records: Vec<Vec<u8>>) -> Call<()> {
        if records.is_empty() {
            return Call::done(());
        }
        write_call(&self.client, &self.target, records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientSettings, Credential};

    fn offline_client() -> Arc<SplunkClient> {
        Arc::new(SplunkClient::new(
            ClientSettings::new("http://127.0.0.1:9"),
            Credential::None,
        ))
    }

    #[tokio::test]
    async fn empty_batch_never_connects() {
        let client = offline_client();
        let consumer = SpanConsumer::new(
            Arc::clone(&client),
            WriteTarget::new("i", "s", "st"),
            Layout::Otel,
        );
        let call = consumer.accept(Vec::new());
        assert_eq!(call.kind(), QueryKind::Immediate);
        call.execute().await.unwrap();
        assert!(!client.is_connected());

        let writer = RecordWriter::new(Arc::clone(&client), WriteTarget::new("i", "s", "st"));
        writer.write_records(Vec::new()).execute().await.unwrap();
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn non_empty_batch_is_a_write_call() {
        let span = Span::builder().trace_id("1").id("2").build().unwrap();
        for layout in [Layout::Classic, Layout::Otel] {
            let consumer =
                SpanConsumer::new(offline_client(), WriteTarget::new("i", "s", "st"), layout);
            assert_eq!(consumer.accept(vec![span.clone()]).kind(), QueryKind::Write);
        }
    }
}
