use std::sync::Arc;
use std::time::Duration;

use tracestash_codec::OtelRecordDecoder;
use tracestash_codec::SpanDecoder;
use tracestash_core::Result;
use tracestash_core::model::{DependencyLink, Endpoint, Span, Trace};
use tracestash_core::query::QueryRequest;

use crate::call::{Call, QueryKind};
use crate::client::{SearchResults, SearchRow, SplunkClient};
use crate::query::{self, OTEL_FIELDS, SearchTarget};
use crate::span_store::{StoreCore, TraceQueries, validate_window};

const CONSUMER_KIND: &str = "5";

/// OpenTelemetry records: collector `ResourceSpans` or flattened spans.
#[derive(Debug, Clone)]
pub struct OtelSpanStore {
    core: StoreCore,
}

impl OtelSpanStore {
    pub fn new(client: Arc<SplunkClient>, target: SearchTarget, names_lookback: Duration) -> Self {
        Self {
            core: StoreCore::new(client, target, &OTEL_FIELDS, names_lookback, decode_otel_line),
        }
    }
}

/// Flattened spans carry no resource, so the row's `service.name` stands in
/// for the local service when it is unambiguous.
fn decode_otel_line(line: &str, row: &SearchRow) -> Result<Vec<Span>> {
    let spans = OtelRecordDecoder::default().decode_list(line.as_bytes())?;
    let service = row
        .get("service.name")
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.contains('\n'));

    let Some(service) = service else {
        return Ok(spans);
    };
    spans
        .into_iter()
        .map(|span| {
            let mut builder = span.to_builder();
            if builder.has_local_service_name() {
                return Ok(span);
            }
            builder.local_endpoint(Endpoint::builder().service_name(service).build());
            builder.build()
        })
        .collect()
}

/// Turns aggregated rows into links. Consumer rows point the other way, and
/// repeated pairs are summed.
pub(crate) fn dependency_links(rows: &SearchResults) -> Vec<DependencyLink> {
    let mut links: Vec<DependencyLink> = Vec::new();
    for row in rows {
        let (Some(parent), Some(child)) = (row.get("parent"), row.get("child")) else {
            tracing::debug!("skipping dependency row without parent or child");
            continue;
        };
        let call_count = match row.get("callcount").map(|c| c.trim().parse::<u64>()) {
            Some(Ok(count)) => count,
            _ => {
                tracing::warn!(parent, child, "skipping dependency row with bad callcount");
                continue;
            }
        };
        let (parent, child) = if row.get("kind") == Some(CONSUMER_KIND) {
            (child, parent)
        } else {
            (parent, child)
        };

        match links
            .iter_mut()
            .find(|l| l.parent == parent && l.child == child)
        {
            Some(link) => link.call_count += call_count,
            None => links.push(DependencyLink::new(parent, child, call_count)),
        }
    }
    links
}

impl TraceQueries for OtelSpanStore {
    fn get_traces(&self, request: &QueryRequest) -> Call<Vec<Trace>> {
        self.core.get_traces(request)
    }

    fn get_trace(&self, trace_id: &str) -> Result<Call<Trace>> {
        self.core.get_trace(trace_id)
    }

    fn get_traces_by_ids(&self, trace_ids: &[String]) -> Result<Call<Vec<Trace>>> {
        self.core.get_traces_by_ids(trace_ids)
    }

    fn get_service_names(&self) -> Call<Vec<String>> {
        self.core.get_service_names()
    }

    fn get_span_names(&self, service_name: &str) -> Result<Call<Vec<String>>> {
        self.core.get_span_names(service_name)
    }

    fn get_remote_service_names(&self, service_name: &str) -> Result<Call<Vec<String>>> {
        self.core.get_remote_service_names(service_name)
    }

    fn get_dependencies(&self, start_ms: u64, end_ms: u64) -> Result<Call<Vec<DependencyLink>>> {
        validate_window(start_ms, end_ms)?;
        let q = query::dependencies_query(start_ms, end_ms, self.core.target());
        Ok(self
            .core
            .search(QueryKind::Dependencies, q, |rows| Ok(dependency_links(&rows))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> SearchRow {
        pairs.iter().copied().collect()
    }

    #[test]
    fn producer_consumer_pair_merges_into_one_link() {
        let rows = vec![
            row(&[
                ("parent", "orders"),
                ("child", "invoices"),
                ("callcount", "1"),
                ("kind", "4"),
            ]),
            row(&[
                ("parent", "invoices"),
                ("child", "orders"),
                ("callcount", "1"),
                ("kind", "5"),
            ]),
        ];
        assert_eq!(
            dependency_links(&rows),
            vec![DependencyLink::new("orders", "invoices", 2)]
        );
    }

    #[test]
    fn incomplete_dependency_rows_are_skipped() {
        let rows = vec![
            row(&[("parent", "a"), ("callcount", "3")]),
            row(&[("parent", "a"), ("child", "b"), ("callcount", "many")]),
            row(&[("parent", "a"), ("child", "b"), ("callcount", "3"), ("kind", "3")]),
        ];
        assert_eq!(dependency_links(&rows), vec![DependencyLink::new("a", "b", 3)]);
    }

    #[test]
    fn row_service_fills_missing_local_endpoint() {
        let line = r#"{"trace_id":"1","span_id":"2","name":"get"}"#;
        let spans = decode_otel_line(line, &row(&[("service.name", "Frontend")])).unwrap();
        assert_eq!(spans[0].local_service_name(), Some("frontend"));

        let ambiguous = decode_otel_line(line, &row(&[("service.name", "a\nb")])).unwrap();
        assert_eq!(ambiguous[0].local_endpoint(), None);
    }

    #[test]
    fn resource_service_is_kept() {
        let line = serde_json::json!({
            "resource": {"attributes": [
                {"key": "service.name", "value": {"stringValue": "api"}}
            ]},
            "scopeSpans": [{"spans": [{"traceId": "1", "spanId": "2"}]}]
        })
        .to_string();
        let spans = decode_otel_line(&line, &row(&[("service.name", "other")])).unwrap();
        assert_eq!(spans[0].local_service_name(), Some("api"));
    }
}
