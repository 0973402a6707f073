use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracestash_codec::{ClassicCodec, SpanDecoder};
use tracestash_core::ids::normalize_trace_id;
use tracestash_core::model::{DependencyLink, Span, Trace};
use tracestash_core::query::QueryRequest;
use tracestash_core::{Result, TracestashError};

use crate::call::{Call, QueryKind};
use crate::client::{SearchResults, SearchRow, SplunkClient};
use crate::query::{self, CLASSIC_FIELDS, FieldTable, SearchTarget};

/// Read side of trace storage. Argument problems surface as `Err` before
/// any I/O; everything else is reported when the returned call runs.
pub trait TraceQueries: Send + Sync {
    fn get_traces(&self, request: &QueryRequest) -> Call<Vec<Trace>>;

    fn get_trace(&self, trace_id: &str) -> Result<Call<Trace>>;

    fn get_traces_by_ids(&self, trace_ids: &[String]) -> Result<Call<Vec<Trace>>>;

    fn get_service_names(&self) -> Call<Vec<String>>;

    fn get_span_names(&self, service_name: &str) -> Result<Call<Vec<String>>>;

    fn get_remote_service_names(&self, service_name: &str) -> Result<Call<Vec<String>>>;

    /// Links observed in `[start_ms, end_ms]`, epoch milliseconds.
    fn get_dependencies(&self, start_ms: u64, end_ms: u64) -> Result<Call<Vec<DependencyLink>>>;
}

/// Decodes one line of a result row's `_raw` into spans.
pub(crate) type LineDecoder = fn(&str, &SearchRow) -> Result<Vec<Span>>;

/// Search plumbing shared by both layouts.
#[derive(Debug, Clone)]
pub(crate) struct StoreCore {
    client: Arc<SplunkClient>,
    target: SearchTarget,
    fields: &'static FieldTable,
    names_lookback_secs: u64,
    decode_line: LineDecoder,
}

impl StoreCore {
    pub(crate) fn new(
        client: Arc<SplunkClient>,
        target: SearchTarget,
        fields: &'static FieldTable,
        names_lookback: Duration,
        decode_line: LineDecoder,
    ) -> Self {
        Self {
            client,
            target,
            fields,
            names_lookback_secs: names_lookback.as_secs(),
            decode_line,
        }
    }

    pub(crate) fn target(&self) -> &SearchTarget {
        &self.target
    }

    pub(crate) fn search<T, P>(&self, kind: QueryKind, query: String, parse: P) -> Call<T>
    where
        T: Send + 'static,
        P: Fn(SearchResults) -> Result<T> + Send + Sync + 'static,
    {
        tracing::debug!(kind = ?kind, query = %query, "synthesized search");
        let client = Arc::clone(&self.client);
        let query: Arc<str> = query.into();
        let parse = Arc::new(parse);
        Call::new(kind, move || {
            let client = Arc::clone(&client);
            let query = Arc::clone(&query);
            let parse = Arc::clone(&parse);
            async move {
                let rows = client.search(&query).await?;
                parse(rows)
            }
        })
    }

    pub(crate) fn get_traces(&self, request: &QueryRequest) -> Call<Vec<Trace>> {
        let q = query::traces_query(request, &self.target, self.fields);
        let decode_line = self.decode_line;
        self.search(QueryKind::Traces, q, move |rows| {
            Ok(decode_trace_rows(&rows, decode_line))
        })
    }

    pub(crate) fn get_trace(&self, trace_id: &str) -> Result<Call<Trace>> {
        let id = normalize_trace_id(trace_id)?;
        let q = query::trace_query(&id, &self.target, self.fields);
        let decode_line = self.decode_line;
        Ok(self.search(QueryKind::Trace, q, move |rows| {
            let mut spans: Trace = decode_trace_rows(&rows, decode_line)
                .into_iter()
                .flatten()
                .collect();
            spans.retain(|s| s.trace_id() == id);
            Ok(spans)
        }))
    }

    pub(crate) fn get_traces_by_ids(&self, trace_ids: &[String]) -> Result<Call<Vec<Trace>>> {
        let mut seen = HashSet::new();
        let mut ids = Vec::with_capacity(trace_ids.len());
        for raw in trace_ids {
            let id = normalize_trace_id(raw)?;
            if !seen.insert(id.clone()) {
                return Err(TracestashError::InvalidArgument(format!(
                    "duplicate trace id: {raw}"
                )));
            }
            ids.push(id);
        }
        if ids.is_empty() {
            return Ok(Call::done(Vec::new()));
        }

        let q = query::traces_by_ids_query(&ids, &self.target, self.fields);
        let decode_line = self.decode_line;
        Ok(self.search(QueryKind::Traces, q, move |rows| {
            Ok(decode_trace_rows(&rows, decode_line))
        }))
    }

    pub(crate) fn get_service_names(&self) -> Call<Vec<String>> {
        let q = query::service_names_query(&self.target, self.fields, self.names_lookback_secs);
        self.names(q, self.fields.local_service)
    }

    pub(crate) fn get_span_names(&self, service_name: &str) -> Result<Call<Vec<String>>> {
        let service = required_service(service_name)?;
        let q = query::span_names_query(
            &service,
            &self.target,
            self.fields,
            self.names_lookback_secs,
        );
        Ok(self.names(q, self.fields.span_name))
    }

    pub(crate) fn get_remote_service_names(&self, service_name: &str) -> Result<Call<Vec<String>>> {
        let service = required_service(service_name)?;
        let q = query::remote_service_names_query(
            &service,
            &self.target,
            self.fields,
            self.names_lookback_secs,
        );
        let field = if self.fields.derived_remote_names {
            "remoteServiceName"
        } else {
            self.fields.remote_service
        };
        Ok(self.names(q, field))
    }

    fn names(&self, query: String, field: &'static str) -> Call<Vec<String>> {
        self.search(QueryKind::Names, query, move |rows| {
            Ok(names_from_rows(&rows, field))
        })
    }
}

pub(crate) fn validate_window(start_ms: u64, end_ms: u64) -> Result<()> {
    if end_ms <= start_ms {
        return Err(TracestashError::InvalidArgument(format!(
            "endTs ({end_ms}) must be after startTs ({start_ms})"
        )));
    }
    Ok(())
}

fn required_service(service_name: &str) -> Result<String> {
    let trimmed = service_name.trim();
    if trimmed.is_empty() {
        return Err(TracestashError::InvalidArgument(
            "serviceName is required".into(),
        ));
    }
    Ok(trimmed.to_lowercase())
}

/// One trace per row. A row with any undecodable line is dropped as a whole.
pub(crate) fn decode_trace_rows(rows: &[SearchRow], decode_line: LineDecoder) -> Vec<Trace> {
    let mut traces = Vec::with_capacity(rows.len());
    'rows: for row in rows {
        let Some(raw) = row.get("_raw") else {
            tracing::warn!("search row has no _raw field");
            continue;
        };
        let mut trace = Vec::new();
        for line in raw.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
            match decode_line(line, row) {
                Ok(spans) => trace.extend(spans),
                Err(err) => {
                    tracing::error!(error = ?err, "dropping trace that failed to decode");
                    continue 'rows;
                }
            }
        }
        if !trace.is_empty() {
            traces.push(trace);
        }
    }
    traces
}

/// Non-empty values of `field`, lowercased, first occurrence wins.
pub(crate) fn names_from_rows(rows: &[SearchRow], field: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter_map(|row| row.get(field))
        .flat_map(|v| v.split('\n'))
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

fn decode_classic_line(line: &str, _row: &SearchRow) -> Result<Vec<Span>> {
    ClassicCodec.decode_one(line.as_bytes()).map(|span| vec![span])
}

/// Spans stored as Zipkin v2 JSON, one per event.
#[derive(Debug, Clone)]
pub struct ClassicSpanStore {
    core: StoreCore,
}

impl ClassicSpanStore {
    pub fn new(client: Arc<SplunkClient>, target: SearchTarget, names_lookback: Duration) -> Self {
        Self {
            core: StoreCore::new(
                client,
                target,
                &CLASSIC_FIELDS,
                names_lookback,
                decode_classic_line,
            ),
        }
    }
}

impl TraceQueries for ClassicSpanStore {
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

    /// The classic layout keeps no link data; the result is always empty.
    fn get_dependencies(&self, start_ms: u64, end_ms: u64) -> Result<Call<Vec<DependencyLink>>> {
        validate_window(start_ms, end_ms)?;
        Ok(Call::done(Vec::new()))
    }
}
