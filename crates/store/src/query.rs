//! Search programs for the remote engine.
//!
//! Every function here is pure: it turns a request into one SPL string whose
//! stages are joined by `" | "`. Filter values are embedded as given, without
//! escaping; callers pass names that came from the index itself or from a
//! trusted UI.

use tracestash_core::config::Layout;
use tracestash_core::query::{QueryRequest, is_filter};

const STAGE_SEPARATOR: &str = " | ";

/// Column names a layout exposes to the search engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldTable {
    pub trace_id: &'static str,
    pub start_time: &'static str,
    pub local_service: &'static str,
    pub remote_service: &'static str,
    pub span_name: &'static str,
    pub tag_prefix: &'static str,
    pub duration: DurationUnit,
    pub projection: Option<&'static str>,
    /// Extra trace id path matched by single-trace lookups.
    pub nested_trace_id: Option<&'static str>,
    /// Remote names are derived from span attributes rather than read from
    /// a field.
    pub derived_remote_names: bool,
    /// Raw events keep the emitter's case, so name filters use the
    /// case-insensitive `search` stage instead of `where`.
    pub fold_name_case: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    /// Integer microseconds.
    Micros,
    /// Decimal milliseconds.
    Millis,
}

impl DurationUnit {
    fn render(self, micros: u64) -> String {
        match self {
            Self::Micros => micros.to_string(),
            Self::Millis => (micros as f64 / 1000.0).to_string(),
        }
    }
}

pub const CLASSIC_FIELDS: FieldTable = FieldTable {
    trace_id: "traceId",
    start_time: "timestamp",
    local_service: "localEndpoint.serviceName",
    remote_service: "remoteEndpoint.serviceName",
    span_name: "name",
    tag_prefix: "tags.",
    duration: DurationUnit::Micros,
    projection: None,
    nested_trace_id: None,
    derived_remote_names: false,
    fold_name_case: false,
};

pub const OTEL_FIELDS: FieldTable = FieldTable {
    trace_id: "trace_id",
    start_time: "start_time",
    local_service: "service.name",
    remote_service: "attributes.peer.service",
    span_name: "name",
    tag_prefix: "attributes.",
    duration: DurationUnit::Millis,
    projection: Some("fields _raw, service.name"),
    nested_trace_id: Some("scopeSpans{}.spans{}.traceId"),
    derived_remote_names: true,
    fold_name_case: true,
};

impl FieldTable {
    pub fn for_layout(layout: Layout) -> &'static FieldTable {
        match layout {
            Layout::Classic => &CLASSIC_FIELDS,
            Layout::Otel => &OTEL_FIELDS,
        }
    }
}

/// Where events live in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTarget {
    pub index: String,
    pub source_type: String,
}

impl SearchTarget {
    pub fn new(index: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            source_type: source_type.into(),
        }
    }

    fn base(&self) -> String {
        format!(
            "search index=\"{}\" sourcetype=\"{}\"",
            self.index, self.source_type
        )
    }

    fn windowed(&self, start_ms: u64, end_ms: u64) -> String {
        format!(
            "{} earliest={} latest={}",
            self.base(),
            start_ms / 1000,
            end_ms / 1000
        )
    }

    fn recent(&self, lookback_secs: u64) -> String {
        if lookback_secs > 0 {
            format!("{} earliest=-{lookback_secs}s", self.base())
        } else {
            self.base()
        }
    }
}

/// Trace search: window, grouping, filters, newest first, limited.
pub fn traces_query(req: &QueryRequest, target: &SearchTarget, fields: &FieldTable) -> String {
    let end = req.end_ts();
    let start = end.saturating_sub(req.lookback());

    let mut stages = vec![
        target.windowed(start, end),
        format!("transaction {}", fields.trace_id),
    ];

    let string_filters = [
        (fields.local_service, req.service_name()),
        (fields.span_name, req.span_name()),
        (fields.remote_service, req.remote_service_name()),
    ];
    for (field, value) in string_filters {
        if let Some(v) = value.filter(|v| is_filter(Some(*v))) {
            stages.push(name_filter(field, v, fields.fold_name_case));
        }
    }

    for (key, value) in req.annotation_query() {
        if value.is_empty() {
            stages.push(format!("where isnotnull('{}{key}')", fields.tag_prefix));
        } else {
            stages.push(format!("where '{}{key}'=\"{value}\"", fields.tag_prefix));
        }
    }

    if let Some(min) = req.min_duration() {
        stages.push(format!("where duration>={}", fields.duration.render(min)));
    }
    if let Some(max) = req.max_duration() {
        stages.push(format!("where duration<{}", fields.duration.render(max)));
    }

    stages.push(format!("sort -{}", fields.start_time));
    if let Some(projection) = fields.projection {
        stages.push(projection.to_string());
    }
    stages.push(format!("head {}", req.limit()));

    stages.join(STAGE_SEPARATOR)
}

fn name_filter(field: &str, value: &str, fold_case: bool) -> String {
    if fold_case {
        format!("search \"{field}\"=\"{value}\"")
    } else {
        format!("where '{field}'=\"{value}\"")
    }
}

/// All events of one trace. `trace_id` must already be normalized.
pub fn trace_query(trace_id: &str, target: &SearchTarget, fields: &FieldTable) -> String {
    format!("{} {}", target.base(), trace_id_match(trace_id, fields))
}

/// Several traces at once, grouped so each result row is one trace.
pub fn traces_by_ids_query(ids: &[String], target: &SearchTarget, fields: &FieldTable) -> String {
    let matches = ids
        .iter()
        .map(|id| trace_id_match(id, fields))
        .collect::<Vec<_>>()
        .join(" OR ");
    let mut stages = vec![
        format!("{} ({matches})", target.base()),
        format!("transaction {}", fields.trace_id),
    ];
    if let Some(projection) = fields.projection {
        stages.push(projection.to_string());
    }
    stages.join(STAGE_SEPARATOR)
}

fn trace_id_match(trace_id: &str, fields: &FieldTable) -> String {
    match fields.nested_trace_id {
        Some(nested) => format!(
            "({}=\"{trace_id}\" OR \"{nested}\"=\"{trace_id}\")",
            fields.trace_id
        ),
        None => format!("{}=\"{trace_id}\"", fields.trace_id),
    }
}

pub fn service_names_query(
    target: &SearchTarget,
    fields: &FieldTable,
    lookback_secs: u64,
) -> String {
    names_program(target.recent(lookback_secs), &[], fields.local_service)
}

pub fn span_names_query(
    service: &str,
    target: &SearchTarget,
    fields: &FieldTable,
    lookback_secs: u64,
) -> String {
    let base = format!(
        "{} {}=\"{service}\"",
        target.recent(lookback_secs),
        fields.local_service
    );
    names_program(base, &[], fields.span_name)
}

/// Remote names. The otel layout derives them from span attributes with
/// the same chain the dependency program uses.
pub fn remote_service_names_query(
    service: &str,
    target: &SearchTarget,
    fields: &FieldTable,
    lookback_secs: u64,
) -> String {
    let base = format!(
        "{} {}=\"{service}\"",
        target.recent(lookback_secs),
        fields.local_service
    );
    if fields.derived_remote_names {
        let mut derive = vec![SPAN_ATTRIBUTES.to_string()];
        derive.extend(remote_identity_stages("remoteServiceName"));
        names_program(base, &derive, "remoteServiceName")
    } else {
        names_program(base, &[], fields.remote_service)
    }
}

fn names_program(base: String, derive: &[String], field: &str) -> String {
    let mut stages = vec![base];
    stages.extend(derive.iter().cloned());
    stages.push(format!("table {field}"));
    stages.push(format!("dedup {field}"));
    stages.join(STAGE_SEPARATOR)
}

const RESOURCE_ATTRIBUTES: &str = "spath path=resource.attributes{} output=attributesmv";
const SPAN_ATTRIBUTES: &str = "spath path=scopeSpans{}.spans{}.attributes{} output=scopeSpansmv";
pub const KIND_FIELD: &str = "scopeSpans{}.spans{}.kind";

/// Extracts the attribute named `key` from `mv` into `output`.
fn attribute_stages(mv: &str, key: &str, tag: &str, output: &str) -> [String; 3] {
    [
        format!("eval index{tag}=mvfind({mv}, \"{key}\")"),
        format!("eval {tag}json=mvindex({mv},index{tag})"),
        format!("spath path=value.stringValue input={tag}json output={output}"),
    ]
}

/// `output = coalesce(db.name, last segment of url.full, messaging destination)`.
fn remote_identity_stages(output: &str) -> Vec<String> {
    let mut stages = Vec::new();
    stages.extend(attribute_stages("scopeSpansmv", "db.name", "db", "dbname"));
    stages.extend(attribute_stages("scopeSpansmv", "url.full", "url", "url"));
    stages.push("eval urlsvc=mvindex(split(url,\"/\"),-1)".to_string());
    stages.extend(attribute_stages(
        "scopeSpansmv",
        "messaging.destination.name",
        "msg",
        "msg",
    ));
    stages.push(format!("eval {output}=coalesce(dbname,urlsvc,msg)"));
    stages
}

/// Service links from client, producer and consumer spans in `[start, end]`.
pub fn dependencies_query(start_ms: u64, end_ms: u64, target: &SearchTarget) -> String {
    let mut stages = vec![
        format!(
            "{} \"{KIND_FIELD}\" IN (3,4,5)",
            target.windowed(start_ms, end_ms)
        ),
        RESOURCE_ATTRIBUTES.to_string(),
        SPAN_ATTRIBUTES.to_string(),
    ];
    stages.extend(attribute_stages(
        "attributesmv",
        "service.name",
        "sname",
        "parent",
    ));
    stages.extend(remote_identity_stages("child"));
    stages.push(format!(
        "stats count as callcount by parent child \"{KIND_FIELD}\""
    ));
    stages.push(format!("rename \"{KIND_FIELD}\" as kind"));
    stages.join(STAGE_SEPARATOR)
}
