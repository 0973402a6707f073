//! OTLP JSON as exported by an OpenTelemetry collector: one `ResourceSpans`
//! object per record, or a whole export request carrying `resourceSpans`.
//!
//! The document is parsed into a generic tree and projected onto the span
//! model. Keys match case-insensitively and unknown keys are ignored.

use serde_json::Value;
use tracestash_core::Result;
use tracestash_core::model::{Endpoint, Kind, Span};

use crate::SpanDecoder;
use crate::json::{
    self, Object, array, as_object, decode_err, duration_micros, lenient_u64, nanos_to_micros,
    object, string,
};

const PORT_KEYS: &[&str] = &[
    "server.port",
    "network.peer.port",
    "server.socket.port",
    "net.sock.peer.port",
];

const ADDRESS_KEYS: &[&str] = &[
    "server.address",
    "net.peer.name",
    "network.peer.address",
    "server.socket.domain",
    "server.socket.address",
    "net.sock.peer.name",
    "net.sock.peer.addr",
    "peer.hostname",
    "peer.address",
];

const UNKNOWN_SERVICE: &str = "unknown";

#[derive(Debug, Clone, Copy, Default)]
pub struct OtlpCollectorDecoder;

impl OtlpCollectorDecoder {
    /// Projects an already parsed document.
    pub fn decode_value(&self, value: &Value) -> Result<Vec<Span>> {
        let root = as_object(value, "record")?;
        if json::has(root, "resourceSpans") {
            let mut spans = Vec::new();
            for rs in array(root, "resourceSpans")? {
                spans.extend(decode_resource_spans(as_object(rs, "resourceSpans")?)?);
            }
            return Ok(spans);
        }
        decode_resource_spans(root)
    }
}

impl SpanDecoder for OtlpCollectorDecoder {
    fn decode_one(&self, raw: &[u8]) -> Result<Span> {
        self.decode_list(raw)?
            .into_iter()
            .next()
            .ok_or_else(|| decode_err("record holds no spans"))
    }

    fn decode_list(&self, raw: &[u8]) -> Result<Vec<Span>> {
        self.decode_value(&json::parse(raw)?)
    }
}

fn decode_resource_spans(rs: &Object) -> Result<Vec<Span>> {
    let service = match object(rs, "resource")? {
        Some(resource) => attributes(resource)?
            .into_iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("service.name"))
            .map(|(_, v)| v.to_tag()),
        None => None,
    };
    let local = service.map(|name| Endpoint::builder().service_name(name).build());

    let mut spans = Vec::new();
    for scope in array(rs, "scopeSpans")? {
        let scope = as_object(scope, "scopeSpans")?;
        for span in array(scope, "spans")? {
            spans.push(decode_span(as_object(span, "span")?, local.as_ref())?);
        }
    }
    Ok(spans)
}

fn decode_span(obj: &Object, local: Option<&Endpoint>) -> Result<Span> {
    let mut builder = Span::builder();

    let trace_id = string(obj, "traceId")?.ok_or_else(|| decode_err("span is missing traceId"))?;
    let span_id = string(obj, "spanId")?.ok_or_else(|| decode_err("span is missing spanId"))?;
    builder.trace_id(trace_id).id(span_id);
    if let Some(parent) = string(obj, "parentSpanId")? {
        builder.parent_id(parent);
    }
    if let Some(name) = string(obj, "name")? {
        builder.name(name);
    }

    let kind = match json::get(obj, "kind") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => kind_from_name(s),
        Some(v) => kind_from_number(
            json::as_u64(v).ok_or_else(|| decode_err(format!("invalid span kind {v}")))?,
        ),
    };
    builder.kind(kind);

    let start = lenient_u64(obj, "startTimeUnixNano")?.unwrap_or(0);
    let end = lenient_u64(obj, "endTimeUnixNano")?;
    builder.timestamp(nanos_to_micros(start));
    if let Some(d) = duration_micros(start, end) {
        builder.duration(d);
    }

    if let Some(ep) = local {
        builder.local_endpoint(ep.clone());
    }

    let attrs = attributes(obj)?;
    let mut remote = RemoteFields::default();
    for (key, value) in &attrs {
        remote.observe(key, value);
        builder.put_tag(key.as_str(), value.to_tag());
    }

    for event in array(obj, "events")? {
        let event = as_object(event, "event")?;
        if let Some(name) = string(event, "name")? {
            let at = lenient_u64(event, "timeUnixNano")?.unwrap_or(0);
            builder.add_annotation(nanos_to_micros(at), name);
        }
    }

    if let Some(status) = object(obj, "status")? {
        let is_error = match json::get(status, "code") {
            Some(Value::String(s)) => s.eq_ignore_ascii_case("STATUS_CODE_ERROR"),
            Some(v) => json::as_u64(v) == Some(2),
            None => false,
        };
        if is_error {
            let message = string(status, "message")?.unwrap_or_default();
            builder.put_tag("error", if message.is_empty() { "true" } else { message });
        }
    }

    if matches!(kind, Some(Kind::Client | Kind::Producer | Kind::Consumer)) {
        builder.remote_endpoint(remote.into_endpoint());
    }

    json::build(&builder)
}

fn kind_from_number(kind: u64) -> Option<Kind> {
    match kind {
        2 => Some(Kind::Server),
        3 => Some(Kind::Client),
        4 => Some(Kind::Producer),
        5 => Some(Kind::Consumer),
        _ => None,
    }
}

pub(crate) fn kind_from_name(kind: &str) -> Option<Kind> {
    match kind {
        "SPAN_KIND_SERVER" => Some(Kind::Server),
        "SPAN_KIND_CLIENT" => Some(Kind::Client),
        "SPAN_KIND_PRODUCER" => Some(Kind::Producer),
        "SPAN_KIND_CONSUMER" => Some(Kind::Consumer),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum AttrValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Double(f64),
}

impl AttrValue {
    fn to_tag(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Double(d) => d.to_string(),
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    fn as_port(&self) -> Option<u16> {
        match self {
            Self::Int(i) => u16::try_from(*i).ok(),
            Self::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Reads `attributes: [{key, value: {stringValue|intValue|boolValue|doubleValue}}]`.
/// Array, map and bytes values are skipped.
fn attributes(obj: &Object) -> Result<Vec<(String, AttrValue)>> {
    let mut out = Vec::new();
    for kv in array(obj, "attributes")? {
        let kv = as_object(kv, "attribute")?;
        let Some(key) = string(kv, "key")? else {
            continue;
        };
        let Some(value) = object(kv, "value")? else {
            continue;
        };
        match any_value(value)? {
            Some(v) => out.push((key.to_string(), v)),
            None => tracing::trace!(key, "skipping non-scalar attribute"),
        }
    }
    Ok(out)
}

fn any_value(value: &Object) -> Result<Option<AttrValue>> {
    if let Some(s) = string(value, "stringValue")? {
        return Ok(Some(AttrValue::Str(s.to_string())));
    }
    if let Some(v) = json::get(value, "intValue") {
        let parsed = match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        return parsed
            .map(|i| Some(AttrValue::Int(i)))
            .ok_or_else(|| decode_err(format!("invalid intValue {v}")));
    }
    if let Some(v) = json::get(value, "boolValue") {
        return v
            .as_bool()
            .map(|b| Some(AttrValue::Bool(b)))
            .ok_or_else(|| decode_err(format!("invalid boolValue {v}")));
    }
    if let Some(v) = json::get(value, "doubleValue") {
        let parsed = match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        return parsed
            .map(|d| Some(AttrValue::Double(d)))
            .ok_or_else(|| decode_err(format!("invalid doubleValue {v}")));
    }
    Ok(None)
}

/// Remote endpoint evidence gathered from well-known attribute keys.
#[derive(Debug, Default)]
struct RemoteFields {
    port: Option<u16>,
    address: Option<String>,
    db_name: Option<String>,
    peer_service: Option<String>,
    url_service: Option<String>,
    destination: Option<String>,
}

impl RemoteFields {
    fn observe(&mut self, key: &str, value: &AttrValue) {
        if matches_any(PORT_KEYS, key) {
            if let Some(port) = value.as_port() {
                self.port = Some(port);
            }
            return;
        }
        if matches_any(ADDRESS_KEYS, key) {
            if let Some(addr) = value.as_str() {
                self.address = Some(addr.to_string());
            }
            return;
        }
        let Some(text) = value.as_str() else {
            return;
        };
        match key.to_ascii_lowercase().as_str() {
            "db.name" => self.db_name = Some(text.to_string()),
            "peer.service" => self.peer_service = Some(text.to_string()),
            "url.full" => self.url_service = last_path_segment(text),
            "messaging.destination.name" => self.destination = Some(text.to_string()),
            _ => {}
        }
    }

    fn service_name(&self) -> &str {
        self.db_name
            .as_deref()
            .or(self.peer_service.as_deref())
            .or(self.url_service.as_deref())
            .or(self.destination.as_deref())
            .unwrap_or(UNKNOWN_SERVICE)
    }

    fn into_endpoint(self) -> Endpoint {
        let mut builder = Endpoint::builder();
        builder.service_name(self.service_name());
        if let Some(addr) = &self.address {
            builder.ip(addr);
        }
        if let Some(port) = self.port {
            builder.port(port);
        }
        builder.build()
    }
}

fn matches_any(keys: &[&str], key: &str) -> bool {
    keys.iter().any(|k| k.eq_ignore_ascii_case(key))
}

fn last_path_segment(url: &str) -> Option<String> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(kind: u64, attrs: Value) -> Value {
        json!({
            "resource": {
                "attributes": [
                    {"key": "service.name", "value": {"stringValue": "Checkout"}}
                ]
            },
            "scopeSpans": [{
                "scope": {"name": "io.opentelemetry.http"},
                "spans": [{
                    "traceId": "5B8EFFF798038103D269B633813FC60C",
                    "spanId": "EEE19B7EC3C1B174",
                    "parentSpanId": "",
                    "name": "POST /charge",
                    "kind": kind,
                    "startTimeUnixNano": "1544712660000000000",
                    "endTimeUnixNano": 1544712661000000000u64,
                    "attributes": attrs
                }]
            }]
        })
    }

    #[test]
    fn projects_resource_and_span_fields() {
        let spans = OtlpCollectorDecoder
            .decode_value(&record(2, json!([])))
            .unwrap();
        let span = &spans[0];
        assert_eq!(span.trace_id(), "5b8efff798038103d269b633813fc60c");
        assert_eq!(span.id(), "eee19b7ec3c1b174");
        assert_eq!(span.parent_id(), None);
        assert_eq!(span.kind(), Some(Kind::Server));
        assert_eq!(span.local_service_name(), Some("checkout"));
        assert_eq!(span.timestamp(), Some(1_544_712_660_000_000));
        assert_eq!(span.duration(), Some(1_000_000));
        assert!(span.remote_endpoint().is_none());
    }

    #[test]
    fn client_remote_service_comes_from_last_url_segment() {
        let attrs = json!([
            {"key": "url.full", "value": {"stringValue": "http://billing:8080/api/charge"}},
            {"key": "server.port", "value": {"intValue": "8080"}},
            {"key": "server.address", "value": {"stringValue": "10.1.2.3"}},
            {"key": "http.status_code", "value": {"intValue": 200}},
            {"key": "retry", "value": {"boolValue": false}}
        ]);
        let span = &OtlpCollectorDecoder.decode_value(&record(3, attrs)).unwrap()[0];
        let remote = span.remote_endpoint().unwrap();
        assert_eq!(remote.service_name(), Some("charge"));
        assert_eq!(remote.port(), Some(8080));
        assert_eq!(remote.ipv4().map(|ip| ip.to_string()), Some("10.1.2.3".to_string()));
        assert_eq!(span.tags().get("http.status_code").map(String::as_str), Some("200"));
        assert_eq!(span.tags().get("retry").map(String::as_str), Some("false"));
    }

    #[test]
    fn db_name_outranks_other_identities() {
        let attrs = json!([
            {"key": "peer.service", "value": {"stringValue": "pg-proxy"}},
            {"key": "db.name", "value": {"stringValue": "orders"}}
        ]);
        let span = &OtlpCollectorDecoder.decode_value(&record(3, attrs)).unwrap()[0];
        assert_eq!(span.remote_service_name(), Some("orders"));
    }

    #[test]
    fn consumer_gets_remote_endpoint_but_server_does_not() {
        let attrs = json!([
            {"key": "messaging.destination.name", "value": {"stringValue": "invoices"}}
        ]);
        let consumer = &OtlpCollectorDecoder
            .decode_value(&record(5, attrs.clone()))
            .unwrap()[0];
        assert_eq!(consumer.kind(), Some(Kind::Consumer));
        assert_eq!(consumer.remote_service_name(), Some("invoices"));

        let server = &OtlpCollectorDecoder.decode_value(&record(2, attrs)).unwrap()[0];
        assert!(server.remote_endpoint().is_none());
    }

    #[test]
    fn producer_without_identity_is_unknown() {
        let span = &OtlpCollectorDecoder
            .decode_value(&record(4, json!([])))
            .unwrap()[0];
        assert_eq!(span.remote_service_name(), Some("unknown"));
    }

    #[test]
    fn internal_and_unspecified_kinds_map_to_none() {
        for kind in [0, 1] {
            let span = &OtlpCollectorDecoder
                .decode_value(&record(kind, json!([])))
                .unwrap()[0];
            assert_eq!(span.kind(), None);
        }
    }

    #[test]
    fn accepts_export_request_and_mixed_case_keys() {
        let doc = json!({
            "ResourceSpans": [{
                "scopeSpans": [{
                    "spans": [
                        {"TraceID": "1", "SpanId": "a", "name": "one"},
                        {"traceId": "1", "spanId": "b", "name": "two"}
                    ]
                }]
            }]
        });
        let spans = OtlpCollectorDecoder
            .decode_list(doc.to_string().as_bytes())
            .unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].name(), Some("two"));
        assert_eq!(spans[0].local_endpoint(), None);
    }

    #[test]
    fn error_status_becomes_tag() {
        let mut doc = record(3, json!([]));
        doc["scopeSpans"][0]["spans"][0]["status"] = json!({"code": 2, "message": "timeout"});
        let span = &OtlpCollectorDecoder.decode_value(&doc).unwrap()[0];
        assert_eq!(span.tags().get("error").map(String::as_str), Some("timeout"));
    }

    #[test]
    fn attribute_keys_match_ignoring_case() {
        let mut doc = record(
            3,
            json!([
                {"key": "URL.FULL", "value": {"stringValue": "https://host/db/orders"}},
                {"key": "Server.Port", "value": {"intValue": 5432}}
            ]),
        );
        doc["resource"]["attributes"][0]["key"] = json!("Service.Name");
        let span = &OtlpCollectorDecoder.decode_value(&doc).unwrap()[0];
        assert_eq!(span.local_service_name(), Some("checkout"));
        let remote = span.remote_endpoint().unwrap();
        assert_eq!(remote.service_name(), Some("orders"));
        assert_eq!(remote.port(), Some(5432));
    }

    #[test]
    fn events_become_annotations() {
        let mut doc = record(2, json!([]));
        doc["scopeSpans"][0]["spans"][0]["events"] = json!([
            {"timeUnixNano": "1544712660500000000", "name": "cache miss"},
            {"timeUnixNano": "1544712660600000000"}
        ]);
        let span = &OtlpCollectorDecoder.decode_value(&doc).unwrap()[0];
        assert_eq!(span.annotations().len(), 1);
        assert_eq!(span.annotations()[0].timestamp, 1_544_712_660_500_000);
        assert_eq!(span.annotations()[0].value, "cache miss");
    }

    #[test]
    fn decode_one_fails_on_empty_batch() {
        assert!(OtlpCollectorDecoder.decode_one(br#"{"scopeSpans":[]}"#).is_err());
    }

    #[test]
    fn malformed_records_fail() {
        assert!(OtlpCollectorDecoder.decode_list(b"{").is_err());
        assert!(OtlpCollectorDecoder
            .decode_list(br#"{"scopeSpans":{"spans":[]}}"#)
            .is_err());
        assert!(OtlpCollectorDecoder
            .decode_list(br#"{"scopeSpans":[{"spans":[{"spanId":"a"}]}]}"#)
            .is_err());
    }
}
