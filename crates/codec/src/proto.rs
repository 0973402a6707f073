use opentelemetry_proto::tonic::common::v1::any_value::Value as ProtoValue;
use opentelemetry_proto::tonic::common::v1::{AnyValue, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::span::{Event, SpanKind};
use opentelemetry_proto::tonic::trace::v1::status::StatusCode;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span as ProtoSpan, Status};
use prost::Message;
use serde_json::{Map, Value, json};
use tracestash_core::Result;
use tracestash_core::model::{Kind, Span};

use crate::collector::OtlpCollectorDecoder;
use crate::json::decode_err;
use crate::{SpanDecoder, SpanEncoder};

const SCOPE_NAME: &str = "tracestash";

/// Binary OTLP `ResourceSpans`. The message is bridged to its JSON form and
/// projected by [`OtlpCollectorDecoder`], so both encodings agree.
#[derive(Debug, Clone, Copy, Default)]
pub struct OtlpProtoDecoder;

impl SpanDecoder for OtlpProtoDecoder {
    fn decode_one(&self, raw: &[u8]) -> Result<Span> {
        self.decode_list(raw)?
            .into_iter()
            .next()
            .ok_or_else(|| decode_err("resource spans hold no spans"))
    }

    fn decode_list(&self, raw: &[u8]) -> Result<Vec<Span>> {
        let message = ResourceSpans::decode(raw)
            .map_err(|e| decode_err(format!("invalid protobuf resource spans: {e}")))?;
        OtlpCollectorDecoder.decode_value(&resource_spans_to_json(&message))
    }
}

/// Writes each span as its own OTLP/JSON `ResourceSpans` record, the shape
/// the collector stores, so both write paths read back the same way.
///
/// The local service becomes the `service.name` resource attribute. The
/// remote endpoint is carried as `peer.service`, `server.address` and
/// `server.port` unless a tag already holds that key, and an `error` tag
/// becomes an error status.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceSpansEncoder;

impl SpanEncoder for ResourceSpansEncoder {
    fn encode(&self, span: &Span) -> Result<Vec<u8>> {
        let value = resource_spans_to_json(&span_to_resource_spans(span)?);
        serde_json::to_vec(&value).map_err(|e| decode_err(format!("encoding span: {e}")))
    }

    fn encode_list(&self, spans: &[Span]) -> Result<Vec<u8>> {
        let records = spans
            .iter()
            .map(|s| Ok(resource_spans_to_json(&span_to_resource_spans(s)?)))
            .collect::<Result<Vec<Value>>>()?;
        serde_json::to_vec(&json!({ "resourceSpans": records }))
            .map_err(|e| decode_err(format!("encoding spans: {e}")))
    }
}

pub fn span_to_resource_spans(span: &Span) -> Result<ResourceSpans> {
    let mut attributes = Vec::new();
    let mut status = None;
    for (key, value) in span.tags() {
        if key == "error" {
            let message = if value == "true" { "" } else { value.as_str() };
            status = Some(Status {
                code: StatusCode::Error as i32,
                message: message.to_string(),
            });
        } else {
            attributes.push(key_value(key, ProtoValue::StringValue(value.clone())));
        }
    }

    if let Some(remote) = span.remote_endpoint() {
        let ip = remote
            .ipv4()
            .map(|ip| ip.to_string())
            .or_else(|| remote.ipv6().map(|ip| ip.to_string()));
        let derived = [
            ("peer.service", remote.service_name().map(|s| ProtoValue::StringValue(s.into()))),
            ("server.address", ip.map(ProtoValue::StringValue)),
            ("server.port", remote.port().map(|p| ProtoValue::IntValue(p.into()))),
        ];
        for (key, value) in derived {
            if let Some(value) = value.filter(|_| !span.tags().contains_key(key)) {
                attributes.push(key_value(key, value));
            }
        }
    }

    let start = span.timestamp().map(|ts| ts.saturating_mul(1_000));
    let end = match (span.timestamp(), span.duration()) {
        (Some(ts), Some(d)) => ts.saturating_add(d).saturating_mul(1_000),
        _ => 0,
    };
    let kind = match span.kind() {
        Some(Kind::Server) => SpanKind::Server,
        Some(Kind::Client) => SpanKind::Client,
        Some(Kind::Producer) => SpanKind::Producer,
        Some(Kind::Consumer) => SpanKind::Consumer,
        None => SpanKind::Internal,
    };
    let events = span
        .annotations()
        .iter()
        .map(|a| Event {
            time_unix_nano: a.timestamp.saturating_mul(1_000),
            name: a.value.clone(),
            ..Default::default()
        })
        .collect();

    let proto_span = ProtoSpan {
        trace_id: hex_to_bytes(span.trace_id())?,
        span_id: hex_to_bytes(span.id())?,
        parent_span_id: span.parent_id().map(hex_to_bytes).transpose()?.unwrap_or_default(),
        name: span.name().unwrap_or_default().to_string(),
        kind: kind as i32,
        start_time_unix_nano: start.unwrap_or(0),
        end_time_unix_nano: end,
        attributes,
        events,
        status,
        ..Default::default()
    };

    let resource = span.local_service_name().map(|service| Resource {
        attributes: vec![key_value("service.name", ProtoValue::StringValue(service.into()))],
        ..Default::default()
    });

    Ok(ResourceSpans {
        resource,
        scope_spans: vec![ScopeSpans {
            scope: Some(InstrumentationScope {
                name: SCOPE_NAME.to_string(),
                ..Default::default()
            }),
            spans: vec![proto_span],
            ..Default::default()
        }],
        ..Default::default()
    })
}

/// OTLP/JSON form of `rs`: lower-hex ids, nanosecond timestamps as strings,
/// `intValue` as a string. This is the record shape stored for the otel layout.
pub fn resource_spans_to_json(rs: &ResourceSpans) -> Value {
    let mut out = Map::new();
    if let Some(resource) = &rs.resource {
        out.insert(
            "resource".to_string(),
            json!({ "attributes": key_values(&resource.attributes) }),
        );
    }

    let scope_spans: Vec<Value> = rs
        .scope_spans
        .iter()
        .map(|ss| {
            let mut scope = Map::new();
            if let Some(s) = &ss.scope {
                scope.insert("scope".to_string(), scope_to_json(s));
            }
            scope.insert(
                "spans".to_string(),
                Value::Array(ss.spans.iter().map(span_to_json).collect()),
            );
            Value::Object(scope)
        })
        .collect();
    out.insert("scopeSpans".to_string(), Value::Array(scope_spans));

    if !rs.schema_url.is_empty() {
        out.insert("schemaUrl".to_string(), Value::String(rs.schema_url.clone()));
    }
    Value::Object(out)
}

fn span_to_json(span: &ProtoSpan) -> Value {
    let mut out = Map::new();
    out.insert("traceId".to_string(), Value::String(bytes_to_hex(&span.trace_id)));
    out.insert("spanId".to_string(), Value::String(bytes_to_hex(&span.span_id)));
    if !span.parent_span_id.is_empty() {
        out.insert(
            "parentSpanId".to_string(),
            Value::String(bytes_to_hex(&span.parent_span_id)),
        );
    }
    out.insert("name".to_string(), Value::String(span.name.clone()));
    out.insert("kind".to_string(), json!(span.kind));
    out.insert(
        "startTimeUnixNano".to_string(),
        Value::String(span.start_time_unix_nano.to_string()),
    );
    out.insert(
        "endTimeUnixNano".to_string(),
        Value::String(span.end_time_unix_nano.to_string()),
    );
    out.insert("attributes".to_string(), key_values(&span.attributes));
    if !span.events.is_empty() {
        let events = span
            .events
            .iter()
            .map(|e| {
                json!({
                    "timeUnixNano": e.time_unix_nano.to_string(),
                    "name": e.name,
                    "attributes": key_values(&e.attributes),
                })
            })
            .collect();
        out.insert("events".to_string(), Value::Array(events));
    }
    if let Some(status) = &span.status {
        let mut st = Map::new();
        st.insert("code".to_string(), json!(status.code));
        if !status.message.is_empty() {
            st.insert("message".to_string(), Value::String(status.message.clone()));
        }
        out.insert("status".to_string(), Value::Object(st));
    }
    Value::Object(out)
}

pub(crate) fn scope_to_json(scope: &InstrumentationScope) -> Value {
    let mut inner = Map::new();
    if !scope.name.is_empty() {
        inner.insert("name".to_string(), Value::String(scope.name.clone()));
    }
    if !scope.version.is_empty() {
        inner.insert("version".to_string(), Value::String(scope.version.clone()));
    }
    Value::Object(inner)
}

pub(crate) fn key_values(attrs: &[KeyValue]) -> Value {
    Value::Array(
        attrs
            .iter()
            .map(|kv| {
                let mut entry = Map::new();
                entry.insert("key".to_string(), Value::String(kv.key.clone()));
                if let Some(v) = kv.value.as_ref().and_then(any_value) {
                    entry.insert("value".to_string(), v);
                }
                Value::Object(entry)
            })
            .collect(),
    )
}

fn any_value(value: &AnyValue) -> Option<Value> {
    let v = match value.value.as_ref()? {
        ProtoValue::StringValue(s) => json!({ "stringValue": s }),
        ProtoValue::BoolValue(b) => json!({ "boolValue": b }),
        ProtoValue::IntValue(i) => json!({ "intValue": i.to_string() }),
        ProtoValue::DoubleValue(d) => json!({ "doubleValue": d }),
        ProtoValue::ArrayValue(arr) => {
            let values: Vec<Value> = arr.values.iter().filter_map(any_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        ProtoValue::KvlistValue(list) => {
            json!({ "kvlistValue": { "values": key_values(&list.values) } })
        }
        ProtoValue::BytesValue(b) => {
            json!({ "stringValue": String::from_utf8_lossy(b).to_string() })
        }
    };
    Some(v)
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_to_bytes(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return Err(decode_err(format!("invalid hex id {hex}")));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| decode_err(format!("invalid hex id {hex}: {e}")))
        })
        .collect()
}

fn key_value(key: &str, value: ProtoValue) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue { value: Some(value) }),
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue};
    use opentelemetry_proto::tonic::resource::v1::Resource;
    use opentelemetry_proto::tonic::trace::v1::{ScopeSpans, Status};
    use tracestash_core::model::Kind;

    use super::*;

    fn kv(key: &str, value: ProtoValue) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(AnyValue { value: Some(value) }),
        }
    }

    fn sample() -> ResourceSpans {
        ResourceSpans {
            resource: Some(Resource {
                attributes: vec![kv("service.name", ProtoValue::StringValue("api".into()))],
                ..Default::default()
            }),
            scope_spans: vec![ScopeSpans {
                spans: vec![ProtoSpan {
                    trace_id: vec![0x0a; 16],
                    span_id: vec![0x0b; 8],
                    name: "SELECT".into(),
                    kind: 3,
                    start_time_unix_nano: 1_700_000_000_000_000_000,
                    end_time_unix_nano: 1_700_000_000_004_000_000,
                    attributes: vec![
                        kv("db.name", ProtoValue::StringValue("orders".into())),
                        kv("server.port", ProtoValue::IntValue(5432)),
                    ],
                    status: Some(Status {
                        code: 2,
                        message: "deadlock".into(),
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn bridges_to_otlp_json() {
        let value = resource_spans_to_json(&sample());
        let span = &value["scopeSpans"][0]["spans"][0];
        assert_eq!(span["traceId"], "0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a");
        assert_eq!(span["startTimeUnixNano"], "1700000000000000000");
        assert_eq!(span["attributes"][1]["value"]["intValue"], "5432");
        assert!(span.get("parentSpanId").is_none());
    }

    #[test]
    fn decodes_protobuf_through_collector_projection() {
        let raw = sample().encode_to_vec();
        let span = OtlpProtoDecoder.decode_one(&raw).unwrap();
        assert_eq!(span.kind(), Some(Kind::Client));
        assert_eq!(span.local_service_name(), Some("api"));
        assert_eq!(span.remote_service_name(), Some("orders"));
        assert_eq!(span.remote_endpoint().and_then(|e| e.port()), Some(5432));
        assert_eq!(span.duration(), Some(4_000));
        assert_eq!(span.tags().get("error").map(String::as_str), Some("deadlock"));
    }

    #[test]
    fn encoded_span_reads_back_through_record_decoder() {
        let api = tracestash_core::model::Endpoint::builder()
            .service_name("api")
            .build();
        let db = tracestash_core::model::Endpoint::builder()
            .service_name("orders")
            .ip("10.1.2.3")
            .port(5432)
            .build();
        let span = Span::builder()
            .trace_id("463ac35c9f6413ad48485a3953bb6124")
            .parent_id("a1")
            .id("b2")
            .kind(Some(Kind::Client))
            .name("select")
            .timestamp(1_700_000_000_000_000)
            .duration(2_500)
            .local_endpoint(api)
            .remote_endpoint(db)
            .add_annotation(1_700_000_000_001_000, "retrying")
            .put_tag("error", "deadlock")
            .build()
            .unwrap();

        let raw = ResourceSpansEncoder.encode(&span).unwrap();
        let back = crate::OtelRecordDecoder::default().decode_one(&raw).unwrap();
        assert_eq!(back.trace_id(), span.trace_id());
        assert_eq!(back.parent_id(), Some("00000000000000a1"));
        assert_eq!(back.id(), span.id());
        assert_eq!(back.kind(), Some(Kind::Client));
        assert_eq!(back.name(), Some("select"));
        assert_eq!(back.timestamp(), span.timestamp());
        assert_eq!(back.duration(), Some(2_500));
        assert_eq!(back.local_service_name(), Some("api"));
        assert_eq!(back.remote_endpoint(), span.remote_endpoint());
        assert_eq!(back.annotations(), span.annotations());
        assert_eq!(back.tags().get("error").map(String::as_str), Some("deadlock"));
    }

    #[test]
    fn short_trace_ids_keep_their_width() {
        let span = Span::builder().trace_id("2a").id("7").build().unwrap();
        let rs = span_to_resource_spans(&span).unwrap();
        assert_eq!(rs.scope_spans[0].spans[0].trace_id.len(), 8);
        assert!(rs.resource.is_none());
        let list = ResourceSpansEncoder.encode_list(&[span.clone(), span]).unwrap();
        let spans = OtlpCollectorDecoder.decode_list(&list).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].trace_id(), "000000000000002a");
    }

    #[test]
    fn rejects_garbage() {
        assert!(OtlpProtoDecoder.decode_list(&[0xff, 0xff, 0xff]).is_err());
    }
}
