use chrono::{TimeZone, Utc};
use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue, any_value};
use opentelemetry_proto::tonic::metrics::v1::{
    Gauge, Metric, NumberDataPoint, ResourceMetrics, ScopeMetrics, Sum, metric, number_data_point,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span as OtlpSpan, span};
use serde_json::{Value, json};
use tracestash_core::model::{Endpoint, Kind, Span};

mod splunk;

pub use splunk::{FakeSplunk, SESSION_KEY, SearchRecord, StreamedBatch};

/// 2026-02-01T00:00:00Z in epoch microseconds.
pub fn base_micros() -> u64 {
    Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0)
        .unwrap()
        .timestamp_micros() as u64
}

/// A server span and the client call it makes to redis.
pub fn sample_trace(trace_id: &str) -> Vec<Span> {
    let base = base_micros();
    let api = Endpoint::builder().service_name("api").ip("10.0.0.7").build();

    let root = Span::builder()
        .trace_id(trace_id)
        .id("a1")
        .kind(Some(Kind::Server))
        .name("GET /v1/orders")
        .timestamp(base)
        .duration(1_800_000)
        .local_endpoint(api.clone())
        .put_tag("http.method", "GET")
        .put_tag("error", "deadline exceeded")
        .build()
        .unwrap();

    let child = Span::builder()
        .trace_id(trace_id)
        .parent_id("a1")
        .id("b2")
        .kind(Some(Kind::Client))
        .name("cache.get")
        .timestamp(base + 900_000)
        .duration(700_000)
        .local_endpoint(api)
        .remote_endpoint(Endpoint::builder().service_name("redis").port(6379).build())
        .add_annotation(base + 950_000, "retrying")
        .build()
        .unwrap();

    vec![root, child]
}

/// A search result row whose `_raw` holds `lines`, one event per line.
pub fn raw_row(lines: &[String]) -> Value {
    json!({ "_raw": lines.join("\n") })
}

fn string_attr(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_string())),
        }),
    }
}

/// `checkout` querying the `orders` database, as an OTLP batch.
pub fn sample_resource_spans(trace_id: [u8; 16]) -> ResourceSpans {
    let start = base_micros() * 1_000;
    ResourceSpans {
        resource: Some(Resource {
            attributes: vec![string_attr("service.name", "checkout")],
            ..Default::default()
        }),
        scope_spans: vec![ScopeSpans {
            spans: vec![OtlpSpan {
                trace_id: trace_id.to_vec(),
                span_id: vec![0, 0, 0, 0, 0, 0, 0, 7],
                name: "SELECT orders".to_string(),
                kind: span::SpanKind::Client as i32,
                start_time_unix_nano: start,
                end_time_unix_nano: start + 2_500_000,
                attributes: vec![
                    string_attr("db.name", "orders"),
                    string_attr("server.address", "10.1.2.3"),
                ],
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// `checkout` reporting a cpu gauge and a request counter in one scope.
pub fn sample_resource_metrics() -> ResourceMetrics {
    let time = base_micros() * 1_000;
    let point = |value| NumberDataPoint {
        time_unix_nano: time,
        value: Some(value),
        ..Default::default()
    };
    ResourceMetrics {
        resource: Some(Resource {
            attributes: vec![string_attr("service.name", "checkout")],
            ..Default::default()
        }),
        scope_metrics: vec![ScopeMetrics {
            metrics: vec![
                Metric {
                    name: "process.cpu.utilization".to_string(),
                    data: Some(metric::Data::Gauge(Gauge {
                        data_points: vec![point(number_data_point::Value::AsDouble(0.4))],
                    })),
                    ..Default::default()
                },
                Metric {
                    name: "http.server.requests".to_string(),
                    data: Some(metric::Data::Sum(Sum {
                        data_points: vec![point(number_data_point::Value::AsInt(17))],
                        aggregation_temporality: 2,
                        is_monotonic: true,
                    })),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }],
        ..Default::default()
    }
}
