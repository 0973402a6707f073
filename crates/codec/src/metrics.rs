//! OTLP metrics as stored by the collector: one `ResourceMetrics` JSON record
//! per metric, keeping the resource and scope it was reported under.

use opentelemetry_proto::tonic::common::v1::KeyValue;
use opentelemetry_proto::tonic::metrics::v1::exponential_histogram_data_point::Buckets;
use opentelemetry_proto::tonic::metrics::v1::{
    ExponentialHistogramDataPoint, HistogramDataPoint, Metric, NumberDataPoint, ResourceMetrics,
    ScopeMetrics, SummaryDataPoint, metric, number_data_point,
};
use serde_json::{Map, Value, json};

use crate::proto::{key_values, scope_to_json};

/// Splits `rm` so every metric travels in its own `ResourceMetrics`.
pub fn split_resource_metrics(rm: &ResourceMetrics) -> Vec<ResourceMetrics> {
    let mut out = Vec::new();
    for sm in &rm.scope_metrics {
        for metric in &sm.metrics {
            out.push(ResourceMetrics {
                resource: rm.resource.clone(),
                scope_metrics: vec![ScopeMetrics {
                    scope: sm.scope.clone(),
                    metrics: vec![metric.clone()],
                    schema_url: sm.schema_url.clone(),
                }],
                schema_url: rm.schema_url.clone(),
            });
        }
    }
    out
}

/// OTLP/JSON form of `rm`, with the same conventions as
/// [`resource_spans_to_json`](crate::resource_spans_to_json). Exemplars are
/// dropped.
pub fn resource_metrics_to_json(rm: &ResourceMetrics) -> Value {
    let mut out = Map::new();
    if let Some(resource) = &rm.resource {
        out.insert(
            "resource".to_string(),
            json!({ "attributes": key_values(&resource.attributes) }),
        );
    }
    let scope_metrics: Vec<Value> = rm
        .scope_metrics
        .iter()
        .map(|sm| {
            let mut scope = Map::new();
            if let Some(s) = &sm.scope {
                scope.insert("scope".to_string(), scope_to_json(s));
            }
            scope.insert(
                "metrics".to_string(),
                Value::Array(sm.metrics.iter().map(metric_to_json).collect()),
            );
            Value::Object(scope)
        })
        .collect();
    out.insert("scopeMetrics".to_string(), Value::Array(scope_metrics));
    if !rm.schema_url.is_empty() {
        out.insert("schemaUrl".to_string(), Value::String(rm.schema_url.clone()));
    }
    Value::Object(out)
}

fn metric_to_json(metric: &Metric) -> Value {
    let mut out = Map::new();
    out.insert("name".to_string(), Value::String(metric.name.clone()));
    if !metric.description.is_empty() {
        out.insert(
            "description".to_string(),
            Value::String(metric.description.clone()),
        );
    }
    if !metric.unit.is_empty() {
        out.insert("unit".to_string(), Value::String(metric.unit.clone()));
    }
    let (key, data) = match &metric.data {
        Some(metric::Data::Gauge(g)) => (
            "gauge",
            json!({ "dataPoints": g.data_points.iter().map(number_point).collect::<Vec<_>>() }),
        ),
        Some(metric::Data::Sum(s)) => (
            "sum",
            json!({
                "dataPoints": s.data_points.iter().map(number_point).collect::<Vec<_>>(),
                "aggregationTemporality": s.aggregation_temporality,
                "isMonotonic": s.is_monotonic,
            }),
        ),
        Some(metric::Data::Histogram(h)) => (
            "histogram",
            json!({
                "dataPoints": h.data_points.iter().map(histogram_point).collect::<Vec<_>>(),
                "aggregationTemporality": h.aggregation_temporality,
            }),
        ),
        Some(metric::Data::ExponentialHistogram(h)) => (
            "exponentialHistogram",
            json!({
                "dataPoints": h.data_points.iter().map(exponential_point).collect::<Vec<_>>(),
                "aggregationTemporality": h.aggregation_temporality,
            }),
        ),
        Some(metric::Data::Summary(s)) => (
            "summary",
            json!({ "dataPoints": s.data_points.iter().map(summary_point).collect::<Vec<_>>() }),
        ),
        None => return Value::Object(out),
    };
    out.insert(key.to_string(), data);
    Value::Object(out)
}

fn point_base(attrs: &[KeyValue], start: u64, time: u64) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("attributes".to_string(), key_values(attrs));
    if start != 0 {
        out.insert("startTimeUnixNano".to_string(), Value::String(start.to_string()));
    }
    out.insert("timeUnixNano".to_string(), Value::String(time.to_string()));
    out
}

fn number_point(p: &NumberDataPoint) -> Value {
    let mut out = point_base(&p.attributes, p.start_time_unix_nano, p.time_unix_nano);
    match p.value {
        Some(number_data_point::Value::AsDouble(d)) => {
            out.insert("asDouble".to_string(), json!(d));
        }
        Some(number_data_point::Value::AsInt(i)) => {
            out.insert("asInt".to_string(), Value::String(i.to_string()));
        }
        None => {}
    }
    Value::Object(out)
}

fn histogram_point(p: &HistogramDataPoint) -> Value {
    let mut out = point_base(&p.attributes, p.start_time_unix_nano, p.time_unix_nano);
    out.insert("count".to_string(), Value::String(p.count.to_string()));
    if let Some(sum) = p.sum {
        out.insert("sum".to_string(), json!(sum));
    }
    out.insert("bucketCounts".to_string(), counts(&p.bucket_counts));
    out.insert("explicitBounds".to_string(), json!(p.explicit_bounds));
    insert_min_max(&mut out, p.min, p.max);
    Value::Object(out)
}

fn exponential_point(p: &ExponentialHistogramDataPoint) -> Value {
    let mut out = point_base(&p.attributes, p.start_time_unix_nano, p.time_unix_nano);
    out.insert("count".to_string(), Value::String(p.count.to_string()));
    if let Some(sum) = p.sum {
        out.insert("sum".to_string(), json!(sum));
    }
    out.insert("scale".to_string(), json!(p.scale));
    out.insert("zeroCount".to_string(), Value::String(p.zero_count.to_string()));
    for (key, buckets) in [("positive", &p.positive), ("negative", &p.negative)] {
        if let Some(b) = buckets {
            out.insert(key.to_string(), buckets_to_json(b));
        }
    }
    insert_min_max(&mut out, p.min, p.max);
    Value::Object(out)
}

fn summary_point(p: &SummaryDataPoint) -> Value {
    let mut out = point_base(&p.attributes, p.start_time_unix_nano, p.time_unix_nano);
    out.insert("count".to_string(), Value::String(p.count.to_string()));
    out.insert("sum".to_string(), json!(p.sum));
    let quantiles: Vec<Value> = p
        .quantile_values
        .iter()
        .map(|q| json!({ "quantile": q.quantile, "value": q.value }))
        .collect();
    out.insert("quantileValues".to_string(), Value::Array(quantiles));
    Value::Object(out)
}

fn buckets_to_json(b: &Buckets) -> Value {
    json!({ "offset": b.offset, "bucketCounts": counts(&b.bucket_counts) })
}

fn counts(values: &[u64]) -> Value {
    Value::Array(values.iter().map(|c| Value::String(c.to_string())).collect())
}

fn insert_min_max(out: &mut Map<String, Value>, min: Option<f64>, max: Option<f64>) {
    if let Some(min) = min {
        out.insert("min".to_string(), json!(min));
    }
    if let Some(max) = max {
        out.insert("max".to_string(), json!(max));
    }
}
