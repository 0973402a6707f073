use serde_json::Value;
use tracestash_core::Result;
use tracestash_core::model::Span;

use crate::SpanDecoder;
use crate::collector::kind_from_name;
use crate::json::{
    self, Object, as_object, decode_err, duration_micros, lenient_u64, nanos_to_micros, object,
    string, stringify,
};

/// A span flattened into one object with snake_case keys, as written by
/// HTTP event collector exporters.
#[derive(Debug, Clone, Copy, Default)]
pub struct OtlpFlatDecoder;

impl OtlpFlatDecoder {
    /// Accepts a single span object or an array of them.
    pub fn decode_value(&self, value: &Value) -> Result<Vec<Span>> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| decode_span(as_object(item, "span")?))
                .collect(),
            other => Ok(vec![decode_span(as_object(other, "span")?)?]),
        }
    }
}

impl SpanDecoder for OtlpFlatDecoder {
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

fn decode_span(obj: &Object) -> Result<Span> {
    let mut builder = Span::builder();

    let trace_id = string(obj, "trace_id")?.ok_or_else(|| decode_err("span is missing trace_id"))?;
    let span_id = string(obj, "span_id")?.ok_or_else(|| decode_err("span is missing span_id"))?;
    builder.trace_id(trace_id).id(span_id);

    let parent = match string(obj, "parent_span_id")? {
        Some(p) => Some(p),
        None => string(obj, "parentSpanId")?,
    };
    if let Some(parent) = parent {
        builder.parent_id(parent);
    }
    if let Some(name) = string(obj, "name")? {
        builder.name(name);
    }
    builder.kind(string(obj, "kind")?.and_then(kind_from_name));

    let start = lenient_u64(obj, "start_time")?.unwrap_or(0);
    builder.timestamp(nanos_to_micros(start));
    if let Some(d) = duration_micros(start, lenient_u64(obj, "end_time")?) {
        builder.duration(d);
    }

    for key in ["attributes", "status"] {
        if let Some(map) = object(obj, key)? {
            for (k, v) in map {
                builder.put_tag(k.as_str(), stringify(v));
            }
        }
    }

    json::build(&builder)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tracestash_core::model::Kind;

    use super::*;

    fn flat() -> Value {
        json!({
            "trace_id": "4bf92f3577b34da6a3ce929d0e0e4736",
            "span_id": "00f067aa0ba902b7",
            "parent_span_id": "53995c3f42cd8ad8",
            "name": "SELECT orders",
            "kind": "SPAN_KIND_CLIENT",
            "start_time": 1700000000000000000u64,
            "end_time": "1700000000002500000",
            "attributes": {"db.system": "postgresql", "db.rows": 12, "cached": false},
            "status": {"code": "STATUS_CODE_OK"},
            "resource": {"service.name": "orders"}
        })
    }

    #[test]
    fn decodes_flat_span() {
        let span = OtlpFlatDecoder.decode_value(&flat()).unwrap().remove(0);
        assert_eq!(span.parent_id(), Some("53995c3f42cd8ad8"));
        assert_eq!(span.kind(), Some(Kind::Client));
        assert_eq!(span.timestamp(), Some(1_700_000_000_000_000));
        assert_eq!(span.duration(), Some(2_500));
        assert_eq!(span.tags().get("db.rows").map(String::as_str), Some("12"));
        assert_eq!(span.tags().get("cached").map(String::as_str), Some("false"));
        assert_eq!(span.tags().get("code").map(String::as_str), Some("STATUS_CODE_OK"));
        assert!(span.local_endpoint().is_none());
    }

    #[test]
    fn accepts_arrays_and_camel_case_parent() {
        let mut second = flat();
        second["span_id"] = json!("00f067aa0ba902b8");
        second.as_object_mut().unwrap().remove("parent_span_id");
        second["parentSpanId"] = json!("00f067aa0ba902b7");
        let spans = OtlpFlatDecoder
            .decode_list(json!([flat(), second]).to_string().as_bytes())
            .unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].parent_id(), Some("00f067aa0ba902b7"));
    }

    #[test]
    fn unknown_kinds_are_unspecified() {
        let mut doc = flat();
        doc["kind"] = json!("SPAN_KIND_INTERNAL");
        assert_eq!(OtlpFlatDecoder.decode_value(&doc).unwrap()[0].kind(), None);
    }

    #[test]
    fn missing_ids_fail() {
        assert!(OtlpFlatDecoder.decode_one(br#"{"span_id":"1"}"#).is_err());
        let bad_attributes = br#"{"trace_id":"1","span_id":"1","attributes":[]}"#;
        assert!(OtlpFlatDecoder.decode_one(bad_attributes).is_err());
    }
}
