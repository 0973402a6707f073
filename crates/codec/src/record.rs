use serde_json::Value;
use tracestash_core::Result;
use tracestash_core::model::Span;

use crate::collector::OtlpCollectorDecoder;
use crate::flat::OtlpFlatDecoder;
use crate::json::{self, decode_err};
use crate::SpanDecoder;

/// Decoder for raw events in the otel layout, which may hold collector
/// `ResourceSpans` records or flattened spans depending on the exporter.
#[derive(Debug, Clone, Copy, Default)]
pub struct OtelRecordDecoder {
    collector: OtlpCollectorDecoder,
    flat: OtlpFlatDecoder,
}

impl OtelRecordDecoder {
    pub fn decode_value(&self, value: &Value) -> Result<Vec<Span>> {
        match value {
            Value::Array(items) => {
                let mut spans = Vec::new();
                for item in items {
                    spans.extend(self.decode_value(item)?);
                }
                Ok(spans)
            }
            Value::Object(obj)
                if ["resource", "scopeSpans", "resourceSpans"]
                    .iter()
                    .any(|k| json::has(obj, k)) =>
            {
                self.collector.decode_value(value)
            }
            other => self.flat.decode_value(other),
        }
    }
}

impl SpanDecoder for OtelRecordDecoder {
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

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn sniffs_record_shape() {
        let collector = json!({
            "resource": {"attributes": []},
            "scopeSpans": [{"spans": [{"traceId": "1", "spanId": "2", "name": "nested"}]}]
        });
        let flat = json!({"trace_id": "1", "span_id": "3", "name": "flat"});

        let decoder = OtelRecordDecoder::default();
        assert_eq!(decoder.decode_value(&collector).unwrap()[0].name(), Some("nested"));
        assert_eq!(decoder.decode_value(&flat).unwrap()[0].name(), Some("flat"));

        let both = decoder.decode_value(&json!([collector, flat])).unwrap();
        assert_eq!(both.len(), 2);
    }

    #[test]
    fn scalars_are_rejected() {
        assert!(OtelRecordDecoder::default().decode_list(b"42").is_err());
    }
}
