use serde_json::{Map, Value};
use tracestash_core::model::{Span, SpanBuilder};
use tracestash_core::{Result, TracestashError};

pub(crate) type Object = Map<String, Value>;

pub(crate) fn decode_err(msg: impl Into<String>) -> TracestashError {
    TracestashError::Decode(msg.into())
}

pub(crate) fn parse(raw: &[u8]) -> Result<Value> {
    serde_json::from_slice(raw).map_err(|e| decode_err(format!("malformed json: {e}")))
}

/// Exact key first, then an ASCII case-insensitive scan.
pub(crate) fn get<'a>(obj: &'a Object, key: &str) -> Option<&'a Value> {
    obj.get(key).or_else(|| {
        obj.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

pub(crate) fn has(obj: &Object, key: &str) -> bool {
    get(obj, key).is_some_and(|v| !v.is_null())
}

pub(crate) fn object<'a>(obj: &'a Object, key: &str) -> Result<Option<&'a Object>> {
    match get(obj, key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(other) => Err(decode_err(format!(
            "expected object for {key}, found {}",
            type_name(other)
        ))),
    }
}

pub(crate) fn array<'a>(obj: &'a Object, key: &str) -> Result<&'a [Value]> {
    match get(obj, key) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(decode_err(format!(
            "expected array for {key}, found {}",
            type_name(other)
        ))),
    }
}

pub(crate) fn string<'a>(obj: &'a Object, key: &str) -> Result<Option<&'a str>> {
    match get(obj, key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(decode_err(format!(
            "expected string for {key}, found {}",
            type_name(other)
        ))),
    }
}

/// Unsigned integer given either as a JSON number or a numeric string, the
/// way OTLP JSON spells 64-bit fields.
pub(crate) fn lenient_u64(obj: &Object, key: &str) -> Result<Option<u64>> {
    match get(obj, key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => as_u64(v)
            .map(Some)
            .ok_or_else(|| decode_err(format!("expected unsigned integer for {key}, found {v}"))),
    }
}

pub(crate) fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Object> {
    value.as_object().ok_or_else(|| {
        decode_err(format!(
            "expected object for {what}, found {}",
            type_name(value)
        ))
    })
}

/// Strings verbatim, other scalars in their JSON spelling, containers as
/// compact JSON.
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn build(builder: &SpanBuilder) -> Result<Span> {
    builder.build().map_err(|e| match e {
        TracestashError::InvalidArgument(msg) => TracestashError::Decode(msg),
        other => other,
    })
}

pub(crate) fn nanos_to_micros(nanos: u64) -> u64 {
    nanos / 1_000
}

/// Duration in microseconds, at least one when both ends are known.
pub(crate) fn duration_micros(start_nanos: u64, end_nanos: Option<u64>) -> Option<u64> {
    let end = end_nanos.filter(|e| *e != 0)?;
    let elapsed = nanos_to_micros(end).saturating_sub(nanos_to_micros(start_nanos));
    Some(elapsed.max(1))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn keys_match_case_insensitively() {
        let value = json!({"TraceId": "abc", "name": "x"});
        let obj = value.as_object().unwrap();
        assert_eq!(string(obj, "traceId").unwrap(), Some("abc"));
        assert_eq!(string(obj, "NAME").unwrap(), Some("x"));
        assert!(string(obj, "spanId").unwrap().is_none());
    }

    #[test]
    fn wrong_container_types_fail() {
        let value = json!({"attributes": "nope", "resource": []});
        let obj = value.as_object().unwrap();
        assert!(array(obj, "attributes").is_err());
        assert!(object(obj, "resource").is_err());
    }

    #[test]
    fn numbers_may_be_strings() {
        let value = json!({"a": "1700000000000000000", "b": 42, "c": "x"});
        let obj = value.as_object().unwrap();
        assert_eq!(lenient_u64(obj, "a").unwrap(), Some(1_700_000_000_000_000_000));
        assert_eq!(lenient_u64(obj, "b").unwrap(), Some(42));
        assert!(lenient_u64(obj, "c").is_err());
    }

    #[test]
    fn duration_is_clamped_and_needs_an_end() {
        assert_eq!(duration_micros(1_000_000, Some(1_000_500)), Some(1));
        assert_eq!(duration_micros(1_000_000, Some(3_000_000)), Some(2_000));
        assert_eq!(duration_micros(1_000_000, None), None);
    }
}
