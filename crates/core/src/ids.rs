use serde::{Deserialize, Serialize};

use crate::error::{Result, TracestashError};

/// Lower-hex trace identifier, 16 or 32 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(String);

/// Lower-hex span identifier, always 16 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanId(String);

impl TraceId {
    /// Trims, lowercases and pads `input`. A 128-bit id whose high half is
    /// zero collapses to its low 64 bits, so both spellings match.
    pub fn parse(input: &str) -> Result<Self> {
        let hex = lower_hex(input, 32, "trace id")?;
        let zeros = hex.bytes().take_while(|b| *b == b'0').count();
        if zeros == hex.len() {
            return Err(TracestashError::InvalidArgument(format!(
                "trace id is all zeros: {input}"
            )));
        }

        let normalized = match hex.len() {
            32 if zeros >= 16 => hex[16..].to_string(),
            16 | 32 => hex,
            len if len < 16 => pad_left(&hex, 16),
            _ => pad_left(&hex, 32),
        };
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl SpanId {
    pub fn parse(input: &str) -> Result<Self> {
        let hex = lower_hex(input, 16, "span id")?;
        Ok(Self(pad_left(&hex, 16)))
    }

    pub fn is_zero(&self) -> bool {
        self.0.bytes().all(|b| b == b'0')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

pub fn normalize_trace_id(input: &str) -> Result<String> {
    TraceId::parse(input).map(TraceId::into_inner)
}

fn lower_hex(input: &str, max_len: usize, what: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(TracestashError::InvalidArgument(format!("empty {what}")));
    }
    if trimmed.len() > max_len {
        return Err(TracestashError::InvalidArgument(format!(
            "{what} longer than {max_len} characters: {trimmed}"
        )));
    }
    if !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(TracestashError::InvalidArgument(format!(
            "{what} is not hex: {trimmed}"
        )));
    }
    Ok(trimmed.to_ascii_lowercase())
}

fn pad_left(hex: &str, width: usize) -> String {
    format!("{hex:0>width$}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ids() {
        let trace = TraceId::parse("4bf92f3577b34da6a3ce929d0e0e4736").unwrap();
        let span = SpanId::parse("00f067aa0ba902b7").unwrap();
        assert_eq!(trace.as_str(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(span.as_str(), "00f067aa0ba902b7");
    }

    #[test]
    fn rejects_bad_ids() {
        assert!(TraceId::parse("").is_err());
        assert!(TraceId::parse("0000").is_err());
        assert!(TraceId::parse("4bf92f3577b34da6a3ce929d0e0e47361").is_err());
        assert!(SpanId::parse("zzzzzzzzzzzzzzzz").is_err());
    }

    #[test]
    fn normalizes_case_padding_and_whitespace() {
        assert_eq!(normalize_trace_id("  ABC123 ").unwrap(), "0000000000abc123");
        assert_eq!(
            normalize_trace_id("0000000000000000463ac35c9f6413ad").unwrap(),
            "463ac35c9f6413ad"
        );
        assert_eq!(
            normalize_trace_id("1463ac35c9f6413ad48485a3953bb612").unwrap(),
            "1463ac35c9f6413ad48485a3953bb612"
        );
        assert_eq!(
            normalize_trace_id("463ac35c9f6413ad48485a3953bb6").unwrap(),
            "000463ac35c9f6413ad48485a3953bb6"
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_trace_id("463AC35C9F6413AD").unwrap();
        assert_eq!(normalize_trace_id(&once).unwrap(), once);
    }

    #[test]
    fn span_ids_pad_to_sixteen() {
        assert_eq!(SpanId::parse("A").unwrap().as_str(), "000000000000000a");
        assert!(SpanId::parse("0000000000000000").unwrap().is_zero());
    }
}
