use serde::{Deserialize, Serialize};

use crate::error::{Result, TracestashError};

/// Filter value that disables a string filter.
pub const ALL: &str = "all";

/// Structured trace search. Construct through [`QueryRequest::builder`] so the
/// window and limit are validated before anything is sent to the search
/// service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    service_name: Option<String>,
    remote_service_name: Option<String>,
    span_name: Option<String>,
    annotation_query: Vec<(String, String)>,
    min_duration: Option<u64>,
    max_duration: Option<u64>,
    end_ts: u64,
    lookback: u64,
    limit: usize,
}

impl QueryRequest {
    pub fn builder() -> QueryRequestBuilder {
        QueryRequestBuilder::default()
    }

    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    pub fn remote_service_name(&self) -> Option<&str> {
        self.remote_service_name.as_deref()
    }

    pub fn span_name(&self) -> Option<&str> {
        self.span_name.as_deref()
    }

    /// Tag filters in insertion order. An empty value matches any span that
    /// carries the key.
    pub fn annotation_query(&self) -> &[(String, String)] {
        &self.annotation_query
    }

    /// Inclusive lower bound in microseconds.
    pub fn min_duration(&self) -> Option<u64> {
        self.min_duration
    }

    /// Exclusive upper bound in microseconds.
    pub fn max_duration(&self) -> Option<u64> {
        self.max_duration
    }

    /// Epoch milliseconds.
    pub fn end_ts(&self) -> u64 {
        self.end_ts
    }

    /// Window length in milliseconds.
    pub fn lookback(&self) -> u64 {
        self.lookback
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryRequestBuilder {
    service_name: Option<String>,
    remote_service_name: Option<String>,
    span_name: Option<String>,
    annotation_query: Vec<(String, String)>,
    min_duration: Option<u64>,
    max_duration: Option<u64>,
    end_ts: Option<u64>,
    lookback: Option<u64>,
    limit: Option<usize>,
}

impl QueryRequestBuilder {
    pub fn service_name(&mut self, name: impl AsRef<str>) -> &mut Self {
        self.service_name = clean_name(name.as_ref());
        self
    }

    pub fn remote_service_name(&mut self, name: impl AsRef<str>) -> &mut Self {
        self.remote_service_name = clean_name(name.as_ref());
        self
    }

    pub fn span_name(&mut self, name: impl AsRef<str>) -> &mut Self {
        self.span_name = clean_name(name.as_ref());
        self
    }

    /// Adds a tag filter, replacing an earlier filter on the same key in place.
    pub fn annotation(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.annotation_query.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.annotation_query.push((key, value)),
        }
        self
    }

    pub fn parse_annotation_query(&mut self, raw: &str) -> Result<&mut Self> {
        for (key, value) in parse_annotation_query(raw)? {
            self.annotation(key, value);
        }
        Ok(self)
    }

    pub fn min_duration(&mut self, micros: u64) -> &mut Self {
        self.min_duration = Some(micros);
        self
    }

    pub fn max_duration(&mut self, micros: u64) -> &mut Self {
        self.max_duration = Some(micros);
        self
    }

    pub fn end_ts(&mut self, millis: u64) -> &mut Self {
        self.end_ts = Some(millis);
        self
    }

    pub fn lookback(&mut self, millis: u64) -> &mut Self {
        self.lookback = Some(millis);
        self
    }

    pub fn limit(&mut self, limit: usize) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn build(&self) -> Result<QueryRequest> {
        let end_ts = self.end_ts.unwrap_or(0);
        if end_ts == 0 {
            return Err(invalid("endTs must be positive"));
        }
        let lookback = self.lookback.unwrap_or(0);
        if lookback == 0 {
            return Err(invalid("lookback must be positive"));
        }
        let limit = self.limit.unwrap_or(0);
        if limit == 0 {
            return Err(invalid("limit must be positive"));
        }

        match (self.min_duration, self.max_duration) {
            (Some(0), _) => return Err(invalid("minDuration must be positive")),
            (None, Some(_)) => {
                return Err(invalid("minDuration is required when maxDuration is set"));
            }
            (Some(min), Some(max)) if max < min => {
                return Err(invalid("maxDuration must be >= minDuration"));
            }
            _ => {}
        }

        Ok(QueryRequest {
            service_name: self.service_name.clone(),
            remote_service_name: self.remote_service_name.clone(),
            span_name: self.span_name.clone(),
            annotation_query: self.annotation_query.clone(),
            min_duration: self.min_duration,
            max_duration: self.max_duration,
            end_ts,
            lookback: lookback.min(end_ts),
            limit,
        })
    }
}

/// Parses `http.method=GET and error` into `[("http.method", "GET"), ("error", "")]`.
pub fn parse_annotation_query(raw: &str) -> Result<Vec<(String, String)>> {
    let mut out: Vec<(String, String)> = Vec::new();
    for term in raw.split(" and ") {
        let term = term.trim();
        if term.is_empty() {
            continue;
        }
        let (key, value) = match term.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (term, ""),
        };
        if key.is_empty() {
            return Err(invalid(&format!("invalid annotation query term: {term}")));
        }
        match out.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => out.push((key.to_string(), value.to_string())),
        }
    }
    Ok(out)
}

/// True when `value` should produce a filter stage.
pub fn is_filter(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.eq_ignore_ascii_case(ALL))
}

fn clean_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_lowercase())
}

fn invalid(msg: &str) -> TracestashError {
    TracestashError::InvalidArgument(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> QueryRequestBuilder {
        let mut b = QueryRequest::builder();
        b.end_ts(1_700_000_000_000).lookback(3_600_000).limit(10);
        b
    }

    #[test]
    fn builds_valid_request() {
        let req = base()
            .service_name(" Frontend ")
            .span_name("")
            .annotation("http.method", "GET")
            .min_duration(100)
            .max_duration(500)
            .build()
            .unwrap();
        assert_eq!(req.service_name(), Some("frontend"));
        assert_eq!(req.span_name(), None);
        assert_eq!(req.annotation_query().len(), 1);
    }

    #[test]
    fn rejects_bad_window_and_limit() {
        assert!(base().lookback(0).build().is_err());
        assert!(base().limit(0).build().is_err());
        assert!(QueryRequest::builder().lookback(1).limit(1).build().is_err());
    }

    #[test]
    fn rejects_inconsistent_durations() {
        assert!(base().max_duration(10).build().is_err());
        assert!(base().min_duration(20).max_duration(10).build().is_err());
        assert!(base().min_duration(0).build().is_err());
    }

    #[test]
    fn lookback_is_clamped_to_epoch() {
        let req = base().end_ts(1_000).lookback(5_000).build().unwrap();
        assert_eq!(req.lookback(), 1_000);
    }

    #[test]
    fn parses_annotation_query_in_order() {
        let parsed =
            parse_annotation_query("http.method=GET and error and http.method=POST").unwrap();
        assert_eq!(
            parsed,
            vec![
                ("http.method".to_string(), "POST".to_string()),
                ("error".to_string(), "".to_string()),
            ]
        );
        assert!(parse_annotation_query("=x").is_err());
    }

    #[test]
    fn all_sentinel_disables_filter() {
        assert!(!is_filter(None));
        assert!(!is_filter(Some("ALL")));
        assert!(is_filter(Some("frontend")));
    }
}
