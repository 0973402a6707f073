use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TracestashError};
use crate::ids::{SpanId, TraceId};
use crate::model::endpoint::Endpoint;

/// Spans sharing one trace id, in the order they were decoded.
pub type Trace = Vec<Span>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Kind {
    Client,
    Server,
    Producer,
    Consumer,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Annotation {
    pub timestamp: u64,
    pub value: String,
}

/// One timed operation. Instances are only produced by [`SpanBuilder`], which
/// normalizes identifiers, so two spans with equal ids compare equal no matter
/// how the ids were spelled on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<Kind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    local_endpoint: Option<Endpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_endpoint: Option<Endpoint>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    annotations: Vec<Annotation>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    tags: BTreeMap<String, String>,
}

impl Span {
    pub fn builder() -> SpanBuilder {
        SpanBuilder::default()
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> Option<Kind> {
        self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Epoch microseconds.
    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    /// Microseconds.
    pub fn duration(&self) -> Option<u64> {
        self.duration
    }

    pub fn local_endpoint(&self) -> Option<&Endpoint> {
        self.local_endpoint.as_ref()
    }

    pub fn remote_endpoint(&self) -> Option<&Endpoint> {
        self.remote_endpoint.as_ref()
    }

    pub fn local_service_name(&self) -> Option<&str> {
        self.local_endpoint.as_ref().and_then(Endpoint::service_name)
    }

    pub fn remote_service_name(&self) -> Option<&str> {
        self.remote_endpoint.as_ref().and_then(Endpoint::service_name)
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn to_builder(&self) -> SpanBuilder {
        SpanBuilder {
            trace_id: Some(self.trace_id.clone()),
            parent_id: self.parent_id.clone(),
            id: Some(self.id.clone()),
            kind: self.kind,
            name: self.name.clone(),
            timestamp: self.timestamp,
            duration: self.duration,
            local_endpoint: self.local_endpoint.clone(),
            remote_endpoint: self.remote_endpoint.clone(),
            annotations: self.annotations.clone(),
            tags: self.tags.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpanBuilder {
    trace_id: Option<String>,
    parent_id: Option<String>,
    id: Option<String>,
    kind: Option<Kind>,
    name: Option<String>,
    timestamp: Option<u64>,
    duration: Option<u64>,
    local_endpoint: Option<Endpoint>,
    remote_endpoint: Option<Endpoint>,
    annotations: Vec<Annotation>,
    tags: BTreeMap<String, String>,
}

impl SpanBuilder {
    pub fn trace_id(&mut self, trace_id: impl Into<String>) -> &mut Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn parent_id(&mut self, parent_id: impl Into<String>) -> &mut Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn id(&mut self, id: impl Into<String>) -> &mut Self {
        self.id = Some(id.into());
        self
    }

    pub fn kind(&mut self, kind: Option<Kind>) -> &mut Self {
        self.kind = kind;
        self
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    pub fn timestamp(&mut self, micros: u64) -> &mut Self {
        self.timestamp = Some(micros);
        self
    }

    pub fn duration(&mut self, micros: u64) -> &mut Self {
        self.duration = Some(micros);
        self
    }

    pub fn local_endpoint(&mut self, endpoint: Endpoint) -> &mut Self {
        self.local_endpoint = Some(endpoint);
        self
    }

    pub fn remote_endpoint(&mut self, endpoint: Endpoint) -> &mut Self {
        self.remote_endpoint = Some(endpoint);
        self
    }

    pub fn add_annotation(&mut self, timestamp: u64, value: impl Into<String>) -> &mut Self {
        self.annotations.push(Annotation {
            timestamp,
            value: value.into(),
        });
        self
    }

    pub fn put_tag(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn has_local_service_name(&self) -> bool {
        self.local_endpoint
            .as_ref()
            .and_then(Endpoint::service_name)
            .is_some()
    }

    pub fn build(&self) -> Result<Span> {
        let trace_id = self
            .trace_id
            .as_deref()
            .ok_or_else(|| TracestashError::InvalidArgument("span is missing traceId".into()))?;
        let id = self
            .id
            .as_deref()
            .ok_or_else(|| TracestashError::InvalidArgument("span is missing id".into()))?;

        let parent_id = match self.parent_id.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                let parsed = SpanId::parse(raw)?;
                (!parsed.is_zero()).then(|| parsed.into_inner())
            }
        };

        let mut annotations = self.annotations.clone();
        annotations.sort();
        annotations.dedup();

        Ok(Span {
            trace_id: TraceId::parse(trace_id)?.into_inner(),
            parent_id,
            id: SpanId::parse(id)?.into_inner(),
            kind: self.kind,
            name: self
                .name
                .as_deref()
                .filter(|n| !n.is_empty())
                .map(str::to_lowercase),
            timestamp: self.timestamp.filter(|t| *t != 0),
            duration: self.duration.filter(|d| *d != 0),
            local_endpoint: self.local_endpoint.clone().filter(|e| !e.is_empty()),
            remote_endpoint: self.remote_endpoint.clone().filter(|e| !e.is_empty()),
            annotations,
            tags: self.tags.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_normalizes_ids_and_drops_zero_values() {
        let span = Span::builder()
            .trace_id("463AC35C9F6413AD")
            .id("A")
            .parent_id("0000000000000000")
            .name("GET /api")
            .timestamp(0)
            .duration(0)
            .build()
            .unwrap();

        assert_eq!(span.trace_id(), "463ac35c9f6413ad");
        assert_eq!(span.id(), "000000000000000a");
        assert_eq!(span.parent_id(), None);
        assert_eq!(span.name(), Some("get /api"));
        assert_eq!(span.timestamp(), None);
        assert_eq!(span.duration(), None);
    }

    #[test]
    fn builder_requires_ids() {
        assert!(Span::builder().id("a").build().is_err());
        assert!(Span::builder().trace_id("a").build().is_err());
    }

    #[test]
    fn empty_endpoints_are_dropped() {
        let span = Span::builder()
            .trace_id("1")
            .id("2")
            .local_endpoint(Endpoint::builder().build())
            .remote_endpoint(Endpoint::builder().service_name("db").build())
            .build()
            .unwrap();
        assert!(span.local_endpoint().is_none());
        assert_eq!(span.remote_service_name(), Some("db"));
    }

    #[test]
    fn to_builder_preserves_fields() {
        let span = Span::builder()
            .trace_id("1")
            .id("2")
            .kind(Some(Kind::Producer))
            .put_tag("queue", "billing")
            .add_annotation(10, "ws")
            .build()
            .unwrap();
        assert_eq!(span.to_builder().build().unwrap(), span);
    }
}
