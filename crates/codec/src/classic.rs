use std::collections::BTreeMap;

use serde::Deserialize;
use tracestash_core::Result;
use tracestash_core::model::{Annotation, Endpoint, Kind, Span};

use crate::json::{build, decode_err};
use crate::{SpanDecoder, SpanEncoder};

/// Zipkin v2 JSON, the encoding the classic layout stores.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassicCodec;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSpan {
    trace_id: String,
    #[serde(default)]
    parent_id: Option<String>,
    id: String,
    #[serde(default)]
    kind: Option<Kind>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    timestamp: Option<u64>,
    #[serde(default)]
    duration: Option<u64>,
    #[serde(default)]
    local_endpoint: Option<WireEndpoint>,
    #[serde(default)]
    remote_endpoint: Option<WireEndpoint>,
    #[serde(default)]
    annotations: Vec<Annotation>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEndpoint {
    #[serde(default)]
    service_name: Option<String>,
    #[serde(default)]
    ipv4: Option<String>,
    #[serde(default)]
    ipv6: Option<String>,
    #[serde(default)]
    port: Option<u16>,
}

impl WireEndpoint {
    fn into_endpoint(self) -> Endpoint {
        let mut builder = Endpoint::builder();
        if let Some(name) = self.service_name {
            builder.service_name(name);
        }
        if let Some(ip) = self.ipv6 {
            builder.ip(&ip);
        }
        if let Some(ip) = self.ipv4 {
            builder.ip(&ip);
        }
        if let Some(port) = self.port {
            builder.port(port);
        }
        builder.build()
    }
}

impl WireSpan {
    fn into_span(self) -> Result<Span> {
        let mut builder = Span::builder();
        builder.trace_id(self.trace_id).id(self.id).kind(self.kind);
        if let Some(parent) = self.parent_id {
            builder.parent_id(parent);
        }
        if let Some(name) = self.name {
            builder.name(name);
        }
        if let Some(ts) = self.timestamp {
            builder.timestamp(ts);
        }
        if let Some(d) = self.duration {
            builder.duration(d);
        }
        if let Some(ep) = self.local_endpoint {
            builder.local_endpoint(ep.into_endpoint());
        }
        if let Some(ep) = self.remote_endpoint {
            builder.remote_endpoint(ep.into_endpoint());
        }
        for a in self.annotations {
            builder.add_annotation(a.timestamp, a.value);
        }
        for (k, v) in self.tags {
            builder.put_tag(k, v);
        }
        build(&builder)
    }
}

impl SpanDecoder for ClassicCodec {
    fn decode_one(&self, raw: &[u8]) -> Result<Span> {
        let wire: WireSpan = serde_json::from_slice(raw)
            .map_err(|e| decode_err(format!("invalid zipkin span: {e}")))?;
        wire.into_span()
    }

    fn decode_list(&self, raw: &[u8]) -> Result<Vec<Span>> {
        let wire: Vec<WireSpan> = serde_json::from_slice(raw)
            .map_err(|e| decode_err(format!("invalid zipkin span list: {e}")))?;
        wire.into_iter().map(WireSpan::into_span).collect()
    }
}

impl SpanEncoder for ClassicCodec {
    fn encode(&self, span: &Span) -> Result<Vec<u8>> {
        serde_json::to_vec(span).map_err(|e| decode_err(format!("encoding span: {e}")))
    }

    fn encode_list(&self, spans: &[Span]) -> Result<Vec<u8>> {
        serde_json::to_vec(spans).map_err(|e| decode_err(format!("encoding spans: {e}")))
    }
}
