//! Span encodings understood by tracestash.
//!
//! Every decoder produces [`Span`]s through the core builder, so identifiers
//! come out normalized whichever wire format they arrived in.

pub mod classic;
pub mod collector;
pub mod flat;
mod json;
pub mod metrics;
pub mod proto;
pub mod record;

use tracestash_core::Result;
use tracestash_core::model::Span;

pub use classic::ClassicCodec;
pub use collector::OtlpCollectorDecoder;
pub use flat::OtlpFlatDecoder;
pub use metrics::{resource_metrics_to_json, split_resource_metrics};
pub use proto::{
    OtlpProtoDecoder, ResourceSpansEncoder, resource_spans_to_json, span_to_resource_spans,
};
pub use record::OtelRecordDecoder;

pub trait SpanDecoder {
    /// Decodes a single span. Fails when the input holds none.
    fn decode_one(&self, raw: &[u8]) -> Result<Span>;

    fn decode_list(&self, raw: &[u8]) -> Result<Vec<Span>>;
}

pub trait SpanEncoder {
    fn encode(&self, span: &Span) -> Result<Vec<u8>>;

    fn encode_list(&self, spans: &[Span]) -> Result<Vec<u8>>;
}
