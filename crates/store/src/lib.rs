pub mod call;
pub mod client;
pub mod consumer;
pub mod otel_store;
pub mod query;
pub mod span_store;
pub mod storage;

pub use call::{Call, Callback, QueryKind};
pub use client::{ClientSettings, Credential, SplunkClient};
pub use consumer::{RecordWriter, SpanConsumer, WriteTarget};
pub use otel_store::OtelSpanStore;
pub use span_store::{ClassicSpanStore, TraceQueries};
pub use storage::Storage;
