pub mod dependency;
pub mod endpoint;
pub mod span;

pub use dependency::DependencyLink;
pub use endpoint::Endpoint;
pub use span::{Annotation, Kind, Span, SpanBuilder, Trace};
