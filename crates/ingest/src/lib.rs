pub mod otlp;
pub mod server;

pub use otlp::grpc::GrpcCollector;
pub use otlp::metrics::GrpcMetricsCollector;
pub use server::{CollectorWriters, run_collector, serve_collector};
