pub mod grpc;
pub mod metrics;
