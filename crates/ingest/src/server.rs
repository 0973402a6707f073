use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracestash_core::{Result, TracestashError};
use tracestash_store::RecordWriter;

use crate::otlp::grpc::GrpcCollector;
use crate::otlp::metrics::GrpcMetricsCollector;

/// Where each OTLP signal is written.
#[derive(Debug, Clone)]
pub struct CollectorWriters {
    pub traces: RecordWriter,
    pub metrics: RecordWriter,
}

pub async fn run_collector(writers: CollectorWriters, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| TracestashError::Io(format!("binding collector on {addr}: {e}")))?;
    serve_collector(writers, listener, std::future::pending()).await
}

/// Serves traces and metrics on one listener until `shutdown` resolves.
pub async fn serve_collector(
    writers: CollectorWriters,
    listener: TcpListener,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let traces = GrpcCollector::new(writers.traces);
    let metrics = GrpcMetricsCollector::new(writers.metrics);
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "otlp grpc collector listening");
    }
    Server::builder()
        .add_service(traces.traces_service())
        .add_service(metrics.metrics_service())
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await
        .map_err(|e| TracestashError::Io(format!("gRPC server failed: {e}")))
}
