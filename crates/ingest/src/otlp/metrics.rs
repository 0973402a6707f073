use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_server::{
    MetricsService, MetricsServiceServer,
};
use opentelemetry_proto::tonic::collector::metrics::v1::{
    ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use tonic::{Request, Response, Status};
use tracestash_codec::{resource_metrics_to_json, split_resource_metrics};
use tracestash_store::RecordWriter;

/// OTLP/gRPC metrics endpoint. Every metric becomes its own JSON record,
/// wrapped in the resource and scope it was reported under.
#[derive(Clone)]
pub struct GrpcMetricsCollector {
    writer: RecordWriter,
}

impl GrpcMetricsCollector {
    pub fn new(writer: RecordWriter) -> Self {
        Self { writer }
    }

    pub fn metrics_service(&self) -> MetricsServiceServer<Self> {
        MetricsServiceServer::new(self.clone())
    }
}

pub fn encode_metrics(req: &ExportMetricsServiceRequest) -> Vec<Vec<u8>> {
    req.resource_metrics
        .iter()
        .flat_map(split_resource_metrics)
        .map(|rm| resource_metrics_to_json(&rm).to_string().into_bytes())
        .collect()
}

#[tonic::async_trait]
impl MetricsService for GrpcMetricsCollector {
    async fn export(
        &self,
        request: Request<ExportMetricsServiceRequest>,
    ) -> std::result::Result<Response<ExportMetricsServiceResponse>, Status> {
        let records = encode_metrics(&request.into_inner());
        let metric_count = records.len();

        if let Err(err) = self.writer.write_records(records).execute().await {
            tracing::warn!(error = ?err, metrics = metric_count, "otlp grpc metrics not forwarded");
            return Err(Status::unavailable(err.to_string()));
        }
        tracing::debug!(metrics = metric_count, "otlp grpc metrics accepted");
        Ok(Response::new(ExportMetricsServiceResponse::default()))
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry_proto::tonic::metrics::v1::ResourceMetrics;

    use super::*;

    #[test]
    fn one_record_per_metric_across_resources() {
        let req = ExportMetricsServiceRequest {
            resource_metrics: vec![
                testkit::sample_resource_metrics(),
                ResourceMetrics::default(),
                testkit::sample_resource_metrics(),
            ],
        };
        let records = encode_metrics(&req);
        assert_eq!(records.len(), 4);

        let first: serde_json::Value = serde_json::from_slice(&records[0]).unwrap();
        assert_eq!(first["resource"]["attributes"][0]["value"]["stringValue"], "checkout");
        assert_eq!(
            first["scopeMetrics"][0]["metrics"][0]["name"],
            "process.cpu.utilization"
        );
        let second: serde_json::Value = serde_json::from_slice(&records[1]).unwrap();
        assert_eq!(second["scopeMetrics"][0]["metrics"][0]["name"], "http.server.requests");
    }
}
