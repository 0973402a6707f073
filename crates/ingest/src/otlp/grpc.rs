use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::{
    TraceService, TraceServiceServer,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use tonic::{Request, Response, Status};
use tracestash_codec::resource_spans_to_json;
use tracestash_store::RecordWriter;

/// OTLP/gRPC trace endpoint. Every `ResourceSpans` of a batch becomes one
/// JSON record in the index.
#[derive(Clone)]
pub struct GrpcCollector {
    writer: RecordWriter,
}

impl GrpcCollector {
    pub fn new(writer: RecordWriter) -> Self {
        Self { writer }
    }

    pub fn traces_service(&self) -> TraceServiceServer<Self> {
        TraceServiceServer::new(self.clone())
    }
}

pub fn encode_batch(req: &ExportTraceServiceRequest) -> Vec<Vec<u8>> {
    req.resource_spans
        .iter()
        .map(|rs| resource_spans_to_json(rs).to_string().into_bytes())
        .collect()
}

#[tonic::async_trait]
impl TraceService for GrpcCollector {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> std::result::Result<Response<ExportTraceServiceResponse>, Status> {
        let req = request.into_inner();
        let span_count: usize = req
            .resource_spans
            .iter()
            .flat_map(|rs| &rs.scope_spans)
            .map(|ss| ss.spans.len())
            .sum();
        let records = encode_batch(&req);
        let record_count = records.len();

        if let Err(err) = self.writer.write_records(records).execute().await {
            tracing::warn!(error = ?err, spans = span_count, "otlp grpc traces not forwarded");
            return Err(Status::unavailable(err.to_string()));
        }
        tracing::debug!(
            records = record_count,
            spans = span_count,
            "otlp grpc traces accepted"
        );
        Ok(Response::new(ExportTraceServiceResponse::default()))
    }
}
