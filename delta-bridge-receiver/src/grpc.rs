//! OTLP/gRPC endpoint: `opentelemetry.proto.collector.metrics.v1.MetricsService/Export`.

use std::sync::Arc;

use opentelemetry_proto::tonic::collector::metrics::v1::{
    metrics_service_server::{MetricsService, MetricsServiceServer},
    ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::codec::CompressionEncoding;

use crate::Shared;

struct MetricsReceiver {
    shared: Arc<Shared>,
}

#[tonic::async_trait]
impl MetricsService for MetricsReceiver {
    async fn export(
        &self,
        request: tonic::Request<ExportMetricsServiceRequest>,
    ) -> Result<tonic::Response<ExportMetricsServiceResponse>, tonic::Status> {
        if self.shared.is_rejecting() {
            tracing::info!(name: "ValidationReceiver.Rejected", transport = "grpc");
            return Err(tonic::Status::unavailable("receiver is rejecting requests"));
        }
        self.shared.store.push(request.into_inner());
        Ok(tonic::Response::new(ExportMetricsServiceResponse {
            partial_success: None,
        }))
    }
}

pub(crate) async fn serve(
    listener: TcpListener,
    shared: Arc<Shared>,
) -> Result<(), tonic::transport::Error> {
    let service = MetricsServiceServer::new(MetricsReceiver { shared })
        .accept_compressed(CompressionEncoding::Gzip);

    tonic::transport::Server::builder()
        .add_service(service)
        .serve_with_incoming(TcpListenerStream::new(listener))
        .await
}
