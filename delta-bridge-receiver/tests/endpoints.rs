//! Wire-level behavior of the receiver's HTTP and gRPC endpoints.

use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use delta_bridge::metrics::{ExportScheduler, InMemoryExporter, MeasureKind, SumRecorder, View};
use delta_bridge_otlp::transform;
use delta_bridge_receiver::ValidationReceiver;
use flate2::{write::GzEncoder, Compression};
use opentelemetry_proto::tonic::collector::metrics::v1::{
    metrics_service_client::MetricsServiceClient, ExportMetricsServiceRequest,
};
use prost::Message;
use reqwest::StatusCode;

/// Produce a real export request by running one cycle into memory.
fn sample_request(value: u64) -> Result<ExportMetricsServiceRequest> {
    let recorder = SumRecorder::new();
    recorder.register_view(View::builder("requests", "requests", MeasureKind::U64).build())?;
    let exporter = InMemoryExporter::default();
    let scheduler = ExportScheduler::builder(exporter.clone(), recorder.clone())
        .with_interval(Duration::from_secs(3600))
        .build();

    recorder.record_u64("requests", value, &[])?;
    scheduler.force_flush()?;
    scheduler.shutdown()?;

    let batch = exporter
        .get_finished_batches()?
        .pop()
        .ok_or_else(|| anyhow::anyhow!("no batch exported"))?;
    Ok(transform::export_request(&batch))
}

fn post(
    url: &str,
    content_type: &str,
    encoding: Option<&str>,
    body: Vec<u8>,
) -> Result<StatusCode> {
    let client = reqwest::blocking::Client::new();
    let mut request = client
        .post(url)
        .header("Content-Type", content_type)
        .body(body);
    if let Some(encoding) = encoding {
        request = request.header("Content-Encoding", encoding);
    }
    Ok(request.send()?.status())
}

#[test]
fn protobuf_post_is_recorded() -> Result<()> {
    let receiver = ValidationReceiver::start()?;
    let status = post(
        &receiver.http_endpoint(),
        "application/x-protobuf",
        None,
        sample_request(3)?.encode_to_vec(),
    )?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(receiver.sum_values("requests"), vec![3.0]);
    Ok(())
}

#[test]
fn gzip_json_post_is_recorded() -> Result<()> {
    let receiver = ValidationReceiver::start()?;
    let json = serde_json::to_vec(&sample_request(5)?)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;

    let status = post(
        &receiver.http_endpoint(),
        "application/json",
        Some("gzip"),
        encoder.finish()?,
    )?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(receiver.sum_values("requests"), vec![5.0]);
    Ok(())
}

#[test]
fn malformed_body_is_rejected() -> Result<()> {
    let receiver = ValidationReceiver::start()?;

    let status = post(
        &receiver.http_endpoint(),
        "application/x-protobuf",
        None,
        vec![0xff, 0xff, 0xff],
    )?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let status = post(
        &receiver.http_endpoint(),
        "application/json",
        None,
        b"{not json".to_vec(),
    )?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let status = post(
        &receiver.http_endpoint(),
        "application/x-protobuf",
        Some("gzip"),
        b"not gzip".to_vec(),
    )?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(receiver.is_empty());
    Ok(())
}

#[test]
fn unknown_path_is_not_found() -> Result<()> {
    let receiver = ValidationReceiver::start()?;
    let url = receiver.http_endpoint().replace("/v1/metrics", "/v1/traces");

    let status = post(&url, "application/x-protobuf", None, Vec::new())?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[test]
fn rejecting_receiver_answers_unavailable() -> Result<()> {
    let receiver = ValidationReceiver::start()?;
    receiver.set_rejecting(true);

    let status = post(
        &receiver.http_endpoint(),
        "application/x-protobuf",
        None,
        sample_request(1)?.encode_to_vec(),
    )?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(receiver.is_empty());

    receiver.set_rejecting(false);
    let status = post(
        &receiver.http_endpoint(),
        "application/x-protobuf",
        None,
        sample_request(1)?.encode_to_vec(),
    )?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receiver.len(), 1);
    Ok(())
}

#[test]
fn reset_clears_recorded_requests() -> Result<()> {
    let receiver = ValidationReceiver::start()?;
    post(
        &receiver.http_endpoint(),
        "application/x-protobuf",
        None,
        sample_request(1)?.encode_to_vec(),
    )?;
    assert_eq!(receiver.len(), 1);

    receiver.reset();
    assert!(receiver.is_empty());
    assert!(receiver.sum_values("requests").is_empty());
    Ok(())
}

#[test]
fn concurrent_posts_are_all_recorded() -> Result<()> {
    const CLIENTS: u64 = 8;

    let receiver = ValidationReceiver::start()?;
    let bodies = (1..=CLIENTS)
        .map(|value| sample_request(value).map(|r| r.encode_to_vec()))
        .collect::<Result<Vec<_>>>()?;

    let statuses = std::thread::scope(|scope| {
        let handles: Vec<_> = bodies
            .into_iter()
            .map(|body| {
                let url = receiver.http_endpoint();
                scope.spawn(move || post(&url, "application/x-protobuf", None, body))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| anyhow::anyhow!("client thread panicked"))?
            })
            .collect::<Result<Vec<_>>>()
    })?;

    assert!(statuses.iter().all(|status| *status == StatusCode::OK));
    assert_eq!(receiver.len(), CLIENTS as usize);
    let mut values = receiver.sum_values("requests");
    values.sort_by(f64::total_cmp);
    let expected: Vec<f64> = (1..=CLIENTS).map(|v| v as f64).collect();
    assert_eq!(values, expected);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn grpc_export_is_recorded() -> Result<()> {
    let receiver = ValidationReceiver::start()?;
    let request = sample_request(7)?;

    let mut client = MetricsServiceClient::connect(receiver.grpc_endpoint()).await?;
    client.export(request).await?;

    let recorded = tokio::task::spawn_blocking(move || {
        receiver
            .wait_for(|r| !r.is_empty(), Duration::from_secs(5))
            .map(|_| receiver.sum_values("requests"))
    })
    .await??;
    assert_eq!(recorded, vec![7.0]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn grpc_rejecting_answers_unavailable() -> Result<()> {
    let receiver = ValidationReceiver::start()?;
    receiver.set_rejecting(true);

    let mut client = MetricsServiceClient::connect(receiver.grpc_endpoint()).await?;
    let status = client
        .export(sample_request(1)?)
        .await
        .expect_err("export should be rejected");

    assert_eq!(status.code(), tonic::Code::Unavailable);
    assert!(receiver.is_empty());
    tokio::task::spawn_blocking(move || drop(receiver)).await?;
    Ok(())
}
