//! OTLP/HTTP endpoint: `POST /v1/metrics` with a protobuf or JSON body,
//! optionally gzip-compressed.

use std::convert::Infallible;
use std::future::Future;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use flate2::read::GzDecoder;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderMap, CONTENT_ENCODING, CONTENT_TYPE};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use opentelemetry_proto::tonic::collector::metrics::v1::{
    ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use prost::Message;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::Shared;

pub(crate) const METRICS_PATH: &str = "/v1/metrics";

const PROTOBUF: &str = "application/x-protobuf";
const JSON: &str = "application/json";

// Pause after a failed accept, e.g. when the process is out of file descriptors.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
enum DecodeError {
    #[error("invalid gzip body: {0}")]
    Gzip(#[source] std::io::Error),
    #[error("invalid protobuf body: {0}")]
    Protobuf(#[source] prost::DecodeError),
    #[error("invalid json body: {0}")]
    Json(#[source] serde_json::Error),
    #[error("unable to read body: {0}")]
    Body(#[source] hyper::Error),
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Format {
    Protobuf,
    Json,
}

impl Format {
    fn from_headers(headers: &HeaderMap) -> Self {
        match headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
            Some(ct) if ct.starts_with(JSON) => Format::Json,
            _ => Format::Protobuf,
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            Format::Protobuf => PROTOBUF,
            Format::Json => JSON,
        }
    }
}

/// Retry `accept` until it yields a connection, sleeping between failures.
async fn next_connection<T, F, Fut>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(conn) => return conn,
            Err(err) => {
                tracing::warn!(name: "ValidationReceiver.AcceptFailed", error = %err);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

pub(crate) async fn serve(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        let (stream, peer) = next_connection(|| listener.accept()).await;
        tracing::debug!(name: "ValidationReceiver.HttpConnection", peer = %peer);

        let shared = Arc::clone(&shared);
        tokio::spawn(async move {
            let service = service_fn(move |req| handle(req, Arc::clone(&shared)));
            if let Err(err) = Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!(name: "ValidationReceiver.HttpConnectionClosed", error = %err);
            }
        });
    }
}

async fn handle(
    req: Request<Incoming>,
    shared: Arc<Shared>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.uri().path() != METRICS_PATH {
        return Ok(empty(StatusCode::NOT_FOUND));
    }
    if req.method() != Method::POST {
        return Ok(empty(StatusCode::METHOD_NOT_ALLOWED));
    }
    if shared.is_rejecting() {
        tracing::info!(name: "ValidationReceiver.Rejected", transport = "http");
        return Ok(empty(StatusCode::SERVICE_UNAVAILABLE));
    }

    let format = Format::from_headers(req.headers());
    match decode(req, format).await {
        Ok(request) => {
            shared.store.push(request);
            Ok(success(format))
        }
        Err(err) => {
            tracing::warn!(name: "ValidationReceiver.MalformedRequest", error = %err);
            let mut response = Response::new(Full::new(Bytes::from(err.to_string())));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            Ok(response)
        }
    }
}

async fn decode(
    req: Request<Incoming>,
    format: Format,
) -> Result<ExportMetricsServiceRequest, DecodeError> {
    let gzipped = req
        .headers()
        .get(CONTENT_ENCODING)
        .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"gzip"));

    let body = req
        .into_body()
        .collect()
        .await
        .map_err(DecodeError::Body)?
        .to_bytes();

    let body = if gzipped {
        let mut raw = Vec::new();
        GzDecoder::new(&body[..])
            .read_to_end(&mut raw)
            .map_err(DecodeError::Gzip)?;
        Bytes::from(raw)
    } else {
        body
    };

    match format {
        Format::Protobuf => {
            ExportMetricsServiceRequest::decode(body).map_err(DecodeError::Protobuf)
        }
        Format::Json => serde_json::from_slice(&body).map_err(DecodeError::Json),
    }
}

fn success(format: Format) -> Response<Full<Bytes>> {
    let reply = ExportMetricsServiceResponse::default();
    let body = match format {
        Format::Protobuf => reply.encode_to_vec(),
        Format::Json => serde_json::to_vec(&reply).unwrap_or_else(|_| b"{}".to_vec()),
    };
    let mut response = Response::new(Full::new(Bytes::from(body)));
    if let Ok(ct) = format.content_type().parse() {
        response.headers_mut().insert(CONTENT_TYPE, ct);
    }
    response
}

fn empty(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
