use std::sync::{Arc, Mutex};
use std::time::Duration;

use delta_bridge::{bridge_debug, BridgeError, BridgeResult, ExportBatch};
use http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use http::{HeaderMap, Method, Uri};
use prost::Message;

use crate::client::{ExportTimeout, HttpClient};
use crate::config::{Compression, ExporterBuildError, ExporterSettings};
use crate::{transform, Protocol};

#[cfg(feature = "reqwest-blocking-client")]
pub(crate) fn default_http_client(
    timeout: Duration,
) -> Result<Arc<dyn HttpClient>, ExporterBuildError> {
    // reqwest's blocking client starts a runtime of its own, which panics
    // when built from within another runtime.
    let client = std::thread::Builder::new()
        .name("DeltaBridge.HttpClientBuilder".into())
        .spawn(move || {
            reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| ExporterBuildError::HttpClient(e.to_string()))
        })
        .map_err(|_| ExporterBuildError::ThreadSpawnFailed)?
        .join()
        .map_err(|_| ExporterBuildError::ThreadSpawnFailed)??;
    Ok(Arc::new(client))
}

#[cfg(all(not(feature = "reqwest-blocking-client"), feature = "reqwest-client"))]
pub(crate) fn default_http_client(
    timeout: Duration,
) -> Result<Arc<dyn HttpClient>, ExporterBuildError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ExporterBuildError::HttpClient(e.to_string()))?;
    Ok(Arc::new(client))
}

#[cfg(not(any(feature = "reqwest-blocking-client", feature = "reqwest-client")))]
pub(crate) fn default_http_client(
    _timeout: Duration,
) -> Result<Arc<dyn HttpClient>, ExporterBuildError> {
    Err(ExporterBuildError::NoHttpClient)
}

/// Sends export requests to one collector endpoint. Shutting down drops the
/// client; every later export fails with `AlreadyShutdown`.
#[derive(Debug)]
pub(crate) struct OtlpHttpClient {
    client: Mutex<Option<Arc<dyn HttpClient>>>,
    endpoint: Uri,
    headers: HeaderMap,
    protocol: Protocol,
    timeout: Duration,
    compression: Option<Compression>,
}

impl OtlpHttpClient {
    pub(crate) fn new(client: Arc<dyn HttpClient>, settings: ExporterSettings) -> Self {
        OtlpHttpClient {
            client: Mutex::new(Some(client)),
            endpoint: settings.endpoint,
            headers: settings.headers,
            protocol: settings.protocol,
            timeout: settings.timeout,
            compression: settings.compression,
        }
    }

    fn encode(&self, batch: &ExportBatch) -> BridgeResult<Vec<u8>> {
        let request = transform::export_request(batch);
        match self.protocol {
            Protocol::HttpBinary => Ok(request.encode_to_vec()),
            Protocol::HttpJson => {
                serde_json::to_vec(&request).map_err(|e| BridgeError::Serialization(e.to_string()))
            }
        }
    }

    fn compress(&self, body: Vec<u8>) -> BridgeResult<Vec<u8>> {
        match self.compression {
            None => Ok(body),
            #[cfg(feature = "gzip-http")]
            Some(Compression::Gzip) => {
                use flate2::{write::GzEncoder, Compression as Level};
                use std::io::Write;

                let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Level::default());
                encoder
                    .write_all(&body)
                    .and_then(|_| encoder.finish())
                    .map_err(|e| BridgeError::Serialization(format!("gzip: {e}")))
            }
            // rejected when the exporter is built
            #[cfg(not(feature = "gzip-http"))]
            Some(Compression::Gzip) => Err(BridgeError::Serialization(
                "gzip requested without the gzip-http feature".into(),
            )),
        }
    }

    fn request(&self, batch: &ExportBatch) -> BridgeResult<http::Request<bytes::Bytes>> {
        let body = self.compress(self.encode(batch)?)?;

        let mut request = http::Request::builder()
            .method(Method::POST)
            .uri(&self.endpoint)
            .header(CONTENT_TYPE, self.protocol.content_type())
            .extension(ExportTimeout(self.timeout))
            .body(bytes::Bytes::from(body))
            .map_err(|e| BridgeError::InternalFailure(e.to_string()))?;
        if let Some(compression) = self.compression {
            request.headers_mut().insert(
                CONTENT_ENCODING,
                http::HeaderValue::from_static(match compression {
                    Compression::Gzip => "gzip",
                }),
            );
        }
        for (name, value) in &self.headers {
            request.headers_mut().insert(name, value.clone());
        }
        Ok(request)
    }

    pub(crate) async fn export(&self, batch: &ExportBatch) -> BridgeResult {
        let client = self
            .client
            .lock()?
            .as_ref()
            .map(Arc::clone)
            .ok_or(BridgeError::AlreadyShutdown)?;

        let request = self.request(batch)?;
        bridge_debug!(
            name: "OtlpHttpClient.Export",
            endpoint = self.endpoint.to_string(),
            points = batch.points.len()
        );

        let response = client.send_bytes(request).await.map_err(|e| {
            bridge_debug!(name: "OtlpHttpClient.ExportFailed", error = e.to_string());
            BridgeError::Transport(e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let error = format!(
            "collector answered {}: {}",
            status.as_u16(),
            String::from_utf8_lossy(response.body())
        );
        bridge_debug!(name: "OtlpHttpClient.ExportFailed", error = &error);
        Err(BridgeError::Transport(error))
    }

    pub(crate) fn shutdown(&self) -> BridgeResult {
        self.client.lock()?.take();
        Ok(())
    }
}
