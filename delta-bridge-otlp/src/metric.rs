//! OTLP metric exporter
//!
//! Defines a [MetricExporter] to send delta batches to a collector over
//! OTLP/HTTP.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use delta_bridge::metrics::{PushExporter, Temporality};
use delta_bridge::{BridgeResult, ExportBatch};

use crate::client::HttpClient;
use crate::config::{ExporterBuildError, ExporterOptions};
use crate::transport::{default_http_client, OtlpHttpClient};
use crate::{Compression, Protocol};

/// Builder for creating a new [MetricExporter].
///
/// Anything left unset is read from the environment when
/// [`build`](Self::build) runs.
#[derive(Debug, Default)]
pub struct MetricExporterBuilder {
    options: ExporterOptions,
    client: Option<Arc<dyn HttpClient>>,
}

impl MetricExporterBuilder {
    /// Full URL of the collector's metrics endpoint, used as-is. An empty
    /// string counts as unset.
    pub fn with_endpoint<T: Into<String>>(mut self, endpoint: T) -> Self {
        self.options.endpoint = Some(endpoint.into());
        self
    }

    /// Encoding of the request body.
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.options.protocol = Some(protocol);
        self
    }

    /// Deadline for each export request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Additional headers to send to the collector. Values are
    /// percent-decoded and replace headers of the same name from the
    /// environment.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.options.headers.extend(headers);
        self
    }

    /// Compress request bodies.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.options.compression = Some(compression);
        self
    }

    /// Send requests through `client` instead of the default reqwest client.
    pub fn with_http_client<T: HttpClient + 'static>(mut self, client: T) -> Self {
        self.client = Some(Arc::new(client));
        self
    }

    /// Build the [MetricExporter].
    pub fn build(self) -> Result<MetricExporter, ExporterBuildError> {
        let settings = self.options.resolve()?;
        let client = match self.client {
            Some(client) => client,
            None => default_http_client(settings.timeout)?,
        };
        Ok(MetricExporter {
            client: OtlpHttpClient::new(client, settings),
        })
    }
}

/// Export delta batches in OTLP format.
pub struct MetricExporter {
    client: OtlpHttpClient,
}

impl Debug for MetricExporter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricExporter").finish()
    }
}

impl MetricExporter {
    /// Obtain a builder to configure a [MetricExporter].
    pub fn builder() -> MetricExporterBuilder {
        MetricExporterBuilder::default()
    }
}

impl PushExporter for MetricExporter {
    async fn export(&self, batch: &ExportBatch) -> BridgeResult {
        self.client.export(batch).await
    }

    fn force_flush(&self) -> BridgeResult {
        // nothing is buffered
        Ok(())
    }

    fn shutdown_with_timeout(&self, _timeout: Duration) -> BridgeResult {
        self.client.shutdown()
    }

    fn temporality(&self) -> Temporality {
        Temporality::Delta
    }
}
