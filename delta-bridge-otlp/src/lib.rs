//! OTLP/HTTP exporter for [delta-bridge] batches.
//!
//! [`MetricExporter`] implements [`PushExporter`]: every [`ExportBatch`] it is
//! handed becomes one `ExportMetricsServiceRequest` holding a delta, monotonic
//! `Sum` per metric name. The request is encoded as protobuf or JSON,
//! optionally gzip-compressed, and POSTed to the collector's metrics endpoint.
//!
//! ```no_run
//! use delta_bridge::metrics::{ExportScheduler, SumRecorder};
//! use delta_bridge_otlp::{MetricExporter, Protocol};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let exporter = MetricExporter::builder()
//!     .with_endpoint("http://localhost:4318/v1/metrics")
//!     .with_protocol(Protocol::HttpBinary)
//!     .build()?;
//!
//! let recorder = SumRecorder::new();
//! let scheduler = ExportScheduler::builder(exporter, recorder).build();
//! # scheduler.shutdown()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! Every builder setting falls back to the standard OTLP environment variables
//! (`OTEL_EXPORTER_OTLP_METRICS_*` first, then `OTEL_EXPORTER_OTLP_*`).
//! Values set on the builder always win. The timeout travels with each request
//! as an [`ExportTimeout`] extension, so it also reaches clients passed to
//! [`MetricExporterBuilder::with_http_client`].
//!
//! # Feature Flags
//!
//! * `reqwest-blocking-client` (default): send with a blocking `reqwest` client.
//! * `reqwest-client`: use the async `reqwest` client instead.
//! * `gzip-http` (default): allow [`Compression::Gzip`].
//! * `internal-logs` (default): emit diagnostics through `tracing`.
//!
//! [delta-bridge]: delta_bridge
//! [`PushExporter`]: delta_bridge::PushExporter
//! [`ExportBatch`]: delta_bridge::ExportBatch
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod client;
mod config;
mod metric;
pub mod transform;
mod transport;

pub use crate::client::{ExportTimeout, HttpClient, HttpError};
pub use crate::config::{
    Compression, ExporterBuildError, OTEL_EXPORTER_OTLP_COMPRESSION, OTEL_EXPORTER_OTLP_ENDPOINT,
    OTEL_EXPORTER_OTLP_ENDPOINT_DEFAULT, OTEL_EXPORTER_OTLP_HEADERS,
    OTEL_EXPORTER_OTLP_METRICS_COMPRESSION, OTEL_EXPORTER_OTLP_METRICS_ENDPOINT,
    OTEL_EXPORTER_OTLP_METRICS_HEADERS, OTEL_EXPORTER_OTLP_METRICS_TIMEOUT,
    OTEL_EXPORTER_OTLP_PROTOCOL, OTEL_EXPORTER_OTLP_PROTOCOL_HTTP_JSON,
    OTEL_EXPORTER_OTLP_PROTOCOL_HTTP_PROTOBUF, OTEL_EXPORTER_OTLP_TIMEOUT,
    OTEL_EXPORTER_OTLP_TIMEOUT_DEFAULT,
};
pub use crate::metric::{MetricExporter, MetricExporterBuilder};

/// The communication protocol to use when exporting data.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Protocol {
    /// HTTP protocol with binary protobuf
    #[default]
    HttpBinary,
    /// HTTP protocol with JSON payload
    HttpJson,
}

impl Protocol {
    /// Read the protocol from `OTEL_EXPORTER_OTLP_PROTOCOL`, if it is set to a
    /// value this crate understands.
    pub fn from_env() -> Option<Self> {
        match std::env::var(OTEL_EXPORTER_OTLP_PROTOCOL).ok()?.as_str() {
            OTEL_EXPORTER_OTLP_PROTOCOL_HTTP_PROTOBUF => Some(Protocol::HttpBinary),
            OTEL_EXPORTER_OTLP_PROTOCOL_HTTP_JSON => Some(Protocol::HttpJson),
            _ => None,
        }
    }

    pub(crate) fn content_type(&self) -> &'static str {
        match self {
            Protocol::HttpBinary => "application/x-protobuf",
            Protocol::HttpJson => "application/json",
        }
    }
}
