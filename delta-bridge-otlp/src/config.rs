//! Exporter settings and where they come from.
//!
//! Each setting is taken from the builder when set there, otherwise from the
//! `OTEL_EXPORTER_OTLP_METRICS_*` variable, otherwise from the generic
//! `OTEL_EXPORTER_OTLP_*` one, otherwise from the default.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use http::{header::USER_AGENT, HeaderMap, HeaderName, HeaderValue, Uri};
use percent_encoding::percent_decode_str;
use thiserror::Error;

use crate::Protocol;

/// Base URL of the collector. `/v1/metrics` is appended to it.
pub const OTEL_EXPORTER_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
/// Full metrics URL of the collector, used as-is.
pub const OTEL_EXPORTER_OTLP_METRICS_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_METRICS_ENDPOINT";
/// Base URL used when neither endpoint variable is set.
pub const OTEL_EXPORTER_OTLP_ENDPOINT_DEFAULT: &str = "http://localhost:4318";

/// Request timeout in milliseconds.
pub const OTEL_EXPORTER_OTLP_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_TIMEOUT";
/// Request timeout for metrics in milliseconds. Wins over [OTEL_EXPORTER_OTLP_TIMEOUT].
pub const OTEL_EXPORTER_OTLP_METRICS_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_METRICS_TIMEOUT";
/// Timeout used when none is configured.
pub const OTEL_EXPORTER_OTLP_TIMEOUT_DEFAULT: Duration = Duration::from_secs(10);

/// Extra request headers as `k1=v1,k2=v2`. Values are percent-decoded.
pub const OTEL_EXPORTER_OTLP_HEADERS: &str = "OTEL_EXPORTER_OTLP_HEADERS";
/// Extra request headers for metrics. Replaces [OTEL_EXPORTER_OTLP_HEADERS]
/// when set.
pub const OTEL_EXPORTER_OTLP_METRICS_HEADERS: &str = "OTEL_EXPORTER_OTLP_METRICS_HEADERS";

/// Body compression, `gzip` or unset.
pub const OTEL_EXPORTER_OTLP_COMPRESSION: &str = "OTEL_EXPORTER_OTLP_COMPRESSION";
/// Body compression for metrics. Wins over [OTEL_EXPORTER_OTLP_COMPRESSION].
pub const OTEL_EXPORTER_OTLP_METRICS_COMPRESSION: &str = "OTEL_EXPORTER_OTLP_METRICS_COMPRESSION";

/// `http/protobuf` or `http/json`.
pub const OTEL_EXPORTER_OTLP_PROTOCOL: &str = "OTEL_EXPORTER_OTLP_PROTOCOL";
/// [OTEL_EXPORTER_OTLP_PROTOCOL] value for [Protocol::HttpBinary].
pub const OTEL_EXPORTER_OTLP_PROTOCOL_HTTP_PROTOBUF: &str = "http/protobuf";
/// [OTEL_EXPORTER_OTLP_PROTOCOL] value for [Protocol::HttpJson].
pub const OTEL_EXPORTER_OTLP_PROTOCOL_HTTP_JSON: &str = "http/json";

pub(crate) const METRICS_PATH: &str = "/v1/metrics";

/// Errors that can occur while building a [MetricExporter](crate::MetricExporter).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ExporterBuildError {
    /// The helper thread that builds the blocking client could not run.
    #[error("spawning a thread failed, unable to create the reqwest blocking client")]
    ThreadSpawnFailed,

    /// No HTTP client was supplied and no client feature is enabled.
    #[error("no http client specified")]
    NoHttpClient,

    /// The default HTTP client could not be built.
    #[error("failed to build http client: {0}")]
    HttpClient(String),

    /// The compression algorithm is not known.
    #[error("unsupported compression algorithm '{0}'")]
    UnsupportedCompressionAlgorithm(String),

    /// The compression algorithm is known but its feature is disabled.
    #[cfg(not(feature = "gzip-http"))]
    #[error("feature '{0}' is required to use the compression algorithm '{1}'")]
    FeatureRequiredForCompressionAlgorithm(&'static str, Compression),

    /// The configured endpoint is not a valid URI.
    #[error("invalid URI {0}. Reason {1}")]
    InvalidUri(String, String),
}

/// The compression algorithm to use when sending data.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Compression {
    /// Compresses data using gzip.
    Gzip,
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::Gzip => f.write_str("gzip"),
        }
    }
}

impl FromStr for Compression {
    type Err = ExporterBuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "gzip" => Ok(Compression::Gzip),
            other => Err(ExporterBuildError::UnsupportedCompressionAlgorithm(
                other.to_string(),
            )),
        }
    }
}

/// Which of a metrics/generic variable pair a value came from.
#[derive(Debug)]
enum Source {
    Metrics,
    Generic,
}

fn lookup(metrics_var: &str, generic_var: &str) -> Option<(Source, String)> {
    env::var(metrics_var)
        .map(|v| (Source::Metrics, v))
        .or_else(|_| env::var(generic_var).map(|v| (Source::Generic, v)))
        .ok()
}

fn endpoint_with_path(base: &str) -> Result<Uri, ExporterBuildError> {
    let url = format!("{}{METRICS_PATH}", base.trim_end_matches('/'));
    parse_uri(&url)
}

fn parse_uri(url: &str) -> Result<Uri, ExporterBuildError> {
    url.parse()
        .map_err(|e: http::uri::InvalidUri| ExporterBuildError::InvalidUri(url.into(), e.to_string()))
}

/// Settings as written on the builder; `None` falls through to the
/// environment.
#[derive(Debug, Default)]
pub(crate) struct ExporterOptions {
    pub(crate) endpoint: Option<String>,
    pub(crate) protocol: Option<Protocol>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) compression: Option<Compression>,
    pub(crate) headers: HashMap<String, String>,
}

/// Fully resolved settings of one exporter.
#[derive(Debug)]
pub(crate) struct ExporterSettings {
    pub(crate) endpoint: Uri,
    pub(crate) protocol: Protocol,
    pub(crate) timeout: Duration,
    pub(crate) compression: Option<Compression>,
    pub(crate) headers: HeaderMap,
}

impl ExporterOptions {
    pub(crate) fn resolve(self) -> Result<ExporterSettings, ExporterBuildError> {
        let endpoint = match self.endpoint.filter(|e| !e.is_empty()) {
            Some(endpoint) => parse_uri(&endpoint)?,
            None => match lookup(OTEL_EXPORTER_OTLP_METRICS_ENDPOINT, OTEL_EXPORTER_OTLP_ENDPOINT) {
                Some((Source::Metrics, url)) => parse_uri(&url)?,
                Some((Source::Generic, base)) => endpoint_with_path(&base)?,
                None => endpoint_with_path(OTEL_EXPORTER_OTLP_ENDPOINT_DEFAULT)?,
            },
        };

        let protocol = self
            .protocol
            .or_else(Protocol::from_env)
            .unwrap_or_default();

        // unparsable timeouts are ignored rather than failing the build
        let timeout = self
            .timeout
            .or_else(|| {
                lookup(OTEL_EXPORTER_OTLP_METRICS_TIMEOUT, OTEL_EXPORTER_OTLP_TIMEOUT)
                    .and_then(|(_, ms)| ms.trim().parse().ok())
                    .map(Duration::from_millis)
            })
            .unwrap_or(OTEL_EXPORTER_OTLP_TIMEOUT_DEFAULT);

        let compression = match self.compression {
            Some(compression) => Some(compression),
            None => lookup(
                OTEL_EXPORTER_OTLP_METRICS_COMPRESSION,
                OTEL_EXPORTER_OTLP_COMPRESSION,
            )
            .map(|(_, value)| value.parse())
            .transpose()?,
        };
        #[cfg(not(feature = "gzip-http"))]
        {
            if let Some(compression) = compression {
                return Err(ExporterBuildError::FeatureRequiredForCompressionAlgorithm(
                    "gzip-http",
                    compression,
                ));
            }
        }

        // later inserts win: builder headers override the environment
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!(
                "DeltaBridge-OTLP-Exporter/",
                env!("CARGO_PKG_VERSION")
            )),
        );
        if let Some((_, list)) = lookup(OTEL_EXPORTER_OTLP_METRICS_HEADERS, OTEL_EXPORTER_OTLP_HEADERS)
        {
            for (name, value) in parse_header_list(&list) {
                headers.insert(name, value);
            }
        }
        for (name, value) in self.headers.iter().filter_map(|(n, v)| header(n, v)) {
            headers.insert(name, value);
        }

        Ok(ExporterSettings {
            endpoint,
            protocol,
            timeout,
            compression,
            headers,
        })
    }
}

/// Parse `k1=v1,k2=v2`. Entries without a name or value, and entries that are
/// not valid HTTP headers, are skipped.
fn parse_header_list(list: &str) -> impl Iterator<Item = (HeaderName, HeaderValue)> + '_ {
    list.split(',')
        .filter_map(|entry| entry.split_once('='))
        .filter_map(|(name, value)| header(name, value))
}

fn header(name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    let (name, value) = (name.trim(), value.trim());
    if name.is_empty() || value.is_empty() {
        return None;
    }
    let decoded = percent_decode_str(value)
        .decode_utf8()
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string());
    Some((
        HeaderName::from_str(name).ok()?,
        HeaderValue::from_str(&decoded).ok()?,
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rstest::rstest;

    const ALL_VARS: [&str; 9] = [
        OTEL_EXPORTER_OTLP_ENDPOINT,
        OTEL_EXPORTER_OTLP_METRICS_ENDPOINT,
        OTEL_EXPORTER_OTLP_TIMEOUT,
        OTEL_EXPORTER_OTLP_METRICS_TIMEOUT,
        OTEL_EXPORTER_OTLP_HEADERS,
        OTEL_EXPORTER_OTLP_METRICS_HEADERS,
        OTEL_EXPORTER_OTLP_COMPRESSION,
        OTEL_EXPORTER_OTLP_METRICS_COMPRESSION,
        OTEL_EXPORTER_OTLP_PROTOCOL,
    ];

    /// Run `f` with exactly `vars` set among the exporter's variables.
    pub(crate) fn with_exporter_env<R>(vars: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
        let env: Vec<(&str, Option<&str>)> = ALL_VARS
            .iter()
            .map(|name| {
                let value = vars.iter().find(|(n, _)| n == name).map(|(_, v)| *v);
                (*name, value)
            })
            .collect();
        temp_env::with_vars(env, f)
    }

    fn resolve(options: ExporterOptions) -> ExporterSettings {
        options.resolve().unwrap()
    }

    #[rstest]
    #[case::default(None, &[], "http://localhost:4318/v1/metrics")]
    #[case::empty_builder_value(Some(""), &[], "http://localhost:4318/v1/metrics")]
    #[case::generic_gets_path(None, &[(OTEL_EXPORTER_OTLP_ENDPOINT, "http://collector:4318")], "http://collector:4318/v1/metrics")]
    #[case::generic_trailing_slash(None, &[(OTEL_EXPORTER_OTLP_ENDPOINT, "http://collector:4318/otlp/")], "http://collector:4318/otlp/v1/metrics")]
    #[case::metrics_as_is(None, &[(OTEL_EXPORTER_OTLP_METRICS_ENDPOINT, "http://collector:9000/ingest")], "http://collector:9000/ingest")]
    #[case::metrics_over_generic(
        None,
        &[(OTEL_EXPORTER_OTLP_METRICS_ENDPOINT, "http://metrics:1"), (OTEL_EXPORTER_OTLP_ENDPOINT, "http://generic:2")],
        "http://metrics:1/"
    )]
    #[case::builder_over_env(
        Some("http://builder:4318/v1/metrics"),
        &[(OTEL_EXPORTER_OTLP_METRICS_ENDPOINT, "http://metrics:1"), (OTEL_EXPORTER_OTLP_ENDPOINT, "http://generic:2")],
        "http://builder:4318/v1/metrics"
    )]
    fn endpoint_resolution(
        #[case] builder: Option<&str>,
        #[case] env: &[(&str, &str)],
        #[case] expected: &str,
    ) {
        let settings = with_exporter_env(env, || {
            resolve(ExporterOptions {
                endpoint: builder.map(str::to_string),
                ..Default::default()
            })
        });
        assert_eq!(settings.endpoint.to_string(), expected);
    }

    #[test]
    fn invalid_endpoint_is_an_error() {
        with_exporter_env(&[(OTEL_EXPORTER_OTLP_METRICS_ENDPOINT, "not a uri")], || {
            let result = ExporterOptions::default().resolve();
            assert!(matches!(result, Err(ExporterBuildError::InvalidUri(url, _)) if url == "not a uri"));
        });
    }

    #[rstest]
    #[case::default(None, &[], 10_000)]
    #[case::generic(None, &[(OTEL_EXPORTER_OTLP_TIMEOUT, "2000")], 2_000)]
    #[case::metrics_over_generic(None, &[(OTEL_EXPORTER_OTLP_METRICS_TIMEOUT, "3000"), (OTEL_EXPORTER_OTLP_TIMEOUT, "2000")], 3_000)]
    #[case::builder_over_env(Some(1_000), &[(OTEL_EXPORTER_OTLP_METRICS_TIMEOUT, "3000")], 1_000)]
    #[case::garbage_ignored(None, &[(OTEL_EXPORTER_OTLP_METRICS_TIMEOUT, "soon")], 10_000)]
    fn timeout_resolution(
        #[case] builder_ms: Option<u64>,
        #[case] env: &[(&str, &str)],
        #[case] expected_ms: u64,
    ) {
        let settings = with_exporter_env(env, || {
            resolve(ExporterOptions {
                timeout: builder_ms.map(Duration::from_millis),
                ..Default::default()
            })
        });
        assert_eq!(settings.timeout, Duration::from_millis(expected_ms));
    }

    #[test]
    fn compression_resolution() {
        with_exporter_env(
            &[
                (OTEL_EXPORTER_OTLP_METRICS_COMPRESSION, "gzip"),
                (OTEL_EXPORTER_OTLP_COMPRESSION, "zstd"),
            ],
            || assert_eq!(resolve(ExporterOptions::default()).compression, Some(Compression::Gzip)),
        );
        with_exporter_env(&[(OTEL_EXPORTER_OTLP_COMPRESSION, "zstd")], || {
            let result = ExporterOptions::default().resolve();
            assert!(matches!(
                result,
                Err(ExporterBuildError::UnsupportedCompressionAlgorithm(name)) if name == "zstd"
            ));

            let settings = resolve(ExporterOptions {
                compression: Some(Compression::Gzip),
                ..Default::default()
            });
            assert_eq!(settings.compression, Some(Compression::Gzip));
        });
        with_exporter_env(&[], || {
            assert_eq!(resolve(ExporterOptions::default()).compression, None);
        });
    }

    #[test]
    fn protocol_resolution() {
        with_exporter_env(&[(OTEL_EXPORTER_OTLP_PROTOCOL, "http/json")], || {
            assert_eq!(resolve(ExporterOptions::default()).protocol, Protocol::HttpJson);
            let settings = resolve(ExporterOptions {
                protocol: Some(Protocol::HttpBinary),
                ..Default::default()
            });
            assert_eq!(settings.protocol, Protocol::HttpBinary);
        });
        with_exporter_env(&[(OTEL_EXPORTER_OTLP_PROTOCOL, "grpc")], || {
            assert_eq!(resolve(ExporterOptions::default()).protocol, Protocol::HttpBinary);
        });
    }

    #[test]
    fn headers_layer_default_env_and_builder() {
        let settings = with_exporter_env(
            &[
                (OTEL_EXPORTER_OTLP_METRICS_HEADERS, "x-tenant=blue, authorization=Basic%20AAA,,broken,empty="),
                (OTEL_EXPORTER_OTLP_HEADERS, "x-generic=ignored"),
            ],
            || {
                resolve(ExporterOptions {
                    headers: HashMap::from([("x-tenant".to_string(), "green".to_string())]),
                    ..Default::default()
                })
            },
        );

        let headers = &settings.headers;
        assert!(headers[USER_AGENT]
            .to_str()
            .is_ok_and(|v| v.starts_with("DeltaBridge-OTLP-Exporter/")));
        assert_eq!(headers["x-tenant"], "green");
        assert_eq!(headers["authorization"], "Basic AAA");
        assert!(!headers.contains_key("x-generic"));
        assert!(!headers.contains_key("broken"));
        assert!(!headers.contains_key("empty"));
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn generic_headers_apply_without_metrics_headers() {
        let settings = with_exporter_env(&[(OTEL_EXPORTER_OTLP_HEADERS, "x-generic=a%3Db")], || {
            resolve(ExporterOptions::default())
        });
        assert_eq!(settings.headers["x-generic"], "a=b");
    }

    #[test]
    fn compression_names() {
        assert_eq!(" gzip ".parse::<Compression>().ok(), Some(Compression::Gzip));
        assert_eq!(Compression::Gzip.to_string(), "gzip");
    }
}
