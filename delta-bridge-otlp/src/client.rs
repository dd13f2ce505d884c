use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use std::fmt::Debug;
use std::time::Duration;

/// Error type returned by [`HttpClient`] implementations.
pub type HttpError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Deadline for one export request, stored in the request's extensions.
///
/// The bundled reqwest clients apply it to the request. Custom clients should
/// read it with `request.extensions().get::<ExportTimeout>()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExportTimeout(pub Duration);

/// A minimal interface necessary for sending requests over HTTP.
///
/// Users sometimes choose HTTP clients that rely on a certain async runtime. This trait allows
/// users to bring their choice of HTTP client to [`MetricExporter`](crate::MetricExporter).
#[async_trait]
pub trait HttpClient: Debug + Send + Sync {
    /// Send the specified HTTP request with `Bytes` payload.
    ///
    /// Returns the HTTP response including the status code and body.
    ///
    /// Returns an error if it can't connect to the server or the request could not be completed,
    /// e.g. because of a timeout, infinite redirects, or a loss of connection.
    async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError>;
}

#[cfg(any(feature = "reqwest-client", feature = "reqwest-blocking-client"))]
mod reqwest {
    use delta_bridge::bridge_debug;

    use super::{async_trait, Bytes, ExportTimeout, HttpClient, HttpError, Request, Response};

    fn timeout_of(request: &Request<Bytes>) -> Option<std::time::Duration> {
        request.extensions().get::<ExportTimeout>().map(|t| t.0)
    }

    #[cfg(feature = "reqwest-client")]
    #[async_trait]
    impl HttpClient for reqwest::Client {
        async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
            bridge_debug!(name: "ReqwestClient.Send");
            let timeout = timeout_of(&request);
            let mut request: reqwest::Request = request.try_into()?;
            if timeout.is_some() {
                *request.timeout_mut() = timeout;
            }
            let mut response = self.execute(request).await?;
            let headers = std::mem::take(response.headers_mut());
            let mut http_response = Response::builder()
                .status(response.status())
                .body(response.bytes().await?)?;
            *http_response.headers_mut() = headers;

            Ok(http_response)
        }
    }

    #[cfg(feature = "reqwest-blocking-client")]
    #[async_trait]
    impl HttpClient for reqwest::blocking::Client {
        async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
            bridge_debug!(name: "ReqwestBlockingClient.Send");
            let timeout = timeout_of(&request);
            let mut request: reqwest::blocking::Request = request.try_into()?;
            if timeout.is_some() {
                *request.timeout_mut() = timeout;
            }
            let mut response = self.execute(request)?;
            let headers = std::mem::take(response.headers_mut());
            let mut http_response = Response::builder()
                .status(response.status())
                .body(response.bytes()?)?;
            *http_response.headers_mut() = headers;

            Ok(http_response)
        }
    }
}
