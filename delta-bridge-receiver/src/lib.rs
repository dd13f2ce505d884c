//! An in-process OTLP metrics receiver for end-to-end tests.
//!
//! [`ValidationReceiver::start`] binds an OTLP/HTTP listener and an OTLP/gRPC
//! listener on ephemeral localhost ports and serves both from a private tokio
//! runtime on a background thread. Every well-formed export request is
//! recorded verbatim, in arrival order, so tests can assert on exactly what an
//! exporter sent.
//!
//! ```no_run
//! use delta_bridge_receiver::ValidationReceiver;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let receiver = ValidationReceiver::start()?;
//! println!("point an exporter at {}", receiver.http_endpoint());
//!
//! receiver.wait_for(|requests| !requests.is_empty(), Duration::from_secs(5))?;
//! println!("my-counter: {:?}", receiver.sum_values("my-counter"));
//! # Ok(())
//! # }
//! ```
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

mod grpc;
mod http;
mod store;

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::metrics::v1::{metric::Data, number_data_point, NumberDataPoint};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::store::RequestStore;

/// Errors raised by the [ValidationReceiver].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReceiverError {
    /// A listener could not be bound or registered with the runtime.
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),

    /// The runtime or its thread could not be started.
    #[error("failed to start receiver runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// `wait_for` gave up before the condition held.
    #[error("condition not met within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) store: RequestStore,
    rejecting: AtomicBool,
}

impl Shared {
    pub(crate) fn is_rejecting(&self) -> bool {
        self.rejecting.load(Ordering::Acquire)
    }
}

/// Records every OTLP metrics export it receives.
///
/// Dropping the receiver shuts it down.
pub struct ValidationReceiver {
    shared: Arc<Shared>,
    http_addr: SocketAddr,
    grpc_addr: SocketAddr,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ValidationReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationReceiver")
            .field("http_addr", &self.http_addr)
            .field("grpc_addr", &self.grpc_addr)
            .field("recorded", &self.len())
            .finish()
    }
}

impl ValidationReceiver {
    /// Bind both listeners and start serving.
    pub fn start() -> Result<Self, ReceiverError> {
        let http_listener =
            std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(ReceiverError::Bind)?;
        let grpc_listener =
            std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(ReceiverError::Bind)?;
        let http_addr = http_listener.local_addr().map_err(ReceiverError::Bind)?;
        let grpc_addr = grpc_listener.local_addr().map_err(ReceiverError::Bind)?;
        http_listener
            .set_nonblocking(true)
            .map_err(ReceiverError::Bind)?;
        grpc_listener
            .set_nonblocking(true)
            .map_err(ReceiverError::Bind)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("validation-receiver-worker")
            .enable_all()
            .build()
            .map_err(ReceiverError::Runtime)?;

        let (http_listener, grpc_listener) = {
            let _guard = runtime.enter();
            (
                tokio::net::TcpListener::from_std(http_listener).map_err(ReceiverError::Bind)?,
                tokio::net::TcpListener::from_std(grpc_listener).map_err(ReceiverError::Bind)?,
            )
        };

        let shared = Arc::new(Shared::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let server_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("ValidationReceiver".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    tokio::select! {
                        _ = http::serve(http_listener, Arc::clone(&server_shared)) => {}
                        result = grpc::serve(grpc_listener, server_shared) => {
                            if let Err(err) = result {
                                tracing::error!(name: "ValidationReceiver.GrpcServerFailed", error = %err);
                            }
                        }
                        _ = shutdown_rx => {}
                    }
                });
                // Open client connections must not hold up shutdown.
                runtime.shutdown_background();
            })
            .map_err(ReceiverError::Runtime)?;

        tracing::info!(
            name: "ValidationReceiver.Started",
            http = %http_addr,
            grpc = %grpc_addr
        );

        Ok(ValidationReceiver {
            shared,
            http_addr,
            grpc_addr,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Full OTLP/HTTP metrics URL, e.g. `http://127.0.0.1:4711/v1/metrics`.
    pub fn http_endpoint(&self) -> String {
        format!("http://{}{}", self.http_addr, http::METRICS_PATH)
    }

    /// OTLP/gRPC endpoint, e.g. `http://127.0.0.1:4712`.
    pub fn grpc_endpoint(&self) -> String {
        format!("http://{}", self.grpc_addr)
    }

    /// All requests recorded so far, oldest first.
    pub fn requests(&self) -> Vec<ExportMetricsServiceRequest> {
        self.shared.store.snapshot()
    }

    /// Forget every recorded request.
    pub fn reset(&self) {
        self.shared.store.reset();
    }

    /// Number of recorded requests.
    pub fn len(&self) -> usize {
        self.shared.store.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// While rejecting, HTTP requests are answered with `503` and gRPC
    /// requests with `UNAVAILABLE`, and nothing is recorded.
    pub fn set_rejecting(&self, rejecting: bool) {
        self.shared.rejecting.store(rejecting, Ordering::Release);
    }

    /// Values of every sum data point of `metric`, in arrival order. Integer
    /// points are converted to `f64`.
    pub fn sum_values(&self, metric: &str) -> Vec<f64> {
        self.sum_points(metric)
            .iter()
            .filter_map(|point| match point.value {
                Some(number_data_point::Value::AsInt(v)) => Some(v as f64),
                Some(number_data_point::Value::AsDouble(v)) => Some(v),
                None => None,
            })
            .collect()
    }

    /// Every sum data point of `metric`, in arrival order.
    pub fn sum_points(&self, metric: &str) -> Vec<NumberDataPoint> {
        self.shared
            .store
            .with_requests(|requests| sum_points(requests, metric))
    }

    /// Block until `predicate` holds over the recorded requests, returning
    /// them.
    pub fn wait_for<F>(
        &self,
        predicate: F,
        timeout: Duration,
    ) -> Result<Vec<ExportMetricsServiceRequest>, ReceiverError>
    where
        F: Fn(&[ExportMetricsServiceRequest]) -> bool,
    {
        self.shared.store.wait_for(predicate, timeout)
    }

    /// Stop both listeners and join the server thread. Repeated calls are
    /// no-ops.
    pub fn shutdown(&self) {
        if let Some(tx) = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(());
        }
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(
                    name: "ValidationReceiver.ServerThreadPanicked",
                    "server thread panicked"
                );
            }
            tracing::info!(name: "ValidationReceiver.Stopped", recorded = self.len());
        }
    }
}

impl Drop for ValidationReceiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Collect the data points of every `Sum` named `metric` across `requests`.
pub fn sum_points(requests: &[ExportMetricsServiceRequest], metric: &str) -> Vec<NumberDataPoint> {
    requests
        .iter()
        .flat_map(|r| &r.resource_metrics)
        .flat_map(|rm| &rm.scope_metrics)
        .flat_map(|sm| &sm.metrics)
        .filter(|m| m.name == metric)
        .filter_map(|m| match &m.data {
            Some(Data::Sum(sum)) => Some(sum.data_points.iter().cloned()),
            _ => None,
        })
        .flatten()
        .collect()
}
