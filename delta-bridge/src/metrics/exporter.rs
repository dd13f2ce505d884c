//! Interfaces for exporting metrics
use std::time::Duration;

use crate::BridgeResult;

use super::{ExportBatch, Temporality};

/// Exporter handles the delivery of delta batches to external receivers.
///
/// This is the final component in the push pipeline.
pub trait PushExporter: Send + Sync + 'static {
    /// Export serializes and transmits one batch to a receiver.
    ///
    /// The bridge does not implement any retry logic. All errors returned by
    /// this function are considered unrecoverable for the batch and will be
    /// logged; the batch is dropped.
    fn export(
        &self,
        batch: &ExportBatch,
    ) -> impl std::future::Future<Output = BridgeResult> + Send;

    /// Flushes any data held by an exporter.
    fn force_flush(&self) -> BridgeResult;

    /// Releases any held computational resources.
    ///
    /// After Shutdown is called, calls to Export will perform no operation and
    /// instead will return an error indicating the shutdown state.
    fn shutdown_with_timeout(&self, timeout: Duration) -> BridgeResult;

    /// Shutdown with the default timeout of 5 seconds.
    fn shutdown(&self) -> BridgeResult {
        self.shutdown_with_timeout(Duration::from_secs(5))
    }

    /// Access the [Temporality] of the exporter. Sums always leave the bridge
    /// as deltas.
    fn temporality(&self) -> Temporality {
        Temporality::Delta
    }
}
