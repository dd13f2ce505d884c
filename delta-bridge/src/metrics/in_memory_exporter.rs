use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{BridgeError, BridgeResult};

use super::{ExportBatch, PushExporter};

/// An in-memory exporter that stores every exported batch.
///
/// This exporter is useful for testing and debugging purposes. Batches are
/// kept in a `VecDeque<ExportBatch>` and can be retrieved with
/// [`get_finished_batches`](Self::get_finished_batches). Clones share storage.
///
/// # Example
///
/// ```
/// # use delta_bridge::metrics::{ExportScheduler, InMemoryExporter, MeasureKind, SumRecorder, View};
/// let recorder = SumRecorder::new();
/// recorder
///     .register_view(View::builder("my_counter", "requests", MeasureKind::U64).build())
///     .unwrap();
///
/// let exporter = InMemoryExporter::default();
/// let scheduler = ExportScheduler::builder(exporter.clone(), recorder.clone()).build();
///
/// recorder.record_u64("requests", 1, &[]).unwrap();
/// scheduler.force_flush().unwrap();
///
/// let batches = exporter.get_finished_batches().unwrap();
/// assert_eq!(batches.len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryExporter {
    batches: Arc<Mutex<VecDeque<ExportBatch>>>,
    shutdown_called: Arc<AtomicBool>,
}

impl fmt::Debug for InMemoryExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryExporter").finish()
    }
}

impl InMemoryExporter {
    /// Returns the batches exported so far, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError::InternalFailure`] if the internal lock is
    /// poisoned.
    pub fn get_finished_batches(&self) -> BridgeResult<Vec<ExportBatch>> {
        self.batches
            .lock()
            .map(|guard| guard.iter().cloned().collect())
            .map_err(BridgeError::from)
    }

    /// Clears the internal storage of finished batches.
    pub fn reset(&self) {
        let _ = self.batches.lock().map(|mut guard| guard.clear());
    }

    /// Whether `shutdown` was called on this exporter or one of its clones.
    pub fn is_shutdown_called(&self) -> bool {
        self.shutdown_called.load(Ordering::Relaxed)
    }
}

impl PushExporter for InMemoryExporter {
    async fn export(&self, batch: &ExportBatch) -> BridgeResult {
        self.batches
            .lock()
            .map(|mut guard| guard.push_back(batch.clone()))
            .map_err(|_| BridgeError::InternalFailure("Failed to lock batches".to_string()))
    }

    fn force_flush(&self) -> BridgeResult {
        Ok(()) // In this implementation, flush does nothing
    }

    fn shutdown_with_timeout(&self, _timeout: Duration) -> BridgeResult {
        self.shutdown_called.store(true, Ordering::Relaxed);
        Ok(())
    }
}
