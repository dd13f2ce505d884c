use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;

use crate::ReceiverError;

/// Append-only log of decoded export requests, in arrival order.
#[derive(Debug, Default)]
pub(crate) struct RequestStore {
    requests: Mutex<Vec<ExportMetricsServiceRequest>>,
    changed: Condvar,
}

impl RequestStore {
    // Readers never observe a half-written entry, so a poisoned lock is still
    // safe to use.
    fn lock(&self) -> MutexGuard<'_, Vec<ExportMetricsServiceRequest>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push(&self, request: ExportMetricsServiceRequest) {
        self.lock().push(request);
        self.changed.notify_all();
    }

    pub(crate) fn snapshot(&self) -> Vec<ExportMetricsServiceRequest> {
        self.lock().clone()
    }

    pub(crate) fn with_requests<T>(&self, f: impl FnOnce(&[ExportMetricsServiceRequest]) -> T) -> T {
        f(&self.lock())
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn reset(&self) {
        self.lock().clear();
        self.changed.notify_all();
    }

    pub(crate) fn wait_for<F>(
        &self,
        predicate: F,
        timeout: Duration,
    ) -> Result<Vec<ExportMetricsServiceRequest>, ReceiverError>
    where
        F: Fn(&[ExportMetricsServiceRequest]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        loop {
            if predicate(&guard) {
                return Ok(guard.clone());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ReceiverError::Timeout(timeout));
            }
            guard = self
                .changed
                .wait_timeout(guard, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::metrics::v1::ResourceMetrics;
    use std::sync::Arc;
    use std::thread;

    fn tagged(tag: &str) -> ExportMetricsServiceRequest {
        ExportMetricsServiceRequest {
            resource_metrics: vec![ResourceMetrics {
                schema_url: tag.to_string(),
                ..Default::default()
            }],
        }
    }

    fn tags(requests: &[ExportMetricsServiceRequest]) -> Vec<String> {
        requests
            .iter()
            .map(|r| r.resource_metrics[0].schema_url.clone())
            .collect()
    }

    #[test]
    fn keeps_arrival_order() {
        let store = RequestStore::default();
        for tag in ["first", "second", "third"] {
            store.push(tagged(tag));
        }
        assert_eq!(tags(&store.snapshot()), ["first", "second", "third"]);
        assert_eq!(store.with_requests(|r| tags(&r[1..])), ["second", "third"]);

        store.reset();
        assert_eq!(store.len(), 0);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn concurrent_pushes_are_all_kept() {
        const WRITERS: usize = 8;
        const PER_WRITER: usize = 50;

        let store = RequestStore::default();
        thread::scope(|scope| {
            for writer in 0..WRITERS {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..PER_WRITER {
                        store.push(tagged(&format!("{writer}-{i}")));
                    }
                });
            }
        });

        let recorded = tags(&store.snapshot());
        assert_eq!(recorded.len(), WRITERS * PER_WRITER);
        for writer in 0..WRITERS {
            // each writer's own pushes stay in the order it made them
            let own: Vec<_> = recorded
                .iter()
                .filter(|t| t.starts_with(&format!("{writer}-")))
                .cloned()
                .collect();
            let expected: Vec<_> = (0..PER_WRITER).map(|i| format!("{writer}-{i}")).collect();
            assert_eq!(own, expected);
        }
    }

    #[test]
    fn wait_for_wakes_on_push() {
        let store = Arc::new(RequestStore::default());
        let writer = Arc::clone(&store);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            writer.push(ExportMetricsServiceRequest::default());
        });

        let requests = store
            .wait_for(|r| !r.is_empty(), Duration::from_secs(5))
            .unwrap();
        assert_eq!(requests.len(), 1);
        handle.join().unwrap();
    }

    #[test]
    fn wait_for_times_out() {
        let store = RequestStore::default();
        let result = store.wait_for(|r| !r.is_empty(), Duration::from_millis(20));
        assert!(matches!(result, Err(ReceiverError::Timeout(_))));
    }
}
