use std::fmt::Debug;
use std::sync::Arc;

use crate::BridgeResult;

use super::CumulativePoint;

/// A source of running totals.
///
/// Each call returns a consistent, point-in-time snapshot of every registered
/// series. A snapshot must never observe a partially applied recording.
/// Failures are reported as [`BridgeError::SnapshotUnavailable`] and make the
/// scheduler skip the tick without touching its baseline.
///
/// [`BridgeError::SnapshotUnavailable`]: crate::BridgeError::SnapshotUnavailable
pub trait MetricProducer: Send + Sync + Debug + 'static {
    /// Take one snapshot of all series.
    fn produce(&self) -> BridgeResult<Vec<CumulativePoint>>;
}

impl<T: MetricProducer + ?Sized> MetricProducer for Arc<T> {
    fn produce(&self) -> BridgeResult<Vec<CumulativePoint>> {
        (**self).produce()
    }
}
