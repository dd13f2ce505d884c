//! Errors returned by the bridge.
use std::sync::PoisonError;

/// Errors raised while producing, converting or exporting metrics.
///
/// Every failure is local to one export cycle. The scheduler logs it and keeps
/// running; the interval in question is simply missing downstream.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum BridgeError {
    /// The producer could not deliver a snapshot. The tick is skipped and the
    /// converter baseline is left untouched.
    #[error("snapshot unavailable: {0}")]
    SnapshotUnavailable(String),

    /// A batch could not be encoded into the wire format.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The batch could not be delivered to the receiver.
    #[error("transport failed: {0}")]
    Transport(String),

    /// A measurement or view was rejected at the recording boundary.
    #[error("invalid measurement: {0}")]
    InvalidMeasurement(String),

    /// The component was already shut down.
    #[error("already shut down")]
    AlreadyShutdown,

    /// Something unexpected happened inside the bridge, such as a poisoned lock
    /// or a vanished worker thread.
    #[error("internal failure: {0}")]
    InternalFailure(String),
}

/// Result type used throughout the bridge.
pub type BridgeResult<T = ()> = Result<T, BridgeError>;

impl<T> From<PoisonError<T>> for BridgeError {
    fn from(err: PoisonError<T>) -> Self {
        BridgeError::InternalFailure(format!("mutex poisoned: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn poisoned_lock_maps_to_internal_failure() {
        let lock = Arc::new(Mutex::new(0));
        let cloned = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = cloned.lock().unwrap();
            panic!("poison it");
        })
        .join();

        let err: BridgeError = lock.lock().unwrap_err().into();
        assert!(matches!(err, BridgeError::InternalFailure(_)));
    }

    #[test]
    fn messages_name_the_cause() {
        assert_eq!(
            BridgeError::Transport("status 503".into()).to_string(),
            "transport failed: status 503"
        );
        assert_eq!(BridgeError::AlreadyShutdown.to_string(), "already shut down");
    }
}
