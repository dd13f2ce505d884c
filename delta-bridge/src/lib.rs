//! Periodic export of cumulative sums as delta metrics.
//!
//! Callers record measurements into a [`MetricProducer`] (the in-process
//! [`SumRecorder`] or any other source of running totals). An
//! [`ExportScheduler`] wakes up on a fixed interval, takes one snapshot from the
//! producer, turns the cumulative values into deltas with a
//! [`TemporalityConverter`] and hands the resulting [`ExportBatch`] to a
//! [`PushExporter`].
//!
//! # Getting started
//!
//! ```no_run
//! use delta_bridge::metrics::{ExportScheduler, KeyValue, MeasureKind, SumRecorder, View};
//! use std::time::Duration;
//!
//! # fn example<E>(get_exporter: impl Fn() -> E) -> Result<(), Box<dyn std::error::Error>>
//! # where
//! #     E: delta_bridge::PushExporter,
//! # {
//! let recorder = SumRecorder::new();
//! recorder.register_view(
//!     View::builder("my-counter", "my-measure", MeasureKind::U64)
//!         .with_tag_keys(["my-key"])
//!         .build(),
//! )?;
//!
//! let exporter = get_exporter(); // set up a push exporter like OTLP
//! let scheduler = ExportScheduler::builder(exporter, recorder.clone())
//!     .with_interval(Duration::from_millis(500))
//!     .build();
//!
//! recorder.record_u64("my-measure", 1, &[KeyValue::new("my-key", "my-value")])?;
//! scheduler.force_flush()?;
//! scheduler.shutdown()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! * `internal-logs` (enabled by default): forward the `bridge_*` diagnostics
//!   to [`tracing`](https://docs.rs/tracing).
//! * `testing`: expose [`InMemoryExporter`](metrics::InMemoryExporter) outside
//!   of this crate's own tests.
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

pub mod error;
mod internal_logging;
pub mod metrics;
mod resource;

pub use error::{BridgeError, BridgeResult};
pub use metrics::{
    ExportBatch, ExportScheduler, MetricProducer, PushExporter, SumRecorder, TemporalityConverter,
};
pub use resource::{Resource, ResourceBuilder, SERVICE_NAME};

#[cfg(feature = "internal-logs")]
#[doc(hidden)]
pub mod _private {
    pub use tracing::{debug, error, info, warn}; // Re-export
}
