//! The metric pipeline: recording, conversion and periodic export.
//!
//! ```text
//! SumRecorder ──produce()──▶ ExportScheduler ──convert()──▶ TemporalityConverter
//!                                   │
//!                                   └──export(ExportBatch)──▶ PushExporter
//! ```
//!
//! A [MetricProducer] hands out running totals. The [ExportScheduler] owns a
//! [TemporalityConverter] on its worker thread and turns each snapshot into the
//! change since the previous one before pushing it downstream.

mod attribute_set;
mod converter;
pub mod data;
pub mod exporter;
#[cfg(any(feature = "testing", test))]
#[cfg_attr(docsrs, doc(cfg(any(feature = "testing", test))))]
mod in_memory_exporter;
mod producer;
mod recorder;
mod scheduler;

pub use attribute_set::{AttributeSet, KeyValue, SeriesKey};
pub use converter::TemporalityConverter;
pub use data::{CumulativePoint, DeltaPoint, ExportBatch, Scope, Value};
pub use exporter::PushExporter;
#[cfg(any(feature = "testing", test))]
#[cfg_attr(docsrs, doc(cfg(any(feature = "testing", test))))]
pub use in_memory_exporter::InMemoryExporter;
pub use producer::MetricProducer;
pub use recorder::{MeasureKind, SumRecorder, View, ViewBuilder};
pub use scheduler::{ExportScheduler, ExportSchedulerBuilder, SchedulerState};

/// Defines the window that an aggregation was calculated over.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Temporality {
    /// A measurement interval that continues to expand forward in time from a
    /// starting point.
    ///
    /// New measurements are added to all previous measurements since a start time.
    Cumulative,

    /// A measurement interval that resets each cycle.
    ///
    /// Measurements from one cycle are recorded independently, measurements from
    /// other cycles do not affect them.
    #[default]
    Delta,
}
