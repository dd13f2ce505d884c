//! In-process cumulative sums.
//!
//! A [SumRecorder] holds a set of [View]s. Each view sums one measure and
//! splits the sum by the values of a fixed list of tag keys. Recording a
//! measurement adds it to every view over that measure; tags not listed by a
//! view are dropped for that view.
use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use rustc_hash::FxHashMap;

use crate::{bridge_debug, bridge_info, BridgeError, BridgeResult};

use super::{AttributeSet, CumulativePoint, KeyValue, MetricProducer, SeriesKey, Value};

/// The number type a measure records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasureKind {
    /// Unsigned integers.
    U64,
    /// Non-negative finite floats.
    F64,
}

impl fmt::Display for MeasureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasureKind::U64 => f.write_str("u64"),
            MeasureKind::F64 => f.write_str("f64"),
        }
    }
}

/// A sum over one measure, exported under its own metric name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    name: Cow<'static, str>,
    measure: Cow<'static, str>,
    kind: MeasureKind,
    tag_keys: Vec<String>,
    description: Cow<'static, str>,
    unit: Cow<'static, str>,
}

impl View {
    /// Start a view named `name` summing `measure`.
    pub fn builder(
        name: impl Into<Cow<'static, str>>,
        measure: impl Into<Cow<'static, str>>,
        kind: MeasureKind,
    ) -> ViewBuilder {
        ViewBuilder {
            view: View {
                name: name.into(),
                measure: measure.into(),
                kind,
                tag_keys: Vec::new(),
                description: Cow::Borrowed(""),
                unit: Cow::Borrowed(""),
            },
        }
    }

    /// The exported metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The measure being summed.
    pub fn measure(&self) -> &str {
        &self.measure
    }

    /// The number type of the measure.
    pub fn kind(&self) -> MeasureKind {
        self.kind
    }

    /// Tag keys kept as attributes.
    pub fn tag_keys(&self) -> &[String] {
        &self.tag_keys
    }

    /// Human readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Unit of the recorded values.
    pub fn unit(&self) -> &str {
        &self.unit
    }
}

/// Configuration for a [View].
#[derive(Debug)]
pub struct ViewBuilder {
    view: View,
}

impl ViewBuilder {
    /// Keep these tag keys as attributes. Other tags are dropped.
    pub fn with_tag_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.view.tag_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.view.description = description.into();
        self
    }

    /// Set the unit.
    pub fn with_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.view.unit = unit.into();
        self
    }

    /// Create the [View].
    pub fn build(self) -> View {
        self.view
    }
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    value: Value,
    start_time: SystemTime,
}

#[derive(Debug)]
struct ViewState {
    view: View,
    series: FxHashMap<AttributeSet, Accumulator>,
}

impl ViewState {
    fn add(&mut self, value: Value, tags: &[KeyValue]) {
        let attributes: AttributeSet = tags
            .iter()
            .filter(|kv| self.view.tag_keys.iter().any(|k| *k == kv.key))
            .cloned()
            .collect();

        let acc = self.series.entry(attributes).or_insert_with(|| Accumulator {
            value: match value {
                Value::U64(_) => Value::U64(0),
                Value::F64(_) => Value::F64(0.0),
            },
            start_time: SystemTime::now(),
        });
        acc.value = match (acc.value, value) {
            (Value::U64(total), Value::U64(v)) => Value::U64(total.saturating_add(v)),
            (Value::F64(total), Value::F64(v)) => Value::F64(total + v),
            // kinds are checked against the view before recording
            (total, _) => total,
        };
    }
}

/// Thread-safe store of cumulative sums, and the bridge's built-in
/// [MetricProducer].
///
/// Cloning is cheap; clones share the same views and sums.
#[derive(Clone, Default)]
pub struct SumRecorder {
    views: Arc<Mutex<Vec<ViewState>>>,
}

impl fmt::Debug for SumRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SumRecorder").finish()
    }
}

impl SumRecorder {
    /// Create a recorder without views.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a view.
    ///
    /// Registering an identical view again does nothing. A different view with
    /// an existing name, or a view that disagrees with an existing one about the
    /// kind of its measure, is rejected.
    pub fn register_view(&self, view: View) -> BridgeResult {
        let mut views = self.views.lock()?;
        if let Some(existing) = views.iter().find(|s| s.view.name == view.name) {
            if existing.view == view {
                return Ok(());
            }
            return Err(BridgeError::InvalidMeasurement(format!(
                "a different view named {} is already registered",
                view.name
            )));
        }
        if let Some(other) = views
            .iter()
            .find(|s| s.view.measure == view.measure && s.view.kind != view.kind)
        {
            return Err(BridgeError::InvalidMeasurement(format!(
                "measure {} is recorded as {} by view {}",
                view.measure, other.view.kind, other.view.name
            )));
        }

        bridge_info!(
            name: "SumRecorder.ViewRegistered",
            view = &*view.name,
            measure = &*view.measure
        );
        views.push(ViewState {
            view,
            series: FxHashMap::default(),
        });
        Ok(())
    }

    /// Add `value` to every view over `measure`.
    pub fn record(&self, measure: &str, value: Value, tags: &[KeyValue]) -> BridgeResult {
        if let Value::F64(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(BridgeError::InvalidMeasurement(format!(
                    "{measure} received {v}, sums only accept non-negative finite values"
                )));
            }
        }

        let mut views = self.views.lock()?;
        let mut matched = false;
        for state in views.iter_mut().filter(|s| s.view.measure == measure) {
            let expected = state.view.kind;
            let actual = match value {
                Value::U64(_) => MeasureKind::U64,
                Value::F64(_) => MeasureKind::F64,
            };
            if expected != actual {
                return Err(BridgeError::InvalidMeasurement(format!(
                    "{measure} is a {expected} measure, got a {actual} value"
                )));
            }
            state.add(value, tags);
            matched = true;
        }

        if matched {
            Ok(())
        } else {
            Err(BridgeError::InvalidMeasurement(format!(
                "no view is registered for measure {measure}"
            )))
        }
    }

    /// Shorthand for [`record`](Self::record) with an integer.
    pub fn record_u64(&self, measure: &str, value: u64, tags: &[KeyValue]) -> BridgeResult {
        self.record(measure, Value::U64(value), tags)
    }

    /// Shorthand for [`record`](Self::record) with a float.
    pub fn record_f64(&self, measure: &str, value: f64, tags: &[KeyValue]) -> BridgeResult {
        self.record(measure, Value::F64(value), tags)
    }

    /// Drop all accumulated sums, keeping the views. The next recordings start
    /// from zero with a new start time, which is what a process restart looks
    /// like downstream.
    pub fn reset(&self) -> BridgeResult {
        let mut views = self.views.lock()?;
        for state in views.iter_mut() {
            state.series.clear();
        }
        bridge_debug!(name: "SumRecorder.Reset");
        Ok(())
    }
}

impl MetricProducer for SumRecorder {
    fn produce(&self) -> BridgeResult<Vec<CumulativePoint>> {
        let views = self
            .views
            .lock()
            .map_err(|e| BridgeError::SnapshotUnavailable(e.to_string()))?;
        let observed_at = SystemTime::now();

        let mut points = Vec::new();
        for state in views.iter() {
            let mut series: Vec<(&AttributeSet, &Accumulator)> = state.series.iter().collect();
            series.sort_by(|a, b| a.0.cmp(b.0));
            points.extend(series.into_iter().map(|(attributes, acc)| CumulativePoint {
                key: SeriesKey::new(state.view.name.clone(), attributes.clone()),
                value: acc.value,
                start_time: acc.start_time,
                observed_at,
            }));
        }
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_view() -> View {
        View::builder("my-counter", "my-measure", MeasureKind::U64)
            .with_tag_keys(["my-key"])
            .with_description("counts things")
            .with_unit("1")
            .build()
    }

    fn tags() -> Vec<KeyValue> {
        vec![KeyValue::new("my-key", "my-value")]
    }

    #[test]
    fn sums_are_cumulative() {
        let recorder = SumRecorder::new();
        recorder.register_view(counter_view()).unwrap();

        recorder.record_u64("my-measure", 1, &tags()).unwrap();
        let first = recorder.produce().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].value, Value::U64(1));
        assert_eq!(first[0].key.name(), "my-counter");
        assert_eq!(first[0].key.attributes().get("my-key"), Some("my-value"));

        recorder.record_u64("my-measure", 2, &tags()).unwrap();
        let second = recorder.produce().unwrap();
        assert_eq!(second[0].value, Value::U64(3));
        assert_eq!(second[0].start_time, first[0].start_time);
        assert!(second[0].observed_at >= first[0].observed_at);
    }

    #[test]
    fn unlisted_tags_are_dropped() {
        let recorder = SumRecorder::new();
        recorder.register_view(counter_view()).unwrap();
        recorder
            .record_u64(
                "my-measure",
                1,
                &[KeyValue::new("my-key", "a"), KeyValue::new("other", "x")],
            )
            .unwrap();
        recorder
            .record_u64(
                "my-measure",
                1,
                &[KeyValue::new("my-key", "a"), KeyValue::new("other", "y")],
            )
            .unwrap();

        let points = recorder.produce().unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, Value::U64(2));
        assert_eq!(points[0].key.attributes().len(), 1);
    }

    #[test]
    fn one_measure_feeds_every_view() {
        let recorder = SumRecorder::new();
        recorder.register_view(counter_view()).unwrap();
        recorder
            .register_view(View::builder("my-counter-total", "my-measure", MeasureKind::U64).build())
            .unwrap();

        recorder
            .record_u64("my-measure", 2, &[KeyValue::new("my-key", "a")])
            .unwrap();
        recorder
            .record_u64("my-measure", 3, &[KeyValue::new("my-key", "b")])
            .unwrap();

        let points = recorder.produce().unwrap();
        let summary: Vec<(&str, Option<&str>, Value)> = points
            .iter()
            .map(|p| (p.key.name(), p.key.attributes().get("my-key"), p.value))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("my-counter", Some("a"), Value::U64(2)),
                ("my-counter", Some("b"), Value::U64(3)),
                ("my-counter-total", None, Value::U64(5)),
            ]
        );
    }

    #[test]
    fn registration_rules() {
        let recorder = SumRecorder::new();
        recorder.register_view(counter_view()).unwrap();
        // identical view is a no-op
        recorder.register_view(counter_view()).unwrap();

        let conflicting = View::builder("my-counter", "my-measure", MeasureKind::U64).build();
        assert!(matches!(
            recorder.register_view(conflicting),
            Err(BridgeError::InvalidMeasurement(_))
        ));

        let other_kind = View::builder("my-float", "my-measure", MeasureKind::F64).build();
        assert!(matches!(
            recorder.register_view(other_kind),
            Err(BridgeError::InvalidMeasurement(_))
        ));
    }

    #[test]
    fn invalid_measurements_are_rejected() {
        let recorder = SumRecorder::new();
        recorder.register_view(counter_view()).unwrap();
        recorder
            .register_view(View::builder("latency", "latency-ms", MeasureKind::F64).build())
            .unwrap();

        for result in [
            recorder.record_u64("unknown", 1, &[]),
            recorder.record_f64("my-measure", 1.0, &[]),
            recorder.record_u64("latency-ms", 1, &[]),
            recorder.record_f64("latency-ms", -1.0, &[]),
            recorder.record_f64("latency-ms", f64::NAN, &[]),
            recorder.record_f64("latency-ms", f64::INFINITY, &[]),
        ] {
            assert!(matches!(result, Err(BridgeError::InvalidMeasurement(_))));
        }
        assert!(recorder.produce().unwrap().is_empty());

        recorder.record_f64("latency-ms", 0.5, &[]).unwrap();
        assert_eq!(recorder.produce().unwrap()[0].value, Value::F64(0.5));
    }

    #[test]
    fn reset_starts_over() {
        let recorder = SumRecorder::new();
        recorder.register_view(counter_view()).unwrap();
        recorder.record_u64("my-measure", 10, &tags()).unwrap();
        let before = recorder.produce().unwrap();

        recorder.reset().unwrap();
        assert!(recorder.produce().unwrap().is_empty());

        recorder.record_u64("my-measure", 2, &tags()).unwrap();
        let after = recorder.produce().unwrap();
        assert_eq!(after[0].value, Value::U64(2));
        assert!(after[0].start_time >= before[0].start_time);
    }

    #[test]
    fn clones_share_state() {
        let recorder = SumRecorder::new();
        let clone = recorder.clone();
        recorder.register_view(counter_view()).unwrap();
        clone.record_u64("my-measure", 4, &tags()).unwrap();
        assert_eq!(recorder.produce().unwrap()[0].value, Value::U64(4));
    }

    #[test]
    fn concurrent_recording() {
        let recorder = SumRecorder::new();
        recorder.register_view(counter_view()).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let recorder = recorder.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        recorder.record_u64("my-measure", 1, &tags()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(recorder.produce().unwrap()[0].value, Value::U64(400));
    }
}
