use std::time::SystemTime;

use rustc_hash::FxHashMap;

use crate::bridge_warn;

use super::{CumulativePoint, DeltaPoint, SeriesKey, Value};

#[derive(Debug, Clone, Copy)]
struct SeriesState {
    last_value: Value,
    last_observed_at: SystemTime,
    start_time: SystemTime,
}

/// Turns consecutive cumulative snapshots into per-series deltas.
///
/// The converter remembers, for every series it has seen, the value and time
/// of the last point it emitted. Each call to [`convert`](Self::convert)
/// reports the change since then and moves the baseline forward. A series that
/// goes backwards, or whose start time moved, is treated as restarted: its full
/// current value is reported and the reset counter is bumped. Series whose value did not change are left
/// out entirely, so the next non-empty delta covers the whole quiet period.
///
/// State is never dropped: a series missing from a snapshot keeps its
/// baseline until it shows up again.
#[derive(Debug, Default)]
pub struct TemporalityConverter {
    state: FxHashMap<SeriesKey, SeriesState>,
    resets: u64,
}

impl TemporalityConverter {
    /// Create a converter with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert one full snapshot. Points keep their snapshot order.
    pub fn convert(&mut self, snapshot: Vec<CumulativePoint>) -> Vec<DeltaPoint> {
        let mut deltas = Vec::with_capacity(snapshot.len());
        for point in snapshot {
            let CumulativePoint {
                key,
                value,
                start_time,
                observed_at,
            } = point;

            let (delta, interval_start) = match self.state.get(&key) {
                None => (value, start_time),
                Some(last) => match value.delta_since(&last.last_value) {
                    Some(delta) if last.start_time == start_time => {
                        if delta.is_zero() {
                            continue;
                        }
                        (delta, last.last_observed_at)
                    }
                    _ => {
                        self.resets += 1;
                        bridge_warn!(
                            name: "TemporalityConverter.ResetDetected",
                            metric = key.name(),
                            previous = format!("{}", last.last_value),
                            current = format!("{}", value)
                        );
                        (value, start_time)
                    }
                },
            };

            self.state.insert(
                key.clone(),
                SeriesState {
                    last_value: value,
                    last_observed_at: observed_at,
                    start_time,
                },
            );
            deltas.push(DeltaPoint {
                key,
                value: delta,
                start_time: interval_start,
                time: observed_at,
            });
        }
        deltas
    }

    /// Number of series with a baseline.
    pub fn len(&self) -> usize {
        self.state.len()
    }

    /// Whether no series has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// How many resets have been detected so far.
    pub fn resets(&self) -> u64 {
        self.resets
    }
}
