//! Types for delivery of pre-aggregated metric series data.

use std::borrow::Cow;
use std::fmt;
use std::time::SystemTime;

use crate::Resource;

use super::{SeriesKey, Temporality};

/// A non-negative sum value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    /// Integer sum.
    U64(u64),
    /// Floating point sum.
    F64(f64),
}

impl Value {
    /// `self - previous`, or `None` when the series went backwards or changed
    /// its kind.
    pub(crate) fn delta_since(&self, previous: &Value) -> Option<Value> {
        match (self, previous) {
            (Value::U64(current), Value::U64(last)) => current.checked_sub(*last).map(Value::U64),
            (Value::F64(current), Value::F64(last)) if current >= last => {
                Some(Value::F64(current - last))
            }
            _ => None,
        }
    }

    /// Whether the value is zero.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::U64(v) => *v == 0,
            Value::F64(v) => *v == 0.0,
        }
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::U64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::F64(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::U64(v) => v.fmt(f),
            Value::F64(v) => v.fmt(f),
        }
    }
}

/// Running total of one series at the moment a snapshot was taken.
#[derive(Clone, Debug, PartialEq)]
pub struct CumulativePoint {
    /// Identity of the series.
    pub key: SeriesKey,
    /// The running total.
    pub value: Value,
    /// When the producer started accumulating this series.
    pub start_time: SystemTime,
    /// When the snapshot was taken.
    pub observed_at: SystemTime,
}

/// Change of one series over an interval.
#[derive(Clone, Debug, PartialEq)]
pub struct DeltaPoint {
    /// Identity of the series.
    pub key: SeriesKey,
    /// Amount accumulated during the interval.
    pub value: Value,
    /// Start of the interval.
    pub start_time: SystemTime,
    /// End of the interval.
    pub time: SystemTime,
}

/// The instrumentation scope a batch was produced by.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scope {
    name: Cow<'static, str>,
    version: Option<Cow<'static, str>>,
}

impl Scope {
    /// Create a new builder for a scope with the given name.
    pub fn builder<T: Into<Cow<'static, str>>>(name: T) -> ScopeBuilder {
        ScopeBuilder {
            name: name.into(),
            version: None,
        }
    }

    /// Scope name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scope version, if any.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

/// Configuration options for [Scope].
#[derive(Debug)]
pub struct ScopeBuilder {
    name: Cow<'static, str>,
    version: Option<Cow<'static, str>>,
}

impl ScopeBuilder {
    /// Configure the version of the scope.
    pub fn with_version(mut self, version: impl Into<Cow<'static, str>>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Create a new [Scope] from this configuration.
    pub fn build(self) -> Scope {
        Scope {
            name: self.name,
            version: self.version,
        }
    }
}

/// One push worth of delta points.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportBatch {
    /// The service the points belong to.
    pub resource: Resource,
    /// The scope that produced the points.
    pub scope: Scope,
    /// Delta points in snapshot order.
    pub points: Vec<DeltaPoint>,
}

impl ExportBatch {
    /// Batches always carry deltas.
    pub fn temporality(&self) -> Temporality {
        Temporality::Delta
    }
}

#[cfg(test)]
mod tests {
    use super::Value;

    #[test]
    fn delta_since() {
        assert_eq!(Value::U64(5).delta_since(&Value::U64(3)), Some(Value::U64(2)));
        assert_eq!(Value::U64(3).delta_since(&Value::U64(3)), Some(Value::U64(0)));
        assert_eq!(Value::U64(2).delta_since(&Value::U64(10)), None);
        assert_eq!(
            Value::F64(2.5).delta_since(&Value::F64(1.0)),
            Some(Value::F64(1.5))
        );
        assert_eq!(Value::F64(0.5).delta_since(&Value::F64(1.0)), None);
        assert_eq!(Value::F64(5.0).delta_since(&Value::U64(1)), None);
    }
}
