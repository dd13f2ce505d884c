//! Conversion of [`ExportBatch`] into OTLP protobuf messages.
//!
//! Every batch becomes exactly one `ResourceMetrics` holding one
//! `ScopeMetrics`. Points are grouped into one monotonic delta `Sum` per
//! metric name, keeping the order in which names first appear in the batch.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use delta_bridge::metrics::{DeltaPoint, Scope, Temporality, Value};
use delta_bridge::{ExportBatch, Resource};
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::metrics::v1::{
    metric::Data, number_data_point, AggregationTemporality, Metric, NumberDataPoint,
    ResourceMetrics, ScopeMetrics, Sum,
};
use opentelemetry_proto::tonic::resource::v1::Resource as ProtoResource;

pub(crate) fn to_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_nanos() as u64
}

fn string_kv(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_string())),
        }),
        ..Default::default()
    }
}

/// Map the bridge temporality onto the OTLP enum.
pub fn aggregation_temporality(temporality: Temporality) -> AggregationTemporality {
    match temporality {
        Temporality::Cumulative => AggregationTemporality::Cumulative,
        _ => AggregationTemporality::Delta,
    }
}

/// Integers above `i64::MAX` saturate, the OTLP integer type is signed.
pub fn number_value(value: &Value) -> number_data_point::Value {
    match value {
        Value::U64(v) => number_data_point::Value::AsInt(i64::try_from(*v).unwrap_or(i64::MAX)),
        Value::F64(v) => number_data_point::Value::AsDouble(*v),
    }
}

fn data_point(point: &DeltaPoint) -> NumberDataPoint {
    NumberDataPoint {
        attributes: point
            .key
            .attributes()
            .iter()
            .map(|(k, v)| string_kv(k, v))
            .collect(),
        start_time_unix_nano: to_nanos(point.start_time),
        time_unix_nano: to_nanos(point.time),
        value: Some(number_value(&point.value)),
        ..Default::default()
    }
}

/// Convert the bridge resource.
pub fn resource(resource: &Resource) -> ProtoResource {
    ProtoResource {
        attributes: resource.iter().map(|(k, v)| string_kv(k, v)).collect(),
        ..Default::default()
    }
}

/// Convert the bridge scope.
pub fn instrumentation_scope(scope: &Scope) -> InstrumentationScope {
    InstrumentationScope {
        name: scope.name().to_string(),
        version: scope.version().unwrap_or_default().to_string(),
        ..Default::default()
    }
}

/// Group the batch's points into one `Sum` metric per name.
pub fn metrics(batch: &ExportBatch) -> Vec<Metric> {
    let temporality = aggregation_temporality(batch.temporality()) as i32;
    let mut metrics: Vec<Metric> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for point in &batch.points {
        let slot = *index.entry(point.key.name()).or_insert_with(|| {
            metrics.push(Metric {
                name: point.key.name().to_string(),
                data: Some(Data::Sum(Sum {
                    data_points: Vec::new(),
                    aggregation_temporality: temporality,
                    is_monotonic: true,
                })),
                ..Default::default()
            });
            metrics.len() - 1
        });

        if let Some(Data::Sum(sum)) = &mut metrics[slot].data {
            sum.data_points.push(data_point(point));
        }
    }

    metrics
}

/// Build the full export request for one batch.
pub fn export_request(batch: &ExportBatch) -> ExportMetricsServiceRequest {
    ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            resource: Some(resource(&batch.resource)),
            scope_metrics: vec![ScopeMetrics {
                scope: Some(instrumentation_scope(&batch.scope)),
                metrics: metrics(batch),
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}
