use anyhow::Result;
use delta_bridge::metrics::{ExportScheduler, KeyValue, MeasureKind, Scope, SumRecorder, View};
use delta_bridge::Resource;
use delta_bridge_otlp::{MetricExporter, Protocol};
use std::thread;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_ITERATIONS: u64 = 60;

fn init_scheduler(recorder: &SumRecorder) -> Result<ExportScheduler> {
    // Endpoint, headers, compression and timeout come from the
    // OTEL_EXPORTER_OTLP_* variables when set.
    let exporter = MetricExporter::builder()
        .with_protocol(Protocol::HttpBinary) //can be changed to `Protocol::HttpJson` to export in JSON format
        .build()?;

    Ok(ExportScheduler::builder(exporter, recorder.clone())
        .with_resource(Resource::builder().with_service_name("showcase").build())
        .with_scope(Scope::builder("showcase").with_version("1.0").build())
        .build())
}

fn main() -> Result<()> {
    // `info` and above for everything, `debug` for the bridge's own
    // diagnostics.
    let filter_fmt = EnvFilter::new("info")
        .add_directive("delta_bridge=debug".parse()?)
        .add_directive("delta_bridge_otlp=debug".parse()?);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_thread_names(true)
        .with_filter(filter_fmt);
    tracing_subscriber::registry().with(fmt_layer).init();

    let iterations = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(DEFAULT_ITERATIONS);

    let recorder = SumRecorder::new();
    recorder.register_view(
        View::builder("my-counter", "my-measure", MeasureKind::U64)
            .with_tag_keys(["my-key"])
            .with_description("a simple counter for demo purposes.")
            .with_unit("1")
            .build(),
    )?;

    let scheduler = init_scheduler(&recorder)?;

    let tags = [KeyValue::new("my-key", "my-value")];
    for i in 1..=iterations {
        recorder.record_u64("my-measure", 1, &tags)?;
        info!(target: "showcase", "recorded my-counter, running total {}", i);
        thread::sleep(Duration::from_secs(1));
    }

    scheduler.shutdown_with_flush()?;
    Ok(())
}
