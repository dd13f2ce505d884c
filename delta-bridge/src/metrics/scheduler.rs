use std::{
    env, fmt,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use crate::{
    bridge_debug, bridge_error, bridge_info, bridge_warn, BridgeError, BridgeResult, Resource,
};

use super::{ExportBatch, MetricProducer, PushExporter, Scope, TemporalityConverter};

const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

const METRIC_EXPORT_INTERVAL_NAME: &str = "OTEL_METRIC_EXPORT_INTERVAL";

/// Where the scheduler currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    /// Waiting for the next tick or a control message.
    Idle = 0,
    /// Taking a snapshot from the producer.
    Collecting = 1,
    /// Turning the snapshot into deltas.
    Converting = 2,
    /// Handing the batch to the exporter.
    Exporting = 3,
    /// Shut down. Terminal.
    Stopped = 4,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SchedulerState::Idle,
            1 => SchedulerState::Collecting,
            2 => SchedulerState::Converting,
            3 => SchedulerState::Exporting,
            _ => SchedulerState::Stopped,
        }
    }
}

/// Configuration options for [ExportScheduler].
///
/// By default the scheduler exports every 500 milliseconds. The
/// `OTEL_METRIC_EXPORT_INTERVAL` environment variable (milliseconds) changes
/// the default; [`with_interval`](Self::with_interval) overrides both.
#[derive(Debug)]
pub struct ExportSchedulerBuilder<E, P> {
    interval: Duration,
    exporter: E,
    producer: P,
    resource: Option<Resource>,
    scope: Option<Scope>,
}

impl<E, P> ExportSchedulerBuilder<E, P>
where
    E: PushExporter,
    P: MetricProducer,
{
    fn new(exporter: E, producer: P) -> Self {
        let interval = env::var(METRIC_EXPORT_INTERVAL_NAME)
            .ok()
            .and_then(|v| v.parse().map(Duration::from_millis).ok())
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_INTERVAL);

        ExportSchedulerBuilder {
            interval,
            exporter,
            producer,
            resource: None,
            scope: None,
        }
    }

    /// Configures the intervening time between exports.
    ///
    /// This option overrides any value set for the `OTEL_METRIC_EXPORT_INTERVAL`
    /// environment variable.
    ///
    /// If this option is not used or `interval` is equal to zero, 500
    /// milliseconds is used as the default.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.interval = interval;
        }
        self
    }

    /// The [Resource] attached to every batch. Defaults to the resource
    /// detected from the environment.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// The [Scope] attached to every batch.
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Start the export thread and return a handle to it.
    pub fn build(self) -> ExportScheduler {
        let worker = Worker {
            exporter: self.exporter,
            producer: self.producer,
            converter: TemporalityConverter::new(),
            resource: self.resource.unwrap_or_default(),
            scope: self.scope.unwrap_or_else(|| {
                Scope::builder(env!("CARGO_PKG_NAME"))
                    .with_version(env!("CARGO_PKG_VERSION"))
                    .build()
            }),
            state: Arc::new(AtomicU8::new(SchedulerState::Idle as u8)),
        };
        ExportScheduler::new(worker, self.interval)
    }
}

/// Drives the collect, convert and export cycle on a dedicated thread.
///
/// Every interval the scheduler takes one snapshot from its
/// [MetricProducer], converts it to deltas and pushes the batch to its
/// [PushExporter]. Cycles never overlap. When a cycle takes longer than the
/// interval the next one starts right after it, and any further ticks missed in
/// the meantime are not made up.
///
/// The converter baseline moves forward as soon as a snapshot is converted.
/// A batch that fails to export is dropped and is not folded into the next
/// one.
///
/// Dropping the handle shuts the scheduler down without a final export.
///
/// # Example
///
/// ```no_run
/// use delta_bridge::metrics::{ExportScheduler, SumRecorder};
/// # fn example<E>(get_exporter: impl Fn() -> E)
/// # where
/// #     E: delta_bridge::PushExporter,
/// # {
///
/// let exporter = get_exporter(); // set up a push exporter like OTLP
/// let recorder = SumRecorder::new();
///
/// let scheduler = ExportScheduler::builder(exporter, recorder.clone()).build();
/// # drop(scheduler);
/// # }
/// ```
pub struct ExportScheduler {
    message_sender: Mutex<Sender<Message>>,
    state: Arc<AtomicU8>,
    is_shutdown: AtomicBool,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ExportScheduler {
    /// Configuration options for an export scheduler.
    pub fn builder<E, P>(exporter: E, producer: P) -> ExportSchedulerBuilder<E, P>
    where
        E: PushExporter,
        P: MetricProducer,
    {
        ExportSchedulerBuilder::new(exporter, producer)
    }

    fn new<E, P>(mut worker: Worker<E, P>, interval: Duration) -> Self
    where
        E: PushExporter,
        P: MetricProducer,
    {
        let (message_sender, message_receiver): (Sender<Message>, Receiver<Message>) =
            mpsc::channel();
        let state = worker.state.clone();

        let result_thread_creation = thread::Builder::new()
            .name("DeltaBridge.ExportScheduler".to_string())
            .spawn(move || {
                let mut interval_start = Instant::now();
                let mut remaining_interval = interval;
                bridge_info!(
                    name: "ExportScheduler.ThreadStarted",
                    interval_ms = interval.as_millis()
                );
                loop {
                    bridge_debug!(
                        name: "ExportScheduler.ThreadLoopAlive",
                        message = "Next export will happen after interval, unless flush or shutdown is triggered.",
                        interval_ms = remaining_interval.as_millis()
                    );
                    match message_receiver.recv_timeout(remaining_interval) {
                        Ok(Message::Flush(response_sender)) => {
                            bridge_debug!(name: "ExportScheduler.ExportingDueToFlush");
                            let _ = response_sender.send(worker.collect_and_export());

                            // Adjust the remaining interval after the flush
                            let elapsed = interval_start.elapsed();
                            if elapsed < interval {
                                remaining_interval = interval - elapsed;
                            } else {
                                // The flush ran past the regular tick, which
                                // is taken right away.
                                interval_start = Instant::now();
                                remaining_interval = Duration::ZERO;
                            }
                        }
                        Ok(Message::Shutdown { flush, response }) => {
                            bridge_debug!(
                                name: "ExportScheduler.ShuttingDown",
                                flush = flush
                            );
                            let flushed = if flush {
                                worker.collect_and_export()
                            } else {
                                Ok(())
                            };
                            let shut = worker.exporter.shutdown();
                            worker.set_state(SchedulerState::Stopped);
                            let _ = response.send(flushed.and(shut));
                            break;
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            let export_start = Instant::now();
                            bridge_debug!(name: "ExportScheduler.ExportingDueToTimer");

                            if let Err(e) = worker.collect_and_export() {
                                bridge_debug!(
                                    name: "ExportScheduler.ExportingDueToTimerFailed",
                                    error = format!("{e}")
                                );
                            }

                            let time_taken_for_export = export_start.elapsed();
                            if time_taken_for_export > interval {
                                bridge_debug!(
                                    name: "ExportScheduler.ExportTookLongerThanInterval",
                                    elapsed_ms = time_taken_for_export.as_millis()
                                );
                                // Missed ticks collapse into a single
                                // immediate one.
                                remaining_interval = Duration::ZERO;
                            } else {
                                remaining_interval = interval - time_taken_for_export;
                            }
                            interval_start = Instant::now();
                        }
                        Err(mpsc::RecvTimeoutError::Disconnected) => {
                            // The handle is gone without a shutdown message.
                            let _ = worker.exporter.shutdown();
                            worker.set_state(SchedulerState::Stopped);
                            break;
                        }
                    }
                }
                bridge_info!(name: "ExportScheduler.ThreadStopped");
            });

        let (handle, is_shutdown) = match result_thread_creation {
            Ok(handle) => (Some(handle), false),
            Err(e) => {
                bridge_error!(
                    name: "ExportScheduler.ThreadStartError",
                    error = format!("{e:?}")
                );
                state.store(SchedulerState::Stopped as u8, Ordering::Release);
                (None, true)
            }
        };

        ExportScheduler {
            message_sender: Mutex::new(message_sender),
            state,
            is_shutdown: AtomicBool::new(is_shutdown),
            handle: Mutex::new(handle),
        }
    }

    /// Current state of the export cycle.
    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Run one extra cycle right now and report how it went.
    ///
    /// Returns [`BridgeError::AlreadyShutdown`] once the scheduler is shut down,
    /// including when a concurrent shutdown stops the export thread before it
    /// gets to this flush.
    pub fn force_flush(&self) -> BridgeResult {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(BridgeError::AlreadyShutdown);
        }
        let (response_tx, response_rx) = mpsc::channel();
        self.send(Message::Flush(response_tx))?;
        response_rx.recv().unwrap_or_else(|_| {
            Err(self.closed_channel("export thread exited before answering flush"))
        })
    }

    /// Stop the scheduler without a final export. A cycle that is already
    /// running is allowed to finish. The exporter is shut down as well.
    pub fn shutdown(&self) -> BridgeResult {
        self.shutdown_inner(false)
    }

    /// Run one final cycle, then stop like [`shutdown`](Self::shutdown).
    pub fn shutdown_with_flush(&self) -> BridgeResult {
        self.shutdown_inner(true)
    }

    fn shutdown_inner(&self, flush: bool) -> BridgeResult {
        if self.is_shutdown.swap(true, Ordering::Relaxed) {
            return Err(BridgeError::AlreadyShutdown);
        }

        let (response_tx, response_rx) = mpsc::channel();
        self.send(Message::Shutdown {
            flush,
            response: response_tx,
        })?;
        let result = response_rx.recv().unwrap_or_else(|_| {
            Err(BridgeError::InternalFailure(
                "export thread exited before answering shutdown".into(),
            ))
        });

        if let Some(handle) = self.handle.lock()?.take() {
            if handle.join().is_err() {
                bridge_warn!(name: "ExportScheduler.ThreadPanicked");
            }
        }
        result
    }

    /// The export thread is gone. After a shutdown that is expected.
    fn closed_channel(&self, context: &str) -> BridgeError {
        if self.is_shutdown.load(Ordering::Relaxed) {
            BridgeError::AlreadyShutdown
        } else {
            BridgeError::InternalFailure(context.into())
        }
    }

    fn send(&self, message: Message) -> BridgeResult {
        match self.message_sender.lock() {
            Ok(sender) => sender
                .send(message)
                .map_err(|e| self.closed_channel(&e.to_string())),
            Err(e) => {
                bridge_error!(
                    name: "ExportScheduler.SendError",
                    error = format!("{e:?}")
                );
                Err(BridgeError::InternalFailure(e.to_string()))
            }
        }
    }
}

impl fmt::Debug for ExportScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportScheduler")
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for ExportScheduler {
    fn drop(&mut self) {
        if !self.is_shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.shutdown() {
                bridge_debug!(
                    name: "ExportScheduler.ShutdownOnDropFailed",
                    error = format!("{e}")
                );
            }
        }
    }
}

enum Message {
    Flush(Sender<BridgeResult>),
    Shutdown {
        flush: bool,
        response: Sender<BridgeResult>,
    },
}

/// Everything the export thread owns.
struct Worker<E, P> {
    exporter: E,
    producer: P,
    converter: TemporalityConverter,
    resource: Resource,
    scope: Scope,
    state: Arc<AtomicU8>,
}

impl<E, P> Worker<E, P>
where
    E: PushExporter,
    P: MetricProducer,
{
    fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn collect_and_export(&mut self) -> BridgeResult {
        let result = self.cycle();
        self.set_state(SchedulerState::Idle);
        result
    }

    fn cycle(&mut self) -> BridgeResult {
        self.set_state(SchedulerState::Collecting);
        let snapshot = match self.producer.produce() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                bridge_warn!(
                    name: "ExportScheduler.CollectError",
                    error = format!("{e}")
                );
                return Err(match e {
                    BridgeError::SnapshotUnavailable(_) => e,
                    other => BridgeError::SnapshotUnavailable(other.to_string()),
                });
            }
        };

        self.set_state(SchedulerState::Converting);
        let points = self.converter.convert(snapshot);
        if points.is_empty() {
            bridge_debug!(name: "ExportScheduler.NoDeltasCollected");
            return Ok(());
        }

        self.set_state(SchedulerState::Exporting);
        let batch = ExportBatch {
            resource: self.resource.clone(),
            scope: self.scope.clone(),
            points,
        };
        // No timeout is enforced here. The exporter is responsible for
        // bounding the time an export takes.
        let exporter_result = futures_executor::block_on(self.exporter.export(&batch));
        if let Err(e) = exporter_result {
            bridge_warn!(
                name: "ExportScheduler.ExportError",
                error = format!("{e}"),
                dropped_points = batch.points.len()
            );
            return Err(e);
        }
        Ok(())
    }
}
