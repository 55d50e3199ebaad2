//! Connection session state machine.
//!
//! A session owns one linker and one collector and drives them through
//! `Idle -> Connecting -> Collecting -> (Connecting ...) -> Stopping -> Idle`.
//! Every successful connection gets its own accumulator and feature writer,
//! torn down again when the transport drops or the session stops.
//!
//! Every status callback fires on the session thread. Writer outcomes are
//! queued by the accumulator thread and delivered while the session watches
//! its connection, so a callback may call [`SessionManager::stop`].

use crate::collector::{Collector, Linker, MetaSnapshot, Sample, SampleListener};
use crate::core::accumulator::{BatchListener, SampleAccumulator, StorageConfig};
use crate::core::detector::SharedClassifier;
use crate::core::features::{sanitize_label, LabelingMode};
use crate::core::writer::{FeatureWriter, WriterObserver};
use crate::error::PersistenceError;
use crate::listeners::{ListenerId, ListenerSet};
use crate::stats::SharedStats;
use crossbeam_channel::{
    bounded, select, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError,
};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Observed label used until [`SessionManager::set_observed_label`] is called.
pub const DEFAULT_OBSERVED_LABEL: &str = "none";

/// Columns appended to every raw row after the sensor dimensions.
pub const ROW_SUFFIX_COLUMNS: [&str; 2] = ["timestamp", "label"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Collecting,
    Stopping,
}

/// Non-fatal conditions reported while collecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionWarning {
    /// The feature log could not be opened or written; collection goes on
    /// without it.
    Persistence(String),
}

impl fmt::Display for SessionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionWarning::Persistence(e) => write!(f, "persistence unavailable: {e}"),
        }
    }
}

/// Observes session transitions.
pub trait ConnectionStatusListener: Send + Sync {
    fn on_starting(&self);
    fn on_started(&self);
    fn on_disrupted(&self);
    fn on_stopped(&self);

    fn on_warning(&self, _warning: &SessionWarning) {}

    /// The classifier confirmed an event in the feature log.
    fn on_event_detected(&self) {}
}

/// Tunables of a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub sample_rate_hz: f32,
    pub storage: StorageConfig,
    /// Wait between failed connect attempts
    pub retry_interval: Duration,
    /// Period of the connection liveness check while collecting
    pub connection_check_interval: Duration,
    /// Feature log location; `None` disables persistence
    pub feature_log: Option<PathBuf>,
    pub labeling: LabelingMode,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            sample_rate_hz: 4.0,
            storage: StorageConfig::default(),
            retry_interval: Duration::from_secs(1),
            connection_check_interval: Duration::from_secs(2),
            feature_log: None,
            labeling: LabelingMode::default(),
        }
    }
}

struct Control {
    state: SessionState,
    stop_tx: Option<Sender<()>>,
    session_id: Option<Uuid>,
    /// Thread of the current (or last) run, stored together with the
    /// transition out of `Idle`.
    worker: Option<JoinHandle<()>>,
}

type StatusListeners = ListenerSet<dyn ConnectionStatusListener>;

/// Drives a linker/collector pair through connect, collect and reconnect.
pub struct SessionManager {
    linker: Arc<dyn Linker>,
    collector: Arc<Collector>,
    settings: SessionSettings,
    classifier: Option<SharedClassifier>,
    stats: Option<SharedStats>,
    listeners: Arc<StatusListeners>,
    observed_label: Arc<RwLock<String>>,
    control: Arc<Mutex<Control>>,
}

impl SessionManager {
    pub fn new(linker: Arc<dyn Linker>, settings: SessionSettings) -> Self {
        let collector = Arc::new(Collector::new(settings.sample_rate_hz));
        Self {
            linker,
            collector,
            settings,
            classifier: None,
            stats: None,
            listeners: Arc::new(ListenerSet::new()),
            observed_label: Arc::new(RwLock::new(DEFAULT_OBSERVED_LABEL.to_string())),
            control: Arc::new(Mutex::new(Control {
                state: SessionState::Idle,
                stop_tx: None,
                session_id: None,
                worker: None,
            })),
        }
    }

    /// Notify `classifier` after every flush of the feature log.
    pub fn with_classifier(mut self, classifier: SharedClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    pub fn state(&self) -> SessionState {
        self.control.lock().state
    }

    /// Identifier of the current (or last) run.
    pub fn session_id(&self) -> Option<Uuid> {
        self.control.lock().session_id
    }

    pub fn is_running(&self) -> bool {
        self.state() != SessionState::Idle
    }

    pub fn add_listener(&self, listener: Arc<dyn ConnectionStatusListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Label appended to every raw row from now on. Commas and line
    /// breaks are replaced with `_`.
    pub fn set_observed_label(&self, label: impl AsRef<str>) {
        *self.observed_label.write() = sanitize_label(label.as_ref());
    }

    pub fn observed_label(&self) -> String {
        self.observed_label.read().clone()
    }

    /// Column names of the raw rows: one `main_dim` name per attached
    /// dimension, then `extra`.
    pub fn sample_header(&self, extra: &[&str]) -> Vec<String> {
        let meta = self.collector.meta();
        meta.iter()
            .flat_map(|m| m.column_names().collect::<Vec<_>>())
            .chain(extra.iter().map(|s| s.to_string()))
            .collect()
    }

    /// Start the session. Returns false if it is already running.
    pub fn start(&self) -> bool {
        let mut control = self.control.lock();
        if control.state != SessionState::Idle {
            return false;
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (notice_tx, notice_rx) = unbounded::<StatusNotice>();
        let session_id = Uuid::new_v4();
        tracing::info!(session = %session_id, "session starting");

        let worker = SessionWorker {
            linker: Arc::clone(&self.linker),
            collector: Arc::clone(&self.collector),
            settings: self.settings.clone(),
            classifier: self.classifier.clone(),
            stats: self.stats.clone(),
            listeners: Arc::clone(&self.listeners),
            observed_label: Arc::clone(&self.observed_label),
            control: Arc::clone(&self.control),
            stop_rx,
            notice_tx,
            notice_rx,
        };
        // A previous run may still be delivering its final callback; the new
        // thread waits for it before announcing itself.
        let previous = control.worker.take();
        let handle = thread::spawn(move || {
            if let Some(previous) = previous {
                join_unless_current(previous);
            }
            let span = tracing::info_span!("session", id = %session_id);
            let _guard = span.enter();
            worker.run()
        });

        control.state = SessionState::Connecting;
        control.stop_tx = Some(stop_tx);
        control.session_id = Some(session_id);
        control.worker = Some(handle);
        true
    }

    /// Stop the session and wait for it to wind down.
    ///
    /// Interrupts a pending connect retry or liveness wait. `on_stopped`
    /// has fired by the time this returns, unless it is called from a
    /// status callback, in which case the session finishes on its own.
    pub fn stop(&self) {
        let handle = {
            let mut control = self.control.lock();
            match control.state {
                SessionState::Idle | SessionState::Stopping => {}
                SessionState::Connecting | SessionState::Collecting => {
                    tracing::info!(from = ?control.state, "session stop requested");
                    control.state = SessionState::Stopping;
                    control.stop_tx = None;
                }
            }
            control.worker.take()
        };

        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                self.control.lock().worker = Some(handle);
            } else if handle.join().is_err() {
                tracing::error!("session thread panicked");
            }
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn join_unless_current(handle: JoinHandle<()>) {
    if handle.thread().id() != thread::current().id() && handle.join().is_err() {
        tracing::error!("session thread panicked");
    }
}

/// Resources scoped to one connection.
struct Pipeline {
    accumulator: Arc<SampleAccumulator>,
    writer: Option<Arc<FeatureWriter>>,
    sample_listener: ListenerId,
}

enum Watch {
    Lost,
    Stopped,
}

/// Writer outcome waiting to be delivered on the session thread.
enum StatusNotice {
    EventDetected,
    Warning(SessionWarning),
}

/// Queues writer outcomes for the session thread.
struct StatusForwarder {
    notices: Sender<StatusNotice>,
}

impl WriterObserver for StatusForwarder {
    fn on_judgment(&self, event: bool) {
        if event {
            let _ = self.notices.send(StatusNotice::EventDetected);
        }
    }

    fn on_write_failed(&self, error: &PersistenceError) {
        let warning = SessionWarning::Persistence(error.to_string());
        let _ = self.notices.send(StatusNotice::Warning(warning));
    }
}

struct SessionWorker {
    linker: Arc<dyn Linker>,
    collector: Arc<Collector>,
    settings: SessionSettings,
    classifier: Option<SharedClassifier>,
    stats: Option<SharedStats>,
    listeners: Arc<StatusListeners>,
    observed_label: Arc<RwLock<String>>,
    control: Arc<Mutex<Control>>,
    stop_rx: Receiver<()>,
    notice_tx: Sender<StatusNotice>,
    notice_rx: Receiver<StatusNotice>,
}

impl SessionWorker {
    fn run(self) {
        self.notify(|l| l.on_starting());
        loop {
            if !self.connect_with_retry() {
                break;
            }

            self.linker.subscribe();
            self.collector.add_sensors(self.linker.sensors());
            self.collector.begin();

            // Checked under the state lock so a stop that raced the connect
            // never sees `on_started`.
            if !self.enter(SessionState::Collecting) {
                break;
            }
            tracing::info!(sensors = self.collector.sensor_count(), "session collecting");
            self.notify(|l| l.on_started());

            let pipeline = self.open_pipeline();
            let watch = self.watch_connection();

            if let Watch::Lost = watch {
                tracing::warn!("transport connection lost");
                if let Some(stats) = &self.stats {
                    stats.record_disruption();
                }
                self.notify(|l| l.on_disrupted());
            }

            self.close_pipeline(pipeline);
            self.deliver_pending();
            self.collector.stop();
            self.linker.unsubscribe();
            self.collector.clear_sensors();

            match watch {
                Watch::Stopped => break,
                Watch::Lost => {
                    if !self.enter(SessionState::Connecting) {
                        break;
                    }
                }
            }
        }
        self.finish();
    }

    /// Retry `connect` until it succeeds. Returns false when stopped first.
    fn connect_with_retry(&self) -> bool {
        let mut attempt: u64 = 0;
        loop {
            if self.stop_requested() {
                return false;
            }
            attempt += 1;
            if let Some(stats) = &self.stats {
                stats.record_connect_attempt();
            }
            if self.linker.connect() {
                tracing::info!(attempt, "transport connected");
                return true;
            }
            tracing::warn!(
                attempt,
                retry_ms = self.settings.retry_interval.as_millis() as u64,
                "transport unavailable, retrying"
            );
            if self.wait(self.settings.retry_interval) {
                return false;
            }
        }
    }

    /// Check the connection every `connection_check_interval`, delivering
    /// writer outcomes as they arrive.
    fn watch_connection(&self) -> Watch {
        let interval = self.settings.connection_check_interval;
        let mut next_check = Instant::now() + interval;
        loop {
            let timeout = next_check.saturating_duration_since(Instant::now());
            select! {
                recv(self.stop_rx) -> _ => return Watch::Stopped,
                recv(self.notice_rx) -> notice => {
                    if let Ok(notice) = notice {
                        self.deliver(notice);
                    }
                }
                default(timeout) => {
                    if !self.linker.is_connected() {
                        return Watch::Lost;
                    }
                    next_check = Instant::now() + interval;
                }
            }
        }
    }

    /// Sleep for `timeout`. Returns true if a stop arrived meanwhile.
    fn wait(&self, timeout: Duration) -> bool {
        !matches!(
            self.stop_rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Timeout)
        )
    }

    fn stop_requested(&self) -> bool {
        !matches!(self.stop_rx.try_recv(), Err(TryRecvError::Empty))
    }

    /// Move to `next` unless a stop has been requested.
    fn enter(&self, next: SessionState) -> bool {
        let mut control = self.control.lock();
        if control.state == SessionState::Stopping {
            return false;
        }
        control.state = next;
        true
    }

    fn notify(&self, f: impl Fn(&dyn ConnectionStatusListener)) {
        for listener in self.listeners.snapshot() {
            f(listener.as_ref());
        }
    }

    fn deliver(&self, notice: StatusNotice) {
        match notice {
            StatusNotice::EventDetected => self.notify(|l| l.on_event_detected()),
            StatusNotice::Warning(warning) => self.notify(|l| l.on_warning(&warning)),
        }
    }

    /// Outcomes of the final flush of a closed pipeline.
    fn deliver_pending(&self) {
        for notice in self.notice_rx.try_iter() {
            self.deliver(notice);
        }
    }

    fn open_pipeline(&self) -> Pipeline {
        let accumulator = Arc::new(SampleAccumulator::new(self.settings.storage));

        if let Some(stats) = self.stats.clone() {
            let counter: Arc<dyn BatchListener> =
                Arc::new(move |_batch: &[Vec<String>]| stats.record_batch());
            accumulator.add_listener(counter);
        }

        let writer = self.settings.feature_log.as_ref().and_then(|path| {
            match FeatureWriter::open(path, self.settings.labeling.labeler()) {
                Ok(writer) => {
                    let mut writer = writer.with_observer(Arc::new(StatusForwarder {
                        notices: self.notice_tx.clone(),
                    }));
                    if let Some(classifier) = &self.classifier {
                        writer = writer.with_classifier(Arc::clone(classifier));
                    }
                    if let Some(stats) = &self.stats {
                        writer = writer.with_stats(Arc::clone(stats));
                    }
                    let writer = Arc::new(writer);
                    accumulator.add_listener(Arc::clone(&writer) as Arc<dyn BatchListener>);
                    Some(writer)
                }
                Err(e) => {
                    tracing::error!(error = %e, "collecting without a feature log");
                    let warning = SessionWarning::Persistence(e.to_string());
                    self.notify(|l| l.on_warning(&warning));
                    None
                }
            }
        });

        accumulator.start();

        let sink = RowSink {
            accumulator: Arc::clone(&accumulator),
            observed_label: Arc::clone(&self.observed_label),
            stats: self.stats.clone(),
        };
        let sample_listener = self.collector.add_listener(Arc::new(sink));

        tracing::debug!(
            trigger = ?self.settings.storage.trigger,
            persistent = writer.is_some(),
            "connection pipeline opened"
        );
        Pipeline {
            accumulator,
            writer,
            sample_listener,
        }
    }

    fn close_pipeline(&self, pipeline: Pipeline) {
        self.collector.remove_listener(pipeline.sample_listener);
        pipeline.accumulator.stop_storage();
        if let Some(writer) = pipeline.writer {
            writer.release();
        }
        tracing::debug!("connection pipeline closed");
    }

    fn finish(&self) {
        self.collector.stop();
        self.linker.unsubscribe();
        self.collector.clear_sensors();
        self.linker.disconnect();

        {
            let mut control = self.control.lock();
            control.state = SessionState::Idle;
            control.stop_tx = None;
        }
        tracing::info!("session stopped");
        self.notify(|l| l.on_stopped());
    }
}

/// Turns samples into raw rows for the accumulator.
struct RowSink {
    accumulator: Arc<SampleAccumulator>,
    observed_label: Arc<RwLock<String>>,
    stats: Option<SharedStats>,
}

impl SampleListener for RowSink {
    fn on_sample(&self, sample: &Sample, _meta: &MetaSnapshot) {
        let mut row = sample.to_row();
        row.push(sample.timestamp_millis.to_string());
        row.push(self.observed_label.read().clone());

        if self.accumulator.enqueue_sample(&row) {
            if let Some(stats) = &self.stats {
                stats.record_sample();
            }
        }
    }
}
