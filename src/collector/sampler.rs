//! Fixed-rate polling of attached sensors.
//!
//! One background thread per collector. Each tick reads every sensor in
//! attachment order, assembles a [`Sample`] and hands it to the registered
//! listeners before sleeping out the rest of the interval.

use crate::collector::sensor::Sensor;
use crate::collector::types::{MetaSnapshot, Sample, SensorMetaData};
use crate::listeners::{ListenerId, ListenerSet};
use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Share of the tick end time in the reported timestamp. Reading the
/// sensors takes measurable time, so the stamp leans toward completion.
const TIMESTAMP_END_WEIGHT: f64 = 0.8;
const TIMESTAMP_START_WEIGHT: f64 = 1.0 - TIMESTAMP_END_WEIGHT;

/// Receives every sample the collector produces.
///
/// Called on the collector thread, one sample at a time, in collection
/// order. The sample is only borrowed for the duration of the call.
pub trait SampleListener: Send + Sync {
    fn on_sample(&self, sample: &Sample, meta: &MetaSnapshot);
}

impl<F> SampleListener for F
where
    F: Fn(&Sample, &MetaSnapshot) + Send + Sync,
{
    fn on_sample(&self, sample: &Sample, meta: &MetaSnapshot) {
        self(sample, meta)
    }
}

/// Attached sensors plus the aggregate arrays derived from them.
struct SensorSet {
    sensors: Vec<Arc<Sensor>>,
    meta: MetaSnapshot,
    width: usize,
}

impl SensorSet {
    fn empty() -> Self {
        Self {
            sensors: Vec::new(),
            meta: Arc::from(Vec::<Arc<SensorMetaData>>::new()),
            width: 0,
        }
    }

    fn rebuild(&mut self) {
        let meta: Vec<Arc<SensorMetaData>> =
            self.sensors.iter().map(|s| Arc::clone(s.meta())).collect();
        self.width = meta.iter().map(|m| m.dimension()).sum();
        self.meta = Arc::from(meta);
        tracing::debug!(sensors = self.sensors.len(), width = self.width, "collector sensor set rebuilt");
    }

    fn contains(&self, sensor: &Arc<Sensor>) -> bool {
        self.sensors.iter().any(|s| Arc::ptr_eq(s, sensor))
    }
}

struct Shared {
    interval: Duration,
    sensors: Mutex<SensorSet>,
    listeners: ListenerSet<dyn SampleListener>,
}

impl Shared {
    /// Read every sensor once. Holds the sensor-set lock for the whole read
    /// so a concurrent add/remove lands between ticks.
    fn tick(&self) -> (Sample, MetaSnapshot) {
        let set = self.sensors.lock();
        let start = Utc::now().timestamp_millis();

        let mut values = Vec::with_capacity(set.width);
        for sensor in &set.sensors {
            values.extend(sensor.collect());
        }

        let end = Utc::now().timestamp_millis();
        let timestamp_millis =
            (TIMESTAMP_START_WEIGHT * start as f64 + TIMESTAMP_END_WEIGHT * end as f64) as i64;

        (
            Sample {
                values,
                timestamp_millis,
            },
            Arc::clone(&set.meta),
        )
    }
}

struct Worker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Polls attached sensors at a fixed rate.
pub struct Collector {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl Collector {
    /// Create a collector sampling at `sample_rate_hz`.
    pub fn new(sample_rate_hz: f32) -> Self {
        let rate = if sample_rate_hz.is_finite() && sample_rate_hz > 0.0 {
            sample_rate_hz
        } else {
            tracing::warn!(sample_rate_hz, "invalid sample rate, using 1 Hz");
            1.0
        };

        Self {
            shared: Arc::new(Shared {
                interval: Duration::from_secs_f64(1.0 / rate as f64),
                sensors: Mutex::new(SensorSet::empty()),
                listeners: ListenerSet::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Time between ticks.
    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    /// Start the polling thread. Does nothing if it is already running.
    pub fn begin(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let handle = thread::spawn(move || run_collection_loop(shared, stop_rx));

        tracing::info!(interval_ms = self.shared.interval.as_millis() as u64, "collector started");
        *worker = Some(Worker { stop_tx, handle });
    }

    /// Stop the polling thread and wait for it to exit.
    ///
    /// No sample is delivered after this returns, unless it is called from
    /// a sample listener, in which case the loop exits after the current
    /// tick.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        drop(worker.stop_tx);
        if worker.handle.thread().id() == thread::current().id() {
            return;
        }
        if worker.handle.join().is_err() {
            tracing::error!("collector thread panicked");
        }
        tracing::info!("collector stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Attach a sensor. Sensors already attached are ignored.
    pub fn add_sensor(&self, sensor: Arc<Sensor>) {
        let mut set = self.shared.sensors.lock();
        if !set.contains(&sensor) {
            set.sensors.push(sensor);
        }
        set.rebuild();
    }

    /// Attach every sensor in `sensors` not already attached.
    pub fn add_sensors(&self, sensors: impl IntoIterator<Item = Arc<Sensor>>) {
        let mut set = self.shared.sensors.lock();
        for sensor in sensors {
            if !set.contains(&sensor) {
                set.sensors.push(sensor);
            }
        }
        set.rebuild();
    }

    pub fn remove_sensor(&self, sensor: &Arc<Sensor>) {
        let mut set = self.shared.sensors.lock();
        set.sensors.retain(|s| !Arc::ptr_eq(s, sensor));
        set.rebuild();
    }

    pub fn clear_sensors(&self) {
        let mut set = self.shared.sensors.lock();
        set.sensors.clear();
        set.rebuild();
    }

    pub fn sensor_count(&self) -> usize {
        self.shared.sensors.lock().sensors.len()
    }

    /// Total number of dimensions across attached sensors.
    pub fn width(&self) -> usize {
        self.shared.sensors.lock().width
    }

    /// Metadata of the attached sensors, in attachment order.
    pub fn meta(&self) -> MetaSnapshot {
        Arc::clone(&self.shared.sensors.lock().meta)
    }

    pub fn add_listener(&self, listener: Arc<dyn SampleListener>) -> ListenerId {
        self.shared.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_collection_loop(shared: Arc<Shared>, stop_rx: Receiver<()>) {
    loop {
        let tick_start = Instant::now();
        let (sample, meta) = shared.tick();

        for listener in shared.listeners.snapshot() {
            listener.on_sample(&sample, &meta);
        }

        let remaining = shared.interval.saturating_sub(tick_start.elapsed());
        match stop_rx.recv_timeout(remaining) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
