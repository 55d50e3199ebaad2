//! In-process accelerometer linker.
//!
//! Stands in for a vendor transport: it provisions a three-axis
//! accelerometer on connect and, once subscribed, feeds it synthetic
//! readings from its own thread, the way a platform SDK delivers events on
//! a thread it owns. Periodic bursts mimic impacts so the feature log has
//! something to flag.

use crate::collector::linker::Linker;
use crate::collector::sensor::{AverageWeighting, Sensor};
use crate::collector::types::{DimensionType, SensorMetaData, Value};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Standard gravity in m/s².
const GRAVITY: f64 = 9.81;

/// Configuration for the simulated transport.
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Rate at which the feed thread pushes readings
    pub feed_rate_hz: f32,
    /// Number of connect attempts that fail before one succeeds
    pub connect_failures: u32,
    /// Averaging window applied to the provisioned accelerometer
    pub window_size: usize,
    pub weighting: AverageWeighting,
    /// Every this many readings, inject a short high-magnitude burst
    pub burst_every: Option<u64>,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            feed_rate_hz: 32.0,
            connect_failures: 0,
            window_size: 3,
            weighting: AverageWeighting::Linear,
            burst_every: Some(400),
        }
    }
}

struct Feed {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// A linker backed by a synthetic signal.
pub struct SimulatedLinker {
    config: SimulatedConfig,
    connected: AtomicBool,
    failures_left: AtomicU32,
    sensors: Mutex<Vec<Arc<Sensor>>>,
    feed: Mutex<Option<Feed>>,
}

impl SimulatedLinker {
    pub fn new(config: SimulatedConfig) -> Self {
        let failures_left = AtomicU32::new(config.connect_failures);
        Self {
            config,
            connected: AtomicBool::new(false),
            failures_left,
            sensors: Mutex::new(Vec::new()),
            feed: Mutex::new(None),
        }
    }

    /// Simulate the transport dropping the connection.
    pub fn drop_connection(&self) {
        tracing::info!("simulated transport lost");
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn accelerometer_meta() -> SensorMetaData {
        SensorMetaData::new(
            "accelerometer",
            &["x", "y", "z"],
            &[DimensionType::Float, DimensionType::Float, DimensionType::Float],
        )
    }

    fn provision(&self) {
        let sensor = Sensor::with_averaging(
            Self::accelerometer_meta(),
            self.config.window_size,
            self.config.weighting,
        );
        *self.sensors.lock() = vec![Arc::new(sensor)];
    }
}

impl Linker for SimulatedLinker {
    fn connect(&self) -> bool {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            tracing::debug!("simulated connect refused");
            return false;
        }

        if !self.connected.load(Ordering::SeqCst) {
            self.unsubscribe();
            self.provision();
            self.connected.store(true, Ordering::SeqCst);
        }
        true
    }

    fn disconnect(&self) {
        self.unsubscribe();
        self.sensors.lock().clear();
        self.connected.store(false, Ordering::SeqCst);
    }

    fn subscribe(&self) {
        let mut feed = self.feed.lock();
        if feed.is_some() {
            return;
        }
        let sensors = self.sensors.lock().clone();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let rate = self.config.feed_rate_hz.max(1.0);
        let interval = Duration::from_secs_f64(1.0 / rate as f64);
        let burst_every = self.config.burst_every;

        let handle = thread::spawn(move || run_feed(sensors, interval, burst_every, stop_rx));
        *feed = Some(Feed { stop_tx, handle });
    }

    fn unsubscribe(&self) {
        if let Some(feed) = self.feed.lock().take() {
            drop(feed.stop_tx);
            let _ = feed.handle.join();
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn sensors(&self) -> Vec<Arc<Sensor>> {
        self.sensors.lock().clone()
    }
}

impl Drop for SimulatedLinker {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Synthetic wrist motion: gravity on z with a slow sway, plus a burst of
/// large readings every `burst_every` steps.
pub fn synthetic_reading(step: u64, burst_every: Option<u64>) -> [f32; 3] {
    let t = step as f64 * 0.05;
    let mut x = 0.4 * t.sin();
    let mut y = 0.3 * (t * 0.7).cos();
    let mut z = GRAVITY + 0.2 * (t * 1.3).sin();

    if let Some(every) = burst_every.filter(|&n| n > 0) {
        let phase = step % every;
        if phase < 4 {
            let sign = if phase % 2 == 0 { 1.0 } else { -1.0 };
            x += sign * 2.5 * GRAVITY;
            y -= sign * 1.5 * GRAVITY;
            z -= 0.8 * GRAVITY;
        }
    }

    [x as f32, y as f32, z as f32]
}

fn run_feed(
    sensors: Vec<Arc<Sensor>>,
    interval: Duration,
    burst_every: Option<u64>,
    stop_rx: Receiver<()>,
) {
    let mut step: u64 = 0;
    loop {
        let [x, y, z] = synthetic_reading(step, burst_every);
        for sensor in &sensors {
            let _ = sensor.update(vec![Value::Float(x), Value::Float(y), Value::Float(z)]);
        }
        step += 1;

        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_failures_then_success() {
        let linker = SimulatedLinker::new(SimulatedConfig {
            connect_failures: 2,
            ..Default::default()
        });
        assert!(!linker.connect());
        assert!(!linker.connect());
        assert!(linker.connect());
        assert!(linker.is_connected());
        assert_eq!(linker.sensors().len(), 1);
    }

    #[test]
    fn test_disconnect_drops_sensors() {
        let linker = SimulatedLinker::new(SimulatedConfig::default());
        assert!(linker.connect());
        linker.disconnect();
        assert!(!linker.is_connected());
        assert!(linker.sensors().is_empty());
    }

    #[test]
    fn test_feed_fills_window() {
        let linker = SimulatedLinker::new(SimulatedConfig {
            feed_rate_hz: 500.0,
            ..Default::default()
        });
        assert!(linker.connect());
        linker.subscribe();
        thread::sleep(Duration::from_millis(50));
        linker.unsubscribe();

        let values = linker.sensors()[0].collect();
        assert!(values.iter().all(Option::is_some));
    }

    #[test]
    fn test_burst_raises_magnitude() {
        let quiet = synthetic_reading(10, Some(400));
        let burst = synthetic_reading(400, Some(400));
        let mag = |r: [f32; 3]| (r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt();
        assert!(mag(burst) > 2.0 * mag(quiet));
    }
}
