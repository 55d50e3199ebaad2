//! Triggered batching of stringified sample rows.
//!
//! Rows are queued by the sample listener and released to batch listeners
//! by a background thread whenever the configured trigger fires.

use crate::listeners::{ListenerId, ListenerSet};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Condition that releases a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Release exactly this many rows once at least that many are queued.
    SampleCount(usize),
    /// Release everything queued after this much time has passed.
    Duration(#[serde(with = "duration_ms")] Duration),
}

/// Immutable batching configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub trigger: Trigger,
    /// Deliver rows still queued when storage stops. When false they are
    /// discarded.
    #[serde(default)]
    pub flush_on_stop: bool,
}

impl StorageConfig {
    pub fn sample_count(count: usize) -> Self {
        Self {
            trigger: Trigger::SampleCount(count),
            flush_on_stop: false,
        }
    }

    pub fn duration(duration: Duration) -> Self {
        Self {
            trigger: Trigger::Duration(duration),
            flush_on_stop: false,
        }
    }

    pub fn with_flush_on_stop(mut self, flush: bool) -> Self {
        self.flush_on_stop = flush;
        self
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::sample_count(25)
    }
}

/// Receives released batches, synchronously on the accumulator thread.
///
/// The batch is borrowed for the duration of the call only.
pub trait BatchListener: Send + Sync {
    fn on_batch(&self, batch: &[Vec<String>]);
}

impl<F> BatchListener for F
where
    F: Fn(&[Vec<String>]) + Send + Sync,
{
    fn on_batch(&self, batch: &[Vec<String>]) {
        self(batch)
    }
}

struct Queue {
    rows: VecDeque<Vec<String>>,
    expected_width: Option<usize>,
    stopping: bool,
}

struct Shared {
    config: StorageConfig,
    queue: Mutex<Queue>,
    wakeup: Condvar,
    listeners: ListenerSet<dyn BatchListener>,
}

impl Shared {
    /// Block until the trigger fires and take the batch, or return `None`
    /// when storage is stopping.
    fn next_batch(&self) -> Option<Vec<Vec<String>>> {
        let mut queue = self.queue.lock();
        match self.config.trigger {
            Trigger::SampleCount(count) => {
                let count = count.max(1);
                while queue.rows.len() < count && !queue.stopping {
                    self.wakeup.wait(&mut queue);
                }
                if queue.stopping {
                    return None;
                }
                Some(queue.rows.drain(..count).collect())
            }
            Trigger::Duration(duration) => {
                let deadline = Instant::now() + duration;
                // Early wakeups (enqueue notifications) go back to sleep
                // until the full duration has passed.
                while !queue.stopping {
                    if self.wakeup.wait_until(&mut queue, deadline).timed_out() {
                        break;
                    }
                }
                if queue.stopping {
                    return None;
                }
                Some(queue.rows.drain(..).collect())
            }
        }
    }

    fn deliver(&self, batch: &[Vec<String>]) {
        tracing::debug!(rows = batch.len(), "releasing batch");
        for listener in self.listeners.snapshot() {
            listener.on_batch(batch);
        }
    }
}

/// Buffers rows and releases them in batches.
pub struct SampleAccumulator {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SampleAccumulator {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                queue: Mutex::new(Queue {
                    rows: VecDeque::new(),
                    expected_width: None,
                    stopping: false,
                }),
                wakeup: Condvar::new(),
                listeners: ListenerSet::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> StorageConfig {
        self.shared.config
    }

    pub fn add_listener(&self, listener: Arc<dyn BatchListener>) -> ListenerId {
        self.shared.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    /// Start the release thread. Does nothing if already started.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        *handle = Some(thread::spawn(move || run_accumulator_loop(shared)));
    }

    /// Queue a copy of `row`.
    ///
    /// The first row fixes the expected width; later rows of a different
    /// width are still accepted. Returns false once storage has stopped.
    pub fn enqueue_sample(&self, row: &[String]) -> bool {
        let mut queue = self.shared.queue.lock();
        if queue.stopping {
            return false;
        }
        match queue.expected_width {
            None => queue.expected_width = Some(row.len()),
            Some(width) if width != row.len() => {
                tracing::debug!(expected = width, actual = row.len(), "row width differs");
            }
            Some(_) => {}
        }
        queue.rows.push_back(row.to_vec());
        drop(queue);
        self.shared.wakeup.notify_one();
        true
    }

    /// Width of the first enqueued row.
    pub fn expected_width(&self) -> Option<usize> {
        self.shared.queue.lock().expected_width
    }

    /// Number of rows waiting for a trigger.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().rows.len()
    }

    /// Stop the release thread and wait for it.
    ///
    /// A batch already being delivered completes. Rows that have not
    /// triggered yet are delivered as one final batch when
    /// `flush_on_stop` is set and dropped otherwise.
    pub fn stop_storage(&self) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.stopping {
                return;
            }
            queue.stopping = true;
        }
        self.shared.wakeup.notify_all();

        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::error!("accumulator thread panicked");
            }
        }

        let leftover: Vec<Vec<String>> = self.shared.queue.lock().rows.drain(..).collect();
        if leftover.is_empty() {
            return;
        }
        if self.shared.config.flush_on_stop {
            self.shared.deliver(&leftover);
        } else {
            tracing::info!(rows = leftover.len(), "discarding rows queued at stop");
        }
    }
}

impl Drop for SampleAccumulator {
    fn drop(&mut self) {
        self.stop_storage();
    }
}

fn run_accumulator_loop(shared: Arc<Shared>) {
    tracing::debug!(trigger = ?shared.config.trigger, "accumulator started");
    while let Some(batch) = shared.next_batch() {
        shared.deliver(&batch);
    }
    tracing::debug!("accumulator finished");
}

/// Serde support for Duration as milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn row(i: usize) -> Vec<String> {
        vec![i.to_string(), "0".to_string()]
    }

    fn collecting(acc: &SampleAccumulator) -> crossbeam_channel::Receiver<Vec<Vec<String>>> {
        let (tx, rx) = unbounded();
        acc.add_listener(Arc::new(move |batch: &[Vec<String>]| {
            let _ = tx.send(batch.to_vec());
        }));
        rx
    }

    #[test]
    fn test_count_trigger_releases_exact_batch() {
        let acc = SampleAccumulator::new(StorageConfig::sample_count(10));
        let rx = collecting(&acc);
        for i in 0..15 {
            assert!(acc.enqueue_sample(&row(i)));
        }
        acc.start();

        let batch = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(batch.len(), 10);
        for (i, r) in batch.iter().enumerate() {
            assert_eq!(r, &row(i));
        }
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(acc.pending(), 5);
        acc.stop_storage();
    }

    #[test]
    fn test_duration_trigger_releases_everything() {
        let acc = SampleAccumulator::new(StorageConfig::duration(Duration::from_millis(100)));
        let rx = collecting(&acc);
        for i in 0..7 {
            acc.enqueue_sample(&row(i));
        }
        acc.start();

        let batch = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(batch.len(), 7);
        acc.stop_storage();
    }

    #[test]
    fn test_duration_trigger_empty_batch() {
        let acc = SampleAccumulator::new(StorageConfig::duration(Duration::from_millis(30)));
        let rx = collecting(&acc);
        acc.start();
        let batch = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(batch.is_empty());
        acc.stop_storage();
    }

    #[test]
    fn test_duration_waits_full_period_despite_enqueues() {
        let acc = SampleAccumulator::new(StorageConfig::duration(Duration::from_millis(200)));
        let rx = collecting(&acc);
        let started = Instant::now();
        acc.start();
        for i in 0..5 {
            acc.enqueue_sample(&row(i));
            thread::sleep(Duration::from_millis(10));
        }
        let batch = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(batch.len(), 5);
        acc.stop_storage();
    }

    #[test]
    fn test_stop_discards_partial_batch() {
        let acc = SampleAccumulator::new(StorageConfig::sample_count(10));
        let rx = collecting(&acc);
        acc.start();
        for i in 0..4 {
            acc.enqueue_sample(&row(i));
        }
        acc.stop_storage();
        assert!(rx.try_recv().is_err());
        assert_eq!(acc.pending(), 0);
        assert!(!acc.enqueue_sample(&row(9)));
    }

    #[test]
    fn test_stop_flushes_partial_batch_when_configured() {
        let acc = SampleAccumulator::new(
            StorageConfig::sample_count(10).with_flush_on_stop(true),
        );
        let rx = collecting(&acc);
        acc.start();
        for i in 0..4 {
            acc.enqueue_sample(&row(i));
        }
        acc.stop_storage();
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.len(), 4);
    }

    #[test]
    fn test_stop_interrupts_duration_wait() {
        let acc = SampleAccumulator::new(StorageConfig::duration(Duration::from_secs(60)));
        acc.start();
        let started = Instant::now();
        acc.stop_storage();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_expected_width_is_advisory() {
        let acc = SampleAccumulator::new(StorageConfig::sample_count(5));
        assert_eq!(acc.expected_width(), None);
        acc.enqueue_sample(&row(0));
        acc.enqueue_sample(&["only".to_string()]);
        assert_eq!(acc.expected_width(), Some(2));
        assert_eq!(acc.pending(), 2);
    }

    #[test]
    fn test_config_serialization() {
        let config = StorageConfig::duration(Duration::from_millis(1500));
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"trigger":{"duration":1500},"flush_on_stop":false}"#);
        let back: StorageConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
