//! Integration tests for accumulator -> writer -> detector, and for a full
//! session writing the feature log.

use motion_sensor_agent::collector::{SimulatedConfig, SimulatedLinker};
use motion_sensor_agent::core::{
    BatchListener, DebouncedDetector, FeatureWriter, FixedLabeler, LabelingMode,
    SampleAccumulator, SharedClassifier, StorageConfig, ThresholdClassifier, WriterObserver,
};
use motion_sensor_agent::session::{SessionManager, SessionSettings};
use motion_sensor_agent::stats::create_shared_stats;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[derive(Default)]
struct Judgments(Mutex<Vec<bool>>);

impl WriterObserver for Judgments {
    fn on_judgment(&self, event: bool) {
        self.0.lock().push(event);
    }
}

fn row(x: f64) -> Vec<String> {
    vec![
        x.to_string(),
        "0".to_string(),
        "9.81".to_string(),
        "1700000000000".to_string(),
        "none".to_string(),
    ]
}

fn lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|c| c.lines().map(String::from).collect())
        .unwrap_or_default()
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_impact_confirms_event() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("default.csv");

    let detector = DebouncedDetector::new(&path, ThresholdClassifier::default());
    let classifier: SharedClassifier = Arc::new(Mutex::new(detector));
    let judgments = Arc::new(Judgments::default());
    let writer = Arc::new(
        FeatureWriter::open(&path, Box::new(FixedLabeler("notfall".into())))
            .unwrap()
            .with_classifier(classifier)
            .with_observer(judgments.clone()),
    );

    let accumulator = SampleAccumulator::new(StorageConfig::sample_count(8));
    accumulator.add_listener(writer.clone() as Arc<dyn BatchListener>);
    accumulator.start();

    // Row 5 is an impact; feature rows 5, 6 and 7 include it in their span.
    for i in 0..8 {
        let x = if i == 5 { 40.0 } else { 0.0 };
        assert!(accumulator.enqueue_sample(&row(x)));
    }

    assert!(wait_for(|| !judgments.0.lock().is_empty()));
    accumulator.stop_storage();
    writer.release();

    assert_eq!(*judgments.0.lock(), vec![true]);
    let lines = lines(&path);
    assert_eq!(lines.len(), 1 + 5);
    assert_eq!(lines[0], "resultant,cvfast,smax,smin,outcome");
}

#[test]
fn test_quiet_batch_is_not_an_event() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("default.csv");

    let classifier: SharedClassifier = Arc::new(Mutex::new(DebouncedDetector::new(
        &path,
        ThresholdClassifier::default(),
    )));
    let judgments = Arc::new(Judgments::default());
    let writer = FeatureWriter::open(&path, Box::new(FixedLabeler("notfall".into())))
        .unwrap()
        .with_classifier(classifier)
        .with_observer(judgments.clone());

    let batch: Vec<Vec<String>> = (0..10).map(|_| row(0.1)).collect();
    assert_eq!(writer.write_batch(&batch).unwrap(), 7);
    assert_eq!(*judgments.0.lock(), vec![false]);
}

#[test]
fn test_leftover_rows_follow_stop_policy() {
    for flush in [false, true] {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("default.csv");
        let writer = Arc::new(
            FeatureWriter::open(&path, Box::new(FixedLabeler("x".into()))).unwrap(),
        );

        let accumulator =
            SampleAccumulator::new(StorageConfig::sample_count(100).with_flush_on_stop(flush));
        accumulator.add_listener(writer.clone() as Arc<dyn BatchListener>);
        accumulator.start();
        for _ in 0..6 {
            accumulator.enqueue_sample(&row(1.0));
        }
        accumulator.stop_storage();
        writer.release();

        let expected = if flush { 1 + 3 } else { 1 };
        assert_eq!(lines(&path).len(), expected, "flush_on_stop = {flush}");
    }
}

#[test]
fn test_session_writes_feature_log() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("logs").join("default.csv");
    let stats = create_shared_stats();

    let linker = Arc::new(SimulatedLinker::new(SimulatedConfig {
        feed_rate_hz: 400.0,
        ..Default::default()
    }));
    let session = SessionManager::new(
        linker,
        SessionSettings {
            sample_rate_hz: 100.0,
            storage: StorageConfig::sample_count(10),
            retry_interval: Duration::from_millis(10),
            connection_check_interval: Duration::from_millis(10),
            feature_log: Some(path.clone()),
            labeling: LabelingMode::Column,
        },
    )
    .with_stats(stats.clone());
    session.set_observed_label("walking");

    session.start();
    assert!(wait_for(|| lines(&path).len() > 8));
    session.stop();

    let lines = lines(&path);
    assert_eq!(lines[0], "resultant,cvfast,smax,smin,outcome");
    assert_eq!(lines.iter().filter(|l| l.starts_with("resultant")).count(), 1);
    assert!(lines[1..].iter().all(|l| l.ends_with(",walking")));

    let snapshot = stats.stats();
    assert!(snapshot.samples_collected >= 10);
    assert!(snapshot.batches_released >= 1);
    assert!(snapshot.feature_rows_written >= 8);
    assert_eq!(snapshot.connect_attempts, 1);
}
