//! Debounced event detection over the feature log.
//!
//! After every flush the writer hands the detector a row-count hint. The
//! detector re-reads the log from its own offset, classifies each new
//! feature row and confirms an event only for a run of 2 to 5 consecutive
//! positive rows. Longer runs are treated as sustained activity rather than
//! an event.

use crate::core::features::{FeatureRow, FEATURE_COLUMNS};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Run lengths that confirm an event.
pub const CONFIRM_RUN: RangeInclusive<u32> = 2..=5;

/// Receives a row-count hint after each flush and returns a judgment.
pub trait EventClassifier: Send {
    fn evaluate(&mut self, new_rows: usize) -> bool;
}

/// Classifier shared between the writers of successive connections.
pub type SharedClassifier = Arc<Mutex<dyn EventClassifier>>;

/// Per-row model.
pub trait RowClassifier: Send {
    fn is_positive(&self, row: &FeatureRow) -> bool;
}

/// Flags a row when both its cvfast and smax exceed fixed thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdClassifier {
    pub cvfast_threshold: f64,
    pub smax_threshold: f64,
}

impl Default for ThresholdClassifier {
    fn default() -> Self {
        Self {
            cvfast_threshold: 12.0,
            smax_threshold: 20.0,
        }
    }
}

impl RowClassifier for ThresholdClassifier {
    fn is_positive(&self, row: &FeatureRow) -> bool {
        row.cvfast > self.cvfast_threshold && row.smax > self.smax_threshold
    }
}

/// Consecutive-positive counter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Debouncer {
    run: u32,
}

impl Debouncer {
    /// Feed one classification. Returns `Some(true)` while the run is in
    /// the confirming range, `Some(false)` once it has grown past it and
    /// `None` otherwise.
    pub fn observe(&mut self, positive: bool) -> Option<bool> {
        if positive {
            self.run = self.run.saturating_add(1);
        } else {
            self.run = 0;
        }
        if CONFIRM_RUN.contains(&self.run) {
            Some(true)
        } else if self.run > *CONFIRM_RUN.end() {
            Some(false)
        } else {
            None
        }
    }

    pub fn run(&self) -> u32 {
        self.run
    }
}

/// Debounced detector reading the feature log incrementally.
pub struct DebouncedDetector<C> {
    path: PathBuf,
    classifier: C,
    /// Byte position just past the last consumed line.
    offset: u64,
    debouncer: Debouncer,
}

impl<C: RowClassifier> DebouncedDetector<C> {
    pub fn new(path: impl Into<PathBuf>, classifier: C) -> Self {
        Self::with_offset(path, classifier, 0)
    }

    /// Resume from a previously returned [`offset`](Self::offset).
    pub fn with_offset(path: impl Into<PathBuf>, classifier: C, offset: u64) -> Self {
        Self {
            path: path.into(),
            classifier,
            offset,
            debouncer: Debouncer::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn debouncer(&self) -> Debouncer {
        self.debouncer
    }

    /// Classify every complete row appended since the last call.
    pub fn scan(&mut self) -> std::io::Result<bool> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        if len < self.offset {
            tracing::warn!(offset = self.offset, len, "feature log shrank, rescanning");
            self.offset = 0;
        }
        file.seek(SeekFrom::Start(self.offset))?;

        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        let mut event = false;
        let mut scanned = 0usize;

        loop {
            buf.clear();
            let read = reader.read_until(b'\n', &mut buf)?;
            // Stop at EOF or at a line the writer has not finished.
            if read == 0 || buf.last() != Some(&b'\n') {
                break;
            }
            self.offset += read as u64;

            let Ok(line) = std::str::from_utf8(&buf) else {
                tracing::warn!(offset = self.offset, "feature row is not valid UTF-8");
                continue;
            };
            if line.starts_with(FEATURE_COLUMNS[0]) {
                continue;
            }
            let row = match FeatureRow::from_csv(line) {
                Ok(row) => row,
                Err(e) => {
                    tracing::warn!(error = %e, "unreadable feature row");
                    continue;
                }
            };
            scanned += 1;
            if let Some(judgment) = self.debouncer.observe(self.classifier.is_positive(&row)) {
                event = judgment;
            }
        }

        tracing::debug!(scanned, offset = self.offset, event, "feature log scanned");
        Ok(event)
    }
}

impl<C: RowClassifier> EventClassifier for DebouncedDetector<C> {
    fn evaluate(&mut self, new_rows: usize) -> bool {
        tracing::trace!(new_rows, "classifier notified");
        match self.scan() {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "could not read feature log");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    struct LabelClassifier;

    impl RowClassifier for LabelClassifier {
        fn is_positive(&self, row: &FeatureRow) -> bool {
            row.label == "fall"
        }
    }

    fn append(path: &Path, labels: &[&str]) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        for label in labels {
            writeln!(file, "1,1,1,1,{label}").unwrap();
        }
    }

    fn log_with_header(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("default.csv");
        std::fs::write(&path, "resultant,cvfast,smax,smin,outcome\n").unwrap();
        path
    }

    #[test]
    fn test_debouncer_window() {
        let mut d = Debouncer::default();
        assert_eq!(d.observe(true), None);
        assert_eq!(d.observe(true), Some(true));
        assert_eq!(d.observe(true), Some(true));
        assert_eq!(d.observe(true), Some(true));
        assert_eq!(d.observe(true), Some(true));
        assert_eq!(d.observe(true), Some(false));
        assert_eq!(d.observe(false), None);
        assert_eq!(d.run(), 0);
    }

    #[test]
    fn test_short_run_confirms() {
        let dir = TempDir::new().unwrap();
        let path = log_with_header(&dir);
        append(&path, &["notfall", "fall", "fall", "notfall"]);

        let mut detector = DebouncedDetector::new(&path, LabelClassifier);
        assert!(detector.evaluate(4));
    }

    #[test]
    fn test_single_positive_does_not_confirm() {
        let dir = TempDir::new().unwrap();
        let path = log_with_header(&dir);
        append(&path, &["fall", "notfall", "fall", "notfall"]);

        let mut detector = DebouncedDetector::new(&path, LabelClassifier);
        assert!(!detector.evaluate(4));
    }

    #[test]
    fn test_long_run_resets() {
        let dir = TempDir::new().unwrap();
        let path = log_with_header(&dir);
        append(&path, &["fall"; 6]);

        let mut detector = DebouncedDetector::new(&path, LabelClassifier);
        assert!(!detector.evaluate(6));
    }

    #[test]
    fn test_offset_and_run_carry_across_calls() {
        let dir = TempDir::new().unwrap();
        let path = log_with_header(&dir);
        append(&path, &["notfall", "fall"]);

        let mut detector = DebouncedDetector::new(&path, LabelClassifier);
        assert!(!detector.evaluate(2));
        let offset = detector.offset();
        assert_eq!(offset, std::fs::metadata(&path).unwrap().len());

        // Second positive continues the run started in the previous scan.
        append(&path, &["fall"]);
        assert!(detector.evaluate(1));

        // Nothing new: no rows, no event.
        assert!(!detector.evaluate(0));
    }

    #[test]
    fn test_resume_from_saved_offset() {
        let dir = TempDir::new().unwrap();
        let path = log_with_header(&dir);
        append(&path, &["fall", "fall"]);
        let offset = std::fs::metadata(&path).unwrap().len();
        append(&path, &["notfall"]);

        let mut detector = DebouncedDetector::with_offset(&path, LabelClassifier, offset);
        assert!(!detector.evaluate(1));
        assert_eq!(detector.debouncer().run(), 0);
    }

    #[test]
    fn test_invalid_utf8_row_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = log_with_header(&dir);
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"1,1,1,1,\xff\xfe\n").unwrap();
        drop(file);
        append(&path, &["fall", "fall"]);

        let mut detector = DebouncedDetector::new(&path, LabelClassifier);
        assert!(detector.evaluate(3));
        assert_eq!(detector.offset(), std::fs::metadata(&path).unwrap().len());

        // Later rows keep being classified.
        append(&path, &["notfall", "fall", "fall"]);
        assert!(detector.evaluate(3));
    }

    #[test]
    fn test_missing_log_is_not_an_event() {
        let dir = TempDir::new().unwrap();
        let mut detector = DebouncedDetector::new(dir.path().join("absent.csv"), LabelClassifier);
        assert!(!detector.evaluate(3));
    }

    #[test]
    fn test_threshold_classifier() {
        let classifier = ThresholdClassifier::default();
        let quiet = FeatureRow {
            resultant: 9.8,
            cvfast: 0.5,
            smax: 9.9,
            smin: 9.7,
            label: String::new(),
        };
        let impact = FeatureRow {
            cvfast: 40.0,
            smax: 30.0,
            ..quiet.clone()
        };
        assert!(!classifier.is_positive(&quiet));
        assert!(classifier.is_positive(&impact));
    }
}
