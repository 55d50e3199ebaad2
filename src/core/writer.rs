//! Feature log writer.
//!
//! Consumes accumulator batches, derives feature rows and appends them to a
//! comma-separated log. The header is written once, when the file is
//! created empty; reopening an existing log appends after its header.

use crate::core::accumulator::BatchListener;
use crate::core::detector::SharedClassifier;
use crate::core::features::{derive_batch, header_line, Labeler};
use crate::error::PersistenceError;
use crate::stats::SharedStats;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Hooks invoked by the writer after each batch.
pub trait WriterObserver: Send + Sync {
    /// The classifier's debounced judgment after new rows were flushed.
    fn on_judgment(&self, _event: bool) {}

    /// A batch could not be persisted.
    fn on_write_failed(&self, _error: &PersistenceError) {}
}

struct WriterState {
    file: Option<BufWriter<File>>,
    labeler: Box<dyn Labeler>,
    last_judgment: Option<bool>,
    rows_written: u64,
}

/// Appends derived feature rows to the log.
pub struct FeatureWriter {
    path: PathBuf,
    state: Mutex<WriterState>,
    classifier: Option<SharedClassifier>,
    observer: Option<Arc<dyn WriterObserver>>,
    stats: Option<SharedStats>,
}

impl FeatureWriter {
    /// Open (or create) the log at `path`.
    pub fn open(path: impl AsRef<Path>, labeler: Box<dyn Labeler>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::io(&path, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| PersistenceError::io(&path, e))?;
        let is_empty = file
            .metadata()
            .map_err(|e| PersistenceError::io(&path, e))?
            .len()
            == 0;

        let mut file = BufWriter::new(file);
        if is_empty {
            writeln!(file, "{}", header_line())
                .and_then(|_| file.flush())
                .map_err(|e| PersistenceError::io(&path, e))?;
            tracing::debug!(path = %path.display(), "feature log header written");
        }

        tracing::info!(path = %path.display(), "feature log opened");
        Ok(Self {
            path,
            state: Mutex::new(WriterState {
                file: Some(file),
                labeler,
                last_judgment: None,
                rows_written: 0,
            }),
            classifier: None,
            observer: None,
            stats: None,
        })
    }

    pub fn with_classifier(mut self, classifier: SharedClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn WriterObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Feature rows written by this writer.
    pub fn rows_written(&self) -> u64 {
        self.state.lock().rows_written
    }

    /// Judgment returned by the classifier after the last flush.
    pub fn last_judgment(&self) -> Option<bool> {
        self.state.lock().last_judgment
    }

    /// Derive and append the feature rows of one batch, then notify the
    /// classifier. Returns the number of rows appended.
    pub fn write_batch(&self, batch: &[Vec<String>]) -> Result<usize, PersistenceError> {
        let mut state = self.state.lock();
        let WriterState { file, labeler, .. } = &mut *state;
        let Some(file) = file.as_mut() else {
            return Err(PersistenceError::Released);
        };

        let features = derive_batch(batch, &mut **labeler);
        for row in &features.rows {
            writeln!(file, "{}", row.to_csv()).map_err(|e| PersistenceError::io(&self.path, e))?;
        }
        file.flush().map_err(|e| PersistenceError::io(&self.path, e))?;

        let written = features.rows.len();
        state.rows_written += written as u64;
        if let Some(stats) = &self.stats {
            stats.record_feature_rows(written as u64);
            stats.record_rows_skipped(features.skipped.len() as u64);
        }
        tracing::debug!(
            input = batch.len(),
            written,
            skipped = features.skipped.len(),
            "feature batch appended"
        );

        if written > 0 {
            if let Some(classifier) = &self.classifier {
                let event = classifier.lock().evaluate(written);
                state.last_judgment = Some(event);
                drop(state);
                if event {
                    tracing::warn!("classifier confirmed an event");
                    if let Some(stats) = &self.stats {
                        stats.record_event_detected();
                    }
                }
                if let Some(observer) = &self.observer {
                    observer.on_judgment(event);
                }
            }
        }
        Ok(written)
    }

    /// Flush and close the log. Later batches are rejected.
    pub fn release(&self) {
        if let Some(mut file) = self.state.lock().file.take() {
            if let Err(e) = file.flush() {
                tracing::warn!(path = %self.path.display(), error = %e, "flush on release failed");
            }
            tracing::info!(path = %self.path.display(), "feature log released");
        }
    }
}

impl BatchListener for FeatureWriter {
    fn on_batch(&self, batch: &[Vec<String>]) {
        if let Err(e) = self.write_batch(batch) {
            tracing::error!(error = %e, "could not persist feature batch");
            if let Some(observer) = &self.observer {
                observer.on_write_failed(&e);
            }
        }
    }
}

impl Drop for FeatureWriter {
    fn drop(&mut self) {
        self.release();
    }
}
