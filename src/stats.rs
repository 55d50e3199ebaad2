//! Collection statistics.
//!
//! Counters are updated from the collector, accumulator, writer and session
//! threads without locking and can be persisted between runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running counters for the current process.
#[derive(Debug)]
pub struct CollectionStats {
    /// Samples handed to the accumulator
    samples_collected: AtomicU64,
    /// Batches released by accumulators
    batches_released: AtomicU64,
    /// Feature rows appended to the log
    feature_rows_written: AtomicU64,
    /// Feature rows skipped because of malformed input
    rows_skipped: AtomicU64,
    connect_attempts: AtomicU64,
    disruptions: AtomicU64,
    events_detected: AtomicU64,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl CollectionStats {
    pub fn new() -> Self {
        Self {
            samples_collected: AtomicU64::new(0),
            batches_released: AtomicU64::new(0),
            feature_rows_written: AtomicU64::new(0),
            rows_skipped: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
            disruptions: AtomicU64::new(0),
            events_detected: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats persisted at `path`, seeded from the file if present.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!(error = %e, "could not load previous collection stats");
        }

        stats
    }

    pub fn record_sample(&self) {
        self.samples_collected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self) {
        self.batches_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_feature_rows(&self, count: u64) {
        self.feature_rows_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_rows_skipped(&self, count: u64) {
        self.rows_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disruption(&self) {
        self.disruptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_detected(&self) {
        self.events_detected.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples_collected: self.samples_collected.load(Ordering::Relaxed),
            batches_released: self.batches_released.load(Ordering::Relaxed),
            feature_rows_written: self.feature_rows_written.load(Ordering::Relaxed),
            rows_skipped: self.rows_skipped.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            disruptions: self.disruptions.load(Ordering::Relaxed),
            events_detected: self.events_detected.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable summary.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Collection Statistics:\n\
             - Samples collected: {}\n\
             - Batches released: {}\n\
             - Feature rows written: {}\n\
             - Rows skipped: {}\n\
             - Connect attempts: {}\n\
             - Disruptions: {}\n\
             - Events detected: {}\n\
             - Session duration: {} seconds",
            stats.samples_collected,
            stats.batches_released,
            stats.feature_rows_written,
            stats.rows_skipped,
            stats.connect_attempts,
            stats.disruptions,
            stats.events_detected,
            stats.session_duration_secs
        )
    }

    /// Write the counters to the persistence path, if any.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                samples_collected: stats.samples_collected,
                batches_released: stats.batches_released,
                feature_rows_written: stats.feature_rows_written,
                rows_skipped: stats.rows_skipped,
                connect_attempts: stats.connect_attempts,
                disruptions: stats.disruptions,
                events_detected: stats.events_detected,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.samples_collected
                    .store(persisted.samples_collected, Ordering::Relaxed);
                self.batches_released
                    .store(persisted.batches_released, Ordering::Relaxed);
                self.feature_rows_written
                    .store(persisted.feature_rows_written, Ordering::Relaxed);
                self.rows_skipped
                    .store(persisted.rows_skipped, Ordering::Relaxed);
                self.connect_attempts
                    .store(persisted.connect_attempts, Ordering::Relaxed);
                self.disruptions
                    .store(persisted.disruptions, Ordering::Relaxed);
                self.events_detected
                    .store(persisted.events_detected, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    pub fn reset(&self) {
        self.samples_collected.store(0, Ordering::Relaxed);
        self.batches_released.store(0, Ordering::Relaxed);
        self.feature_rows_written.store(0, Ordering::Relaxed);
        self.rows_skipped.store(0, Ordering::Relaxed);
        self.connect_attempts.store(0, Ordering::Relaxed);
        self.disruptions.store(0, Ordering::Relaxed);
        self.events_detected.store(0, Ordering::Relaxed);
    }
}

impl Default for CollectionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub samples_collected: u64,
    pub batches_released: u64,
    pub feature_rows_written: u64,
    pub rows_skipped: u64,
    pub connect_attempts: u64,
    pub disruptions: u64,
    pub events_detected: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    samples_collected: u64,
    batches_released: u64,
    feature_rows_written: u64,
    rows_skipped: u64,
    connect_attempts: u64,
    disruptions: u64,
    events_detected: u64,
    last_updated: DateTime<Utc>,
}

/// Stats shared across the pipeline's threads.
pub type SharedStats = Arc<CollectionStats>;

pub fn create_shared_stats() -> SharedStats {
    Arc::new(CollectionStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedStats {
    Arc::new(CollectionStats::with_persistence(path))
}
