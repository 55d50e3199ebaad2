//! Batching, feature derivation and event detection.
//!
//! This module contains:
//! - The triggered sample accumulator that turns samples into batches
//! - Motion feature derivation and labeling strategies
//! - The feature log writer
//! - The debounced event detector that reads the log back

pub mod accumulator;
pub mod detector;
pub mod features;
pub mod writer;

pub use accumulator::{BatchListener, SampleAccumulator, StorageConfig, Trigger};
pub use detector::{
    DebouncedDetector, Debouncer, EventClassifier, RowClassifier, SharedClassifier,
    ThresholdClassifier,
};
pub use features::{
    derive_batch, header_line, sanitize_label, Acceleration, AlternatingLabeler, BatchFeatures,
    ColumnLabeler, FeatureRow, FixedLabeler, Labeler, LabelingMode, FEATURE_COLUMNS,
};
pub use writer::{FeatureWriter, WriterObserver};
