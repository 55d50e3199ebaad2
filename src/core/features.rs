//! Motion features derived from consecutive raw rows.
//!
//! The first three columns of a raw row are read as a three-axis
//! acceleration. Features are computed over the three most recent rows of
//! a batch and never reach across batch boundaries.

use crate::error::FeatureError;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Number of consecutive rows a feature row is computed from.
pub const FEATURE_SPAN: usize = 3;

/// Number of rows of a batch that must precede a row before it yields a
/// feature row.
pub const MIN_PRIOR_ROWS: usize = 3;

/// Column names of the feature log, in order.
pub const FEATURE_COLUMNS: [&str; 5] = ["resultant", "cvfast", "smax", "smin", "outcome"];

/// Three-axis acceleration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Acceleration {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Acceleration {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Read the first three columns of a raw row.
    pub fn from_row(row: &[String]) -> Result<Self, FeatureError> {
        if row.len() < 3 {
            return Err(FeatureError::TooFewColumns {
                required: 3,
                actual: row.len(),
            });
        }
        let parse = |column: usize| -> Result<f64, FeatureError> {
            let text = row[column].trim();
            text.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| FeatureError::MalformedRow {
                    column,
                    value: text.to_string(),
                })
        };
        Ok(Self::new(parse(0)?, parse(1)?, parse(2)?))
    }

    /// Euclidean magnitude.
    pub fn resultant(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// One line of the feature log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    /// Resultant of the newest row
    pub resultant: f64,
    /// Magnitude of the per-axis ranges across the span
    pub cvfast: f64,
    /// Largest resultant in the span
    pub smax: f64,
    /// Smallest resultant in the span
    pub smin: f64,
    pub label: String,
}

impl FeatureRow {
    /// Compute features from three accelerations ordered oldest to newest.
    pub fn from_span(span: &[Acceleration; FEATURE_SPAN], label: impl Into<String>) -> Self {
        let resultants = span.map(|a| a.resultant());
        let range = |axis: [f64; FEATURE_SPAN]| axis.max() - axis.min();

        let dx = range(span.map(|a| a.x));
        let dy = range(span.map(|a| a.y));
        let dz = range(span.map(|a| a.z));

        Self {
            resultant: resultants[FEATURE_SPAN - 1],
            cvfast: (dx * dx + dy * dy + dz * dz).sqrt(),
            smax: resultants.max(),
            smin: resultants.min(),
            label: label.into(),
        }
    }

    /// Render as a log line (without newline). Numbers use their full
    /// decimal representation.
    pub fn to_csv(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.resultant,
            self.cvfast,
            self.smax,
            self.smin,
            sanitize_label(&self.label)
        )
    }

    /// Parse a log line written by [`FeatureRow::to_csv`].
    pub fn from_csv(line: &str) -> Result<Self, FeatureError> {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(',').collect();
        if fields.len() < FEATURE_COLUMNS.len() {
            return Err(FeatureError::TooFewColumns {
                required: FEATURE_COLUMNS.len(),
                actual: fields.len(),
            });
        }
        let number = |column: usize| -> Result<f64, FeatureError> {
            fields[column]
                .trim()
                .parse::<f64>()
                .map_err(|_| FeatureError::MalformedRow {
                    column,
                    value: fields[column].to_string(),
                })
        };
        Ok(Self {
            resultant: number(0)?,
            cvfast: number(1)?,
            smax: number(2)?,
            smin: number(3)?,
            label: fields[4].trim().to_string(),
        })
    }
}

/// Make `label` safe for a single CSV field: separators and line breaks
/// become `_`.
pub fn sanitize_label(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|c| if matches!(c, ',' | '\n' | '\r') { '_' } else { c })
        .collect()
}

/// The log header line (without newline).
pub fn header_line() -> String {
    FEATURE_COLUMNS.join(",")
}

/// Assigns the outcome label of each feature row.
pub trait Labeler: Send {
    /// Called once at the start of every batch.
    fn begin_batch(&mut self) {}

    /// Label for the feature row derived from `row`.
    fn label(&mut self, row: &[String]) -> String;
}

/// Alternates `notfall` / `fall`, starting with `notfall` in every batch.
///
/// Produces a training file in which both outcomes are present in a fixed
/// order; the labels carry no information about the motion itself.
#[derive(Debug, Default)]
pub struct AlternatingLabeler {
    positive_next: bool,
}

impl Labeler for AlternatingLabeler {
    fn begin_batch(&mut self) {
        self.positive_next = false;
    }

    fn label(&mut self, _row: &[String]) -> String {
        let label = if self.positive_next { "fall" } else { "notfall" };
        self.positive_next = !self.positive_next;
        label.to_string()
    }
}

/// Uses the raw row's last column (the observed label) verbatim.
#[derive(Debug, Default)]
pub struct ColumnLabeler;

impl Labeler for ColumnLabeler {
    fn label(&mut self, row: &[String]) -> String {
        row.last().map(|s| s.trim().to_string()).unwrap_or_default()
    }
}

/// Labels every row with the same value.
#[derive(Debug)]
pub struct FixedLabeler(pub String);

impl Labeler for FixedLabeler {
    fn label(&mut self, _row: &[String]) -> String {
        self.0.clone()
    }
}

/// Configured labeling strategy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelingMode {
    #[default]
    Alternating,
    Column,
    Fixed { label: String },
}

impl LabelingMode {
    /// A fresh labeler for one feature log.
    pub fn labeler(&self) -> Box<dyn Labeler> {
        match self {
            LabelingMode::Alternating => Box::new(AlternatingLabeler::default()),
            LabelingMode::Column => Box::new(ColumnLabeler),
            LabelingMode::Fixed { label } => Box::new(FixedLabeler(label.clone())),
        }
    }
}

/// Result of deriving features from one batch.
#[derive(Debug, Default)]
pub struct BatchFeatures {
    pub rows: Vec<FeatureRow>,
    pub skipped: Vec<(usize, FeatureError)>,
}

/// Derive feature rows from one batch of raw rows.
///
/// Row `i` yields a feature row once `MIN_PRIOR_ROWS` rows precede it in
/// the batch; the span is rows `i-2..=i`. A span containing a malformed
/// row is skipped and the rest of the batch is still processed.
pub fn derive_batch(batch: &[Vec<String>], labeler: &mut dyn Labeler) -> BatchFeatures {
    labeler.begin_batch();
    let parsed: Vec<Result<Acceleration, FeatureError>> =
        batch.iter().map(|row| Acceleration::from_row(row)).collect();

    let mut out = BatchFeatures::default();
    for i in MIN_PRIOR_ROWS..batch.len() {
        let span = [&parsed[i - 2], &parsed[i - 1], &parsed[i]];
        match span {
            [Ok(a), Ok(b), Ok(c)] => {
                let label = labeler.label(&batch[i]);
                out.rows.push(FeatureRow::from_span(&[*a, *b, *c], label));
            }
            _ => {
                let err = span
                    .into_iter()
                    .find_map(|r| r.as_ref().err().cloned())
                    .unwrap_or(FeatureError::TooFewColumns {
                        required: 3,
                        actual: 0,
                    });
                tracing::warn!(row = i, error = %err, "skipping feature row");
                out.skipped.push((i, err));
            }
        }
    }
    out
}
