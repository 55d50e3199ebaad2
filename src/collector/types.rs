//! Value and metadata types shared by sensors, the collector and listeners.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The type of data carried by one sensor dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionType {
    Text,
    Integer,
    Long,
    Float,
    Double,
    Character,
    Boolean,
}

impl DimensionType {
    /// Whether values of this type are averaged over the window.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DimensionType::Integer | DimensionType::Long | DimensionType::Float | DimensionType::Double
        )
    }
}

/// One measured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Character(char),
    Boolean(bool),
}

impl Value {
    /// The dimension type this value belongs to.
    pub fn dimension_type(&self) -> DimensionType {
        match self {
            Value::Text(_) => DimensionType::Text,
            Value::Integer(_) => DimensionType::Integer,
            Value::Long(_) => DimensionType::Long,
            Value::Float(_) => DimensionType::Float,
            Value::Double(_) => DimensionType::Double,
            Value::Character(_) => DimensionType::Character,
            Value::Boolean(_) => DimensionType::Boolean,
        }
    }

    /// Numeric view of the value, `None` for non-numeric types.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Integer(v) => Some(v as f64),
            Value::Long(v) => Some(v as f64),
            Value::Float(v) => Some(v as f64),
            Value::Double(v) => Some(v),
            _ => None,
        }
    }

    /// Rebuild a value of type `ty` from a weighted sum.
    ///
    /// Integer types are rounded to the nearest whole number.
    pub fn from_weighted(ty: DimensionType, sum: f64) -> Option<Value> {
        match ty {
            DimensionType::Integer => Some(Value::Integer(sum.round() as i32)),
            DimensionType::Long => Some(Value::Long(sum.round() as i64)),
            DimensionType::Float => Some(Value::Float(sum as f32)),
            DimensionType::Double => Some(Value::Double(sum)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Character(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{v}"),
        }
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// Immutable description of a sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorMetaData {
    /// Main label (e.g. "accelerometer")
    pub main_label: String,
    /// Label of each dimension (e.g. "x")
    pub dimension_labels: Vec<String>,
    /// Type of each dimension
    pub dimension_types: Vec<DimensionType>,
}

impl SensorMetaData {
    pub fn new(
        main_label: impl Into<String>,
        dimension_labels: &[&str],
        dimension_types: &[DimensionType],
    ) -> Self {
        Self {
            main_label: main_label.into(),
            dimension_labels: dimension_labels.iter().map(|s| s.to_string()).collect(),
            dimension_types: dimension_types.to_vec(),
        }
    }

    /// Number of dimensions, defined by the type list.
    pub fn dimension(&self) -> usize {
        self.dimension_types.len()
    }

    pub fn dimension_label(&self, index: usize) -> Option<&str> {
        self.dimension_labels.get(index).map(String::as_str)
    }

    /// Column names in `main_dim` form, one per dimension.
    pub fn column_names(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.dimension()).map(move |i| match self.dimension_label(i) {
            Some(label) => format!("{}_{}", self.main_label, label),
            None => format!("{}_{}", self.main_label, i),
        })
    }
}

/// One aligned cross-sensor measurement.
///
/// `values` holds one entry per dimension of every attached sensor, in
/// attachment order; `None` marks a dimension whose window is not yet full.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub values: Vec<Option<Value>>,
    pub timestamp_millis: i64,
}

impl Sample {
    /// Render every value as text, unavailable values as `null`.
    pub fn to_row(&self) -> Vec<String> {
        self.values
            .iter()
            .map(|v| match v {
                Some(v) => v.to_string(),
                None => "null".to_string(),
            })
            .collect()
    }
}

/// Shared metadata snapshot handed to sample listeners.
pub type MetaSnapshot = Arc<[Arc<SensorMetaData>]>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_types() {
        assert!(DimensionType::Float.is_numeric());
        assert!(DimensionType::Long.is_numeric());
        assert!(!DimensionType::Text.is_numeric());
        assert!(!DimensionType::Boolean.is_numeric());
    }

    #[test]
    fn test_integer_weighted_sum_rounds() {
        assert_eq!(
            Value::from_weighted(DimensionType::Integer, 2.6),
            Some(Value::Integer(3))
        );
        assert_eq!(
            Value::from_weighted(DimensionType::Long, 2.4),
            Some(Value::Long(2))
        );
        assert_eq!(Value::from_weighted(DimensionType::Text, 1.0), None);
    }

    #[test]
    fn test_column_names() {
        let meta = SensorMetaData::new(
            "accelerometer",
            &["x", "y"],
            &[DimensionType::Float, DimensionType::Float, DimensionType::Float],
        );
        let names: Vec<String> = meta.column_names().collect();
        assert_eq!(names, vec!["accelerometer_x", "accelerometer_y", "accelerometer_2"]);
    }

    #[test]
    fn test_sample_row_marks_unavailable() {
        let sample = Sample {
            values: vec![Some(Value::Float(1.5)), None, Some(Value::Text("walk".into()))],
            timestamp_millis: 0,
        };
        assert_eq!(sample.to_row(), vec!["1.5", "null", "walk"]);
    }
}
