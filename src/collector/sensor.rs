//! Multi-dimensional sensor with per-dimension sliding windows.
//!
//! A transport adapter pushes readings through [`Sensor::update`] from its
//! own callback thread; the collector reads them back through
//! [`Sensor::collect`] once per tick. Both sides go through one lock, so an
//! update is never observed half-applied.

use crate::collector::types::{SensorMetaData, Value};
use crate::collector::window::SlidingWindow;
use crate::error::SensorError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How window slots are weighted when averaging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AverageWeighting {
    /// Every slot weighs `1 / size`.
    #[default]
    Equal,
    /// Weight falls off linearly with age; the newest slot weighs most.
    Linear,
}

impl AverageWeighting {
    /// Weights indexed by age (0 = newest). Always sums to 1.
    pub fn weights(self, size: usize) -> Vec<f64> {
        let size = size.max(1);
        match self {
            AverageWeighting::Equal => vec![1.0 / size as f64; size],
            AverageWeighting::Linear => {
                let div = (size * (size + 1)) as f64 / 2.0;
                (0..size).map(|age| (size - age) as f64 / div).collect()
            }
        }
    }
}

struct WindowState {
    window_size: usize,
    weighting: AverageWeighting,
    weights: Vec<f64>,
    windows: Vec<SlidingWindow<Value>>,
}

impl WindowState {
    fn new(dimension: usize, window_size: usize, weighting: AverageWeighting) -> Self {
        let window_size = window_size.max(1);
        Self {
            window_size,
            weighting,
            weights: weighting.weights(window_size),
            windows: (0..dimension).map(|_| SlidingWindow::new(window_size)).collect(),
        }
    }
}

/// A typed measurement source.
pub struct Sensor {
    meta: Arc<SensorMetaData>,
    state: Mutex<WindowState>,
}

impl Sensor {
    /// Create a sensor with no averaging (window size 1).
    pub fn new(meta: SensorMetaData) -> Self {
        let dimension = meta.dimension();
        Self {
            meta: Arc::new(meta),
            state: Mutex::new(WindowState::new(dimension, 1, AverageWeighting::Equal)),
        }
    }

    /// Create a sensor that averages over `window_size` readings.
    pub fn with_averaging(
        meta: SensorMetaData,
        window_size: usize,
        weighting: AverageWeighting,
    ) -> Self {
        let sensor = Self::new(meta);
        sensor.set_averaging(window_size, weighting);
        sensor
    }

    pub fn meta(&self) -> &Arc<SensorMetaData> {
        &self.meta
    }

    pub fn window_size(&self) -> usize {
        self.state.lock().window_size
    }

    pub fn weighting(&self) -> AverageWeighting {
        self.state.lock().weighting
    }

    /// Push one reading per dimension.
    ///
    /// A reading with the wrong arity is rejected as a whole and leaves the
    /// windows untouched.
    pub fn update(&self, values: Vec<Value>) -> Result<(), SensorError> {
        let expected = self.meta.dimension();
        if values.len() != expected {
            tracing::warn!(
                sensor = %self.meta.main_label,
                expected,
                actual = values.len(),
                "dropping update with wrong dimension count"
            );
            return Err(SensorError::DimensionMismatch {
                expected,
                actual: values.len(),
            });
        }

        let mut state = self.state.lock();
        for (window, value) in state.windows.iter_mut().zip(values) {
            window.push(value);
        }
        Ok(())
    }

    /// Read one value per dimension.
    ///
    /// With a window of one this is the last reading. Otherwise numeric
    /// dimensions report the weighted average of the full window and `None`
    /// while the window still has empty slots; non-numeric dimensions always
    /// report the last reading.
    pub fn collect(&self) -> Vec<Option<Value>> {
        let state = self.state.lock();
        let types = &self.meta.dimension_types;

        state
            .windows
            .iter()
            .zip(types.iter())
            .map(|(window, &ty)| {
                if state.window_size == 1 || !ty.is_numeric() {
                    return window.latest().cloned();
                }
                if !window.is_full() {
                    return None;
                }
                let mut sum = 0.0;
                for (value, weight) in window.iter_recent().zip(state.weights.iter()) {
                    sum += value.as_f64()? * weight;
                }
                Value::from_weighted(ty, sum)
            })
            .collect()
    }

    /// Change the averaging window. Clears all buffered readings.
    pub fn set_averaging(&self, window_size: usize, weighting: AverageWeighting) {
        let mut state = self.state.lock();
        *state = WindowState::new(self.meta.dimension(), window_size, weighting);
        tracing::debug!(
            sensor = %self.meta.main_label,
            window_size = state.window_size,
            ?weighting,
            "averaging reset"
        );
    }
}

impl std::fmt::Debug for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("meta", &self.meta)
            .field("window_size", &self.window_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::DimensionType;

    fn accelerometer() -> SensorMetaData {
        SensorMetaData::new(
            "accelerometer",
            &["x", "y", "z"],
            &[DimensionType::Float, DimensionType::Float, DimensionType::Float],
        )
    }

    fn floats(v: f32) -> Vec<Value> {
        vec![Value::Float(v), Value::Float(v), Value::Float(v)]
    }

    #[test]
    fn test_weights_sum_to_one() {
        for size in 1..=12 {
            for weighting in [AverageWeighting::Equal, AverageWeighting::Linear] {
                let total: f64 = weighting.weights(size).iter().sum();
                assert!((total - 1.0).abs() < 1e-9, "{weighting:?} size {size}");
            }
        }
    }

    #[test]
    fn test_linear_weights_favor_newest() {
        let weights = AverageWeighting::Linear.weights(3);
        assert!((weights[0] - 0.5).abs() < 1e-9);
        assert!((weights[1] - 1.0 / 3.0).abs() < 1e-9);
        assert!((weights[2] - 1.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_constant_input_averages_to_itself() {
        for n in 1..=8 {
            for weighting in [AverageWeighting::Equal, AverageWeighting::Linear] {
                let sensor = Sensor::with_averaging(accelerometer(), n, weighting);
                for _ in 0..n {
                    sensor.update(floats(2.5)).unwrap();
                }
                for value in sensor.collect() {
                    match value {
                        Some(Value::Float(v)) => assert!((v - 2.5).abs() < 1e-5),
                        other => panic!("unexpected {other:?} for n={n}"),
                    }
                }
            }
        }
    }

    #[test]
    fn test_partial_window_is_unavailable() {
        let sensor = Sensor::with_averaging(accelerometer(), 3, AverageWeighting::Equal);
        sensor.update(floats(1.0)).unwrap();
        sensor.update(floats(1.0)).unwrap();
        assert_eq!(sensor.collect(), vec![None, None, None]);

        sensor.update(floats(1.0)).unwrap();
        assert!(sensor.collect().iter().all(Option::is_some));
    }

    #[test]
    fn test_window_of_one_returns_last() {
        let sensor = Sensor::new(accelerometer());
        assert_eq!(sensor.collect(), vec![None, None, None]);
        sensor.update(floats(1.0)).unwrap();
        sensor.update(floats(4.0)).unwrap();
        assert_eq!(sensor.collect(), floats(4.0).into_iter().map(Some).collect::<Vec<_>>());
    }

    #[test]
    fn test_linear_average_value() {
        let meta = SensorMetaData::new("rate", &["bpm"], &[DimensionType::Double]);
        let sensor = Sensor::with_averaging(meta, 3, AverageWeighting::Linear);
        for v in [3.0, 6.0, 12.0] {
            sensor.update(vec![Value::Double(v)]).unwrap();
        }
        // 12 * 1/2 + 6 * 1/3 + 3 * 1/6
        match sensor.collect()[0] {
            Some(Value::Double(v)) => assert!((v - 8.5).abs() < 1e-9),
            ref other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_integer_average_rounds() {
        let meta = SensorMetaData::new("steps", &["count"], &[DimensionType::Integer]);
        let sensor = Sensor::with_averaging(meta, 2, AverageWeighting::Equal);
        sensor.update(vec![Value::Integer(1)]).unwrap();
        sensor.update(vec![Value::Integer(2)]).unwrap();
        assert_eq!(sensor.collect(), vec![Some(Value::Integer(2))]);
    }

    #[test]
    fn test_non_numeric_returns_latest() {
        let meta = SensorMetaData::new(
            "contact",
            &["state", "worn"],
            &[DimensionType::Text, DimensionType::Boolean],
        );
        let sensor = Sensor::with_averaging(meta, 4, AverageWeighting::Linear);
        sensor
            .update(vec![Value::from("off"), Value::Boolean(false)])
            .unwrap();
        sensor
            .update(vec![Value::from("on"), Value::Boolean(true)])
            .unwrap();
        assert_eq!(
            sensor.collect(),
            vec![Some(Value::from("on")), Some(Value::Boolean(true))]
        );
    }

    #[test]
    fn test_dimension_mismatch_leaves_state() {
        let sensor = Sensor::new(accelerometer());
        sensor.update(floats(1.0)).unwrap();

        let err = sensor
            .update(vec![Value::Float(9.0), Value::Float(9.0)])
            .unwrap_err();
        assert_eq!(
            err,
            SensorError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        );
        assert_eq!(sensor.collect(), floats(1.0).into_iter().map(Some).collect::<Vec<_>>());
    }

    #[test]
    fn test_set_averaging_clears() {
        let sensor = Sensor::new(accelerometer());
        sensor.update(floats(1.0)).unwrap();
        sensor.set_averaging(2, AverageWeighting::Linear);
        assert_eq!(sensor.window_size(), 2);
        assert_eq!(sensor.weighting(), AverageWeighting::Linear);
        assert_eq!(sensor.collect(), vec![None, None, None]);
    }
}
