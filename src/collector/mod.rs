//! Sensor acquisition for the motion sensor agent.
//!
//! Sensors smooth raw readings in fixed-size windows, linkers provision
//! them from a transport, and the collector polls them at a fixed rate.

pub mod linker;
pub mod sampler;
pub mod sensor;
pub mod simulated;
pub mod types;
pub mod window;

// Re-export commonly used types
pub use linker::Linker;
pub use sampler::{Collector, SampleListener};
pub use sensor::{AverageWeighting, Sensor};
pub use simulated::{SimulatedConfig, SimulatedLinker};
pub use types::{DimensionType, MetaSnapshot, Sample, SensorMetaData, Value};
pub use window::SlidingWindow;
