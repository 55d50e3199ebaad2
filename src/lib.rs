//! Motion Sensor Agent - continuous sensor sampling and fall-event features.
//!
//! This library polls multi-dimensional sensors at a fixed rate, smooths
//! each dimension over a sliding window, batches the resulting samples and
//! derives motion features that a downstream classifier turns into
//! debounced event judgments.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Motion Sensor Agent                       │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌───────────┐   ┌─────────────┐   ┌──────────┐   │
//! │  │  Linker  │──▶│ Collector │──▶│ Accumulator │──▶│  Feature │   │
//! │  │ (sensors)│   │ (N Hz)    │   │ (triggers)  │   │  Writer  │   │
//! │  └──────────┘   └───────────┘   └─────────────┘   └──────────┘   │
//! │        ▲                                               │         │
//! │        │                                               ▼         │
//! │  ┌──────────┐                                    ┌──────────┐    │
//! │  │ Session  │                                    │ Detector │    │
//! │  │ Manager  │                                    │(debounce)│    │
//! │  └──────────┘                                    └──────────┘    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use motion_sensor_agent::collector::{SimulatedConfig, SimulatedLinker};
//! use motion_sensor_agent::session::{SessionManager, SessionSettings};
//! use std::sync::Arc;
//!
//! let linker = Arc::new(SimulatedLinker::new(SimulatedConfig::default()));
//! let session = SessionManager::new(linker, SessionSettings::default());
//! session.start();
//! // ...
//! session.stop();
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod error;
pub mod listeners;
pub mod session;
pub mod stats;

// Re-export key types at crate root for convenience
pub use collector::{Collector, Linker, Sample, Sensor, SensorMetaData, SlidingWindow, Value};
pub use config::Config;
pub use core::{DebouncedDetector, FeatureRow, FeatureWriter, SampleAccumulator, StorageConfig};
pub use error::{ConfigError, FeatureError, PersistenceError, SensorError};
pub use listeners::ListenerId;
pub use session::{ConnectionStatusListener, SessionManager, SessionState, SessionWarning};
pub use stats::{CollectionStats, SharedStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
