//! Transport adapter contract.
//!
//! A linker connects to one sensor platform, provisions the [`Sensor`]s it
//! exposes and wires each sensor's event source to [`Sensor::update`]. The
//! sensors belong to the linker and live as long as its connection; the
//! collector only holds shared references for polling.

use crate::collector::sensor::Sensor;
use std::sync::Arc;

pub trait Linker: Send + Sync {
    /// Connect to the platform.
    ///
    /// Ordinary failure (device absent, service busy) returns `false` so the
    /// caller can retry; it must not panic.
    fn connect(&self) -> bool;

    /// Disconnect and drop the provisioned sensors.
    fn disconnect(&self);

    /// Start delivering platform events to the sensors.
    fn subscribe(&self);

    /// Stop delivering platform events.
    fn unsubscribe(&self);

    fn is_connected(&self) -> bool;

    /// Sensors provisioned by the last successful connect.
    fn sensors(&self) -> Vec<Arc<Sensor>>;
}
