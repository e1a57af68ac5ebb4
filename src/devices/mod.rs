//! Device timing capabilities.
//!
//! The timeline generator never talks to hardware. Everything it needs to know
//! about a device is how long the device takes to do things:
//!
//! - **movement**: for a positioner moving between two positions, the motion
//!   time and the stabilization time after arrival;
//! - **readiness**: for a camera, the latency after an exposure before it can
//!   accept the next trigger.
//!
//! [`DeviceTiming`] is the capability interface the generator consumes.
//! [`DeviceRegistry`] implements it over a set of named [`DeviceModel`]s, one
//! tagged variant per device kind, which is what the configuration file
//! describes.

pub mod models;

pub use models::{DeviceModel, DeviceRegistry};

use crate::action_table::DeviceRef;
use crate::error::AppResult;
use crate::time::ExactTime;

/// Time needed to move a positioner and let it settle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MovementTime {
    /// From command to arrival.
    pub motion: ExactTime,
    /// From arrival until the device is steady enough to image.
    pub stabilization: ExactTime,
}

impl MovementTime {
    /// Pair a motion time with its settling time.
    pub fn new(motion: ExactTime, stabilization: ExactTime) -> Self {
        Self {
            motion,
            stabilization,
        }
    }
}

/// Side-effect-free timing queries, in milliseconds.
///
/// Implementations must be fast and deterministic: the generator calls them
/// once or twice per slice while building a table.
pub trait DeviceTiming {
    /// Motion and stabilization time for `device` moving from `from` to `to`.
    ///
    /// # Errors
    ///
    /// `ParameterError::UnknownDevice` for an unknown device and
    /// `ParameterError::Unsupported` for a device that does not move.
    fn movement_time(&self, device: &DeviceRef, from: f64, to: f64) -> AppResult<MovementTime>;

    /// Time after a use of `device` (e.g. the end of a camera exposure) before
    /// it can be used again.
    fn readiness_latency(&self, device: &DeviceRef) -> AppResult<ExactTime>;
}
