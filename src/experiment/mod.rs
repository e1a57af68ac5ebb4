//! Experiment timeline generation.
//!
//! This module turns an experiment description into an [`ActionTable`] for one
//! repetition.
//!
//! # Architecture
//!
//! - **Parameters** ([`ZStackParams`], [`ExposureGroup`]): what to image and
//!   where
//! - **Targets** ([`ZStackTargets`]): which devices move and which receive the
//!   calibrated actuator vectors
//! - **Policy** ([`TimelinePolicy`]): the 2-D threshold and the exact
//!   tie-break increment
//! - **Exposure** ([`ExposureProcedure`]): schedules camera triggers and light
//!   pulses for one exposure group
//! - **Generator** ([`ZStackGenerator`]): the slice-by-slice scheduler
//!
//! # Example
//!
//! ```rust,ignore
//! let generator = ZStackGenerator::new(
//!     &calibration,
//!     &devices,
//!     &StandardExposure,
//!     ZStackTargets::remote_focus("z piezo", "dm"),
//! );
//!
//! let params = ZStackParams::new(0.0, 0.5, 10.0)
//!     .with_reps(3)
//!     .with_exposure(ExposureGroup::new().camera("camera 1").light("488 nm", ms(50)));
//!
//! let table = generator.generate(&params)?;
//! ```
//!
//! [`ActionTable`]: crate::action_table::ActionTable

pub mod exposure;
pub mod zstack;

pub use exposure::{camera_ready_time, ExposureProcedure, StandardExposure};
pub use zstack::{slice_count, ZStackGenerator, MAX_SLICES};

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::action_table::DeviceRef;
use crate::error::ParameterError;
use crate::time::ExactTime;

/// A light source and how long it stays on for one exposure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightExposure {
    /// Light source device.
    pub light: DeviceRef,
    /// Pulse length (ms); zero leaves the light untouched.
    pub duration_ms: ExactTime,
}

/// Cameras and lights imaged together at every slice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureGroup {
    /// Cameras triggered together for the group's exposure time.
    #[serde(default)]
    pub cameras: Vec<DeviceRef>,
    /// Lights pulsed during the exposure.
    #[serde(default)]
    pub lights: Vec<LightExposure>,
}

impl ExposureGroup {
    /// An empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a camera.
    pub fn camera(mut self, name: &str) -> Self {
        self.cameras.push(DeviceRef::new(name));
        self
    }

    /// Add a light with its pulse length.
    pub fn light(mut self, name: &str, duration_ms: ExactTime) -> Self {
        self.lights.push(LightExposure {
            light: DeviceRef::new(name),
            duration_ms,
        });
        self
    }

    /// Longest light duration in the group; zero when there are no lights.
    pub fn exposure_time(&self) -> ExactTime {
        self.lights
            .iter()
            .map(|l| &l.duration_ms)
            .max()
            .cloned()
            .unwrap_or_default()
    }
}

/// Geometry and imaging settings of a Z-stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZStackParams {
    /// First slice position (µm).
    pub z_start: f64,
    /// Distance between slices (µm).
    pub slice_height: f64,
    /// Total span of the stack (µm); zero for a single-plane acquisition.
    pub z_height: f64,
    /// Number of repetitions the table will be run for.
    pub num_reps: u32,
    /// Exposure groups imaged at every slice, in order.
    #[serde(default)]
    pub exposures: Vec<ExposureGroup>,
}

impl ZStackParams {
    /// One repetition with no exposures.
    pub fn new(z_start: f64, slice_height: f64, z_height: f64) -> Self {
        Self {
            z_start,
            slice_height,
            z_height,
            num_reps: 1,
            exposures: Vec::new(),
        }
    }

    /// Set the repetition count.
    pub fn with_reps(mut self, num_reps: u32) -> Self {
        self.num_reps = num_reps;
        self
    }

    /// Append an exposure group.
    pub fn with_exposure(mut self, group: ExposureGroup) -> Self {
        self.exposures.push(group);
        self
    }

    /// Reject parameters the generator cannot schedule.
    ///
    /// A device may appear only once per exposure group: a light listed twice
    /// would be pulsed twice at the same instant.
    pub fn validate(&self) -> Result<(), ParameterError> {
        for (name, value) in [
            ("z_start", self.z_start),
            ("slice_height", self.slice_height),
            ("z_height", self.z_height),
        ] {
            if !value.is_finite() {
                return Err(ParameterError::NonFinite { name, value });
            }
        }
        if self.slice_height <= 0.0 {
            return Err(ParameterError::NonPositiveSliceHeight(self.slice_height));
        }
        if self.z_height < 0.0 {
            return Err(ParameterError::NegativeHeight(self.z_height));
        }
        if self.num_reps == 0 {
            return Err(ParameterError::InvalidRepetitions(0));
        }
        for light in self.exposures.iter().flat_map(|g| &g.lights) {
            if light.duration_ms.is_negative() {
                return Err(ParameterError::NegativeExposure {
                    light: light.light.clone(),
                    duration: light.duration_ms.clone(),
                });
            }
        }
        for (group, exposure) in self.exposures.iter().enumerate() {
            let mut seen = HashSet::new();
            let devices = exposure
                .cameras
                .iter()
                .chain(exposure.lights.iter().map(|l| &l.light));
            for device in devices {
                if !seen.insert(device) {
                    return Err(ParameterError::DuplicateDevice {
                        group,
                        device: device.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Every camera used by any exposure group, in first-use order.
    pub fn cameras(&self) -> Vec<&DeviceRef> {
        let mut cameras: Vec<&DeviceRef> = Vec::new();
        for camera in self.exposures.iter().flat_map(|g| &g.cameras) {
            if !cameras.contains(&camera) {
                cameras.push(camera);
            }
        }
        cameras
    }
}

/// Devices the Z-stack drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZStackTargets {
    /// Focus positioner; supplies the movement timings.
    pub positioner: DeviceRef,
    /// Remote-focus actuator receiving calibrated vectors.
    #[serde(default)]
    pub actuator: Option<DeviceRef>,
    /// Also record `Position` actions for the positioner when an actuator is
    /// configured. Without an actuator the positioner is always driven.
    #[serde(default)]
    pub drive_positioner: bool,
}

impl ZStackTargets {
    /// Classic Z-stack: only the positioner moves.
    pub fn positioner(name: &str) -> Self {
        Self {
            positioner: DeviceRef::new(name),
            actuator: None,
            drive_positioner: true,
        }
    }

    /// Remote focus: the actuator follows the calibrated positions while the
    /// positioner only provides timings.
    pub fn remote_focus(positioner: &str, actuator: &str) -> Self {
        Self {
            positioner: DeviceRef::new(positioner),
            actuator: Some(DeviceRef::new(actuator)),
            drive_positioner: false,
        }
    }

    /// True when `Position` actions go to the positioner.
    pub fn records_positioner(&self) -> bool {
        self.drive_positioner || self.actuator.is_none()
    }
}

/// Numeric policy for the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelinePolicy {
    /// Stacks at most this tall are single-plane and get no extra top slice.
    #[serde(default = "default_flat_epsilon")]
    pub flat_epsilon: f64,
    /// Exact clock advance between exposure groups (ms).
    #[serde(default = "default_tie_break")]
    pub tie_break_ms: ExactTime,
}

fn default_flat_epsilon() -> f64 {
    1e-6
}

fn default_tie_break() -> ExactTime {
    ExactTime::from(num_rational::BigRational::new(
        1.into(),
        num_traits::pow(num_bigint::BigInt::from(10), 10),
    ))
}

impl Default for TimelinePolicy {
    fn default() -> Self {
        Self {
            flat_epsilon: default_flat_epsilon(),
            tie_break_ms: default_tie_break(),
        }
    }
}

impl TimelinePolicy {
    /// Reject a non-finite threshold or a tie-break that does not advance the
    /// clock.
    pub fn validate(&self) -> Result<(), ParameterError> {
        if !self.flat_epsilon.is_finite() {
            return Err(ParameterError::NonFinite {
                name: "flat_epsilon",
                value: self.flat_epsilon,
            });
        }
        if !self.tie_break_ms.is_positive() {
            return Err(ParameterError::NonPositiveTieBreak(self.tie_break_ms.clone()));
        }
        Ok(())
    }
}
