//! Timing models for the device kinds an experiment can reference.
//!
//! Defaults mirror the simulated handlers of the instrument software:
//!
//! - `piezo`: 0.1ms to move, then 1ms of settling per µm travelled
//! - `stage`: 1ms to move, 1ms to settle
//! - `slm`: 1ms per pattern step, 30ms to settle
//! - `retarder`: 1ms to move, 1ms to settle
//! - `actuator`: remote-focus actuator driven alongside a positioner, no
//!   timing of its own
//! - `camera`: 33ms sensor readout between exposures
//! - `light`: ready immediately

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::action_table::DeviceRef;
use crate::devices::{DeviceTiming, MovementTime};
use crate::error::{AppResult, ParameterError};
use crate::time::ExactTime;

/// Timing behaviour of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceModel {
    /// Focus piezo: settling grows with the distance travelled.
    Piezo {
        /// Fixed motion time.
        #[serde(default = "default_piezo_motion")]
        motion_ms: ExactTime,
        /// Settling time per µm of travel.
        #[serde(default = "one_ms")]
        stabilization_ms_per_um: ExactTime,
    },
    /// Motorised stage axis.
    Stage {
        /// Fixed motion time.
        #[serde(default = "one_ms")]
        motion_ms: ExactTime,
        /// Fixed settling time.
        #[serde(default = "one_ms")]
        stabilization_ms: ExactTime,
    },
    /// Spatial light modulator.
    Slm {
        /// Pattern switch time.
        #[serde(default = "one_ms")]
        motion_ms: ExactTime,
        /// Settling after a switch.
        #[serde(default = "default_slm_stabilization")]
        stabilization_ms: ExactTime,
    },
    /// Liquid-crystal retarder.
    Retarder {
        /// Switch time.
        #[serde(default = "one_ms")]
        motion_ms: ExactTime,
        /// Settling after a switch.
        #[serde(default = "one_ms")]
        stabilization_ms: ExactTime,
    },
    /// Deformable mirror or other remote-focus actuator.
    Actuator {
        /// Motion time, zero by default.
        #[serde(default)]
        motion_ms: ExactTime,
        /// Settling time, zero by default.
        #[serde(default)]
        stabilization_ms: ExactTime,
    },
    /// Camera; busy for its readout after each exposure.
    Camera {
        /// Readout time after the exposure ends.
        #[serde(default = "default_camera_readout")]
        readout_ms: ExactTime,
    },
    /// Light source; always ready.
    Light,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_piezo_motion() -> ExactTime {
    // 0.1 ms, held exactly.
    ExactTime::from(num_rational::BigRational::new(1.into(), 10.into()))
}

fn one_ms() -> ExactTime {
    ExactTime::from_millis(1)
}

fn default_slm_stabilization() -> ExactTime {
    ExactTime::from_millis(30)
}

fn default_camera_readout() -> ExactTime {
    ExactTime::from_millis(33)
}

impl DeviceModel {
    /// Piezo with 0.1 ms motion and 1 ms/µm settling.
    pub fn piezo() -> Self {
        DeviceModel::Piezo {
            motion_ms: default_piezo_motion(),
            stabilization_ms_per_um: one_ms(),
        }
    }

    /// Stage with 1 ms motion and settling.
    pub fn stage() -> Self {
        DeviceModel::Stage {
            motion_ms: one_ms(),
            stabilization_ms: one_ms(),
        }
    }

    /// SLM with 1 ms switching and 30 ms settling.
    pub fn slm() -> Self {
        DeviceModel::Slm {
            motion_ms: one_ms(),
            stabilization_ms: default_slm_stabilization(),
        }
    }

    /// Retarder with 1 ms switching and settling.
    pub fn retarder() -> Self {
        DeviceModel::Retarder {
            motion_ms: one_ms(),
            stabilization_ms: one_ms(),
        }
    }

    /// Actuator that moves and settles instantly.
    pub fn actuator() -> Self {
        DeviceModel::Actuator {
            motion_ms: ExactTime::zero(),
            stabilization_ms: ExactTime::zero(),
        }
    }

    /// Camera with a 33 ms readout.
    pub fn camera() -> Self {
        DeviceModel::Camera {
            readout_ms: default_camera_readout(),
        }
    }

    /// Camera with a custom readout time.
    pub fn camera_with_readout(readout_ms: ExactTime) -> Self {
        DeviceModel::Camera { readout_ms }
    }

    /// The `kind` tag used in configuration files.
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceModel::Piezo { .. } => "piezo",
            DeviceModel::Stage { .. } => "stage",
            DeviceModel::Slm { .. } => "slm",
            DeviceModel::Retarder { .. } => "retarder",
            DeviceModel::Actuator { .. } => "actuator",
            DeviceModel::Camera { .. } => "camera",
            DeviceModel::Light => "light",
        }
    }

    /// True for cameras.
    pub fn is_camera(&self) -> bool {
        matches!(self, DeviceModel::Camera { .. })
    }

    /// True for light sources.
    pub fn is_light(&self) -> bool {
        matches!(self, DeviceModel::Light)
    }

    /// True for every kind that reports movement timings.
    pub fn moves(&self) -> bool {
        !matches!(self, DeviceModel::Camera { .. } | DeviceModel::Light)
    }

    /// Movement timing, or `None` for kinds that do not move.
    ///
    /// Only the piezo depends on the travel distance.
    pub fn movement_time(&self, from: f64, to: f64) -> Option<MovementTime> {
        match self {
            DeviceModel::Piezo {
                motion_ms,
                stabilization_ms_per_um,
            } => {
                let settle = stabilization_ms_per_um.scaled((to - from).abs())?;
                Some(MovementTime::new(motion_ms.clone(), settle))
            }
            DeviceModel::Stage {
                motion_ms,
                stabilization_ms,
            }
            | DeviceModel::Slm {
                motion_ms,
                stabilization_ms,
            }
            | DeviceModel::Retarder {
                motion_ms,
                stabilization_ms,
            }
            | DeviceModel::Actuator {
                motion_ms,
                stabilization_ms,
            } => Some(MovementTime::new(
                motion_ms.clone(),
                stabilization_ms.clone(),
            )),
            DeviceModel::Camera { .. } | DeviceModel::Light => None,
        }
    }

    /// Readiness latency, or `None` for kinds that do not report one.
    pub fn readiness_latency(&self) -> Option<ExactTime> {
        match self {
            DeviceModel::Camera { readout_ms } => Some(readout_ms.clone()),
            DeviceModel::Light => Some(ExactTime::zero()),
            _ => None,
        }
    }
}

/// Named device models; the standard [`DeviceTiming`] provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceRegistry {
    devices: BTreeMap<DeviceRef, DeviceModel>,
}

impl DeviceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with_device(mut self, name: &str, model: DeviceModel) -> Self {
        self.insert(DeviceRef::new(name), model);
        self
    }

    /// Register or replace a device.
    pub fn insert(&mut self, device: DeviceRef, model: DeviceModel) -> Option<DeviceModel> {
        self.devices.insert(device, model)
    }

    /// Model registered under `device`.
    pub fn get(&self, device: &DeviceRef) -> Option<&DeviceModel> {
        self.devices.get(device)
    }

    /// Look up a device, failing with `UnknownDevice`.
    pub fn require(&self, device: &DeviceRef) -> Result<&DeviceModel, ParameterError> {
        self.get(device)
            .ok_or_else(|| ParameterError::UnknownDevice(device.clone()))
    }

    /// Devices in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&DeviceRef, &DeviceModel)> {
        self.devices.iter()
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl DeviceTiming for DeviceRegistry {
    fn movement_time(&self, device: &DeviceRef, from: f64, to: f64) -> AppResult<MovementTime> {
        let model = self.require(device)?;
        if !model.moves() {
            return Err(ParameterError::Unsupported {
                device: device.clone(),
                capability: "movement",
            }
            .into());
        }
        model.movement_time(from, to).ok_or_else(|| {
            ParameterError::NonFinite {
                name: "movement distance",
                value: to - from,
            }
            .into()
        })
    }

    fn readiness_latency(&self, device: &DeviceRef) -> AppResult<ExactTime> {
        let model = self.require(device)?;
        model.readiness_latency().ok_or_else(|| {
            ParameterError::Unsupported {
                device: device.clone(),
                capability: "readiness",
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CockpitError;

    fn t(s: &str) -> ExactTime {
        s.parse().unwrap()
    }

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new()
            .with_device("z piezo", DeviceModel::piezo())
            .with_device("xy stage", DeviceModel::stage())
            .with_device("SI SLM", DeviceModel::slm())
            .with_device("SI angle", DeviceModel::retarder())
            .with_device("camera 1", DeviceModel::camera())
            .with_device("488 nm", DeviceModel::Light)
    }

    #[test]
    fn test_piezo_settling_scales_with_distance() {
        let devices = registry();
        let piezo = DeviceRef::new("z piezo");

        let up = devices.movement_time(&piezo, 0.0, 3.0).unwrap();
        assert_eq!(up.motion, t("0.1"));
        assert_eq!(up.stabilization, ExactTime::from_millis(3));

        let down = devices.movement_time(&piezo, 2.5, 0.0).unwrap();
        assert_eq!(down.stabilization, t("2.5"));

        let still = devices.movement_time(&piezo, 1.0, 1.0).unwrap();
        assert!(still.stabilization.is_zero());
    }

    #[test]
    fn test_fixed_movement_times() {
        let devices = registry();
        let slm = devices.movement_time(&"SI SLM".into(), 0.0, 1.0).unwrap();
        assert_eq!(slm, MovementTime::new(ExactTime::from_millis(1), ExactTime::from_millis(30)));

        let stage = devices.movement_time(&"xy stage".into(), 0.0, 5000.0).unwrap();
        assert_eq!(stage, MovementTime::new(ExactTime::from_millis(1), ExactTime::from_millis(1)));
    }

    #[test]
    fn test_camera_readiness() {
        let devices = registry();
        assert_eq!(
            devices.readiness_latency(&"camera 1".into()).unwrap(),
            ExactTime::from_millis(33)
        );
        assert!(devices.readiness_latency(&"488 nm".into()).unwrap().is_zero());
    }

    #[test]
    fn test_unknown_and_unsupported_devices() {
        let devices = registry();
        let err = devices
            .movement_time(&"nope".into(), 0.0, 1.0)
            .unwrap_err();
        assert!(matches!(
            err,
            CockpitError::Parameter(ParameterError::UnknownDevice(_))
        ));

        let err = devices
            .movement_time(&"camera 1".into(), 0.0, 1.0)
            .unwrap_err();
        assert!(matches!(
            err,
            CockpitError::Parameter(ParameterError::Unsupported {
                capability: "movement",
                ..
            })
        ));

        let err = devices.readiness_latency(&"z piezo".into()).unwrap_err();
        assert!(matches!(
            err,
            CockpitError::Parameter(ParameterError::Unsupported {
                capability: "readiness",
                ..
            })
        ));
    }

    #[test]
    fn test_non_finite_travel_is_rejected() {
        let devices = registry();
        let err = devices
            .movement_time(&"z piezo".into(), 0.0, f64::INFINITY)
            .unwrap_err();
        assert!(matches!(
            err,
            CockpitError::Parameter(ParameterError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_models_deserialize_with_defaults() {
        let text = r#"
            ["z piezo"]
            kind = "piezo"

            ["camera 1"]
            kind = "camera"
            readout_ms = "16.5"

            ["dm"]
            kind = "actuator"

            ["405 nm"]
            kind = "light"
        "#;
        let devices: DeviceRegistry = toml::from_str(text).unwrap();
        assert_eq!(devices.len(), 4);
        assert_eq!(devices.get(&"z piezo".into()), Some(&DeviceModel::piezo()));
        assert_eq!(
            devices.get(&"camera 1".into()),
            Some(&DeviceModel::camera_with_readout(t("16.5")))
        );
        assert_eq!(devices.get(&"dm".into()).map(DeviceModel::kind), Some("actuator"));
        assert!(devices.get(&"405 nm".into()).is_some_and(DeviceModel::is_light));
    }
}
