//! Configuration loading using Figment.
//!
//! A timeline run is described by a TOML file, optionally overridden by
//! environment variables:
//!
//! 1. the TOML file (base configuration)
//! 2. environment variables prefixed with `COCKPIT_`, nested keys separated by
//!    a double underscore
//!
//! ```text
//! COCKPIT_LOGGING__LEVEL=debug
//! COCKPIT_EXPERIMENT__Z_HEIGHT=20
//! COCKPIT_EXPERIMENT__NUM_REPS=5
//! ```
//!
//! # File layout
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [calibration]
//! path = "dm_calibration.txt"   # relative to the config file
//! delimiter = "whitespace"
//!
//! [experiment]
//! z_start = 0.0
//! slice_height = 0.5
//! z_height = 10.0
//! num_reps = 1
//!
//! [[experiment.exposures]]
//! cameras = ["camera 1"]
//! lights = [{ light = "488 nm", duration_ms = 50 }]
//!
//! [targets]
//! positioner = "z piezo"
//! actuator = "dm"
//!
//! [policy]
//! flat_epsilon = 1e-6
//! tie_break_ms = "1e-10"
//!
//! [devices."z piezo"]
//! kind = "piezo"
//! ```

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action_table::DeviceRef;
use crate::calibration::{CalibrationFormat, CalibrationModel};
use crate::devices::{DeviceModel, DeviceRegistry};
use crate::error::{CalibrationError, ParameterError};
use crate::experiment::{ExposureGroup, TimelinePolicy, ZStackParams, ZStackTargets};
use crate::time::ExactTime;

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "COCKPIT_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or an environment override could not be read or parsed.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// The values were read but describe an experiment that cannot run.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration of a timeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CockpitConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Actuator calibration source.
    pub calibration: CalibrationConfig,
    /// Stack geometry and exposures.
    pub experiment: ExperimentConfig,
    /// Devices the stack drives.
    pub targets: ZStackTargets,
    /// Generator thresholds.
    #[serde(default)]
    pub policy: TimelinePolicy,
    /// Timing model for every referenced device.
    #[serde(default)]
    pub devices: DeviceRegistry,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Where the actuator calibration table lives and how to read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Calibration file; relative paths resolve against the config file.
    pub path: PathBuf,
    /// Column layout.
    #[serde(flatten)]
    pub format: CalibrationFormat,
}

/// Z-stack settings as written in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// First slice position (µm).
    #[serde(default)]
    pub z_start: f64,
    /// Distance between slices (µm).
    pub slice_height: f64,
    /// Total span of the stack (µm).
    #[serde(default)]
    pub z_height: f64,
    /// Signed so that a zero or negative count is reported, not a parse error.
    #[serde(default = "default_num_reps")]
    pub num_reps: i64,
    /// Exposure groups imaged at every slice.
    #[serde(default)]
    pub exposures: Vec<ExposureGroup>,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_num_reps() -> i64 {
    1
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for CockpitConfig {
    /// A remote-focus stack with one camera and one laser line.
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            calibration: CalibrationConfig {
                path: PathBuf::from("dm_calibration.txt"),
                format: CalibrationFormat::default(),
            },
            experiment: ExperimentConfig {
                z_start: 0.0,
                slice_height: 0.5,
                z_height: 10.0,
                num_reps: default_num_reps(),
                exposures: vec![ExposureGroup::new()
                    .camera("camera 1")
                    .light("488 nm", ExactTime::from_millis(50))],
            },
            targets: ZStackTargets::remote_focus("z piezo", "dm"),
            policy: TimelinePolicy::default(),
            devices: DeviceRegistry::new()
                .with_device("z piezo", DeviceModel::piezo())
                .with_device("dm", DeviceModel::actuator())
                .with_device("camera 1", DeviceModel::camera())
                .with_device("488 nm", DeviceModel::Light),
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl ExperimentConfig {
    /// Convert to generator parameters.
    ///
    /// # Errors
    ///
    /// [`ParameterError::InvalidRepetitions`] when `num_reps` is not a
    /// positive 32-bit count, or any error from [`ZStackParams::validate`].
    pub fn to_params(&self) -> Result<ZStackParams, ParameterError> {
        let num_reps = u32::try_from(self.num_reps)
            .ok()
            .filter(|&n| n > 0)
            .ok_or(ParameterError::InvalidRepetitions(self.num_reps))?;
        let params = ZStackParams {
            z_start: self.z_start,
            slice_height: self.slice_height,
            z_height: self.z_height,
            num_reps,
            exposures: self.exposures.clone(),
        };
        params.validate()?;
        Ok(params)
    }
}

impl CockpitConfig {
    /// Load configuration from a specific file path
    ///
    /// `COCKPIT_` environment variables take precedence over the file. A
    /// relative calibration path is resolved against the directory of the
    /// config file. After loading, configuration is validated.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be loaded or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        if config.calibration.path.is_relative() {
            if let Some(dir) = path.parent() {
                config.calibration.path = dir.join(&config.calibration.path);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Experiment parameters and timeline policy are usable
    /// - Targets name configured devices of a moving kind
    /// - Exposure groups reference cameras and lights of the right kind
    ///
    /// # Errors
    ///
    /// Returns a ConfigError with a descriptive message for any validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        self.experiment
            .to_params()
            .map_err(|e| ConfigError::ValidationError(format!("Invalid experiment: {e}")))?;
        self.policy
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("Invalid policy: {e}")))?;

        self.validate_mover("positioner", &self.targets.positioner)?;
        if let Some(actuator) = &self.targets.actuator {
            self.validate_mover("actuator", actuator)?;
            if actuator == &self.targets.positioner {
                return Err(ConfigError::ValidationError(format!(
                    "Device '{actuator}' cannot be both positioner and actuator"
                )));
            }
        }

        for (index, group) in self.experiment.exposures.iter().enumerate() {
            for camera in &group.cameras {
                self.validate_kind(index, camera, "camera", DeviceModel::is_camera)?;
            }
            for light in &group.lights {
                self.validate_kind(index, &light.light, "light", DeviceModel::is_light)?;
            }
        }

        Ok(())
    }

    fn validate_mover(&self, role: &str, device: &DeviceRef) -> Result<(), ConfigError> {
        match self.devices.get(device) {
            None => Err(ConfigError::ValidationError(format!(
                "Target {role} '{device}' is not a configured device"
            ))),
            Some(model) if !model.moves() => Err(ConfigError::ValidationError(format!(
                "Target {role} '{device}' is a {}, which cannot move",
                model.kind()
            ))),
            Some(_) => Ok(()),
        }
    }

    fn validate_kind(
        &self,
        group: usize,
        device: &DeviceRef,
        expected: &str,
        is_kind: fn(&DeviceModel) -> bool,
    ) -> Result<(), ConfigError> {
        match self.devices.get(device) {
            None => Err(ConfigError::ValidationError(format!(
                "Exposure group {group}: {expected} '{device}' is not a configured device"
            ))),
            Some(model) if !is_kind(model) => Err(ConfigError::ValidationError(format!(
                "Exposure group {group}: '{device}' is a {}, expected a {expected}",
                model.kind()
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Generator parameters for the configured experiment.
    pub fn params(&self) -> Result<ZStackParams, ParameterError> {
        self.experiment.to_params()
    }

    /// Load the configured calibration table.
    pub fn load_calibration(&self) -> Result<CalibrationModel, CalibrationError> {
        CalibrationModel::load_from_file(&self.calibration.path, &self.calibration.format)
    }

    /// Render as TOML, e.g. to write out a starting configuration.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
