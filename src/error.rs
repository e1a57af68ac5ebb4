//! Custom error types for the timeline builder.
//!
//! `CockpitError` is the crate-level error. It consolidates the failure
//! categories of experiment setup and timeline generation:
//!
//! - **`Calibration`**: the actuator calibration table is missing, empty,
//!   malformed, or too small to fit. Raised before any Action Table work.
//! - **`Ordering`**: an insertion would break the per-target strictly
//!   increasing time invariant of an Action Table. This indicates a defect in
//!   the code producing the actions, not a transient condition.
//! - **`Parameter`**: the experiment parameters or a device query are
//!   invalid (non-positive slice height, zero repetitions, unknown device).
//!   Raised before any device timing is queried.
//! - **`AtSlice`**: any of the above raised while scheduling a specific slice,
//!   tagged with the slice index.
//! - **`Config`**: the configuration file could not be loaded or validated.
//!
//! There are no retries anywhere: generation is deterministic, so every error
//! aborts the repetition and no partial table is handed back.

use std::path::PathBuf;

use thiserror::Error;

use crate::action_table::DeviceRef;
use crate::config::ConfigError;
use crate::time::ExactTime;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, CockpitError>;

/// Crate-level error for setup and generation.
#[derive(Error, Debug)]
pub enum CockpitError {
    /// Calibration table problems.
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    /// A rejected Action Table insertion.
    #[error("Ordering error: {0}")]
    Ordering(#[from] OrderingError),

    /// Invalid parameters or device queries.
    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    /// An error raised while scheduling slice `index`.
    #[error("Slice {index}: {source}")]
    AtSlice {
        /// Zero-based slice index.
        index: usize,
        /// The underlying failure.
        #[source]
        source: Box<CockpitError>,
    },

    /// Configuration loading or validation failure.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl CockpitError {
    /// Attach the index of the slice being scheduled when this error arose.
    pub fn at_slice(self, index: usize) -> Self {
        CockpitError::AtSlice {
            index,
            source: Box::new(self),
        }
    }

    /// The innermost error, with any slice context removed.
    pub fn root(&self) -> &CockpitError {
        match self {
            CockpitError::AtSlice { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Problems with the calibration sample set.
#[derive(Error, Debug)]
pub enum CalibrationError {
    /// The file could not be read.
    #[error("cannot read calibration file {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The delimited reader failed.
    #[error("calibration table could not be parsed: {0}")]
    Csv(#[from] csv::Error),

    /// No data rows.
    #[error("calibration table contains no samples")]
    Empty,

    /// A field is empty, not a number, or not finite.
    #[error("line {line}: '{field}' is not a finite number")]
    Malformed {
        /// 1-based line number.
        line: u64,
        /// Offending text.
        field: String,
    },

    /// A row with a position but no actuator values.
    #[error("line {line}: a row needs a position and at least one actuator value")]
    MissingActuators {
        /// 1-based line number.
        line: u64,
    },

    /// A row whose column count differs from the first row.
    #[error("line {line}: expected {expected} columns, found {found}")]
    InconsistentWidth {
        /// 1-based line number.
        line: u64,
        /// Columns in the first row, position included.
        expected: usize,
        /// Columns in this row.
        found: usize,
    },

    /// Two rows share a position.
    #[error("position {position} appears more than once")]
    DuplicatePosition {
        /// The repeated position.
        position: f64,
    },

    /// Fewer than two distinct positions.
    #[error("at least 2 distinct positions are needed for regression, found {found}")]
    InsufficientSamples {
        /// Distinct positions present.
        found: usize,
    },
}

/// An insertion that would break Action Table ordering.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderingError {
    /// Not strictly later than the target's latest action.
    #[error("action for '{target}' at {attempted} ms is not after its previous action at {previous} ms")]
    NotAfterPrevious {
        /// Device the action was aimed at.
        target: DeviceRef,
        /// Rejected time.
        attempted: ExactTime,
        /// Time of the target's latest action.
        previous: ExactTime,
    },

    /// A negative time.
    #[error("action for '{target}' at {attempted} ms precedes the experiment start")]
    BeforeStart {
        /// Device the action was aimed at.
        target: DeviceRef,
        /// Rejected time.
        attempted: ExactTime,
    },
}

impl OrderingError {
    /// The device the rejected action was aimed at.
    pub fn target(&self) -> &DeviceRef {
        match self {
            OrderingError::NotAfterPrevious { target, .. } => target,
            OrderingError::BeforeStart { target, .. } => target,
        }
    }
}

/// Invalid experiment parameters or device queries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    /// Slice height is zero or negative.
    #[error("slice height must be positive, got {0}")]
    NonPositiveSliceHeight(f64),

    /// Stack height is negative.
    #[error("stack height must not be negative, got {0}")]
    NegativeHeight(f64),

    /// A NaN or infinite numeric parameter.
    #[error("{name} must be finite, got {value}")]
    NonFinite {
        /// Parameter name.
        name: &'static str,
        /// Rejected value.
        value: f64,
    },

    /// Fewer than one repetition.
    #[error("repetition count must be at least 1, got {0}")]
    InvalidRepetitions(i64),

    /// A light with a negative pulse length.
    #[error("exposure of '{light}' must not be negative, got {duration} ms")]
    NegativeExposure {
        /// Light source.
        light: DeviceRef,
        /// Rejected duration.
        duration: ExactTime,
    },

    /// A device listed more than once in the same exposure group.
    #[error("exposure group {group} lists '{device}' more than once")]
    DuplicateDevice {
        /// Zero-based group index.
        group: usize,
        /// The repeated device.
        device: DeviceRef,
    },

    /// A tie-break increment that does not advance the clock.
    #[error("tie-break increment must be positive, got {0} ms")]
    NonPositiveTieBreak(ExactTime),

    /// More slices than [`MAX_SLICES`](crate::experiment::MAX_SLICES).
    #[error("stack needs {requested} slices, limit is {limit}")]
    TooManySlices {
        /// Slices the geometry asks for.
        requested: f64,
        /// Upper bound.
        limit: usize,
    },

    /// No timing model for this device.
    #[error("unknown device '{0}'")]
    UnknownDevice(DeviceRef),

    /// The device model lacks the requested timing.
    #[error("device '{device}' has no {capability} timing")]
    Unsupported {
        /// Device queried.
        device: DeviceRef,
        /// `"movement"` or `"readiness"`.
        capability: &'static str,
    },
}
