//! Remote-focus actuator calibration.
//!
//! A remote-focus device (typically a deformable mirror) needs one drive value
//! per actuator channel for every focal position it is asked to reach. The
//! calibration table holds measured, trusted samples:
//!
//! ```text
//! # position  actuator_1  actuator_2  ...  actuator_N
//! 0.0         100.0       200.0
//! 10.0        110.0       220.0
//! ```
//!
//! [`CalibrationModel::lookup`] returns a sample's vector verbatim when the
//! queried position is one of the calibrated positions. For any other
//! position it falls back to an independent ordinary-least-squares line per
//! channel, fitted once over all samples:
//!
//! ```text
//! actuator_i(z) = slope_i * z + intercept_i
//! ```
//!
//! No cross-channel coupling is modelled. The model is immutable after
//! construction and can be shared between threads.
//!
//! # Usage
//!
//! ```
//! use cockpit::calibration::{CalibrationFormat, CalibrationModel};
//!
//! let model = CalibrationModel::parse("0 100 200\n10 110 220\n", &CalibrationFormat::default())?;
//! assert_eq!(model.lookup(0.0), vec![100.0, 200.0]);
//! assert_eq!(model.lookup(5.0), vec![105.0, 210.0]);
//! # Ok::<(), cockpit::error::CalibrationError>(())
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CalibrationError;

// =============================================================================
// File format
// =============================================================================

/// Column separator of a calibration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delimiter {
    /// Runs of spaces and tabs.
    #[default]
    Whitespace,
    /// One comma per column boundary.
    Comma,
    /// One tab per column boundary.
    Tab,
}

/// How to read a calibration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationFormat {
    /// Column separator.
    #[serde(default)]
    pub delimiter: Delimiter,
}

// =============================================================================
// Linear fit
// =============================================================================

/// Least-squares line for one actuator channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    /// Actuator units per µm.
    pub slope: f64,
    /// Actuator value at position zero.
    pub intercept: f64,
}

impl LinearFit {
    /// Ordinary least squares over `(x, y)` points.
    ///
    /// Returns `None` when the x values have no spread (fewer than two
    /// distinct positions), where the slope is undefined.
    pub fn ordinary_least_squares(points: &[(f64, f64)]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f64;
        let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
        let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for (x, y) in points {
            let dx = x - mean_x;
            sxx += dx * dx;
            sxy += dx * (y - mean_y);
        }
        if sxx <= 0.0 {
            return None;
        }

        let slope = sxy / sxx;
        Some(Self {
            slope,
            intercept: mean_y - slope * mean_x,
        })
    }

    /// Evaluate the line at `x`.
    pub fn apply(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

impl fmt::Display for LinearFit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} * z + {}", self.slope, self.intercept)
    }
}

// =============================================================================
// Samples and model
// =============================================================================

/// A measured `(position, actuator vector)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    /// Focus position (µm).
    pub position: f64,
    /// One value per actuator channel.
    pub actuators: Vec<f64>,
}

impl CalibrationSample {
    /// A sample at `position`.
    pub fn new(position: f64, actuators: Vec<f64>) -> Self {
        Self {
            position,
            actuators,
        }
    }
}

/// Exact lookup over calibrated positions with a per-channel linear fallback.
#[derive(Debug, Clone)]
pub struct CalibrationModel {
    samples: Vec<CalibrationSample>,
    /// Position key -> index into `samples`.
    index: HashMap<u64, usize>,
    fit: Vec<LinearFit>,
}

/// Bit pattern used as the exact-match key; folds `-0.0` onto `0.0`.
fn position_key(position: f64) -> u64 {
    if position == 0.0 {
        0.0f64.to_bits()
    } else {
        position.to_bits()
    }
}

impl CalibrationModel {
    /// Build a model from samples already in memory.
    ///
    /// # Errors
    ///
    /// Fails when there are no samples, when rows disagree on the number of
    /// channels, when a value is not finite, when a position repeats, or when
    /// fewer than two distinct positions exist.
    pub fn from_samples(samples: Vec<CalibrationSample>) -> Result<Self, CalibrationError> {
        let first = samples.first().ok_or(CalibrationError::Empty)?;
        let channels = first.actuators.len();

        let mut index = HashMap::with_capacity(samples.len());
        for (i, sample) in samples.iter().enumerate() {
            // Rows are numbered from 1 to match file line numbers when the
            // samples come from a file without comments.
            let line = i as u64 + 1;
            if sample.actuators.is_empty() {
                return Err(CalibrationError::MissingActuators { line });
            }
            if sample.actuators.len() != channels {
                return Err(CalibrationError::InconsistentWidth {
                    line,
                    expected: channels + 1,
                    found: sample.actuators.len() + 1,
                });
            }
            let mut values = std::iter::once(&sample.position).chain(&sample.actuators);
            if let Some(bad) = values.find(|v| !v.is_finite()) {
                return Err(CalibrationError::Malformed {
                    line,
                    field: bad.to_string(),
                });
            }
            if index.insert(position_key(sample.position), i).is_some() {
                return Err(CalibrationError::DuplicatePosition {
                    position: sample.position,
                });
            }
        }

        if index.len() < 2 {
            return Err(CalibrationError::InsufficientSamples { found: index.len() });
        }

        let fit = (0..channels)
            .map(|channel| {
                let points: Vec<(f64, f64)> = samples
                    .iter()
                    .map(|s| (s.position, s.actuators[channel]))
                    .collect();
                LinearFit::ordinary_least_squares(&points)
                    .ok_or(CalibrationError::InsufficientSamples { found: index.len() })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            samples = samples.len(),
            channels,
            "fitted actuator calibration"
        );

        Ok(Self {
            samples,
            index,
            fit,
        })
    }

    /// Parse calibration rows from text.
    ///
    /// With [`Delimiter::Whitespace`] any run of spaces or tabs separates
    /// columns. With a comma or tab delimiter every field must hold a value,
    /// so `0,,200` is malformed.
    pub fn parse(text: &str, format: &CalibrationFormat) -> Result<Self, CalibrationError> {
        match format.delimiter {
            Delimiter::Whitespace => {
                let normalized: String = text
                    .lines()
                    .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
                    .collect::<Vec<_>>()
                    .join("\n");
                Self::from_reader(normalized.as_bytes(), b' ')
            }
            Delimiter::Comma => Self::from_reader(text.as_bytes(), b','),
            Delimiter::Tab => Self::from_reader(text.as_bytes(), b'\t'),
        }
    }

    /// Load a calibration file from disk.
    pub fn load_from_file<P: AsRef<Path>>(
        path: P,
        format: &CalibrationFormat,
    ) -> Result<Self, CalibrationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CalibrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model = Self::parse(&text, format)?;
        info!(
            path = %path.display(),
            samples = model.samples.len(),
            channels = model.channels(),
            "loaded actuator calibration"
        );
        Ok(model)
    }

    fn from_reader<R: std::io::Read>(reader: R, delimiter: u8) -> Result<Self, CalibrationError> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .delimiter(delimiter)
            .from_reader(reader);

        let mut samples = Vec::new();
        let mut width = None;
        for record in csv.records() {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();

            if record.iter().all(str::is_empty) {
                continue;
            }
            let fields: Vec<&str> = record.iter().collect();
            if fields.len() < 2 {
                return Err(CalibrationError::MissingActuators { line });
            }
            match width {
                None => width = Some(fields.len()),
                Some(expected) if expected != fields.len() => {
                    return Err(CalibrationError::InconsistentWidth {
                        line,
                        expected,
                        found: fields.len(),
                    });
                }
                Some(_) => {}
            }

            let values = fields
                .iter()
                .map(|field| match field.parse::<f64>() {
                    Ok(v) if v.is_finite() => Ok(v),
                    _ => Err(CalibrationError::Malformed {
                        line,
                        field: field.to_string(),
                    }),
                })
                .collect::<Result<Vec<f64>, _>>()?;

            samples.push(CalibrationSample::new(values[0], values[1..].to_vec()));
        }

        Self::from_samples(samples)
    }

    /// Actuator vector for `position`: the stored sample when `position` is
    /// calibrated, the per-channel linear estimate otherwise.
    pub fn lookup(&self, position: f64) -> Vec<f64> {
        if let Some(&i) = self.index.get(&position_key(position)) {
            return self.samples[i].actuators.clone();
        }
        debug!(position, "no calibration sample, using linear fit");
        self.fit.iter().map(|line| line.apply(position)).collect()
    }

    /// True if `position` is one of the calibrated positions.
    pub fn is_calibrated(&self, position: f64) -> bool {
        self.index.contains_key(&position_key(position))
    }

    /// Number of actuator channels.
    pub fn channels(&self) -> usize {
        self.fit.len()
    }

    /// Samples in file order.
    pub fn samples(&self) -> &[CalibrationSample] {
        &self.samples
    }

    /// Per-channel fitted lines.
    pub fn fit(&self) -> &[LinearFit] {
        &self.fit
    }
}
