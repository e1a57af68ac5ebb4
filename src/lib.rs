//! Experiment timeline builder for a microscope control system.
//!
//! The crate computes, ahead of time, every timestamped hardware instruction
//! needed for one repetition of a focus-stack acquisition. Nothing here talks
//! to hardware: the resulting [`ActionTable`](action_table::ActionTable) is
//! handed to an execution layer that dispatches it.
//!
//! - [`time`]: exact rational milliseconds
//! - [`action_table`]: the append-only, per-target ordered action ledger
//! - [`calibration`]: position to actuator-vector model for remote focus
//! - [`devices`]: device timing models and the timing capability trait
//! - [`experiment`]: exposure scheduling and the Z-stack generator
//! - [`config`]: layered TOML/environment configuration

pub mod action_table;
pub mod calibration;
pub mod config;
pub mod devices;
pub mod error;
pub mod experiment;
pub mod time;

pub use action_table::{Action, ActionTable, ActionValue, DeviceRef};
pub use error::{AppResult, CockpitError};
pub use time::ExactTime;
