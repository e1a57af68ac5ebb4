//! Z-stack timeline generator.
//!
//! Produces the Action Table for one repetition of a focus stack: the
//! positioner (and optionally a remote-focus actuator) steps through every
//! slice, each exposure group is imaged at every slice, and the devices return
//! to the start position at the end.
//!
//! Timing per slice:
//!
//! ```text
//!   clock ──motion──▶ move ──stabilization──▶ expose ─ tie-break ─▶ ... ─▶ hold
//! ```
//!
//! The first slice has no move: the devices are assumed to already sit at
//! `z_start`. After the last slice the devices travel back to `z_start`; when
//! more repetitions follow, a final hold is recorded once both the positioner
//! has settled and every camera can expose again.
//!
//! The clock is an [`ExactTime`], so the `1e-10` ms tie-break between
//! exposure groups survives any number of slices without rounding away.

use tracing::{debug, info, warn};

use crate::action_table::{ActionTable, ActionValue, DeviceRef};
use crate::calibration::CalibrationModel;
use crate::devices::DeviceTiming;
use crate::error::{AppResult, ParameterError};
use crate::experiment::exposure::{camera_ready_time, ExposureProcedure};
use crate::experiment::{TimelinePolicy, ZStackParams, ZStackTargets};
use crate::time::ExactTime;

/// Largest number of slices a single stack may have.
pub const MAX_SLICES: usize = 100_000;

/// Slack when rounding `z_height / slice_height` up, so that e.g.
/// `1.1 / 0.1 = 11.000000000000002` still gives 11 steps.
const RATIO_TOLERANCE: f64 = 1e-9;

/// Number of slices for `params`.
///
/// `ceil(z_height / slice_height)` steps (at least one), plus one slice for
/// the top of the volume unless the stack is flat.
///
/// # Errors
///
/// [`ParameterError::TooManySlices`] above [`MAX_SLICES`].
pub fn slice_count(params: &ZStackParams, policy: &TimelinePolicy) -> Result<usize, ParameterError> {
    let ratio = params.z_height / params.slice_height;
    let mut count = (ratio - RATIO_TOLERANCE).ceil().max(1.0);
    if params.z_height > policy.flat_epsilon {
        count += 1.0;
    }
    if !count.is_finite() || count > MAX_SLICES as f64 {
        return Err(ParameterError::TooManySlices {
            requested: count,
            limit: MAX_SLICES,
        });
    }
    Ok(count as usize)
}

/// Builds Z-stack Action Tables.
///
/// The generator borrows its calibration, timing provider and exposure
/// procedure, so one calibration can serve any number of generators and
/// generations. Each call to [`generate`](Self::generate) returns a fresh
/// table and keeps no state between calls.
pub struct ZStackGenerator<'a> {
    calibration: &'a CalibrationModel,
    timing: &'a dyn DeviceTiming,
    exposure: &'a dyn ExposureProcedure,
    targets: ZStackTargets,
    policy: TimelinePolicy,
}

impl<'a> ZStackGenerator<'a> {
    /// A generator with the default [`TimelinePolicy`].
    pub fn new(
        calibration: &'a CalibrationModel,
        timing: &'a dyn DeviceTiming,
        exposure: &'a dyn ExposureProcedure,
        targets: ZStackTargets,
    ) -> Self {
        Self {
            calibration,
            timing,
            exposure,
            targets,
            policy: TimelinePolicy::default(),
        }
    }

    /// Replace the policy.
    pub fn with_policy(mut self, policy: TimelinePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Devices this generator drives.
    pub fn targets(&self) -> &ZStackTargets {
        &self.targets
    }

    /// Thresholds in use.
    pub fn policy(&self) -> &TimelinePolicy {
        &self.policy
    }

    /// Build the Action Table for one repetition of `params`.
    ///
    /// Parameters are validated before any device is queried. Failures while
    /// scheduling a slice are reported as `CockpitError::AtSlice`.
    pub fn generate(&self, params: &ZStackParams) -> AppResult<ActionTable> {
        params.validate()?;
        self.policy.validate()?;
        let num_slices = slice_count(params, &self.policy)?;

        info!(
            "Generating Z-stack: {} slices from {} µm every {} µm, {} exposure group(s)",
            num_slices,
            params.z_start,
            params.slice_height,
            params.exposures.len()
        );

        let mut table = ActionTable::new();
        let mut clock = ExactTime::zero();
        let start_vector = self.actuator_vector(params.z_start);
        let mut previous = None;

        for index in 0..num_slices {
            let z_target = params.z_start + params.slice_height * index as f64;
            clock = self
                .schedule_slice(&mut table, clock, previous, z_target, params)
                .map_err(|e| e.at_slice(index))?;
            previous = Some(z_target);
        }

        let last = previous.unwrap_or(params.z_start);
        let movement = self
            .timing
            .movement_time(&self.targets.positioner, last, params.z_start)?;
        clock += &movement.motion;
        clock = self.record(&mut table, clock, params.z_start, start_vector.as_deref())?;

        if params.num_reps > 1 {
            let mut camera_ready = ExactTime::zero();
            for camera in params.cameras() {
                camera_ready = camera_ready.max(camera_ready_time(&table, camera, self.timing)?);
            }
            let settled = &clock + &movement.stabilization;
            clock = self.record(
                &mut table,
                settled.max(camera_ready),
                params.z_start,
                start_vector.as_deref(),
            )?;
        }

        info!(
            "Z-stack timeline ready: {} actions over {} ms",
            table.len(),
            clock
        );
        Ok(table)
    }

    /// Schedule one slice and return the clock after its hold action.
    fn schedule_slice(
        &self,
        table: &mut ActionTable,
        mut clock: ExactTime,
        previous: Option<f64>,
        z_target: f64,
        params: &ZStackParams,
    ) -> AppResult<ExactTime> {
        let vector = self.actuator_vector(z_target);

        if let Some(from) = previous {
            let movement = self
                .timing
                .movement_time(&self.targets.positioner, from, z_target)?;
            clock += &movement.motion;
            clock = self.record(table, clock, z_target, vector.as_deref())?;
            clock += &movement.stabilization;
        }
        debug!("Slice at {} µm settled at {} ms", z_target, clock);

        for group in &params.exposures {
            clock = self.exposure.expose(&clock, group, table, self.timing)?;
            clock += &self.policy.tie_break_ms;
        }

        self.record(table, clock, z_target, vector.as_deref())
    }

    fn actuator_vector(&self, position: f64) -> Option<Vec<f64>> {
        self.targets
            .actuator
            .as_ref()
            .map(|_| self.calibration.lookup(position))
    }

    /// Record the position on every driven target at `time`, advancing past
    /// any earlier action for those targets. Returns the time used.
    fn record(
        &self,
        table: &mut ActionTable,
        mut time: ExactTime,
        position: f64,
        vector: Option<&[f64]>,
    ) -> AppResult<ExactTime> {
        while self.collides(table, &time) {
            warn!(
                "Action at {} ms would coincide with a previous one, advancing by {} ms",
                time, self.policy.tie_break_ms
            );
            time += &self.policy.tie_break_ms;
        }

        if self.targets.records_positioner() {
            table.add_action(
                time.clone(),
                self.targets.positioner.clone(),
                ActionValue::Position(position),
            )?;
        }
        if let (Some(actuator), Some(vector)) = (&self.targets.actuator, vector) {
            table.add_action(
                time.clone(),
                actuator.clone(),
                ActionValue::Actuator(vector.to_vec()),
            )?;
        }
        Ok(time)
    }

    fn collides(&self, table: &ActionTable, time: &ExactTime) -> bool {
        self.driven_targets()
            .any(|target| table.ready_time(target).is_some_and(|last| last >= time))
    }

    fn driven_targets(&self) -> impl Iterator<Item = &DeviceRef> {
        let positioner = self
            .targets
            .records_positioner()
            .then_some(&self.targets.positioner);
        positioner.into_iter().chain(self.targets.actuator.as_ref())
    }
}
