//! Exposure scheduling for one group of cameras and lights.

use crate::action_table::{ActionTable, ActionValue, DeviceRef};
use crate::devices::DeviceTiming;
use crate::error::AppResult;
use crate::experiment::ExposureGroup;
use crate::time::ExactTime;

/// Schedules the actions that take one exposure of a group.
///
/// The generator calls this once per exposure group per slice and continues
/// its clock from the returned time.
pub trait ExposureProcedure {
    /// Record the exposure of `group`, starting no earlier than `now`, and
    /// return the time the exposure ends.
    fn expose(
        &self,
        now: &ExactTime,
        group: &ExposureGroup,
        table: &mut ActionTable,
        timing: &dyn DeviceTiming,
    ) -> AppResult<ExactTime>;
}

/// Simultaneous exposure: every light pulses and every camera triggers at the
/// same instant, once all cameras are ready.
///
/// Cameras are triggered for the longest light duration. Lights with a zero
/// duration are treated as ambient and produce no action.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardExposure;

impl ExposureProcedure for StandardExposure {
    fn expose(
        &self,
        now: &ExactTime,
        group: &ExposureGroup,
        table: &mut ActionTable,
        timing: &dyn DeviceTiming,
    ) -> AppResult<ExactTime> {
        let mut start = now.clone();
        for camera in &group.cameras {
            let ready = camera_ready_time(table, camera, timing)?;
            if ready > start {
                start = ready;
            }
        }

        let exposure = group.exposure_time();
        for light in &group.lights {
            if light.duration_ms.is_positive() {
                table.add_action(
                    start.clone(),
                    light.light.clone(),
                    ActionValue::Pulse {
                        duration: light.duration_ms.clone(),
                    },
                )?;
            }
        }
        for camera in &group.cameras {
            table.add_action(
                start.clone(),
                camera.clone(),
                ActionValue::Trigger {
                    exposure: exposure.clone(),
                },
            )?;
        }

        Ok(start + &exposure)
    }
}

/// Earliest time `camera` can start another exposure.
///
/// Zero for a camera that was never triggered, otherwise the end of its last
/// exposure plus its readout latency.
pub fn camera_ready_time(
    table: &ActionTable,
    camera: &DeviceRef,
    timing: &dyn DeviceTiming,
) -> AppResult<ExactTime> {
    let Some(last) = table.last_action_for(camera) else {
        return Ok(ExactTime::zero());
    };
    let mut ready = last.time.clone();
    if let ActionValue::Trigger { exposure } = &last.value {
        ready += exposure;
    }
    ready += &timing.readiness_latency(camera)?;
    Ok(ready)
}
