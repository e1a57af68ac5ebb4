//! Common test utilities for timeline integration tests
//!
//! This module provides reusable test helpers for:
//! - Writing configuration and calibration fixtures to temporary directories
//! - A standard bench of simulated devices
//! - Ordering assertions over finished Action Tables

#![allow(dead_code)] // Not every test file uses every helper

use std::path::PathBuf;

use cockpit::action_table::{ActionTable, ActionValue};
use cockpit::calibration::{CalibrationFormat, CalibrationModel};
use cockpit::devices::{DeviceModel, DeviceRegistry};
use cockpit::time::ExactTime;
use tempfile::TempDir;

/// Two-channel calibration used across tests: `act = (100 + z, 200 + 2z)`.
pub const CALIBRATION: &str = "\
# position  act_1  act_2
0   100  200
10  110  220
";

/// Temporary directory holding fixture files; removed on drop.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    /// Write `contents` to `name` inside the fixture directory.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).expect("write fixture");
        path
    }
}

pub fn calibration() -> CalibrationModel {
    CalibrationModel::parse(CALIBRATION, &CalibrationFormat::default()).expect("parse calibration")
}

/// Piezo, mirror, two cameras and two lights with the standard timings.
pub fn devices() -> DeviceRegistry {
    DeviceRegistry::new()
        .with_device("z piezo", DeviceModel::piezo())
        .with_device("dm", DeviceModel::actuator())
        .with_device("camera 1", DeviceModel::camera())
        .with_device("camera 2", DeviceModel::camera_with_readout(ExactTime::from_millis(10)))
        .with_device("488 nm", DeviceModel::Light)
        .with_device("561 nm", DeviceModel::Light)
}

/// Assert dispatch order is non-decreasing and each target's actions are
/// strictly increasing.
pub fn assert_time_ordered(table: &ActionTable) {
    let mut previous: Option<&ExactTime> = None;
    for action in table {
        if let Some(previous) = previous {
            assert!(
                previous <= &action.time,
                "dispatch order broken at {} ({})",
                action.time,
                action.target
            );
        }
        previous = Some(&action.time);
    }

    for target in table.targets() {
        let times: Vec<_> = table
            .entries()
            .filter(|a| &a.target == target)
            .map(|a| &a.time)
            .collect();
        assert!(
            times.windows(2).all(|w| w[0] < w[1]),
            "actions for {target} are not strictly increasing"
        );
    }
}

/// Positions recorded for `target`, in dispatch order.
pub fn positions(table: &ActionTable, target: &str) -> Vec<f64> {
    table
        .entries()
        .filter(|a| a.target.name() == target)
        .filter_map(|a| match a.value {
            ActionValue::Position(z) => Some(z),
            _ => None,
        })
        .collect()
}
