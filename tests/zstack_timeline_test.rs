//! Z-stack timeline integration tests
//!
//! Builds complete Action Tables through the public API and checks the
//! schedule as an execution layer would see it.

mod common;

use cockpit::action_table::{ActionValue, DeviceRef};
use cockpit::calibration::{CalibrationFormat, CalibrationModel};
use cockpit::error::{CalibrationError, CockpitError, ParameterError};
use cockpit::experiment::{ExposureGroup, StandardExposure, ZStackGenerator, ZStackParams, ZStackTargets};
use cockpit::time::ExactTime;

use common::{assert_time_ordered, positions};

fn ms(v: i64) -> ExactTime {
    ExactTime::from_millis(v)
}

/// Four slices at 0, 1, 2, 3 µm with a zero-length exposure: one move per
/// slice after the first, one hold per slice, one return to start.
#[test]
fn test_four_slice_stack() {
    let calibration = common::calibration();
    let devices = common::devices();
    let generator = ZStackGenerator::new(
        &calibration,
        &devices,
        &StandardExposure,
        ZStackTargets::positioner("z piezo"),
    );
    let params = ZStackParams::new(0.0, 1.0, 3.0)
        .with_exposure(ExposureGroup::new().camera("camera 1").light("488 nm", ExactTime::zero()));

    let table = generator.generate(&params).expect("generate");
    assert_time_ordered(&table);
    assert_eq!(
        positions(&table, "z piezo"),
        vec![0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 0.0]
    );

    // Every slice waits for the 33 ms camera readout of the previous one.
    let triggers: Vec<_> = table
        .entries()
        .filter(|a| a.target.name() == "camera 1")
        .map(|a| a.time.clone())
        .collect();
    assert_eq!(triggers, vec![ms(0), ms(33), ms(66), ms(99)]);
}

#[test]
fn test_remote_focus_uses_samples_and_regression() {
    let calibration = common::calibration();
    let devices = common::devices();
    let generator = ZStackGenerator::new(
        &calibration,
        &devices,
        &StandardExposure,
        ZStackTargets::remote_focus("z piezo", "dm"),
    );
    let params = ZStackParams::new(0.0, 2.5, 10.0)
        .with_exposure(ExposureGroup::new().camera("camera 1").light("488 nm", ms(5)));

    let table = generator.generate(&params).expect("generate");
    assert_time_ordered(&table);

    let vectors: Vec<Vec<f64>> = table
        .entries()
        .filter_map(|a| match &a.value {
            ActionValue::Actuator(v) => Some(v.clone()),
            _ => None,
        })
        .collect();
    // Slice 0 hold, then a move and a hold for each of 4 slices, then return.
    assert_eq!(vectors.len(), 1 + 2 * 4 + 1);
    assert_eq!(vectors[0], vec![100.0, 200.0]);
    assert_eq!(vectors[vectors.len() - 2], vec![110.0, 220.0]);
    assert_eq!(vectors[vectors.len() - 1], vec![100.0, 200.0]);

    // 5 µm is not a sample: interpolated from the fit.
    let middle = &vectors[4];
    assert!((middle[0] - 105.0).abs() < 1e-9, "{middle:?}");
    assert!((middle[1] - 210.0).abs() < 1e-9, "{middle:?}");

    assert!(table.ready_time(&DeviceRef::new("z piezo")).is_none());
}

#[test]
fn test_groups_wait_for_their_own_cameras() {
    let calibration = common::calibration();
    let devices = common::devices();
    let generator = ZStackGenerator::new(
        &calibration,
        &devices,
        &StandardExposure,
        ZStackTargets::positioner("z piezo"),
    );
    let params = ZStackParams::new(0.0, 1.0, 2.0)
        .with_reps(2)
        .with_exposure(ExposureGroup::new().camera("camera 1").light("488 nm", ms(10)))
        .with_exposure(
            ExposureGroup::new()
                .camera("camera 2")
                .light("561 nm", ms(4))
                .light("488 nm", ms(2)),
        );

    let table = generator.generate(&params).expect("generate");
    assert_time_ordered(&table);

    let count = |name: &str| table.entries().filter(|a| a.target.name() == name).count();
    assert_eq!(count("camera 1"), 3);
    assert_eq!(count("camera 2"), 3);
    assert_eq!(count("561 nm"), 3);
    assert_eq!(count("488 nm"), 6);

    // Camera 2 is triggered for the longest light in its group.
    let last = table.last_action_for(&"camera 2".into()).expect("camera 2 used");
    assert_eq!(last.value, ActionValue::Trigger { exposure: ms(4) });

    // Final hold waits for camera 1: last trigger + 10 ms exposure + 33 ms.
    let camera_1 = table.last_action_for(&"camera 1".into()).expect("camera 1 used");
    let ready = &camera_1.time + &ms(43);
    let hold = table.last_action_for(&"z piezo".into()).expect("piezo used");
    assert_eq!(hold.value, ActionValue::Position(0.0));
    assert!(hold.time >= ready);
}

#[test]
fn test_single_plane_has_no_top_slice() {
    let calibration = common::calibration();
    let devices = common::devices();
    let generator = ZStackGenerator::new(
        &calibration,
        &devices,
        &StandardExposure,
        ZStackTargets::positioner("z piezo"),
    );

    let table = generator
        .generate(&ZStackParams::new(4.0, 1.0, 0.0))
        .expect("generate");
    assert_eq!(positions(&table, "z piezo"), vec![4.0, 4.0]);
    let times: Vec<_> = table.entries().map(|a| a.time.clone()).collect();
    // Hold at 0, then the zero-distance return after 0.1 ms of motion.
    assert_eq!(times, vec![ms(0), "0.1".parse().expect("time")]);
}

#[test]
fn test_table_serializes_for_execution() {
    let calibration = common::calibration();
    let devices = common::devices();
    let generator = ZStackGenerator::new(
        &calibration,
        &devices,
        &StandardExposure,
        ZStackTargets::remote_focus("z piezo", "dm"),
    );
    let params = ZStackParams::new(0.0, 10.0, 10.0)
        .with_exposure(ExposureGroup::new().camera("camera 1").light("488 nm", ms(5)));
    let table = generator.generate(&params).expect("generate");

    let json = serde_json::to_value(&table).expect("serialize");
    let actions = json["actions"].as_array().expect("actions array");
    assert_eq!(actions.len(), table.len());

    assert_eq!(actions[0]["target"], "488 nm");
    assert_eq!(actions[0]["time"], "0");
    assert_eq!(actions[0]["value"]["type"], "pulse");
    assert_eq!(actions[0]["value"]["value"]["duration"], "5");
    assert_eq!(actions[1]["value"]["type"], "trigger");

    let hold = &actions[2];
    assert_eq!(hold["target"], "dm");
    assert_eq!(hold["time"], "5.0000000001");
    assert_eq!(hold["value"]["type"], "actuator");
    assert_eq!(hold["value"]["value"], serde_json::json!([100.0, 200.0]));
}

#[test]
fn test_executor_runnable_prefix() {
    let calibration = common::calibration();
    let devices = common::devices();
    let generator = ZStackGenerator::new(
        &calibration,
        &devices,
        &StandardExposure,
        ZStackTargets::remote_focus("z piezo", "dm"),
    );
    let params = ZStackParams::new(0.0, 10.0, 10.0)
        .with_exposure(ExposureGroup::new().camera("camera 1").light("488 nm", ms(5)));
    let table = generator.generate(&params).expect("generate");

    // An executor that only drives lights and cameras stops at the first
    // mirror action.
    let optics = |a: &cockpit::Action| !matches!(a.value, ActionValue::Actuator(_));
    assert_eq!(table.runnable_prefix(0, optics), 2);
    assert_eq!(table.runnable_prefix(2, optics), 0);
    assert_eq!(table.runnable_prefix(table.len(), optics), 0);
}

#[test]
fn test_calibration_file_errors() {
    let fixture = common::Fixture::new();
    let format = CalibrationFormat::default();

    let missing = fixture.dir.path().join("absent.txt");
    assert!(matches!(
        CalibrationModel::load_from_file(&missing, &format),
        Err(CalibrationError::Io { .. })
    ));

    let empty = fixture.write("empty.txt", "# nothing measured yet\n");
    assert!(matches!(
        CalibrationModel::load_from_file(&empty, &format),
        Err(CalibrationError::Empty)
    ));

    let ragged = fixture.write("ragged.txt", "0 1 2\n10 3\n");
    assert!(matches!(
        CalibrationModel::load_from_file(&ragged, &format),
        Err(CalibrationError::InconsistentWidth { .. })
    ));

    let good = fixture.write("dm.txt", common::CALIBRATION);
    let model = CalibrationModel::load_from_file(&good, &format).expect("load");
    assert_eq!(model.channels(), 2);

    // Tab-exported tables load in whitespace mode too.
    let tabbed = fixture.write("dm_tabs.txt", "0\t100\t200\n10\t110\t220\n");
    let tabbed = CalibrationModel::load_from_file(&tabbed, &format).expect("load tabs");
    assert_eq!(tabbed.samples(), model.samples());
}

#[test]
fn test_invalid_geometry_is_rejected_before_scheduling() {
    let calibration = common::calibration();
    let devices = common::devices();
    let generator = ZStackGenerator::new(
        &calibration,
        &devices,
        &StandardExposure,
        ZStackTargets::positioner("z piezo"),
    );

    for params in [
        ZStackParams::new(0.0, -1.0, 3.0),
        ZStackParams::new(0.0, 1.0, -3.0),
        ZStackParams::new(f64::INFINITY, 1.0, 3.0),
        ZStackParams::new(0.0, 1.0, 3.0).with_reps(0),
    ] {
        let err = generator.generate(&params).expect_err("must fail");
        assert!(
            matches!(err, CockpitError::Parameter(_)),
            "unexpected error {err}"
        );
    }

    let err = generator
        .generate(&ZStackParams::new(0.0, 0.0, 3.0))
        .expect_err("must fail");
    assert!(matches!(
        err,
        CockpitError::Parameter(ParameterError::NonPositiveSliceHeight(_))
    ));
}
