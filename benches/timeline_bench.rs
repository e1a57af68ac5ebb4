use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cockpit::action_table::{ActionTable, ActionValue, DeviceRef};
use cockpit::calibration::{CalibrationModel, CalibrationSample};
use cockpit::devices::{DeviceModel, DeviceRegistry};
use cockpit::experiment::{ExposureGroup, StandardExposure, ZStackGenerator, ZStackParams, ZStackTargets};
use cockpit::time::ExactTime;

const CHANNELS: usize = 69;

fn mirror_calibration() -> CalibrationModel {
    let samples = (0..=20)
        .map(|i| {
            let z = i as f64 * 0.5;
            let actuators = (0..CHANNELS).map(|c| 0.1 + 0.01 * z * (c as f64 + 1.0)).collect();
            CalibrationSample::new(z, actuators)
        })
        .collect();
    CalibrationModel::from_samples(samples).expect("valid calibration")
}

fn devices() -> DeviceRegistry {
    DeviceRegistry::new()
        .with_device("z piezo", DeviceModel::piezo())
        .with_device("dm", DeviceModel::actuator())
        .with_device("camera 1", DeviceModel::camera())
        .with_device("camera 2", DeviceModel::camera())
        .with_device("488 nm", DeviceModel::Light)
        .with_device("561 nm", DeviceModel::Light)
}

fn benchmark_zstack_generation(c: &mut Criterion) {
    let calibration = mirror_calibration();
    let devices = devices();
    let generator = ZStackGenerator::new(
        &calibration,
        &devices,
        &StandardExposure,
        ZStackTargets::remote_focus("z piezo", "dm"),
    );

    let mut group = c.benchmark_group("zstack_generate");
    for slices in [10usize, 100, 1000] {
        let params = ZStackParams::new(0.0, 0.1, slices as f64 * 0.1)
            .with_reps(2)
            .with_exposure(
                ExposureGroup::new()
                    .camera("camera 1")
                    .light("488 nm", ExactTime::from_millis(50)),
            )
            .with_exposure(
                ExposureGroup::new()
                    .camera("camera 2")
                    .light("561 nm", ExactTime::from_millis(20)),
            );
        group.bench_with_input(BenchmarkId::from_parameter(slices), &params, |b, params| {
            b.iter(|| black_box(generator.generate(params).expect("generate")));
        });
    }
    group.finish();
}

fn benchmark_calibration_lookup(c: &mut Criterion) {
    let calibration = mirror_calibration();
    c.bench_function("calibration_lookup_sample", |b| {
        b.iter(|| black_box(calibration.lookup(black_box(5.0))));
    });
    c.bench_function("calibration_lookup_fit", |b| {
        b.iter(|| black_box(calibration.lookup(black_box(5.25))));
    });
}

fn benchmark_table_insertion(c: &mut Criterion) {
    let targets: Vec<DeviceRef> = (0..8).map(|i| DeviceRef::new(&format!("device {i}"))).collect();
    let step: ExactTime = "1e-10".parse().expect("time literal");
    c.bench_function("action_table_add_10k", |b| {
        b.iter(|| {
            let mut table = ActionTable::new();
            let mut time = ExactTime::zero();
            for i in 0..10_000 {
                table
                    .add_action(time.clone(), targets[i % targets.len()].clone(), ActionValue::Position(i as f64))
                    .expect("ordered insert");
                if i % targets.len() == targets.len() - 1 {
                    time += &step;
                }
            }
            black_box(table)
        });
    });
}

criterion_group!(
    benches,
    benchmark_zstack_generation,
    benchmark_calibration_lookup,
    benchmark_table_insertion
);
criterion_main!(benches);
