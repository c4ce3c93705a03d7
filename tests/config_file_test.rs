//! Integration tests for loading scan configuration files

use std::fs;

use tomo_pso::config::ScanConfig;
use tomo_pso::error::PsoError;
use tomo_pso::sequence::{AcquisitionOrder, AngleWrap, InterlaceMethod};
use tomo_pso::pulses::PulseReference;
use tomo_pso::ScanPlanner;

#[test]
fn test_load_full_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scan.toml");
    fs::write(
        &path,
        r#"
        [scan]
        rotation_start = 10.0
        rotation_stop = 190.0
        num_angles = 181

        [stage]
        counts_per_rotation = 36000
        rotation_direction = 0
        accel_time = 0.2
        max_velocity = 360.0

        [camera]
        exposure = 0.05
        readout = 0.05

        [interlace]
        method = "RoundRobin"
        loops = 2
        span = 180.0
        wrap = "half"
        order = "time_order"

        [motion]
        dt = 5e-4

        [pulses]
        leading_offset = false
        reference = "zero"
        "#,
    )
    .unwrap();

    let config = ScanConfig::load_from(&path).unwrap();
    assert_eq!(config.scan.num_angles, 181);
    assert_eq!(config.scan.nominal_step(), 1.0);
    assert_eq!(config.stage.max_velocity, Some(360.0));
    assert_eq!(config.interlace.method, InterlaceMethod::RoundRobin);
    assert_eq!(config.interlace.wrap, AngleWrap::Half);
    assert_eq!(config.interlace.order, AcquisitionOrder::TimeOrder);
    assert_eq!(config.pulses.reference, PulseReference::Zero);
    assert!(!config.pulses.leading_offset);
    // Unset keys keep their defaults
    assert_eq!(config.camera.readout_margin, 1.0);
    assert_eq!(config.motion.max_samples, 5_000_000);

    let plan = ScanPlanner::new(config).plan().unwrap();
    assert!(plan.warnings.is_empty());
    assert_eq!(plan.taxi.encoder_counts_per_step, 100);
    assert_eq!(plan.real.delays().len(), 180);
    assert!(plan.real.delays().iter().all(|&d| d > 0));
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = ScanConfig::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.scan.num_angles, ScanConfig::default().scan.num_angles);
    assert_eq!(config.interlace.method, InterlaceMethod::Timbir);
}

#[test]
fn test_invalid_file_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");

    fs::write(&path, "[interlace]\nmethod = \"Spiral\"\n").unwrap();
    assert!(matches!(ScanConfig::load_from(&path), Err(PsoError::Config(_))));

    fs::write(&path, "[camera]\nexposure = -1.0\n").unwrap();
    let err = ScanConfig::load_from(&path).unwrap_err();
    assert!(err.to_string().contains("exposure must be > 0"));

    fs::write(&path, "[scan\nnum_angles = 3\n").unwrap();
    assert!(ScanConfig::load_from(&path).is_err());
}

#[test]
fn test_template_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("template.toml");
    let mut config = ScanConfig::default();
    config.interlace.method = InterlaceMethod::GoldenAngle;
    config.interlace.loops = 8;
    config.stage.velocity = Some(90.0);
    fs::write(&path, config.to_toml_string().unwrap()).unwrap();
    assert_eq!(ScanConfig::load_from(&path).unwrap(), config);
}

#[test]
fn test_shipped_config_is_valid() {
    let config = ScanConfig::load_from(concat!(env!("CARGO_MANIFEST_DIR"), "/config/tomo_pso.toml"))
        .unwrap();
    assert_eq!(config, ScanConfig::default());
}
