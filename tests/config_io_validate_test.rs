use batman::config::{Config, GreedMode};
use std::fs;

#[test]
fn save_and_load_yaml_roundtrip() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    let mut cfg = Config::default();
    cfg.batteries.units[0].url = "http://10.0.0.5".to_string();
    cfg.prices.greed.mode = GreedMode::Relative;
    cfg.logging.file = path.with_extension("log").to_string_lossy().to_string();

    cfg.save_to_file(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.batteries.units[0].url, "http://10.0.0.5");
    assert_eq!(loaded.prices.greed.mode, GreedMode::Relative);
    assert_eq!(loaded.logging.file, cfg.logging.file);
    assert!(loaded.validate().is_ok());
}

#[test]
fn config_validation_errors() {
    let mut cfg = Config::default();

    // Charging power must be negative
    cfg.batteries.max_charge_w = 0.0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.batteries.max_discharge_w = -1.0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.batteries.capacity_wh = 0.0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.prices.selection_hours = 0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.prices.greed.low = 40.0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.ramp.deadband_fraction = 0.0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.watchdog.debounce_ms = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn from_file_with_invalid_yaml_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(tmp.path(), b"bad: [unclosed").unwrap();
    let err = Config::from_file(tmp.path()).unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("Serialization error"));
}

#[test]
fn units_can_be_listed_in_yaml() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(
        tmp.path(),
        b"timezone: UTC\nbatteries:\n  units:\n    - name: garage\n      url: http://10.0.0.9\n",
    )
    .unwrap();
    let cfg = Config::from_file(tmp.path()).unwrap();
    assert_eq!(cfg.batteries.units.len(), 1);
    assert_eq!(cfg.batteries.units[0].name, "garage");
    assert_eq!(cfg.batteries.max_charge_w, -2200.0);
    assert_eq!(cfg.tz().unwrap(), chrono_tz::UTC);
}
