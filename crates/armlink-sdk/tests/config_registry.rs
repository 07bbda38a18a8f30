//! 设备清单与注册表测试

use armlink_sdk::driver::DriverTiming;
use armlink_sdk::prelude::*;
use armlink_sdk::serial::{MockFirmware, MockOpenFailure};
use armlink_sdk::DevicesConfig;
use std::sync::Arc;

const DEVICES: &str = r#"
[[devices]]
id = "arm1"
name = "Desk arm"
port = "/dev/ttyUSB0"
timeout_ms = 300
dialect = "legacy"

[devices.timing]
boot_settle_ms = 0
zero_settle_ms = 0
write_settle_ms = 0
trailing_quiet_ms = 0
poll_interval_ms = 3600000
diagnostics_drain_ms = 0

[devices.transform.axis_mapping]
x = "Y"
y = "X"
z = "Z"
"#;

/// Legacy 固件：回显运动目标，限位全部未触发
fn legacy_firmware() -> MockFirmware {
    MockFirmware::new(|cmd| {
        if let Some(rest) = cmd.strip_prefix("G1 ") {
            let words: Vec<&str> = rest.split_whitespace().collect();
            return vec![format!(
                "INFO: LINEAR MOVE: {} {} {} .",
                words[0], words[1], words[2]
            )];
        }
        match cmd {
            "M119" => vec!["INFO: ENDSTOP: [X:0 Y:0 Z:0]".into()],
            "G92 X0 Y0 Z0" => vec![],
            other => vec![format!("INFO: {}", other)],
        }
    })
}

#[test]
fn test_devices_config_file_roundtrip() {
    let config = DevicesConfig::from_toml_str(DEVICES).unwrap();
    let device = config.get("arm1").unwrap();
    assert_eq!(device.name, "Desk arm");
    assert_eq!(device.dialect, Dialect::Legacy);
    assert_eq!(device.transform.axis_mapping.x, Axis::Y);
    assert_eq!(device.timing.poll_interval_ms, Some(3_600_000));
    // 未写出的字段取默认值
    assert_eq!(device.baud_rate, 115200);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.toml");
    config.save(&path).unwrap();
    let loaded = DevicesConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_duplicate_device_ids_rejected() {
    let doubled = format!("{}\n[[devices]]\nid = \"arm1\"\n", DEVICES);
    assert!(matches!(
        DevicesConfig::from_toml_str(&doubled),
        Err(DriverError::Config(_))
    ));
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(DevicesConfig::load(dir.path().join("missing.toml")).is_err());
}

#[test]
fn test_registry_connects_and_maps_axes() {
    let config = DevicesConfig::from_toml_str(DEVICES).unwrap();
    let fw = legacy_firmware();
    let registry = DeviceRegistry::from_config_with(&config, Arc::new(fw.connector())).unwrap();
    assert_eq!(registry.ids(), vec!["arm1".to_string()]);

    let results = registry.connect_all();
    assert_eq!(results.len(), 1);
    assert!(results[0].1.is_ok());

    let device = registry.get("arm1").unwrap();
    assert!(device.is_connected());
    assert_eq!(device.state(), DeviceState::Idle);
    fw.clear_log();

    // 逻辑 X 映射到固件 Y
    device.jog(Axis::X, 5.0, 50.0).unwrap();
    assert!(fw.written().iter().any(|c| c.starts_with("G1 X0.00 Y5.00 Z0.00")));
    let position = device.status().position;
    assert!((position.x - 5.0).abs() < 1e-9);
    assert!(position.y.abs() < 1e-9);

    let arm = registry.robot_arm("arm1").unwrap();
    assert_eq!(arm.check_endstops().unwrap(), AxisValues::splat(false));

    registry.disconnect_all();
    assert_eq!(device.state(), DeviceState::Disconnected);
}

#[test]
fn test_registry_reports_connect_failure() {
    let config = DevicesConfig::from_toml_str(DEVICES).unwrap();
    let fw = legacy_firmware();
    let connector = fw.connector().failing(MockOpenFailure::Unavailable);
    let registry = DeviceRegistry::from_config_with(&config, Arc::new(connector)).unwrap();

    let results = registry.connect_all();
    assert!(results[0].1.is_err());
    let device = registry.get("arm1").unwrap();
    assert_eq!(device.state(), DeviceState::Disconnected);
    assert!(device.status().error_message.is_some());
}

#[test]
fn test_registry_rejects_duplicate_insert() {
    let mut registry = DeviceRegistry::new();
    let fw = legacy_firmware();
    let config = DriverConfig {
        id: "arm1".into(),
        timing: DriverTiming::immediate(),
        ..Default::default()
    };
    let first = RobotArmDriver::with_connector(config.clone(), Arc::new(fw.connector())).unwrap();
    let second = RobotArmDriver::with_connector(config, Arc::new(fw.connector())).unwrap();
    registry.insert(Arc::new(first)).unwrap();
    assert!(matches!(
        registry.insert(Arc::new(second)),
        Err(DriverError::Config(_))
    ));
    assert_eq!(registry.len(), 1);
}
