//! 顶层导出测试
//!
//! 验证常用类型可以从 `armlink_sdk` 和 prelude 直接导入

use armlink_sdk::prelude::*;
use armlink_sdk::{EndstopTest, FirmwareProbe, SerialError, forward_kinematics};

#[test]
fn test_top_level_exports() {
    let _config: DriverConfig = DriverConfig::default();
    let _robot: RobotConfig = RobotConfig::default();
    let _error: DriverError = DriverError::NotConnected;
    let _serial: SerialError = SerialError::NotOpen;
    let _endstop = EndstopTest::default();
    let _probe = FirmwareProbe::default();
    let _control = RunControl::new();
    let _dialect: Dialect = Dialect::default();

    let p = forward_kinematics(0.0, 0.0, 0.0, &RobotConfig::default());
    assert!((p.x - 305.0).abs() < 1e-9);
}

#[test]
fn test_module_paths() {
    let _ = armlink_sdk::protocol::ArmCommand::QueryEndstops.to_wire();
    let _ = armlink_sdk::kinematics::LinearPath::new(
        CartesianPosition::new(0.0, 0.0, 0.0),
        CartesianPosition::new(10.0, 0.0, 0.0),
        5.0,
    );
    let _ = armlink_sdk::diagnostics::motion::DEFAULT_SPEEDS;
}
