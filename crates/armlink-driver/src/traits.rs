//! 设备驱动接口
//!
//! 上层编排（桥接服务、CLI）只通过 [`DeviceDriver`] 使用设备。
//! 机械臂特有的操作（示教、末端执行器、关节运动）放在 [`RobotArm`] 能力接口中，
//! 通过 [`DeviceDriver::robot_arm`] 获取，不需要向下转型。

use crate::diagnostics::DiagnosticSession;
use crate::driver::RobotArmDriver;
use crate::error::DriverError;
use crate::events::DeviceEvent;
use crate::grbl_arm::{ArmStatus, Joint};
use crate::state::DeviceState;
use crate::status::{DeviceCapabilities, DeviceStatus, TaughtPosition};
use armlink_kinematics::JointAngles;
use armlink_protocol::{Axis, AxisSet, AxisValues};
use crossbeam_channel::Receiver;
use std::path::Path;

/// 通用设备驱动
pub trait DeviceDriver: Send + Sync {
    /// 设备 ID
    fn id(&self) -> &str;

    /// 显示名称
    fn name(&self) -> &str;

    fn connect(&self) -> Result<(), DriverError>;

    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn state(&self) -> DeviceState;

    /// 状态快照
    fn status(&self) -> DeviceStatus;

    /// 能力描述
    fn capabilities(&self) -> DeviceCapabilities;

    /// 订阅事件；订阅者处理慢时事件被丢弃，不会阻塞驱动
    fn subscribe(&self) -> Receiver<DeviceEvent>;

    fn home(&self, axes: Option<AxisSet>) -> Result<(), DriverError>;

    fn jog(&self, axis: Axis, distance: f64, feed: f64) -> Result<(), DriverError>;

    fn jog_stop(&self) -> Result<(), DriverError>;

    /// 发送原始 G-code，返回响应文本（出错时以 `"error: "` 开头）
    fn send_gcode(&self, gcode: &str) -> String;

    fn load_file(&self, path: &Path) -> Result<(), DriverError>;

    fn run(&self, from_line: usize) -> Result<(), DriverError>;

    fn pause(&self) -> Result<(), DriverError>;

    fn resume(&self) -> Result<(), DriverError>;

    fn stop(&self) -> Result<(), DriverError>;

    fn reset(&self) -> Result<(), DriverError>;

    /// 机械臂能力（非机械臂设备返回 `None`）
    fn robot_arm(&self) -> Option<&dyn RobotArm> {
        None
    }
}

/// 机械臂能力接口
pub trait RobotArm: Send + Sync {
    fn enable(&self) -> Result<(), DriverError>;

    fn disable(&self) -> Result<(), DriverError>;

    fn move_to(&self, x: f64, y: f64, z: f64, speed: f64) -> Result<(), DriverError>;

    fn gripper_on(&self) -> Result<(), DriverError>;

    fn gripper_off(&self) -> Result<(), DriverError>;

    fn sucker_on(&self) -> Result<(), DriverError>;

    fn sucker_off(&self) -> Result<(), DriverError>;

    fn calibrate(&self) -> Result<(), DriverError>;

    fn check_endstops(&self) -> Result<AxisValues<bool>, DriverError>;

    fn teach_record_position(&self) -> TaughtPosition;

    fn teach_play(&self, speed: f64) -> Result<(), DriverError>;

    fn teach_clear(&self);

    fn teach_positions(&self) -> Vec<TaughtPosition>;

    fn move_to_joints(&self, j1: f64, j2: f64, j3: f64, speed: f64) -> Result<(), DriverError>;

    fn move_to_xyz(&self, x: f64, y: f64, z: f64, speed: f64) -> Result<(), DriverError>;

    fn move_to_xyz_linear(
        &self,
        x: f64,
        y: f64,
        z: f64,
        speed: f64,
        step: f64,
    ) -> Result<(), DriverError>;

    fn jog_joint(&self, joint: Joint, delta: f64, speed: f64) -> Result<(), DriverError>;

    fn grbl_status(&self) -> Result<ArmStatus, DriverError>;

    fn joints(&self) -> JointAngles;

    /// 进入诊断模式（暂停轮询并独占串口）
    fn enter_diagnostics(&self) -> Result<DiagnosticSession<'_>, DriverError>;
}

impl DeviceDriver for RobotArmDriver {
    fn id(&self) -> &str {
        RobotArmDriver::id(self)
    }

    fn name(&self) -> &str {
        RobotArmDriver::name(self)
    }

    fn connect(&self) -> Result<(), DriverError> {
        RobotArmDriver::connect(self)
    }

    fn disconnect(&self) {
        RobotArmDriver::disconnect(self)
    }

    fn is_connected(&self) -> bool {
        RobotArmDriver::is_connected(self)
    }

    fn state(&self) -> DeviceState {
        RobotArmDriver::state(self)
    }

    fn status(&self) -> DeviceStatus {
        RobotArmDriver::status(self)
    }

    fn capabilities(&self) -> DeviceCapabilities {
        RobotArmDriver::capabilities(self)
    }

    fn subscribe(&self) -> Receiver<DeviceEvent> {
        RobotArmDriver::subscribe(self)
    }

    fn home(&self, axes: Option<AxisSet>) -> Result<(), DriverError> {
        RobotArmDriver::home(self, axes)
    }

    fn jog(&self, axis: Axis, distance: f64, feed: f64) -> Result<(), DriverError> {
        RobotArmDriver::jog(self, axis, distance, feed)
    }

    fn jog_stop(&self) -> Result<(), DriverError> {
        RobotArmDriver::jog_stop(self)
    }

    fn send_gcode(&self, gcode: &str) -> String {
        RobotArmDriver::send_gcode(self, gcode)
    }

    fn load_file(&self, path: &Path) -> Result<(), DriverError> {
        RobotArmDriver::load_file(self, path)
    }

    fn run(&self, from_line: usize) -> Result<(), DriverError> {
        RobotArmDriver::run(self, from_line)
    }

    fn pause(&self) -> Result<(), DriverError> {
        RobotArmDriver::pause(self)
    }

    fn resume(&self) -> Result<(), DriverError> {
        RobotArmDriver::resume(self)
    }

    fn stop(&self) -> Result<(), DriverError> {
        RobotArmDriver::stop(self)
    }

    fn reset(&self) -> Result<(), DriverError> {
        RobotArmDriver::reset(self)
    }

    fn robot_arm(&self) -> Option<&dyn RobotArm> {
        Some(self)
    }
}

impl RobotArm for RobotArmDriver {
    fn enable(&self) -> Result<(), DriverError> {
        RobotArmDriver::enable(self)
    }

    fn disable(&self) -> Result<(), DriverError> {
        RobotArmDriver::disable(self)
    }

    fn move_to(&self, x: f64, y: f64, z: f64, speed: f64) -> Result<(), DriverError> {
        RobotArmDriver::move_to(self, x, y, z, speed)
    }

    fn gripper_on(&self) -> Result<(), DriverError> {
        RobotArmDriver::gripper_on(self)
    }

    fn gripper_off(&self) -> Result<(), DriverError> {
        RobotArmDriver::gripper_off(self)
    }

    fn sucker_on(&self) -> Result<(), DriverError> {
        RobotArmDriver::sucker_on(self)
    }

    fn sucker_off(&self) -> Result<(), DriverError> {
        RobotArmDriver::sucker_off(self)
    }

    fn calibrate(&self) -> Result<(), DriverError> {
        RobotArmDriver::calibrate(self)
    }

    fn check_endstops(&self) -> Result<AxisValues<bool>, DriverError> {
        RobotArmDriver::check_endstops(self)
    }

    fn teach_record_position(&self) -> TaughtPosition {
        RobotArmDriver::teach_record_position(self)
    }

    fn teach_play(&self, speed: f64) -> Result<(), DriverError> {
        RobotArmDriver::teach_play(self, speed)
    }

    fn teach_clear(&self) {
        RobotArmDriver::teach_clear(self)
    }

    fn teach_positions(&self) -> Vec<TaughtPosition> {
        RobotArmDriver::teach_positions(self)
    }

    fn move_to_joints(&self, j1: f64, j2: f64, j3: f64, speed: f64) -> Result<(), DriverError> {
        RobotArmDriver::move_to_joints(self, j1, j2, j3, speed)
    }

    fn move_to_xyz(&self, x: f64, y: f64, z: f64, speed: f64) -> Result<(), DriverError> {
        RobotArmDriver::move_to_xyz(self, x, y, z, speed)
    }

    fn move_to_xyz_linear(
        &self,
        x: f64,
        y: f64,
        z: f64,
        speed: f64,
        step: f64,
    ) -> Result<(), DriverError> {
        RobotArmDriver::move_to_xyz_linear(self, x, y, z, speed, step)
    }

    fn jog_joint(&self, joint: Joint, delta: f64, speed: f64) -> Result<(), DriverError> {
        RobotArmDriver::jog_joint(self, joint, delta, speed)
    }

    fn grbl_status(&self) -> Result<ArmStatus, DriverError> {
        RobotArmDriver::grbl_status(self)
    }

    fn joints(&self) -> JointAngles {
        RobotArmDriver::joints(self)
    }

    fn enter_diagnostics(&self) -> Result<DiagnosticSession<'_>, DriverError> {
        RobotArmDriver::enter_diagnostics(self)
    }
}
