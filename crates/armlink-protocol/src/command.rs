//! 命令构建
//!
//! 结构化命令在这里才被序列化为线路文本（不含行终止符，
//! 终止符由传输层统一追加）。

use crate::axis::{Axis, AxisValues};
use std::fmt;

/// Legacy 方言速度范围（1-100 的速度刻度）
pub const LEGACY_SPEED_RANGE: std::ops::RangeInclusive<u32> = 1..=100;

/// 回零运动使用的速度
pub const HOME_SPEED: u32 = 50;

/// 机械臂命令
#[derive(Debug, Clone, PartialEq)]
pub enum ArmCommand {
    /// 绝对直线运动（固件坐标）
    LinearMove {
        target: AxisValues<f64>,
        feed: u32,
    },
    /// 回到零位（`G1 X0 Y0 Z0 F50`）
    MoveHome,
    /// 查询限位开关
    QueryEndstops,
    /// 将当前位置设为零点
    ZeroPosition,
    /// 夹爪闭合（舵机 90°）
    GripperClose,
    /// 夹爪张开（舵机 0°）
    GripperOpen,
    /// 吸盘开
    SuckerOn,
    /// 吸盘关
    SuckerOff,
    /// 电机使能
    MotorsOn,
    /// 电机释放
    MotorsOff,
    /// 绝对坐标模式
    AbsoluteMode,
    /// 相对坐标模式
    RelativeMode,
    /// 原样透传
    Raw(String),
}

impl ArmCommand {
    /// Legacy 速度裁剪到 1..=100
    pub fn legacy_speed(speed: f64) -> u32 {
        let lo = *LEGACY_SPEED_RANGE.start();
        let hi = *LEGACY_SPEED_RANGE.end();
        if !speed.is_finite() {
            return lo;
        }
        (speed.trunc() as i64).clamp(lo as i64, hi as i64) as u32
    }

    /// 单轴相对运动（其余轴为 0），用于相对模式下的诊断扫描
    pub fn single_axis_move(axis: Axis, value: f64, feed: u32) -> Self {
        ArmCommand::LinearMove {
            target: AxisValues::splat(0.0).with(axis, value),
            feed,
        }
    }

    /// 序列化为线路文本
    pub fn to_wire(&self) -> String {
        match self {
            ArmCommand::LinearMove { target, feed } => format!(
                "G1 X{:.2} Y{:.2} Z{:.2} F{}",
                target.x, target.y, target.z, feed
            ),
            ArmCommand::MoveHome => format!("G1 X0 Y0 Z0 F{}", HOME_SPEED),
            ArmCommand::QueryEndstops => "M119".to_string(),
            ArmCommand::ZeroPosition => "G92 X0 Y0 Z0".to_string(),
            ArmCommand::GripperClose => "M3 S90".to_string(),
            ArmCommand::GripperOpen => "M3 S0".to_string(),
            ArmCommand::SuckerOn => "M10".to_string(),
            ArmCommand::SuckerOff => "M11".to_string(),
            ArmCommand::MotorsOn => "M17".to_string(),
            ArmCommand::MotorsOff => "M84".to_string(),
            ArmCommand::AbsoluteMode => "G90".to_string(),
            ArmCommand::RelativeMode => "G91".to_string(),
            ArmCommand::Raw(text) => text.trim().to_string(),
        }
    }
}

impl fmt::Display for ArmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}
