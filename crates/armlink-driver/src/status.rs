//! 设备状态快照与能力描述

use crate::state::DeviceState;
use armlink_kinematics::AxisLimit;
use armlink_protocol::{Axis, AxisValues, GrblSettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 逻辑位置（度 / mm）
///
/// 只在收到确认响应后整体更新，不会出现部分轴更新。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            a: 0.0,
            b: 0.0,
            c: 0.0,
        }
    }

    /// 三个主轴的值
    pub fn axes(&self) -> AxisValues<f64> {
        AxisValues::new(self.x, self.y, self.z)
    }

    pub fn from_axes(values: AxisValues<f64>) -> Self {
        Self::new(values.x, values.y, values.z)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X={:.2} Y={:.2} Z={:.2}", self.x, self.y, self.z)
    }
}

/// 夹爪状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GripperState {
    Open,
    Closed,
    #[default]
    Unknown,
}

/// 被限位开关阻挡的运动方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndstopDirection {
    Positive,
    Negative,
}

impl EndstopDirection {
    /// 点动距离对应的方向（`distance > 0` 为正向）
    pub fn of_distance(distance: f64) -> Self {
        if distance > 0.0 {
            Self::Positive
        } else {
            Self::Negative
        }
    }
}

/// 设备状态快照
///
/// 由驱动持有，调用方拿到的是不可变副本。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub state: DeviceState,
    pub position: Position,
    /// 工件坐标
    pub work_position: Position,
    pub feed_rate: f64,
    /// 程序进度（0-100）
    pub progress: f64,
    pub current_line: usize,
    pub total_lines: usize,
    pub current_file: Option<String>,
    /// 最近一次错误（reset 清除）
    pub error_message: Option<String>,
    /// 进给倍率（%）
    pub feed_override: f64,
    /// 主轴倍率（%）
    pub spindle_override: f64,
    pub gripper_state: GripperState,
    pub sucker_state: bool,
    /// 最近一次 `M119` 的结果（逻辑轴，`true` = 触发）
    pub endstop_states: Option<AxisValues<bool>>,
    /// 被限位阻挡的方向
    pub endstop_blocked: BTreeMap<Axis, EndstopDirection>,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self {
            state: DeviceState::Disconnected,
            position: Position::default(),
            work_position: Position::default(),
            feed_rate: 0.0,
            progress: 0.0,
            current_line: 0,
            total_lines: 0,
            current_file: None,
            error_message: None,
            feed_override: 100.0,
            spindle_override: 100.0,
            gripper_state: GripperState::Unknown,
            sucker_state: false,
            endstop_states: None,
            endstop_blocked: BTreeMap::new(),
        }
    }
}

/// 工作空间尺寸
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkEnvelope {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// 设备能力描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub axes: Vec<Axis>,
    pub has_gripper: bool,
    pub has_sucker: bool,
    pub has_spindle: bool,
    pub has_laser: bool,
    pub has_probe: bool,
    /// Legacy 方言为速度刻度上限（100），GRBL 为 mm/min
    pub max_feed_rate: f64,
    pub work_envelope: WorkEnvelope,
    pub axis_limits: AxisValues<Option<AxisLimit>>,
}

impl DeviceCapabilities {
    /// 3 轴机械臂（夹爪 + 吸盘，速度刻度 1-100）
    pub fn robot_arm(axis_limits: AxisValues<Option<AxisLimit>>) -> Self {
        Self {
            axes: Axis::ALL.to_vec(),
            has_gripper: true,
            has_sucker: true,
            has_spindle: false,
            has_laser: false,
            has_probe: false,
            max_feed_rate: 100.0,
            // J1 ±180°，J2 ±90°，J3 ±120°
            work_envelope: WorkEnvelope {
                x: 360.0,
                y: 180.0,
                z: 240.0,
            },
            axis_limits,
        }
    }

    /// 用 GRBL `$$` 设置更新行程、最大速度与激光模式
    pub fn apply_grbl_settings(&mut self, settings: &GrblSettings) {
        let travel = settings.max_travel();
        let rate = settings.max_rate();
        self.work_envelope = WorkEnvelope {
            x: travel.x,
            y: travel.y,
            z: travel.z,
        };
        self.max_feed_rate = rate.x.max(rate.y).max(rate.z);
        self.has_laser = settings.laser_mode();
    }
}

/// 示教记录点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaughtPosition {
    pub index: usize,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub gripper: GripperState,
    pub sucker: bool,
}

impl TaughtPosition {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y, self.z)
    }
}
