//! 设备状态机
//!
//! 状态由驱动持有，在线程间以原子方式共享。
//!
//! ```text
//! Disconnected ─connect─▶ Connecting ─▶ Idle ◀──────────────┐
//!                                        │                   │
//!                     jog / home / run ──┤                   │
//!                                        ▼                   │
//!                          Jog / Homing / Running ⇄ Paused ──┘
//!                                        │
//!                                  固件错误 ▼
//!                                      Alarm ─reset─▶ Idle
//! ```
//!
//! Alarm 只能通过 reset 清除：临时状态的进入与退出都使用比较交换，
//! 不会覆盖已经出现的 Alarm。

use armlink_protocol::GrblState;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// 设备状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DeviceState {
    /// 未连接（默认）
    #[default]
    Disconnected = 0,
    /// 正在连接
    Connecting = 1,
    /// 空闲
    Idle = 2,
    /// 程序运行中
    Running = 3,
    /// 程序暂停
    Paused = 4,
    /// 报警（需要 reset）
    Alarm = 5,
    /// 回零中
    Homing = 6,
    /// 探测中
    Probing = 7,
    /// 点动中
    Jog = 8,
}

impl DeviceState {
    /// 从 u8 转换
    ///
    /// 如果值无效，返回 Disconnected。
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Idle,
            3 => Self::Running,
            4 => Self::Paused,
            5 => Self::Alarm,
            6 => Self::Homing,
            7 => Self::Probing,
            8 => Self::Jog,
            _ => Self::Disconnected,
        }
    }

    /// 转换为 u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// GRBL 状态报告到设备状态的映射
    pub fn from_grbl(state: GrblState) -> Self {
        match state {
            GrblState::Idle | GrblState::Check | GrblState::Sleep => Self::Idle,
            GrblState::Run => Self::Running,
            GrblState::Hold => Self::Paused,
            GrblState::Jog => Self::Jog,
            GrblState::Alarm | GrblState::Door => Self::Alarm,
            GrblState::Home => Self::Homing,
        }
    }

    /// 是否已连接（Disconnected / Connecting 之外的状态）
    pub fn is_connected(self) -> bool {
        !matches!(self, Self::Disconnected | Self::Connecting)
    }

    pub fn is_alarm(self) -> bool {
        self == Self::Alarm
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Alarm => "alarm",
            Self::Homing => "homing",
            Self::Probing => "probing",
            Self::Jog => "jog",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 设备状态（原子版本，用于线程间共享）
#[derive(Debug)]
pub struct AtomicDeviceState {
    inner: AtomicU8,
}

impl AtomicDeviceState {
    pub fn new(state: DeviceState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    /// 获取当前状态
    pub fn get(&self, ordering: Ordering) -> DeviceState {
        DeviceState::from_u8(self.inner.load(ordering))
    }

    /// 设置状态，返回旧状态
    pub fn swap(&self, state: DeviceState, ordering: Ordering) -> DeviceState {
        DeviceState::from_u8(self.inner.swap(state.as_u8(), ordering))
    }

    /// 比较并交换（Compare-and-Swap）
    ///
    /// # 返回
    ///
    /// 如果当前值等于 `current`，则设置为 `new` 并返回 true
    /// 否则返回 false
    pub fn compare_exchange(
        &self,
        current: DeviceState,
        new: DeviceState,
        success: Ordering,
        failure: Ordering,
    ) -> bool {
        self.inner
            .compare_exchange(current.as_u8(), new.as_u8(), success, failure)
            .is_ok()
    }
}

impl Clone for AtomicDeviceState {
    fn clone(&self) -> Self {
        Self::new(self.get(Ordering::Relaxed))
    }
}
