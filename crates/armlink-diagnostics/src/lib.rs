//! # Armlink Diagnostics
//!
//! 硬件特性测量工具，只依赖串口传输契约：
//!
//! - [`EndstopTest`]: 限位行程测量（逐轴正负方向搜索限位开关）
//! - [`FirmwareProbe`]: 固件能力探测（类型判断、参数提取）
//! - [`MotionTest`]: 速度扫描（往返耗时、推荐速度）
//! - [`CouplingTest`]: 轴耦合检测与比例标定
//! - [`BoardTest`]: 控制板逐项自检（运动、末端执行器、延迟、错误处理）
//!
//! 每个工具借用一个 [`TransportGuard`](armlink_serial::TransportGuard)
//! 独占串口运行，通过 [`RunControl`] 协作式取消（在离散步骤之间检查）。
//! 取消后不会自动回零，由调用方负责把机械臂带回安全位置。
//!
//! # 使用示例
//!
//! ```rust,no_run
//! use armlink_diagnostics::{EndstopTest, RunControl};
//! use armlink_driver::{DriverConfig, RobotArmDriver};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = RobotArmDriver::new(DriverConfig::default())?;
//! driver.connect()?;
//! let mut session = driver.enter_diagnostics()?;
//! let report = EndstopTest::default().run(session.transport(), None, &RunControl::new())?;
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! # Ok(())
//! # }
//! ```

pub mod board;
pub mod coupling;
pub mod endstop;
mod error;
mod link;
pub mod log;
pub mod motion;
pub mod probe;

pub use board::{BoardConfig, BoardReport, BoardTest, CheckResult, CheckStatus, LatencyStats};
pub use coupling::{AngleMeter, CouplingConfig, CouplingReport, CouplingTest};
pub use endstop::{EndstopConfig, EndstopReport, EndstopTest};
pub use error::DiagnosticsError;
pub use link::{Pacing, RunControl, unix_millis};
pub use log::{DiagnosticLog, LogEntry, LogKind};
pub use motion::{MotionConfig, MotionReport, MotionTest};
pub use probe::{FirmwareFamily, FirmwareProbe, ProbeCommand, ProbeConfig, ProbeReport};

use armlink_protocol::{Axis, AxisValues};

/// 逻辑轴对应的关节名
pub const JOINT_NAMES: AxisValues<&str> =
    AxisValues::new("J1 (base)", "J2 (shoulder)", "J3 (elbow)");

/// 固件轴对应的关节名
///
/// `mapping` 为 逻辑轴 → 固件轴；找不到映射时按恒等处理。
pub fn joint_name_for(mapping: &AxisValues<Axis>, firmware: Axis) -> &'static str {
    let logical = mapping
        .iter()
        .find(|(_, fw)| **fw == firmware)
        .map(|(logical, _)| logical)
        .unwrap_or(firmware);
    JOINT_NAMES[logical]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joint_name_follows_mapping() {
        let identity = AxisValues::new(Axis::X, Axis::Y, Axis::Z);
        assert_eq!(joint_name_for(&identity, Axis::Z), "J3 (elbow)");
        let swapped = AxisValues::new(Axis::Y, Axis::X, Axis::Z);
        assert_eq!(joint_name_for(&swapped, Axis::X), "J2 (shoulder)");
        assert_eq!(joint_name_for(&swapped, Axis::Y), "J1 (base)");
    }
}
