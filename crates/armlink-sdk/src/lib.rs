//! Armlink SDK - 串口机械臂 Rust SDK
//!
//! 三关节串口机械臂的运动学、轴变换、设备驱动与诊断工具。
//!
//! # 架构设计
//!
//! 从底层到高层：
//!
//! - **协议层** (`protocol`): 线路文本命令与响应解析（Legacy / GRBL 两种方言）
//! - **运动学** (`kinematics`): 正/逆运动学、直线插补、逻辑轴 ↔ 固件轴变换
//! - **串口层** (`serial`): 门控串口传输（一次只有一个交换在线路上）
//! - **驱动层** (`driver`): 设备状态机、状态轮询、程序执行、示教
//! - **诊断** (`diagnostics`): 限位行程、固件探测、速度扫描、耦合标定、控制板自检
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use armlink_sdk::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! armlink_sdk::init_logging("armlink=info");
//! let driver = RobotArmDriver::new(DriverConfig {
//!     port: "/dev/ttyUSB0".into(),
//!     ..Default::default()
//! })?;
//! driver.connect()?;
//! driver.jog(Axis::X, 10.0, 50.0)?;
//! println!("{}", driver.status().position);
//! # Ok(())
//! # }
//! ```

pub mod prelude;

pub use armlink_diagnostics as diagnostics;
pub use armlink_driver as driver;
pub use armlink_kinematics as kinematics;
pub use armlink_protocol as protocol;
pub use armlink_serial as serial;

// 常用类型
pub use armlink_diagnostics::{
    BoardTest, CouplingTest, DiagnosticsError, EndstopTest, FirmwareProbe, MotionTest,
    RunControl,
};
pub use armlink_driver::{
    DeviceDriver, DeviceEvent, DeviceRegistry, DeviceState, DeviceStatus, DevicesConfig,
    DriverConfig, DriverError, RobotArm, RobotArmDriver,
};
pub use armlink_kinematics::{
    AxisTransform, AxisTransformConfig, CartesianPosition, JointAngles, KinematicsError,
    RobotConfig, TransformError, forward_kinematics, inverse_kinematics,
};
pub use armlink_protocol::{Axis, AxisSet, AxisValues, Dialect, ProtocolError};
pub use armlink_serial::{PortInfo, SerialError, SerialTransport, list_ports};

/// 安装 `tracing` 订阅者
///
/// 过滤规则取自 `RUST_LOG`，未设置时使用 `default_directive`（如 `"armlink=info"`）。
///
/// # 返回
///
/// 已有全局订阅者时返回 `false`。
pub fn init_logging(default_directive: &str) -> bool {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).try_init().is_ok()
}
