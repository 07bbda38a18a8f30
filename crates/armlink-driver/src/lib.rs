//! # Armlink Driver
//!
//! 机械臂设备驱动：设备生命周期、运动与末端执行器命令、程序执行、示教、状态轮询。
//!
//! - 状态快照（[`ArcSwap`](arc_swap::ArcSwap) 无锁读取）
//! - 状态机（原子状态，Alarm 只能通过 reset 清除）
//! - 事件通道（crossbeam，有界、非阻塞发布）
//! - 后台线程：状态轮询、程序执行
//! - 诊断模式（RAII 守卫，暂停轮询并独占串口）
//!
//! # 使用示例
//!
//! ```rust,no_run
//! use armlink_driver::{DriverConfig, RobotArmDriver};
//! use armlink_protocol::Axis;
//!
//! let driver = RobotArmDriver::new(DriverConfig::default())?;
//! driver.connect()?;
//! driver.jog(Axis::Y, 5.0, 50.0)?;
//! println!("{}", driver.status().position);
//! # Ok::<(), armlink_driver::DriverError>(())
//! ```

mod config;
pub mod diagnostics;
mod driver;
mod error;
pub mod events;
mod grbl_arm;
pub mod program;
mod registry;
pub mod state;
pub mod status;
mod teach;
pub mod traits;
mod workers;


pub use config::{DevicesConfig, DriverConfig, DriverTiming};
pub use diagnostics::DiagnosticSession;
pub use driver::{FirmwareKind, RobotArmDriver};
pub use error::DriverError;
pub use events::{DeviceEvent, EventBus};
pub use grbl_arm::{ArmStatus, Joint};
pub use program::GcodeProgram;
pub use registry::DeviceRegistry;
pub use state::{AtomicDeviceState, DeviceState};
pub use status::{
    DeviceCapabilities, DeviceStatus, EndstopDirection, GripperState, Position, TaughtPosition,
    WorkEnvelope,
};
pub use traits::{DeviceDriver, RobotArm};
