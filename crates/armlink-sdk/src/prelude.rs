//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use armlink_sdk::prelude::*;
//! ```

// 驱动层
pub use crate::driver::{
    DeviceDriver, DeviceEvent, DeviceRegistry, DeviceState, DeviceStatus, DriverConfig,
    RobotArm, RobotArmDriver,
};

// 运动学
pub use crate::kinematics::{CartesianPosition, JointAngles, RobotConfig};

// 协议
pub use crate::protocol::{Axis, AxisSet, AxisValues, Dialect};

// 诊断
pub use crate::diagnostics::RunControl;

// 错误类型
pub use crate::diagnostics::DiagnosticsError;
pub use crate::driver::DriverError;
pub use crate::kinematics::{KinematicsError, TransformError};
pub use crate::protocol::ProtocolError;
pub use crate::serial::SerialError;
