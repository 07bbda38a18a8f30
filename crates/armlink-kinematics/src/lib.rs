//! # Armlink Kinematics
//!
//! 机械臂几何计算（无 I/O）
//!
//! ## 模块
//!
//! - `kinematics`: 三关节正/逆运动学
//! - `path`: 笛卡尔直线插补
//! - `transform`: 逻辑轴 ↔ 固件轴变换（映射、反向、缩放、软限位）

pub mod error;
pub mod kinematics;
pub mod path;
pub mod transform;

pub use error::{KinematicsError, TransformError};
pub use kinematics::{
    CartesianPosition, JointAngles, RobotConfig, Unreachable, elbow_position, forward_kinematics,
    inverse_kinematics,
};
pub use path::LinearPath;
pub use transform::{AxisLimit, AxisTransform, AxisTransformConfig};
