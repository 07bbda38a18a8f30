//! 运动学与轴变换错误类型

use armlink_protocol::Axis;
use thiserror::Error;

/// 机械臂几何参数错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KinematicsError {
    /// 连杆长度必须为有限正数
    #[error("Invalid link length {name}: {value} (must be finite and > 0)")]
    InvalidLinkLength { name: &'static str, value: f64 },
}

/// 轴变换配置错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    /// 映射不是 {X,Y,Z} 上的双射（两个逻辑轴映射到同一固件轴）
    #[error("Axis mapping is not a bijection: firmware axis {0} is targeted twice")]
    NotBijective(Axis),

    /// 软限位下界大于上界
    #[error("Invalid limits for axis {axis}: min {min} > max {max}")]
    InvalidLimits { axis: Axis, min: f64, max: f64 },

    /// 缩放系数为非有限值（0 表示 1:1，负数表示反向传动）
    #[error("Invalid scale for axis {axis}: {value}")]
    InvalidScale { axis: Axis, value: f64 },
}
