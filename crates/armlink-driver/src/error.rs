//! 驱动层错误类型定义

use armlink_kinematics::{KinematicsError, TransformError};
use armlink_protocol::{Dialect, ProtocolError};
use armlink_serial::SerialError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 串口错误
    #[error("Serial error: {0}")]
    Serial(#[from] SerialError),

    /// 协议解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 轴变换配置错误
    #[error("Transform config error: {0}")]
    Transform(#[from] TransformError),

    /// 机械结构参数错误
    #[error("Kinematics config error: {0}")]
    Kinematics(#[from] KinematicsError),

    /// 设备未连接
    #[error("Device not connected")]
    NotConnected,

    /// 需要响应的命令没有收到任何数据
    #[error("Operation timeout")]
    Timeout,

    /// 固件返回错误行
    #[error("Firmware error: {0}")]
    FirmwareError(String),

    /// 目标位置不可达（逆运动学失败）
    #[error("Unreachable target: {0}")]
    Unreachable(String),

    /// 没有加载程序
    #[error("No program loaded")]
    NoProgram,

    /// 当前方言不支持该操作
    #[error("Operation requires the {required} dialect (configured: {actual})")]
    UnsupportedDialect { required: Dialect, actual: Dialect },

    /// 已有诊断会话在进行
    #[error("A diagnostic session is already active")]
    DiagnosticsBusy,

    /// 设备处于报警状态（需要先 reset）
    #[error("Device in alarm state: {0}")]
    InAlarm(String),

    /// 无效输入
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 文件读写错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 配置文件错误
    #[error("Config error: {0}")]
    Config(String),
}

impl DriverError {
    /// 是否为致命错误（连接已失效，需要重新连接）
    pub fn is_fatal(&self) -> bool {
        match self {
            DriverError::Serial(e) => e.is_fatal() || matches!(e, SerialError::Io(_)),
            DriverError::NotConnected => true,
            _ => false,
        }
    }

    /// 是否值得原样重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DriverError::Timeout
                | DriverError::DiagnosticsBusy
                | DriverError::Serial(SerialError::PortBusy(_))
        )
    }
}
