//! # Armlink Serial Transport
//!
//! 串口抽象层：一条物理连接、一个可重入的互斥门，所有命令/响应交换都经过这个门。
//!
//! ## 模块
//!
//! - `system`: 基于 `serialport` 的真实串口链路
//! - `mock`: 脚本化固件（`mock` feature，测试用）
//! - `transport`: 门控的命令/响应交换与分帧

use std::time::Duration;
use thiserror::Error;

pub mod system;
pub mod transport;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use armlink_protocol::Dialect;
pub use system::{SystemConnector, SystemLink, list_ports};
pub use transport::{
    Exchange, Framing, ReadOptions, SerialTransport, TransportGuard, TransportTiming,
};

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockConnector, MockFirmware, MockLink, MockOpenFailure, WireEvent};

/// 串口层统一错误类型
#[derive(Error, Debug)]
pub enum SerialError {
    /// 设备路径不存在 / 没有设备
    #[error("Port unavailable: {0}")]
    PortUnavailable(String),
    /// 设备被其他进程占用
    #[error("Port busy: {0}")]
    PortBusy(String),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    /// 传输未打开
    #[error("Port not open")]
    NotOpen,
    /// 后端（serialport）返回的其他错误
    #[error("Backend error: {0}")]
    Backend(String),
}

impl SerialError {
    /// 是否为打开阶段的致命错误（重试无意义）
    pub fn is_fatal(&self) -> bool {
        matches!(self, SerialError::PortUnavailable(_) | SerialError::NotOpen)
    }
}

/// 可用串口信息
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortInfo {
    pub name: String,
    pub description: String,
}

/// 行缓冲串口链路
///
/// 由真实串口（[`SystemLink`]）或脚本化固件（`MockLink`）实现。
pub trait SerialLink: Send {
    /// 写入全部字节
    fn write_all(&mut self, data: &[u8]) -> Result<(), SerialError>;

    /// 读取一行（不含行尾），超时返回 `Ok(None)`
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, SerialError>;

    /// 丢弃输入缓冲区中已到达的数据
    fn clear_input(&mut self) -> Result<(), SerialError>;

    /// 等待输出缓冲区写出
    fn flush(&mut self) -> Result<(), SerialError> {
        Ok(())
    }

    /// 端口名称（日志用）
    fn name(&self) -> &str;
}

/// 串口打开器
///
/// 驱动通过它打开链路，测试中替换为 [`MockConnector`]。
pub trait SerialConnector: Send + Sync {
    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Box<dyn SerialLink>, SerialError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_error_display() {
        assert_eq!(
            SerialError::PortUnavailable("/dev/ttyUSB9".into()).to_string(),
            "Port unavailable: /dev/ttyUSB9"
        );
        assert_eq!(SerialError::NotOpen.to_string(), "Port not open");
        assert!(SerialError::PortBusy("COM3".into()).to_string().contains("busy"));
        let io = SerialError::from(std::io::Error::other("boom"));
        assert!(io.to_string().starts_with("IO Error"));
    }

    #[test]
    fn test_is_fatal() {
        assert!(SerialError::PortUnavailable(String::new()).is_fatal());
        assert!(!SerialError::PortBusy(String::new()).is_fatal());
        assert!(!SerialError::Backend(String::new()).is_fatal());
    }
}
