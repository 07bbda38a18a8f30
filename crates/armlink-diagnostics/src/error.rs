//! 诊断工具错误类型

use armlink_serial::SerialError;
use thiserror::Error;

/// 诊断工具错误
///
/// 固件错误（`ERROR:` / `error:N`）不是这里的错误：它们被记录在报告中。
/// 只有串口失效和无效参数会中止工具。
#[derive(Error, Debug)]
pub enum DiagnosticsError {
    #[error("Serial error: {0}")]
    Serial(#[from] SerialError),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl DiagnosticsError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        DiagnosticsError::InvalidParameter(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = DiagnosticsError::invalid("step size must be positive");
        assert_eq!(e.to_string(), "Invalid parameter: step size must be positive");
        let e: DiagnosticsError = SerialError::NotOpen.into();
        assert_eq!(e.to_string(), "Serial error: Port not open");
    }
}
