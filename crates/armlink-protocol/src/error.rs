//! 协议层错误类型定义

use thiserror::Error;

/// 协议编解码错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// 未知轴字母
    #[error("Invalid axis letter: {0:?}")]
    InvalidAxis(char),

    /// 未知轴名称
    #[error("Invalid axis name: {0:?}")]
    InvalidAxisName(String),

    /// 数值字段无法解析
    #[error("Malformed number in field {field}: {value:?}")]
    MalformedNumber { field: &'static str, value: String },

    /// 响应行格式不符合预期
    #[error("Unexpected response: {0:?}")]
    UnexpectedResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        assert_eq!(
            ProtocolError::InvalidAxis('Q').to_string(),
            "Invalid axis letter: 'Q'"
        );
        let msg = ProtocolError::MalformedNumber {
            field: "MPos",
            value: "1.2.3".to_string(),
        }
        .to_string();
        assert!(msg.contains("MPos") && msg.contains("1.2.3"));
        assert!(
            ProtocolError::UnexpectedResponse("garbage".into())
                .to_string()
                .starts_with("Unexpected response")
        );
    }
}
