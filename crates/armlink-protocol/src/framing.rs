//! 响应分帧
//!
//! 协议没有请求 ID，一条命令的响应以“终止行”结束：
//!
//! - **Legacy**（机械臂自研固件）：以 `INFO:` 或 `ERROR:` 开头的行
//! - **Grbl**：`ok`、`error:N` 或 `ALARM:N`

use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

/// 写入时追加的行终止符
pub const LINE_TERMINATOR: &str = "\r\n";

/// 固件方言
///
/// 同一物理串口上只会启用一种方言。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Dialect {
    /// 直接轴字母方言（`G1 X Y Z F`，响应 `INFO: LINEAR MOVE`）
    #[default]
    Legacy,
    /// GRBL 1.1 方言（关节映射 X=J2, Y=J3, Z=J1）
    Grbl,
}

impl Dialect {
    /// 判断一行是否结束当前响应
    pub fn is_terminal_line(self, line: &str) -> bool {
        let line = line.trim();
        match self {
            Dialect::Legacy => starts_with_ignore_case(line, "INFO:") || is_error_line(line),
            Dialect::Grbl => {
                line.eq_ignore_ascii_case("ok")
                    || starts_with_ignore_case(line, "error:")
                    || starts_with_ignore_case(line, "ALARM:")
            },
        }
    }

    /// 方言名称（用于日志和配置）
    pub const fn name(self) -> &'static str {
        match self {
            Dialect::Legacy => "legacy",
            Dialect::Grbl => "grbl",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(Dialect::Legacy),
            "grbl" => Ok(Dialect::Grbl),
            other => Err(format!("unknown dialect: {other}")),
        }
    }
}

/// Legacy 错误行（`ERROR:` 开头，大小写不敏感）
pub fn is_error_line(line: &str) -> bool {
    starts_with_ignore_case(line.trim(), "ERROR:")
}

pub(crate) fn starts_with_ignore_case(line: &str, prefix: &str) -> bool {
    line.len() >= prefix.len()
        && line.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// 拆分响应为去除首尾空白的非空行
///
/// 绝大多数响应只有一两行，放在栈上即可。
pub fn split_lines(text: &str) -> SmallVec<[&str; 4]> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// 追加行终止符
pub fn frame_line(command: &str) -> String {
    let mut out = String::with_capacity(command.len() + LINE_TERMINATOR.len());
    out.push_str(command.trim());
    out.push_str(LINE_TERMINATOR);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_terminal_lines() {
        let d = Dialect::Legacy;
        assert!(d.is_terminal_line("INFO: LINEAR MOVE: X10.00 Y0.00 Z0.00 ."));
        assert!(d.is_terminal_line("info: endstop: [X:0 Y:0 Z:0]"));
        assert!(d.is_terminal_line("ERROR: COMMAND NOT RECOGNIZED"));
        assert!(!d.is_terminal_line("ok"));
        assert!(!d.is_terminal_line("Connected, please calibrate the mechanical coordinates"));
    }

    #[test]
    fn test_grbl_terminal_lines() {
        let d = Dialect::Grbl;
        assert!(d.is_terminal_line("ok"));
        assert!(d.is_terminal_line("OK "));
        assert!(d.is_terminal_line("error:20"));
        assert!(d.is_terminal_line("ALARM:1"));
        assert!(!d.is_terminal_line("$100=250.000"));
        assert!(!d.is_terminal_line("<Idle|MPos:0.000,0.000,0.000|FS:0,0>"));
        assert!(!d.is_terminal_line("INFO: LINEAR MOVE: X1 Y2 Z3"));
    }

    #[test]
    fn test_frame_line_appends_crlf_once() {
        assert_eq!(frame_line("G92 X0 Y0 Z0"), "G92 X0 Y0 Z0\r\n");
        assert_eq!(frame_line("  M119 \n"), "M119\r\n");
    }

    #[test]
    fn test_split_lines_skips_blank() {
        let lines = split_lines("\r\nINFO: a\r\n\r\n  ERROR: b \n");
        assert_eq!(lines.as_slice(), &["INFO: a", "ERROR: b"]);
        assert!(split_lines("").is_empty());
    }

    #[test]
    fn test_dialect_parse() {
        assert_eq!("GRBL".parse::<Dialect>().unwrap(), Dialect::Grbl);
        assert_eq!("legacy".parse::<Dialect>().unwrap(), Dialect::Legacy);
        assert!("marlin".parse::<Dialect>().is_err());
    }
}
