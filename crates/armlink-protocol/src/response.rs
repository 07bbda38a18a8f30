//! Legacy 固件响应解析
//!
//! 响应是一行或多行文本，关键行格式：
//!
//! ```text
//! INFO: LINEAR MOVE: X10.00 Y0.00 Z0.00 .
//! INFO: ENDSTOP: [X:0 Y:1 Z:0]
//! ERROR: COMMAND NOT RECOGNIZED
//! ```

use crate::axis::AxisValues;
use crate::framing::is_error_line;
use regex::Regex;
use std::sync::LazyLock;

/// 固件上电欢迎语
pub const WELCOME_BANNER: &str = "Connected, please calibrate the mechanical coordinates";

/// 不支持命令的错误标记
pub const NOT_RECOGNIZED: &str = "COMMAND NOT RECOGNIZED";

static MOVE_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"INFO:\s*LINEAR\s*MOVE:\s*X(-?\d+\.?\d*)\s*Y(-?\d+\.?\d*)\s*Z(-?\d+\.?\d*)").ok()
});

static ENDSTOP_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"INFO:\s*ENDSTOP:\s*\[X:(\d+)\s*Y:(\d+)\s*Z:(\d+)\]").ok()
});

static ERROR_MARKER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)ERROR|COMMAND NOT RECOGNIZED").ok()
});

/// 解析直线运动响应中的固件坐标
///
/// 行尾的标点被忽略。数值无法解析时返回 `None`。
pub fn parse_linear_move(response: &str) -> Option<AxisValues<f64>> {
    let caps = MOVE_PATTERN.as_ref()?.captures(response)?;
    let x = caps.get(1)?.as_str().parse().ok()?;
    let y = caps.get(2)?.as_str().parse().ok()?;
    let z = caps.get(3)?.as_str().parse().ok()?;
    Some(AxisValues::new(x, y, z))
}

/// 解析 `M119` 限位状态（固件轴，`true` = 触发）
pub fn parse_endstops(response: &str) -> Option<AxisValues<bool>> {
    let caps = ENDSTOP_PATTERN.as_ref()?.captures(response)?;
    let flag = |i: usize| caps.get(i).map(|m| m.as_str() == "1");
    Some(AxisValues::new(flag(1)?, flag(2)?, flag(3)?))
}

/// 查找第一条 `ERROR:` 行
pub fn find_error_line(response: &str) -> Option<&str> {
    response
        .lines()
        .map(str::trim)
        .find(|line| is_error_line(line))
}

/// 是否为“不支持的命令”错误
pub fn is_not_recognized(response: &str) -> bool {
    response.to_ascii_uppercase().contains(NOT_RECOGNIZED)
}

/// 宽松错误判定：文本中任意位置出现 `ERROR` 或 `COMMAND NOT RECOGNIZED`
///
/// 诊断工具使用这一判定（它们直接面对未知固件）。
pub fn contains_error_marker(response: &str) -> bool {
    ERROR_MARKER
        .as_ref()
        .is_some_and(|re| re.is_match(response))
}

/// 是否包含机械臂固件的欢迎语
pub fn is_welcome_banner(text: &str) -> bool {
    text.contains(WELCOME_BANNER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_linear_move_ignores_trailing_punctuation() {
        let pos = parse_linear_move("INFO: LINEAR MOVE: X10.00 Y0.00 Z0.00 .").unwrap();
        assert_eq!(pos, AxisValues::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn test_parse_linear_move_negative_and_integer() {
        let pos = parse_linear_move("noise\nINFO:LINEAR MOVE:X-12.5Y3Z-0.25\n").unwrap();
        assert_eq!(pos, AxisValues::new(-12.5, 3.0, -0.25));
    }

    #[test]
    fn test_parse_linear_move_missing() {
        assert!(parse_linear_move("INFO: ENDSTOP: [X:0 Y:0 Z:0]").is_none());
        assert!(parse_linear_move("").is_none());
    }

    #[test]
    fn test_parse_endstops() {
        let e = parse_endstops("INFO: ENDSTOP: [X:0 Y:1 Z:0]").unwrap();
        assert_eq!(e, AxisValues::new(false, true, false));
        assert!(parse_endstops("INFO: ENDSTOP: X:0").is_none());
    }

    #[test]
    fn test_find_error_line_multiline() {
        let text = "INFO: something\nERROR: LIMIT EXCEEDED";
        assert_eq!(find_error_line(text), Some("ERROR: LIMIT EXCEEDED"));
        assert_eq!(find_error_line("INFO: LINEAR MOVE: X1 Y2 Z3"), None);
    }

    #[test]
    fn test_not_recognized() {
        assert!(is_not_recognized("ERROR: COMMAND NOT RECOGNIZED"));
        assert!(is_not_recognized("error: command not recognized"));
        assert!(!is_not_recognized("ERROR: LIMIT EXCEEDED"));
    }

    #[test]
    fn test_error_marker_is_loose() {
        assert!(contains_error_marker("something error happened"));
        assert!(contains_error_marker("ERROR: x"));
        assert!(!contains_error_marker("INFO: ENDSTOP: [X:0 Y:0 Z:0]"));
    }

    #[test]
    fn test_welcome_banner() {
        assert!(is_welcome_banner(
            "\r\nConnected, please calibrate the mechanical coordinates\r\n"
        ));
        assert!(!is_welcome_banner("Grbl 1.1h ['$' for help]"));
    }

    proptest::proptest! {
        #[test]
        fn prop_parsers_accept_any_text(text in "\\PC{0,80}") {
            let _ = parse_linear_move(&text);
            let _ = parse_endstops(&text);
            let _ = find_error_line(&text);
            let _ = contains_error_marker(&text);
        }

        #[test]
        fn prop_linear_move_reads_echoed_target(
            x in -500.0..500.0f64,
            y in -500.0..500.0f64,
            z in -500.0..500.0f64,
        ) {
            let line = format!("INFO: LINEAR MOVE: X{:.2} Y{:.2} Z{:.2} .", x, y, z);
            let pos = parse_linear_move(&line).unwrap();
            for (got, want) in [(pos.x, x), (pos.y, y), (pos.z, z)] {
                proptest::prop_assert!((got - want).abs() <= 0.005 + 1e-9);
            }
        }
    }
}
