//! GRBL 1.1 方言
//!
//! 机械臂 GRBL 固件把关节映射到轴字母：X = J2（肩），Y = J3（肘），Z = J1（底座）。
//!
//! 状态报告格式（`|` 或 `,` 分隔均接受）：
//!
//! ```text
//! <Idle|MPos:0.000,0.000,0.000|WPos:0.000,0.000,0.000|FS:0,0>
//! ```

use crate::axis::{Axis, AxisValues};
use crate::error::ProtocolError;
use crate::framing::{split_lines, starts_with_ignore_case};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

/// 实时状态查询
pub const STATUS_QUERY: u8 = b'?';
/// 进给保持（暂停）
pub const FEED_HOLD: u8 = b'!';
/// 循环启动（继续）
pub const CYCLE_START: u8 = b'~';
/// 软复位（Ctrl-X）
pub const SOFT_RESET: u8 = 0x18;
/// 取消 Jog
pub const JOG_CANCEL: u8 = 0x85;

/// 解除报警锁定
pub const UNLOCK: &str = "$X";
/// 回零循环
pub const HOME: &str = "$H";
/// 读取全部设置
pub const SETTINGS_DUMP: &str = "$$";

static STATUS_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(concat!(
        r"<(\w+)(?::\d+)?[|,]",
        r"MPos:(-?\d+\.?\d*),(-?\d+\.?\d*),(-?\d+\.?\d*)",
        r"(?:[|,]WPos:(-?\d+\.?\d*),(-?\d+\.?\d*),(-?\d+\.?\d*))?",
        r"(?:[|,].*?)?>",
    ))
    .ok()
});

static SETTING_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\$(\d+)=(.+)$").ok());

/// GRBL 机器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GrblState {
    Idle,
    Run,
    Hold,
    Jog,
    Alarm,
    Door,
    Check,
    Home,
    Sleep,
}

impl GrblState {
    /// 从报告中的状态名解析，未知名称视为 `Idle`
    pub fn from_name(name: &str) -> Self {
        match name {
            "Run" => GrblState::Run,
            "Hold" => GrblState::Hold,
            "Jog" => GrblState::Jog,
            "Alarm" => GrblState::Alarm,
            "Door" => GrblState::Door,
            "Check" => GrblState::Check,
            "Home" => GrblState::Home,
            "Sleep" => GrblState::Sleep,
            _ => GrblState::Idle,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            GrblState::Idle => "Idle",
            GrblState::Run => "Run",
            GrblState::Hold => "Hold",
            GrblState::Jog => "Jog",
            GrblState::Alarm => "Alarm",
            GrblState::Door => "Door",
            GrblState::Check => "Check",
            GrblState::Home => "Home",
            GrblState::Sleep => "Sleep",
        }
    }
}

impl fmt::Display for GrblState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `?` 查询返回的状态报告
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GrblStatusReport {
    pub state: GrblState,
    /// 机器坐标（MPos）
    pub machine_position: AxisValues<f64>,
    /// 工件坐标（WPos），固件未报告时为 `None`
    pub work_position: Option<AxisValues<f64>>,
}

/// 在响应文本中查找并解析状态报告
///
/// 找不到 `<...>` 报告时返回 `Ok(None)`；报告存在但数值损坏时返回错误。
pub fn parse_status(response: &str) -> Result<Option<GrblStatusReport>, ProtocolError> {
    let Some(caps) = STATUS_PATTERN.as_ref().and_then(|re| re.captures(response)) else {
        return Ok(None);
    };

    let number = |i: usize, field: &'static str| -> Result<f64, ProtocolError> {
        let raw = caps.get(i).map(|m| m.as_str()).unwrap_or_default();
        raw.parse().map_err(|_| ProtocolError::MalformedNumber {
            field,
            value: raw.to_string(),
        })
    };

    let state = GrblState::from_name(caps.get(1).map(|m| m.as_str()).unwrap_or_default());
    let machine_position =
        AxisValues::new(number(2, "MPos")?, number(3, "MPos")?, number(4, "MPos")?);
    let work_position = if caps.get(5).is_some() {
        Some(AxisValues::new(
            number(5, "WPos")?,
            number(6, "WPos")?,
            number(7, "WPos")?,
        ))
    } else {
        None
    };

    Ok(Some(GrblStatusReport {
        state,
        machine_position,
        work_position,
    }))
}

/// 错误码说明
pub fn error_message(code: u32) -> String {
    let text = match code {
        1 => "G-code word consists of a G followed by a value",
        2 => "Numeric value format is not valid",
        3 => "Grbl '$' system command was not recognized",
        9 => "G-code locked out during alarm or jog state",
        20 => "Soft limit exceeded",
        22 => "Homing fail - axis not moving",
        23 => "Homing fail - limits engaged",
        24 => "Homing fail - cycle failed",
        other => return format!("Unknown error {other}"),
    };
    text.to_string()
}

/// 报警码说明
pub fn alarm_message(code: u32) -> String {
    let text = match code {
        1 => "Hard limit triggered",
        2 => "Soft limit exceeded",
        3 => "Reset while in motion",
        4 => "Probe fail - contact not made",
        5 => "Probe fail - initial state",
        6 => "Homing fail - cycle reset",
        7 => "Homing fail - door opened",
        8 => "Homing fail - limits not found",
        9 => "Homing fail - limits not cleared",
        other => return format!("Unknown alarm {other}"),
    };
    text.to_string()
}

fn code_after_prefix(line: &str, prefix: &str) -> Option<u32> {
    let line = line.trim();
    if !starts_with_ignore_case(line, prefix) {
        return None;
    }
    line[prefix.len()..].trim().parse().ok()
}

/// 在响应中查找 `error:N`
pub fn find_error_code(response: &str) -> Option<u32> {
    response
        .lines()
        .find_map(|line| code_after_prefix(line, "error:"))
}

/// 在响应中查找 `ALARM:N`
pub fn find_alarm_code(response: &str) -> Option<u32> {
    response
        .lines()
        .find_map(|line| code_after_prefix(line, "ALARM:"))
}

/// 响应是否以 `ok` 结束
pub fn is_ok(response: &str) -> bool {
    split_lines(response)
        .iter()
        .any(|line| line.eq_ignore_ascii_case("ok"))
}

/// 构建 `$J=` jog 命令（相对运动）
pub fn jog_command(axis: Axis, distance: f64, feed: f64) -> String {
    format!("$J=G91 {}{:.3} F{:.0}", axis.letter(), distance, feed)
}

/// `$$` 返回的设置表
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GrblSettings {
    values: BTreeMap<u32, String>,
}

impl GrblSettings {
    /// 解析 `$N=value` 行，忽略其他行
    pub fn parse(response: &str) -> Self {
        let mut values = BTreeMap::new();
        let Some(re) = SETTING_PATTERN.as_ref() else {
            return Self { values };
        };
        for line in split_lines(response) {
            if let Some(caps) = re.captures(line)
                && let (Some(id), Some(value)) = (caps.get(1), caps.get(2))
                && let Ok(id) = id.as_str().parse::<u32>()
            {
                values.insert(id, value.as_str().trim().to_string());
            }
        }
        Self { values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 原始文本值
    pub fn raw(&self, id: u32) -> Option<&str> {
        self.values.get(&id).map(String::as_str)
    }

    /// 数值设置，缺失或无法解析时返回默认值
    pub fn number(&self, id: u32, default: f64) -> f64 {
        self.raw(id)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// 各轴每毫米步数（$100-$102）
    pub fn steps_per_mm(&self) -> AxisValues<f64> {
        AxisValues::new(
            self.number(100, 250.0),
            self.number(101, 250.0),
            self.number(102, 250.0),
        )
    }

    /// 各轴最大速率 mm/min（$110-$112）
    pub fn max_rate(&self) -> AxisValues<f64> {
        AxisValues::new(
            self.number(110, 500.0),
            self.number(111, 500.0),
            self.number(112, 500.0),
        )
    }

    /// 各轴最大行程 mm（$130-$132）
    pub fn max_travel(&self) -> AxisValues<f64> {
        AxisValues::new(
            self.number(130, 200.0),
            self.number(131, 200.0),
            self.number(132, 200.0),
        )
    }

    /// 激光模式（$32）
    pub fn laser_mode(&self) -> bool {
        self.raw(32) == Some("1")
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.values.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_pipe_separated() {
        let report = parse_status("<Idle|MPos:1.000,-2.500,3.250|FS:0,0>")
            .unwrap()
            .unwrap();
        assert_eq!(report.state, GrblState::Idle);
        assert_eq!(report.machine_position, AxisValues::new(1.0, -2.5, 3.25));
        assert!(report.work_position.is_none());
    }

    #[test]
    fn test_parse_status_with_wpos_and_comma() {
        let report = parse_status("ok\n<Run,MPos:10.0,20.0,30.0,WPos:1.0,2.0,3.0>")
            .unwrap()
            .unwrap();
        assert_eq!(report.state, GrblState::Run);
        assert_eq!(report.work_position, Some(AxisValues::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn test_parse_status_hold_substate_and_unknown_state() {
        let report = parse_status("<Hold:0|MPos:0.000,0.000,0.000|FS:0,0>")
            .unwrap()
            .unwrap();
        assert_eq!(report.state, GrblState::Hold);

        let report = parse_status("<Weird|MPos:0,0,0>").unwrap().unwrap();
        assert_eq!(report.state, GrblState::Idle);
    }

    #[test]
    fn test_parse_status_absent() {
        assert_eq!(parse_status("ok").unwrap(), None);
        assert_eq!(parse_status("").unwrap(), None);
    }

    #[test]
    fn test_error_and_alarm_tables() {
        assert_eq!(error_message(20), "Soft limit exceeded");
        assert_eq!(error_message(3), "Grbl '$' system command was not recognized");
        assert_eq!(error_message(99), "Unknown error 99");
        assert_eq!(alarm_message(1), "Hard limit triggered");
        assert_eq!(alarm_message(9), "Homing fail - limits not cleared");
    }

    #[test]
    fn test_find_codes() {
        assert_eq!(find_error_code("error:20"), Some(20));
        assert_eq!(find_error_code("noise\r\nERROR:9\r\n"), Some(9));
        assert_eq!(find_error_code("ok"), None);
        assert_eq!(find_alarm_code("ALARM:1"), Some(1));
        assert!(is_ok("$J=...\nok\n"));
        assert!(!is_ok("error:1"));
    }

    #[test]
    fn test_jog_command_format() {
        assert_eq!(jog_command(Axis::Z, 1.5, 300.0), "$J=G91 Z1.500 F300");
        assert_eq!(jog_command(Axis::X, -0.25, 99.6), "$J=G91 X-0.250 F100");
    }

    #[test]
    fn test_settings_parse_and_defaults() {
        let settings = GrblSettings::parse("$100=80.000\r\n$110=1200\n$32=1\nok\n");
        assert_eq!(settings.len(), 3);
        assert_eq!(settings.steps_per_mm(), AxisValues::new(80.0, 250.0, 250.0));
        assert_eq!(settings.max_rate().x, 1200.0);
        assert_eq!(settings.max_travel(), AxisValues::splat(200.0));
        assert!(settings.laser_mode());

        let empty = GrblSettings::parse("ok");
        assert!(empty.is_empty());
        assert!(!empty.laser_mode());
        assert_eq!(empty.max_rate(), AxisValues::splat(500.0));
    }
}
