//! 固件能力探测
//!
//! 依次发送一组查询命令（GRBL `$` 命令、Marlin M 代码、机械臂固件命令），
//! 记录哪些被识别，据此判断固件类型并提取可配置参数。
//! 面对的是未知固件，因此响应以任一方言的终止行结束。

use crate::error::DiagnosticsError;
use crate::link::{Pacing, RunControl, ToolLink, unix_millis};
use crate::log::{LogEntry, LogKind};
use armlink_protocol::{AxisValues, GrblSettings, contains_error_marker};
use armlink_serial::{Framing, TransportGuard};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

/// 响应在报告中保留的最大长度
const RESPONSE_LIMIT: usize = 500;

/// 一条探测命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeCommand {
    pub command: &'static str,
    pub description: &'static str,
    /// 会修改固件设置（写 EEPROM、恢复出厂等）
    pub mutating: bool,
}

const fn query(command: &'static str, description: &'static str) -> ProbeCommand {
    ProbeCommand {
        command,
        description,
        mutating: false,
    }
}

const fn write(command: &'static str, description: &'static str) -> ProbeCommand {
    ProbeCommand {
        command,
        description,
        mutating: true,
    }
}

/// 默认探测命令表
pub const PROBE_COMMANDS: &[ProbeCommand] = &[
    query("$$", "GRBL settings dump"),
    query("$I", "GRBL build info"),
    query("$#", "GRBL coordinate parameters"),
    query("$N", "GRBL startup blocks"),
    query("$G", "GRBL parser state"),
    query("M115", "Firmware version"),
    query("M503", "Stored settings"),
    query("M114", "Current position"),
    query("M92", "Steps per unit"),
    write("M92 X100", "Set X steps per unit"),
    query("M201", "Max acceleration"),
    query("M203", "Max feed rate"),
    query("M204", "Acceleration"),
    query("M205", "Jerk"),
    query("M906", "Stepper driver current"),
    query("M350", "Microstepping"),
    query("M569", "Stepper driver mode"),
    write("M500", "Save settings to EEPROM"),
    write("M501", "Load settings from EEPROM"),
    write("M502", "Restore factory settings"),
    query("$0", "GRBL step pulse time"),
    query("$1", "GRBL step idle delay"),
    query("$2", "GRBL step port invert"),
    query("$3", "GRBL direction port invert"),
    query("$4", "GRBL step enable invert"),
    query("$5", "GRBL limit pins invert"),
    query("$6", "GRBL probe pin invert"),
    query("$10", "GRBL status report mask"),
    query("$11", "GRBL junction deviation"),
    query("$12", "GRBL arc tolerance"),
    query("$13", "GRBL report inches"),
    query("$20", "GRBL soft limits"),
    query("$21", "GRBL hard limits"),
    query("$22", "GRBL homing cycle"),
    query("$23", "GRBL homing direction invert"),
    query("$24", "GRBL homing feed"),
    query("$25", "GRBL homing seek"),
    query("$26", "GRBL homing debounce"),
    query("$27", "GRBL homing pull-off"),
    query("$30", "GRBL max spindle speed"),
    query("$31", "GRBL min spindle speed"),
    query("$32", "GRBL laser mode"),
    query("$100", "GRBL X steps/mm"),
    query("$101", "GRBL Y steps/mm"),
    query("$102", "GRBL Z steps/mm"),
    query("$110", "GRBL X max rate"),
    query("$111", "GRBL Y max rate"),
    query("$112", "GRBL Z max rate"),
    query("$120", "GRBL X acceleration"),
    query("$121", "GRBL Y acceleration"),
    query("$122", "GRBL Z acceleration"),
    query("$130", "GRBL X max travel"),
    query("$131", "GRBL Y max travel"),
    query("$132", "GRBL Z max travel"),
    query("M119", "Endstop state"),
    query("M17", "Enable motors"),
    query("M84", "Disable motors"),
    query("M3 S0", "Servo / gripper"),
    query("M10", "Sucker on"),
    query("M11", "Sucker off"),
    query("G92 X0 Y0 Z0", "Zero position"),
];

static AXIS_TRIPLE: LazyLock<Option<[Regex; 3]>> = LazyLock::new(|| {
    let pattern = |prefix: &str| {
        Regex::new(&format!(
            r"{prefix}.*X\s*([0-9.]+).*Y\s*([0-9.]+).*Z\s*([0-9.]+)"
        ))
        .ok()
    };
    Some([pattern("M92")?, pattern("M201")?, pattern("M203")?])
});

/// 固件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirmwareFamily {
    Grbl,
    Marlin,
    /// 机械臂专用固件（`M119`/`M17`/`M84`/`G92`）
    CustomRobotArm,
    #[default]
    Unknown,
}

impl fmt::Display for FirmwareFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FirmwareFamily::Grbl => "grbl",
            FirmwareFamily::Marlin => "marlin",
            FirmwareFamily::CustomRobotArm => "custom_robot_arm",
            FirmwareFamily::Unknown => "unknown",
        })
    }
}

/// 单条命令的探测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub command: String,
    pub description: String,
    pub response: String,
    /// 有响应且不含错误标记
    pub recognized: bool,
    pub duration_ms: f64,
}

/// 从响应中提取的参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirmwareParams {
    /// GRBL `$N=value`
    pub grbl: BTreeMap<u32, f64>,
    /// Marlin M92
    pub steps_per_unit: Option<AxisValues<f64>>,
    /// Marlin M201
    pub max_acceleration: Option<AxisValues<f64>>,
    /// Marlin M203
    pub max_feedrate: Option<AxisValues<f64>>,
}

impl FirmwareParams {
    pub fn is_empty(&self) -> bool {
        self.grbl.is_empty()
            && self.steps_per_unit.is_none()
            && self.max_acceleration.is_none()
            && self.max_feedrate.is_none()
    }
}

/// 探测报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub timestamp_ms: u64,
    pub firmware: FirmwareFamily,
    pub results: Vec<ProbeResult>,
    pub params: FirmwareParams,
    pub cancelled: bool,
    pub duration_secs: f64,
    pub log: Vec<LogEntry>,
}

impl ProbeReport {
    pub fn recognized(&self) -> impl Iterator<Item = &ProbeResult> {
        self.results.iter().filter(|r| r.recognized)
    }

    pub fn unrecognized(&self) -> impl Iterator<Item = &ProbeResult> {
        self.results.iter().filter(|r| !r.recognized)
    }
}

/// 探测参数
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    pub commands: Vec<ProbeCommand>,
    /// 是否发送会修改固件设置的命令
    pub include_mutating: bool,
    /// 单条命令超时
    pub timeout: Duration,
    pub pacing: Pacing,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            commands: PROBE_COMMANDS.to_vec(),
            include_mutating: false,
            timeout: Duration::from_millis(1500),
            pacing: Pacing {
                step: Duration::from_millis(100),
                settle: Duration::ZERO,
            },
        }
    }
}

/// 固件能力探测
#[derive(Debug, Clone, Default)]
pub struct FirmwareProbe {
    config: ProbeConfig,
}

impl FirmwareProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// 本次运行实际发送的命令
    pub fn commands(&self) -> impl Iterator<Item = &ProbeCommand> {
        self.config
            .commands
            .iter()
            .filter(|c| self.config.include_mutating || !c.mutating)
    }

    /// 运行探测
    ///
    /// # 错误
    ///
    /// 仅在串口失效时返回错误；未识别的命令记录在报告中。
    pub fn run(
        &self,
        transport: &mut TransportGuard<'_>,
        control: &RunControl,
    ) -> Result<ProbeReport, DiagnosticsError> {
        let commands: Vec<&ProbeCommand> = self.commands().collect();
        let mut link = ToolLink::new(transport, control, Framing::Any);
        let mut report = ProbeReport {
            timestamp_ms: unix_millis(),
            ..Default::default()
        };
        link.log
            .info(format!("Firmware probe: {} commands", commands.len()));

        let total = commands.len().max(1) as f64;
        for (i, probe) in commands.iter().enumerate() {
            if link.cancelled() {
                link.log.warn("Firmware probe cancelled");
                report.cancelled = true;
                break;
            }
            link.log.push(
                LogEntry::new(
                    LogKind::Info,
                    format!("Probe: {} ({})", probe.command, probe.description),
                )
                .pct((i + 1) as f64 / total * 100.0),
            );

            let (response, elapsed) = link.send_timed(probe.command, self.config.timeout)?;
            let recognized = !response.is_empty() && !contains_error_marker(&response);
            if recognized {
                link.log.push(LogEntry::new(
                    LogKind::Result,
                    format!("Recognized: {}", probe.command),
                ));
            }
            report.results.push(ProbeResult {
                command: probe.command.to_string(),
                description: probe.description.to_string(),
                response: response.chars().take(RESPONSE_LIMIT).collect(),
                recognized,
                duration_ms: elapsed.as_secs_f64() * 1000.0,
            });
            link.pause(self.config.pacing.step);
        }

        report.firmware = detect_family(&report.results);
        report.params = extract_params(&report.results);
        report.duration_secs = link.log.elapsed_secs();
        link.log.push(
            LogEntry::new(
                LogKind::Info,
                format!(
                    "Probe finished: {}/{} recognized, firmware: {}",
                    report.recognized().count(),
                    report.results.len(),
                    report.firmware
                ),
            )
            .pct(100.0),
        );
        report.log = link.into_log().into_entries();
        Ok(report)
    }
}

/// 根据被识别的命令判断固件类型
pub fn detect_family(results: &[ProbeResult]) -> FirmwareFamily {
    let recognized = |cmd: &str| results.iter().any(|r| r.recognized && r.command == cmd);
    let count = |cmds: &[&str]| cmds.iter().filter(|c| recognized(**c)).count();

    if recognized("$$") || recognized("$0") {
        FirmwareFamily::Grbl
    } else if count(&["M92", "M201", "M203", "M204", "M503"]) >= 2 {
        FirmwareFamily::Marlin
    } else if count(&["M119", "M17", "M84", "G92 X0 Y0 Z0"]) >= 2 {
        FirmwareFamily::CustomRobotArm
    } else {
        FirmwareFamily::Unknown
    }
}

/// 从被识别命令的响应中提取参数
pub fn extract_params(results: &[ProbeResult]) -> FirmwareParams {
    let mut params = FirmwareParams::default();
    for result in results.iter().filter(|r| r.recognized) {
        let settings = GrblSettings::parse(&result.response);
        for (id, value) in settings.iter() {
            if let Ok(v) = value.parse::<f64>() {
                params.grbl.insert(id, v);
            }
        }

        let Some([m92, m201, m203]) = AXIS_TRIPLE.as_ref() else {
            continue;
        };
        for (re, slot) in [
            (m92, &mut params.steps_per_unit),
            (m201, &mut params.max_acceleration),
            (m203, &mut params.max_feedrate),
        ] {
            if let Some(values) = axis_triple(re, &result.response) {
                *slot = Some(values);
            }
        }
    }
    params
}

fn axis_triple(re: &Regex, text: &str) -> Option<AxisValues<f64>> {
    let caps = re.captures(text)?;
    let value = |i: usize| caps.get(i)?.as_str().parse::<f64>().ok();
    Some(AxisValues::new(value(1)?, value(2)?, value(3)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use armlink_protocol::Dialect;
    use armlink_serial::SerialTransport;
    use armlink_serial::mock::MockFirmware;

    fn result(command: &str, response: &str, recognized: bool) -> ProbeResult {
        ProbeResult {
            command: command.into(),
            description: String::new(),
            response: response.into(),
            recognized,
            duration_ms: 0.0,
        }
    }

    fn fast_config() -> ProbeConfig {
        ProbeConfig {
            timeout: Duration::from_millis(100),
            pacing: Pacing::immediate(),
            ..Default::default()
        }
    }

    #[test]
    fn test_detect_family() {
        assert_eq!(
            detect_family(&[result("$0", "$0=10\nok", true)]),
            FirmwareFamily::Grbl
        );
        assert_eq!(
            detect_family(&[result("M92", "", true), result("M503", "", true)]),
            FirmwareFamily::Marlin
        );
        assert_eq!(
            detect_family(&[
                result("M119", "", true),
                result("M17", "", true),
                result("$$", "error:1", false),
            ]),
            FirmwareFamily::CustomRobotArm
        );
        assert_eq!(
            detect_family(&[result("M119", "", true)]),
            FirmwareFamily::Unknown
        );
    }

    #[test]
    fn test_extract_params() {
        let results = [
            result("$$", "$100=250.000\n$110=500\n$32=0\nok", true),
            result("M92", "echo: M92 X80.00 Y80.00 Z400.00", true),
            result("M203", "echo: M203 X300 Y300 Z5", true),
            result("M201", "echo: M201 X1 Y2 Z3", false),
        ];
        let params = extract_params(&results);
        assert_eq!(params.grbl.get(&100), Some(&250.0));
        assert_eq!(params.grbl.get(&32), Some(&0.0));
        assert_eq!(params.steps_per_unit, Some(AxisValues::new(80.0, 80.0, 400.0)));
        assert_eq!(params.max_feedrate, Some(AxisValues::new(300.0, 300.0, 5.0)));
        // 未识别命令的响应被忽略
        assert_eq!(params.max_acceleration, None);
    }

    #[test]
    fn test_probe_robot_arm_firmware() {
        let fw = MockFirmware::new(|cmd| match cmd {
            "M119" => vec!["INFO: ENDSTOP: [X:0 Y:0 Z:0]".into()],
            "M17" | "M84" | "M10" | "M11" | "M3 S0" | "G92 X0 Y0 Z0" => {
                vec![format!("INFO: {cmd}")]
            },
            _ => vec!["ERROR: COMMAND NOT RECOGNIZED".into()],
        });
        let transport = SerialTransport::from_link(fw.link(), Dialect::Legacy, Default::default());
        let mut guard = transport.lock();

        let report = FirmwareProbe::new(fast_config())
            .run(&mut guard, &RunControl::new())
            .unwrap();

        assert_eq!(report.firmware, FirmwareFamily::CustomRobotArm);
        assert_eq!(report.recognized().count(), 7);
        assert!(report.params.is_empty());
        assert!(!report.cancelled);
        // 默认不发送修改设置的命令
        let written = fw.written();
        assert!(!written.iter().any(|c| c == "M502" || c == "M92 X100"));
        assert_eq!(written.len(), report.results.len());
    }

    #[test]
    fn test_probe_grbl_firmware() {
        let fw = MockFirmware::new(|cmd| match cmd {
            "$$" => vec!["$0=10".into(), "$100=250.000".into(), "ok".into()],
            c if c.starts_with('$') => vec!["ok".into()],
            _ => vec!["error:20".into()],
        });
        let transport = SerialTransport::from_link(fw.link(), Dialect::Grbl, Default::default());
        let mut guard = transport.lock();

        let report = FirmwareProbe::new(fast_config())
            .run(&mut guard, &RunControl::new())
            .unwrap();
        assert_eq!(report.firmware, FirmwareFamily::Grbl);
        assert_eq!(report.params.grbl.get(&100), Some(&250.0));
        assert!(report.unrecognized().any(|r| r.command == "M115"));
    }

    #[test]
    fn test_silent_firmware_is_unknown() {
        let fw = MockFirmware::new(|_| Vec::new());
        let transport = SerialTransport::from_link(fw.link(), Dialect::Legacy, Default::default());
        let mut guard = transport.lock();
        let config = ProbeConfig {
            commands: PROBE_COMMANDS[..3].to_vec(),
            timeout: Duration::from_millis(10),
            ..fast_config()
        };

        let report = FirmwareProbe::new(config)
            .run(&mut guard, &RunControl::new())
            .unwrap();
        assert_eq!(report.firmware, FirmwareFamily::Unknown);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.recognized().count(), 0);
    }

    #[test]
    fn test_report_json() {
        let report = ProbeReport {
            firmware: FirmwareFamily::CustomRobotArm,
            ..Default::default()
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"firmware\":\"custom_robot_arm\""));
    }
}
