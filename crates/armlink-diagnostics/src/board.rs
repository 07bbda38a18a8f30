//! 控制板自检
//!
//! 逐项检查机械臂控制板的基本功能：欢迎语、固件版本、限位状态、
//! 坐标清零、逐轴运动与回零、夹爪、吸盘、电机使能、命令往返延迟和
//! 未知命令的错误处理。每一项得到通过 / 失败 / 跳过三种结果之一。
//!
//! 固件报错不中止自检，只让对应项失败；只有串口失效会中止。

use crate::error::DiagnosticsError;
use crate::link::{Pacing, RunControl, ToolLink, unix_millis};
use crate::log::{LogEntry, LogKind};
use armlink_protocol::{
    ArmCommand, Axis, AxisValues, Dialect, contains_error_marker, is_welcome_banner,
    parse_endstops, parse_linear_move,
};
use armlink_serial::{Framing, SerialError, TransportGuard};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::{Duration, Instant};

/// 消息中保留的响应长度
const PREVIEW: usize = 200;

/// 一定会被固件拒绝的命令
pub const INVALID_COMMAND: &str = "XYZINVALID123";

/// 自检参数
#[derive(Debug, Clone, PartialEq)]
pub struct BoardConfig {
    /// 先读取欢迎语的窗口；`None` = 不检查（连接握手已读走欢迎语）
    pub banner_window: Option<Duration>,
    /// 逐轴运动与回零（会移动机械臂）
    pub move_test: bool,
    /// 夹爪与吸盘
    pub effector_test: bool,
    /// 运动测试角度（度）
    pub test_angle: f64,
    /// 运动测试速度
    pub move_speed: u32,
    /// 延迟测量次数
    pub latency_samples: usize,
    /// 平均延迟上限
    pub latency_limit: Duration,
    /// 两次延迟测量之间
    pub latency_interval: Duration,
    /// 普通命令超时
    pub command_timeout: Duration,
    /// 运动命令超时
    pub move_timeout: Duration,
    /// `step`：开/关动作之间、两次运动之间；`settle`：使能切换之后
    pub pacing: Pacing,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            banner_window: None,
            move_test: false,
            effector_test: true,
            test_angle: 10.0,
            move_speed: 30,
            latency_samples: 5,
            latency_limit: Duration::from_millis(500),
            latency_interval: Duration::from_millis(100),
            command_timeout: Duration::from_secs(2),
            move_timeout: Duration::from_secs(4),
            pacing: Pacing {
                step: Duration::from_millis(500),
                settle: Duration::from_millis(300),
            },
        }
    }
}

/// 单项结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    Skipped,
}

/// 延迟统计（毫秒，保留一位小数）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub values: Vec<f64>,
}

impl LatencyStats {
    /// 由样本计算；没有样本时返回 `None`
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let avg = samples.iter().sum::<f64>() / samples.len() as f64;
        Some(Self {
            avg_ms: round1(avg),
            min_ms: round1(samples.iter().copied().fold(f64::INFINITY, f64::min)),
            max_ms: round1(samples.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
            values: samples.iter().copied().map(round1).collect(),
        })
    }
}

/// 单项检查
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    /// 发送的命令（按发送顺序）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    /// 对应的响应
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responses: Vec<String>,
    /// 运动确认中的固件坐标
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<AxisValues<f64>>,
    /// 限位状态（`true` = 触发）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endstops: Option<AxisValues<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencyStats>,
    pub duration_ms: f64,
}

impl CheckResult {
    fn new(name: impl Into<String>, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
            commands: Vec::new(),
            responses: Vec::new(),
            position: None,
            endstops: None,
            latency: None,
            duration_ms: 0.0,
        }
    }

    fn passed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Passed, message)
    }

    fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Failed, message)
    }

    fn skipped(name: impl Into<String>, reason: &str) -> Self {
        Self::new(name, CheckStatus::Skipped, format!("Skipped ({})", reason))
    }

    fn exchange(mut self, command: &str, response: &str) -> Self {
        self.commands.push(command.to_string());
        self.responses.push(response.to_string());
        self
    }

    fn took(mut self, elapsed: Duration) -> Self {
        self.duration_ms = round1(elapsed.as_secs_f64() * 1000.0);
        self
    }

    pub fn is_passed(&self) -> bool {
        self.status == CheckStatus::Passed
    }
}

/// 自检报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardReport {
    pub timestamp_ms: u64,
    /// 欢迎语原文
    pub firmware_info: Option<String>,
    pub checks: Vec<CheckResult>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// 运行完成且没有失败项
    pub overall_passed: bool,
    pub completed: bool,
    pub error: Option<String>,
    pub duration_secs: f64,
    pub log: Vec<LogEntry>,
}

impl BoardReport {
    fn finalize(&mut self) {
        let count = |status| self.checks.iter().filter(|c| c.status == status).count();
        self.total = self.checks.len();
        self.passed = count(CheckStatus::Passed);
        self.failed = count(CheckStatus::Failed);
        self.skipped = count(CheckStatus::Skipped);
        self.overall_passed = self.completed && self.failed == 0;
    }

    /// 人类可读的汇总
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Board diagnostics: {} ({}/{} passed{})",
            if self.overall_passed { "PASSED" } else { "FAILED" },
            self.passed,
            self.total,
            if self.skipped > 0 {
                format!(", {} skipped", self.skipped)
            } else {
                String::new()
            }
        );
        if let Some(info) = &self.firmware_info {
            let _ = writeln!(out, "Firmware: {}", info);
        }
        for check in &self.checks {
            let tag = match check.status {
                CheckStatus::Passed => "OK",
                CheckStatus::Failed => "FAIL",
                CheckStatus::Skipped => "SKIP",
            };
            let _ = writeln!(out, "[{:<4}] {}: {}", tag, check.name, check.message);
        }
        if let Some(error) = &self.error {
            let _ = writeln!(out, "{}", error);
        }
        out
    }
}

/// 控制板自检
#[derive(Debug, Clone, Default)]
pub struct BoardTest {
    config: BoardConfig,
}

impl BoardTest {
    pub fn new(config: BoardConfig) -> Self {
        Self { config }
    }

    /// 运行全部检查
    ///
    /// 取消时停在当前项之后，报告 `completed = false`。
    ///
    /// # 错误
    ///
    /// 参数无效或串口失效。
    pub fn run(
        &self,
        transport: &mut TransportGuard<'_>,
        control: &RunControl,
    ) -> Result<BoardReport, DiagnosticsError> {
        let cfg = &self.config;
        if cfg.move_test && !cfg.test_angle.is_finite() {
            return Err(DiagnosticsError::invalid("test angle must be finite"));
        }
        if cfg.latency_samples == 0 {
            return Err(DiagnosticsError::invalid("latency samples must be positive"));
        }

        let mut link = ToolLink::new(transport, control, Framing::Dialect(Dialect::Legacy));
        let mut report = BoardReport {
            timestamp_ms: unix_millis(),
            ..Default::default()
        };
        link.log.info("Board diagnostics started");

        let steps = self.steps();
        let total = steps.len() as f64;
        let mut cancelled = false;
        for (i, step) in steps.into_iter().enumerate() {
            if link.cancelled() {
                link.log.warn("Board diagnostics cancelled");
                cancelled = true;
                break;
            }
            let check = self.run_step(&mut link, step, &mut report)?;
            link.log.push(
                LogEntry::new(
                    if check.status == CheckStatus::Failed {
                        LogKind::Warn
                    } else {
                        LogKind::Result
                    },
                    format!("{}: {}", check.name, check.message),
                )
                .pct((i + 1) as f64 / total * 100.0),
            );
            report.checks.push(check);
        }

        report.completed = !cancelled;
        if cancelled {
            report.error = Some("Cancelled by user".to_string());
        }
        report.finalize();
        report.duration_secs = link.log.elapsed_secs();
        link.log.push(
            LogEntry::new(
                LogKind::Info,
                format!(
                    "Board diagnostics finished: {}/{} passed, {} failed",
                    report.passed, report.total, report.failed
                ),
            )
            .pct(100.0),
        );
        report.log = link.into_log().into_entries();
        Ok(report)
    }

    fn steps(&self) -> Vec<Step> {
        let mut steps = Vec::new();
        if let Some(window) = self.config.banner_window {
            steps.push(Step::Banner(window));
        }
        steps.extend([Step::FirmwareVersion, Step::Endstops, Step::Calibration]);
        steps.extend(Axis::ALL.map(Step::AxisMove));
        steps.extend([
            Step::ReturnHome,
            Step::Gripper,
            Step::Sucker,
            Step::EnableDisable,
            Step::Latency,
            Step::ErrorHandling,
        ]);
        steps
    }

    fn run_step(
        &self,
        link: &mut ToolLink<'_, '_>,
        step: Step,
        report: &mut BoardReport,
    ) -> Result<CheckResult, SerialError> {
        let cfg = &self.config;
        match step {
            Step::Banner(window) => {
                let started = Instant::now();
                let text = link.drain(window)?;
                let text = text.trim();
                let check = if is_welcome_banner(text) {
                    report.firmware_info = Some(text.to_string());
                    CheckResult::passed(step.name(), format!("Firmware recognized: {}", preview(text)))
                } else if !text.is_empty() {
                    report.firmware_info = Some(format!("Unknown: {}", preview(text)));
                    CheckResult::failed(step.name(), format!("Unexpected greeting: {}", preview(text)))
                } else {
                    CheckResult::failed(
                        step.name(),
                        "No welcome message (empty buffer), firmware may not be flashed",
                    )
                };
                Ok(check.took(started.elapsed()))
            },
            Step::FirmwareVersion => self.check_firmware_version(link),
            Step::Endstops => self.check_endstops(link),
            Step::Calibration => self.check_calibration(link),
            Step::AxisMove(_) | Step::ReturnHome if !cfg.move_test => {
                Ok(CheckResult::skipped(step.name(), "motion disabled"))
            },
            Step::AxisMove(axis) => {
                let check = self.check_move(
                    link,
                    step.name(),
                    ArmCommand::single_axis_move(axis, cfg.test_angle, cfg.move_speed),
                )?;
                link.pause(cfg.pacing.step);
                Ok(check)
            },
            Step::ReturnHome => self.check_move(
                link,
                step.name(),
                ArmCommand::LinearMove {
                    target: AxisValues::splat(0.0),
                    feed: cfg.move_speed,
                },
            ),
            Step::Gripper | Step::Sucker if !cfg.effector_test => {
                Ok(CheckResult::skipped(step.name(), "effectors disabled"))
            },
            Step::Gripper => self.check_toggle(
                link,
                step.name(),
                [("Close", ArmCommand::GripperClose), ("Open", ArmCommand::GripperOpen)],
                cfg.pacing.step,
            ),
            Step::Sucker => self.check_toggle(
                link,
                step.name(),
                [("On", ArmCommand::SuckerOn), ("Off", ArmCommand::SuckerOff)],
                cfg.pacing.step,
            ),
            Step::EnableDisable => {
                let check = self.check_toggle(
                    link,
                    step.name(),
                    [("Enable", ArmCommand::MotorsOn), ("Disable", ArmCommand::MotorsOff)],
                    cfg.pacing.settle,
                )?;
                // 电机保持使能
                link.pause(cfg.pacing.settle);
                link.send(&ArmCommand::MotorsOn.to_wire(), cfg.command_timeout / 2)?;
                Ok(check)
            },
            Step::Latency => self.check_latency(link),
            Step::ErrorHandling => {
                let (response, elapsed) = link.send_timed(INVALID_COMMAND, cfg.command_timeout)?;
                let check = if contains_error_marker(&response) {
                    CheckResult::passed(step.name(), format!("Error reply: {}", preview(&response)))
                } else if !response.is_empty() {
                    CheckResult::failed(
                        step.name(),
                        format!("No error reported, got: {}", preview(&response)),
                    )
                } else {
                    CheckResult::failed(step.name(), "No reply to an unknown command")
                };
                Ok(check.exchange(INVALID_COMMAND, &response).took(elapsed))
            },
        }
    }

    fn check_firmware_version(&self, link: &mut ToolLink<'_, '_>) -> Result<CheckResult, SerialError> {
        let name = Step::FirmwareVersion.name();
        let (response, elapsed) = link.send_timed("M115", self.config.command_timeout)?;
        // M115 是可选命令，三种情况都算通过
        let message = if response.is_empty() {
            "No reply to M115 (not supported)".to_string()
        } else if contains_error_marker(&response) {
            "M115 not supported (normal for the arm firmware)".to_string()
        } else {
            format!("Reply: {}", preview(&response))
        };
        Ok(CheckResult::passed(name, message)
            .exchange("M115", &response)
            .took(elapsed))
    }

    fn check_endstops(&self, link: &mut ToolLink<'_, '_>) -> Result<CheckResult, SerialError> {
        let name = Step::Endstops.name();
        let command = ArmCommand::QueryEndstops.to_wire();
        let (response, elapsed) = link.send_timed(&command, self.config.command_timeout)?;
        let check = match parse_endstops(&response) {
            Some(flags) => {
                let bit = |b: bool| u8::from(b);
                let mut check = CheckResult::passed(
                    name,
                    format!(
                        "Endstops X={} Y={} Z={} (0 = free, 1 = pressed)",
                        bit(flags.x),
                        bit(flags.y),
                        bit(flags.z)
                    ),
                );
                check.endstops = Some(flags);
                check
            },
            None if !response.is_empty() => {
                CheckResult::failed(name, format!("Unexpected reply: {}", preview(&response)))
            },
            None => CheckResult::failed(name, "No reply to M119"),
        };
        Ok(check.exchange(&command, &response).took(elapsed))
    }

    fn check_calibration(&self, link: &mut ToolLink<'_, '_>) -> Result<CheckResult, SerialError> {
        let name = Step::Calibration.name();
        let command = ArmCommand::ZeroPosition.to_wire();
        let (response, elapsed) = link.send_timed(&command, self.config.command_timeout)?;
        // G92 通常没有回复
        let check = if contains_error_marker(&response) {
            CheckResult::failed(name, format!("Error: {}", preview(&response)))
        } else {
            CheckResult::passed(
                name,
                format!("Position zeroed, reply: '{}'", or_none(&response)),
            )
        };
        Ok(check.exchange(&command, &response).took(elapsed))
    }

    fn check_move(
        &self,
        link: &mut ToolLink<'_, '_>,
        name: String,
        command: ArmCommand,
    ) -> Result<CheckResult, SerialError> {
        let wire = command.to_wire();
        let (response, elapsed) = link.send_timed(&wire, self.config.move_timeout)?;
        let check = match parse_linear_move(&response) {
            Some(position) => {
                let mut check = CheckResult::passed(
                    name,
                    format!(
                        "{} -> X={:.2} Y={:.2} Z={:.2}",
                        wire, position.x, position.y, position.z
                    ),
                );
                check.position = Some(position);
                check
            },
            None if contains_error_marker(&response) => {
                CheckResult::failed(name, format!("Error: {}", preview(&response)))
            },
            None if !response.is_empty() => {
                CheckResult::failed(name, format!("Unexpected reply: {}", preview(&response)))
            },
            None => CheckResult::failed(name, format!("No reply to {}", wire)),
        };
        Ok(check.exchange(&wire, &response).took(elapsed))
    }

    /// 开 / 关两步动作，任一步报错即失败
    fn check_toggle(
        &self,
        link: &mut ToolLink<'_, '_>,
        name: String,
        actions: [(&str, ArmCommand); 2],
        gap: Duration,
    ) -> Result<CheckResult, SerialError> {
        let mut check = CheckResult::passed(name, String::new());
        let mut elapsed = Duration::ZERO;
        let mut parts = Vec::with_capacity(2);
        for (i, (label, command)) in actions.iter().enumerate() {
            if i > 0 {
                link.pause(gap);
            }
            let wire = command.to_wire();
            let (response, took) = link.send_timed(&wire, self.config.command_timeout)?;
            elapsed += took;
            if check.is_passed() && contains_error_marker(&response) {
                check.status = CheckStatus::Failed;
                check.message = format!("Error on {}: {}", wire, preview(&response));
            }
            parts.push(format!("{} ({}): '{}'", label, wire, or_ok(&response)));
            check = check.exchange(&wire, &response);
        }
        if check.is_passed() {
            check.message = parts.join(", ");
        }
        Ok(check.took(elapsed))
    }

    fn check_latency(&self, link: &mut ToolLink<'_, '_>) -> Result<CheckResult, SerialError> {
        let cfg = &self.config;
        let name = Step::Latency.name();
        let command = ArmCommand::QueryEndstops.to_wire();
        let mut samples = Vec::with_capacity(cfg.latency_samples);
        for i in 0..cfg.latency_samples {
            if i > 0 && !link.pause(cfg.latency_interval) {
                break;
            }
            let (response, elapsed) = link.send_timed(&command, cfg.command_timeout)?;
            if !response.is_empty() {
                samples.push(elapsed.as_secs_f64() * 1000.0);
            }
        }

        let Some(stats) = LatencyStats::from_samples(&samples) else {
            return Ok(CheckResult::failed(name, "No replies, latency not measured"));
        };
        let limit_ms = cfg.latency_limit.as_secs_f64() * 1000.0;
        let message = format!(
            "avg {:.1} ms, min {:.1} ms, max {:.1} ms ({} samples)",
            stats.avg_ms,
            stats.min_ms,
            stats.max_ms,
            stats.values.len()
        );
        let mut check = if stats.avg_ms < limit_ms {
            CheckResult::passed(name, message)
        } else {
            CheckResult::failed(name, format!("{} exceeds {:.0} ms", message, limit_ms))
        };
        check.duration_ms = stats.avg_ms;
        check.latency = Some(stats);
        Ok(check)
    }
}

/// 检查项
#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    Banner(Duration),
    FirmwareVersion,
    Endstops,
    Calibration,
    AxisMove(Axis),
    ReturnHome,
    Gripper,
    Sucker,
    EnableDisable,
    Latency,
    ErrorHandling,
}

impl Step {
    fn name(&self) -> String {
        match self {
            Step::Banner(_) => "Welcome message".to_string(),
            Step::FirmwareVersion => "Firmware version (M115)".to_string(),
            Step::Endstops => "Endstop state (M119)".to_string(),
            Step::Calibration => "Calibration (G92)".to_string(),
            Step::AxisMove(axis) => format!("Axis move: {}", crate::JOINT_NAMES[*axis]),
            Step::ReturnHome => "Return home (X0 Y0 Z0)".to_string(),
            Step::Gripper => "Gripper servo".to_string(),
            Step::Sucker => "Sucker relay".to_string(),
            Step::EnableDisable => "Motor enable/disable".to_string(),
            Step::Latency => "Command latency".to_string(),
            Step::ErrorHandling => "Error handling (unknown command)".to_string(),
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW).collect()
}

fn or_none(text: &str) -> &str {
    if text.is_empty() { "none" } else { text }
}

fn or_ok(text: &str) -> &str {
    if text.is_empty() { "ok" } else { text }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use armlink_protocol::WELCOME_BANNER;
    use armlink_serial::SerialTransport;
    use armlink_serial::mock::MockFirmware;

    /// 正常工作的控制板
    fn healthy_board() -> MockFirmware {
        MockFirmware::new(|cmd| {
            if let Some(rest) = cmd.strip_prefix("G1 ") {
                let coords: Vec<&str> = rest.split_whitespace().take(3).collect();
                return vec![format!("INFO: LINEAR MOVE: {} .", coords.join(" "))];
            }
            match cmd {
                "M119" => vec!["INFO: ENDSTOP: [X:0 Y:1 Z:0]".into()],
                "M115" | "XYZINVALID123" => vec!["ERROR: COMMAND NOT RECOGNIZED".into()],
                "G92 X0 Y0 Z0" => vec![],
                _ => vec!["INFO: OK".into()],
            }
        })
    }

    fn config() -> BoardConfig {
        BoardConfig {
            move_test: true,
            latency_interval: Duration::ZERO,
            command_timeout: Duration::from_millis(100),
            move_timeout: Duration::from_millis(100),
            pacing: Pacing::immediate(),
            ..Default::default()
        }
    }

    fn run(fw: &MockFirmware, config: BoardConfig, control: &RunControl) -> BoardReport {
        let transport = SerialTransport::from_link(fw.link(), Dialect::Legacy, Default::default());
        let mut guard = transport.lock();
        BoardTest::new(config).run(&mut guard, control).unwrap()
    }

    fn check<'a>(report: &'a BoardReport, name: &str) -> &'a CheckResult {
        report
            .checks
            .iter()
            .find(|c| c.name == name)
            .unwrap_or_else(|| panic!("missing check {name}"))
    }

    #[test]
    fn test_healthy_board_passes_every_check() {
        let fw = healthy_board();
        let report = run(&fw, config(), &RunControl::new());

        assert!(report.completed);
        assert!(report.overall_passed, "{}", report.summary());
        assert_eq!(report.total, 12);
        assert_eq!((report.passed, report.failed, report.skipped), (12, 0, 0));

        let endstops = check(&report, "Endstop state (M119)");
        assert_eq!(endstops.endstops, Some(AxisValues::new(false, true, false)));
        let elbow = check(&report, "Axis move: J3 (elbow)");
        assert_eq!(elbow.position, Some(AxisValues::new(0.0, 0.0, 10.0)));
        let latency = check(&report, "Command latency").latency.clone().unwrap();
        assert_eq!(latency.values.len(), 5);
        assert!(latency.min_ms <= latency.avg_ms && latency.avg_ms <= latency.max_ms);

        let written = fw.written();
        assert_eq!(
            written[..7],
            [
                "M115",
                "M119",
                "G92 X0 Y0 Z0",
                "G1 X10.00 Y0.00 Z0.00 F30",
                "G1 X0.00 Y10.00 Z0.00 F30",
                "G1 X0.00 Y0.00 Z10.00 F30",
                "G1 X0.00 Y0.00 Z0.00 F30",
            ]
            .map(String::from)
        );
        // 使能测试之后电机重新使能
        let motors: Vec<&String> = written
            .iter()
            .filter(|c| c.starts_with("M17") || c.starts_with("M84"))
            .collect();
        assert_eq!(motors, ["M17", "M84", "M17"]);
        assert_eq!(written.last().map(String::as_str), Some(INVALID_COMMAND));
    }

    #[test]
    fn test_disabled_sections_are_skipped() {
        let fw = healthy_board();
        let report = run(
            &fw,
            BoardConfig {
                move_test: false,
                effector_test: false,
                ..config()
            },
            &RunControl::new(),
        );

        assert_eq!(report.skipped, 6);
        assert!(report.overall_passed);
        assert_eq!(check(&report, "Gripper servo").message, "Skipped (effectors disabled)");
        let written = fw.written();
        assert!(!written.iter().any(|c| c.starts_with("G1") || c.starts_with("M3") || c == "M10"));
    }

    #[test]
    fn test_firmware_errors_fail_individual_checks() {
        let fw = MockFirmware::new(|cmd| match cmd {
            "M119" => vec!["INFO: BUSY".into()],
            "M10" => vec!["ERROR: RELAY FAULT".into()],
            // 不拒绝未知命令
            "XYZINVALID123" => vec!["INFO: OK".into()],
            _ => vec![],
        });
        let report = run(&fw, config(), &RunControl::new());

        assert!(report.completed);
        assert!(!report.overall_passed);
        let status = |name| check(&report, name).status;
        assert_eq!(status("Endstop state (M119)"), CheckStatus::Failed);
        assert_eq!(status("Sucker relay"), CheckStatus::Failed);
        assert_eq!(status("Gripper servo"), CheckStatus::Passed);
        assert_eq!(status("Axis move: J1 (base)"), CheckStatus::Failed);
        assert_eq!(status("Error handling (unknown command)"), CheckStatus::Failed);
        assert!(check(&report, "Sucker relay").message.contains("RELAY FAULT"));
        // 延迟只统计有回复的 M119
        assert_eq!(
            check(&report, "Command latency").latency.as_ref().map(|l| l.values.len()),
            Some(5)
        );
        assert!(report.summary().contains("[FAIL] Sucker relay"));
    }

    #[test]
    fn test_silent_board_has_no_latency() {
        let fw = MockFirmware::new(|_| vec![]);
        let config = BoardConfig {
            latency_samples: 2,
            ..config()
        };
        let report = run(&fw, config, &RunControl::new());
        let latency = check(&report, "Command latency");
        assert_eq!(latency.status, CheckStatus::Failed);
        assert!(latency.latency.is_none());
        // M115 缺失不算失败
        assert!(check(&report, "Firmware version (M115)").is_passed());
    }

    #[test]
    fn test_banner_check() {
        let fw = healthy_board().with_banner(WELCOME_BANNER);
        let report = run(
            &fw,
            BoardConfig {
                banner_window: Some(Duration::from_millis(50)),
                ..config()
            },
            &RunControl::new(),
        );
        assert!(check(&report, "Welcome message").is_passed());
        assert_eq!(report.firmware_info.as_deref(), Some(WELCOME_BANNER));
        assert_eq!(report.checks[0].name, "Welcome message");

        let fw = healthy_board();
        let report = run(
            &fw,
            BoardConfig {
                banner_window: Some(Duration::from_millis(20)),
                ..config()
            },
            &RunControl::new(),
        );
        assert_eq!(check(&report, "Welcome message").status, CheckStatus::Failed);
        assert!(report.firmware_info.is_none());
    }

    #[test]
    fn test_cancelled_before_start() {
        let fw = healthy_board();
        let control = RunControl::new();
        control.cancel();
        let report = run(&fw, config(), &control);

        assert!(!report.completed);
        assert!(!report.overall_passed);
        assert!(report.checks.is_empty());
        assert!(fw.written().is_empty());
        assert_eq!(report.error.as_deref(), Some("Cancelled by user"));
    }

    #[test]
    fn test_invalid_parameters() {
        let fw = healthy_board();
        let transport = SerialTransport::from_link(fw.link(), Dialect::Legacy, Default::default());
        let mut guard = transport.lock();
        let err = BoardTest::new(BoardConfig {
            latency_samples: 0,
            ..config()
        })
        .run(&mut guard, &RunControl::new())
        .unwrap_err();
        assert!(matches!(err, DiagnosticsError::InvalidParameter(_)));
    }

    #[test]
    fn test_latency_stats() {
        let stats = LatencyStats::from_samples(&[10.04, 20.0, 30.06]).unwrap();
        assert_eq!((stats.min_ms, stats.max_ms), (10.0, 30.1));
        assert_eq!(stats.avg_ms, 20.0);
        assert!(LatencyStats::from_samples(&[]).is_none());
    }

    #[test]
    fn test_report_json_uses_snake_case_status() {
        let report = BoardReport {
            checks: vec![CheckResult::skipped("Gripper servo", "effectors disabled")],
            ..Default::default()
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"status\":\"skipped\""));
        assert!(!json.contains("\"position\""));
    }
}
