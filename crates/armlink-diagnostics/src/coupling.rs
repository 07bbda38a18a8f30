//! 轴耦合检测与标定
//!
//! 耦合：逐轴把单个固件轴移动到测试值（其余轴保持 0），检查固件回报的
//! 其他轴坐标是否偏离。偏离超过阈值说明固件内部做了运动学耦合。
//!
//! 标定：把单轴移动到若干固件值，可选地由操作者量出实际角度，
//! 求出 度/固件单位 的比例（即轴变换的 scale）。
//!
//! 工作在固件坐标上，不经过轴变换。

use crate::error::DiagnosticsError;
use crate::link::{Pacing, RunControl, ToolLink, unix_millis};
use crate::log::{LogEntry, LogKind};
use armlink_protocol::{ArmCommand, Axis, AxisValues, Dialect, parse_linear_move};
use armlink_serial::{Framing, SerialError, TransportGuard};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ZERO_TIMEOUT: Duration = Duration::from_millis(1000);

/// 默认耦合测试值（固件单位）
pub const DEFAULT_TEST_VALUES: [f64; 4] = [30.0, 60.0, 100.0, 150.0];

/// 默认标定值（固件单位）
pub const DEFAULT_CALIBRATION_VALUES: [f64; 3] = [50.0, 100.0, 200.0];

/// 偏差超过此值（固件单位）视为耦合
pub const DEVIATION_THRESHOLD: f64 = 0.5;

/// 回报值低于此值时不计算比例
const MIN_REPORTED: f64 = 0.01;

/// 实际角度测量（标定时由操作者提供）
pub trait AngleMeter {
    /// 返回测得的实际角度（度），`None` = 跳过此点
    fn measure(&mut self, axis: Axis, commanded: f64, reported: f64) -> Option<f64>;
}

impl<F> AngleMeter for F
where
    F: FnMut(Axis, f64, f64) -> Option<f64>,
{
    fn measure(&mut self, axis: Axis, commanded: f64, reported: f64) -> Option<f64> {
        self(axis, commanded, reported)
    }
}

/// 耦合/标定参数
#[derive(Debug, Clone, PartialEq)]
pub struct CouplingConfig {
    pub test_values: Vec<f64>,
    pub calibration_values: Vec<f64>,
    pub feed: u32,
    pub threshold: f64,
    pub run_coupling: bool,
    pub run_calibration: bool,
    pub move_timeout: Duration,
    /// `step`：两次测试之间；`settle`：标定回零之后
    pub pacing: Pacing,
}

impl Default for CouplingConfig {
    fn default() -> Self {
        Self {
            test_values: DEFAULT_TEST_VALUES.to_vec(),
            calibration_values: DEFAULT_CALIBRATION_VALUES.to_vec(),
            feed: 30,
            threshold: DEVIATION_THRESHOLD,
            run_coupling: true,
            run_calibration: true,
            move_timeout: Duration::from_secs(15),
            pacing: Pacing {
                step: Duration::from_millis(300),
                settle: Duration::from_millis(500),
            },
        }
    }
}

/// 单轴移动的检查结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleAxisMove {
    pub axis: Axis,
    pub commanded: AxisValues<f64>,
    /// 固件回报（无法解析时为 `None`）
    pub reported: Option<AxisValues<f64>>,
    /// 各轴 |回报 - 命令|；被移动轴的值是自身误差，不计入耦合
    pub deviations: Option<AxisValues<f64>>,
    pub has_coupling: bool,
    pub response_ok: bool,
    pub response: String,
    pub duration_ms: f64,
}

/// 标定点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub axis: Axis,
    pub firmware_value: f64,
    pub reported_value: f64,
    pub physical_degrees: Option<f64>,
    /// physical / reported
    pub scale: Option<f64>,
}

/// 耦合/标定报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CouplingReport {
    pub timestamp_ms: u64,
    pub coupling_moves: Vec<SingleAxisMove>,
    pub coupling_detected: AxisValues<bool>,
    pub coupling_summary: String,
    pub calibration_points: Vec<CalibrationPoint>,
    /// 每轴平均比例（没有测量点的轴为 `None`）
    pub calculated_scales: AxisValues<Option<f64>>,
    pub completed: bool,
    pub error: Option<String>,
    pub duration_secs: f64,
    pub log: Vec<LogEntry>,
}

impl CouplingReport {
    pub fn any_coupling(&self) -> bool {
        self.coupling_detected.iter().any(|(_, &c)| c)
    }
}

/// 比较命令值与回报值
pub fn evaluate_move(
    axis: Axis,
    commanded: AxisValues<f64>,
    reported: AxisValues<f64>,
    threshold: f64,
) -> (AxisValues<f64>, bool) {
    let deviations = commanded.map(|a, c| round3((reported[a] - c).abs()));
    let coupled = Axis::ALL
        .iter()
        .filter(|&&other| other != axis)
        .any(|&other| (reported[other] - commanded[other]).abs() > threshold);
    (deviations, coupled)
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

fn round5(v: f64) -> f64 {
    (v * 100_000.0).round() / 100_000.0
}

/// 耦合检测与标定
#[derive(Debug, Clone, Default)]
pub struct CouplingTest {
    config: CouplingConfig,
}

impl CouplingTest {
    pub fn new(config: CouplingConfig) -> Self {
        Self { config }
    }

    /// 运行测试
    ///
    /// # 参数
    ///
    /// - `meter`: 标定时的实际角度来源；`None` 时只记录固件回报
    ///
    /// # 错误
    ///
    /// 阈值无效或串口失效。
    pub fn run(
        &self,
        transport: &mut TransportGuard<'_>,
        meter: Option<&mut dyn AngleMeter>,
        control: &RunControl,
    ) -> Result<CouplingReport, DiagnosticsError> {
        if !(self.config.threshold.is_finite() && self.config.threshold >= 0.0) {
            return Err(DiagnosticsError::invalid("threshold must be non-negative"));
        }
        let mut link = ToolLink::new(transport, control, Framing::Dialect(Dialect::Legacy));
        let mut report = CouplingReport {
            timestamp_ms: unix_millis(),
            ..Default::default()
        };
        link.log.info("Coupling and calibration test");
        link.send(&ArmCommand::ZeroPosition.to_wire(), ZERO_TIMEOUT)?;
        link.pause(self.config.pacing.step);

        if self.config.run_coupling {
            self.coupling(&mut link, &mut report)?;
        }
        if self.config.run_calibration {
            self.calibration(&mut link, &mut report, meter)?;
        }

        report.completed = !link.cancelled();
        if !report.completed {
            report.error = Some("Cancelled by user".to_string());
        }
        report.duration_secs = link.log.elapsed_secs();
        link.log.push(
            LogEntry::new(
                LogKind::Info,
                format!("Coupling test finished ({:.1} s)", report.duration_secs),
            )
            .pct(100.0),
        );
        report.log = link.into_log().into_entries();
        Ok(report)
    }

    fn move_command(&self, axis: Axis, value: f64) -> String {
        ArmCommand::single_axis_move(axis, value, self.config.feed).to_wire()
    }

    fn return_home(&self, link: &mut ToolLink<'_, '_>) -> Result<bool, SerialError> {
        let home = ArmCommand::LinearMove {
            target: AxisValues::splat(0.0),
            feed: self.config.feed,
        }
        .to_wire();
        let resp = link.send(&home, self.config.move_timeout)?;
        link.pause(self.config.pacing.step);
        Ok(parse_linear_move(&resp).is_some())
    }

    fn test_single_axis(
        &self,
        link: &mut ToolLink<'_, '_>,
        axis: Axis,
        value: f64,
    ) -> Result<SingleAxisMove, SerialError> {
        let commanded = AxisValues::splat(0.0).with(axis, value);
        let (response, elapsed) =
            link.send_timed(&self.move_command(axis, value), self.config.move_timeout)?;
        let reported = parse_linear_move(&response);
        let evaluated = reported.map(|r| evaluate_move(axis, commanded, r, self.config.threshold));
        Ok(SingleAxisMove {
            axis,
            commanded,
            reported,
            deviations: evaluated.map(|(d, _)| d),
            has_coupling: evaluated.is_some_and(|(_, c)| c),
            response_ok: reported.is_some(),
            response: response.chars().take(200).collect(),
            duration_ms: elapsed.as_secs_f64() * 1000.0,
        })
    }

    fn coupling(
        &self,
        link: &mut ToolLink<'_, '_>,
        report: &mut CouplingReport,
    ) -> Result<(), SerialError> {
        let mut detected = AxisValues::splat(false);
        'axes: for axis in Axis::ALL {
            link.log.push(
                LogEntry::new(LogKind::Info, format!("Coupling test: {}", axis)).axis(axis),
            );
            for &value in &self.config.test_values {
                if link.cancelled() {
                    break 'axes;
                }
                self.return_home(link)?;
                let result = self.test_single_axis(link, axis, value)?;
                if let (Some(reported), Some(dev)) = (result.reported, result.deviations) {
                    link.log.push(
                        LogEntry::new(
                            if result.has_coupling {
                                LogKind::Warn
                            } else {
                                LogKind::Result
                            },
                            format!(
                                "{}={:.1} -> X{:.2} Y{:.2} Z{:.2} (max off-axis {:.2})",
                                axis,
                                value,
                                reported.x,
                                reported.y,
                                reported.z,
                                Axis::ALL
                                    .iter()
                                    .filter(|&&a| a != axis)
                                    .map(|&a| dev[a])
                                    .fold(0.0, f64::max)
                            ),
                        )
                        .axis(axis)
                        .value(reported[axis]),
                    );
                    if result.has_coupling {
                        detected[axis] = true;
                    }
                }
                report.coupling_moves.push(result);
            }
        }
        self.return_home(link)?;

        report.coupling_detected = detected;
        let coupled: Vec<String> = detected
            .iter()
            .filter(|(_, c)| **c)
            .map(|(a, _)| a.to_string())
            .collect();
        report.coupling_summary = if coupled.is_empty() {
            "No cross-axis coupling: firmware axes move independently".to_string()
        } else {
            format!(
                "Coupling detected on axis {}: firmware applies built-in kinematic coupling",
                coupled.join(", ")
            )
        };
        link.log.info(report.coupling_summary.clone());
        Ok(())
    }

    fn calibration(
        &self,
        link: &mut ToolLink<'_, '_>,
        report: &mut CouplingReport,
        mut meter: Option<&mut dyn AngleMeter>,
    ) -> Result<(), SerialError> {
        link.log.info("Calibration");
        link.send(&ArmCommand::ZeroPosition.to_wire(), ZERO_TIMEOUT)?;
        link.pause(self.config.pacing.step);

        'axes: for axis in Axis::ALL {
            for &fw_value in &self.config.calibration_values {
                if link.cancelled() {
                    break 'axes;
                }
                self.return_home(link)?;
                link.pause(self.config.pacing.settle);

                let (response, _) = link
                    .send_timed(&self.move_command(axis, fw_value), self.config.move_timeout)?;
                let reported = parse_linear_move(&response);
                let reported_value = reported.map(|r| r[axis]).unwrap_or(0.0);
                let mut point = CalibrationPoint {
                    axis,
                    firmware_value: fw_value,
                    reported_value,
                    physical_degrees: None,
                    scale: None,
                };
                if reported.is_some()
                    && let Some(meter) = meter.as_deref_mut()
                    && let Some(physical) = meter.measure(axis, fw_value, reported_value)
                {
                    point.physical_degrees = Some(physical);
                    if reported_value.abs() > MIN_REPORTED {
                        point.scale = Some(round5(physical / reported_value));
                    }
                }
                link.log.push(
                    LogEntry::new(
                        LogKind::Result,
                        format!("{}={} -> reported {:.2}", axis, fw_value, reported_value),
                    )
                    .axis(axis)
                    .value(reported_value),
                );
                report.calibration_points.push(point);
                link.pause(self.config.pacing.step);
            }
        }
        self.return_home(link)?;

        report.calculated_scales = average_scales(&report.calibration_points);
        for (axis, scale) in report.calculated_scales.iter() {
            if let Some(scale) = scale {
                link.log.push(
                    LogEntry::new(LogKind::Result, format!("{} scale {:.4}", axis, scale))
                        .axis(axis),
                );
            }
        }
        Ok(())
    }
}

/// 每轴比例的平均值
pub fn average_scales(points: &[CalibrationPoint]) -> AxisValues<Option<f64>> {
    AxisValues::splat(()).map(|axis, ()| {
        let scales: Vec<f64> = points
            .iter()
            .filter(|p| p.axis == axis)
            .filter_map(|p| p.scale)
            .collect();
        if scales.is_empty() {
            None
        } else {
            Some(round5(scales.iter().sum::<f64>() / scales.len() as f64))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use armlink_serial::SerialTransport;
    use armlink_serial::mock::MockFirmware;

    fn parse_target(cmd: &str) -> AxisValues<f64> {
        let mut words = cmd.split_whitespace().skip(1);
        AxisValues::splat(()).map(|_, ()| words.next().unwrap()[1..].parse().unwrap())
    }

    /// 固件回报：`coupled` 为真时 X 的移动会带动 Y 偏移 10%；Z 以 2 倍回报
    fn firmware(coupled: bool) -> MockFirmware {
        MockFirmware::new(move |cmd| {
            if cmd.starts_with("G1") {
                let t = parse_target(cmd);
                let y = if coupled { t.y + t.x * 0.1 } else { t.y };
                return vec![format!(
                    "INFO: LINEAR MOVE: X{:.2} Y{:.2} Z{:.2} .",
                    t.x,
                    y,
                    t.z * 2.0
                )];
            }
            vec![format!("INFO: {cmd}")]
        })
    }

    fn fast_config() -> CouplingConfig {
        CouplingConfig {
            test_values: vec![30.0, 60.0],
            calibration_values: vec![50.0, 100.0],
            move_timeout: Duration::from_millis(200),
            pacing: Pacing::immediate(),
            ..Default::default()
        }
    }

    #[test]
    fn test_evaluate_move() {
        let commanded = AxisValues::new(30.0, 0.0, 0.0);
        let (dev, coupled) =
            evaluate_move(Axis::X, commanded, AxisValues::new(29.0, 0.4, 0.0), 0.5);
        assert!(!coupled);
        assert_eq!(dev, AxisValues::new(1.0, 0.4, 0.0));
        let (_, coupled) = evaluate_move(Axis::X, commanded, AxisValues::new(30.0, 0.6, 0.0), 0.5);
        assert!(coupled);
        // 被移动轴自身的误差不算耦合
        let (_, coupled) = evaluate_move(Axis::X, commanded, AxisValues::new(50.0, 0.0, 0.0), 0.5);
        assert!(!coupled);
    }

    #[test]
    fn test_detects_coupled_axis() {
        let fw = firmware(true);
        let transport = SerialTransport::from_link(fw.link(), Dialect::Legacy, Default::default());
        let mut guard = transport.lock();
        let config = CouplingConfig {
            run_calibration: false,
            ..fast_config()
        };

        let report = CouplingTest::new(config)
            .run(&mut guard, None, &RunControl::new())
            .unwrap();
        assert!(report.completed);
        assert_eq!(report.coupling_detected, AxisValues::new(true, false, false));
        assert!(report.coupling_summary.contains("axis X"));
        assert_eq!(report.coupling_moves.len(), 6);
        assert!(report.coupling_moves.iter().all(|m| m.response_ok));
    }

    #[test]
    fn test_independent_axes() {
        let fw = firmware(false);
        let transport = SerialTransport::from_link(fw.link(), Dialect::Legacy, Default::default());
        let mut guard = transport.lock();
        let config = CouplingConfig {
            run_calibration: false,
            ..fast_config()
        };

        let report = CouplingTest::new(config)
            .run(&mut guard, None, &RunControl::new())
            .unwrap();
        assert!(!report.any_coupling());
        assert!(report.coupling_summary.starts_with("No cross-axis coupling"));
    }

    #[test]
    fn test_calibration_scales_from_meter() {
        let fw = firmware(false);
        let transport = SerialTransport::from_link(fw.link(), Dialect::Legacy, Default::default());
        let mut guard = transport.lock();
        let config = CouplingConfig {
            run_coupling: false,
            ..fast_config()
        };
        // 操作者量到的实际角度是命令值的一半；Y 不测量
        let mut meter = |axis: Axis, commanded: f64, _reported: f64| match axis {
            Axis::Y => None,
            _ => Some(commanded / 2.0),
        };

        let report = CouplingTest::new(config)
            .run(&mut guard, Some(&mut meter), &RunControl::new())
            .unwrap();
        assert_eq!(report.calibration_points.len(), 6);
        assert_eq!(report.calculated_scales.x, Some(0.5));
        assert_eq!(report.calculated_scales.y, None);
        // Z 回报是命令值的两倍
        assert_eq!(report.calculated_scales.z, Some(0.25));
    }

    #[test]
    fn test_calibration_without_meter_records_reports() {
        let fw = firmware(false);
        let transport = SerialTransport::from_link(fw.link(), Dialect::Legacy, Default::default());
        let mut guard = transport.lock();
        let config = CouplingConfig {
            run_coupling: false,
            ..fast_config()
        };

        let report = CouplingTest::new(config)
            .run(&mut guard, None, &RunControl::new())
            .unwrap();
        let z = report
            .calibration_points
            .iter()
            .find(|p| p.axis == Axis::Z && p.firmware_value == 100.0)
            .unwrap();
        assert_eq!(z.reported_value, 200.0);
        assert_eq!(z.scale, None);
        assert_eq!(report.calculated_scales, AxisValues::splat(None));
    }

    #[test]
    fn test_average_scales() {
        let point = |axis, scale| CalibrationPoint {
            axis,
            firmware_value: 0.0,
            reported_value: 0.0,
            physical_degrees: None,
            scale,
        };
        let scales = average_scales(&[
            point(Axis::X, Some(0.5)),
            point(Axis::X, Some(0.7)),
            point(Axis::Y, None),
        ]);
        assert_eq!(scales.x, Some(0.6));
        assert_eq!(scales.y, None);
    }
}
