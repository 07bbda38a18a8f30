//! 速度扫描
//!
//! 对每个速度、每个轴：从零位绝对运动到测试角度再返回，测量两次往返耗时，
//! 用于挑选一个稳定的工作速度。

use crate::error::DiagnosticsError;
use crate::link::{Pacing, RunControl, ToolLink, unix_millis};
use crate::log::{LogEntry, LogKind};
use armlink_protocol::{ArmCommand, Axis, AxisSet, AxisValues, Dialect, parse_linear_move};
use armlink_serial::{Framing, SerialError, TransportGuard};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

const ZERO_TIMEOUT: Duration = Duration::from_millis(1000);

/// 默认测试速度（F 参数）
pub const DEFAULT_SPEEDS: [u32; 7] = [5, 10, 20, 30, 50, 70, 100];

/// 速度扫描参数
#[derive(Debug, Clone, PartialEq)]
pub struct MotionConfig {
    /// 测试角度（度）
    pub test_angle: f64,
    pub speeds: Vec<u32>,
    /// 单次运动超时
    pub move_timeout: Duration,
    /// `step`：去程与回程之间；`settle`：两次测试之间
    pub pacing: Pacing,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            test_angle: 30.0,
            speeds: DEFAULT_SPEEDS.to_vec(),
            move_timeout: Duration::from_secs(15),
            pacing: Pacing {
                step: Duration::from_millis(200),
                settle: Duration::from_millis(300),
            },
        }
    }
}

/// 单次测试（一个速度、一个轴）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestResult {
    pub speed: u32,
    pub axis: Axis,
    pub angle: f64,
    /// 去程耗时（命令发出到响应）
    pub move_time_ms: f64,
    pub return_time_ms: f64,
    pub avg_time_ms: f64,
    /// 去程和回程都收到了运动确认
    pub response_ok: bool,
    pub response: String,
}

/// 单个速度的汇总（只统计成功的测试）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedSummary {
    pub avg_time_ms: f64,
    pub min_time_ms: f64,
    pub max_time_ms: f64,
    /// 该速度下所有测试都成功
    pub all_ok: bool,
    /// 成功的测试数
    pub tests: usize,
}

/// 速度扫描报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionReport {
    pub timestamp_ms: u64,
    pub test_angle: f64,
    pub speeds_tested: Vec<u32>,
    pub results: Vec<SpeedTestResult>,
    pub speed_summary: BTreeMap<u32, SpeedSummary>,
    pub recommended_speed: Option<u32>,
    pub completed: bool,
    pub error: Option<String>,
    pub duration_secs: f64,
    pub log: Vec<LogEntry>,
}

/// 速度扫描
#[derive(Debug, Clone, Default)]
pub struct MotionTest {
    config: MotionConfig,
}

impl MotionTest {
    pub fn new(config: MotionConfig) -> Self {
        Self { config }
    }

    /// 运行扫描
    ///
    /// # 参数
    ///
    /// - `axes`: 要测试的固件轴，`None` = 全部
    ///
    /// # 错误
    ///
    /// 速度表为空或串口失效。
    pub fn run(
        &self,
        transport: &mut TransportGuard<'_>,
        axes: Option<AxisSet>,
        control: &RunControl,
    ) -> Result<MotionReport, DiagnosticsError> {
        let cfg = &self.config;
        if cfg.speeds.is_empty() {
            return Err(DiagnosticsError::invalid("no speeds to test"));
        }
        if !cfg.test_angle.is_finite() {
            return Err(DiagnosticsError::invalid("test angle must be finite"));
        }
        let axes: Vec<Axis> = match axes {
            Some(set) if !set.is_empty() => set.iter().collect(),
            _ => Axis::ALL.to_vec(),
        };

        let mut link = ToolLink::new(transport, control, Framing::Dialect(Dialect::Legacy));
        let mut report = MotionReport {
            timestamp_ms: unix_millis(),
            test_angle: cfg.test_angle,
            speeds_tested: cfg.speeds.clone(),
            ..Default::default()
        };
        link.log.info(format!(
            "Motion test: {}° at {} speeds",
            cfg.test_angle,
            cfg.speeds.len()
        ));
        link.send(&ArmCommand::ZeroPosition.to_wire(), ZERO_TIMEOUT)?;

        let total = (cfg.speeds.len() * axes.len()) as f64;
        let mut done = 0_usize;
        let mut cancelled = false;
        'speeds: for &speed in &cfg.speeds {
            link.log.push(
                LogEntry::new(LogKind::Info, format!("Speed F{}", speed))
                    .pct(done as f64 / total * 100.0),
            );
            for &axis in &axes {
                if link.cancelled() {
                    link.log.warn("Motion test cancelled");
                    cancelled = true;
                    break 'speeds;
                }
                let result = self.test_speed_axis(&mut link, axis, speed)?;
                link.log.push(
                    LogEntry::new(
                        LogKind::Result,
                        format!(
                            "F{} {}: out {:.0} ms, back {:.0} ms, avg {:.0} ms",
                            speed,
                            axis,
                            result.move_time_ms,
                            result.return_time_ms,
                            result.avg_time_ms
                        ),
                    )
                    .axis(axis)
                    .ms(result.avg_time_ms),
                );
                report.results.push(result);
                done += 1;
                link.pause(cfg.pacing.settle);
            }
        }

        report.speed_summary = summarize(&report.results);
        report.recommended_speed = recommended_speed(&report.speed_summary);
        report.completed = !cancelled;
        if cancelled {
            report.error = Some("Cancelled by user".to_string());
        }
        report.duration_secs = link.log.elapsed_secs();
        link.log.push(
            LogEntry::new(
                LogKind::Info,
                match report.recommended_speed {
                    Some(speed) => format!("Motion test finished, recommended F{}", speed),
                    None => "Motion test finished, no speed passed".to_string(),
                },
            )
            .pct(100.0),
        );
        report.log = link.into_log().into_entries();
        Ok(report)
    }

    fn test_speed_axis(
        &self,
        link: &mut ToolLink<'_, '_>,
        axis: Axis,
        speed: u32,
    ) -> Result<SpeedTestResult, SerialError> {
        let angle = self.config.test_angle;
        let out = ArmCommand::single_axis_move(axis, angle, speed).to_wire();
        let back = ArmCommand::LinearMove {
            target: AxisValues::splat(0.0),
            feed: speed,
        }
        .to_wire();

        let (resp_out, t_out) = link.send_timed(&out, self.config.move_timeout)?;
        link.pause(self.config.pacing.step);
        let (resp_back, t_back) = link.send_timed(&back, self.config.move_timeout)?;

        let move_time_ms = t_out.as_secs_f64() * 1000.0;
        let return_time_ms = t_back.as_secs_f64() * 1000.0;
        Ok(SpeedTestResult {
            speed,
            axis,
            angle,
            move_time_ms,
            return_time_ms,
            avg_time_ms: (move_time_ms + return_time_ms) / 2.0,
            response_ok: parse_linear_move(&resp_out).is_some()
                && parse_linear_move(&resp_back).is_some(),
            response: resp_out.chars().take(200).collect(),
        })
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// 按速度汇总；没有任何成功测试的速度不出现在结果中
pub fn summarize(results: &[SpeedTestResult]) -> BTreeMap<u32, SpeedSummary> {
    let mut summary = BTreeMap::new();
    let mut speeds: Vec<u32> = results.iter().map(|r| r.speed).collect();
    speeds.dedup();
    for speed in speeds {
        let at_speed: Vec<&SpeedTestResult> = results.iter().filter(|r| r.speed == speed).collect();
        let ok: Vec<f64> = at_speed
            .iter()
            .filter(|r| r.response_ok)
            .map(|r| r.avg_time_ms)
            .collect();
        if ok.is_empty() {
            continue;
        }
        summary.insert(
            speed,
            SpeedSummary {
                avg_time_ms: round1(ok.iter().sum::<f64>() / ok.len() as f64),
                min_time_ms: round1(ok.iter().copied().fold(f64::INFINITY, f64::min)),
                max_time_ms: round1(ok.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
                all_ok: at_speed.iter().all(|r| r.response_ok),
                tests: ok.len(),
            },
        );
    }
    summary
}

/// 推荐速度：全部成功的速度中取中位（偶数个时取较高的那个）
pub fn recommended_speed(summary: &BTreeMap<u32, SpeedSummary>) -> Option<u32> {
    let working: Vec<u32> = summary
        .iter()
        .filter(|(_, s)| s.all_ok)
        .map(|(&speed, _)| speed)
        .collect();
    working.get(working.len() / 2).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use armlink_serial::SerialTransport;
    use armlink_serial::mock::MockFirmware;

    fn sample(speed: u32, ok: bool, avg: f64) -> SpeedTestResult {
        SpeedTestResult {
            speed,
            axis: Axis::X,
            angle: 30.0,
            move_time_ms: avg,
            return_time_ms: avg,
            avg_time_ms: avg,
            response_ok: ok,
            response: String::new(),
        }
    }

    #[test]
    fn test_recommended_is_median_of_working_speeds() {
        let results = [
            sample(5, true, 900.0),
            sample(10, true, 500.0),
            sample(20, true, 300.0),
            sample(50, true, 200.0),
            sample(100, false, 0.0),
        ];
        let summary = summarize(&results);
        assert!(!summary.contains_key(&100));
        // [5, 10, 20, 50] → 索引 2
        assert_eq!(recommended_speed(&summary), Some(20));
    }

    #[test]
    fn test_partial_failure_excludes_speed() {
        let results = [
            sample(10, true, 100.0),
            sample(10, true, 300.0),
            sample(30, true, 50.0),
            sample(30, false, 0.0),
        ];
        let summary = summarize(&results);
        let s10 = &summary[&10];
        assert_eq!(s10.avg_time_ms, 200.0);
        assert_eq!((s10.min_time_ms, s10.max_time_ms), (100.0, 300.0));
        assert!(s10.all_ok);
        assert!(!summary[&30].all_ok);
        assert_eq!(summary[&30].tests, 1);
        assert_eq!(recommended_speed(&summary), Some(10));
    }

    #[test]
    fn test_no_working_speed() {
        let summary = summarize(&[sample(10, false, 0.0)]);
        assert_eq!(recommended_speed(&summary), None);
    }

    #[test]
    fn test_sweep_against_firmware() {
        let fw = MockFirmware::new(|cmd| {
            if let Some(rest) = cmd.strip_prefix("G1 ") {
                // 速度 100 不确认运动
                if rest.ends_with("F100") {
                    return vec!["INFO: BUSY".into()];
                }
                let coords: Vec<&str> = rest.split_whitespace().take(3).collect();
                return vec![format!("INFO: LINEAR MOVE: {} .", coords.join(" "))];
            }
            vec![format!("INFO: {cmd}")]
        });
        let transport = SerialTransport::from_link(fw.link(), Dialect::Legacy, Default::default());
        let mut guard = transport.lock();
        let config = MotionConfig {
            speeds: vec![10, 20, 100],
            move_timeout: Duration::from_millis(200),
            pacing: Pacing::immediate(),
            ..Default::default()
        };
        let mut set = AxisSet::EMPTY;
        set.insert(Axis::Y);

        let report = MotionTest::new(config)
            .run(&mut guard, Some(set), &RunControl::new())
            .unwrap();

        assert!(report.completed);
        assert_eq!(report.results.len(), 3);
        assert!(!report.results[2].response_ok);
        assert_eq!(report.recommended_speed, Some(20));
        assert_eq!(
            fw.written()[..3],
            [
                "G92 X0 Y0 Z0".to_string(),
                "G1 X0.00 Y30.00 Z0.00 F10".to_string(),
                "G1 X0.00 Y0.00 Z0.00 F10".to_string(),
            ]
        );
    }

    #[test]
    fn test_cancelled_sweep() {
        let fw = MockFirmware::new(|cmd| vec![format!("INFO: {cmd}")]);
        let transport = SerialTransport::from_link(fw.link(), Dialect::Legacy, Default::default());
        let mut guard = transport.lock();
        let control = RunControl::new();
        control.cancel();

        let report = MotionTest::new(MotionConfig {
            pacing: Pacing::immediate(),
            ..Default::default()
        })
        .run(&mut guard, None, &control)
        .unwrap();
        assert!(!report.completed);
        assert!(report.results.is_empty());
        assert_eq!(report.recommended_speed, None);
    }
}
