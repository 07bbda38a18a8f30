//! 限位行程测量
//!
//! 从当前位置出发，以小步相对运动逐轴向正、负方向搜索限位开关，
//! 每步之后用 `M119` 查询；记录触发位置并退回起点，得到每个轴的实际行程。
//!
//! ```text
//! G92 X0 Y0 Z0 → G91 → 每个轴: +step… (M119) → 退回 → -step… (M119) → 退回 → G90 → 回零
//! ```
//!
//! 工具工作在固件轴上，不经过轴变换；`axis_mapping` 只用于给固件轴标注关节名。

use crate::error::DiagnosticsError;
use crate::link::{Pacing, RunControl, ToolLink, unix_millis};
use crate::log::{LogEntry, LogKind};
use crate::joint_name_for;
use armlink_protocol::{
    ArmCommand, Axis, AxisSet, AxisValues, Dialect, contains_error_marker, parse_endstops,
};
use armlink_serial::{Framing, SerialError, TransportGuard};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ZERO_TIMEOUT: Duration = Duration::from_millis(1000);
const MODE_TIMEOUT: Duration = Duration::from_millis(500);
const ENDSTOP_TIMEOUT: Duration = Duration::from_millis(1500);
const STEP_TIMEOUT: Duration = Duration::from_secs(5);
const HOME_TIMEOUT: Duration = Duration::from_secs(8);

/// 每隔多少步记录一条进度
const PROGRESS_EVERY: u32 = 5;

/// 限位测量参数
#[derive(Debug, Clone, PartialEq)]
pub struct EndstopConfig {
    /// 单步角度（度）
    pub step_size: f64,
    /// 进给（F 参数）
    pub speed: u32,
    /// 单方向最大搜索角度（度）
    pub max_search_angle: f64,
    /// 逻辑轴 → 固件轴（只影响报告中的关节名）
    pub axis_mapping: AxisValues<Axis>,
    /// 步间停顿 `step`；换方向停顿 `settle`。退回时的步间停顿为 `step / 2`
    pub pacing: Pacing,
}

impl Default for EndstopConfig {
    fn default() -> Self {
        Self {
            step_size: 5.0,
            speed: 15,
            max_search_angle: 200.0,
            axis_mapping: AxisValues::new(Axis::X, Axis::Y, Axis::Z),
            pacing: Pacing {
                step: Duration::from_millis(100),
                settle: Duration::from_millis(500),
            },
        }
    }
}

/// 单个固件轴的行程
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub axis: Option<Axis>,
    pub axis_name: String,
    /// 正方向限位位置（度）
    pub positive_limit: Option<f64>,
    /// 负方向限位位置（度）
    pub negative_limit: Option<f64>,
    /// 正负限位之差
    pub total_range: Option<f64>,
    pub positive_endstop_hit: bool,
    pub negative_endstop_hit: bool,
    /// 搜索到最大角度仍未触发
    pub positive_max_reached: bool,
    pub negative_max_reached: bool,
    pub steps_positive: u32,
    pub steps_negative: u32,
    pub error: Option<String>,
}

/// 限位测量报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndstopReport {
    pub timestamp_ms: u64,
    pub step_size: f64,
    pub speed: u32,
    pub max_search_angle: f64,
    pub axes: Vec<AxisRange>,
    pub completed: bool,
    pub error: Option<String>,
    pub duration_secs: f64,
    pub log: Vec<LogEntry>,
}

impl EndstopReport {
    /// 按固件轴查找结果
    pub fn axis(&self, axis: Axis) -> Option<&AxisRange> {
        self.axes.iter().find(|r| r.axis == Some(axis))
    }
}

/// 搜索方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Positive,
    Negative,
}

impl Direction {
    fn sign(self) -> f64 {
        match self {
            Direction::Positive => 1.0,
            Direction::Negative => -1.0,
        }
    }

    fn symbol(self) -> char {
        match self {
            Direction::Positive => '+',
            Direction::Negative => '-',
        }
    }
}

/// 单方向搜索结果
struct Search {
    /// 需要退回的步数
    steps: u32,
    cancelled: bool,
}

/// 限位测量
#[derive(Debug, Clone, Default)]
pub struct EndstopTest {
    config: EndstopConfig,
}

impl EndstopTest {
    pub fn new(config: EndstopConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EndstopConfig {
        &self.config
    }

    /// 运行测量
    ///
    /// # 参数
    ///
    /// - `transport`: 独占的传输门（诊断会话）
    /// - `axes`: 要测量的固件轴，`None` = 全部
    /// - `control`: 取消标志与实时日志
    ///
    /// # 错误
    ///
    /// 参数无效或串口失效。固件错误与取消记录在报告中。
    pub fn run(
        &self,
        transport: &mut TransportGuard<'_>,
        axes: Option<AxisSet>,
        control: &RunControl,
    ) -> Result<EndstopReport, DiagnosticsError> {
        let cfg = &self.config;
        if !(cfg.step_size.is_finite() && cfg.step_size > 0.0) {
            return Err(DiagnosticsError::invalid("step size must be positive"));
        }
        if !(cfg.max_search_angle.is_finite() && cfg.max_search_angle >= cfg.step_size) {
            return Err(DiagnosticsError::invalid(
                "max search angle must be at least one step",
            ));
        }

        let axes: Vec<Axis> = match axes {
            Some(set) if !set.is_empty() => set.iter().collect(),
            _ => Axis::ALL.to_vec(),
        };
        let mut link = ToolLink::new(transport, control, Framing::Dialect(Dialect::Legacy));
        let mut report = EndstopReport {
            timestamp_ms: unix_millis(),
            step_size: cfg.step_size,
            speed: cfg.speed,
            max_search_angle: cfg.max_search_angle,
            ..Default::default()
        };

        link.log.info(format!(
            "Endstop range test: step {}°, F{}, max {}°",
            cfg.step_size, cfg.speed, cfg.max_search_angle
        ));

        let resp = link.send(&ArmCommand::ZeroPosition.to_wire(), ZERO_TIMEOUT)?;
        if contains_error_marker(&resp) {
            let msg = format!("Calibration error: {}", resp);
            link.log.error(msg.clone());
            report.error = Some(msg);
            report.duration_secs = link.log.elapsed_secs();
            report.log = link.into_log().into_entries();
            return Ok(report);
        }
        link.send(&ArmCommand::RelativeMode.to_wire(), MODE_TIMEOUT)?;

        let mut cancelled = false;
        for (i, &axis) in axes.iter().enumerate() {
            if link.cancelled() {
                link.log.warn("Endstop test cancelled");
                report.error = Some("Cancelled by user".to_string());
                cancelled = true;
                break;
            }
            link.log.push(
                LogEntry::new(
                    LogKind::Info,
                    format!("Testing {} ({})", axis, self.axis_name(axis)),
                )
                .axis(axis)
                .pct(i as f64 / axes.len() as f64 * 100.0),
            );
            report.axes.push(self.test_axis(&mut link, axis)?);
        }

        link.log.push(LogEntry::new(LogKind::Info, "Returning home").pct(95.0));
        link.send(&ArmCommand::AbsoluteMode.to_wire(), MODE_TIMEOUT)?;
        link.send(&self.absolute_home(), HOME_TIMEOUT)?;

        report.completed = !cancelled;
        report.duration_secs = link.log.elapsed_secs();
        link.log.push(
            LogEntry::new(
                LogKind::Info,
                format!(
                    "Endstop test {} ({:.1} s)",
                    if cancelled { "cancelled" } else { "finished" },
                    report.duration_secs
                ),
            )
            .pct(100.0),
        );
        report.log = link.into_log().into_entries();
        Ok(report)
    }

    /// 固件轴对应的关节名
    fn axis_name(&self, firmware: Axis) -> &'static str {
        joint_name_for(&self.config.axis_mapping, firmware)
    }

    fn relative_step(&self, axis: Axis, delta: f64) -> String {
        ArmCommand::single_axis_move(axis, delta, self.config.speed).to_wire()
    }

    fn absolute_home(&self) -> String {
        ArmCommand::LinearMove {
            target: AxisValues::splat(0.0),
            feed: self.config.speed,
        }
        .to_wire()
    }

    fn test_axis(&self, link: &mut ToolLink<'_, '_>, axis: Axis) -> Result<AxisRange, SerialError> {
        let mut result = AxisRange {
            axis: Some(axis),
            axis_name: self.axis_name(axis).to_string(),
            ..Default::default()
        };

        for direction in [Direction::Positive, Direction::Negative] {
            let search = self.search(link, axis, direction, &mut result)?;
            if search.cancelled {
                return Ok(result);
            }
            if !self.step_back(link, axis, direction, search.steps)? {
                return Ok(result);
            }
            link.pause(self.config.pacing.settle);
        }

        if let (Some(pos), Some(neg)) = (result.positive_limit, result.negative_limit) {
            result.total_range = Some(pos - neg);
        }
        Ok(result)
    }

    /// 单方向搜索，结果写入 `result` 对应方向的字段
    fn search(
        &self,
        link: &mut ToolLink<'_, '_>,
        axis: Axis,
        direction: Direction,
        result: &mut AxisRange,
    ) -> Result<Search, SerialError> {
        let cfg = &self.config;
        let delta = direction.sign() * cfg.step_size;
        let mut position = 0.0_f64;
        let mut steps = 0_u32;

        link.log.push(
            LogEntry::new(
                LogKind::Info,
                format!(
                    "{}{} search ({}° steps)",
                    axis,
                    direction.symbol(),
                    cfg.step_size
                ),
            )
            .axis(axis),
        );

        let (limit, hit, max_reached, counted) = loop {
            if position.abs() >= cfg.max_search_angle {
                link.log.push(
                    LogEntry::new(
                        LogKind::Warn,
                        format!("{} max search reached: {:+.1}° (no endstop)", axis, position),
                    )
                    .axis(axis),
                );
                break (Some(position), false, true, steps);
            }
            if link.cancelled() {
                result.error = Some("Cancelled".to_string());
                self.record(result, direction, Some(position), false, false, steps);
                return Ok(Search {
                    steps,
                    cancelled: true,
                });
            }

            let resp = link.send(&self.relative_step(axis, delta), STEP_TIMEOUT)?;
            if contains_error_marker(&resp) {
                result.error = Some(format!("Move error: {}", resp));
                break (None, false, false, 0);
            }
            position += delta;
            steps += 1;

            let resp = link.send(&ArmCommand::QueryEndstops.to_wire(), ENDSTOP_TIMEOUT)?;
            let triggered = parse_endstops(&resp).map(|e| e[axis]).unwrap_or(false);
            if triggered {
                link.log.push(
                    LogEntry::new(
                        LogKind::Result,
                        format!("{} endstop at {:+.1}° ({} steps)", axis, position, steps),
                    )
                    .axis(axis)
                    .value(position),
                );
                break (Some(position), true, false, steps);
            }
            if steps % PROGRESS_EVERY == 0 {
                link.log.push(
                    LogEntry::new(
                        LogKind::Progress,
                        format!("{}{} search: {:.1}°", axis, direction.symbol(), position),
                    )
                    .axis(axis)
                    .value(position),
                );
            }
            link.pause(cfg.pacing.step);
        };

        self.record(result, direction, limit, hit, max_reached, counted);
        Ok(Search {
            steps,
            cancelled: false,
        })
    }

    fn record(
        &self,
        result: &mut AxisRange,
        direction: Direction,
        limit: Option<f64>,
        hit: bool,
        max_reached: bool,
        steps: u32,
    ) {
        let (slot, hit_flag, max_flag, step_count) = match direction {
            Direction::Positive => (
                &mut result.positive_limit,
                &mut result.positive_endstop_hit,
                &mut result.positive_max_reached,
                &mut result.steps_positive,
            ),
            Direction::Negative => (
                &mut result.negative_limit,
                &mut result.negative_endstop_hit,
                &mut result.negative_max_reached,
                &mut result.steps_negative,
            ),
        };
        if limit.is_some() {
            *slot = limit;
        }
        *hit_flag = hit;
        *max_flag = max_reached;
        *step_count = steps;
    }

    /// 按步退回起点，被取消时返回 `false`
    fn step_back(
        &self,
        link: &mut ToolLink<'_, '_>,
        axis: Axis,
        direction: Direction,
        steps: u32,
    ) -> Result<bool, SerialError> {
        let delta = -direction.sign() * self.config.step_size;
        for _ in 0..steps {
            if link.cancelled() {
                return Ok(false);
            }
            link.send(&self.relative_step(axis, delta), STEP_TIMEOUT)?;
            link.pause(self.config.pacing.step / 2);
        }
        Ok(true)
    }
}
