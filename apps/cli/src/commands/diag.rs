//! diag 命令
//!
//! 在驱动的诊断会话中运行诊断工具。会话期间状态轮询暂停，串口由工具独占。
//! 工具被取消后不会自行回零，由这里负责把机械臂送回测试起点。

use crate::validation::PathValidator;
use anyhow::{Context, Result};
use armlink_sdk::diagnostics::{
    BoardConfig, BoardTest, CouplingConfig, CouplingTest, EndstopConfig, EndstopTest,
    FirmwareProbe, LogEntry, LogKind, MotionConfig, MotionTest, ProbeConfig, RunControl,
};
use armlink_sdk::prelude::*;
use armlink_sdk::protocol::ArmCommand;
use clap::{Args, Subcommand};
use serde::Serialize;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

/// 取消后回到起点使用的速度
const RETURN_FEED: u32 = 30;
/// 回起点的响应超时
const RETURN_TIMEOUT: Duration = Duration::from_secs(15);

/// 诊断工具
#[derive(Subcommand, Debug)]
pub enum DiagCommand {
    /// 测量每个轴的限位行程
    Endstops {
        #[command(flatten)]
        output: OutputArgs,

        /// 要测试的轴，如 `XY`（默认全部）
        #[arg(long, value_parser = parse_axes)]
        axes: Option<AxisSet>,

        /// 每步角度（度）
        #[arg(long, default_value_t = 5.0)]
        step: f64,

        /// 速度
        #[arg(long, default_value_t = 15)]
        speed: u32,

        /// 单方向最大搜索角度（度）
        #[arg(long, default_value_t = 200.0)]
        max_angle: f64,
    },

    /// 探测固件支持的命令
    Probe {
        #[command(flatten)]
        output: OutputArgs,

        /// 同时发送会修改固件设置的命令（M92、M500 等）
        #[arg(long)]
        include_mutating: bool,

        /// 单条命令超时（毫秒）
        #[arg(long, default_value_t = 1500)]
        timeout_ms: u64,
    },

    /// 不同速度下的运动耗时
    Motion {
        #[command(flatten)]
        output: OutputArgs,

        #[arg(long, value_parser = parse_axes)]
        axes: Option<AxisSet>,

        /// 测试角度（度）
        #[arg(long, default_value_t = 30.0)]
        angle: f64,

        /// 速度列表，逗号分隔
        #[arg(long, value_delimiter = ',')]
        speeds: Option<Vec<u32>>,
    },

    /// 单轴运动的跨轴耦合与比例标定
    Coupling {
        #[command(flatten)]
        output: OutputArgs,

        /// 跳过耦合检测
        #[arg(long)]
        no_coupling: bool,

        /// 跳过比例标定
        #[arg(long)]
        no_calibration: bool,

        /// 标定时从标准输入读取实测角度
        #[arg(long)]
        measure: bool,
    },

    /// 控制板逐项自检
    Board {
        #[command(flatten)]
        output: OutputArgs,

        /// 包含逐轴运动与回零（会移动机械臂）
        #[arg(long = "move")]
        move_test: bool,

        /// 跳过夹爪与吸盘
        #[arg(long)]
        no_effectors: bool,

        /// 先读取欢迎语的窗口（毫秒），适用于刚复位的控制板
        #[arg(long, value_name = "MS")]
        banner_wait: Option<u64>,
    },
}

/// 报告输出
#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// 以 JSON 输出报告
    #[arg(long)]
    pub json: bool,

    /// 把 JSON 报告写入文件
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl OutputArgs {
    /// 输出报告；`summary` 用于文本模式
    fn emit<R: Serialize>(&self, report: &R, summary: impl FnOnce()) -> Result<()> {
        let json = serde_json::to_string_pretty(report).context("序列化报告失败")?;
        if let Some(path) = &self.output {
            PathValidator::new().validate_output_path(path)?;
            std::fs::write(path, &json)
                .with_context(|| format!("写入报告失败: {}", path.display()))?;
            println!("💾 报告已保存: {}", path.display());
        }
        if self.json {
            println!("{}", json);
        } else {
            summary();
        }
        Ok(())
    }
}

/// 解析轴集合（`XY`、`x,z`）
pub fn parse_axes(text: &str) -> Result<AxisSet, String> {
    let set: AxisSet = text
        .chars()
        .filter(|c| !matches!(c, ',' | ' '))
        .map(|c| Axis::from_letter(c).map_err(|e| e.to_string()))
        .collect::<Result<_, _>>()?;
    if set.is_empty() {
        return Err("no axes given".into());
    }
    Ok(set)
}

impl DiagCommand {
    fn output(&self) -> &OutputArgs {
        match self {
            DiagCommand::Endstops { output, .. }
            | DiagCommand::Probe { output, .. }
            | DiagCommand::Motion { output, .. }
            | DiagCommand::Coupling { output, .. }
            | DiagCommand::Board { output, .. } => output,
        }
    }

    pub fn execute(&self, driver: &RobotArmDriver, control: &RunControl) -> Result<()> {
        let output = self.output().clone();
        // JSON 模式下实时日志走 tracing，不打印到标准输出
        let (control, printer) = if output.json {
            (control.clone(), None)
        } else {
            let (tx, rx) = crossbeam_channel::unbounded::<LogEntry>();
            let printer = std::thread::spawn(move || {
                for entry in rx {
                    print_entry(&entry);
                }
            });
            (control.clone().with_sink(tx), Some(printer))
        };

        let mut session = driver
            .enter_diagnostics()
            .context("进入诊断模式失败")?;
        println!("🔬 诊断模式（设备 {}）", session.device_id());

        let result = self.run_tool(session.transport(), driver, &control);
        if control.is_cancelled() {
            return_to_origin(session.transport());
        }
        drop(session);

        // 工具结束后发送端随 control 一起释放，打印线程退出
        drop(control);
        if let Some(printer) = printer {
            let _ = printer.join();
        }

        let report = result?;
        report.emit(&output)
    }

    fn run_tool(
        &self,
        transport: &mut armlink_sdk::serial::TransportGuard<'_>,
        driver: &RobotArmDriver,
        control: &RunControl,
    ) -> Result<Report> {
        let report = match self {
            DiagCommand::Endstops {
                axes,
                step,
                speed,
                max_angle,
                ..
            } => {
                let test = EndstopTest::new(EndstopConfig {
                    step_size: *step,
                    speed: *speed,
                    max_search_angle: *max_angle,
                    axis_mapping: driver.config().transform.axis_mapping,
                    ..Default::default()
                });
                Report::Endstops(test.run(transport, *axes, control)?)
            },
            DiagCommand::Probe {
                include_mutating,
                timeout_ms,
                ..
            } => {
                let probe = FirmwareProbe::new(ProbeConfig {
                    include_mutating: *include_mutating,
                    timeout: Duration::from_millis(*timeout_ms),
                    ..Default::default()
                });
                Report::Probe(probe.run(transport, control)?)
            },
            DiagCommand::Motion {
                axes,
                angle,
                speeds,
                ..
            } => {
                let mut config = MotionConfig {
                    test_angle: *angle,
                    ..Default::default()
                };
                if let Some(speeds) = speeds {
                    config.speeds = speeds.clone();
                }
                Report::Motion(MotionTest::new(config).run(transport, *axes, control)?)
            },
            DiagCommand::Coupling {
                no_coupling,
                no_calibration,
                measure,
                ..
            } => {
                let test = CouplingTest::new(CouplingConfig {
                    run_coupling: !no_coupling,
                    run_calibration: !no_calibration,
                    ..Default::default()
                });
                let mut meter = StdinMeter;
                let meter: Option<&mut dyn armlink_sdk::diagnostics::AngleMeter> =
                    if *measure { Some(&mut meter) } else { None };
                Report::Coupling(test.run(transport, meter, control)?)
            },
            DiagCommand::Board {
                move_test,
                no_effectors,
                banner_wait,
                ..
            } => {
                let test = BoardTest::new(BoardConfig {
                    banner_window: banner_wait.map(Duration::from_millis),
                    move_test: *move_test,
                    effector_test: !no_effectors,
                    ..Default::default()
                });
                Report::Board(test.run(transport, control)?)
            },
        };
        Ok(report)
    }
}

/// 工具报告
enum Report {
    Endstops(armlink_sdk::diagnostics::EndstopReport),
    Probe(armlink_sdk::diagnostics::ProbeReport),
    Motion(armlink_sdk::diagnostics::MotionReport),
    Coupling(armlink_sdk::diagnostics::CouplingReport),
    Board(armlink_sdk::diagnostics::BoardReport),
}

impl Report {
    fn emit(&self, output: &OutputArgs) -> Result<()> {
        match self {
            Report::Endstops(r) => output.emit(r, || {
                println!("📏 限位行程（{:.1} 秒）", r.duration_secs);
                for axis in &r.axes {
                    let fmt = |v: Option<f64>| v.map_or("-".to_string(), |v| format!("{:+.1}", v));
                    println!(
                        "  {:<14} {} / {}  范围 {}",
                        axis.axis_name,
                        fmt(axis.positive_limit),
                        fmt(axis.negative_limit),
                        fmt(axis.total_range)
                    );
                }
                if let Some(error) = &r.error {
                    println!("  ⚠️ {}", error);
                }
            }),
            Report::Probe(r) => output.emit(r, || {
                println!("🔎 固件: {}（{:.1} 秒）", r.firmware, r.duration_secs);
                println!(
                    "  支持 {} 条，不支持 {} 条",
                    r.recognized().count(),
                    r.unrecognized().count()
                );
                for result in r.recognized() {
                    println!("  ✔ {:<14} {}", result.command, result.description);
                }
            }),
            Report::Motion(r) => output.emit(r, || {
                println!("⏱️  速度测试（{:.1} 秒）", r.duration_secs);
                for (speed, summary) in &r.speed_summary {
                    println!(
                        "  F{:<4} 平均 {:>8.1} ms  {}",
                        speed,
                        summary.avg_time_ms,
                        if summary.all_ok { "OK" } else { "失败" }
                    );
                }
                match r.recommended_speed {
                    Some(speed) => println!("  推荐速度: F{}", speed),
                    None => println!("  ⚠️ 没有全部成功的速度"),
                }
            }),
            Report::Coupling(r) => output.emit(r, || {
                println!("🔗 {}", r.coupling_summary);
                for (axis, scale) in r.calculated_scales.iter() {
                    if let Some(scale) = scale {
                        println!("  {} 比例: {:.4}", axis, scale);
                    }
                }
                if let Some(error) = &r.error {
                    println!("  ⚠️ {}", error);
                }
            }),
            Report::Board(r) => output.emit(r, || {
                println!("🧪 控制板自检（{:.1} 秒）", r.duration_secs);
                print!("{}", r.summary());
            }),
        }
    }
}

/// 标定：从标准输入读取实测角度，空行跳过
struct StdinMeter;

impl armlink_sdk::diagnostics::AngleMeter for StdinMeter {
    fn measure(&mut self, axis: Axis, commanded: f64, reported: f64) -> Option<f64> {
        println!(
            "📐 {} 轴命令 {:.1}，固件回报 {:.1}。请输入实测角度（空行跳过）:",
            axis, commanded, reported
        );
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line).ok()?;
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match line.parse::<f64>() {
            Ok(v) if v.is_finite() => Some(v),
            _ => {
                println!("⚠️ 无法解析 {:?}，跳过此点", line);
                None
            },
        }
    }
}

/// 取消后回到测试起点（固件坐标零点）
fn return_to_origin(transport: &mut armlink_sdk::serial::TransportGuard<'_>) {
    println!("↩️  回到起点...");
    let home = ArmCommand::LinearMove {
        target: AxisValues::splat(0.0),
        feed: RETURN_FEED,
    };
    for command in ["G90".to_string(), home.to_wire()] {
        if let Err(e) = transport.exchange(&command, RETURN_TIMEOUT) {
            tracing::warn!("Return to origin failed at {}: {}", command, e);
            return;
        }
    }
}

fn print_entry(entry: &LogEntry) {
    let seconds = entry.t_ms as f64 / 1000.0;
    match entry.kind {
        LogKind::Cmd => {
            let response = entry.response.as_deref().unwrap_or("");
            println!("  [{:7.2}] > {:<24} {}", seconds, entry.msg, response);
        },
        LogKind::Progress => {
            let pct = entry.pct.map_or(String::new(), |p| format!("{:>3}% ", p));
            println!("  [{:7.2}] {}{}", seconds, pct, entry.msg);
        },
        LogKind::Warn => println!("  [{:7.2}] ⚠️ {}", seconds, entry.msg),
        LogKind::Error => println!("  [{:7.2}] ❌ {}", seconds, entry.msg),
        LogKind::Info | LogKind::Result => println!("  [{:7.2}] {}", seconds, entry.msg),
    }
}
