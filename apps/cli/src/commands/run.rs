//! run 命令
//!
//! 加载 G-code 文件并在后台执行，前台显示进度；Ctrl+C 停止执行。

use crate::validation::PathValidator;
use anyhow::{Context, Result};
use armlink_sdk::diagnostics::RunControl;
use armlink_sdk::prelude::*;
use clap::Args;
use crossbeam_channel::RecvTimeoutError;
use std::path::PathBuf;
use std::time::Duration;

/// 检查取消标志的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 程序执行参数
#[derive(Args, Debug)]
pub struct RunCommand {
    /// G-code 文件
    pub file: PathBuf,

    /// 起始行（从 0 开始）
    #[arg(long, default_value_t = 0)]
    pub from_line: usize,
}

/// 执行结果
#[derive(Debug, PartialEq)]
enum Outcome {
    Complete,
    Stopped,
    Alarm(String),
}

impl RunCommand {
    pub fn execute(&self, driver: &RobotArmDriver, control: &RunControl) -> Result<()> {
        PathValidator::new().must_exist().validate_path(&self.file)?;
        driver
            .load_file(&self.file)
            .with_context(|| format!("加载文件失败: {}", self.file.display()))?;
        let total = driver.program().map(|p| p.len()).unwrap_or(0);
        println!("📜 {}（{} 行）", self.file.display(), total);

        let events = driver.subscribe();
        driver.run(self.from_line)?;

        let outcome = loop {
            if control.is_cancelled() {
                driver.stop()?;
                break Outcome::Stopped;
            }
            match events.recv_timeout(POLL_INTERVAL) {
                Ok(DeviceEvent::JobProgress {
                    progress,
                    current_line,
                    total_lines,
                }) => {
                    println!("  [{:5.1}%] {}/{}", progress, current_line, total_lines);
                },
                Ok(DeviceEvent::JobComplete { .. }) => break Outcome::Complete,
                Ok(DeviceEvent::StateChanged {
                    to: DeviceState::Alarm,
                    ..
                }) => {
                    let message = driver.status().error_message.unwrap_or_default();
                    break Outcome::Alarm(message);
                },
                Ok(DeviceEvent::StateChanged {
                    from: DeviceState::Running,
                    to: DeviceState::Idle,
                }) => break Outcome::Stopped,
                Ok(_) => {},
                Err(RecvTimeoutError::Timeout) => {},
                Err(RecvTimeoutError::Disconnected) => {
                    anyhow::bail!("设备事件通道已关闭");
                },
            }
        };

        match outcome {
            Outcome::Complete => println!("✅ 执行完成"),
            Outcome::Stopped => println!("🛑 已停止"),
            Outcome::Alarm(message) => {
                anyhow::bail!("执行出错，设备进入报警状态: {}（使用 reset 清除）", message)
            },
        }
        Ok(())
    }
}
