//! gcode 命令

use anyhow::Result;
use armlink_sdk::prelude::*;
use clap::Args;

/// 原始 G-code 参数
#[derive(Args, Debug)]
pub struct GcodeCommand {
    /// 要发送的命令（可多条，按顺序发送）
    #[arg(required = true, allow_hyphen_values = true)]
    pub lines: Vec<String>,

    /// 出错后继续发送后续命令
    #[arg(long)]
    pub continue_on_error: bool,
}

impl GcodeCommand {
    pub fn execute(&self, driver: &RobotArmDriver) -> Result<()> {
        let mut failed = 0;
        for line in &self.lines {
            println!("> {}", line);
            let response = driver.send_gcode(line);
            for reply in response.lines() {
                println!("  {}", reply);
            }
            if response.starts_with("error: ") {
                failed += 1;
                if !self.continue_on_error {
                    anyhow::bail!("命令失败: {}", line);
                }
            }
        }
        if failed > 0 {
            anyhow::bail!("{} 条命令失败", failed);
        }
        Ok(())
    }
}
