//! status 命令

use anyhow::Result;
use armlink_sdk::prelude::*;
use clap::Args;

/// 状态查询参数
#[derive(Args, Debug)]
pub struct StatusCommand {
    /// 以 JSON 输出
    #[arg(long)]
    pub json: bool,

    /// 同时查询限位开关（M119）
    #[arg(long)]
    pub endstops: bool,
}

impl StatusCommand {
    pub fn execute(&self, driver: &RobotArmDriver) -> Result<()> {
        if self.endstops {
            driver.check_endstops()?;
        }
        let status = driver.status();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }

        println!("📊 设备 {} ({})", driver.id(), driver.dialect());
        println!("  状态: {}", status.state);
        println!("  位置: {}", status.position);
        println!("  进给: {:.0}", status.feed_rate);
        if let Some(endstops) = status.endstop_states {
            let flags: Vec<String> = endstops
                .iter()
                .map(|(axis, &hit)| format!("{}:{}", axis, u8::from(hit)))
                .collect();
            println!("  限位: {}", flags.join(" "));
        }
        if let Some(error) = &status.error_message {
            println!("  ⚠️ 错误: {}", error);
        }

        if driver.dialect() == Dialect::Grbl {
            let arm = driver.grbl_status()?;
            println!("  GRBL: {}", arm.grbl_state);
            println!(
                "  关节: J1={:.2}° J2={:.2}° J3={:.2}°",
                arm.joints.j1, arm.joints.j2, arm.joints.j3
            );
            println!(
                "  末端: X{:.2} Y{:.2} Z{:.2} mm",
                arm.cartesian.x, arm.cartesian.y, arm.cartesian.z
            );
        }
        Ok(())
    }
}
