//! jog 命令

use crate::validation::validate_speed;
use anyhow::Result;
use armlink_sdk::prelude::*;
use clap::Args;

/// 点动参数
#[derive(Args, Debug)]
pub struct JogCommand {
    /// 轴（X / Y / Z）
    pub axis: Axis,

    /// 相对距离（度）
    #[arg(allow_negative_numbers = true)]
    pub distance: f64,

    /// 进给
    #[arg(short, long, default_value_t = 50.0)]
    pub feed: f64,
}

impl JogCommand {
    pub fn execute(&self, driver: &RobotArmDriver) -> Result<()> {
        validate_speed(self.feed)?;
        println!("➡️  点动 {} {:+.2}", self.axis, self.distance);
        driver.jog(self.axis, self.distance, self.feed)?;

        let status = driver.status();
        println!("✅ 位置: {}", status.position);
        if let Some(direction) = status.endstop_blocked.get(&self.axis) {
            println!("⚠️  限位触发：{} 轴 {:?} 方向被阻挡", self.axis, direction);
        }
        Ok(())
    }
}
