//! move 命令
//!
//! 绝对运动：逻辑坐标、关节角或笛卡尔坐标（可直线插补）

use crate::validation::{parse_triple, validate_speed};
use anyhow::{Context, Result};
use armlink_sdk::prelude::*;
use clap::Args;

/// 移动命令参数
#[derive(Args, Debug)]
#[command(group(clap::ArgGroup::new("target").required(true).args(["axes", "joints", "xyz"])))]
pub struct MoveCommand {
    /// 逻辑轴目标 `x,y,z`（度）
    #[arg(long, allow_hyphen_values = true)]
    pub axes: Option<String>,

    /// 关节目标 `j1,j2,j3`（度，GRBL）
    #[arg(long, allow_hyphen_values = true)]
    pub joints: Option<String>,

    /// 笛卡尔目标 `x,y,z`（mm，GRBL）
    #[arg(long, allow_hyphen_values = true)]
    pub xyz: Option<String>,

    /// 直线插补（仅 `--xyz`）
    #[arg(long, requires = "xyz")]
    pub linear: bool,

    /// 直线插补步长（mm）
    #[arg(long, default_value_t = 5.0)]
    pub step: f64,

    /// 速度
    #[arg(short, long, default_value_t = 50.0)]
    pub speed: f64,
}

/// 解析后的运动目标
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveTarget {
    Axes([f64; 3]),
    Joints([f64; 3]),
    Cartesian { target: [f64; 3], linear: bool },
}

impl MoveCommand {
    /// 解析运动目标
    pub fn target(&self) -> Result<MoveTarget> {
        if let Some(text) = &self.axes {
            return Ok(MoveTarget::Axes(parse_triple(text).context("--axes")?));
        }
        if let Some(text) = &self.joints {
            return Ok(MoveTarget::Joints(parse_triple(text).context("--joints")?));
        }
        if let Some(text) = &self.xyz {
            return Ok(MoveTarget::Cartesian {
                target: parse_triple(text).context("--xyz")?,
                linear: self.linear,
            });
        }
        anyhow::bail!("未指定运动目标，请使用 --axes、--joints 或 --xyz")
    }

    pub fn execute(&self, driver: &RobotArmDriver) -> Result<()> {
        validate_speed(self.speed)?;
        match self.target()? {
            MoveTarget::Axes([x, y, z]) => {
                println!("➡️  移动到 X{:.2} Y{:.2} Z{:.2}", x, y, z);
                driver.move_to(x, y, z, self.speed)?;
            },
            MoveTarget::Joints([j1, j2, j3]) => {
                println!("➡️  关节运动到 ({:.2}, {:.2}, {:.2})°", j1, j2, j3);
                driver.move_to_joints(j1, j2, j3, self.speed)?;
            },
            MoveTarget::Cartesian {
                target: [x, y, z],
                linear: false,
            } => {
                println!("➡️  移动到 X{:.2} Y{:.2} Z{:.2} mm", x, y, z);
                driver.move_to_xyz(x, y, z, self.speed)?;
            },
            MoveTarget::Cartesian {
                target: [x, y, z],
                linear: true,
            } => {
                if !(self.step.is_finite() && self.step > 0.0) {
                    anyhow::bail!("步长必须为正数，得到: {}", self.step);
                }
                println!(
                    "➡️  直线插补到 X{:.2} Y{:.2} Z{:.2} mm（步长 {} mm）",
                    x, y, z, self.step
                );
                driver.move_to_xyz_linear(x, y, z, self.speed, self.step)?;
            },
        }
        println!("✅ 位置: {}", driver.status().position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> MoveCommand {
        MoveCommand {
            axes: None,
            joints: None,
            xyz: None,
            linear: false,
            step: 5.0,
            speed: 50.0,
        }
    }

    #[test]
    fn test_axes_target() {
        let cmd = MoveCommand {
            axes: Some("10,-20,30".into()),
            ..command()
        };
        assert_eq!(cmd.target().unwrap(), MoveTarget::Axes([10.0, -20.0, 30.0]));
    }

    #[test]
    fn test_linear_cartesian_target() {
        let cmd = MoveCommand {
            xyz: Some("200,0,150".into()),
            linear: true,
            ..command()
        };
        assert_eq!(
            cmd.target().unwrap(),
            MoveTarget::Cartesian {
                target: [200.0, 0.0, 150.0],
                linear: true
            }
        );
    }

    #[test]
    fn test_missing_target() {
        assert!(command().target().is_err());
    }

    #[test]
    fn test_bad_triple() {
        let cmd = MoveCommand {
            joints: Some("1,2".into()),
            ..command()
        };
        assert!(cmd.target().is_err());
    }
}
