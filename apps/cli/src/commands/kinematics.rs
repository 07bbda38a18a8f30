//! fk / ik 命令（离线计算，不连接设备）

use anyhow::Result;
use armlink_sdk::kinematics::elbow_position;
use armlink_sdk::prelude::*;
use armlink_sdk::{forward_kinematics, inverse_kinematics};
use clap::Args;

/// 正运动学参数
#[derive(Args, Debug)]
pub struct FkCommand {
    /// 底座角 J1（度）
    #[arg(allow_negative_numbers = true)]
    pub j1: f64,
    /// 肩角 J2（度）
    #[arg(allow_negative_numbers = true)]
    pub j2: f64,
    /// 肘角 J3（度）
    #[arg(allow_negative_numbers = true)]
    pub j3: f64,
}

impl FkCommand {
    pub fn execute(&self, robot: &RobotConfig) -> Result<()> {
        let end = forward_kinematics(self.j1, self.j2, self.j3, robot);
        let elbow = elbow_position(self.j1, self.j2, robot);
        println!(
            "关节 ({:.2}, {:.2}, {:.2})°",
            self.j1, self.j2, self.j3
        );
        println!("  末端: X{:.2} Y{:.2} Z{:.2} mm", end.x, end.y, end.z);
        println!("  肘部: X{:.2} Y{:.2} Z{:.2} mm", elbow.x, elbow.y, elbow.z);
        Ok(())
    }
}

/// 逆运动学参数
#[derive(Args, Debug)]
pub struct IkCommand {
    #[arg(allow_negative_numbers = true)]
    pub x: f64,
    #[arg(allow_negative_numbers = true)]
    pub y: f64,
    #[arg(allow_negative_numbers = true)]
    pub z: f64,

    /// 肘部朝下的解
    #[arg(long)]
    pub elbow_down: bool,
}

impl IkCommand {
    pub fn execute(&self, robot: &RobotConfig) -> Result<()> {
        let joints = inverse_kinematics(self.x, self.y, self.z, robot, !self.elbow_down);
        if !joints.valid {
            match joints.error {
                Some(reason) => anyhow::bail!("目标不可达: {}", reason),
                None => anyhow::bail!("目标不可达"),
            }
        }
        println!(
            "目标 X{:.2} Y{:.2} Z{:.2} mm",
            self.x, self.y, self.z
        );
        println!(
            "  关节: J1={:.2}° J2={:.2}° J3={:.2}°",
            joints.j1, joints.j2, joints.j3
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fk_default_geometry() {
        let cmd = FkCommand {
            j1: 0.0,
            j2: 45.0,
            j3: 0.0,
        };
        assert!(cmd.execute(&RobotConfig::default()).is_ok());
    }

    #[test]
    fn test_ik_unreachable_is_error() {
        let cmd = IkCommand {
            x: 10_000.0,
            y: 0.0,
            z: 0.0,
            elbow_down: false,
        };
        let err = cmd.execute(&RobotConfig::default()).unwrap_err();
        assert!(err.to_string().contains("too far"));
    }
}
