//! GRBL 方言的机械臂扩展
//!
//! GRBL 把三个关节当作普通轴驱动：X = J2（肩），Y = J3（肘），Z = J1（底座）。
//! 关节运动直接以度为单位发送，不经过逻辑轴变换；笛卡尔运动先做逆运动学。

use crate::driver::{BANNER_WINDOW, DriverShared, FirmwareKind, RobotArmDriver};
use crate::error::DriverError;
use crate::events::DeviceEvent;
use crate::state::DeviceState;
use crate::status::{DeviceCapabilities, Position};
use armlink_kinematics::{
    CartesianPosition, JointAngles, LinearPath, forward_kinematics, inverse_kinematics,
};
use armlink_protocol::{
    ArmCommand, AxisValues, Dialect, GrblSettings, GrblState, ProtocolError, grbl,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 关节
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Joint {
    /// 底座旋转
    J1,
    /// 肩
    J2,
    /// 肘
    J3,
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Joint::J1 => "J1",
            Joint::J2 => "J2",
            Joint::J3 => "J3",
        };
        f.write_str(name)
    }
}

impl FromStr for Joint {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "J1" | "1" => Ok(Joint::J1),
            "J2" | "2" => Ok(Joint::J2),
            "J3" | "3" => Ok(Joint::J3),
            other => Err(DriverError::InvalidInput(format!("unknown joint {:?}", other))),
        }
    }
}

/// GRBL 机械臂状态
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmStatus {
    pub state: DeviceState,
    pub grbl_state: GrblState,
    /// 机器坐标（度）
    pub machine_position: AxisValues<f64>,
    pub joints: JointAngles,
    /// 末端位置（正运动学）
    pub cartesian: CartesianPosition,
}

impl DriverShared {
    /// GRBL 握手：软复位、读取 `$$` 设置、查询一次状态
    pub(crate) fn handshake_grbl(&self, firmware: FirmwareKind) -> Result<(), DriverError> {
        self.write_realtime(grbl::SOFT_RESET)?;
        std::thread::sleep(self.config.timing.zero_settle());
        let banner = self.transport.drain_input(BANNER_WINDOW)?;
        if !banner.contains("Grbl") && firmware != FirmwareKind::Grbl {
            warn!(
                "[{}] No Grbl banner after soft reset, continuing best-effort",
                self.id()
            );
        }

        let response = self.exchange(grbl::SETTINGS_DUMP)?;
        self.check_response(&response)?;
        let settings = GrblSettings::parse(&response);
        if settings.is_empty() {
            warn!("[{}] `$$` returned no settings", self.id());
        } else {
            info!("[{}] Loaded {} GRBL settings", self.id(), settings.len());
        }
        self.capabilities.rcu(|current| {
            let mut next = DeviceCapabilities::clone(current);
            next.apply_grbl_settings(&settings);
            next
        });
        self.grbl_settings.store(Arc::new(settings));

        if let Err(e) = self.query_grbl_status() {
            debug!("[{}] Initial status query failed: {}", self.id(), e);
        }
        Ok(())
    }

    /// `?` 状态查询，更新位置、关节角与状态
    ///
    /// 程序或示教运行期间只接受固件报警，不覆盖运行状态；
    /// 驱动自己的 Alarm 不会被固件的其他状态清除。
    pub(crate) fn query_grbl_status(&self) -> Result<ArmStatus, DriverError> {
        self.ensure_connected()?;
        let response = self
            .transport
            .query_realtime(grbl::STATUS_QUERY, self.config.response_timeout())?;
        let report = match grbl::parse_status(&response)? {
            Some(report) => report,
            None if response.trim().is_empty() => return Err(DriverError::Timeout),
            None => return Err(ProtocolError::UnexpectedResponse(response).into()),
        };

        let joints = JointAngles::from_grbl_axes(report.machine_position);
        *self.joints.lock() = joints;
        let cartesian = forward_kinematics(joints.j1, joints.j2, joints.j3, &self.config.robot);

        let position = Position::from_axes(self.transform.map_incoming(report.machine_position));
        let work_position = report
            .work_position
            .map(|w| Position::from_axes(self.transform.map_incoming(w)))
            .unwrap_or(position);
        let moved = self.status().position != position;
        self.update_status(|s| {
            s.position = position;
            s.work_position = work_position;
        });
        if moved {
            self.events.publish(DeviceEvent::PositionUpdated(position));
        }

        self.apply_grbl_state(report.state);

        Ok(ArmStatus {
            state: self.state(),
            grbl_state: report.state,
            machine_position: report.machine_position,
            joints,
            cartesian,
        })
    }

    fn apply_grbl_state(&self, grbl_state: GrblState) {
        let mapped = DeviceState::from_grbl(grbl_state);
        let current = self.state();
        if mapped == current
            || matches!(current, DeviceState::Connecting | DeviceState::Disconnected)
        {
            return;
        }
        if mapped == DeviceState::Alarm {
            self.set_error(format!("Firmware reported {} state", grbl_state));
            return;
        }
        let settled = matches!(
            current,
            DeviceState::Idle
                | DeviceState::Jog
                | DeviceState::Homing
                | DeviceState::Running
                | DeviceState::Paused
        );
        if settled && !self.job_active() {
            self.transition(current, mapped);
        }
    }

    /// 发送关节目标（`G1 X{j2} Y{j3} Z{j1} F{speed}`）
    fn send_joint_target(&self, joints: JointAngles, speed: f64) -> Result<(), DriverError> {
        self.require_dialect(Dialect::Grbl)?;
        if ![joints.j1, joints.j2, joints.j3].iter().all(|v| v.is_finite()) {
            return Err(DriverError::InvalidInput(format!(
                "non-finite joint target {:?}",
                joints
            )));
        }
        let target = joints.to_grbl_axes();
        let command = ArmCommand::LinearMove {
            target,
            feed: self.feed_for(speed),
        };
        let response = self.exchange(&command.to_wire())?;
        self.check_response(&response)?;
        self.confirm_grbl_target(target);
        Ok(())
    }
}

impl RobotArmDriver {
    /// 关节空间运动（度）
    ///
    /// # 错误
    ///
    /// Legacy 方言返回 `UnsupportedDialect`。
    pub fn move_to_joints(&self, j1: f64, j2: f64, j3: f64, speed: f64) -> Result<(), DriverError> {
        let result = self
            .shared
            .send_joint_target(JointAngles::new(j1, j2, j3), speed);
        self.shared.report("Joint move", result)
    }

    /// 笛卡尔目标（mm），逆运动学后做关节插补运动
    ///
    /// # 错误
    ///
    /// 目标不可达时返回 `Unreachable`（附运动学原因），不发送任何运动。
    pub fn move_to_xyz(&self, x: f64, y: f64, z: f64, speed: f64) -> Result<(), DriverError> {
        self.shared.require_dialect(Dialect::Grbl)?;
        let joints = self.solve(CartesianPosition::new(x, y, z))?;
        self.move_to_joints(joints.j1, joints.j2, joints.j3, speed)
    }

    /// 笛卡尔直线运动
    ///
    /// 从当前关节角的正运动学位置出发，按 `step` 毫米插补，每个点单独求逆解。
    /// 遇到第一个不可达点即中止，已执行的点不回滚。
    pub fn move_to_xyz_linear(
        &self,
        x: f64,
        y: f64,
        z: f64,
        speed: f64,
        step: f64,
    ) -> Result<(), DriverError> {
        let shared = &self.shared;
        shared.require_dialect(Dialect::Grbl)?;
        if !(step.is_finite() && step > 0.0) {
            return Err(DriverError::InvalidInput(format!("invalid step size {}", step)));
        }

        let start = self.cartesian_position();
        let end = CartesianPosition::new(x, y, z);
        let path = LinearPath::new(start, end, step);
        debug!(
            "[{}] Linear path {:?} -> {:?} in {} steps",
            shared.id(),
            start,
            end,
            path.total_steps()
        );

        for (i, point) in path.enumerate() {
            let joints = self.solve(point).map_err(|e| {
                warn!("[{}] Linear path aborted at step {}: {}", shared.id(), i, e);
                e
            })?;
            self.move_to_joints(joints.j1, joints.j2, joints.j3, speed)?;
        }
        Ok(())
    }

    /// 单关节相对运动（基于跟踪的关节角）
    pub fn jog_joint(&self, joint: Joint, delta: f64, speed: f64) -> Result<(), DriverError> {
        self.shared.require_dialect(Dialect::Grbl)?;
        let mut joints = self.joints();
        match joint {
            Joint::J1 => joints.j1 += delta,
            Joint::J2 => joints.j2 += delta,
            Joint::J3 => joints.j3 += delta,
        }
        self.move_to_joints(joints.j1, joints.j2, joints.j3, speed)
    }

    /// 查询 GRBL 状态（`?`）
    pub fn grbl_status(&self) -> Result<ArmStatus, DriverError> {
        self.shared.require_dialect(Dialect::Grbl)?;
        self.shared.query_grbl_status()
    }

    /// 跟踪的关节角（最近一次确认的目标或状态报告）
    pub fn joints(&self) -> JointAngles {
        *self.shared.joints.lock()
    }

    /// 当前关节角对应的末端位置
    pub fn cartesian_position(&self) -> CartesianPosition {
        let joints = self.joints();
        forward_kinematics(joints.j1, joints.j2, joints.j3, &self.shared.config.robot)
    }

    /// `$$` 设置（GRBL 方言连接后可用）
    pub fn grbl_settings(&self) -> GrblSettings {
        GrblSettings::clone(&self.shared.grbl_settings.load())
    }

    fn solve(&self, target: CartesianPosition) -> Result<JointAngles, DriverError> {
        let joints = inverse_kinematics(target.x, target.y, target.z, &self.shared.config.robot, true);
        if joints.valid {
            Ok(joints)
        } else {
            Err(DriverError::Unreachable(
                joints.reason().unwrap_or_else(|| "unreachable".to_string()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joint_from_str() {
        assert_eq!("J1".parse::<Joint>().unwrap(), Joint::J1);
        assert_eq!("j2".parse::<Joint>().unwrap(), Joint::J2);
        assert_eq!("3".parse::<Joint>().unwrap(), Joint::J3);
        assert!("J4".parse::<Joint>().is_err());
        assert_eq!(Joint::J2.to_string(), "J2");
    }
}
