//! 示教：记录位置与末端执行器状态，按顺序回放

use crate::driver::RobotArmDriver;
use crate::error::DriverError;
use crate::state::DeviceState;
use crate::status::{GripperState, TaughtPosition};
use crate::workers::sleep_while;
use std::sync::atomic::Ordering;
use tracing::info;

impl RobotArmDriver {
    /// 记录当前逻辑位置与末端执行器状态
    pub fn teach_record_position(&self) -> TaughtPosition {
        let status = self.status();
        let mut taught = self.taught.lock();
        let record = TaughtPosition {
            index: taught.len(),
            x: status.position.x,
            y: status.position.y,
            z: status.position.z,
            gripper: status.gripper_state,
            sucker: status.sucker_state,
        };
        info!(
            "[{}] Recorded position #{}: {}",
            self.id(),
            record.index,
            record.position()
        );
        taught.push(record.clone());
        record
    }

    /// 按顺序回放记录的位置（阻塞直到完成或被 `stop()` 取消）
    ///
    /// 每一步：运动到位置，设置夹爪与吸盘，等待固定的稳定时间。
    ///
    /// # 错误
    ///
    /// 任一步失败时中止回放并进入 Alarm，已执行的步骤不回滚。
    pub fn teach_play(&self, speed: f64) -> Result<(), DriverError> {
        let positions = self.teach_positions();
        if positions.is_empty() {
            return Err(DriverError::InvalidInput("no taught positions".into()));
        }
        let shared = &self.shared;
        if shared.state() == DeviceState::Alarm {
            let message = shared.status().error_message.unwrap_or_default();
            return Err(DriverError::InAlarm(message));
        }
        shared.ensure_connected()?;

        self.stop_runner();
        let flag = shared.begin_job();
        shared.set_state(DeviceState::Running);
        info!(
            "[{}] Playing {} taught positions",
            shared.id(),
            positions.len()
        );

        let mut result = Ok(());
        for record in &positions {
            if !flag.load(Ordering::Acquire) {
                info!("[{}] Playback stopped at #{}", shared.id(), record.index);
                break;
            }
            if let Err(e) = self.play_step(record, speed) {
                // 串口错误在运动命令内部已经报告过
                if shared.state() != DeviceState::Alarm {
                    shared.set_error(format!("Teach playback error (#{}): {}", record.index, e));
                }
                result = Err(e);
                break;
            }
            sleep_while(&flag, shared.config.timing.teach_settle());
        }

        shared.finish_job(&flag);
        shared.settle_idle();
        result
    }

    fn play_step(&self, record: &TaughtPosition, speed: f64) -> Result<(), DriverError> {
        self.move_to(record.x, record.y, record.z, speed)?;
        match record.gripper {
            GripperState::Closed => self.gripper_on()?,
            GripperState::Open => self.gripper_off()?,
            GripperState::Unknown => {},
        }
        if record.sucker {
            self.sucker_on()
        } else {
            self.sucker_off()
        }
    }

    /// 清空记录
    pub fn teach_clear(&self) {
        self.taught.lock().clear();
        info!("[{}] Taught positions cleared", self.id());
    }

    /// 记录的位置（副本）
    pub fn teach_positions(&self) -> Vec<TaughtPosition> {
        self.taught.lock().clone()
    }
}
