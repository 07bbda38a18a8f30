//! G-code 程序加载与后台执行

use crate::driver::{DriverShared, RobotArmDriver};
use crate::error::DriverError;
use crate::events::DeviceEvent;
use crate::state::DeviceState;
use armlink_protocol::{Dialect, grbl, is_not_recognized};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 暂停时检查标志的间隔
const PAUSE_POLL: Duration = Duration::from_millis(50);

/// 已去掉注释与空行的 G-code 程序
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcodeProgram {
    name: String,
    lines: Vec<String>,
}

impl GcodeProgram {
    /// 解析程序文本
    ///
    /// `;` 之后的内容与 `( ... )` 注释被移除，空行被丢弃。
    pub fn parse(name: impl Into<String>, text: &str) -> Self {
        let lines = text
            .lines()
            .map(strip_comments)
            .filter(|line| !line.is_empty())
            .collect();
        Self {
            name: name.into(),
            lines,
        }
    }

    /// 从文件加载
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(path.display().to_string(), &text))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// 移除一行中的注释并去掉首尾空白
pub fn strip_comments(line: &str) -> String {
    let code = line.split(';').next().unwrap_or_default();

    let mut out = String::with_capacity(code.len());
    let mut rest = code;
    while let Some(open) = rest.find('(') {
        let Some(close) = rest[open..].find(')') else {
            break;
        };
        out.push_str(&rest[..open]);
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);
    out.trim().to_string()
}

impl RobotArmDriver {
    /// 加载程序文件
    ///
    /// # 错误
    ///
    /// 文件无法读取时返回 `Io`，设备状态不变。
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<(), DriverError> {
        let program = GcodeProgram::load(path)?;
        info!(
            "[{}] Program loaded: {} ({} lines)",
            self.id(),
            program.name(),
            program.len()
        );

        let name = program.name().to_string();
        let total = program.len();
        self.shared.update_status(|s| {
            s.current_file = Some(name.clone());
            s.total_lines = total;
            s.current_line = 0;
            s.progress = 0.0;
        });
        *self.program.lock() = Some(Arc::new(program));
        Ok(())
    }

    /// 当前加载的程序
    pub fn program(&self) -> Option<Arc<GcodeProgram>> {
        self.program.lock().clone()
    }

    /// 从 `from_line`（0 起）开始在后台执行程序
    ///
    /// 已有的执行会先被取消并等待退出。
    ///
    /// # 错误
    ///
    /// - `NoProgram`: 没有加载程序
    /// - `InAlarm`: 设备处于报警状态
    /// - `NotConnected`: 设备未连接
    pub fn run(&self, from_line: usize) -> Result<(), DriverError> {
        let program = self.program().ok_or(DriverError::NoProgram)?;
        let shared = &self.shared;
        if shared.state() == DeviceState::Alarm {
            let message = shared.status().error_message.unwrap_or_default();
            return Err(DriverError::InAlarm(message));
        }
        shared.ensure_connected()?;

        self.stop_runner();
        let flag = shared.begin_job();
        shared.set_state(DeviceState::Running);

        let worker_shared = Arc::clone(shared);
        let worker_flag = Arc::clone(&flag);
        let spawned = std::thread::Builder::new()
            .name(format!("armlink-run-{}", shared.id()))
            .spawn(move || run_program(&worker_shared, &program, from_line, &worker_flag));

        match spawned {
            Ok(handle) => {
                *self.runner.lock() = Some(handle);
                Ok(())
            },
            Err(e) => {
                shared.finish_job(&flag);
                shared.settle_idle();
                Err(e.into())
            },
        }
    }

    /// 暂停程序（GRBL 同时发送进给保持 `!`）
    pub fn pause(&self) -> Result<(), DriverError> {
        let shared = &self.shared;
        shared.paused.store(true, Ordering::Release);
        shared.transition(DeviceState::Running, DeviceState::Paused);
        if shared.dialect() == Dialect::Grbl {
            shared.write_realtime(grbl::FEED_HOLD)?;
        }
        info!("[{}] Paused", shared.id());
        Ok(())
    }

    /// 继续程序（GRBL 同时发送循环启动 `~`）
    pub fn resume(&self) -> Result<(), DriverError> {
        let shared = &self.shared;
        shared.paused.store(false, Ordering::Release);
        shared.transition(DeviceState::Paused, DeviceState::Running);
        if shared.dialect() == Dialect::Grbl {
            shared.write_realtime(grbl::CYCLE_START)?;
        }
        info!("[{}] Resumed", shared.id());
        Ok(())
    }

    /// 停止程序与示教回放
    ///
    /// 正在进行的单次交换会先完成。GRBL 额外发送软复位 0x18 立即停止运动。
    pub fn stop(&self) -> Result<(), DriverError> {
        let shared = &self.shared;
        shared.cancel_job();
        shared.paused.store(false, Ordering::Release);

        let result = if shared.dialect() == Dialect::Grbl && shared.is_connected() {
            shared.write_realtime(grbl::SOFT_RESET)
        } else {
            Ok(())
        };

        self.stop_runner();
        shared.settle_idle();
        info!("[{}] Stopped", shared.id());
        result
    }

    /// 清除报警与错误信息，回到 Idle（GRBL 发送 `$X` 解锁）
    pub fn reset(&self) -> Result<(), DriverError> {
        let shared = &self.shared;
        if shared.dialect() == Dialect::Grbl && shared.is_connected() {
            let response = shared.exchange(grbl::UNLOCK)?;
            shared.check_response(&response)?;
        }

        shared.update_status(|s| s.error_message = None);
        if shared.is_connected() {
            shared.set_state(DeviceState::Idle);
        }
        info!("[{}] Reset", shared.id());
        Ok(())
    }
}

/// 程序执行循环（后台线程）
fn run_program(shared: &DriverShared, program: &GcodeProgram, from_line: usize, flag: &Arc<AtomicBool>) {
    let total = program.len();
    let mut index = from_line.min(total);
    info!(
        "[{}] Running {} from line {} ({} lines)",
        shared.id(),
        program.name(),
        index + 1,
        total
    );
    shared.update_status(|s| s.current_line = index);

    while flag.load(Ordering::Acquire) && index < total {
        while shared.paused.load(Ordering::Acquire) && flag.load(Ordering::Acquire) {
            spin_sleep::sleep(PAUSE_POLL);
        }
        if !flag.load(Ordering::Acquire) {
            break;
        }

        let line = &program.lines()[index];
        if let Err(message) = execute_line(shared, line) {
            shared.set_error(format!("G-code error (line {}): {}", index + 1, message));
            break;
        }

        spin_sleep::sleep(shared.config.timing.line_settle());

        index += 1;
        let progress = index as f64 / total as f64 * 100.0;
        shared.update_status(|s| {
            s.current_line = index;
            s.progress = progress;
        });
        shared.events.publish(DeviceEvent::JobProgress {
            progress,
            current_line: index,
            total_lines: total,
        });
    }

    if index >= total {
        shared.update_status(|s| s.progress = 100.0);
        shared.events.publish(DeviceEvent::JobComplete {
            file: program.name().to_string(),
        });
        info!("[{}] Program complete: {}", shared.id(), program.name());
    } else {
        debug!("[{}] Program stopped at line {}", shared.id(), index + 1);
    }

    shared.finish_job(flag);
    shared.settle_idle();
}

/// 发送一行；不支持的命令跳过，其他错误返回错误文本
fn execute_line(shared: &DriverShared, line: &str) -> Result<(), String> {
    let mapped = shared.transform.remap_gcode(line);
    let response = shared.exchange(&mapped).map_err(|e| e.to_string())?;

    match shared.check_response(&response) {
        Ok(()) => Ok(()),
        Err(DriverError::FirmwareError(message)) => {
            if is_not_recognized(&response) {
                info!("[{}] Skipped unsupported line: {}", shared.id(), line);
                Ok(())
            } else {
                Err(message)
            }
        },
        Err(e) => {
            warn!("[{}] No response to {:?}", shared.id(), mapped);
            Err(e.to_string())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_comments() {
        assert_eq!(strip_comments("G1 X10 ; move"), "G1 X10");
        assert_eq!(strip_comments("(header) G1 X10 (inline) Y5"), "G1 X10  Y5");
        assert_eq!(strip_comments("; only comment"), "");
        assert_eq!(strip_comments("  M3 S90  "), "M3 S90");
        // 未闭合的括号保留
        assert_eq!(strip_comments("G1 (X10"), "G1 (X10");
    }

    #[test]
    fn test_parse_program_drops_blank_lines() {
        let text = "; header\nG90\n\n(setup)\nG1 X10 Y0 Z0 F50 ; first\nM10\n";
        let program = GcodeProgram::parse("job.gcode", text);
        assert_eq!(program.name(), "job.gcode");
        assert_eq!(program.lines(), ["G90", "G1 X10 Y0 Z0 F50", "M10"]);
        assert_eq!(program.len(), 3);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pick.gcode");
        fs::write(&path, "G1 X1 Y2 Z3 F20\r\nM11\r\n").unwrap();

        let program = GcodeProgram::load(&path).unwrap();
        assert_eq!(program.lines(), ["G1 X1 Y2 Z3 F20", "M11"]);
        assert!(program.name().ends_with("pick.gcode"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = GcodeProgram::load("/nonexistent/job.gcode").unwrap_err();
        assert!(matches!(err, DriverError::Io(_)));
    }
}
