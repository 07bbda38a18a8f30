//! 诊断模式
//!
//! 诊断工具需要直接读写串口。[`DiagnosticSession`] 在整个会话期间：
//!
//! - 暂停状态轮询（轮询线程跳过每一次 tick）
//! - 持有传输门，其他命令在会话结束前排队等待
//! - Drop 时释放门并恢复轮询，无论工具以何种方式退出

use crate::driver::{DriverShared, RobotArmDriver};
use crate::error::DriverError;
use crate::state::DeviceState;
use armlink_serial::TransportGuard;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::Ordering;
use tracing::{info, warn};

/// 诊断会话（RAII）
pub struct DiagnosticSession<'a> {
    shared: &'a DriverShared,
    guard: TransportGuard<'a>,
    probing: bool,
}

impl RobotArmDriver {
    /// 进入诊断模式
    ///
    /// 等待一个排空窗口让进行中的交换结束，然后取得传输门。
    /// 门可重入：持有会话的线程仍可调用驱动命令（如 `check_endstops`），
    /// 其他线程的命令等到会话结束。
    ///
    /// # 错误
    ///
    /// - `DiagnosticsBusy`: 已有诊断会话
    /// - `InvalidInput`: 程序或示教回放正在运行
    /// - `NotConnected`: 设备未连接
    pub fn enter_diagnostics(&self) -> Result<DiagnosticSession<'_>, DriverError> {
        let shared: &DriverShared = &self.shared;
        shared.ensure_connected()?;
        if matches!(shared.state(), DeviceState::Running | DeviceState::Paused) {
            return Err(DriverError::InvalidInput(
                "stop the running program before entering diagnostics".into(),
            ));
        }
        if shared
            .diagnostics_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DriverError::DiagnosticsBusy);
        }

        info!("[{}] Entering diagnostic mode", shared.id());
        std::thread::sleep(shared.config.timing.diagnostics_drain());
        let probing = shared.transition(DeviceState::Idle, DeviceState::Probing);
        let guard = shared.transport.lock();

        Ok(DiagnosticSession {
            shared,
            guard,
            probing,
        })
    }

    /// 是否有诊断会话
    pub fn in_diagnostics(&self) -> bool {
        self.shared.diagnostics_active.load(Ordering::Acquire)
    }
}

impl<'a> DiagnosticSession<'a> {
    /// 设备 ID
    pub fn device_id(&self) -> &str {
        self.shared.id()
    }

    /// 会话持有的传输门
    pub fn transport(&mut self) -> &mut TransportGuard<'a> {
        &mut self.guard
    }
}

impl<'a> Deref for DiagnosticSession<'a> {
    type Target = TransportGuard<'a>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for DiagnosticSession<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

// 传输门随字段一起在 drop 之后释放
impl Drop for DiagnosticSession<'_> {
    fn drop(&mut self) {
        if self.probing {
            self.shared
                .transition(DeviceState::Probing, DeviceState::Idle);
        }
        self.shared
            .diagnostics_active
            .store(false, Ordering::Release);
        if std::thread::panicking() {
            warn!("[{}] Diagnostic session ended by panic", self.shared.id());
        }
        info!(
            "[{}] Left diagnostic mode; tracked position may be stale",
            self.shared.id()
        );
    }
}
