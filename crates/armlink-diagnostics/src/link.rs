//! 工具与串口之间的共享部分
//!
//! 工具只使用传输契约：写一行、读到终止行或超时。它们从调用方借用一个
//! [`TransportGuard`]（通常来自驱动的诊断会话），整个运行期间独占串口。

use crate::log::{DiagnosticLog, LogEntry, LogKind};
use armlink_serial::{Framing, ReadOptions, SerialError, TransportGuard};
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// 分段睡眠的粒度，用于及时观察取消标志
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// 运行控制：取消标志与实时日志订阅
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    cancel: Arc<AtomicBool>,
    sink: Option<Sender<LogEntry>>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用外部取消标志（例如 Ctrl-C 处理器持有的同一个标志）
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// 实时接收日志条目
    pub fn with_sink(mut self, sink: Sender<LogEntry>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 取消标志的句柄
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// 请求取消（协作式：进行中的单次交换会完成）
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// 工具步骤之间的停顿
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    /// 连续两步之间
    pub step: Duration,
    /// 阶段切换（换轴、换方向、回零）之后
    pub settle: Duration,
}

impl Pacing {
    /// 无停顿（测试和模拟固件使用）
    pub const fn immediate() -> Self {
        Self {
            step: Duration::ZERO,
            settle: Duration::ZERO,
        }
    }
}

/// 当前 Unix 时间（毫秒）
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// 单次运行的串口句柄
pub(crate) struct ToolLink<'a, 'g> {
    guard: &'a mut TransportGuard<'g>,
    control: &'a RunControl,
    framing: Framing,
    pub(crate) log: DiagnosticLog,
}

impl<'a, 'g> ToolLink<'a, 'g> {
    pub(crate) fn new(
        guard: &'a mut TransportGuard<'g>,
        control: &'a RunControl,
        framing: Framing,
    ) -> Self {
        Self {
            guard,
            control,
            framing,
            log: DiagnosticLog::new(control.sink.clone()),
        }
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    /// 发送一行并读取响应，返回响应与往返耗时
    ///
    /// 已取消时不发送，返回空响应。
    pub(crate) fn send_timed(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<(String, Duration), SerialError> {
        if self.cancelled() {
            return Ok((String::new(), Duration::ZERO));
        }
        let opts = ReadOptions::new(timeout)
            .framing(self.framing)
            .cancel(self.control.cancel_flag());
        let exchange = self.guard.exchange_with(command.trim(), &opts)?;
        let ms = exchange.elapsed.as_secs_f64() * 1000.0;
        self.log.push(
            LogEntry::new(LogKind::Cmd, command.trim())
                .response(&exchange.response)
                .ms(ms),
        );
        Ok((exchange.response, exchange.elapsed))
    }

    pub(crate) fn send(&mut self, command: &str, timeout: Duration) -> Result<String, SerialError> {
        self.send_timed(command, timeout).map(|(response, _)| response)
    }

    /// 读取窗口内主动输出的全部行（如上电欢迎语）
    pub(crate) fn drain(&mut self, window: Duration) -> Result<String, SerialError> {
        if self.cancelled() {
            return Ok(String::new());
        }
        let text = self.guard.drain(window)?;
        self.log
            .push(LogEntry::new(LogKind::Cmd, "(unsolicited)").response(&text));
        Ok(text)
    }

    /// 可取消的停顿，被取消时返回 `false`
    pub(crate) fn pause(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    pub(crate) fn into_log(self) -> DiagnosticLog {
        self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armlink_protocol::Dialect;
    use armlink_serial::SerialTransport;
    use armlink_serial::mock::MockFirmware;

    #[test]
    fn test_cancelled_link_sends_nothing() {
        let fw = MockFirmware::new(|cmd| vec![format!("INFO: {cmd}")]);
        let transport = SerialTransport::from_link(fw.link(), Dialect::Legacy, Default::default());
        let mut guard = transport.lock();
        let control = RunControl::new();
        let mut link = ToolLink::new(&mut guard, &control, Framing::Dialect(Dialect::Legacy));

        assert_eq!(link.send("M119", Duration::from_millis(200)).unwrap(), "INFO: M119");
        control.cancel();
        assert_eq!(link.send("M17", Duration::from_millis(200)).unwrap(), "");
        assert!(!link.pause(Duration::from_secs(5)));
        assert_eq!(fw.written(), vec!["M119"]);
        assert_eq!(link.into_log().entries().len(), 1);
    }

    #[test]
    fn test_shared_cancel_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let control = RunControl::new().with_cancel(Arc::clone(&flag));
        flag.store(true, Ordering::Release);
        assert!(control.is_cancelled());
    }
}
