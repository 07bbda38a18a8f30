//! 门控串口传输
//!
//! 协议没有请求 ID，响应只能按“写一行、读到终止行”配对。
//! 因此每个设备只有一个门（互斥锁），所有交换都在持有门的情况下完成：
//! 两个并发命令的写入永远不会交错在线路上。
//!
//! ```text
//! 调用方 A ──┐
//!            ├─▶ [gate] ─▶ clear_input → write "cmd\r\n" → read until terminal/timeout
//! 调用方 B ──┘
//! ```

use crate::system::SystemConnector;
use crate::{SerialConnector, SerialError, SerialLink};
use armlink_protocol::{Dialect, frame_line};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::{RefCell, RefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// 单次 `read_line` 的最长等待，用于及时观察取消标志
const READ_POLL: Duration = Duration::from_millis(50);

/// 传输层时序
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportTiming {
    /// 默认响应超时
    pub response_timeout: Duration,
    /// `write_no_response` 写入后的固定等待
    pub write_settle: Duration,
    /// Legacy 终止行之后继续收集尾随行的静默窗口
    pub trailing_quiet: Duration,
}

impl Default for TransportTiming {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(2),
            write_settle: Duration::from_millis(100),
            trailing_quiet: Duration::from_millis(100),
        }
    }
}

/// 终止行判定方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// 使用传输配置的方言
    #[default]
    Transport,
    /// 固定方言
    Dialect(Dialect),
    /// 任一方言的终止行都结束响应（探测未知固件时使用）
    Any,
    /// GRBL 状态报告 `<...>` 行或任一终止行结束响应（实时 `?` 查询）
    StatusReport,
}

impl Framing {
    fn is_terminal(self, transport: Dialect, line: &str) -> bool {
        match self {
            Framing::Transport => transport.is_terminal_line(line),
            Framing::Dialect(d) => d.is_terminal_line(line),
            Framing::Any => {
                Dialect::Legacy.is_terminal_line(line) || Dialect::Grbl.is_terminal_line(line)
            },
            Framing::StatusReport => {
                (line.starts_with('<') && line.ends_with('>'))
                    || Framing::Any.is_terminal(transport, line)
            },
        }
    }
}

/// 单次交换的读取选项
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// 总超时
    pub timeout: Duration,
    /// 终止行之后的静默窗口（0 = 读到终止行立即返回）
    pub trailing_quiet: Duration,
    pub framing: Framing,
    /// 取消标志，置位后尽快返回已收集的内容
    pub cancel: Option<Arc<AtomicBool>>,
}

impl ReadOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    pub fn trailing_quiet(mut self, quiet: Duration) -> Self {
        self.trailing_quiet = quiet;
        self
    }

    pub fn framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// 一次交换的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// 响应文本（多行以 `\n` 连接；超时且无数据时为空）
    pub response: String,
    /// 从写入到响应结束的耗时
    pub elapsed: Duration,
    /// 是否收到了终止行
    pub terminated: bool,
}

type Slot = RefCell<Option<Box<dyn SerialLink>>>;

/// 门控串口传输
///
/// 内部可变，`&self` 即可使用，通常放在 `Arc` 中与轮询线程共享。
/// 门是可重入的：持有门的线程可以再次获取它（例如诊断会话中调用驱动命令），
/// 其他线程则等待门释放。
pub struct SerialTransport {
    link: ReentrantMutex<Slot>,
    dialect: Dialect,
    timing: TransportTiming,
}

impl SerialTransport {
    /// 创建未打开的传输
    pub fn new(dialect: Dialect) -> Self {
        Self::with_timing(dialect, TransportTiming::default())
    }

    pub fn with_timing(dialect: Dialect, timing: TransportTiming) -> Self {
        Self {
            link: ReentrantMutex::new(RefCell::new(None)),
            dialect,
            timing,
        }
    }

    /// 用已打开的链路创建传输（测试和自定义后端）
    pub fn from_link(link: Box<dyn SerialLink>, dialect: Dialect, timing: TransportTiming) -> Self {
        Self {
            link: ReentrantMutex::new(RefCell::new(Some(link))),
            dialect,
            timing,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn timing(&self) -> TransportTiming {
        self.timing
    }

    /// 打开真实串口
    pub fn open(&self, port: &str, baud_rate: u32, timeout: Duration) -> Result<(), SerialError> {
        self.open_with(&SystemConnector, port, baud_rate, timeout)
    }

    /// 通过指定的连接器打开
    ///
    /// 已打开的链路会先被关闭。
    pub fn open_with(
        &self,
        connector: &dyn SerialConnector,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<(), SerialError> {
        let link = connector.open(port, baud_rate, timeout)?;
        let guard = self.link.lock();
        let mut slot = guard.borrow_mut();
        if slot.is_some() {
            debug!("Replacing open serial link with {}", port);
        }
        *slot = Some(link);
        Ok(())
    }

    /// 关闭链路（等待进行中的交换结束）
    pub fn close(&self) {
        let guard = self.link.lock();
        let closed = guard.borrow_mut().take();
        if let Some(link) = closed {
            debug!("Closed serial link {}", link.name());
        }
    }

    pub fn is_open(&self) -> bool {
        self.link.lock().borrow().is_some()
    }

    /// 获取门，跨多次交换持有（诊断会话）
    ///
    /// 同一线程重复获取不会阻塞。
    pub fn lock(&self) -> TransportGuard<'_> {
        TransportGuard {
            link: self.link.lock(),
            dialect: self.dialect,
            timing: self.timing,
        }
    }

    /// 写一行并读取响应
    ///
    /// 超时不是错误：返回已收集的文本（没有任何数据时为空字符串）。
    /// Legacy 方言在终止行之后保留一个短静默窗口以收集尾随行。
    pub fn write_and_read(&self, command: &str, timeout: Duration) -> Result<String, SerialError> {
        self.lock().exchange(command, timeout)
    }

    /// 写一行，不等待响应（固定等待 `write_settle`）
    pub fn write_no_response(&self, command: &str) -> Result<(), SerialError> {
        self.lock().write_no_response(command)
    }

    /// 写实时控制字节（不加行终止符）
    pub fn write_realtime(&self, byte: u8) -> Result<(), SerialError> {
        self.lock().write_realtime(byte)
    }

    /// 写实时字节并读取一段响应（如 GRBL `?` 状态查询）
    pub fn query_realtime(&self, byte: u8, timeout: Duration) -> Result<String, SerialError> {
        let mut guard = self.lock();
        guard.write_realtime(byte)?;
        let opts = ReadOptions::new(timeout).framing(Framing::StatusReport);
        guard.read_response(&opts, Instant::now()).map(|e| e.response)
    }

    /// 收集窗口内到达的全部文本（开机欢迎语）
    pub fn drain_input(&self, window: Duration) -> Result<String, SerialError> {
        self.lock().drain(window)
    }
}

/// 持有门的传输句柄
///
/// Drop 时释放门。
pub struct TransportGuard<'a> {
    link: ReentrantMutexGuard<'a, Slot>,
    dialect: Dialect,
    timing: TransportTiming,
}

impl TransportGuard<'_> {
    /// 借出链路，只在单个操作内持有
    fn link(&self) -> Result<RefMut<'_, Box<dyn SerialLink>>, SerialError> {
        RefMut::filter_map(self.link.borrow_mut(), Option::as_mut)
            .map_err(|_| SerialError::NotOpen)
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn is_open(&self) -> bool {
        self.link.borrow().is_some()
    }

    fn send_line(&mut self, command: &str) -> Result<(), SerialError> {
        let framed = frame_line(command);
        let mut link = self.link()?;
        link.clear_input()?;
        link.write_all(framed.as_bytes())?;
        link.flush()
    }

    /// 写一行并按传输方言读取响应
    pub fn exchange(&mut self, command: &str, timeout: Duration) -> Result<String, SerialError> {
        let quiet = match self.dialect {
            Dialect::Legacy => self.timing.trailing_quiet,
            Dialect::Grbl => Duration::ZERO,
        };
        let opts = ReadOptions::new(timeout).trailing_quiet(quiet);
        self.exchange_with(command, &opts).map(|e| e.response)
    }

    /// 写一行并按指定选项读取响应，同时测量延迟
    pub fn exchange_with(
        &mut self,
        command: &str,
        opts: &ReadOptions,
    ) -> Result<Exchange, SerialError> {
        self.send_line(command)?;
        let started = Instant::now();
        let exchange = self.read_response(opts, started)?;
        trace!(
            "{} -> {:?} ({} ms)",
            command.trim(),
            exchange.response,
            exchange.elapsed.as_millis()
        );
        Ok(exchange)
    }

    /// 写一行，等待固定时间，不读取
    pub fn write_no_response(&mut self, command: &str) -> Result<(), SerialError> {
        self.send_line(command)?;
        std::thread::sleep(self.timing.write_settle);
        Ok(())
    }

    /// 写单个实时字节
    pub fn write_realtime(&mut self, byte: u8) -> Result<(), SerialError> {
        let mut link = self.link()?;
        link.write_all(&[byte])?;
        link.flush()
    }

    /// 收集窗口内到达的全部行
    pub fn drain(&mut self, window: Duration) -> Result<String, SerialError> {
        let deadline = Instant::now() + window;
        let mut link = self.link()?;
        let mut lines = Vec::new();
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if let Some(line) = link.read_line(deadline - now)? {
                lines.push(line);
            }
        }
        Ok(lines.join("\n"))
    }

    /// 读取一条响应（不写入）
    ///
    /// 读到终止行后，若 `trailing_quiet > 0`，继续读取直到静默窗口内无新行。
    pub fn read_response(
        &mut self,
        opts: &ReadOptions,
        started: Instant,
    ) -> Result<Exchange, SerialError> {
        let dialect = self.dialect;
        let mut link = self.link()?;
        let deadline = started + opts.timeout;
        let mut lines: Vec<String> = Vec::new();
        let mut terminated = false;

        while !opts.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let Some(line) = link.read_line((deadline - now).min(READ_POLL))? else {
                continue;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            lines.push(line.to_string());
            if opts.framing.is_terminal(dialect, line) {
                terminated = true;
                break;
            }
        }

        if terminated && !opts.trailing_quiet.is_zero() {
            while !opts.is_cancelled() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let wait = opts.trailing_quiet.min(remaining);
                if wait.is_zero() {
                    break;
                }
                match link.read_line(wait)? {
                    Some(line) if !line.trim().is_empty() => lines.push(line.trim().to_string()),
                    Some(_) => {},
                    None => break,
                }
            }
        }

        Ok(Exchange {
            response: lines.join("\n"),
            elapsed: started.elapsed(),
            terminated,
        })
    }
}
