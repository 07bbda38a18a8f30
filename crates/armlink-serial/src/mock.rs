//! 脚本化固件（测试用）
//!
//! [`MockFirmware`] 用一个闭包模拟固件：每收到一条命令，闭包返回要回复的行。
//! 回复可以带固定延迟，所有写入与被消费的响应都记录在事件日志中，
//! 用于验证线路上的收发顺序。

use crate::{SerialConnector, SerialError, SerialLink};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

/// 线路事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// 主机写入的命令（去掉行终止符）
    Write(String),
    /// 主机读走的一行响应
    Consumed(String),
}

struct PendingLine {
    ready_at: Instant,
    text: String,
}

struct MockState {
    responder: Responder,
    pending: VecDeque<PendingLine>,
    events: Vec<WireEvent>,
    raw_writes: Vec<Vec<u8>>,
    banner: Vec<String>,
    response_delay: Duration,
}

/// 模拟固件（可克隆句柄，共享同一状态）
#[derive(Clone)]
pub struct MockFirmware {
    state: Arc<Mutex<MockState>>,
    disconnected: Arc<AtomicBool>,
}

impl MockFirmware {
    /// 创建模拟固件
    ///
    /// `responder` 收到命令文本（实时字节以单字符字符串传入），返回回复行。
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(MockState {
                responder: Box::new(responder),
                pending: VecDeque::new(),
                events: Vec::new(),
                raw_writes: Vec::new(),
                banner: Vec::new(),
                response_delay: Duration::ZERO,
            })),
            disconnected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 每次打开链路时先输出的欢迎语
    pub fn with_banner(self, banner: &str) -> Self {
        self.state.lock().banner = banner.lines().map(str::to_string).collect();
        self
    }

    /// 回复延迟（从写入到响应可读）
    pub fn with_response_delay(self, delay: Duration) -> Self {
        self.state.lock().response_delay = delay;
        self
    }

    /// 替换回复闭包
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        self.state.lock().responder = Box::new(responder);
    }

    /// 模拟拔线：之后的读写都返回 IO 错误
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::Relaxed);
    }

    /// 打开一条链路
    pub fn link(&self) -> Box<dyn SerialLink> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let banner = state.banner.clone();
        state.pending.extend(banner.into_iter().map(|text| PendingLine {
            ready_at: now,
            text,
        }));
        Box::new(MockLink {
            firmware: self.clone(),
            name: "mock".to_string(),
        })
    }

    /// 打开本固件链路的连接器
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            firmware: self.clone(),
            failure: None,
        }
    }

    /// 线路事件日志
    pub fn events(&self) -> Vec<WireEvent> {
        self.state.lock().events.clone()
    }

    /// 写入的命令（按顺序）
    pub fn written(&self) -> Vec<String> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                WireEvent::Write(cmd) => Some(cmd.clone()),
                WireEvent::Consumed(_) => None,
            })
            .collect()
    }

    /// 写入的原始字节（按写入调用分组）
    pub fn raw_writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().raw_writes.clone()
    }

    /// 清空事件日志
    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.events.clear();
        state.raw_writes.clear();
    }

    fn check_connected(&self) -> Result<(), SerialError> {
        if self.disconnected.load(Ordering::Relaxed) {
            Err(SerialError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock device disconnected",
            )))
        } else {
            Ok(())
        }
    }
}

/// 模拟链路
pub struct MockLink {
    firmware: MockFirmware,
    name: String,
}

impl SerialLink for MockLink {
    fn write_all(&mut self, data: &[u8]) -> Result<(), SerialError> {
        self.firmware.check_connected()?;

        let text = String::from_utf8_lossy(data);
        let command = text.trim_end_matches(['\r', '\n']).trim().to_string();

        let mut state = self.firmware.state.lock();
        state.raw_writes.push(data.to_vec());
        state.events.push(WireEvent::Write(command.clone()));

        let reply = (state.responder)(&command);
        let ready_at = Instant::now() + state.response_delay;
        state
            .pending
            .extend(reply.into_iter().map(|text| PendingLine { ready_at, text }));
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, SerialError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.firmware.check_connected()?;
            {
                let mut state = self.firmware.state.lock();
                let ready = state
                    .pending
                    .front()
                    .is_some_and(|line| line.ready_at <= Instant::now());
                if ready && let Some(line) = state.pending.pop_front() {
                    state.events.push(WireEvent::Consumed(line.text.clone()));
                    return Ok(Some(line.text));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn clear_input(&mut self) -> Result<(), SerialError> {
        self.firmware.check_connected()?;
        let now = Instant::now();
        self.firmware
            .state
            .lock()
            .pending
            .retain(|line| line.ready_at > now);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 打开失败的模拟方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOpenFailure {
    Unavailable,
    Busy,
}

/// 模拟连接器
#[derive(Clone)]
pub struct MockConnector {
    firmware: MockFirmware,
    failure: Option<MockOpenFailure>,
}

impl MockConnector {
    /// 之后的打开调用都失败
    pub fn failing(mut self, failure: MockOpenFailure) -> Self {
        self.failure = Some(failure);
        self
    }
}

impl SerialConnector for MockConnector {
    fn open(
        &self,
        port: &str,
        _baud_rate: u32,
        _timeout: Duration,
    ) -> Result<Box<dyn SerialLink>, SerialError> {
        match self.failure {
            Some(MockOpenFailure::Unavailable) => Err(SerialError::PortUnavailable(port.to_string())),
            Some(MockOpenFailure::Busy) => Err(SerialError::PortBusy(port.to_string())),
            None => Ok(self.firmware.link()),
        }
    }
}
