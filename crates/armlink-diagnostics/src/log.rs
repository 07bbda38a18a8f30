//! 诊断进度日志
//!
//! 每个工具在运行时记录一条带相对时间戳的进度流：
//! 报告中保存完整副本，可选的 channel 订阅者实时收到每一条（前端进度条用）。
//! 同时以 `tracing` 输出，级别与条目类型对应。

use armlink_protocol::Axis;
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// 命令响应在日志中保留的最大长度
const RESPONSE_PREVIEW: usize = 200;

/// 日志条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Info,
    /// 一次命令交换
    Cmd,
    /// 测量结果
    Result,
    /// 搜索进度
    Progress,
    Warn,
    Error,
}

/// 日志条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// 自工具启动以来的毫秒数
    pub t_ms: u64,
    pub kind: LogKind,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axis: Option<Axis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// 总体进度 0-100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pct: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// 命令往返耗时
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ms: Option<f64>,
}

impl LogEntry {
    pub fn new(kind: LogKind, msg: impl Into<String>) -> Self {
        Self {
            t_ms: 0,
            kind,
            msg: msg.into(),
            axis: None,
            value: None,
            pct: None,
            response: None,
            ms: None,
        }
    }

    pub fn axis(mut self, axis: Axis) -> Self {
        self.axis = Some(axis);
        self
    }

    pub fn value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn pct(mut self, pct: f64) -> Self {
        self.pct = Some(pct.round().clamp(0.0, 100.0) as u8);
        self
    }

    pub fn response(mut self, response: &str) -> Self {
        self.response = Some(response.chars().take(RESPONSE_PREVIEW).collect());
        self
    }

    pub fn ms(mut self, ms: f64) -> Self {
        self.ms = Some((ms * 10.0).round() / 10.0);
        self
    }
}

/// 进度日志
pub struct DiagnosticLog {
    started: Instant,
    entries: Vec<LogEntry>,
    sink: Option<Sender<LogEntry>>,
}

impl DiagnosticLog {
    pub fn new(sink: Option<Sender<LogEntry>>) -> Self {
        Self {
            started: Instant::now(),
            entries: Vec::new(),
            sink,
        }
    }

    /// 追加一条（订阅者来不及接收时丢弃副本，不阻塞测量）
    pub fn push(&mut self, mut entry: LogEntry) {
        entry.t_ms = self.started.elapsed().as_millis() as u64;
        match entry.kind {
            LogKind::Warn | LogKind::Error => warn!("{}", entry.msg),
            LogKind::Cmd | LogKind::Progress => debug!("{}", entry.msg),
            LogKind::Info | LogKind::Result => info!("{}", entry.msg),
        }
        if let Some(sink) = &self.sink {
            let _ = sink.try_send(entry.clone());
        }
        self.entries.push(entry);
    }

    pub fn info(&mut self, msg: impl Into<String>) {
        self.push(LogEntry::new(LogKind::Info, msg));
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.push(LogEntry::new(LogKind::Warn, msg));
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.push(LogEntry::new(LogKind::Error, msg));
    }

    /// 自启动以来的秒数
    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }
}
