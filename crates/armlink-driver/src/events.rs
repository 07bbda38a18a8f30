//! 设备事件通道
//!
//! 每个设备一条事件总线，订阅者各自持有一个有界 `Receiver`。
//!
//! # 设计原则
//!
//! - **非阻塞**: 发布使用 `try_send`，订阅者处理慢时丢弃事件，不阻塞驱动
//! - **自动清理**: 订阅者丢弃 `Receiver` 后，下次发布时移除对应的 `Sender`
//!
//! # 使用示例
//!
//! ```rust
//! use armlink_driver::events::{DeviceEvent, EventBus};
//! use armlink_driver::Position;
//!
//! let bus = EventBus::new();
//! let rx = bus.subscribe();
//! bus.publish(DeviceEvent::PositionUpdated(Position::new(1.0, 2.0, 3.0)));
//! assert!(matches!(rx.try_recv(), Ok(DeviceEvent::PositionUpdated(_))));
//! ```

use crate::state::DeviceState;
use crate::status::Position;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// 每个订阅者的缓冲容量
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// 设备事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// 状态变化
    StateChanged { from: DeviceState, to: DeviceState },
    /// 位置更新（每条确认的运动响应一次）
    PositionUpdated(Position),
    /// 错误
    Error(String),
    /// 程序进度
    JobProgress {
        progress: f64,
        current_line: usize,
        total_lines: usize,
    },
    /// 程序执行完毕（每次运行最多一次）
    JobComplete { file: String },
}

/// 事件总线
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<DeviceEvent>>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    /// 新建一个订阅
    pub fn subscribe(&self) -> Receiver<DeviceEvent> {
        let (tx, rx) = bounded(self.capacity);
        self.subscribers.lock().push(tx);
        rx
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// 发布事件（非阻塞）
    pub fn publish(&self, event: DeviceEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("Event subscriber lagging, dropped {:?}", event);
                true
            },
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}
