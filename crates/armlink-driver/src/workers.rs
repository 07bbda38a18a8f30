//! 后台线程（状态轮询、程序执行）的生命周期管理

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::{Duration, Instant};
use tracing::error;

/// 线程退出的最长等待
pub(crate) const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 可中断睡眠的切片长度
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// 带超时的 join
pub(crate) trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: std::marker::Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // 由看门狗线程执行真正的 join
        spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(io::Error::new(
                io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// join 线程，超时或 panic 只记录日志
pub(crate) fn join_logged(handle: JoinHandle<()>, name: &str) {
    if let Err(_e) = handle.join_timeout(JOIN_TIMEOUT) {
        error!(
            "{} thread panicked or failed to shut down within {:?}",
            name, JOIN_TIMEOUT
        );
    }
}

/// 带运行标志的后台线程
pub(crate) struct Worker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    name: String,
}

impl Worker {
    pub(crate) fn spawn<F>(name: String, f: F) -> io::Result<Self>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || f(flag))?;
        Ok(Self {
            running,
            handle,
            name,
        })
    }

    /// 清除运行标志并等待线程退出
    pub(crate) fn stop(self) {
        self.running.store(false, Ordering::Release);
        join_logged(self.handle, &self.name);
    }
}

/// 睡眠 `duration`，运行标志清除时提前返回
///
/// # 返回
///
/// 标志仍为 true 时返回 true
pub(crate) fn sleep_while(running: &AtomicBool, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if !running.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}
