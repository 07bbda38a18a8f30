//! 基于 `serialport` 的真实串口链路
//!
//! ## 限制
//!
//! - **权限要求**：Linux 下可能需要 `dialout` 组权限
//! - 同一设备同一时刻只能被一个进程打开

use crate::{PortInfo, SerialConnector, SerialError, SerialLink};
use serialport::{ClearBuffer, SerialPort, SerialPortType};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// 单次底层读取的最长等待
const READ_SLICE: Duration = Duration::from_millis(20);

/// 按 `\n` 切行的接收缓冲
///
/// 去掉行尾的 `\r`，非 UTF-8 字节按 lossy 方式转换。
#[derive(Debug, Default)]
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    fn clear(&mut self) {
        self.bytes.clear();
    }

    /// 取出一整行
    fn take_line(&mut self) -> Option<String> {
        let pos = self.bytes.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.bytes.drain(..=pos).collect();
        Some(decode_line(&line[..pos]))
    }

    /// 取出缓冲中没有行尾的剩余字节
    fn take_partial(&mut self) -> Option<String> {
        if self.bytes.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.bytes);
        Some(decode_line(&line))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// 真实串口链路
///
/// 自带行缓冲：底层按字节块读取，按 `\n` 切行，去掉行尾的 `\r`。
/// 超时到达时，若最后一次读取已静默且缓冲中仍有没有行尾的字节，
/// 这些字节作为一行返回（固件最后一行可能不带换行）。
pub struct SystemLink {
    port: Box<dyn SerialPort>,
    name: String,
    buffer: LineBuffer,
}

impl SystemLink {
    /// 打开串口
    ///
    /// # 错误
    ///
    /// - 设备不存在：[`SerialError::PortUnavailable`]
    /// - 设备被占用：[`SerialError::PortBusy`]
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self, SerialError> {
        let port = serialport::new(path, baud_rate)
            .timeout(timeout.min(READ_SLICE))
            .open()
            .map_err(|e| map_open_error(path, e))?;

        debug!("Opened serial port {} @ {} bps", path, baud_rate);

        Ok(Self::from_port(port, path))
    }

    /// 包装一个已打开的串口
    pub fn from_port(port: Box<dyn SerialPort>, name: impl Into<String>) -> Self {
        Self {
            port,
            name: name.into(),
            buffer: LineBuffer::default(),
        }
    }
}

fn map_open_error(path: &str, e: serialport::Error) -> SerialError {
    match e.kind() {
        serialport::ErrorKind::NoDevice => SerialError::PortUnavailable(path.to_string()),
        serialport::ErrorKind::Io(io::ErrorKind::NotFound) => {
            SerialError::PortUnavailable(path.to_string())
        },
        serialport::ErrorKind::Io(io::ErrorKind::ResourceBusy) => {
            SerialError::PortBusy(path.to_string())
        },
        _ if e.description.to_ascii_lowercase().contains("busy") => {
            SerialError::PortBusy(path.to_string())
        },
        _ => SerialError::Backend(format!("{}: {}", path, e.description)),
    }
}

fn map_backend_error(e: serialport::Error) -> SerialError {
    match e.kind() {
        serialport::ErrorKind::Io(kind) => SerialError::Io(io::Error::new(kind, e.description)),
        _ => SerialError::Backend(e.description),
    }
}

impl SerialLink for SystemLink {
    fn write_all(&mut self, data: &[u8]) -> Result<(), SerialError> {
        trace!("TX {:?}", String::from_utf8_lossy(data));
        self.port.write_all(data)?;
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, SerialError> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];
        let mut quiet = true;

        loop {
            if let Some(line) = self.buffer.take_line() {
                trace!("RX {:?}", line);
                return Ok(Some(line));
            }

            let now = Instant::now();
            if now >= deadline {
                // 仍在接收中的半行留给下一次调用
                if quiet && let Some(partial) = self.buffer.take_partial() {
                    trace!("RX (unterminated) {:?}", partial);
                    return Ok(Some(partial));
                }
                return Ok(None);
            }

            let slice = (deadline - now).min(READ_SLICE);
            self.port.set_timeout(slice).map_err(map_backend_error)?;

            match self.port.read(&mut chunk) {
                Ok(0) => quiet = true,
                Ok(n) => {
                    self.buffer.extend(&chunk[..n]);
                    quiet = false;
                },
                Err(e) if e.kind() == io::ErrorKind::TimedOut => quiet = true,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Err(SerialError::Io(e)),
            }
        }
    }

    fn clear_input(&mut self) -> Result<(), SerialError> {
        self.buffer.clear();
        self.port.clear(ClearBuffer::Input).map_err(map_backend_error)
    }

    fn flush(&mut self) -> Result<(), SerialError> {
        self.port.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 打开真实串口的连接器
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemConnector;

impl SerialConnector for SystemConnector {
    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Box<dyn SerialLink>, SerialError> {
        Ok(Box::new(SystemLink::open(port, baud_rate, timeout)?))
    }
}

/// 列出系统中的串口
///
/// 枚举失败时返回空列表（只记录警告）。
pub fn list_ports() -> Vec<PortInfo> {
    match serialport::available_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|p| {
                let description = match p.port_type {
                    SerialPortType::UsbPort(usb) => usb
                        .product
                        .or(usb.manufacturer)
                        .unwrap_or_else(|| format!("USB {:04x}:{:04x}", usb.vid, usb.pid)),
                    SerialPortType::PciPort => "PCI".to_string(),
                    SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                    SerialPortType::Unknown => "n/a".to_string(),
                };
                PortInfo {
                    name: p.port_name,
                    description,
                }
            })
            .collect(),
        Err(e) => {
            warn!("Failed to enumerate serial ports: {}", e);
            Vec::new()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_splits_on_newline() {
        let mut buf = LineBuffer::default();
        buf.extend(b"ok\r\nINFO: LINEAR MO");
        assert_eq!(buf.take_line().as_deref(), Some("ok"));
        assert_eq!(buf.take_line(), None);

        buf.extend(b"VE: X10.00 Y0.00 Z0.00 .\n");
        assert_eq!(
            buf.take_line().as_deref(),
            Some("INFO: LINEAR MOVE: X10.00 Y0.00 Z0.00 .")
        );
        assert!(buf.bytes.is_empty());
    }

    #[test]
    fn test_line_buffer_keeps_empty_and_bare_lf_lines() {
        let mut buf = LineBuffer::default();
        buf.extend(b"\r\nfirst\nsecond\r\n");
        assert_eq!(buf.take_line().as_deref(), Some(""));
        assert_eq!(buf.take_line().as_deref(), Some("first"));
        assert_eq!(buf.take_line().as_deref(), Some("second"));
        assert_eq!(buf.take_line(), None);
    }

    #[test]
    fn test_line_buffer_unterminated_tail() {
        let mut buf = LineBuffer::default();
        buf.extend(b"INFO: LINEAR MOVE: X10.00 Y0.00 Z0.00 .");
        assert_eq!(buf.take_line(), None);
        assert_eq!(
            buf.take_partial().as_deref(),
            Some("INFO: LINEAR MOVE: X10.00 Y0.00 Z0.00 .")
        );
        assert!(buf.bytes.is_empty());
        assert_eq!(buf.take_partial(), None);

        buf.extend(b"banner\r");
        assert_eq!(buf.take_partial().as_deref(), Some("banner"));
    }

    #[test]
    fn test_line_buffer_lossy_utf8() {
        let mut buf = LineBuffer::default();
        buf.extend(b"ok \xff\n");
        assert_eq!(buf.take_line().as_deref(), Some("ok \u{fffd}"));
        buf.extend(b"junk");
        buf.clear();
        assert_eq!(buf.take_partial(), None);
    }

    /// 伪终端对上的真实串口读写；环境不支持 pty 时跳过
    #[cfg(unix)]
    fn pty_pair() -> Option<(serialport::TTYPort, SystemLink)> {
        let (master, slave) = serialport::TTYPort::pair().ok()?;
        Some((master, SystemLink::from_port(Box::new(slave), "pty")))
    }

    #[cfg(unix)]
    #[test]
    fn test_read_line_returns_unterminated_reply_at_timeout() {
        let Some((mut firmware, mut link)) = pty_pair() else {
            return;
        };
        firmware.write_all(b"INFO: LINEAR MOVE: X10.00 Y0.00 Z0.00 .").unwrap();
        firmware.flush().unwrap();

        let line = link.read_line(Duration::from_millis(300)).unwrap();
        assert_eq!(line.as_deref(), Some("INFO: LINEAR MOVE: X10.00 Y0.00 Z0.00 ."));
        assert_eq!(link.read_line(Duration::from_millis(50)).unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_read_line_terminated_lines() {
        let Some((mut firmware, mut link)) = pty_pair() else {
            return;
        };
        firmware.write_all(b"ok\r\nINFO: ENDSTOP: [X:0 Y:0 Z:1]\r\n").unwrap();
        firmware.flush().unwrap();

        assert_eq!(link.read_line(Duration::from_millis(300)).unwrap().as_deref(), Some("ok"));
        assert_eq!(
            link.read_line(Duration::from_millis(300)).unwrap().as_deref(),
            Some("INFO: ENDSTOP: [X:0 Y:0 Z:1]")
        );
        assert_eq!(link.name(), "pty");
    }

    #[test]
    fn test_open_missing_device_is_unavailable() {
        let err = SystemLink::open("/dev/armlink-does-not-exist", 115200, Duration::from_millis(10))
            .err()
            .unwrap();
        assert!(
            matches!(err, SerialError::PortUnavailable(_) | SerialError::Backend(_)),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn test_map_open_error_kinds() {
        let e = serialport::Error::new(serialport::ErrorKind::NoDevice, "gone");
        assert!(matches!(map_open_error("p", e), SerialError::PortUnavailable(_)));

        let e = serialport::Error::new(
            serialport::ErrorKind::Io(io::ErrorKind::ResourceBusy),
            "Device or resource busy",
        );
        assert!(matches!(map_open_error("p", e), SerialError::PortBusy(_)));

        let e = serialport::Error::new(serialport::ErrorKind::Unknown, "port is busy");
        assert!(matches!(map_open_error("p", e), SerialError::PortBusy(_)));

        let e = serialport::Error::new(serialport::ErrorKind::InvalidInput, "bad baud");
        assert!(matches!(map_open_error("p", e), SerialError::Backend(_)));
    }
}
