//! # Armlink Protocol
//!
//! 机械臂串口文本协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `axis`: 轴标识与按轴取值记录
//! - `command`: 结构化命令 → 线路文本
//! - `response`: Legacy 固件响应解析
//! - `framing`: 行终止符与方言的终止行判定
//! - `grbl`: GRBL 1.1 方言（状态报告、设置、错误/报警表、实时字节）
//!
//! ## 线路格式
//!
//! 每条命令是一行 ASCII 文本，以 `\r\n` 结束；协议没有请求 ID，
//! 响应的结束由方言的“终止行”决定（见 [`Dialect::is_terminal_line`]）。

pub mod axis;
pub mod command;
pub mod error;
pub mod framing;
pub mod grbl;
pub mod response;

pub use axis::{Axis, AxisSet, AxisValues};
pub use command::{ArmCommand, HOME_SPEED, LEGACY_SPEED_RANGE};
pub use error::ProtocolError;
pub use framing::{Dialect, LINE_TERMINATOR, frame_line, is_error_line, split_lines};
pub use grbl::{GrblSettings, GrblState, GrblStatusReport};
pub use response::{
    NOT_RECOGNIZED, WELCOME_BANNER, contains_error_marker, find_error_line, is_not_recognized,
    is_welcome_banner, parse_endstops, parse_linear_move,
};
