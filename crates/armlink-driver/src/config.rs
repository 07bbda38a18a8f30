//! # 驱动配置
//!
//! 单个设备的 [`DriverConfig`] 与设备清单 [`DevicesConfig`]，均以 TOML 读写。
//!
//! ```toml
//! [[devices]]
//! id = "arm1"
//! name = "Desk arm"
//! port = "/dev/ttyUSB0"
//! dialect = "legacy"
//!
//! [devices.transform.axis_mapping]
//! x = "Y"
//! y = "X"
//! z = "Z"
//!
//! [devices.transform.axis_limits.x]
//! min = -90.0
//! max = 90.0
//! ```

use crate::error::DriverError;
use armlink_kinematics::{AxisTransformConfig, RobotConfig};
use armlink_protocol::Dialect;
use armlink_serial::TransportTiming;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 驱动时序（毫秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverTiming {
    /// 打开串口后等待固件启动
    pub boot_settle_ms: u64,
    /// `G92` 清零之后的等待
    pub zero_settle_ms: u64,
    /// 无响应写入后的固定等待
    pub write_settle_ms: u64,
    /// Legacy 终止行之后收集尾随行的静默窗口
    pub trailing_quiet_ms: u64,
    /// 程序逐行执行的间隔
    pub line_settle_ms: u64,
    /// 示教回放点之间的等待
    pub teach_settle_ms: u64,
    /// 状态轮询间隔（未设置时按方言取默认值）
    pub poll_interval_ms: Option<u64>,
    /// 进入诊断模式前等待进行中的交换结束
    pub diagnostics_drain_ms: u64,
}

impl Default for DriverTiming {
    fn default() -> Self {
        Self {
            boot_settle_ms: 2500,
            zero_settle_ms: 300,
            write_settle_ms: 100,
            trailing_quiet_ms: 100,
            line_settle_ms: 100,
            teach_settle_ms: 500,
            poll_interval_ms: None,
            diagnostics_drain_ms: 500,
        }
    }
}

impl DriverTiming {
    /// 所有等待为零（测试和模拟固件）
    pub fn immediate() -> Self {
        Self {
            boot_settle_ms: 0,
            zero_settle_ms: 0,
            write_settle_ms: 0,
            trailing_quiet_ms: 0,
            line_settle_ms: 0,
            teach_settle_ms: 0,
            poll_interval_ms: Some(10),
            diagnostics_drain_ms: 0,
        }
    }

    pub fn boot_settle(&self) -> Duration {
        Duration::from_millis(self.boot_settle_ms)
    }

    pub fn zero_settle(&self) -> Duration {
        Duration::from_millis(self.zero_settle_ms)
    }

    pub fn line_settle(&self) -> Duration {
        Duration::from_millis(self.line_settle_ms)
    }

    pub fn teach_settle(&self) -> Duration {
        Duration::from_millis(self.teach_settle_ms)
    }

    pub fn diagnostics_drain(&self) -> Duration {
        Duration::from_millis(self.diagnostics_drain_ms)
    }

    /// 轮询间隔：Legacy 1 s（不查询串口），GRBL 200 ms（`?` 查询）
    pub fn poll_interval(&self, dialect: Dialect) -> Duration {
        let default_ms = match dialect {
            Dialect::Legacy => 1000,
            Dialect::Grbl => 200,
        };
        Duration::from_millis(self.poll_interval_ms.unwrap_or(default_ms))
    }
}

/// 单个设备的配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// 设备 ID（注册表键）
    pub id: String,
    /// 显示名称
    pub name: String,
    pub port: String,
    pub baud_rate: u32,
    /// 响应超时
    pub timeout_ms: u64,
    pub dialect: Dialect,
    /// 机械结构（GRBL 方言的笛卡尔运动使用）
    pub robot: RobotConfig,
    /// 逻辑轴 ↔ 固件轴变换
    pub transform: AxisTransformConfig,
    pub timing: DriverTiming,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            id: "robot_arm".to_string(),
            name: "Robot arm".to_string(),
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115200,
            timeout_ms: 2000,
            dialect: Dialect::Legacy,
            robot: RobotConfig::default(),
            transform: AxisTransformConfig::default(),
            timing: DriverTiming::default(),
        }
    }
}

impl DriverConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// 传输层时序
    pub fn transport_timing(&self) -> TransportTiming {
        TransportTiming {
            response_timeout: self.response_timeout(),
            write_settle: Duration::from_millis(self.timing.write_settle_ms),
            trailing_quiet: Duration::from_millis(self.timing.trailing_quiet_ms),
        }
    }

    /// 校验机械结构与轴变换
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.baud_rate == 0 {
            return Err(DriverError::Config("baud_rate must be positive".into()));
        }
        self.robot.validate()?;
        self.transform.validate()?;
        Ok(())
    }

    /// 解析单个设备的 TOML
    pub fn from_toml_str(text: &str) -> Result<Self, DriverError> {
        let config: Self = toml::from_str(text).map_err(|e| DriverError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// 设备清单
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevicesConfig {
    #[serde(default)]
    pub devices: Vec<DriverConfig>,
}

impl DevicesConfig {
    /// 解析并校验（设备 ID 不能重复）
    pub fn from_toml_str(text: &str) -> Result<Self, DriverError> {
        let config: Self = toml::from_str(text).map_err(|e| DriverError::Config(e.to_string()))?;
        for (i, device) in config.devices.iter().enumerate() {
            device.validate()?;
            if config.devices[..i].iter().any(|d| d.id == device.id) {
                return Err(DriverError::Config(format!(
                    "duplicate device id: {}",
                    device.id
                )));
            }
        }
        Ok(config)
    }

    /// 从文件加载
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DriverError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, DriverError> {
        toml::to_string_pretty(self).map_err(|e| DriverError::Config(e.to_string()))
    }

    /// 保存到文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), DriverError> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&DriverConfig> {
        self.devices.iter().find(|d| d.id == id)
    }
}
