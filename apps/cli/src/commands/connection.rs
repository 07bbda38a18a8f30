//! 连接参数
//!
//! 设备配置来自 `--config` 指定的 TOML 设备清单，命令行参数覆盖其中的字段。

use anyhow::{Context, Result};
use armlink_sdk::diagnostics::RunControl;
use armlink_sdk::prelude::*;
use armlink_sdk::DevicesConfig;
use clap::Args;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

/// 全局连接参数
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// 设备清单（TOML）
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 设备 ID（默认取清单中的第一个设备）
    #[arg(short, long, global = true)]
    pub device: Option<String>,

    /// 串口（覆盖配置）
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// 波特率（覆盖配置）
    #[arg(short, long, global = true)]
    pub baud: Option<u32>,

    /// 固件方言：legacy 或 grbl（覆盖配置）
    #[arg(long, global = true)]
    pub dialect: Option<Dialect>,
}

impl ConnectionArgs {
    /// 合并配置文件与命令行参数
    pub fn driver_config(&self) -> Result<DriverConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let devices = DevicesConfig::load(path)
                    .with_context(|| format!("读取设备清单失败: {}", path.display()))?;
                select_device(&devices, self.device.as_deref())?
            },
            None => DriverConfig::default(),
        };

        if let Some(port) = &self.port {
            config.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.baud_rate = baud;
        }
        if let Some(dialect) = self.dialect {
            config.dialect = dialect;
        }
        config.validate().context("设备配置无效")?;
        Ok(config)
    }

    /// 创建驱动并连接
    pub fn connect(&self) -> Result<RobotArmDriver> {
        let config = self.driver_config()?;
        let port = config.port.clone();
        println!("🔌 连接到 {} ({})...", port, config.dialect);

        let driver = RobotArmDriver::new(config).context("创建驱动失败")?;
        driver
            .connect()
            .with_context(|| format!("连接 {} 失败", port))?;
        println!("✅ 已连接");
        Ok(driver)
    }
}

/// 按 ID 选择设备；未指定时取第一个
fn select_device(devices: &DevicesConfig, id: Option<&str>) -> Result<DriverConfig> {
    match id {
        Some(id) => devices
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("设备清单中没有 ID 为 {} 的设备", id)),
        None => devices
            .devices
            .first()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("设备清单为空")),
    }
}

/// 安装 Ctrl+C 处理器，返回共享取消标志的运行控制
pub fn install_interrupt_handler() -> Result<RunControl> {
    let control = RunControl::new();
    let flag = control.cancel_flag();
    ctrlc::set_handler(move || {
        eprintln!("\n收到中断信号，正在停止...");
        flag.store(true, Ordering::Release);
    })
    .context("设置 Ctrl+C 处理器失败")?;
    Ok(control)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICES: &str = r#"
[[devices]]
id = "left"
port = "/dev/ttyUSB0"

[[devices]]
id = "right"
port = "/dev/ttyUSB1"
dialect = "grbl"
"#;

    fn write_devices() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.toml");
        std::fs::write(&path, DEVICES).unwrap();
        (dir, path)
    }

    #[test]
    fn test_defaults_without_config() {
        let config = ConnectionArgs::default().driver_config().unwrap();
        assert_eq!(config, DriverConfig::default());
    }

    #[test]
    fn test_select_device_by_id() {
        let (_dir, path) = write_devices();
        let args = ConnectionArgs {
            config: Some(path),
            device: Some("right".into()),
            ..Default::default()
        };
        let config = args.driver_config().unwrap();
        assert_eq!(config.port, "/dev/ttyUSB1");
        assert_eq!(config.dialect, Dialect::Grbl);
    }

    #[test]
    fn test_first_device_and_overrides() {
        let (_dir, path) = write_devices();
        let args = ConnectionArgs {
            config: Some(path),
            port: Some("COM3".into()),
            baud: Some(9600),
            ..Default::default()
        };
        let config = args.driver_config().unwrap();
        assert_eq!(config.id, "left");
        assert_eq!(config.port, "COM3");
        assert_eq!(config.baud_rate, 9600);
    }

    #[test]
    fn test_unknown_device_id() {
        let (_dir, path) = write_devices();
        let args = ConnectionArgs {
            config: Some(path),
            device: Some("missing".into()),
            ..Default::default()
        };
        assert!(args.driver_config().is_err());
    }

    #[test]
    fn test_zero_baud_rejected() {
        let args = ConnectionArgs {
            baud: Some(0),
            ..Default::default()
        };
        assert!(args.driver_config().is_err());
    }
}
