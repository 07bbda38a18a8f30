//! 设备注册表
//!
//! 由调用方显式持有（没有全局实例），按设备 ID 查找驱动。

use crate::config::{DevicesConfig, DriverConfig};
use crate::driver::RobotArmDriver;
use crate::error::DriverError;
use crate::traits::{DeviceDriver, RobotArm};
use armlink_serial::{SerialConnector, SystemConnector};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// 设备 ID → 驱动
#[derive(Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, Arc<dyn DeviceDriver>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按配置创建全部驱动（真实串口）
    pub fn from_config(config: &DevicesConfig) -> Result<Self, DriverError> {
        Self::from_config_with(config, Arc::new(SystemConnector))
    }

    /// 按配置创建全部驱动，共用一个连接器
    pub fn from_config_with(
        config: &DevicesConfig,
        connector: Arc<dyn SerialConnector>,
    ) -> Result<Self, DriverError> {
        let mut registry = Self::new();
        for device in &config.devices {
            let driver = RobotArmDriver::with_connector(device.clone(), Arc::clone(&connector))?;
            registry.insert(Arc::new(driver))?;
        }
        Ok(registry)
    }

    /// 添加单个设备配置
    pub fn add(&mut self, config: DriverConfig) -> Result<Arc<dyn DeviceDriver>, DriverError> {
        let driver: Arc<dyn DeviceDriver> = Arc::new(RobotArmDriver::new(config)?);
        self.insert(Arc::clone(&driver))?;
        Ok(driver)
    }

    /// 注册驱动
    ///
    /// # 错误
    ///
    /// ID 已存在时返回 `Config`。
    pub fn insert(&mut self, driver: Arc<dyn DeviceDriver>) -> Result<(), DriverError> {
        let id = driver.id().to_string();
        if self.devices.contains_key(&id) {
            return Err(DriverError::Config(format!("duplicate device id: {}", id)));
        }
        self.devices.insert(id, driver);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<dyn DeviceDriver>> {
        self.devices.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn DeviceDriver>> {
        self.devices.get(id).cloned()
    }

    /// 查找设备并取得其机械臂能力
    pub fn robot_arm(&self, id: &str) -> Option<&dyn RobotArm> {
        self.devices.get(id)?.robot_arm()
    }

    /// 已注册的设备 ID（有序）
    pub fn ids(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// 连接全部设备，返回每个设备的结果
    pub fn connect_all(&self) -> Vec<(String, Result<(), DriverError>)> {
        self.devices
            .iter()
            .map(|(id, driver)| {
                let result = driver.connect();
                match &result {
                    Ok(()) => info!("Device {} connected", id),
                    Err(e) => warn!("Device {} failed to connect: {}", id, e),
                }
                (id.clone(), result)
            })
            .collect()
    }

    pub fn disconnect_all(&self) {
        for driver in self.devices.values() {
            driver.disconnect();
        }
    }
}
