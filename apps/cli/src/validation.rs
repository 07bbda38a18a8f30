//! 输入验证模块

use anyhow::{Context, Result};
use std::path::Path;

/// 解析逗号分隔的三个数值（`x,y,z` 或 `j1,j2,j3`）
///
/// # 错误
///
/// 数量不是 3 个、无法解析或不是有限数时返回错误。
pub fn parse_triple(text: &str) -> Result<[f64; 3]> {
    let values: Vec<f64> = text
        .split(',')
        .map(|s| s.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("无法解析数值: {}", text))?;

    let [a, b, c] = values[..] else {
        anyhow::bail!("需要 3 个数值，得到 {} 个", values.len());
    };
    for (i, v) in [a, b, c].iter().enumerate() {
        if !v.is_finite() {
            anyhow::bail!("第 {} 个数值无效: {}", i + 1, v);
        }
    }
    Ok([a, b, c])
}

/// 速度验证（度/秒或 mm/min，必须为正）
pub fn validate_speed(speed: f64) -> Result<()> {
    if !(speed.is_finite() && speed > 0.0) {
        anyhow::bail!("速度必须为正数，得到: {}", speed);
    }
    Ok(())
}

/// 文件路径验证器
pub struct PathValidator {
    /// 是否检查文件存在
    check_exists: bool,
}

impl PathValidator {
    pub fn new() -> Self {
        Self {
            check_exists: false,
        }
    }

    /// 要求文件存在
    pub fn must_exist(mut self) -> Self {
        self.check_exists = true;
        self
    }

    /// 验证输入文件路径
    pub fn validate_path(&self, path: &Path) -> Result<()> {
        if path.as_os_str().is_empty() {
            anyhow::bail!("文件路径为空");
        }
        if self.check_exists && !path.exists() {
            anyhow::bail!("文件不存在: {}", path.display());
        }
        Ok(())
    }

    /// 验证输出路径（目录必须存在）
    pub fn validate_output_path(&self, path: &Path) -> Result<()> {
        if path.as_os_str().is_empty() {
            anyhow::bail!("文件路径为空");
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!("输出目录不存在: {}", parent.display());
        }
        Ok(())
    }
}

impl Default for PathValidator {
    fn default() -> Self {
        Self::new()
    }
}
