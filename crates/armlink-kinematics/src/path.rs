//! 直线插补路径
//!
//! 把笛卡尔空间中的一条线段切分为等距的中间点，供逐点逆解后下发。
//!
//! # 特性
//!
//! - **Iterator 模式**: 按需生成路径点
//! - 不包含起点，包含终点
//!
//! # 示例
//!
//! ```rust
//! use armlink_kinematics::{CartesianPosition, LinearPath};
//!
//! let start = CartesianPosition::new(0.0, 0.0, 0.0);
//! let end = CartesianPosition::new(10.0, 0.0, 0.0);
//! let points: Vec<_> = LinearPath::new(start, end, 5.0).collect();
//! assert_eq!(points.len(), 2);
//! assert_eq!(points[1], end);
//! ```

use crate::kinematics::CartesianPosition;

/// 直线路径迭代器
#[derive(Debug, Clone)]
pub struct LinearPath {
    start: CartesianPosition,
    end: CartesianPosition,
    /// 当前迭代索引（1 起）
    current_index: usize,
    /// 总分段数
    total_steps: usize,
}

impl LinearPath {
    /// 创建直线路径
    ///
    /// # 参数
    ///
    /// - `step`: 期望步长（mm）；`step <= 0` 或非有限值视为一步到位
    ///
    /// 分段数 N = max(1, ⌊距离 / 步长⌋)。
    pub fn new(start: CartesianPosition, end: CartesianPosition, step: f64) -> Self {
        let distance = start.distance_to(&end);
        let total_steps = if step > 0.0 && step.is_finite() {
            ((distance / step).floor() as usize).max(1)
        } else {
            1
        };

        LinearPath {
            start,
            end,
            current_index: 1,
            total_steps,
        }
    }

    /// 总分段数（即迭代器产生的点数）
    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// 当前进度（0.0 到 1.0）
    pub fn progress(&self) -> f64 {
        (self.current_index - 1) as f64 / self.total_steps as f64
    }
}

impl Iterator for LinearPath {
    type Item = CartesianPosition;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_index > self.total_steps {
            return None;
        }

        let point = if self.current_index == self.total_steps {
            self.end
        } else {
            let t = self.current_index as f64 / self.total_steps as f64;
            self.start.lerp(&self.end, t)
        };
        self.current_index += 1;

        Some(point)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total_steps + 1 - self.current_index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for LinearPath {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_count_floor() {
        let start = CartesianPosition::new(0.0, 0.0, 0.0);
        let end = CartesianPosition::new(0.0, 0.0, 23.0);
        let path = LinearPath::new(start, end, 5.0);
        assert_eq!(path.total_steps(), 4);
        assert_eq!(path.len(), 4);
    }

    #[test]
    fn test_excludes_start_includes_end() {
        let start = CartesianPosition::new(100.0, 0.0, 100.0);
        let end = CartesianPosition::new(200.0, 0.0, 100.0);
        let points: Vec<_> = LinearPath::new(start, end, 25.0).collect();
        assert_eq!(points.len(), 4);
        assert_eq!(points[0], CartesianPosition::new(125.0, 0.0, 100.0));
        assert_eq!(points[3], end);
    }

    #[test]
    fn test_short_segment_single_step() {
        let start = CartesianPosition::new(0.0, 0.0, 0.0);
        let end = CartesianPosition::new(1.0, 0.0, 0.0);
        let points: Vec<_> = LinearPath::new(start, end, 5.0).collect();
        assert_eq!(points, vec![end]);
    }

    #[test]
    fn test_non_positive_step() {
        let start = CartesianPosition::new(0.0, 0.0, 0.0);
        let end = CartesianPosition::new(50.0, 0.0, 0.0);
        assert_eq!(LinearPath::new(start, end, 0.0).count(), 1);
        assert_eq!(LinearPath::new(start, end, -3.0).count(), 1);
        assert_eq!(LinearPath::new(start, end, f64::NAN).count(), 1);
    }

    #[test]
    fn test_progress() {
        let start = CartesianPosition::new(0.0, 0.0, 0.0);
        let end = CartesianPosition::new(10.0, 0.0, 0.0);
        let mut path = LinearPath::new(start, end, 2.5);
        assert_eq!(path.progress(), 0.0);
        path.next();
        assert_eq!(path.progress(), 0.25);
        while path.next().is_some() {}
        assert_eq!(path.progress(), 1.0);
    }
}
