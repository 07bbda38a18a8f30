//! 逻辑轴 ↔ 固件轴变换
//!
//! 调用方使用“逻辑坐标”（物理角度，与电机接线无关），固件使用“固件坐标”。
//!
//! ```text
//! 出站: 逻辑值 ─ 缩放(÷scale) ─ 反向(取负) ─ 映射(逻辑轴 → 固件轴) ─▶ 固件值
//! 入站: 固件值 ─ 反映射 ─ 反向 ─ 缩放(×scale) ─▶ 逻辑值
//! ```
//!
//! 对合法配置，[`AxisTransform::map_incoming`] 是 [`AxisTransform::map_outgoing`] 的精确逆。

use crate::error::TransformError;
use armlink_protocol::{Axis, AxisSet, AxisValues};

/// 单轴软限位（逻辑角度）
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AxisLimit {
    pub min: f64,
    pub max: f64,
}

impl AxisLimit {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// 轴变换配置
///
/// 会话期间不可变。缩放系数为 0 表示 1:1（不缩放）。
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AxisTransformConfig {
    /// 逻辑轴 → 固件轴
    pub axis_mapping: AxisValues<Axis>,
    /// 逻辑轴方向取反
    pub axis_invert: AxisValues<bool>,
    /// 1 个固件单位对应的物理角度
    pub axis_scale: AxisValues<f64>,
    /// 软限位
    pub axis_limits: AxisValues<Option<AxisLimit>>,
}

impl Default for AxisTransformConfig {
    fn default() -> Self {
        Self {
            axis_mapping: AxisValues::new(Axis::X, Axis::Y, Axis::Z),
            axis_invert: AxisValues::splat(false),
            axis_scale: AxisValues::splat(0.0),
            axis_limits: AxisValues::splat(None),
        }
    }
}

impl AxisTransformConfig {
    /// 校验配置
    ///
    /// # 错误
    ///
    /// - 映射不是双射：[`TransformError::NotBijective`]
    /// - 限位 `min > max`：[`TransformError::InvalidLimits`]
    /// - 缩放为非有限值：[`TransformError::InvalidScale`]（负数合法，表示反向传动）
    pub fn validate(&self) -> Result<(), TransformError> {
        let mut seen = AxisSet::EMPTY;
        for (_, &fw) in self.axis_mapping.iter() {
            if seen.contains(fw) {
                return Err(TransformError::NotBijective(fw));
            }
            seen.insert(fw);
        }

        for (axis, limit) in self.axis_limits.iter() {
            if let Some(AxisLimit { min, max }) = *limit
                && (min.is_nan() || max.is_nan() || min > max)
            {
                return Err(TransformError::InvalidLimits { axis, min, max });
            }
        }

        for (axis, &value) in self.axis_scale.iter() {
            if !value.is_finite() {
                return Err(TransformError::InvalidScale { axis, value });
            }
        }

        Ok(())
    }

    /// 映射是否为恒等映射
    pub fn is_identity_mapping(&self) -> bool {
        Axis::ALL.iter().all(|&a| self.axis_mapping[a] == a)
    }
}

/// 经过校验的轴变换
#[derive(Debug, Clone, PartialEq)]
pub struct AxisTransform {
    config: AxisTransformConfig,
    /// 固件轴 → 逻辑轴
    reverse_map: AxisValues<Axis>,
}

impl Default for AxisTransform {
    fn default() -> Self {
        Self {
            config: AxisTransformConfig::default(),
            reverse_map: AxisValues::new(Axis::X, Axis::Y, Axis::Z),
        }
    }
}

impl AxisTransform {
    /// 校验配置并构建变换
    pub fn new(config: AxisTransformConfig) -> Result<Self, TransformError> {
        config.validate()?;

        let mut reverse_map = AxisValues::new(Axis::X, Axis::Y, Axis::Z);
        for (logical, &fw) in config.axis_mapping.iter() {
            reverse_map[fw] = logical;
        }

        Ok(Self {
            config,
            reverse_map,
        })
    }

    pub fn config(&self) -> &AxisTransformConfig {
        &self.config
    }

    /// 逻辑轴对应的固件轴
    pub fn firmware_axis(&self, logical: Axis) -> Axis {
        self.config.axis_mapping[logical]
    }

    /// 固件轴对应的逻辑轴
    pub fn logical_axis(&self, firmware: Axis) -> Axis {
        self.reverse_map[firmware]
    }

    fn scale_of(&self, axis: Axis) -> Option<f64> {
        let s = self.config.axis_scale[axis];
        (s != 0.0).then_some(s)
    }

    /// 逻辑坐标 → 固件坐标
    pub fn map_outgoing(&self, logical: AxisValues<f64>) -> AxisValues<f64> {
        let prepared = logical.map(|axis, v| {
            let v = match self.scale_of(axis) {
                Some(s) => v / s,
                None => v,
            };
            if self.config.axis_invert[axis] { -v } else { v }
        });
        AxisValues::splat(0.0).map(|fw, _| prepared[self.reverse_map[fw]])
    }

    /// 固件坐标 → 逻辑坐标
    pub fn map_incoming(&self, firmware: AxisValues<f64>) -> AxisValues<f64> {
        AxisValues::splat(0.0).map(|logical, _| {
            let v = firmware[self.config.axis_mapping[logical]];
            let v = if self.config.axis_invert[logical] { -v } else { v };
            match self.scale_of(logical) {
                Some(s) => v * s,
                None => v,
            }
        })
    }

    /// 单轴相对量（jog 距离）的出站换算：缩放 + 反向，返回目标固件轴
    pub fn map_outgoing_delta(&self, axis: Axis, delta: f64) -> (Axis, f64) {
        let v = match self.scale_of(axis) {
            Some(s) => delta / s,
            None => delta,
        };
        let v = if self.config.axis_invert[axis] { -v } else { v };
        (self.firmware_axis(axis), v)
    }

    /// 按固件轴取值的布尔记录（如限位状态）转为逻辑轴
    pub fn flags_incoming(&self, firmware: AxisValues<bool>) -> AxisValues<bool> {
        AxisValues::splat(false).map(|logical, _| firmware[self.config.axis_mapping[logical]])
    }

    /// 把软限位应用到逻辑坐标上
    ///
    /// 纯函数，返回裁剪后的坐标与被裁剪的轴集合。
    pub fn clamp_to_limits(&self, logical: AxisValues<f64>) -> (AxisValues<f64>, AxisSet) {
        let mut touched = AxisSet::EMPTY;
        let clamped = logical.map(|axis, v| match self.config.axis_limits[axis] {
            Some(AxisLimit { min, .. }) if v < min => {
                touched.insert(axis);
                min
            },
            Some(AxisLimit { max, .. }) if v > max => {
                touched.insert(axis);
                max
            },
            _ => v,
        });
        (clamped, touched)
    }

    /// 改写原始 G-code 中的轴字母
    ///
    /// 恒等映射时原样返回。否则单遍扫描：每个后跟数字（可带负号）的
    /// 逻辑轴字母（大小写不敏感）被替换为对应的大写固件轴字母，
    /// 同一字母不会被替换两次，数值与其他内容保持不变。
    ///
    /// # 示例
    ///
    /// ```rust
    /// use armlink_kinematics::{AxisTransform, AxisTransformConfig};
    /// use armlink_protocol::{Axis, AxisValues};
    ///
    /// let config = AxisTransformConfig {
    ///     axis_mapping: AxisValues::new(Axis::Y, Axis::X, Axis::Z),
    ///     ..Default::default()
    /// };
    /// let transform = AxisTransform::new(config).unwrap();
    /// assert_eq!(transform.remap_gcode("G1 X50 Y30 Z10 F50"), "G1 Y50 X30 Z10 F50");
    /// ```
    pub fn remap_gcode(&self, gcode: &str) -> String {
        if self.config.is_identity_mapping() {
            return gcode.to_string();
        }

        let chars: Vec<char> = gcode.chars().collect();
        let mut out = String::with_capacity(gcode.len());
        for (i, &c) in chars.iter().enumerate() {
            let followed_by_number = match chars.get(i + 1) {
                Some(d) if d.is_ascii_digit() => true,
                Some('-') => chars.get(i + 2).is_some_and(char::is_ascii_digit),
                _ => false,
            };
            match Axis::from_letter(c) {
                Ok(axis) if followed_by_number => out.push(self.firmware_axis(axis).letter()),
                _ => out.push(c),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn swap_xy() -> AxisTransform {
        AxisTransform::new(AxisTransformConfig {
            axis_mapping: AxisValues::new(Axis::Y, Axis::X, Axis::Z),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_identity_passthrough() {
        let t = AxisTransform::default();
        let v = AxisValues::new(1.0, -2.0, 3.5);
        assert_eq!(t.map_outgoing(v), v);
        assert_eq!(t.map_incoming(v), v);
    }

    #[test]
    fn test_swap_mapping_outgoing() {
        // 逻辑 X 接在固件 Y 上
        let t = swap_xy();
        let fw = t.map_outgoing(AxisValues::new(10.0, 20.0, 30.0));
        assert_eq!(fw, AxisValues::new(20.0, 10.0, 30.0));
        assert_eq!(t.firmware_axis(Axis::X), Axis::Y);
        assert_eq!(t.logical_axis(Axis::Y), Axis::X);
    }

    #[test]
    fn test_scale_and_invert() {
        let t = AxisTransform::new(AxisTransformConfig {
            axis_invert: AxisValues::new(false, true, false),
            axis_scale: AxisValues::new(0.15, 0.0, 2.0),
            ..Default::default()
        })
        .unwrap();
        let fw = t.map_outgoing(AxisValues::new(1.5, 10.0, 4.0));
        assert!(fw.approx_eq(&AxisValues::new(10.0, -10.0, 2.0), 1e-9));
        assert_eq!(t.map_outgoing_delta(Axis::Y, 5.0), (Axis::Y, -5.0));
    }

    #[test]
    fn test_validate_rejects_non_bijection() {
        let err = AxisTransform::new(AxisTransformConfig {
            axis_mapping: AxisValues::new(Axis::X, Axis::X, Axis::Z),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err, TransformError::NotBijective(Axis::X));
    }

    #[test]
    fn test_validate_rejects_bad_limits_and_scale() {
        let limits = AxisTransformConfig {
            axis_limits: AxisValues::new(None, Some(AxisLimit::new(5.0, -5.0)), None),
            ..Default::default()
        };
        assert!(matches!(
            limits.validate(),
            Err(TransformError::InvalidLimits { axis: Axis::Y, .. })
        ));

        let scale = AxisTransformConfig {
            axis_scale: AxisValues::new(0.0, 0.0, f64::NAN),
            ..Default::default()
        };
        assert!(matches!(
            scale.validate(),
            Err(TransformError::InvalidScale { axis: Axis::Z, .. })
        ));

        let scale = AxisTransformConfig {
            axis_scale: AxisValues::new(f64::INFINITY, 0.0, 0.0),
            ..Default::default()
        };
        assert!(matches!(
            scale.validate(),
            Err(TransformError::InvalidScale { axis: Axis::X, .. })
        ));
    }

    #[test]
    fn test_negative_scale_reverses_axis() {
        // 标定得到的反向传动比
        let t = AxisTransform::new(AxisTransformConfig {
            axis_scale: AxisValues::new(-0.15, 0.0, 0.0),
            ..Default::default()
        })
        .unwrap();
        let fw = t.map_outgoing(AxisValues::new(1.5, 2.0, 3.0));
        assert!(fw.approx_eq(&AxisValues::new(-10.0, 2.0, 3.0), 1e-9));
        let back = t.map_incoming(fw);
        assert!(back.approx_eq(&AxisValues::new(1.5, 2.0, 3.0), 1e-9));
        let (axis, delta) = t.map_outgoing_delta(Axis::X, 3.0);
        assert_eq!(axis, Axis::X);
        assert!((delta + 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_clamp_to_limits() {
        let t = AxisTransform::new(AxisTransformConfig {
            axis_limits: AxisValues::new(Some(AxisLimit::new(-90.0, 90.0)), None, None),
            ..Default::default()
        })
        .unwrap();

        let (clamped, touched) = t.clamp_to_limits(AxisValues::new(120.0, 0.0, 0.0));
        assert_eq!(clamped, AxisValues::new(90.0, 0.0, 0.0));
        assert_eq!(touched.iter().collect::<Vec<_>>(), vec![Axis::X]);

        let (clamped, touched) = t.clamp_to_limits(AxisValues::new(-45.0, 500.0, -500.0));
        assert_eq!(clamped, AxisValues::new(-45.0, 500.0, -500.0));
        assert!(touched.is_empty());
    }

    #[test]
    fn test_remap_gcode_single_pass() {
        let t = swap_xy();
        assert_eq!(t.remap_gcode("G1 X50 Y30 Z10 F50"), "G1 Y50 X30 Z10 F50");
        assert_eq!(t.remap_gcode("g1 x-5.5 y.5"), "g1 Y-5.5 y.5");
        // 非轴字母、无数值的字母保持不变
        assert_eq!(t.remap_gcode("M119"), "M119");
        assert_eq!(t.remap_gcode("G28 X Y"), "G28 X Y");
    }

    #[test]
    fn test_remap_gcode_rotation_no_double_substitution() {
        // X→Y, Y→Z, Z→X
        let t = AxisTransform::new(AxisTransformConfig {
            axis_mapping: AxisValues::new(Axis::Y, Axis::Z, Axis::X),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(t.remap_gcode("G1 X1 Y2 Z3"), "G1 Y1 Z2 X3");
    }

    #[test]
    fn test_flags_incoming() {
        let t = swap_xy();
        // 固件 Y 限位触发 → 逻辑 X
        let logical = t.flags_incoming(AxisValues::new(false, true, false));
        assert_eq!(logical, AxisValues::new(true, false, false));
    }

    fn permutation() -> impl Strategy<Value = AxisValues<Axis>> {
        prop_oneof![
            Just(AxisValues::new(Axis::X, Axis::Y, Axis::Z)),
            Just(AxisValues::new(Axis::X, Axis::Z, Axis::Y)),
            Just(AxisValues::new(Axis::Y, Axis::X, Axis::Z)),
            Just(AxisValues::new(Axis::Y, Axis::Z, Axis::X)),
            Just(AxisValues::new(Axis::Z, Axis::X, Axis::Y)),
            Just(AxisValues::new(Axis::Z, Axis::Y, Axis::X)),
        ]
    }

    fn scale_factor() -> impl Strategy<Value = f64> {
        prop_oneof![Just(0.0), 0.01f64..10.0, -10.0f64..-0.01]
    }

    proptest! {
        #[test]
        fn prop_incoming_inverts_outgoing(
            mapping in permutation(),
            invert in any::<[bool; 3]>(),
            scale in [scale_factor(), scale_factor(), scale_factor()],
            v in [-1000.0f64..1000.0, -1000.0f64..1000.0, -1000.0f64..1000.0],
        ) {
            let t = AxisTransform::new(AxisTransformConfig {
                axis_mapping: mapping,
                axis_invert: AxisValues::from_array(invert),
                axis_scale: AxisValues::from_array(scale),
                axis_limits: AxisValues::splat(None),
            }).unwrap();
            let v = AxisValues::from_array(v);
            let back = t.map_incoming(t.map_outgoing(v));
            prop_assert!(back.approx_eq(&v, 1e-9 * (1.0 + v.x.abs() + v.y.abs() + v.z.abs())));
        }

        #[test]
        fn prop_identity_remap_is_noop(s in ".*") {
            let t = AxisTransform::default();
            prop_assert_eq!(t.remap_gcode(&s), s);
        }
    }
}
