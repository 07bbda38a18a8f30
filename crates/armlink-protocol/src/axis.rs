//! 轴标识与按轴取值的类型化记录
//!
//! 逻辑轴（调用方视角）与固件轴（电机接线视角）都用 [`Axis`] 表示，
//! 结构化运动路径全程使用 [`AxisValues`]，只在协议编码时才转换为文本。

use crate::error::ProtocolError;
use std::fmt;
use std::ops::{Index, IndexMut};

/// 三个直线/关节轴
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
}

impl Axis {
    /// 所有轴（固定顺序 X, Y, Z）
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// 轴字母（大写）
    pub const fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
        }
    }

    /// 从字母解析（大小写不敏感）
    pub fn from_letter(c: char) -> Result<Self, ProtocolError> {
        match c.to_ascii_uppercase() {
            'X' => Ok(Axis::X),
            'Y' => Ok(Axis::Y),
            'Z' => Ok(Axis::Z),
            other => Err(ProtocolError::InvalidAxis(other)),
        }
    }

    /// 数组下标
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl std::str::FromStr for Axis {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Axis::from_letter(c),
            _ => Err(ProtocolError::InvalidAxisName(s.to_string())),
        }
    }
}

/// 按轴取值的记录（X, Y, Z 三个值始终一起存在）
///
/// 位置永远整体更新，不存在只有部分轴有值的中间状态。
///
/// # 示例
///
/// ```rust
/// use armlink_protocol::{Axis, AxisValues};
///
/// let mut v = AxisValues::new(1.0, 2.0, 3.0);
/// v[Axis::Y] += 5.0;
/// assert_eq!(v.y, 7.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AxisValues<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T> AxisValues<T> {
    pub const fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }

    /// 逐轴变换
    pub fn map<U>(self, mut f: impl FnMut(Axis, T) -> U) -> AxisValues<U> {
        AxisValues {
            x: f(Axis::X, self.x),
            y: f(Axis::Y, self.y),
            z: f(Axis::Z, self.z),
        }
    }

    /// 按 X, Y, Z 顺序迭代 `(轴, 值)`
    pub fn iter(&self) -> impl Iterator<Item = (Axis, &T)> {
        [(Axis::X, &self.x), (Axis::Y, &self.y), (Axis::Z, &self.z)].into_iter()
    }
}

impl<T: Copy> AxisValues<T> {
    /// 三轴同值
    pub const fn splat(value: T) -> Self {
        Self {
            x: value,
            y: value,
            z: value,
        }
    }

    /// 从 `[x, y, z]` 构造
    pub const fn from_array(values: [T; 3]) -> Self {
        Self {
            x: values[0],
            y: values[1],
            z: values[2],
        }
    }

    /// 转为 `[x, y, z]`
    pub const fn to_array(self) -> [T; 3] {
        [self.x, self.y, self.z]
    }

    /// 返回一份只修改了单个轴的副本
    pub fn with(mut self, axis: Axis, value: T) -> Self {
        self[axis] = value;
        self
    }
}

impl AxisValues<f64> {
    /// 所有轴是否在容差内相等
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        Axis::ALL
            .iter()
            .all(|&a| (self[a] - other[a]).abs() <= tolerance)
    }
}

impl<T> Index<Axis> for AxisValues<T> {
    type Output = T;

    fn index(&self, axis: Axis) -> &T {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }
}

impl<T> IndexMut<Axis> for AxisValues<T> {
    fn index_mut(&mut self, axis: Axis) -> &mut T {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
        }
    }
}

/// 轴集合（位图）
///
/// 用于报告“哪些轴被限位裁剪”“哪些轴出现耦合”等结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct AxisSet(u8);

impl AxisSet {
    pub const EMPTY: AxisSet = AxisSet(0);

    pub fn insert(&mut self, axis: Axis) {
        self.0 |= 1 << axis.index();
    }

    pub fn remove(&mut self, axis: Axis) {
        self.0 &= !(1 << axis.index());
    }

    pub const fn contains(self, axis: Axis) -> bool {
        self.0 & (1 << axis as u8) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = Axis> {
        Axis::ALL.into_iter().filter(move |&a| self.contains(a))
    }
}

impl FromIterator<Axis> for AxisSet {
    fn from_iter<I: IntoIterator<Item = Axis>>(iter: I) -> Self {
        let mut set = AxisSet::EMPTY;
        for axis in iter {
            set.insert(axis);
        }
        set
    }
}

impl fmt::Display for AxisSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letters: String = self.iter().map(Axis::letter).collect();
        write!(f, "{{{}}}", letters)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for AxisSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for axis in self.iter() {
            seq.serialize_element(&axis)?;
        }
        seq.end()
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for AxisSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let axes = Vec::<Axis>::deserialize(deserializer)?;
        Ok(axes.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_letter_roundtrip() {
        for axis in Axis::ALL {
            assert_eq!(Axis::from_letter(axis.letter()).unwrap(), axis);
            assert_eq!(
                Axis::from_letter(axis.letter().to_ascii_lowercase()).unwrap(),
                axis
            );
        }
        assert!(matches!(
            Axis::from_letter('A'),
            Err(ProtocolError::InvalidAxis('A'))
        ));
    }

    #[test]
    fn test_axis_from_str() {
        assert_eq!("y".parse::<Axis>().unwrap(), Axis::Y);
        assert_eq!(" Z ".parse::<Axis>().unwrap(), Axis::Z);
        assert!("XY".parse::<Axis>().is_err());
        assert!("".parse::<Axis>().is_err());
    }

    #[test]
    fn test_axis_values_index_and_with() {
        let v = AxisValues::new(10.0, 20.0, 30.0);
        let moved = v.with(Axis::Y, 25.0);
        assert_eq!(moved, AxisValues::new(10.0, 25.0, 30.0));
        // 原值不变
        assert_eq!(v[Axis::Y], 20.0);
    }

    #[test]
    fn test_axis_values_map_keeps_axis_order() {
        let v = AxisValues::new(1, 2, 3).map(|axis, value| (axis, value * 10));
        assert_eq!(v.x, (Axis::X, 10));
        assert_eq!(v.y, (Axis::Y, 20));
        assert_eq!(v.z, (Axis::Z, 30));
    }

    #[test]
    fn test_axis_set_operations() {
        let mut set = AxisSet::EMPTY;
        assert!(set.is_empty());
        set.insert(Axis::Z);
        set.insert(Axis::X);
        set.insert(Axis::X);
        assert_eq!(set.len(), 2);
        assert!(set.contains(Axis::X));
        assert!(!set.contains(Axis::Y));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Axis::X, Axis::Z]);
        assert_eq!(set.to_string(), "{XZ}");
        set.remove(Axis::X);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Axis::Z]);
    }
}
