//! 三关节机械臂正/逆运动学
//!
//! 结构：底座旋转（J1）+ 肩（J2）+ 肘（J3）。
//!
//! # 角度约定
//!
//! - J1：0° 指向 +X，俯视逆时针为正
//! - J2：0° 上臂水平向前，抬起为正
//! - J3：0° 前臂与上臂共线，向上弯曲为正
//!
//! 所有角度以度为单位，长度以毫米为单位。

use crate::error::KinematicsError;
use armlink_protocol::AxisValues;
use std::fmt;

/// 距离小于该值视为目标位于肩关节处
const FOLD_EPSILON: f64 = 0.001;

/// 机械臂几何参数（mm）
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RobotConfig {
    /// 底座高度（肩关节离地高度）
    pub l1: f64,
    /// 上臂长度
    pub l2: f64,
    /// 前臂长度
    pub l3: f64,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            l1: 85.0,
            l2: 140.0,
            l3: 165.0,
        }
    }
}

impl RobotConfig {
    /// 最大可达距离（从肩关节算起）
    pub fn max_reach(&self) -> f64 {
        self.l2 + self.l3
    }

    /// 最小可达距离（从肩关节算起）
    pub fn min_reach(&self) -> f64 {
        (self.l2 - self.l3).abs()
    }

    /// 校验连杆长度
    ///
    /// # 错误
    ///
    /// 任一长度为非有限值或不大于 0 时返回 [`KinematicsError::InvalidLinkLength`]。
    pub fn validate(&self) -> Result<(), KinematicsError> {
        for (name, value) in [("l1", self.l1), ("l2", self.l2), ("l3", self.l3)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(KinematicsError::InvalidLinkLength { name, value });
            }
        }
        Ok(())
    }
}

/// 逆运动学失败原因
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Unreachable {
    /// 目标超出最大可达距离
    TooFar { distance: f64, max_reach: f64 },
    /// 目标落在最小可达距离之内
    TooClose { distance: f64, min_reach: f64 },
}

impl fmt::Display for Unreachable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Unreachable::TooFar {
                distance,
                max_reach,
            } => write!(f, "too far: {:.1}mm > {:.1}mm", distance, max_reach),
            Unreachable::TooClose {
                distance,
                min_reach,
            } => write!(f, "too close: {:.1}mm < {:.1}mm", distance, min_reach),
        }
    }
}

/// 关节角（度）
///
/// 逆运动学的结果总是一个值：不可达时 `valid == false`，
/// 并在 `error` 中给出原因，而不是返回近似解。
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JointAngles {
    /// 底座旋转
    pub j1: f64,
    /// 肩
    pub j2: f64,
    /// 肘
    pub j3: f64,
    pub valid: bool,
    pub error: Option<Unreachable>,
}

impl JointAngles {
    /// 有效的关节角
    pub const fn new(j1: f64, j2: f64, j3: f64) -> Self {
        Self {
            j1,
            j2,
            j3,
            valid: true,
            error: None,
        }
    }

    const fn unreachable(j1: f64, reason: Unreachable) -> Self {
        Self {
            j1,
            j2: 0.0,
            j3: 0.0,
            valid: false,
            error: Some(reason),
        }
    }

    /// 不可达原因文本（有效时为 `None`）
    pub fn reason(&self) -> Option<String> {
        self.error.map(|e| e.to_string())
    }

    /// 转为 GRBL 轴顺序：X = J2，Y = J3，Z = J1
    pub fn to_grbl_axes(&self) -> AxisValues<f64> {
        AxisValues::new(self.j2, self.j3, self.j1)
    }

    /// 从 GRBL 轴位置恢复关节角
    pub fn from_grbl_axes(axes: AxisValues<f64>) -> Self {
        Self::new(axes.z, axes.x, axes.y)
    }
}

/// 笛卡尔坐标（mm，底座坐标系）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CartesianPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl CartesianPosition {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// 欧氏距离
    pub fn distance_to(&self, other: &Self) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// 线性插值，`t ∈ [0, 1]`
    pub fn lerp(&self, other: &Self, t: f64) -> Self {
        Self {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            z: self.z + (other.z - self.z) * t,
        }
    }
}

/// 正运动学：关节角 → 末端位置
///
/// 全函数，任意输入都有结果。
///
/// # 示例
///
/// ```rust
/// use armlink_kinematics::{RobotConfig, forward_kinematics};
///
/// let pos = forward_kinematics(0.0, 0.0, 0.0, &RobotConfig::default());
/// assert!((pos.x - 305.0).abs() < 1e-9);
/// assert!((pos.z - 85.0).abs() < 1e-9);
/// ```
pub fn forward_kinematics(j1: f64, j2: f64, j3: f64, config: &RobotConfig) -> CartesianPosition {
    let j1 = j1.to_radians();
    let j2 = j2.to_radians();
    let forearm = j2 + j3.to_radians();

    let radius = config.l2 * j2.cos() + config.l3 * forearm.cos();
    let height = config.l1 + config.l2 * j2.sin() + config.l3 * forearm.sin();

    CartesianPosition {
        x: radius * j1.cos(),
        y: radius * j1.sin(),
        z: height,
    }
}

/// 肘关节位置（只与 J1、J2 有关）
pub fn elbow_position(j1: f64, j2: f64, config: &RobotConfig) -> CartesianPosition {
    let j1 = j1.to_radians();
    let j2 = j2.to_radians();
    let radius = config.l2 * j2.cos();
    CartesianPosition {
        x: radius * j1.cos(),
        y: radius * j1.sin(),
        z: config.l1 + config.l2 * j2.sin(),
    }
}

/// 逆运动学：末端位置 → 关节角
///
/// # 参数
///
/// - `elbow_up`: `true` 为肘部朝上的解（J3 ≤ 0），`false` 为镜像解
///
/// # 返回
///
/// - 超出最大可达距离：`valid = false`，原因 `"too far: …"`
/// - 小于最小可达距离：`valid = false`，原因 `"too close: …"`
/// - 目标位于肩关节处：折叠姿态 `(j1, 90, -90)`
pub fn inverse_kinematics(
    x: f64,
    y: f64,
    z: f64,
    config: &RobotConfig,
    elbow_up: bool,
) -> JointAngles {
    let j1 = y.atan2(x).to_degrees();

    let r = x.hypot(y);
    let h = z - config.l1;
    let d_sq = r * r + h * h;
    let d = d_sq.sqrt();

    let max_reach = config.max_reach();
    let min_reach = config.min_reach();

    if d > max_reach {
        return JointAngles::unreachable(
            j1,
            Unreachable::TooFar {
                distance: d,
                max_reach,
            },
        );
    }
    if d < FOLD_EPSILON {
        return JointAngles::new(j1, 90.0, -90.0);
    }
    if d < min_reach {
        return JointAngles::unreachable(
            j1,
            Unreachable::TooClose {
                distance: d,
                min_reach,
            },
        );
    }

    // 余弦定理求肘部内角
    let cos_inner =
        ((config.l2 * config.l2 + config.l3 * config.l3 - d_sq) / (2.0 * config.l2 * config.l3))
            .clamp(-1.0, 1.0);
    let inner = cos_inner.acos();
    let bend = std::f64::consts::PI - inner;

    let j3 = if elbow_up { -bend } else { bend };

    // 上臂与肩-目标连线的夹角；atan2 形式在 L3 > L2 时也能给出钝角
    let alpha = h.atan2(r);
    let beta = (config.l3 * inner.sin()).atan2(config.l2 + config.l3 * bend.cos());
    let j2 = if elbow_up { alpha + beta } else { alpha - beta };

    JointAngles::new(j1, j2.to_degrees(), j3.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!((a - b).abs() <= tol, "{a} vs {b} (tol {tol})");
    }

    #[test]
    fn test_default_config() {
        let c = RobotConfig::default();
        assert_eq!(c.max_reach(), 305.0);
        assert_eq!(c.min_reach(), 25.0);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_lengths() {
        let c = RobotConfig {
            l2: 0.0,
            ..Default::default()
        };
        assert_eq!(
            c.validate(),
            Err(KinematicsError::InvalidLinkLength {
                name: "l2",
                value: 0.0
            })
        );
        let c = RobotConfig {
            l3: f64::NAN,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_fk_home_pose() {
        let pos = forward_kinematics(0.0, 0.0, 0.0, &RobotConfig::default());
        assert_close(pos.x, 305.0, 1e-9);
        assert_close(pos.y, 0.0, 1e-9);
        assert_close(pos.z, 85.0, 1e-9);
    }

    #[test]
    fn test_shoulder_45_elbow_position() {
        // 肩抬起 45°：肘点位于 (99.0, 0, 184.0)
        let config = RobotConfig::default();
        let elbow = elbow_position(0.0, 45.0, &config);
        assert_close(elbow.x, 99.0, 0.5);
        assert_close(elbow.z, 184.0, 0.5);

        // 前臂继续沿同一方向延伸
        let tip = forward_kinematics(0.0, 45.0, 0.0, &config);
        assert_close(tip.x, 305.0 * 45f64.to_radians().cos(), 1e-9);
        assert_close(tip.z, 85.0 + 305.0 * 45f64.to_radians().sin(), 1e-9);
    }

    #[test]
    fn test_ik_concrete_point() {
        let config = RobotConfig::default();
        let angles = inverse_kinematics(200.0, 0.0, 150.0, &config, true);
        assert!(angles.valid);
        assert!(angles.error.is_none());
        let back = forward_kinematics(angles.j1, angles.j2, angles.j3, &config);
        assert!(back.distance_to(&CartesianPosition::new(200.0, 0.0, 150.0)) < 0.1);
    }

    #[test]
    fn test_ik_too_far() {
        let config = RobotConfig::default();
        let angles = inverse_kinematics(305.001, 0.0, 85.0, &config, true);
        assert!(!angles.valid);
        assert_eq!(angles.reason().as_deref(), Some("too far: 305.0mm > 305.0mm"));
        assert_eq!((angles.j2, angles.j3), (0.0, 0.0));
    }

    #[test]
    fn test_ik_too_close() {
        let config = RobotConfig::default();
        // 距肩 12.5mm（最小可达距离的一半）
        let angles = inverse_kinematics(0.0, 12.5, 85.0, &config, true);
        assert!(!angles.valid);
        assert_eq!(angles.reason().as_deref(), Some("too close: 12.5mm < 25.0mm"));
        assert!(matches!(angles.error, Some(Unreachable::TooClose { .. })));
        assert_close(angles.j1, 90.0, 1e-9);
    }

    #[test]
    fn test_ik_fold_at_shoulder() {
        let angles = inverse_kinematics(0.0, 0.0, 85.0, &RobotConfig::default(), true);
        assert!(angles.valid);
        assert_eq!((angles.j2, angles.j3), (90.0, -90.0));
    }

    #[test]
    fn test_grbl_axis_order() {
        let angles = JointAngles::new(10.0, 20.0, 30.0);
        assert_eq!(angles.to_grbl_axes(), AxisValues::new(20.0, 30.0, 10.0));
        let back = JointAngles::from_grbl_axes(AxisValues::new(20.0, 30.0, 10.0));
        assert_eq!((back.j1, back.j2, back.j3), (10.0, 20.0, 30.0));
    }

    #[test]
    fn test_lerp_and_distance() {
        let a = CartesianPosition::new(0.0, 0.0, 0.0);
        let b = CartesianPosition::new(3.0, 4.0, 0.0);
        assert_eq!(a.distance_to(&b), 5.0);
        assert_eq!(a.lerp(&b, 0.5), CartesianPosition::new(1.5, 2.0, 0.0));
    }

    /// 在可达壳层内按球坐标生成目标点
    fn reachable_point() -> impl Strategy<Value = (f64, f64, f64)> {
        let config = RobotConfig::default();
        let lo = config.min_reach() + 0.5;
        let hi = config.max_reach() - 0.5;
        (lo..hi, -89.0f64..89.0, -179.0f64..179.0).prop_map(move |(d, elev, azim)| {
            let (elev, azim) = (elev.to_radians(), azim.to_radians());
            let r = d * elev.cos();
            (
                r * azim.cos(),
                r * azim.sin(),
                config.l1 + d * elev.sin(),
            )
        })
    }

    proptest! {
        #[test]
        fn prop_ik_fk_roundtrip((x, y, z) in reachable_point(), elbow_up in any::<bool>()) {
            let config = RobotConfig::default();
            let angles = inverse_kinematics(x, y, z, &config, elbow_up);
            prop_assert!(angles.valid);
            let back = forward_kinematics(angles.j1, angles.j2, angles.j3, &config);
            prop_assert!(back.distance_to(&CartesianPosition::new(x, y, z)) < 0.1);
        }
    }
}
