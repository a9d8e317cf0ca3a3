//! # 空间代数模块
//!
//! 实现6D空间向量的运算，用于多体动力学计算。
//!
//! 基于Featherstone的空间代数理论。运动向量与力向量是两个不同的类型，
//! 前者在坐标变换下用伴随矩阵 (adjoint) 变换，后者用余伴随 (co-adjoint) 变换，
//! 类型系统保证两者不会混用。
//!
//! ## 空间向量格式
//!
//! 6D空间向量的布局:
//! ```text
//! v[6] = [ω_x, ω_y, ω_z, v_x, v_y, v_z]
//!        [角速度/力矩,  线速度/力]
//! ```
//!
//! 除特别说明外，本 crate 中的空间向量均在"世界坐标系原点"表示
//! （坐标轴与世界系平行，参考点为世界原点）。

use nalgebra::{Vector3, Vector6};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

/// 空间运动向量 (Spatial Motion Vector)
///
/// 表示6D运动: [角速度, 线速度]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpatialMotion {
    /// 角速度分量 (ω)
    pub angular: Vector3<f64>,
    /// 线速度分量 (v)
    pub linear: Vector3<f64>,
}

impl SpatialMotion {
    pub fn new(angular: Vector3<f64>, linear: Vector3<f64>) -> Self {
        Self { angular, linear }
    }

    pub fn zero() -> Self {
        Self {
            angular: Vector3::zeros(),
            linear: Vector3::zeros(),
        }
    }

    /// 纯转动
    pub fn angular(angular: Vector3<f64>) -> Self {
        Self::new(angular, Vector3::zeros())
    }

    /// 纯平动
    pub fn linear(linear: Vector3<f64>) -> Self {
        Self::new(Vector3::zeros(), linear)
    }

    /// 从 6D 向量创建 [ω_x, ω_y, ω_z, v_x, v_y, v_z]
    pub fn from_vector(v: &Vector6<f64>) -> Self {
        Self {
            angular: Vector3::new(v[0], v[1], v[2]),
            linear: Vector3::new(v[3], v[4], v[5]),
        }
    }

    /// 转换为 6D 向量
    pub fn to_vector(&self) -> Vector6<f64> {
        Vector6::new(
            self.angular.x,
            self.angular.y,
            self.angular.z,
            self.linear.x,
            self.linear.y,
            self.linear.z,
        )
    }

    /// 标量乘法
    pub fn scale(&self, s: f64) -> Self {
        Self {
            angular: self.angular * s,
            linear: self.linear * s,
        }
    }

    /// 运动叉积 `self × other`，见 [`cross_motion`]
    pub fn cross_motion(&self, other: &SpatialMotion) -> SpatialMotion {
        cross_motion(self, other)
    }

    /// 力叉积 `self ×* f`，见 [`cross_force`]
    pub fn cross_force(&self, f: &SpatialForce) -> SpatialForce {
        cross_force(self, f)
    }

    /// 与力向量的对偶积（功率）
    pub fn dot(&self, f: &SpatialForce) -> f64 {
        dot_motion_force(self, f)
    }

    /// 参考点 `p` 处的线速度
    pub fn point_velocity(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.linear + self.angular.cross(p)
    }

    pub fn is_finite(&self) -> bool {
        self.angular.iter().chain(self.linear.iter()).all(|x| x.is_finite())
    }
}

impl Add for SpatialMotion {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.angular + other.angular, self.linear + other.linear)
    }
}

impl Sub for SpatialMotion {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(self.angular - other.angular, self.linear - other.linear)
    }
}

impl Neg for SpatialMotion {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.angular, -self.linear)
    }
}

impl Mul<f64> for SpatialMotion {
    type Output = Self;

    fn mul(self, s: f64) -> Self {
        self.scale(s)
    }
}

impl AddAssign for SpatialMotion {
    fn add_assign(&mut self, other: Self) {
        self.angular += other.angular;
        self.linear += other.linear;
    }
}

/// 空间力向量 (Spatial Force Vector)
///
/// 表示6D力: [力矩, 力]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpatialForce {
    /// 力矩分量 (τ)
    pub torque: Vector3<f64>,
    /// 力分量 (f)
    pub force: Vector3<f64>,
}

impl SpatialForce {
    pub fn new(torque: Vector3<f64>, force: Vector3<f64>) -> Self {
        Self { torque, force }
    }

    pub fn zero() -> Self {
        Self {
            torque: Vector3::zeros(),
            force: Vector3::zeros(),
        }
    }

    /// 作用在点 `point` 上的纯力，换算到参考点（原点）
    ///
    /// ```text
    /// τ = p × f
    /// ```
    pub fn from_force_at_point(force: Vector3<f64>, point: Vector3<f64>) -> Self {
        Self::new(point.cross(&force), force)
    }

    pub fn from_vector(v: &Vector6<f64>) -> Self {
        Self {
            torque: Vector3::new(v[0], v[1], v[2]),
            force: Vector3::new(v[3], v[4], v[5]),
        }
    }

    pub fn to_vector(&self) -> Vector6<f64> {
        Vector6::new(
            self.torque.x,
            self.torque.y,
            self.torque.z,
            self.force.x,
            self.force.y,
            self.force.z,
        )
    }

    pub fn scale(&self, s: f64) -> Self {
        Self {
            torque: self.torque * s,
            force: self.force * s,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.torque.iter().chain(self.force.iter()).all(|x| x.is_finite())
    }
}

impl Add for SpatialForce {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.torque + other.torque, self.force + other.force)
    }
}

impl Sub for SpatialForce {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(self.torque - other.torque, self.force - other.force)
    }
}

impl Neg for SpatialForce {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.torque, -self.force)
    }
}

impl Mul<f64> for SpatialForce {
    type Output = Self;

    fn mul(self, s: f64) -> Self {
        self.scale(s)
    }
}

impl AddAssign for SpatialForce {
    fn add_assign(&mut self, other: Self) {
        self.torque += other.torque;
        self.force += other.force;
    }
}

/// 空间运动叉积 (Motion Cross-Product)
///
/// 计算 res = vel × m (Lie bracket)
///
/// ## 数学公式
///
/// ```text
/// res[0:3] = ω × ω_m
/// res[3:6] = ω × v_m + v × ω_m
/// ```
///
/// ## 用途
/// 运动子空间的时间导数: cdof_dot = cvel × cdof
///
pub fn cross_motion(vel: &SpatialMotion, m: &SpatialMotion) -> SpatialMotion {
    let omega = vel.angular;
    let v = vel.linear;

    let res_angular = omega.cross(&m.angular);
    let res_linear = omega.cross(&m.linear) + v.cross(&m.angular);

    SpatialMotion::new(res_angular, res_linear)
}

/// 空间力叉积 (Force Cross-Product)
///
/// 计算 res = vel ×* f (对偶算子，满足 vel ×* = -(vel ×)ᵀ)
///
/// ## 数学公式
///
/// ```text
/// res[0:3] = ω × τ + v × f
/// res[3:6] = ω × f
/// ```
///
/// ## 用途
/// 计算陀螺力: cvel ×* (I * cvel)
///
pub fn cross_force(vel: &SpatialMotion, f: &SpatialForce) -> SpatialForce {
    let omega = vel.angular;
    let v = vel.linear;

    let res_torque = omega.cross(&f.torque) + v.cross(&f.force);
    let res_force = omega.cross(&f.force);

    SpatialForce::new(res_torque, res_force)
}

/// 点积投影 (Dot Product)
///
/// 计算空间运动与空间力的点积，用于投影到关节空间
///
/// ```text
/// dot = ω·τ + v·f
/// ```
///
pub fn dot_motion_force(motion: &SpatialMotion, force: &SpatialForce) -> f64 {
    motion.angular.dot(&force.torque) + motion.linear.dot(&force.force)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cross_motion() {
        let vel = SpatialMotion::new(Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 1.0, 0.0));
        let m = SpatialMotion::new(Vector3::new(0.0, 1.0, 0.0), Vector3::new(1.0, 0.0, 0.0));

        let res = cross_motion(&vel, &m);

        // ω × ω_m = [1,0,0] × [0,1,0] = [0,0,1]
        assert_relative_eq!(res.angular, Vector3::new(0.0, 0.0, 1.0));
        // ω × v_m + v × ω_m = [1,0,0]×[1,0,0] + [0,1,0]×[0,1,0] = 0
        assert_relative_eq!(res.linear, Vector3::zeros());

        // 自身叉积为零
        let self_cross = cross_motion(&vel, &vel);
        assert_relative_eq!(self_cross.to_vector(), Vector6::zeros());
    }

    #[test]
    fn test_cross_force_is_dual() {
        // (v × m)·f = -m·(v ×* f)
        let v = SpatialMotion::new(Vector3::new(0.3, -1.2, 0.5), Vector3::new(2.0, 0.1, -0.7));
        let m = SpatialMotion::new(Vector3::new(-0.4, 0.9, 1.1), Vector3::new(0.2, 0.6, -1.5));
        let f = SpatialForce::new(Vector3::new(1.0, 2.0, -0.5), Vector3::new(-3.0, 0.4, 0.8));

        let lhs = cross_motion(&v, &m).dot(&f);
        let rhs = -m.dot(&cross_force(&v, &f));
        assert_relative_eq!(lhs, rhs, epsilon = 1e-12);
    }

    #[test]
    fn test_spatial_motion_ops() {
        let m1 = SpatialMotion::new(Vector3::new(1.0, 2.0, 3.0), Vector3::new(4.0, 5.0, 6.0));
        let m2 = SpatialMotion::new(Vector3::new(0.5, 1.0, 1.5), Vector3::new(2.0, 2.5, 3.0));

        let sum = m1 + m2;
        assert_relative_eq!(sum.angular.x, 1.5);
        assert_relative_eq!(sum.linear.z, 9.0);

        let scaled = m1 * 2.0;
        assert_relative_eq!(scaled.angular.y, 4.0);

        let back = SpatialMotion::from_vector(&m1.to_vector());
        assert_eq!(back, m1);
    }

    #[test]
    fn test_force_at_point() {
        // 在 (1,0,0) 处施加 +Z 方向的力，对原点产生 -Y 方向的力矩
        let f = SpatialForce::from_force_at_point(Vector3::new(0.0, 0.0, 2.0), Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(f.torque, Vector3::new(0.0, -2.0, 0.0));
        assert_relative_eq!(f.force, Vector3::new(0.0, 0.0, 2.0));
    }
}
