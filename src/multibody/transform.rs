//! # 刚体变换模块
//!
//! 刚体变换 `X = (R, t)` 把 b 系中的点映射到 a 系：`p_a = R p_b + t`。
//!
//! ## 空间向量的坐标变换
//!
//! ```text
//! 运动 (adjoint):     ω_a = R ω_b
//!                     v_a = R v_b + t × (R ω_b)
//!
//! 力 (co-adjoint):    f_a = R f_b
//!                     τ_a = R τ_b + t × (R f_b)
//! ```
//!
//! 两者保持功率不变：`Ad(X)m · Ad*(X)f = m · f`。

use nalgebra::{Matrix3, Matrix6, Rotation3, Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use super::spatial_algebra::{SpatialForce, SpatialMotion};

/// 小角度阈值，低于此值时使用泰勒展开
const SMALL_ANGLE: f64 = 1e-8;

/// 用户给定的位姿（关节锚点、形状位姿）允许的正交性误差
pub const RIGID_TOLERANCE: f64 = 1e-9;

/// 3D 向量的反对称矩阵 `[v]×`
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// 刚体变换（旋转矩阵 + 平移）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// 3x3 正交旋转矩阵
    pub rotation: Matrix3<f64>,
    /// 平移向量
    pub translation: Vector3<f64>,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub fn new(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation,
        }
    }

    pub fn from_rotation(rotation: Matrix3<f64>) -> Self {
        Self {
            rotation,
            translation: Vector3::zeros(),
        }
    }

    /// 绕单位轴旋转 `angle` 弧度
    pub fn from_axis_angle(axis: &Unit<Vector3<f64>>, angle: f64) -> Self {
        Self::from_rotation(Rotation3::from_axis_angle(axis, angle).into_inner())
    }

    pub fn from_quaternion(rotation: &UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation: rotation.to_rotation_matrix().into_inner(),
            translation,
        }
    }

    /// 姿态的四元数表示（用于渲染与记录）
    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(self.rotation))
    }

    /// 组合 `self ∘ other`：先应用 other，再应用 self
    pub fn compose(&self, other: &Transform) -> Transform {
        Transform {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// 精确逆变换 `(Rᵀ, -Rᵀ t)`
    pub fn inverse(&self) -> Transform {
        let rt = self.rotation.transpose();
        Transform {
            rotation: rt,
            translation: -(rt * self.translation),
        }
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    pub fn transform_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * v
    }

    pub fn inverse_transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.transpose() * (p - self.translation)
    }

    /// 运动向量 b → a
    pub fn adjoint(&self, m: &SpatialMotion) -> SpatialMotion {
        let angular = self.rotation * m.angular;
        let linear = self.rotation * m.linear + self.translation.cross(&angular);
        SpatialMotion::new(angular, linear)
    }

    /// 力向量 b → a
    pub fn co_adjoint(&self, f: &SpatialForce) -> SpatialForce {
        let force = self.rotation * f.force;
        let torque = self.rotation * f.torque + self.translation.cross(&force);
        SpatialForce::new(torque, force)
    }

    /// 运动向量 a → b
    pub fn inverse_adjoint(&self, m: &SpatialMotion) -> SpatialMotion {
        let rt = self.rotation.transpose();
        SpatialMotion::new(
            rt * m.angular,
            rt * (m.linear - self.translation.cross(&m.angular)),
        )
    }

    /// 力向量 a → b
    pub fn inverse_co_adjoint(&self, f: &SpatialForce) -> SpatialForce {
        let rt = self.rotation.transpose();
        SpatialForce::new(
            rt * (f.torque - self.translation.cross(&f.force)),
            rt * f.force,
        )
    }

    /// 伴随矩阵
    ///
    /// ```text
    /// Ad = | R      0 |
    ///      | [t]×R  R |
    /// ```
    pub fn adjoint_matrix(&self) -> Matrix6<f64> {
        let mut ad = Matrix6::zeros();
        let tr = skew(&self.translation) * self.rotation;
        ad.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation);
        ad.fixed_view_mut::<3, 3>(3, 3).copy_from(&self.rotation);
        ad.fixed_view_mut::<3, 3>(3, 0).copy_from(&tr);
        ad
    }

    /// 余伴随矩阵
    ///
    /// ```text
    /// Ad* = | R  [t]×R |
    ///       | 0  R     |
    /// ```
    pub fn co_adjoint_matrix(&self) -> Matrix6<f64> {
        let mut ad = Matrix6::zeros();
        let tr = skew(&self.translation) * self.rotation;
        ad.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation);
        ad.fixed_view_mut::<3, 3>(3, 3).copy_from(&self.rotation);
        ad.fixed_view_mut::<3, 3>(0, 3).copy_from(&tr);
        ad
    }

    /// SE(3) 指数映射：体坐标系中的旋量 `[ω; v]` 持续单位时间后的相对变换
    ///
    /// ```text
    /// R = I + sinθ/θ [ω]× + (1-cosθ)/θ² [ω]×²
    /// V = I + (1-cosθ)/θ² [ω]× + (θ-sinθ)/θ³ [ω]×²
    /// t = V v
    /// ```
    pub fn exp(twist: &SpatialMotion) -> Transform {
        let w = twist.angular;
        let theta_sq = w.norm_squared();
        let theta = theta_sq.sqrt();
        let wx = skew(&w);
        let wx2 = wx * wx;

        let (a, b, c) = if theta < SMALL_ANGLE {
            (1.0 - theta_sq / 6.0, 0.5 - theta_sq / 24.0, 1.0 / 6.0 - theta_sq / 120.0)
        } else {
            (
                theta.sin() / theta,
                (1.0 - theta.cos()) / theta_sq,
                (theta - theta.sin()) / (theta_sq * theta),
            )
        };

        let identity = Matrix3::identity();
        let rotation = identity + wx * a + wx2 * b;
        let v = identity + wx * b + wx2 * c;
        Transform {
            rotation,
            translation: v * twist.linear,
        }
    }

    /// 旋转部分的正交性误差 `‖RᵀR - I‖_F`
    pub fn orthogonality_error(&self) -> f64 {
        (self.rotation.transpose() * self.rotation - Matrix3::identity()).norm()
    }

    /// Gram-Schmidt 重新正交化，保持第一列方向
    pub fn renormalize(&mut self) {
        let c0 = self.rotation.column(0).normalize();
        let c1 = self.rotation.column(1).into_owned();
        let c1 = (c1 - c0 * c0.dot(&c1)).normalize();
        let c2 = c0.cross(&c1);
        self.rotation = Matrix3::from_columns(&[c0, c1, c2]);
    }

    pub fn is_finite(&self) -> bool {
        self.rotation.iter().chain(self.translation.iter()).all(|x| x.is_finite())
    }

    /// 有限、旋转部分正交（误差不超过 `tolerance`）且行列式为正
    pub fn is_rigid(&self, tolerance: f64) -> bool {
        self.is_finite()
            && self.orthogonality_error() <= tolerance
            && self.rotation.determinant() > 0.0
    }

    /// 在容差内比较两个变换
    pub fn approx_eq(&self, other: &Transform, eps: f64) -> bool {
        (self.rotation - other.rotation).amax() <= eps
            && (self.translation - other.translation).amax() <= eps
    }
}
