//! # 关节模块
//!
//! 五种关节构成一个封闭的枚举 [`JointKind`]。每种关节提供相同的一组操作：
//!
//! - `local_transform(q)`: 广义坐标 → 关节相对变换 `J(q)`
//! - `motion_subspace(q)`: 运动子空间 S（nv 列，在关节子侧坐标系中表示）
//! - `bias_acceleration(q, qvel)`: 速度相关的附加加速度
//! - `integrate(q, qvel, dt)`: 配置空间积分
//! - `neutral_position()`: 零位
//!
//! 其余模块不直接检查关节类型。
//!
//! ## 坐标约定
//!
//! ```text
//! X_child = X_parent ∘ A_parent ∘ J(q) ∘ A_child⁻¹
//! ```
//!
//! 子侧坐标系 `X_parent ∘ A_parent ∘ J(q)` 与子刚体固连。五种关节的 S 在该坐标系中
//! 都是常量，因此 `bias_acceleration` 恒为零。

use nalgebra::{Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use super::error::{Result, SimError};
use super::spatial_algebra::SpatialMotion;
use super::transform::{Transform, RIGID_TOLERANCE};

/// 关节类型
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum JointKind {
    /// 固定连接（0 自由度）
    Fixed,
    /// 绕轴转动（1 自由度）
    Revolute { axis: Vector3<f64> },
    /// 沿轴平移（1 自由度）
    Prismatic { axis: Vector3<f64> },
    /// 自由浮动（q: 平移 + 四元数 [w, x, y, z]，qvel: 体坐标系旋量 [ω; v]）
    Free,
    /// 螺旋：转动 θ 同时沿轴平移 pitch·θ
    Screw { axis: Vector3<f64>, pitch: f64 },
}

impl JointKind {
    /// 位置坐标数
    pub fn nq(&self) -> usize {
        match self {
            JointKind::Fixed => 0,
            JointKind::Revolute { .. } | JointKind::Prismatic { .. } | JointKind::Screw { .. } => 1,
            JointKind::Free => 7,
        }
    }

    /// 速度坐标数（自由度）
    pub fn nv(&self) -> usize {
        match self {
            JointKind::Fixed => 0,
            JointKind::Revolute { .. } | JointKind::Prismatic { .. } | JointKind::Screw { .. } => 1,
            JointKind::Free => 6,
        }
    }

    /// 检查关节参数，返回轴已归一化的副本
    pub fn validated(&self) -> Result<JointKind> {
        let unit_axis = |axis: &Vector3<f64>| -> Result<Vector3<f64>> {
            let norm = axis.norm();
            if !norm.is_finite() || norm < 1e-12 {
                return Err(SimError::configuration(format!(
                    "joint axis must be non-zero and finite, got {axis:?}"
                )));
            }
            Ok(axis / norm)
        };
        Ok(match self {
            JointKind::Fixed => JointKind::Fixed,
            JointKind::Free => JointKind::Free,
            JointKind::Revolute { axis } => JointKind::Revolute {
                axis: unit_axis(axis)?,
            },
            JointKind::Prismatic { axis } => JointKind::Prismatic {
                axis: unit_axis(axis)?,
            },
            JointKind::Screw { axis, pitch } => {
                if !pitch.is_finite() {
                    return Err(SimError::configuration(format!(
                        "screw pitch must be finite, got {pitch}"
                    )));
                }
                JointKind::Screw {
                    axis: unit_axis(axis)?,
                    pitch: *pitch,
                }
            }
        })
    }

    fn check_len(&self, q: &[f64]) -> Result<()> {
        if q.len() != self.nq() {
            return Err(SimError::configuration(format!(
                "{:?} joint expects {} coordinates, got {}",
                self,
                self.nq(),
                q.len()
            )));
        }
        Ok(())
    }

    /// 关节相对变换 J(q)
    pub fn local_transform(&self, q: &[f64]) -> Result<Transform> {
        self.check_len(q)?;
        Ok(match self {
            JointKind::Fixed => Transform::identity(),
            JointKind::Revolute { axis } => {
                Transform::from_axis_angle(&Unit::new_unchecked(*axis), q[0])
            }
            JointKind::Prismatic { axis } => Transform::from_translation(axis * q[0]),
            JointKind::Screw { axis, pitch } => {
                let mut x = Transform::from_axis_angle(&Unit::new_unchecked(*axis), q[0]);
                x.translation = axis * (pitch * q[0]);
                x
            }
            JointKind::Free => {
                let rotation = quaternion_from_coords(&q[3..7]);
                Transform::from_quaternion(&rotation, Vector3::new(q[0], q[1], q[2]))
            }
        })
    }

    /// 运动子空间 S（在子侧坐标系中）
    ///
    /// ```text
    /// Revolute:  [a; 0]
    /// Prismatic: [0; a]
    /// Screw:     [a; p·a]
    /// Free:      单位矩阵的 6 列
    /// ```
    pub fn motion_subspace(&self, q: &[f64]) -> Result<Vec<SpatialMotion>> {
        self.check_len(q)?;
        Ok(match self {
            JointKind::Fixed => Vec::new(),
            JointKind::Revolute { axis } => vec![SpatialMotion::angular(*axis)],
            JointKind::Prismatic { axis } => vec![SpatialMotion::linear(*axis)],
            JointKind::Screw { axis, pitch } => vec![SpatialMotion::new(*axis, axis * *pitch)],
            JointKind::Free => (0..6)
                .map(|i| {
                    let mut v = nalgebra::Vector6::zeros();
                    v[i] = 1.0;
                    SpatialMotion::from_vector(&v)
                })
                .collect(),
        })
    }

    /// 速度相关的附加加速度 Ṡq̇（在子侧坐标系中）
    ///
    /// 五种关节的 S 在子侧坐标系中均为常量，结果为零
    pub fn bias_acceleration(&self, q: &[f64], qvel: &[f64]) -> Result<SpatialMotion> {
        self.check_len(q)?;
        if qvel.len() != self.nv() {
            return Err(SimError::configuration(format!(
                "{:?} joint expects {} velocities, got {}",
                self,
                self.nv(),
                qvel.len()
            )));
        }
        Ok(SpatialMotion::zero())
    }

    /// 配置空间积分：以恒定速度 qvel 运动 dt 后的坐标
    ///
    /// 自由关节使用 SE(3) 指数映射：`J' = J ∘ exp(dt·[ω; v])`，四元数重新归一化
    pub fn integrate(&self, q: &[f64], qvel: &[f64], dt: f64) -> Result<Vec<f64>> {
        self.check_len(q)?;
        if qvel.len() != self.nv() {
            return Err(SimError::configuration(format!(
                "{:?} joint expects {} velocities, got {}",
                self,
                self.nv(),
                qvel.len()
            )));
        }
        Ok(match self {
            JointKind::Fixed => Vec::new(),
            JointKind::Revolute { .. } | JointKind::Prismatic { .. } | JointKind::Screw { .. } => {
                vec![q[0] + dt * qvel[0]]
            }
            JointKind::Free => {
                let rotation = quaternion_from_coords(&q[3..7]);
                let omega = Vector3::new(qvel[0], qvel[1], qvel[2]);
                let v = Vector3::new(qvel[3], qvel[4], qvel[5]);
                let step = Transform::exp(&SpatialMotion::new(omega * dt, v * dt));
                let translation = Vector3::new(q[0], q[1], q[2]) + rotation * step.translation;
                let rotation = rotation * UnitQuaternion::from_scaled_axis(omega * dt);
                let r = rotation.quaternion();
                vec![
                    translation.x,
                    translation.y,
                    translation.z,
                    r.w,
                    r.i,
                    r.j,
                    r.k,
                ]
            }
        })
    }

    /// 零位坐标
    pub fn neutral_position(&self) -> Vec<f64> {
        match self {
            JointKind::Free => vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
            _ => vec![0.0; self.nq()],
        }
    }

    /// 只有单自由度关节支持限位
    pub fn supports_limits(&self) -> bool {
        self.nv() == 1
    }
}

/// 从 [w, x, y, z] 构造单位四元数（自动归一化）
fn quaternion_from_coords(c: &[f64]) -> UnitQuaternion<f64> {
    UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(c[0], c[1], c[2], c[3]))
}

/// 关节
///
/// 连接父刚体与子刚体。锚点把关节坐标系放在父、子刚体上：
/// - `parent_anchor`: 关节坐标系在父刚体坐标系中的位姿
/// - `child_anchor`: 关节坐标系在子刚体坐标系中的位姿
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    pub name: String,
    pub kind: JointKind,
    /// 父刚体索引
    pub parent: usize,
    /// 子刚体索引
    pub child: usize,
    pub parent_anchor: Transform,
    pub child_anchor: Transform,
    /// 粘性阻尼系数（模拟摩擦和能量耗散）
    pub damping: f64,
    /// 电机转子惯量（附加到质量矩阵对角线）
    pub armature: f64,
    /// 位置限位 [lower, upper]，仅单自由度关节
    pub limits: Option<[f64; 2]>,
    /// 在 q 中的起始下标
    pub q_offset: usize,
    /// 在 qvel 中的起始下标
    pub v_offset: usize,
}

impl Joint {
    pub fn nq(&self) -> usize {
        self.kind.nq()
    }

    pub fn nv(&self) -> usize {
        self.kind.nv()
    }

    /// q 中属于本关节的下标范围
    pub fn q_range(&self) -> std::ops::Range<usize> {
        self.q_offset..self.q_offset + self.nq()
    }

    /// qvel 中属于本关节的下标范围
    pub fn v_range(&self) -> std::ops::Range<usize> {
        self.v_offset..self.v_offset + self.nv()
    }

    /// 检查阻尼、转子惯量、限位
    pub fn validate_parameters(&self) -> Result<()> {
        if !self.damping.is_finite() || self.damping < 0.0 {
            return Err(SimError::configuration(format!(
                "joint '{}': damping must be finite and >= 0, got {}",
                self.name, self.damping
            )));
        }
        if !self.armature.is_finite() || self.armature < 0.0 {
            return Err(SimError::configuration(format!(
                "joint '{}': armature must be finite and >= 0, got {}",
                self.name, self.armature
            )));
        }
        if let Some([lower, upper]) = self.limits {
            if !self.kind.supports_limits() {
                return Err(SimError::configuration(format!(
                    "joint '{}': limits are only supported on single-DOF joints",
                    self.name
                )));
            }
            if lower.is_nan() || upper.is_nan() || lower > upper {
                return Err(SimError::configuration(format!(
                    "joint '{}': invalid limits [{lower}, {upper}]",
                    self.name
                )));
            }
        }
        for (side, anchor) in [("parent", &self.parent_anchor), ("child", &self.child_anchor)] {
            if !anchor.is_rigid(RIGID_TOLERANCE) {
                return Err(SimError::configuration(format!(
                    "joint '{}': {side} anchor is not a rigid transform (orthogonality error {:e})",
                    self.name,
                    anchor.orthogonality_error()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_dimensions() {
        assert_eq!((JointKind::Fixed.nq(), JointKind::Fixed.nv()), (0, 0));
        assert_eq!((JointKind::Free.nq(), JointKind::Free.nv()), (7, 6));
        let screw = JointKind::Screw {
            axis: Vector3::z(),
            pitch: 0.1,
        };
        assert_eq!((screw.nq(), screw.nv()), (1, 1));
    }

    #[test]
    fn test_bias_acceleration() {
        let screw = JointKind::Screw {
            axis: Vector3::z(),
            pitch: 0.1,
        };
        assert_eq!(screw.bias_acceleration(&[0.3], &[2.0]).unwrap(), SpatialMotion::zero());
        let free = JointKind::Free;
        let q = free.neutral_position();
        assert_eq!(free.bias_acceleration(&q, &[1.0; 6]).unwrap(), SpatialMotion::zero());
        assert!(free.bias_acceleration(&q, &[1.0; 3]).is_err());
        assert!(screw.bias_acceleration(&[], &[1.0]).is_err());
    }

    #[test]
    fn test_validation() {
        assert!(JointKind::Revolute {
            axis: Vector3::zeros()
        }
        .validated()
        .is_err());
        assert!(JointKind::Screw {
            axis: Vector3::x(),
            pitch: f64::INFINITY
        }
        .validated()
        .is_err());

        let kind = JointKind::Prismatic {
            axis: Vector3::new(0.0, 3.0, 4.0),
        }
        .validated()
        .unwrap();
        match kind {
            JointKind::Prismatic { axis } => assert_relative_eq!(axis.norm(), 1.0),
            _ => unreachable!(),
        }

        // 坐标长度错误
        let err = JointKind::Free.local_transform(&[0.0; 3]).unwrap_err();
        assert!(err.is_assembly_error());
    }

    #[test]
    fn test_revolute_transform() {
        let kind = JointKind::Revolute { axis: Vector3::z() };
        let x = kind.local_transform(&[std::f64::consts::FRAC_PI_2]).unwrap();
        let p = x.transform_point(&Vector3::x());
        assert_relative_eq!(p, Vector3::y(), epsilon = 1e-12);
    }

    #[test]
    fn test_screw_transform() {
        let kind = JointKind::Screw {
            axis: Vector3::z(),
            pitch: 0.5,
        };
        let x = kind.local_transform(&[2.0]).unwrap();
        assert_relative_eq!(x.translation, Vector3::new(0.0, 0.0, 1.0), epsilon = 1e-12);
        let s = kind.motion_subspace(&[2.0]).unwrap();
        assert_relative_eq!(s[0].linear, Vector3::new(0.0, 0.0, 0.5));
    }

    #[test]
    fn test_free_integrate() {
        let kind = JointKind::Free;
        let q0 = kind.neutral_position();

        // 零速度：坐标不变
        let q1 = kind.integrate(&q0, &[0.0; 6], 0.01).unwrap();
        assert_eq!(q0, q1);

        // 纯平动
        let q2 = kind.integrate(&q0, &[0.0, 0.0, 0.0, 1.0, 2.0, 3.0], 0.5).unwrap();
        assert_relative_eq!(q2[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(q2[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(q2[2], 1.5, epsilon = 1e-12);

        // 绕 z 转 90°：体坐标系中的平动随之旋转
        let half_pi = std::f64::consts::FRAC_PI_2;
        let q3 = kind.integrate(&q0, &[0.0, 0.0, half_pi, 0.0, 0.0, 0.0], 1.0).unwrap();
        let x = kind.local_transform(&q3).unwrap();
        assert_relative_eq!(x.transform_vector(&Vector3::x()), Vector3::y(), epsilon = 1e-12);
        let q4 = kind.integrate(&q3, &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0], 1.0).unwrap();
        assert_relative_eq!(q4[1], 1.0, epsilon = 1e-12);
        let norm: f64 = q4[3..7].iter().map(|x| x * x).sum::<f64>().sqrt();
        assert_relative_eq!(norm, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_joint_parameter_validation() {
        let mut joint = Joint {
            name: "j".into(),
            kind: JointKind::Revolute { axis: Vector3::x() },
            parent: 0,
            child: 1,
            parent_anchor: Transform::identity(),
            child_anchor: Transform::identity(),
            damping: 0.1,
            armature: 0.0,
            limits: Some([-1.0, 1.0]),
            q_offset: 0,
            v_offset: 0,
        };
        assert!(joint.validate_parameters().is_ok());

        joint.limits = Some([1.0, -1.0]);
        assert!(joint.validate_parameters().is_err());

        joint.limits = Some([-1.0, 1.0]);
        joint.kind = JointKind::Free;
        assert!(joint.validate_parameters().is_err());

        joint.kind = JointKind::Fixed;
        joint.limits = None;
        joint.damping = -1.0;
        assert!(joint.validate_parameters().is_err());
    }
}
