//! # 运动学模块
//!
//! 实现前向运动学算法，从广义坐标计算刚体的位置和姿态

use nalgebra::DVector;
use tracing::trace;

use super::error::{Result, SimError};
use super::spatial_algebra::SpatialMotion;
use super::transform::Transform;
use super::world::World;

/// 默认的旋转矩阵正交性容差
pub const DEFAULT_RENORMALIZE_TOLERANCE: f64 = 1e-9;

/// 前向运动学结果
#[derive(Debug, Clone, PartialEq)]
pub struct KinematicsData {
    /// 每个刚体的绝对位姿（body → world），地面为单位变换
    pub body_poses: Vec<Transform>,
    /// 每个关节子侧坐标系的绝对位姿 `X_parent ∘ A_parent ∘ J(q)`
    pub joint_frames: Vec<Transform>,
    /// 每个自由度的运动子空间 `cdof = Ad(F) · S`（世界坐标系原点，nv 列）
    pub cdof: Vec<SpatialMotion>,
    /// 本次计算中被重新正交化的位姿数
    pub renormalized: usize,
    /// 计算所用的广义坐标
    pub q: DVector<f64>,
}

impl KinematicsData {
    /// 刚体上一点（body 坐标系）的世界坐标
    pub fn body_point(&self, body: usize, local: &nalgebra::Vector3<f64>) -> nalgebra::Vector3<f64> {
        self.body_poses[body].transform_point(local)
    }
}

/// 前向运动学：从广义坐标计算刚体位置和姿态
///
/// ## 算法流程
///
/// 按深度优先先序（父体总在子体之前）单次遍历：
///
/// ```text
/// F_i     = X_parent ∘ A_parent ∘ J(q_i)     关节子侧坐标系
/// X_child = F_i ∘ A_child⁻¹
/// ```
///
/// 关节坐标系和刚体位姿若正交性误差超过容差，则做 Gram-Schmidt 重新正交化。
/// 同时把关节的运动子空间变换到世界坐标系：`cdof = Ad(F_i) · S_i(q_i)`。
///
pub fn forward_kinematics(world: &World, q: &DVector<f64>) -> Result<KinematicsData> {
    forward_kinematics_with_tolerance(world, q, DEFAULT_RENORMALIZE_TOLERANCE)
}

/// 同 [`forward_kinematics`]，可指定重新正交化容差
pub fn forward_kinematics_with_tolerance(
    world: &World,
    q: &DVector<f64>,
    renormalize_tolerance: f64,
) -> Result<KinematicsData> {
    if q.len() != world.nq() {
        return Err(SimError::configuration(format!(
            "q has {} entries, world expects {}",
            q.len(),
            world.nq()
        )));
    }

    let mut body_poses = Vec::with_capacity(world.nbody());
    let mut joint_frames = Vec::with_capacity(world.joints().len());
    let mut cdof = Vec::with_capacity(world.nv());
    let mut renormalized = 0;

    // 地面
    body_poses.push(Transform::identity());

    for joint in world.joints() {
        let qj = &q.as_slice()[joint.q_range()];
        let local = joint.kind.local_transform(qj)?;

        let mut frame = body_poses[joint.parent]
            .compose(&joint.parent_anchor)
            .compose(&local);
        if frame.orthogonality_error() > renormalize_tolerance {
            frame.renormalize();
            renormalized += 1;
            trace!(joint = %joint.name, "renormalized joint frame");
        }

        for s in joint.kind.motion_subspace(qj)? {
            cdof.push(frame.adjoint(&s));
        }

        let mut pose = frame.compose(&joint.child_anchor.inverse());
        if pose.orthogonality_error() > renormalize_tolerance {
            pose.renormalize();
            renormalized += 1;
            trace!(joint = %joint.name, "renormalized body pose");
        }
        joint_frames.push(frame);
        body_poses.push(pose);
    }

    Ok(KinematicsData {
        body_poses,
        joint_frames,
        cdof,
        renormalized,
        q: q.clone(),
    })
}
