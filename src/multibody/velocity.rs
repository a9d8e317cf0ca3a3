//! # 速度计算模块
//!
//! 计算空间速度、运动子空间及其时间导数

use nalgebra::DVector;

use super::error::{Result, SimError};
use super::kinematics::KinematicsData;
use super::spatial_algebra::{cross_motion, SpatialMotion};
use super::world::World;

/// 速度传播结果（全部在世界坐标系原点表示）
#[derive(Debug, Clone, PartialEq)]
pub struct VelocityData {
    /// 每个刚体的空间速度，地面为零
    pub body_velocities: Vec<SpatialMotion>,
    /// 运动子空间 `cdof`（见 [`KinematicsData::cdof`]）的时间导数
    pub cdof_dot: Vec<SpatialMotion>,
    /// 每个关节的附加加速度 `Ad(F) · bias_acceleration(q, q̇)`
    pub joint_bias: Vec<SpatialMotion>,
}

/// 计算空间速度和cdof_dot
///
/// ## 算法
///
/// 前向传播，从根到叶计算每个body的空间速度：
/// 1. 地面速度为0
/// 2. 对每个关节：
///    - cvel = cvel_parent + Σ cdof · qvel
///    - cdof_dot = cvel × cdof
///    - joint_bias = Ad(F) · bias_acceleration(q, q̇)
///
/// S 在关节子侧坐标系中是常量，而该坐标系与子刚体固连，
/// 所以 cdof 的导数由子刚体的速度决定。
///
pub fn compute_velocities(
    world: &World,
    kin: &KinematicsData,
    qvel: &DVector<f64>,
) -> Result<VelocityData> {
    if qvel.len() != world.nv() {
        return Err(SimError::configuration(format!(
            "qvel has {} entries, world expects {}",
            qvel.len(),
            world.nv()
        )));
    }

    let mut body_velocities = vec![SpatialMotion::zero(); world.nbody()];
    let mut cdof_dot = Vec::with_capacity(world.nv());
    let mut joint_bias = Vec::with_capacity(world.joints().len());

    for (j, joint) in world.joints().iter().enumerate() {
        let bias = joint.kind.bias_acceleration(
            &kin.q.as_slice()[joint.q_range()],
            &qvel.as_slice()[joint.v_range()],
        )?;
        joint_bias.push(kin.joint_frames[j].adjoint(&bias));

        let dofs = joint.v_range();
        let mut cvel = body_velocities[joint.parent];
        for k in dofs.clone() {
            cvel += kin.cdof[k] * qvel[k];
        }
        for k in dofs {
            cdof_dot.push(cross_motion(&cvel, &kin.cdof[k]));
        }
        body_velocities[joint.child] = cvel;
    }

    Ok(VelocityData {
        body_velocities,
        cdof_dot,
        joint_bias,
    })
}

/// 世界坐标系下刚体上一点的线速度
pub fn point_velocity(
    vel: &VelocityData,
    body: usize,
    point: &nalgebra::Vector3<f64>,
) -> nalgebra::Vector3<f64> {
    vel.body_velocities[body].point_velocity(point)
}
