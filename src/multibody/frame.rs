//! # 命名坐标系
//!
//! 固连在刚体上的坐标系（末端执行器、传感器安装点等）的位姿、
//! 速度和雅可比矩阵。速度与雅可比都在坐标系自身中表示。

use nalgebra::DMatrix;

use super::error::{Result, SimError};
use super::kinematics::KinematicsData;
use super::spatial_algebra::SpatialMotion;
use super::transform::Transform;
use super::velocity::VelocityData;
use super::world::{FrameInstance, World};

fn lookup(world: &World, frame: usize) -> Result<&FrameInstance> {
    world
        .frames()
        .get(frame)
        .ok_or_else(|| SimError::configuration(format!("unknown frame index {frame}")))
}

/// 坐标系的绝对位姿（frame → world）
pub fn frame_pose(world: &World, kin: &KinematicsData, frame: usize) -> Result<Transform> {
    let f = lookup(world, frame)?;
    Ok(kin.body_poses[f.body].compose(&f.pose))
}

/// 坐标系的空间速度，在坐标系自身中表示
pub fn frame_twist(
    world: &World,
    kin: &KinematicsData,
    vel: &VelocityData,
    frame: usize,
) -> Result<SpatialMotion> {
    let f = lookup(world, frame)?;
    let pose = kin.body_poses[f.body].compose(&f.pose);
    Ok(pose.inverse_adjoint(&vel.body_velocities[f.body]))
}

/// 坐标系速度雅可比 `J`（6 × nv），满足 `twist = J · q̇`
///
/// 只有从所在刚体到根的关节自由度对应非零列。
pub fn frame_jacobian(world: &World, kin: &KinematicsData, frame: usize) -> Result<DMatrix<f64>> {
    let f = lookup(world, frame)?;
    let pose = kin.body_poses[f.body].compose(&f.pose);
    let mut jacobian = DMatrix::zeros(6, world.nv());
    for k in world.supporting_dofs(f.body) {
        let column = pose.inverse_adjoint(&kin.cdof[k]).to_vector();
        jacobian.column_mut(k).copy_from(&column);
    }
    Ok(jacobian)
}
