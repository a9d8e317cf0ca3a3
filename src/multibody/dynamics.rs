//! # 动力学模块
//!
//! 实现多体动力学核心算法：
//! - RNE (Recursive Newton-Euler Algorithm): 计算偏置力 c
//! - CRBA (Composite Rigid Body Algorithm): 计算质量矩阵 M
//! - Cholesky 分解求解前向动力学
//!
//! 运动方程：
//!
//! ```text
//! M(q) q̈ = τ - c(q, q̇)
//! ```
//!
//! 其中 τ 是执行器力与外力旋量映射到关节空间之和，c 包含重力、
//! 科里奥利/离心力与关节粘性阻尼。

use nalgebra::{Cholesky, DMatrix, DVector, Dyn, Vector3};

use super::error::{Result, SimError};
use super::kinematics::KinematicsData;
use super::model::{Body, SpatialInertia};
use super::spatial_algebra::{cross_force, SpatialForce, SpatialMotion};
use super::velocity::VelocityData;
use super::world::World;

/// 质量矩阵的 Cholesky 分解
pub type MassFactorization = Cholesky<f64, Dyn>;

/// 每个刚体在世界坐标系中的空间惯性
pub fn world_inertias(world: &World, kin: &KinematicsData) -> Vec<SpatialInertia> {
    world
        .bodies()
        .iter()
        .zip(&kin.body_poses)
        .map(|(body, pose)| body.spatial_inertia().transformed(pose))
        .collect()
}

/// 计算偏置力（使用完整的RNE算法，q̈ = 0）
///
/// ## 算法流程
///
/// ### 前向传递（计算加速度）
/// ```text
/// cacc_ground = [0; -g]           重力等效为地面向上加速
/// for each body (from root to leaf):
///     cacc = cacc_parent + joint_bias + Σ cdof_dot * qvel
///     cfrc_body = cinert * cacc + cvel ×* (cinert * cvel)
/// ```
///
/// ### 后向传递（累积力）
/// ```text
/// for each body (from leaf to root):
///     cfrc_body[parent] += cfrc_body[child]
/// ```
///
/// ### 投影到关节空间
/// ```text
/// c[k] = cdof[k] · cfrc_body[body(k)] + damping * qvel[k]
/// ```
///
/// 刚体粘性 `B` 的贡献为 `Σ Jᵢᵀ Ad*(Xᵢ) Bᵢ Vᵢ_body`，与外力旋量同样经后向累积投影。
///
pub fn compute_bias_forces(
    world: &World,
    kin: &KinematicsData,
    vel: &VelocityData,
    qvel: &DVector<f64>,
    gravity: &Vector3<f64>,
) -> DVector<f64> {
    let qacc = DVector::zeros(world.nv());
    let mut c = inverse_dynamics(world, kin, vel, qvel, &qacc, gravity);

    // 刚体粘性
    if world.bodies().iter().any(Body::has_viscosity) {
        let viscous = world
            .bodies()
            .iter()
            .zip(&kin.body_poses)
            .zip(&vel.body_velocities)
            .map(|((body, pose), v)| {
                if !body.has_viscosity() {
                    return SpatialForce::zero();
                }
                let local = pose.inverse_adjoint(v).to_vector();
                pose.co_adjoint(&SpatialForce::from_vector(&(body.viscosity * local)))
            })
            .collect();
        c += project_body_forces(world, kin, viscous);
    }

    // 被动力（阻尼）
    for joint in world.joints() {
        for k in joint.v_range() {
            c[k] += joint.damping * qvel[k];
        }
    }
    c
}

/// 逆动力学：给定 q̈，求所需的关节力（不含阻尼与转子惯量）
///
/// `compute_bias_forces` 是 q̈ = 0 时的特例。
pub fn inverse_dynamics(
    world: &World,
    kin: &KinematicsData,
    vel: &VelocityData,
    qvel: &DVector<f64>,
    qacc: &DVector<f64>,
    gravity: &Vector3<f64>,
) -> DVector<f64> {
    let nbody = world.nbody();
    let inertias = world_inertias(world, kin);

    // ===== 1. 前向传递：累积加速度，计算力 =====
    let mut cacc = vec![SpatialMotion::zero(); nbody];
    cacc[0] = SpatialMotion::linear(-gravity);
    let mut cfrc_body = vec![SpatialForce::zero(); nbody];

    for (j, joint) in world.joints().iter().enumerate() {
        let mut acc = cacc[joint.parent] + vel.joint_bias[j];
        for k in joint.v_range() {
            acc += vel.cdof_dot[k] * qvel[k] + kin.cdof[k] * qacc[k];
        }
        cacc[joint.child] = acc;

        let inertia = &inertias[joint.child];
        let cvel = &vel.body_velocities[joint.child];
        cfrc_body[joint.child] =
            inertia.mul_motion(&acc) + cross_force(cvel, &inertia.mul_motion(cvel));
    }

    // ===== 2. 后向传递 + 投影 =====
    project_body_forces(world, kin, cfrc_body)
}

/// 把每个刚体上的空间力沿树向根累积，再投影到关节空间
fn project_body_forces(
    world: &World,
    kin: &KinematicsData,
    mut cfrc_body: Vec<SpatialForce>,
) -> DVector<f64> {
    for child in (1..world.nbody()).rev() {
        if let Some(parent) = world.parent(child) {
            let f = cfrc_body[child];
            cfrc_body[parent] += f;
        }
    }

    let mut tau = DVector::zeros(world.nv());
    for (k, &body) in world.dof_body().iter().enumerate() {
        tau[k] = kin.cdof[k].dot(&cfrc_body[body]);
    }
    tau
}

/// 外力旋量 → 广义力
///
/// `wrenches[i]` 是作用在刚体 i 上的外力旋量（世界坐标系原点）。
/// 结果等于 Σ Jᵢᵀ wᵢ，通过后向累积得到，不显式形成雅可比矩阵。
pub fn map_body_wrenches(
    world: &World,
    kin: &KinematicsData,
    wrenches: &[SpatialForce],
) -> Result<DVector<f64>> {
    if wrenches.len() != world.nbody() {
        return Err(SimError::configuration(format!(
            "expected {} body wrenches, got {}",
            world.nbody(),
            wrenches.len()
        )));
    }
    Ok(project_body_forces(world, kin, wrenches.to_vec()))
}

/// 计算质量矩阵（使用 CRBA 算法）
///
/// ## 算法步骤
///
/// 1. **初始化复合惯性**: crb[i] = 每个body的世界系空间惯性
/// 2. **后向递推**: 从叶到根累积子树惯性 crb[parent] += crb[child]
/// 3. **祖先遍历**: 对每个dof j，F = crb[body(j)] * cdof[j]，
///    然后沿 dof_parent 链对每个祖先自由度 k 填写 M[k,j] = M[j,k] = cdof[k] · F
/// 4. 转子惯量加到对角线
///
/// 所有量都在世界坐标系中表示，复合惯性的累积不需要坐标变换。
/// 复杂度 O(n·depth)。
///
pub fn compute_mass_matrix(world: &World, kin: &KinematicsData) -> DMatrix<f64> {
    let nv = world.nv();
    let mut crb = world_inertias(world, kin);

    for child in (1..world.nbody()).rev() {
        if let Some(parent) = world.parent(child) {
            let c = crb[child];
            crb[parent] += c;
        }
    }

    let mut m = DMatrix::zeros(nv, nv);
    for j in 0..nv {
        let f = crb[world.dof_body()[j]].mul_motion(&kin.cdof[j]);
        m[(j, j)] = kin.cdof[j].dot(&f);

        let mut ancestor = world.dof_parent()[j];
        while let Some(k) = ancestor {
            let m_kj = kin.cdof[k].dot(&f);
            m[(k, j)] = m_kj;
            m[(j, k)] = m_kj;
            ancestor = world.dof_parent()[k];
        }
    }

    for joint in world.joints() {
        for k in joint.v_range() {
            m[(k, k)] += joint.armature;
        }
    }

    m
}

/// Cholesky 分解质量矩阵
///
/// 非有限或非正定时返回 `SingularInertia`
pub fn factorize(m: &DMatrix<f64>) -> Result<MassFactorization> {
    if m.iter().any(|x| !x.is_finite()) {
        return Err(SimError::singular_inertia(
            "mass matrix contains non-finite entries",
        ));
    }
    Cholesky::new(m.clone()).ok_or_else(|| {
        SimError::singular_inertia(format!(
            "mass matrix ({}x{}) is not positive definite",
            m.nrows(),
            m.ncols()
        ))
    })
}

/// 计算广义加速度：q̈ = M⁻¹ (τ - c)
pub fn forward_dynamics(
    factorization: &MassFactorization,
    tau: &DVector<f64>,
    bias: &DVector<f64>,
) -> Result<DVector<f64>> {
    let qacc = factorization.solve(&(tau - bias));
    if qacc.iter().any(|x| !x.is_finite()) {
        return Err(SimError::singular_inertia(
            "forward dynamics produced non-finite accelerations",
        ));
    }
    Ok(qacc)
}

/// 动力学中间量：一次位置/速度评估得到的全部结果
#[derive(Debug, Clone)]
pub struct DynamicsData {
    pub kinematics: KinematicsData,
    pub velocities: VelocityData,
    pub mass_matrix: DMatrix<f64>,
    pub factorization: MassFactorization,
    pub bias: DVector<f64>,
}

/// 依次执行运动学、速度、CRBA、RNE 与分解
pub fn evaluate(
    world: &World,
    q: &DVector<f64>,
    qvel: &DVector<f64>,
    gravity: &Vector3<f64>,
    renormalize_tolerance: f64,
) -> Result<DynamicsData> {
    let kinematics =
        super::kinematics::forward_kinematics_with_tolerance(world, q, renormalize_tolerance)?;
    let velocities = super::velocity::compute_velocities(world, &kinematics, qvel)?;
    let mass_matrix = compute_mass_matrix(world, &kinematics);
    let factorization = factorize(&mass_matrix)?;
    let bias = compute_bias_forces(world, &kinematics, &velocities, qvel, gravity);
    Ok(DynamicsData {
        kinematics,
        velocities,
        mass_matrix,
        factorization,
        bias,
    })
}
