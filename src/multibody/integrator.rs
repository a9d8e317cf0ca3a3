//! # 时间积分模块
//!
//! 推进广义位置和速度。配置空间的更新逐关节进行（自由关节在 SE(3) 上积分），
//! 所以 q 与 q̇ 的长度可以不同。积分器本身不做任何截断或限位处理。

use nalgebra::DVector;

use super::error::{Result, SimError};
use super::world::World;

/// 配置空间积分：以恒定广义速度 `qvel` 运动 `dt` 后的坐标
///
/// 逐关节调用 [`JointKind::integrate`](super::joint::JointKind::integrate)。
pub fn integrate_configuration(
    world: &World,
    q: &DVector<f64>,
    qvel: &DVector<f64>,
    dt: f64,
) -> Result<DVector<f64>> {
    world.check_state(q, qvel)?;
    let mut next = q.clone();
    for joint in world.joints() {
        let qj = &q.as_slice()[joint.q_range()];
        let vj = &qvel.as_slice()[joint.v_range()];
        let updated = joint.kind.integrate(qj, vj, dt)?;
        next.as_mut_slice()[joint.q_range()].copy_from_slice(&updated);
    }
    Ok(next)
}

/// 半隐式（辛）欧拉积分器
///
/// ## 算法
///
/// ```text
/// q̇_{n+1} = q̇_n + h * q̈_n
/// q_{n+1} = q_n ⊕ h * q̇_{n+1}
/// ```
///
/// 先更新速度，再用新速度更新位置。
pub fn semi_implicit_euler(
    world: &World,
    q: &DVector<f64>,
    qvel: &DVector<f64>,
    qacc: &DVector<f64>,
    dt: f64,
) -> Result<(DVector<f64>, DVector<f64>)> {
    if qacc.len() != qvel.len() {
        return Err(SimError::configuration(format!(
            "qacc has {} entries, qvel has {}",
            qacc.len(),
            qvel.len()
        )));
    }
    let qvel_next = qvel + qacc * dt;
    let q_next = integrate_configuration(world, q, &qvel_next, dt)?;
    Ok((q_next, qvel_next))
}

/// RK4 (Runge-Kutta 4阶) 时间积分器
///
/// ## 应用到多体系统
///
/// 对于二阶系统 y = [q, q̇]，dy/dt = [q̇, q̈]，`acceleration(q, q̇)` 给出 q̈。
/// 中间状态的位置用 `integrate_configuration` 计算：
///
/// ```text
/// k1 = (q̇₀,           f(q₀, q̇₀))
/// k2 = (q̇₀ + h/2 a1,  f(q₀ ⊕ h/2 v1, q̇₀ + h/2 a1))
/// k3 = (q̇₀ + h/2 a2,  f(q₀ ⊕ h/2 v2, q̇₀ + h/2 a2))
/// k4 = (q̇₀ + h a3,    f(q₀ ⊕ h v3,   q̇₀ + h a3))
/// q₁ = q₀ ⊕ h/6 (v1 + 2v2 + 2v3 + v4)
/// q̇₁ = q̇₀ + h/6 (a1 + 2a2 + 2a3 + a4)
/// ```
///
/// 局部截断误差 O(h⁵)。`qacc0` 是调用方已经算好的第一级加速度。
pub fn rk4<F>(
    world: &World,
    q0: &DVector<f64>,
    qvel0: &DVector<f64>,
    qacc0: &DVector<f64>,
    dt: f64,
    mut acceleration: F,
) -> Result<(DVector<f64>, DVector<f64>)>
where
    F: FnMut(&DVector<f64>, &DVector<f64>) -> Result<DVector<f64>>,
{
    let half = 0.5 * dt;

    // Stage 1
    let v1 = qvel0.clone();
    let a1 = qacc0.clone();

    // Stage 2
    let v2 = qvel0 + &a1 * half;
    let q2 = integrate_configuration(world, q0, &v1, half)?;
    let a2 = acceleration(&q2, &v2)?;

    // Stage 3
    let v3 = qvel0 + &a2 * half;
    let q3 = integrate_configuration(world, q0, &v2, half)?;
    let a3 = acceleration(&q3, &v3)?;

    // Stage 4
    let v4 = qvel0 + &a3 * dt;
    let q4 = integrate_configuration(world, q0, &v3, dt)?;
    let a4 = acceleration(&q4, &v4)?;

    let v_avg = (&v1 + &v2 * 2.0 + &v3 * 2.0 + &v4) / 6.0;
    let a_avg = (&a1 + &a2 * 2.0 + &a3 * 2.0 + &a4) / 6.0;

    let q_next = integrate_configuration(world, q0, &v_avg, dt)?;
    let qvel_next = qvel0 + a_avg * dt;
    Ok((q_next, qvel_next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multibody::dynamics::{evaluate, forward_dynamics};
    use crate::multibody::joint::JointKind;
    use crate::multibody::model::Body;
    use crate::multibody::world::{JointSpec, SceneSpec, GROUND};
    use crate::multibody::STANDARD_GRAVITY;
    use approx::assert_relative_eq;
    use nalgebra::{UnitQuaternion, Vector3};

    fn pendulum() -> World {
        let mut spec = SceneSpec::new();
        spec.add_body(Body::point_mass("bob", 1.0, Vector3::new(0.0, 0.0, -0.5)))
            .add_joint(JointSpec::new("pivot", JointKind::Revolute { axis: Vector3::x() }, GROUND, "bob"));
        World::build(&spec).unwrap()
    }

    fn pendulum_acceleration(world: &World, q: &DVector<f64>, qvel: &DVector<f64>) -> Result<DVector<f64>> {
        let data = evaluate(world, q, qvel, &STANDARD_GRAVITY, 1e-9)?;
        forward_dynamics(&data.factorization, &DVector::zeros(world.nv()), &data.bias)
    }

    #[test]
    fn test_rk4_integration() {
        // 从水平位置释放的单摆
        let world = pendulum();
        let mut q = DVector::from_element(1, std::f64::consts::FRAC_PI_2);
        let mut qvel = DVector::zeros(1);

        let dt = 0.001;
        for _ in 0..10 {
            let qacc = pendulum_acceleration(&world, &q, &qvel).unwrap();
            let (qn, vn) = rk4(&world, &q, &qvel, &qacc, dt, |q, v| pendulum_acceleration(&world, q, v)).unwrap();
            q = qn;
            qvel = vn;
        }

        // 单摆向下摆动（角度减小，速度为负）
        assert!(q[0] < std::f64::consts::FRAC_PI_2);
        assert!(qvel[0] < 0.0);
        // 初始加速度 -g/L = -19.62，0.01s 后速度约 -0.196
        assert_relative_eq!(qvel[0], -0.1962, epsilon = 1e-4);
    }

    #[test]
    fn test_rk4_conserves_energy_better_than_euler() {
        let world = pendulum();
        let energy = |q: &DVector<f64>, v: &DVector<f64>| 0.5 * 0.25 * v[0] * v[0] - 9.81 * 0.5 * q[0].cos();
        let q0 = DVector::from_element(1, 1.0);
        let v0 = DVector::zeros(1);
        let e0 = energy(&q0, &v0);
        let dt = 0.01;

        let (mut q_rk, mut v_rk) = (q0.clone(), v0.clone());
        let (mut q_eu, mut v_eu) = (q0.clone(), v0.clone());
        let (mut err_rk, mut err_eu) = (0.0_f64, 0.0_f64);
        for _ in 0..200 {
            let a = pendulum_acceleration(&world, &q_rk, &v_rk).unwrap();
            (q_rk, v_rk) = rk4(&world, &q_rk, &v_rk, &a, dt, |q, v| pendulum_acceleration(&world, q, v)).unwrap();
            let a = pendulum_acceleration(&world, &q_eu, &v_eu).unwrap();
            (q_eu, v_eu) = semi_implicit_euler(&world, &q_eu, &v_eu, &a, dt).unwrap();
            err_rk = err_rk.max((energy(&q_rk, &v_rk) - e0).abs());
            err_eu = err_eu.max((energy(&q_eu, &v_eu) - e0).abs());
        }
        assert!(err_rk < err_eu);
        assert!(err_rk < 1e-4);
    }

    #[test]
    fn test_free_joint_configuration_update() {
        let mut spec = SceneSpec::new();
        spec.add_body(Body::point_mass("ball", 1.0, Vector3::zeros()))
            .add_joint(JointSpec::new("free", JointKind::Free, GROUND, "ball"));
        let world = World::build(&spec).unwrap();

        // 绕 z 转 90°，体坐标系中沿 x 平移：合成运动沿圆弧
        let q = world.initial_q().clone();
        let qvel = DVector::from_vec(vec![0.0, 0.0, std::f64::consts::FRAC_PI_2, 1.0, 0.0, 0.0]);
        let next = integrate_configuration(&world, &q, &qvel, 1.0).unwrap();

        let rotation = UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(next[3], next[4], next[5], next[6]));
        assert_relative_eq!(rotation.angle(), std::f64::consts::FRAC_PI_2, epsilon = 1e-12);
        assert_relative_eq!(next.rows(3, 4).norm(), 1.0, epsilon = 1e-12);
        // 半径 2/π 的四分之一圆
        let r = 2.0 / std::f64::consts::PI;
        assert_relative_eq!(Vector3::new(next[0], next[1], next[2]), Vector3::new(r, r, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let world = pendulum();
        let q = DVector::zeros(1);
        assert!(semi_implicit_euler(&world, &q, &DVector::zeros(1), &DVector::zeros(2), 0.01).is_err());
        assert!(integrate_configuration(&world, &q, &DVector::zeros(3), 0.01).is_err());
    }
}
