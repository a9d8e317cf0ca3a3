//! # Hinge Chain Demo
//!
//! 由Hinge关节连接的Capsule链条在重力作用下摆动。
//!
//! ## 系统描述
//!
//! - **6个Capsule刚体**：每个长0.5m，半径0.05m，密度1000 kg/m³
//! - **6个Hinge关节**：交替沿X轴和Y轴旋转
//! - **固定点**：第一个关节固定在世界坐标原点
//! - **重力**：9.81 m/s²沿-Z方向
//!
//! ## 物理参数
//!
//! - 时间步长: 0.002s (500Hz)
//! - 积分器: RK4 (四阶龙格库塔)
//! - 关节阻尼: 0.1 N·m·s/rad
//! - 电机转子惯量: 0.01 kg·m²

use nalgebra::Vector3;
use tracing::debug;

use super::Visual;
use crate::multibody::*;

/// Capsule几何参数
pub const CAPSULE_HALF_LENGTH: f64 = 0.25; // 半长（capsule总长0.5m）
pub const CAPSULE_RADIUS: f64 = 0.05;
pub const CAPSULE_DENSITY: f64 = 1000.0;

/// 关节参数
pub const JOINT_DAMPING: f64 = 0.1;
pub const JOINT_ARMATURE: f64 = 0.01;

/// Hinge Chain数量
pub const NUM_CAPSULES: usize = 6;

/// 第一个关节的初始角度 (rad)，打破对称性
pub const INITIAL_ANGLE: f64 = 0.9;

/// 描述HingeChain场景
///
/// ## 几何结构
///
/// ```text
///     ● (anchor point at origin)
///     |
///     ├─── Capsule 1 (center at z=-0.25)
///     |    Joint 1 (at z=0, axis=X)
///     |
///     ├─── Capsule 2 (center at z=-0.75)
///     |    Joint 2 (at z=-0.5, axis=Y)
///     |
///     ├─── Capsule 3 (center at z=-1.25)
///     |    Joint 3 (at z=-1.0, axis=X)
///     ...
/// ```
///
/// ## 坐标系说明
///
/// - **世界坐标系**: Z轴向上为正，重力沿-Z方向
/// - **Body坐标系**: Capsule的质心在原点，长轴沿Z轴，从+0.25到-0.25
/// - **Joint坐标系**: Joint位于capsule的顶端（body坐标系中的z=+0.25处）
/// - **连接规则**: 每个capsule的底部（-0.25）连接到下一个capsule的顶部（+0.25）
///
pub fn scene(num_capsules: usize) -> SceneSpec {
    let (mass, inertia) = capsule_inertia(2.0 * CAPSULE_HALF_LENGTH, CAPSULE_RADIUS, CAPSULE_DENSITY);
    debug!(num_capsules, mass, "hinge chain");

    let top = Transform::from_translation(Vector3::new(0.0, 0.0, CAPSULE_HALF_LENGTH));
    let bottom = Transform::from_translation(Vector3::new(0.0, 0.0, -CAPSULE_HALF_LENGTH));

    let mut spec = SceneSpec::new();
    let mut parent = GROUND.to_string();
    for i in 0..num_capsules {
        let name = capsule_name(i);
        spec.add_body(Body::new(&name, mass, Vector3::zeros(), inertia));

        // 关节轴：交替X和Y轴
        let axis = if i % 2 == 0 { Vector3::x() } else { Vector3::y() };
        let parent_anchor = if i == 0 { Transform::identity() } else { bottom };
        let mut joint = JointSpec::new(format!("hinge{}", i + 1), JointKind::Revolute { axis }, &parent, &name)
            .parent_anchor(parent_anchor)
            .child_anchor(top)
            .damping(JOINT_DAMPING)
            .armature(JOINT_ARMATURE);
        if i == 0 {
            joint = joint.initial_q(vec![INITIAL_ANGLE]);
        }
        spec.add_joint(joint);
        parent = name;
    }
    spec
}

fn capsule_name(i: usize) -> String {
    format!("capsule{}", i + 1)
}

/// 装配HingeChain
pub fn build() -> Result<World> {
    World::build(&scene(NUM_CAPSULES))
}

/// RK4，500Hz
pub fn config() -> SimulationConfig {
    SimulationConfig::with_timestep(0.002).integrator(IntegratorKind::RungeKutta4)
}

/// 每个capsule一个可视体
pub fn visuals(world: &World) -> Vec<Visual> {
    (1..world.nbody())
        .map(|body| Visual::Capsule {
            body,
            pose: Transform::identity(),
            radius: CAPSULE_RADIUS,
            length: 2.0 * CAPSULE_HALF_LENGTH,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_create_hinge_chain() {
        let world = build().unwrap();

        assert_eq!(world.nq(), NUM_CAPSULES);
        assert_eq!(world.nv(), NUM_CAPSULES);
        assert_eq!(world.nbody(), NUM_CAPSULES + 1);
        assert_eq!(world.joints().len(), NUM_CAPSULES);
        assert_eq!(world.initial_q()[0], INITIAL_ANGLE);

        // 检查第一个关节固定在地面，其余链式连接
        assert_eq!(world.parent(1), Some(0));
        for i in 2..=NUM_CAPSULES {
            assert_eq!(world.parent(i), Some(i - 1));
        }
    }

    #[test]
    fn test_zero_pose_hangs_straight_down() {
        let world = World::build(&scene(3)).unwrap();
        let kin = forward_kinematics(&world, &nalgebra::DVector::zeros(3)).unwrap();
        for i in 1..=3 {
            let center = kin.body_poses[i].translation;
            assert_relative_eq!(center, Vector3::new(0.0, 0.0, -0.5 * i as f64 + 0.25), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_damped_chain_loses_energy() {
        let world = build().unwrap();
        let mut sim = Simulation::new(world, config()).unwrap();
        let mut energy = EnergyMonitor::new(STANDARD_GRAVITY);
        let timeline = uniform_timeline(0.0, 0.002, 500);
        simulate(&mut sim, &timeline, &mut [&mut energy]).unwrap();

        let samples = energy.samples();
        let first = samples[0].total();
        let last = samples[samples.len() - 1].total();
        assert!(last < first);
    }
}
