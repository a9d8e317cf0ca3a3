//! # Subtree COM计算模块
//!
//! 计算每个body及其所有子body的总质心位置

use nalgebra::Vector3;

use super::kinematics::KinematicsData;
use super::world::World;

/// 子树质量属性
#[derive(Debug, Clone, PartialEq)]
pub struct SubtreeMass {
    /// 子树总质量
    pub mass: Vec<f64>,
    /// 子树质心（世界坐标系）；零质量子树取刚体原点
    pub com: Vec<Vector3<f64>>,
}

/// 计算子树质心
///
/// ## 算法
///
/// 1. 初始化: weighted[i] = mass[i] * com_world[i]
/// 2. 后向累积(从叶到根): weighted[parent] += weighted[child]
/// 3. 归一化: com[i] = weighted[i] / subtree_mass[i]
///
/// 刚体按深度优先先序存储，逆序遍历即可保证子体先于父体。
///
pub fn compute_subtree_com(world: &World, kin: &KinematicsData) -> SubtreeMass {
    let nbody = world.nbody();

    let mut weighted: Vec<Vector3<f64>> = world
        .bodies()
        .iter()
        .zip(&kin.body_poses)
        .map(|(body, pose)| pose.transform_point(&body.com) * body.mass)
        .collect();
    let mut mass: Vec<f64> = world.bodies().iter().map(|b| b.mass).collect();

    for child in (1..nbody).rev() {
        if let Some(parent) = world.parent(child) {
            let (w, m) = (weighted[child], mass[child]);
            weighted[parent] += w;
            mass[parent] += m;
        }
    }

    let com = (0..nbody)
        .map(|i| {
            if mass[i] > 1e-12 {
                weighted[i] / mass[i]
            } else {
                kin.body_poses[i].translation
            }
        })
        .collect();

    SubtreeMass { mass, com }
}

/// 整个机构的总质量与质心
pub fn total_com(world: &World, kin: &KinematicsData) -> (f64, Vector3<f64>) {
    let subtree = compute_subtree_com(world, kin);
    (subtree.mass[0], subtree.com[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multibody::geometry::capsule_inertia;
    use crate::multibody::joint::JointKind;
    use crate::multibody::kinematics::forward_kinematics;
    use crate::multibody::model::Body;
    use crate::multibody::transform::Transform;
    use crate::multibody::world::{JointSpec, SceneSpec, GROUND};
    use approx::assert_relative_eq;

    fn capsule_chain(n: usize) -> World {
        let (mass, inertia) = capsule_inertia(0.5, 0.05, 1000.0);
        let mut spec = SceneSpec::new();
        let mut parent = GROUND.to_string();
        for i in 0..n {
            let name = format!("link{i}");
            spec.add_body(Body::new(&name, mass, Vector3::new(0.0, 0.0, -0.25), inertia));
            let anchor = if i == 0 {
                Transform::identity()
            } else {
                Transform::from_translation(Vector3::new(0.0, 0.0, -0.5))
            };
            spec.add_joint(
                JointSpec::new(format!("hinge{i}"), JointKind::Revolute { axis: Vector3::x() }, &parent, &name)
                    .parent_anchor(anchor),
            );
            parent = name;
        }
        World::build(&spec).unwrap()
    }

    #[test]
    fn test_subtree_com_single_body() {
        // 单个body，子树质心应该等于自身质心
        let world = capsule_chain(1);
        let kin = forward_kinematics(&world, world.initial_q()).unwrap();
        let subtree = compute_subtree_com(&world, &kin);

        assert_relative_eq!(subtree.com[1], Vector3::new(0.0, 0.0, -0.25), epsilon = 1e-12);
        assert_relative_eq!(subtree.mass[0], subtree.mass[1]);
    }

    #[test]
    fn test_subtree_com_two_bodies() {
        let world = capsule_chain(2);
        let kin = forward_kinematics(&world, world.initial_q()).unwrap();
        let subtree = compute_subtree_com(&world, &kin);

        // 两个等质量body的质心在 -0.25 和 -0.75，平均在 -0.5
        assert_relative_eq!(subtree.com[1].z, -0.5, epsilon = 1e-12);
        // 叶节点的子树质心等于自身质心
        assert_relative_eq!(subtree.com[2].z, -0.75, epsilon = 1e-12);

        let (total, com) = total_com(&world, &kin);
        assert_relative_eq!(total, 2.0 * world.bodies()[1].mass, epsilon = 1e-12);
        assert_relative_eq!(com.z, -0.5, epsilon = 1e-12);
    }
}
