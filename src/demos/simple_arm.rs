//! # Simple Arm Demo
//!
//! 平面三连杆机械臂（肩、肘、腕三个绕Z轴的转动关节），在XY平面内运动，
//! 重力沿-Y方向。
//!
//! 每个连杆是长方体，半边长 `(l/20, l/2, l/20)`，body坐标系原点在连杆根部，
//! 连杆沿+Y延伸。

use nalgebra::Vector3;

use super::Visual;
use crate::multibody::*;

pub const LENGTHS: [f64; 3] = [0.5, 0.4, 0.2];
pub const MASSES: [f64; 3] = [1.0, 0.8, 0.2];
const NAMES: [&str; 3] = ["arm", "forearm", "hand"];
const JOINTS: [&str; 3] = ["shoulder", "elbow", "wrist"];

fn half_extents(length: f64) -> Vector3<f64> {
    Vector3::new(length / 20.0, length / 2.0, length / 20.0)
}

/// 描述机械臂场景
///
/// `with_shapes` 为真时给每个连杆附加长方体形状（不参与接触，只用于显示）。
pub fn scene(with_shapes: bool) -> SceneSpec {
    let mut spec = SceneSpec::new();
    let mut parent = GROUND;
    let mut parent_length = 0.0;
    for i in 0..3 {
        let (length, mass) = (LENGTHS[i], MASSES[i]);
        let he = half_extents(length);
        spec.add_body(Body::new(
            NAMES[i],
            mass,
            Vector3::new(0.0, length / 2.0, 0.0),
            box_inertia(&he, mass),
        ));
        spec.add_joint(
            JointSpec::new(JOINTS[i], JointKind::Revolute { axis: Vector3::z() }, parent, NAMES[i])
                .parent_anchor(Transform::from_translation(Vector3::new(0.0, parent_length, 0.0))),
        );
        if with_shapes {
            spec.add_shape(
                NAMES[i],
                NAMES[i],
                Transform::from_translation(Vector3::new(0.0, length / 2.0, 0.0)),
                Shape::Box { half_extents: he },
            );
        }
        parent = NAMES[i];
        parent_length = length;
    }
    // 末端执行器
    spec.add_shape(
        "end_effector",
        "hand",
        Transform::from_translation(Vector3::new(0.0, LENGTHS[2], 0.0)),
        Shape::Point,
    );
    spec.add_frame(
        "tool",
        "hand",
        Transform::from_translation(Vector3::new(0.0, LENGTHS[2], 0.0)),
    );
    spec
}

pub fn build() -> Result<World> {
    World::build(&scene(true))
}

pub fn config() -> SimulationConfig {
    SimulationConfig::default().gravity(Vector3::new(0.0, -9.81, 0.0))
}

pub fn visuals(world: &World) -> Vec<Visual> {
    Visual::from_shapes(world)
}
