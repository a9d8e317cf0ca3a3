//! # Falling Ball Demo
//!
//! 自由小球从 1m 高处落到地面上，带水平初速度，随后撞上固定在地面上的方块。
//! 接触带库仑摩擦。

use nalgebra::Vector3;

use super::Visual;
use crate::multibody::*;

pub const BALL_RADIUS: f64 = 0.1;
pub const BALL_MASS: f64 = 1.0;
pub const DROP_HEIGHT: f64 = 1.0;
pub const FRICTION: f64 = 0.5;
pub const OBSTACLE_HALF_EXTENTS: Vector3<f64> = Vector3::new(0.1, 0.3, 0.15);
pub const OBSTACLE_POSITION: Vector3<f64> = Vector3::new(0.8, 0.0, 0.15);

pub fn scene(horizontal_speed: f64) -> SceneSpec {
    let mut spec = SceneSpec::new();
    spec.add_body(Body::new(
        "ball",
        BALL_MASS,
        Vector3::zeros(),
        sphere_inertia(BALL_RADIUS, BALL_MASS),
    ))
    .add_joint(
        JointSpec::new("free", JointKind::Free, GROUND, "ball")
            .initial_q(vec![0.0, 0.0, DROP_HEIGHT, 1.0, 0.0, 0.0, 0.0])
            .initial_qvel(vec![0.0, 0.0, 0.0, horizontal_speed, 0.0, 0.0]),
    )
    .add_shape("floor", GROUND, Transform::identity(), Shape::ground_plane())
    .add_shape(
        "obstacle",
        GROUND,
        Transform::from_translation(OBSTACLE_POSITION),
        Shape::Box {
            half_extents: OBSTACLE_HALF_EXTENTS,
        },
    )
    .add_shape("ball", "ball", Transform::identity(), Shape::Sphere { radius: BALL_RADIUS })
    .add_contact_pair("floor", "ball", FRICTION)
    .add_contact_pair("obstacle", "ball", FRICTION);
    spec
}

pub fn build() -> Result<World> {
    World::build(&scene(0.5))
}

pub fn config() -> SimulationConfig {
    SimulationConfig::with_timestep(0.001)
}

pub fn visuals(world: &World) -> Vec<Visual> {
    Visual::from_shapes(world)
}
