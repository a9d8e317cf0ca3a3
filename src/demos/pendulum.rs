//! # Pendulum Demo
//!
//! 单摆：转轴为 -Y 的转动关节，质点位于 (L, 0, 0)。q = 0 时摆杆水平，
//! 从静止释放后角加速度为 `-g cos(q) / L`。

use nalgebra::Vector3;

use super::Visual;
use crate::multibody::*;

pub const LENGTH: f64 = 1.0;
pub const BOB_MASS: f64 = 1.0;
pub const BOB_RADIUS: f64 = 0.05;

pub fn scene(length: f64, initial_angle: f64) -> SceneSpec {
    let mut spec = SceneSpec::new();
    spec.add_body(Body::point_mass("bob", BOB_MASS, Vector3::new(length, 0.0, 0.0)))
        .add_joint(
            JointSpec::new("pivot", JointKind::Revolute { axis: -Vector3::y() }, GROUND, "bob")
                .initial_q(vec![initial_angle]),
        );
    spec
}

pub fn build() -> Result<World> {
    World::build(&scene(LENGTH, 0.0))
}

pub fn config() -> SimulationConfig {
    SimulationConfig::high_fidelity()
}

pub fn visuals(_world: &World) -> Vec<Visual> {
    vec![Visual::Sphere {
        body: 1,
        pose: Transform::from_translation(Vector3::new(LENGTH, 0.0, 0.0)),
        radius: BOB_RADIUS,
    }]
}
