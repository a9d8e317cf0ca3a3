//! # 演示程序模块
//!
//! 包含使用多体动力学框架的示例场景。每个场景提供 `build()`（装配 `World`）、
//! `config()`（推荐的仿真参数）和 `visuals()`（渲染用的几何体）。

pub mod falling_ball;
pub mod hinge_chain;
pub mod pendulum;
pub mod simple_arm;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::multibody::{Result, Shape, Simulation, SimulationConfig, Transform, World};

/// 渲染用的几何体，位姿相对于所在刚体
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Visual {
    /// 沿局部 Z 轴的胶囊体，`length` 为两个半球中心间距
    Capsule {
        body: usize,
        pose: Transform,
        radius: f64,
        length: f64,
    },
    Sphere {
        body: usize,
        pose: Transform,
        radius: f64,
    },
    Cuboid {
        body: usize,
        pose: Transform,
        half_extents: Vector3<f64>,
    },
    /// 局部 Z 朝上的地面，`offset` 为沿法向的偏移
    Ground {
        body: usize,
        pose: Transform,
        offset: f64,
    },
}

impl Visual {
    /// 所在刚体
    pub fn body(&self) -> usize {
        match self {
            Visual::Capsule { body, .. }
            | Visual::Sphere { body, .. }
            | Visual::Cuboid { body, .. }
            | Visual::Ground { body, .. } => *body,
        }
    }

    /// 由 `World` 中的碰撞形状生成可视体（点画成小球）
    pub fn from_shapes(world: &World) -> Vec<Visual> {
        world
            .shapes()
            .iter()
            .map(|s| match s.shape {
                Shape::Sphere { radius } => Visual::Sphere {
                    body: s.body,
                    pose: s.pose,
                    radius,
                },
                Shape::Point => Visual::Sphere {
                    body: s.body,
                    pose: s.pose,
                    radius: 0.02,
                },
                Shape::Box { half_extents } => Visual::Cuboid {
                    body: s.body,
                    pose: s.pose,
                    half_extents,
                },
                Shape::Plane { normal, offset } => {
                    // 把局部 Z 旋转到平面法向
                    let n = normal.normalize();
                    let rotation = nalgebra::UnitQuaternion::rotation_between(&Vector3::z(), &n)
                        .unwrap_or_else(|| {
                            nalgebra::UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI)
                        });
                    Visual::Ground {
                        body: s.body,
                        pose: s.pose.compose(&Transform::from_quaternion(&rotation, Vector3::zeros())),
                        offset,
                    }
                }
            })
            .collect()
    }
}

/// 可选的演示场景
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "viewer", derive(clap::ValueEnum))]
pub enum Demo {
    #[default]
    HingeChain,
    SimpleArm,
    Pendulum,
    FallingBall,
}

impl Demo {
    pub const ALL: [Demo; 4] = [
        Demo::HingeChain,
        Demo::SimpleArm,
        Demo::Pendulum,
        Demo::FallingBall,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Demo::HingeChain => "Hinge Chain",
            Demo::SimpleArm => "Simple Arm",
            Demo::Pendulum => "Pendulum",
            Demo::FallingBall => "Falling Ball",
        }
    }

    pub fn build(&self) -> Result<World> {
        match self {
            Demo::HingeChain => hinge_chain::build(),
            Demo::SimpleArm => simple_arm::build(),
            Demo::Pendulum => pendulum::build(),
            Demo::FallingBall => falling_ball::build(),
        }
    }

    pub fn config(&self) -> SimulationConfig {
        match self {
            Demo::HingeChain => hinge_chain::config(),
            Demo::SimpleArm => simple_arm::config(),
            Demo::Pendulum => pendulum::config(),
            Demo::FallingBall => falling_ball::config(),
        }
    }

    pub fn visuals(&self, world: &World) -> Vec<Visual> {
        match self {
            Demo::HingeChain => hinge_chain::visuals(world),
            Demo::SimpleArm => simple_arm::visuals(world),
            Demo::Pendulum => pendulum::visuals(world),
            Demo::FallingBall => falling_ball::visuals(world),
        }
    }

    /// 装配场景并创建仿真
    pub fn simulation(&self) -> Result<Simulation> {
        Simulation::new(self.build()?, self.config())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_demos_build_and_step() {
        for demo in Demo::ALL {
            let mut sim = demo.simulation().unwrap();
            for _ in 0..10 {
                sim.step().unwrap();
            }
            assert!(sim.state().is_finite(), "{} diverged", demo.title());
            let visuals = demo.visuals(sim.world());
            assert!(!visuals.is_empty());
            assert!(visuals.iter().all(|v| v.body() < sim.world().nbody()));
        }
    }

    #[test]
    fn test_ground_visual_from_plane() {
        let world = falling_ball::build().unwrap();
        let visuals = Visual::from_shapes(&world);
        assert_eq!(visuals.len(), 3);
        assert!(matches!(visuals[0], Visual::Ground { body: 0, .. }));
        assert!(matches!(visuals[1], Visual::Cuboid { body: 0, .. }));
        assert!(matches!(visuals[2], Visual::Sphere { body: 1, .. }));
    }
}
