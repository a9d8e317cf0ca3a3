//! # Multibody Dynamics Framework
//!
//! 这是一个基于广义坐标的多体动力学求解框架，用于模拟由关节连接的刚体树。
//!
//! ## 核心概念
//!
//! - **广义坐标 (Generalized Coordinates)**: 使用最小坐标集 q 描述系统状态
//! - **前向运动学 (Forward Kinematics)**: 从关节坐标计算刚体位置和姿态
//! - **前向动力学 (Forward Dynamics)**: 从力/力矩计算加速度
//! - **约束求解 (Constraints)**: 接触与关节限位，投影 Gauss-Seidel
//! - **时间积分 (Time Integration)**: 半隐式欧拉或 RK4
//!
//! ## 算法参考
//!
//! - **RNE (Recursive Newton-Euler)**: 计算偏置力
//! - **CRBA (Composite Rigid Body Algorithm)**: 计算质量矩阵
//! - **PGS (Projected Gauss-Seidel)**: 速度层线性互补问题
//!
//! ## 使用示例
//!
//! ```rust
//! use multibody_sim::multibody::*;
//! use nalgebra::Vector3;
//!
//! // 1. 描述场景
//! let mut spec = SceneSpec::new();
//! spec.add_body(Body::point_mass("bob", 1.0, Vector3::new(0.0, 0.0, -1.0)))
//!     .add_joint(JointSpec::new("pivot", JointKind::Revolute { axis: Vector3::x() }, GROUND, "bob"));
//!
//! // 2. 装配并创建仿真
//! let world = World::build(&spec)?;
//! let mut sim = Simulation::new(world, SimulationConfig::default())?;
//!
//! // 3. 仿真循环
//! for _ in 0..100 {
//!     sim.step()?;
//! }
//! # Ok::<(), SimError>(())
//! ```

use nalgebra::Vector3;

pub mod collision;
pub mod config;
pub mod constraint;
pub mod controller;
pub mod dynamics;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod integrator;
pub mod joint;
pub mod kinematics;
pub mod model;
pub mod observer;
pub mod simulation;
pub mod spatial_algebra;
pub mod subtree_com;
pub mod transform;
pub mod velocity;
pub mod world;

// Re-export commonly used types
pub use collision::{ContactGeometry, Shape};
pub use config::{IntegratorKind, SimulationConfig, SolverConfig};
pub use constraint::{Constraint, ConstraintSolution};
pub use controller::{ConstantForce, Controller, PdController};
pub use dynamics::{compute_bias_forces, compute_mass_matrix, evaluate, DynamicsData};
pub use error::{Result, SimError};
pub use frame::{frame_jacobian, frame_pose, frame_twist};
pub use geometry::{box_inertia, capsule_inertia, cylinder_inertia, sphere_inertia};
pub use joint::{Joint, JointKind};
pub use kinematics::{forward_kinematics, KinematicsData};
pub use model::{Body, SimulationState, SpatialInertia};
pub use observer::{
    ChannelObserver, EnergyMonitor, JsonLinesWriter, Observer, PerfMonitor, Snapshot,
    TrajectoryRecorder,
};
pub use simulation::{simulate, uniform_timeline, Simulation, StepReport};
pub use spatial_algebra::{SpatialForce, SpatialMotion};
pub use transform::Transform;
pub use velocity::compute_velocities;
pub use world::{FrameInstance, FrameSpec, JointSpec, SceneSpec, World, GROUND};

/// 标准重力加速度 (m/s^2)，沿 Z 轴负方向
pub const STANDARD_GRAVITY: Vector3<f64> = Vector3::new(0.0, 0.0, -9.81);
