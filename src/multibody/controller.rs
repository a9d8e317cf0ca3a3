//! # 控制器
//!
//! 每步在动力学计算前调用，向广义力 τ 中累加执行器力。

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use super::error::{Result, SimError};
use super::model::SimulationState;
use super::world::World;

/// 控制器：根据当前状态产生广义力
///
/// `compute` 只读取状态，结果累加到 `tau`（长度 nv）中。
/// `validate` 在控制器加入仿真时调用一次。
pub trait Controller: Send + Sync {
    fn validate(&self, _world: &World) -> Result<()> {
        Ok(())
    }

    fn compute(&mut self, world: &World, state: &SimulationState, tau: &mut DVector<f64>);
}

/// 比例-微分控制的单个目标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PdTarget {
    /// 关节下标（单自由度关节）
    pub joint: usize,
    pub position: f64,
    pub velocity: f64,
}

/// 单自由度关节的 PD 跟踪控制
///
/// ```text
/// τ = kp (q* - q) + kd (q̇* - q̇)
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdController {
    pub kp: f64,
    pub kd: f64,
    targets: Vec<PdTarget>,
    /// 输出力矩上限（对称）
    pub max_effort: Option<f64>,
}

impl PdController {
    pub fn new(kp: f64, kd: f64) -> Self {
        Self {
            kp,
            kd,
            targets: Vec::new(),
            max_effort: None,
        }
    }

    #[must_use]
    pub fn max_effort(mut self, limit: f64) -> Self {
        self.max_effort = Some(limit.abs());
        self
    }

    /// 添加目标；关节必须是单自由度关节
    pub fn track(&mut self, world: &World, joint: &str, position: f64) -> Result<&mut Self> {
        let id = world
            .joint_id(joint)
            .ok_or_else(|| SimError::configuration(format!("unknown joint '{joint}'")))?;
        if world.joints()[id].nv() != 1 {
            return Err(SimError::configuration(format!(
                "PD control needs a single-DOF joint, '{joint}' has {}",
                world.joints()[id].nv()
            )));
        }
        self.targets.push(PdTarget {
            joint: id,
            position,
            velocity: 0.0,
        });
        Ok(self)
    }

    /// 修改已有目标位置
    pub fn set_target(&mut self, joint: usize, position: f64, velocity: f64) {
        for target in self.targets.iter_mut().filter(|t| t.joint == joint) {
            target.position = position;
            target.velocity = velocity;
        }
    }

    pub fn targets(&self) -> &[PdTarget] {
        &self.targets
    }
}

impl Controller for PdController {
    fn validate(&self, world: &World) -> Result<()> {
        for target in &self.targets {
            match world.joints().get(target.joint) {
                Some(joint) if joint.nv() == 1 => {}
                Some(joint) => {
                    return Err(SimError::configuration(format!(
                        "PD control needs a single-DOF joint, '{}' has {}",
                        joint.name,
                        joint.nv()
                    )))
                }
                None => {
                    return Err(SimError::configuration(format!(
                        "PD target references joint index {} but the world has {} joints",
                        target.joint,
                        world.joints().len()
                    )))
                }
            }
        }
        Ok(())
    }

    fn compute(&mut self, world: &World, state: &SimulationState, tau: &mut DVector<f64>) {
        for target in &self.targets {
            let Some(joint) = world.joints().get(target.joint) else {
                continue;
            };
            let q = state.q[joint.q_offset];
            let qd = state.qvel[joint.v_offset];
            let mut effort = self.kp * (target.position - q) + self.kd * (target.velocity - qd);
            if let Some(limit) = self.max_effort {
                effort = effort.clamp(-limit, limit);
            }
            tau[joint.v_offset] += effort;
        }
    }
}

/// 恒定广义力
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantForce {
    force: DVector<f64>,
}

impl ConstantForce {
    pub fn new(nv: usize) -> Self {
        Self {
            force: DVector::zeros(nv),
        }
    }

    /// 设置某关节的广义力（长度必须等于关节自由度数）
    pub fn set(&mut self, world: &World, joint: &str, values: &[f64]) -> Result<&mut Self> {
        let dofs = world
            .joint_id(joint)
            .and_then(|id| world.joint_dofs(id))
            .ok_or_else(|| SimError::configuration(format!("unknown joint '{joint}'")))?;
        if dofs.len() != values.len() {
            return Err(SimError::configuration(format!(
                "joint '{joint}' has {} DOFs, got {} values",
                dofs.len(),
                values.len()
            )));
        }
        for (k, v) in dofs.zip(values) {
            self.force[k] = *v;
        }
        Ok(self)
    }

    pub fn force(&self) -> &DVector<f64> {
        &self.force
    }
}

impl Controller for ConstantForce {
    fn validate(&self, world: &World) -> Result<()> {
        if self.force.len() != world.nv() {
            return Err(SimError::configuration(format!(
                "constant force has {} entries, world expects {}",
                self.force.len(),
                world.nv()
            )));
        }
        Ok(())
    }

    fn compute(&mut self, _world: &World, _state: &SimulationState, tau: &mut DVector<f64>) {
        if self.force.len() == tau.len() {
            *tau += &self.force;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multibody::joint::JointKind;
    use crate::multibody::model::Body;
    use crate::multibody::world::{JointSpec, SceneSpec, GROUND};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn two_joint_world() -> World {
        let mut spec = SceneSpec::new();
        spec.add_body(Body::point_mass("a", 1.0, Vector3::new(0.5, 0.0, 0.0)))
            .add_body(Body::point_mass("b", 1.0, Vector3::zeros()))
            .add_joint(JointSpec::new("hinge", JointKind::Revolute { axis: Vector3::z() }, GROUND, "a"))
            .add_joint(JointSpec::new("free", JointKind::Free, "a", "b"));
        World::build(&spec).unwrap()
    }

    #[test]
    fn test_pd_controller() {
        let world = two_joint_world();
        let mut pd = PdController::new(10.0, 2.0).max_effort(3.0);
        pd.track(&world, "hinge", 0.2).unwrap();

        let mut state = world.initial_state();
        state.qvel[0] = 0.5;
        let mut tau = DVector::zeros(world.nv());
        pd.compute(&world, &state, &mut tau);
        // 10*0.2 - 2*0.5 = 1.0
        assert_relative_eq!(tau[0], 1.0, epsilon = 1e-12);
        assert!(tau.rows(1, 6).iter().all(|&x| x == 0.0));

        pd.set_target(0, 5.0, 0.0);
        let mut tau = DVector::zeros(world.nv());
        pd.compute(&world, &state, &mut tau);
        assert_relative_eq!(tau[0], 3.0);
    }

    #[test]
    fn test_validate_against_world() {
        let world = two_joint_world();
        assert!(ConstantForce::new(world.nv()).validate(&world).is_ok());
        assert!(ConstantForce::new(world.nv() + 1).validate(&world).is_err());

        let mut pd = PdController::new(1.0, 0.0);
        pd.track(&world, "hinge", 0.0).unwrap();
        assert!(pd.validate(&world).is_ok());

        // 目标来自另一个世界
        let mut spec = SceneSpec::new();
        spec.add_body(Body::point_mass("b", 1.0, Vector3::zeros()))
            .add_joint(JointSpec::new("free", JointKind::Free, GROUND, "b"));
        let other = World::build(&spec).unwrap();
        assert!(pd.validate(&other).is_err());
        let mut pd = PdController::new(1.0, 0.0);
        pd.track(&world, "hinge", 0.0).unwrap();
        pd.targets[0].joint = 5;
        assert!(pd.validate(&world).is_err());
    }

    #[test]
    fn test_pd_rejects_multi_dof_joint() {
        let world = two_joint_world();
        let mut pd = PdController::new(1.0, 0.0);
        assert!(pd.track(&world, "free", 0.0).is_err());
        assert!(pd.track(&world, "missing", 0.0).is_err());
    }

    #[test]
    fn test_constant_force() {
        let world = two_joint_world();
        let mut force = ConstantForce::new(world.nv());
        force.set(&world, "free", &[0.0, 0.0, 0.0, 0.0, 0.0, 9.81]).unwrap();
        assert!(force.set(&world, "hinge", &[1.0, 2.0]).is_err());

        let mut tau = DVector::zeros(world.nv());
        force.compute(&world, &world.initial_state(), &mut tau);
        assert_relative_eq!(tau[6], 9.81);
        assert_eq!(tau[0], 0.0);
    }
}
