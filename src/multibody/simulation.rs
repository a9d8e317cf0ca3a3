//! # 仿真驱动
//!
//! 单步流程：
//!
//! ```text
//! 控制器 + 外力旋量 → τ
//! 运动学 / 速度 / CRBA / RNE → M, c
//! q̈_free = M⁻¹ (τ - c)
//! 约束检测 + PGS → τ_c
//! 积分 (q, q̇) → (q', q̇')
//! 检查有限性 → 提交
//! ```
//!
//! 每步在副本上计算，只有全部成功且状态有限时才提交；失败的步不改变任何状态。

use nalgebra::{DVector, Vector3};
use tracing::{debug, trace};

use super::config::{IntegratorKind, SimulationConfig};
use super::constraint::{assemble_rows, detect_constraints, solve_pgs, ConstraintSolution};
use super::controller::Controller;
use super::dynamics::{evaluate, forward_dynamics, map_body_wrenches};
use super::error::{Result, SimError};
use super::frame::{frame_pose, frame_twist};
use super::integrator::{rk4, semi_implicit_euler};
use super::kinematics::{forward_kinematics_with_tolerance, KinematicsData};
use super::model::SimulationState;
use super::observer::{Observer, Snapshot};
use super::spatial_algebra::{SpatialForce, SpatialMotion};
use super::transform::Transform;
use super::subtree_com::total_com;
use super::velocity::compute_velocities;
use super::world::World;

/// 单步结果
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// 步后的仿真时间
    pub time: f64,
    /// 步后的步数
    pub step: u64,
    /// 本步检测到的约束数
    pub constraints: usize,
    /// 约束求解迭代次数
    pub solver_iterations: usize,
    /// 可恢复诊断
    pub diagnostic: Option<SimError>,
}

/// 仿真器：拥有 `World`、配置和唯一的 `SimulationState`
pub struct Simulation {
    world: World,
    config: SimulationConfig,
    state: SimulationState,
    controllers: Vec<Box<dyn Controller>>,
    /// 下一步要施加的外力旋量（每个刚体一个，世界坐标系原点）
    wrenches: Vec<SpatialForce>,
    last_diagnostic: Option<SimError>,
}

impl Simulation {
    pub fn new(world: World, config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let state = world.initial_state();
        let wrenches = vec![SpatialForce::zero(); world.nbody()];
        debug!(
            bodies = world.nbody(),
            nq = world.nq(),
            nv = world.nv(),
            timestep = config.timestep,
            integrator = ?config.integrator,
            "simulation created"
        );
        Ok(Self {
            world,
            config,
            state,
            controllers: Vec::new(),
            wrenches,
            last_diagnostic: None,
        })
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// 在两次运行之间修改 `World`（例如惯性参数），随后状态重置
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn time(&self) -> f64 {
        self.state.time
    }

    /// 上一步的可恢复诊断
    pub fn last_diagnostic(&self) -> Option<&SimError> {
        self.last_diagnostic.as_ref()
    }

    /// 回到 `World` 的初始状态，清除外力
    pub fn reset(&mut self) {
        self.state = self.world.initial_state();
        self.wrenches = vec![SpatialForce::zero(); self.world.nbody()];
        self.last_diagnostic = None;
    }

    /// 显式设置位置与速度（时间和步数不变），自由关节的四元数被归一化
    pub fn set_state(&mut self, mut q: DVector<f64>, qvel: DVector<f64>) -> Result<()> {
        self.world.check_state(&q, &qvel)?;
        if qvel.iter().any(|x| !x.is_finite()) {
            return Err(SimError::configuration("qvel must be finite"));
        }
        self.world.normalize_configuration(&mut q)?;
        self.state.q = q;
        self.state.qvel = qvel;
        Ok(())
    }

    /// 加入控制器；控制器与当前 `World` 不匹配时返回 `Configuration`
    pub fn add_controller(&mut self, controller: Box<dyn Controller>) -> Result<()> {
        controller.validate(&self.world)?;
        self.controllers.push(controller);
        Ok(())
    }

    /// 设置执行器广义力（保持到下一次修改）
    pub fn set_qfrc_applied(&mut self, qfrc: DVector<f64>) -> Result<()> {
        if qfrc.len() != self.world.nv() {
            return Err(SimError::configuration(format!(
                "qfrc_applied has {} entries, world expects {}",
                qfrc.len(),
                self.world.nv()
            )));
        }
        self.state.qfrc_applied = qfrc;
        Ok(())
    }

    /// 对刚体施加外力旋量（世界坐标系，关于原点），只作用于下一步
    pub fn apply_wrench(&mut self, body: usize, wrench: SpatialForce) -> Result<()> {
        if body == 0 || body >= self.world.nbody() {
            return Err(SimError::configuration(format!(
                "cannot apply a wrench to body index {body}"
            )));
        }
        self.wrenches[body] += wrench;
        Ok(())
    }

    /// 在世界坐标点 `point` 处施加力
    pub fn apply_force_at_point(
        &mut self,
        body: usize,
        force: Vector3<f64>,
        point: Vector3<f64>,
    ) -> Result<()> {
        self.apply_wrench(body, SpatialForce::from_force_at_point(force, point))
    }

    /// 当前状态的运动学
    pub fn kinematics(&self) -> Result<KinematicsData> {
        forward_kinematics_with_tolerance(
            &self.world,
            &self.state.q,
            self.config.renormalize_tolerance,
        )
    }

    /// 整个机构的总质量与质心（世界坐标系）
    pub fn center_of_mass(&self) -> Result<(f64, Vector3<f64>)> {
        let kin = self.kinematics()?;
        Ok(total_com(&self.world, &kin))
    }

    /// 命名坐标系的当前位姿与速度（速度在坐标系自身中表示）
    pub fn frame_state(&self, name: &str) -> Result<(Transform, SpatialMotion)> {
        let frame = self
            .world
            .frame_id(name)
            .ok_or_else(|| SimError::configuration(format!("unknown frame '{name}'")))?;
        let kin = self.kinematics()?;
        let vel = compute_velocities(&self.world, &kin, &self.state.qvel)?;
        Ok((frame_pose(&self.world, &kin, frame)?, frame_twist(&self.world, &kin, &vel, frame)?))
    }

    /// 当前状态的快照
    pub fn snapshot(&self) -> Result<Snapshot> {
        let kin = self.kinematics()?;
        let vel = compute_velocities(&self.world, &kin, &self.state.qvel)?;
        Ok(Snapshot {
            time: self.state.time,
            step: self.state.step,
            q: self.state.q.iter().copied().collect(),
            qvel: self.state.qvel.iter().copied().collect(),
            body_poses: kin.body_poses,
            body_velocities: vel.body_velocities,
            diagnostic: self.last_diagnostic.as_ref().map(ToString::to_string),
        })
    }

    /// 以配置的时间步长推进一步
    pub fn step(&mut self) -> Result<StepReport> {
        self.step_with_dt(self.config.timestep)
    }

    /// 以指定时间步长推进一步
    pub fn step_with_dt(&mut self, dt: f64) -> Result<StepReport> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(SimError::configuration(format!(
                "timestep must be positive and finite, got {dt}"
            )));
        }

        let world = &self.world;
        let config = &self.config;
        let state = &self.state;
        let gravity = config.gravity;
        let tol = config.renormalize_tolerance;

        // ===== 1. 广义力 =====
        let mut tau = state.qfrc_applied.clone();
        for controller in &mut self.controllers {
            controller.compute(world, state, &mut tau);
        }

        // ===== 2. 动力学 =====
        let data = evaluate(world, &state.q, &state.qvel, &gravity, tol)?;
        if self.wrenches.iter().any(|w| *w != SpatialForce::zero()) {
            tau += map_body_wrenches(world, &data.kinematics, &self.wrenches)?;
        }
        let qacc_free = forward_dynamics(&data.factorization, &tau, &data.bias)?;

        // ===== 3. 约束 =====
        let constraints = detect_constraints(world, &data.kinematics, &state.q, &config.solver)?;
        let solution = if constraints.is_empty() {
            ConstraintSolution::empty(world.nv())
        } else {
            let rows = assemble_rows(world, &data.kinematics, &constraints, dt, config.solver.erp);
            let v_free = &state.qvel + &qacc_free * dt;
            solve_pgs(&data.factorization, &v_free, &rows, dt, &config.solver)
        };
        let qacc = &qacc_free + data.factorization.solve(&solution.qfrc_constraint);

        // ===== 4. 积分 =====
        let (q_next, qvel_next) = match config.integrator {
            IntegratorKind::SemiImplicitEuler => {
                semi_implicit_euler(world, &state.q, &state.qvel, &qacc, dt)?
            }
            IntegratorKind::RungeKutta4 => {
                // 约束力与外力在整个步内保持不变
                let tau_total = &tau + &solution.qfrc_constraint;
                rk4(world, &state.q, &state.qvel, &qacc, dt, |q, qvel| {
                    let stage = evaluate(world, q, qvel, &gravity, tol)?;
                    forward_dynamics(&stage.factorization, &tau_total, &stage.bias)
                })?
            }
        };

        let next = SimulationState {
            q: q_next,
            qvel: qvel_next,
            qacc,
            qfrc_applied: state.qfrc_applied.clone(),
            qfrc_constraint: solution.qfrc_constraint,
            time: state.time + dt,
            step: state.step + 1,
        };

        // ===== 5. 检查并提交 =====
        if !next.is_finite() {
            return Err(SimError::diverged(format!(
                "non-finite state after step {} (t = {:.6})",
                next.step, next.time
            )));
        }

        trace!(
            step = next.step,
            time = next.time,
            constraints = constraints.len(),
            iterations = solution.iterations,
            "step"
        );

        let report = StepReport {
            time: next.time,
            step: next.step,
            constraints: constraints.len(),
            solver_iterations: solution.iterations,
            diagnostic: solution.diagnostic,
        };
        self.state = next;
        self.last_diagnostic = report.diagnostic.clone();
        self.wrenches.fill(SpatialForce::zero());
        Ok(report)
    }
}

/// 按时间线运行仿真
///
/// `timeline` 为严格递增的时间点；每个时间点推进一步（步长为相邻时间差），
/// 与当前时间相同的起始点被跳过。每步之后同步通知所有观察者。
/// 出错时先调用观察者的 `finish`，再返回错误。
pub fn simulate(
    sim: &mut Simulation,
    timeline: &[f64],
    observers: &mut [&mut dyn Observer],
) -> Result<Vec<StepReport>> {
    let initial = sim.snapshot()?;
    for observer in observers.iter_mut() {
        observer.init(sim.world(), &initial);
    }

    let result = run_timeline(sim, timeline, observers);

    for observer in observers.iter_mut() {
        observer.finish();
    }
    result
}

fn run_timeline(
    sim: &mut Simulation,
    timeline: &[f64],
    observers: &mut [&mut dyn Observer],
) -> Result<Vec<StepReport>> {
    let mut reports = Vec::with_capacity(timeline.len());
    for (i, &t) in timeline.iter().enumerate() {
        let dt = t - sim.time();
        if i == 0 && dt == 0.0 {
            continue;
        }
        if dt.is_nan() || dt <= 0.0 {
            return Err(SimError::configuration(format!(
                "timeline must be strictly increasing: t[{i}] = {t} is not after {}",
                sim.time()
            )));
        }
        let report = sim.step_with_dt(dt)?;
        let snapshot = sim.snapshot()?;
        for observer in observers.iter_mut() {
            observer.update(sim.world(), &snapshot);
        }
        reports.push(report);
    }
    debug!(steps = reports.len(), time = sim.time(), "timeline finished");
    Ok(reports)
}

/// 等间隔时间线 `[t0, t0 + dt, ..., t0 + n dt]`
pub fn uniform_timeline(t0: f64, dt: f64, steps: usize) -> Vec<f64> {
    (0..=steps).map(|i| t0 + dt * i as f64).collect()
}
