//! # 仿真配置
//!
//! 控制仿真推进方式的参数：时间步长、重力、积分器、约束求解器。

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::error::{Result, SimError};
use super::STANDARD_GRAVITY;

/// 时间积分方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IntegratorKind {
    /// 半隐式（辛）欧拉：先更新速度，再用新速度更新位置
    #[default]
    SemiImplicitEuler,
    /// 四阶龙格库塔
    RungeKutta4,
}

/// 约束求解器参数（投影 Gauss-Seidel）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// 最大迭代次数
    pub max_iterations: usize,
    /// 收敛阈值：相邻两次迭代的约束速度变化范数
    pub tolerance: f64,
    /// 穿透修正比例 (error reduction parameter)，取值 [0, 1]
    pub erp: f64,
    /// 接触检测余量：分离距离小于该值即生成接触约束
    pub contact_margin: f64,
    /// 关节限位检测余量
    pub limit_margin: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-8,
            erp: 0.2,
            contact_margin: 1e-3,
            limit_margin: 1e-3,
        }
    }
}

impl SolverConfig {
    /// 高精度求解（更多迭代，更严格的阈值）
    #[must_use]
    pub fn high_accuracy() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-10,
            ..Default::default()
        }
    }

    /// 校验参数
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(SimError::configuration(
                "solver max_iterations must be at least 1",
            ));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(SimError::configuration(format!(
                "solver tolerance must be positive and finite, got {}",
                self.tolerance
            )));
        }
        if !(0.0..=1.0).contains(&self.erp) {
            return Err(SimError::configuration(format!(
                "erp must lie in [0, 1], got {}",
                self.erp
            )));
        }
        if !self.contact_margin.is_finite() || self.contact_margin < 0.0 {
            return Err(SimError::configuration("contact_margin must be >= 0"));
        }
        if !self.limit_margin.is_finite() || self.limit_margin < 0.0 {
            return Err(SimError::configuration("limit_margin must be >= 0"));
        }
        Ok(())
    }
}

/// 仿真主配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// 固定时间步长 (s)
    pub timestep: f64,
    /// 重力加速度（世界坐标系）
    pub gravity: Vector3<f64>,
    /// 积分方法
    pub integrator: IntegratorKind,
    /// 约束求解器参数
    pub solver: SolverConfig,
    /// 旋转矩阵正交性误差超过该值时重新正交化
    pub renormalize_tolerance: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            timestep: 0.002,
            gravity: STANDARD_GRAVITY,
            integrator: IntegratorKind::default(),
            solver: SolverConfig::default(),
            renormalize_tolerance: 1e-9,
        }
    }
}

impl SimulationConfig {
    /// 使用给定时间步长
    #[must_use]
    pub fn with_timestep(timestep: f64) -> Self {
        Self {
            timestep,
            ..Default::default()
        }
    }

    /// 实时仿真 (60 Hz)
    #[must_use]
    pub fn realtime() -> Self {
        Self::with_timestep(1.0 / 60.0)
    }

    /// 高保真仿真 (1000 Hz, RK4)
    #[must_use]
    pub fn high_fidelity() -> Self {
        Self {
            timestep: 1.0 / 1000.0,
            integrator: IntegratorKind::RungeKutta4,
            solver: SolverConfig::high_accuracy(),
            ..Default::default()
        }
    }

    /// 设置重力
    #[must_use]
    pub fn gravity(mut self, gravity: Vector3<f64>) -> Self {
        self.gravity = gravity;
        self
    }

    /// 失重环境
    #[must_use]
    pub fn zero_gravity(mut self) -> Self {
        self.gravity = Vector3::zeros();
        self
    }

    /// 设置积分方法
    #[must_use]
    pub fn integrator(mut self, integrator: IntegratorKind) -> Self {
        self.integrator = integrator;
        self
    }

    /// 设置求解器参数
    #[must_use]
    pub fn solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if !self.timestep.is_finite() || self.timestep <= 0.0 {
            return Err(SimError::configuration(format!(
                "timestep must be positive and finite, got {}",
                self.timestep
            )));
        }
        if self.timestep > 1.0 {
            return Err(SimError::configuration(
                "timestep > 1 second is likely an error",
            ));
        }
        if self.gravity.iter().any(|g| !g.is_finite()) {
            return Err(SimError::configuration("gravity must be finite"));
        }
        if !self.renormalize_tolerance.is_finite() || self.renormalize_tolerance <= 0.0 {
            return Err(SimError::configuration(
                "renormalize_tolerance must be positive",
            ));
        }
        self.solver.validate()
    }

    /// 频率 (Hz)
    #[must_use]
    pub fn frequency(&self) -> f64 {
        1.0 / self.timestep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_config_is_valid() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_relative_eq!(config.frequency(), 500.0, epsilon = 1e-9);
        assert_relative_eq!(config.gravity.z, -9.81, epsilon = 1e-12);
    }

    #[test]
    fn test_presets() {
        assert_relative_eq!(SimulationConfig::realtime().timestep, 1.0 / 60.0);
        let hifi = SimulationConfig::high_fidelity();
        assert_eq!(hifi.integrator, IntegratorKind::RungeKutta4);
        assert!(hifi.validate().is_ok());
        assert_eq!(SimulationConfig::default().zero_gravity().gravity.norm(), 0.0);
    }

    #[test]
    fn test_invalid_config() {
        assert!(SimulationConfig::with_timestep(0.0).validate().is_err());
        assert!(SimulationConfig::with_timestep(f64::NAN).validate().is_err());
        assert!(SimulationConfig::with_timestep(2.0).validate().is_err());

        let bad_solver = SolverConfig {
            erp: 1.5,
            ..Default::default()
        };
        let err = SimulationConfig::default()
            .solver(bad_solver)
            .validate()
            .unwrap_err();
        assert!(err.is_assembly_error());
    }

    #[test]
    fn test_config_serde() {
        let config = SimulationConfig::high_fidelity();
        let json = serde_json::to_string(&config).unwrap();
        let back: SimulationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
