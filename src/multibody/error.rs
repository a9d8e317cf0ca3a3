//! # 错误类型
//!
//! 仿真引擎的统一错误类型。
//!
//! - 装配阶段的错误（`Configuration`、`Structural`）直接中止 `World` 的构建
//! - 单步内的数值错误（`SingularInertia`、`Diverged`）中止该步，状态保持不变
//! - `ConstraintSolverDidNotConverge` 是可恢复的诊断信息，该步照常推进

use thiserror::Error;

/// 仿真错误
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// 关节 / 刚体 / 配置参数非法
    #[error("configuration error: {reason}")]
    Configuration {
        /// 错误描述
        reason: String,
    },

    /// 拓扑结构非法（环、多个根、未知父体等）
    #[error("structural error: {reason}")]
    Structural {
        /// 错误描述
        reason: String,
    },

    /// 质量矩阵不是对称正定的
    #[error("singular inertia: {reason}")]
    SingularInertia {
        /// 错误描述
        reason: String,
    },

    /// 约束求解器在迭代上限内没有收敛（可恢复）
    #[error(
        "constraint solver did not converge after {iterations} iterations (residual {residual:.3e})"
    )]
    ConstraintSolverDidNotConverge {
        /// 已执行的迭代次数
        iterations: usize,
        /// 最后一次迭代的速度残差
        residual: f64,
    },

    /// 状态中出现 NaN / Inf
    #[error("simulation diverged: {reason}")]
    Diverged {
        /// 错误描述
        reason: String,
    },
}

impl SimError {
    /// 构造配置错误
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// 构造拓扑错误
    #[must_use]
    pub fn structural(reason: impl Into<String>) -> Self {
        Self::Structural {
            reason: reason.into(),
        }
    }

    /// 构造奇异惯性错误
    #[must_use]
    pub fn singular_inertia(reason: impl Into<String>) -> Self {
        Self::SingularInertia {
            reason: reason.into(),
        }
    }

    /// 构造发散错误
    #[must_use]
    pub fn diverged(reason: impl Into<String>) -> Self {
        Self::Diverged {
            reason: reason.into(),
        }
    }

    /// 是否是可恢复的诊断（仿真可以继续）
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ConstraintSolverDidNotConverge { .. })
    }

    /// 是否是装配阶段的错误
    #[must_use]
    pub fn is_assembly_error(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Structural { .. })
    }
}

/// 仿真结果类型
pub type Result<T> = std::result::Result<T, SimError>;
