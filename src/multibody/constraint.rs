//! # 约束求解模块
//!
//! 每步重新检测接触与关节限位约束，用投影 Gauss-Seidel (PGS) 求解速度层的
//! 线性互补问题，摩擦采用四棱锥近似（每个接触两个切向行，`|λt| ≤ μ λn`）。
//!
//! ## 公式
//!
//! ```text
//! v_free = q̇ + Δt q̈_free                  无约束的下一步速度
//! W      = J M⁻¹ Jᵀ                       约束空间的逆惯性
//! v      = J v_free + W λ                  施加冲量 λ 后的约束速度
//!
//! 法向 / 限位行:  λ ≥ 0,  v ≥ v*,  λ (v - v*) = 0
//! 切向行:         |λt| ≤ μ λn,  目标速度 0
//!
//! v* = -gap / Δt          gap > 0（允许在本步内恰好闭合）
//! v* = -erp · gap / Δt    gap ≤ 0（按比例修正穿透）
//! ```
//!
//! 约束广义力 `τ_c = Jᵀ λ / Δt` 在整个时间步内保持不变。

use nalgebra::{DVector, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::collision::{collide, ContactGeometry};
use super::config::SolverConfig;
use super::dynamics::MassFactorization;
use super::error::{Result, SimError};
use super::kinematics::KinematicsData;
use super::world::World;

/// 接触约束
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    /// 在 `World::contact_pairs` 中的下标
    pub pair: usize,
    pub body_a: usize,
    pub body_b: usize,
    pub geometry: ContactGeometry,
    pub friction: f64,
}

/// 限位的哪一侧
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitSide {
    Lower,
    Upper,
}

/// 关节限位约束
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointLimit {
    pub joint: usize,
    /// 自由度下标
    pub dof: usize,
    pub side: LimitSide,
    /// 限位值
    pub limit: f64,
    /// 到限位的距离（负值表示越限）
    pub gap: f64,
}

/// 一步内检测到的约束
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    Contact(Contact),
    JointLimit(JointLimit),
}

impl Constraint {
    pub fn gap(&self) -> f64 {
        match self {
            Constraint::Contact(c) => c.geometry.gap,
            Constraint::JointLimit(l) => l.gap,
        }
    }
}

/// 检测所有启用的接触对，分离距离小于 `margin` 的生成接触约束
pub fn detect_contacts(world: &World, kin: &KinematicsData, margin: f64) -> Result<Vec<Contact>> {
    let mut contacts = Vec::new();
    for (i, pair) in world.contact_pairs().iter().enumerate() {
        if !pair.enabled {
            continue;
        }
        let a = &world.shapes()[pair.shape_a];
        let b = &world.shapes()[pair.shape_b];
        let xa = kin.body_poses[a.body].compose(&a.pose);
        let xb = kin.body_poses[b.body].compose(&b.pose);
        let geometry = collide(&a.shape, &xa, &b.shape, &xb)?;
        if geometry.gap < margin {
            contacts.push(Contact {
                pair: i,
                body_a: a.body,
                body_b: b.body,
                geometry,
                friction: pair.friction,
            });
        }
    }
    Ok(contacts)
}

/// 检测关节限位：到限位距离小于 `margin` 的生成约束
pub fn detect_joint_limits(world: &World, q: &DVector<f64>, margin: f64) -> Vec<JointLimit> {
    let mut limits = Vec::new();
    for (j, joint) in world.joints().iter().enumerate() {
        let Some([lower, upper]) = joint.limits else {
            continue;
        };
        let value = q[joint.q_offset];
        let dof = joint.v_offset;
        let lower_gap = value - lower;
        if lower_gap < margin {
            limits.push(JointLimit {
                joint: j,
                dof,
                side: LimitSide::Lower,
                limit: lower,
                gap: lower_gap,
            });
        }
        let upper_gap = upper - value;
        if upper_gap < margin {
            limits.push(JointLimit {
                joint: j,
                dof,
                side: LimitSide::Upper,
                limit: upper,
                gap: upper_gap,
            });
        }
    }
    limits
}

/// 检测全部约束：先接触，后限位
pub fn detect_constraints(
    world: &World,
    kin: &KinematicsData,
    q: &DVector<f64>,
    config: &SolverConfig,
) -> Result<Vec<Constraint>> {
    let mut constraints: Vec<Constraint> = detect_contacts(world, kin, config.contact_margin)?
        .into_iter()
        .map(Constraint::Contact)
        .collect();
    constraints.extend(
        detect_joint_limits(world, q, config.limit_margin)
            .into_iter()
            .map(Constraint::JointLimit),
    );
    Ok(constraints)
}

/// 约束行的类型
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowKind {
    /// 单边约束（接触法向、关节限位）：λ ≥ 0
    Unilateral,
    /// 摩擦：|λ| ≤ μ λ[normal]
    Friction { normal: usize, mu: f64 },
}

/// 约束行
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintRow {
    /// 雅可比行 (nv)
    pub jacobian: DVector<f64>,
    /// 目标速度 v*
    pub target_velocity: f64,
    pub kind: RowKind,
}

/// 单边约束的目标速度
pub fn target_velocity(gap: f64, dt: f64, erp: f64) -> f64 {
    if gap > 0.0 {
        -gap / dt
    } else {
        -erp * gap / dt
    }
}

/// 与 n 正交的两个单位切向
fn tangent_basis(n: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let helper = if n.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let t1 = n.cross(&helper).normalize();
    let t2 = n.cross(&t1);
    (t1, t2)
}

/// 累加刚体上一点沿 `dir` 方向的速度雅可比：row[k] += sign · (cdof_k 在点处的线速度) · dir
fn add_point_jacobian(
    world: &World,
    kin: &KinematicsData,
    body: usize,
    point: &Vector3<f64>,
    dir: &Vector3<f64>,
    sign: f64,
    row: &mut DVector<f64>,
) {
    let mut b = body;
    while let Some(joint) = world.parent_joint(b) {
        for k in joint.v_range() {
            row[k] += sign * kin.cdof[k].point_velocity(point).dot(dir);
        }
        b = joint.parent;
    }
}

/// 接触方向上的相对速度雅可比 `(v_b - v_a) · dir`
fn contact_row(world: &World, kin: &KinematicsData, contact: &Contact, dir: &Vector3<f64>) -> DVector<f64> {
    let mut row = DVector::zeros(world.nv());
    add_point_jacobian(world, kin, contact.body_b, &contact.geometry.point_b, dir, 1.0, &mut row);
    add_point_jacobian(world, kin, contact.body_a, &contact.geometry.point_a, dir, -1.0, &mut row);
    row
}

/// 由约束生成约束行（每个接触 1 个法向行，μ > 0 时再加 2 个切向行）
pub fn assemble_rows(
    world: &World,
    kin: &KinematicsData,
    constraints: &[Constraint],
    dt: f64,
    erp: f64,
) -> Vec<ConstraintRow> {
    let mut rows = Vec::new();
    for constraint in constraints {
        match constraint {
            Constraint::Contact(contact) => {
                let n = contact.geometry.normal;
                let normal = rows.len();
                rows.push(ConstraintRow {
                    jacobian: contact_row(world, kin, contact, &n),
                    target_velocity: target_velocity(contact.geometry.gap, dt, erp),
                    kind: RowKind::Unilateral,
                });
                if contact.friction > 0.0 {
                    let (t1, t2) = tangent_basis(&n);
                    for t in [t1, t2] {
                        rows.push(ConstraintRow {
                            jacobian: contact_row(world, kin, contact, &t),
                            target_velocity: 0.0,
                            kind: RowKind::Friction {
                                normal,
                                mu: contact.friction,
                            },
                        });
                    }
                }
            }
            Constraint::JointLimit(limit) => {
                let mut jacobian = DVector::zeros(world.nv());
                jacobian[limit.dof] = match limit.side {
                    LimitSide::Lower => 1.0,
                    LimitSide::Upper => -1.0,
                };
                rows.push(ConstraintRow {
                    jacobian,
                    target_velocity: target_velocity(limit.gap, dt, erp),
                    kind: RowKind::Unilateral,
                });
            }
        }
    }
    rows
}

/// 约束求解结果
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintSolution {
    /// 每行的冲量 λ
    pub impulses: Vec<f64>,
    /// 约束广义力 τ_c = Jᵀ λ / Δt
    pub qfrc_constraint: DVector<f64>,
    /// 执行的迭代次数
    pub iterations: usize,
    /// 最后一次迭代的残差
    pub residual: f64,
    /// 未收敛时的诊断信息
    pub diagnostic: Option<SimError>,
}

impl ConstraintSolution {
    pub fn empty(nv: usize) -> Self {
        Self {
            impulses: Vec::new(),
            qfrc_constraint: DVector::zeros(nv),
            iterations: 0,
            residual: 0.0,
            diagnostic: None,
        }
    }

    pub fn converged(&self) -> bool {
        self.diagnostic.is_none()
    }
}

/// 对角元低于此值的行视为无法作用（例如连接两个固定刚体）
const MIN_DIAGONAL: f64 = 1e-12;

/// 投影 Gauss-Seidel 求解
///
/// ## 参数
/// - `factorization`: 质量矩阵分解
/// - `v_free`: 无约束的下一步广义速度
/// - `rows`: 约束行
/// - `dt`: 时间步长
///
/// ## 保证
/// - 所有行在 λ = 0 时已满足目标速度，则结果为零力
/// - 迭代次数不超过 `config.max_iterations`，行顺序固定，结果确定
/// - 未收敛时返回最后一次迭代结果，并附带 `ConstraintSolverDidNotConverge` 诊断
pub fn solve_pgs(
    factorization: &MassFactorization,
    v_free: &DVector<f64>,
    rows: &[ConstraintRow],
    dt: f64,
    config: &SolverConfig,
) -> ConstraintSolution {
    let nv = v_free.len();
    let m = rows.len();
    if m == 0 {
        return ConstraintSolution::empty(nv);
    }

    // M⁻¹ Jᵀ 的每一列
    let minv_jt: Vec<DVector<f64>> = rows.iter().map(|r| factorization.solve(&r.jacobian)).collect();
    // W = J M⁻¹ Jᵀ
    let mut w = nalgebra::DMatrix::zeros(m, m);
    for (r, row) in rows.iter().enumerate() {
        for (s, col) in minv_jt.iter().enumerate() {
            w[(r, s)] = row.jacobian.dot(col);
        }
    }
    let v0: Vec<f64> = rows.iter().map(|r| r.jacobian.dot(v_free)).collect();

    let mut lambda = vec![0.0; m];
    let mut iterations = 0;
    let mut residual = f64::INFINITY;

    while iterations < config.max_iterations {
        iterations += 1;
        let mut change_sq = 0.0;

        for r in 0..m {
            let w_rr = w[(r, r)];
            if w_rr <= MIN_DIAGONAL {
                continue;
            }
            let v_r = v0[r] + (0..m).map(|s| w[(r, s)] * lambda[s]).sum::<f64>();
            let candidate = lambda[r] - (v_r - rows[r].target_velocity) / w_rr;
            let projected = match rows[r].kind {
                RowKind::Unilateral => candidate.max(0.0),
                RowKind::Friction { normal, mu } => {
                    let bound = mu * lambda[normal];
                    candidate.clamp(-bound, bound)
                }
            };
            let dv = (projected - lambda[r]) * w_rr;
            change_sq += dv * dv;
            lambda[r] = projected;
        }

        residual = change_sq.sqrt();
        if residual < config.tolerance {
            break;
        }
    }

    let mut impulse = DVector::zeros(nv);
    for (row, l) in rows.iter().zip(&lambda) {
        impulse += &row.jacobian * *l;
    }

    let diagnostic = if residual < config.tolerance {
        trace!(rows = m, iterations, residual, "constraint solver converged");
        None
    } else {
        warn!(rows = m, iterations, residual, "constraint solver did not converge");
        Some(SimError::ConstraintSolverDidNotConverge {
            iterations,
            residual,
        })
    };

    ConstraintSolution {
        impulses: lambda,
        qfrc_constraint: impulse / dt,
        iterations,
        residual,
        diagnostic,
    }
}
