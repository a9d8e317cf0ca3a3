//! # 多体模型数据结构
//!
//! 定义刚体、空间惯性与仿真状态。拓扑结构（关节、树）见 [`super::world`]。

use nalgebra::{DVector, Matrix3, Matrix6, Vector3};
use serde::{Deserialize, Serialize};

use super::error::{Result, SimError};
use super::geometry::point_mass_inertia;
use super::spatial_algebra::{SpatialForce, SpatialMotion};
use super::transform::{skew, Transform};

/// 空间惯性 (Spatial Inertia)
///
/// 表示刚体的惯性属性，用于动力学计算
///
/// ## 存储格式
/// 使用分离格式：质量、质心位置、绕质心的 3x3 转动惯量。
/// 参考系可以是 body 坐标系，也可以是世界坐标系（由 [`SpatialInertia::transformed`] 转换）。
///
/// ## 作用于运动向量
/// ```text
/// f = m (v + ω × c)
/// τ = I_c ω + c × f
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpatialInertia {
    /// 质量 (kg)
    pub mass: f64,
    /// 质心位置
    pub com: Vector3<f64>,
    /// 绕质心的转动惯量张量 (kg·m²)
    pub inertia_com: Matrix3<f64>,
}

impl Default for SpatialInertia {
    fn default() -> Self {
        Self::zero()
    }
}

impl SpatialInertia {
    pub fn new(mass: f64, com: Vector3<f64>, inertia_com: Matrix3<f64>) -> Self {
        Self {
            mass,
            com,
            inertia_com,
        }
    }

    /// 零惯性（地面、无质量连接件）
    pub fn zero() -> Self {
        Self {
            mass: 0.0,
            com: Vector3::zeros(),
            inertia_com: Matrix3::zeros(),
        }
    }

    /// 把惯性从 b 系表示变换到 a 系表示（`x` 映射 b → a）
    pub fn transformed(&self, x: &Transform) -> SpatialInertia {
        SpatialInertia {
            mass: self.mass,
            com: x.transform_point(&self.com),
            inertia_com: x.rotation * self.inertia_com * x.rotation.transpose(),
        }
    }

    /// 累加两个空间惯性（同一参考系），使用平行轴定理
    ///
    /// ```text
    /// m = m₁ + m₂
    /// c = (m₁c₁ + m₂c₂) / m
    /// I_c = Σ I_ci + mᵢ (|dᵢ|² E - dᵢdᵢᵀ),  dᵢ = cᵢ - c
    /// ```
    pub fn add(&self, other: &SpatialInertia) -> SpatialInertia {
        let mass = self.mass + other.mass;
        if mass <= 0.0 {
            return SpatialInertia {
                mass,
                com: Vector3::zeros(),
                inertia_com: self.inertia_com + other.inertia_com,
            };
        }
        let com = (self.com * self.mass + other.com * other.mass) / mass;
        let shift = |m: f64, d: Vector3<f64>| {
            (Matrix3::identity() * d.norm_squared() - d * d.transpose()) * m
        };
        SpatialInertia {
            mass,
            com,
            inertia_com: self.inertia_com
                + other.inertia_com
                + shift(self.mass, self.com - com)
                + shift(other.mass, other.com - com),
        }
    }

    /// 计算 f = I * v
    pub fn mul_motion(&self, v: &SpatialMotion) -> SpatialForce {
        let force = (v.linear + v.angular.cross(&self.com)) * self.mass;
        let torque = self.inertia_com * v.angular + self.com.cross(&force);
        SpatialForce::new(torque, force)
    }

    /// 参考点（原点）处的 6x6 空间惯性矩阵
    ///
    /// ```text
    /// I = | I_c + m[c]×[c]×ᵀ   m[c]× |
    ///     | m[c]×ᵀ             m E   |
    /// ```
    pub fn to_matrix(&self) -> Matrix6<f64> {
        let cx = skew(&self.com);
        let mut out = Matrix6::zeros();
        out.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(self.inertia_com + cx * cx.transpose() * self.mass));
        out.fixed_view_mut::<3, 3>(0, 3).copy_from(&(cx * self.mass));
        out.fixed_view_mut::<3, 3>(3, 0)
            .copy_from(&(cx.transpose() * self.mass));
        out.fixed_view_mut::<3, 3>(3, 3)
            .copy_from(&(Matrix3::identity() * self.mass));
        out
    }

    /// 动能 ½ vᵀ I v
    pub fn kinetic_energy(&self, v: &SpatialMotion) -> f64 {
        0.5 * v.dot(&self.mul_motion(v))
    }
}

impl std::ops::AddAssign for SpatialInertia {
    fn add_assign(&mut self, other: Self) {
        *self = self.add(&other);
    }
}

/// 刚体 (Rigid Body)
///
/// 惯性参数在 body 坐标系中给出。刚体由 [`super::world::World`] 独占，
/// 惯性参数只能在两次运行之间通过 `World::set_inertia` 修改。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    /// 名称（在 World 内唯一）
    pub name: String,
    /// 质量 (kg)
    pub mass: f64,
    /// 质心位置（body 坐标系）
    pub com: Vector3<f64>,
    /// 绕质心的转动惯量张量（body 坐标系）
    pub inertia: Matrix3<f64>,
    /// 粘性矩阵 B（body 坐标系，[角; 线]）：粘性力旋量 `f = -B · V_body`
    #[serde(default = "zero_viscosity")]
    pub viscosity: Matrix6<f64>,
}

fn zero_viscosity() -> Matrix6<f64> {
    Matrix6::zeros()
}

impl Body {
    /// 创建新的刚体
    ///
    /// # 参数
    /// - `mass`: 质量 (kg)
    /// - `com`: 质心偏移
    /// - `inertia`: 绕质心的转动惯量张量 (kg·m²)
    pub fn new(name: impl Into<String>, mass: f64, com: Vector3<f64>, inertia: Matrix3<f64>) -> Self {
        Self {
            name: name.into(),
            mass,
            com,
            inertia,
            viscosity: Matrix6::zeros(),
        }
    }

    /// 设置体坐标系中的粘性矩阵（对称半正定）
    #[must_use]
    pub fn with_viscosity(mut self, viscosity: Matrix6<f64>) -> Self {
        self.viscosity = viscosity;
        self
    }

    pub fn has_viscosity(&self) -> bool {
        self.viscosity.iter().any(|&x| x != 0.0)
    }

    /// 无质量刚体（地面或纯几何连接件）
    pub fn massless(name: impl Into<String>) -> Self {
        Self::new(name, 0.0, Vector3::zeros(), Matrix3::zeros())
    }

    /// 质点
    pub fn point_mass(name: impl Into<String>, mass: f64, com: Vector3<f64>) -> Self {
        Self::new(name, mass, com, point_mass_inertia())
    }

    pub fn spatial_inertia(&self) -> SpatialInertia {
        SpatialInertia::new(self.mass, self.com, self.inertia)
    }

    /// 检查惯性参数的物理合法性
    ///
    /// - 质量有限且非负
    /// - 惯性张量对称半正定
    /// - 主惯量满足三角不等式
    pub fn validate(&self) -> Result<()> {
        if !self.mass.is_finite() || self.mass < 0.0 {
            return Err(SimError::configuration(format!(
                "body '{}': mass must be finite and >= 0, got {}",
                self.name, self.mass
            )));
        }
        if self.com.iter().any(|x| !x.is_finite()) {
            return Err(SimError::configuration(format!(
                "body '{}': center of mass must be finite",
                self.name
            )));
        }
        if self.inertia.iter().any(|x| !x.is_finite()) {
            return Err(SimError::configuration(format!(
                "body '{}': inertia must be finite",
                self.name
            )));
        }
        let scale = self.inertia.amax().max(1.0);
        if (self.inertia - self.inertia.transpose()).amax() > 1e-9 * scale {
            return Err(SimError::configuration(format!(
                "body '{}': inertia tensor is not symmetric",
                self.name
            )));
        }
        let eig = self.inertia.symmetric_eigenvalues();
        let tol = 1e-9 * scale;
        if eig.iter().any(|&e| e < -tol) {
            return Err(SimError::configuration(format!(
                "body '{}': inertia tensor is not positive semi-definite",
                self.name
            )));
        }
        let (a, b, c) = (eig[0], eig[1], eig[2]);
        if a + b < c - tol || a + c < b - tol || b + c < a - tol {
            return Err(SimError::configuration(format!(
                "body '{}': principal moments violate the triangle inequality",
                self.name
            )));
        }
        if self.has_viscosity() {
            if self.viscosity.iter().any(|x| !x.is_finite()) {
                return Err(SimError::configuration(format!(
                    "body '{}': viscosity must be finite",
                    self.name
                )));
            }
            let scale = self.viscosity.amax();
            if (self.viscosity - self.viscosity.transpose()).amax() > 1e-9 * scale
                || self
                    .viscosity
                    .symmetric_eigenvalues()
                    .iter()
                    .any(|&e| e < -1e-9 * scale)
            {
                return Err(SimError::configuration(format!(
                    "body '{}': viscosity must be symmetric positive semi-definite",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// 仿真状态
///
/// 使用广义坐标表示系统的完整动力学状态
///
/// ## 广义坐标说明
/// - `q`: 广义位置（长度 nq，自由关节占 7 个：平移 + 单位四元数）
/// - `qvel`: 广义速度（长度 nv，自由关节占 6 个：体坐标系旋量）
/// - `qacc`: 上一步求得的广义加速度（nv）
/// - `qfrc_applied`: 调用者设置的执行器广义力（nv），每步保持不变直到被修改
/// - `qfrc_constraint`: 上一步约束求解器给出的广义力（nv）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    pub q: DVector<f64>,
    pub qvel: DVector<f64>,
    pub qacc: DVector<f64>,
    pub qfrc_applied: DVector<f64>,
    pub qfrc_constraint: DVector<f64>,
    /// 仿真时间 (s)
    pub time: f64,
    /// 已完成的步数
    pub step: u64,
}

impl SimulationState {
    /// 创建新的仿真状态
    ///
    /// 速度、加速度、力初始化为零
    pub fn new(q: DVector<f64>, nv: usize) -> Self {
        Self {
            q,
            qvel: DVector::zeros(nv),
            qacc: DVector::zeros(nv),
            qfrc_applied: DVector::zeros(nv),
            qfrc_constraint: DVector::zeros(nv),
            time: 0.0,
            step: 0,
        }
    }

    pub fn nq(&self) -> usize {
        self.q.len()
    }

    pub fn nv(&self) -> usize {
        self.qvel.len()
    }

    /// 所有状态量是否有限
    pub fn is_finite(&self) -> bool {
        self.q.iter().all(|x| x.is_finite())
            && self.qvel.iter().all(|x| x.is_finite())
            && self.qacc.iter().all(|x| x.is_finite())
            && self.time.is_finite()
    }
}
