//! # 几何工具模块
//!
//! 提供计算刚体质量和惯性张量的工具函数。所有惯性张量都是绕质心、
//! 在形状自身坐标系中表示的。

use nalgebra::{Matrix3, Vector3};
use std::f64::consts::PI;

/// 计算Capsule的质量和惯性张量
///
/// Capsule由一个圆柱体和两个半球构成，沿z轴对齐。
///
/// ## 参数
/// - `length`: 圆柱体长度（两个半球中心之间的距离）
/// - `radius`: Capsule半径
/// - `density`: 材料密度 (kg/m³)
///
/// ## 返回值
/// - `(mass, inertia)`: 质量(kg)和惯性张量(kg·m²)
///
/// ## 数学推导
///
/// **体积**:
/// ```text
/// V_cylinder = π r² h
/// V_sphere = (4/3) π r³
/// ```
///
/// **圆柱体惯性**（相对质心）:
/// ```text
/// I_xx = I_yy = m_cyl/12 (3r² + h²)
/// I_zz = m_cyl/2 r²
/// ```
///
/// **半球**（质量 m_h，质心距平面 3r/8，平面中心位于 ±h/2）:
/// ```text
/// I_zz = 2/5 m_h r²
/// I_xx = m_h (2/5 r² + h²/4 + 3hr/8)
/// ```
///
pub fn capsule_inertia(length: f64, radius: f64, density: f64) -> (f64, Matrix3<f64>) {
    let cylinder_mass = density * PI * radius * radius * length;
    let hemisphere_mass = density * (2.0 / 3.0) * PI * radius * radius * radius;
    let mass = cylinder_mass + 2.0 * hemisphere_mass;

    let r2 = radius * radius;
    let cyl_ixx = cylinder_mass / 12.0 * (3.0 * r2 + length * length);
    let cyl_izz = cylinder_mass / 2.0 * r2;

    let hemi_ixx = hemisphere_mass * (0.4 * r2 + length * length / 4.0 + 3.0 * length * radius / 8.0);
    let hemi_izz = 0.4 * hemisphere_mass * r2;

    let ixx = cyl_ixx + 2.0 * hemi_ixx;
    let izz = cyl_izz + 2.0 * hemi_izz;
    (mass, Matrix3::from_diagonal(&Vector3::new(ixx, ixx, izz)))
}

/// 长方体（半边长 `half_extents`，质量 `mass`）
///
/// ```text
/// I_xx = m/3 (b² + c²)   (a, b, c 为半边长)
/// ```
pub fn box_inertia(half_extents: &Vector3<f64>, mass: f64) -> Matrix3<f64> {
    let [a2, b2, c2] = [
        half_extents.x * half_extents.x,
        half_extents.y * half_extents.y,
        half_extents.z * half_extents.z,
    ];
    Matrix3::from_diagonal(&Vector3::new(b2 + c2, a2 + c2, a2 + b2)) * (mass / 3.0)
}

/// 实心球
pub fn sphere_inertia(radius: f64, mass: f64) -> Matrix3<f64> {
    Matrix3::identity() * (0.4 * mass * radius * radius)
}

/// 实心圆柱，沿z轴
pub fn cylinder_inertia(length: f64, radius: f64, mass: f64) -> Matrix3<f64> {
    let ixx = mass / 12.0 * (3.0 * radius * radius + length * length);
    let izz = mass / 2.0 * radius * radius;
    Matrix3::from_diagonal(&Vector3::new(ixx, ixx, izz))
}

/// 质点：绕质心的惯性为零
pub fn point_mass_inertia() -> Matrix3<f64> {
    Matrix3::zeros()
}
