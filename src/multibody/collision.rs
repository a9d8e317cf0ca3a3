//! # 碰撞检测模块
//!
//! 形状附着在刚体上（带局部位姿）。只检测场景中显式声明的接触对。
//!
//! 支持的形状组合：
//!
//! | a \ b   | Point | Sphere |
//! |---------|-------|--------|
//! | Sphere  | ✓     | ✓      |
//! | Plane   | ✓     | ✓      |
//! | Box     | ✓     | ✓      |
//!
//! 顺序相反的组合会自动交换求解。法向量总是从 a 指向 b，
//! `gap` 为有符号分离距离（负值表示穿透）。

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::error::{Result, SimError};
use super::transform::Transform;

/// 碰撞形状（在形状自身坐标系中定义）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    /// 半空间边界 `normal · x = offset`，法向指向外侧（自由空间）
    Plane { normal: Vector3<f64>, offset: f64 },
    /// 原点处的点
    Point,
    Sphere { radius: f64 },
    Box { half_extents: Vector3<f64> },
}

impl Shape {
    /// z 朝上的地面
    pub fn ground_plane() -> Self {
        Shape::Plane {
            normal: Vector3::z(),
            offset: 0.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Shape::Plane { normal, offset } => {
                let n = normal.norm();
                if !n.is_finite() || n < 1e-12 || !offset.is_finite() {
                    return Err(SimError::configuration(
                        "plane normal must be non-zero and finite",
                    ));
                }
            }
            Shape::Point => {}
            Shape::Sphere { radius } => {
                if !radius.is_finite() || *radius < 0.0 {
                    return Err(SimError::configuration(format!(
                        "sphere radius must be >= 0, got {radius}"
                    )));
                }
            }
            Shape::Box { half_extents } => {
                if half_extents.iter().any(|h| !h.is_finite() || *h < 0.0) {
                    return Err(SimError::configuration(
                        "box half extents must be finite and >= 0",
                    ));
                }
            }
        }
        Ok(())
    }

    fn tag(&self) -> &'static str {
        match self {
            Shape::Plane { .. } => "plane",
            Shape::Point => "point",
            Shape::Sphere { .. } => "sphere",
            Shape::Box { .. } => "box",
        }
    }
}

/// 两形状间的接触几何（世界坐标系）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContactGeometry {
    /// a 上的见证点
    pub point_a: Vector3<f64>,
    /// b 上的见证点
    pub point_b: Vector3<f64>,
    /// 单位法向，从 a 指向 b
    pub normal: Vector3<f64>,
    /// 有符号分离距离
    pub gap: f64,
}

impl ContactGeometry {
    fn swapped(self) -> Self {
        Self {
            point_a: self.point_b,
            point_b: self.point_a,
            normal: -self.normal,
            gap: self.gap,
        }
    }
}

/// 该形状组合是否有求解器
pub fn is_supported_pair(a: &Shape, b: &Shape) -> bool {
    solver_order(a, b).is_some()
}

/// `Some(false)`: 直接求解；`Some(true)`: 交换后求解
fn solver_order(a: &Shape, b: &Shape) -> Option<bool> {
    let direct = |a: &Shape, b: &Shape| {
        matches!(
            (a, b),
            (Shape::Sphere { .. } | Shape::Plane { .. } | Shape::Box { .. }, Shape::Sphere { .. } | Shape::Point)
        )
    };
    if direct(a, b) {
        Some(false)
    } else if direct(b, a) {
        Some(true)
    } else {
        None
    }
}

/// 计算两个形状之间的接触几何
///
/// `xa`, `xb` 为形状坐标系在世界系中的位姿
pub fn collide(a: &Shape, xa: &Transform, b: &Shape, xb: &Transform) -> Result<ContactGeometry> {
    match solver_order(a, b) {
        Some(false) => Ok(collide_ordered(a, xa, b, xb)),
        Some(true) => Ok(collide_ordered(b, xb, a, xa).swapped()),
        None => Err(SimError::configuration(format!(
            "no contact solver for {}-{} pairs",
            a.tag(),
            b.tag()
        ))),
    }
}

fn collide_ordered(a: &Shape, xa: &Transform, b: &Shape, xb: &Transform) -> ContactGeometry {
    let radius_b = match b {
        Shape::Sphere { radius } => *radius,
        _ => 0.0,
    };
    let center_b = xb.translation;
    match a {
        Shape::Sphere { radius } => sphere_sphere(&xa.translation, *radius, &center_b, radius_b),
        Shape::Plane { normal, offset } => plane_sphere(xa, normal, *offset, &center_b, radius_b),
        Shape::Box { half_extents } => box_sphere(xa, half_extents, &center_b, radius_b),
        // solver_order 已排除
        Shape::Point => sphere_sphere(&xa.translation, 0.0, &center_b, radius_b),
    }
}

/// 球-球（点视为半径为零的球）
pub fn sphere_sphere(
    center_a: &Vector3<f64>,
    radius_a: f64,
    center_b: &Vector3<f64>,
    radius_b: f64,
) -> ContactGeometry {
    let d = center_b - center_a;
    let dist = d.norm();
    // 球心重合时法向任取
    let normal = if dist > 1e-12 { d / dist } else { Vector3::z() };
    ContactGeometry {
        point_a: center_a + normal * radius_a,
        point_b: center_b - normal * radius_b,
        normal,
        gap: dist - radius_a - radius_b,
    }
}

/// 平面-球
pub fn plane_sphere(
    plane_pose: &Transform,
    normal: &Vector3<f64>,
    offset: f64,
    center: &Vector3<f64>,
    radius: f64,
) -> ContactGeometry {
    let n_local = normal.normalize();
    let c_local = plane_pose.inverse_transform_point(center);
    let height = n_local.dot(&c_local) - offset;
    let n = plane_pose.transform_vector(&n_local);
    ContactGeometry {
        point_a: center - n * height,
        point_b: center - n * radius,
        normal: n,
        gap: height - radius,
    }
}

/// 长方体-球
///
/// 球心在盒外时取最近点；在盒内时取穿透最浅的面。
pub fn box_sphere(
    box_pose: &Transform,
    half_extents: &Vector3<f64>,
    center: &Vector3<f64>,
    radius: f64,
) -> ContactGeometry {
    let c = box_pose.inverse_transform_point(center);
    let closest = Vector3::new(
        c.x.clamp(-half_extents.x, half_extents.x),
        c.y.clamp(-half_extents.y, half_extents.y),
        c.z.clamp(-half_extents.z, half_extents.z),
    );
    let d = c - closest;
    let dist = d.norm();

    let (point_local, n_local, gap) = if dist > 1e-12 {
        (closest, d / dist, dist - radius)
    } else {
        let mut axis = 0;
        let mut depth = f64::INFINITY;
        for i in 0..3 {
            let di = half_extents[i] - c[i].abs();
            if di < depth {
                depth = di;
                axis = i;
            }
        }
        let sign = if c[axis] >= 0.0 { 1.0 } else { -1.0 };
        let mut n = Vector3::zeros();
        n[axis] = sign;
        let mut p = c;
        p[axis] = sign * half_extents[axis];
        (p, n, -depth - radius)
    };

    let normal = box_pose.transform_vector(&n_local);
    ContactGeometry {
        point_a: box_pose.transform_point(&point_local),
        point_b: center - normal * radius,
        normal,
        gap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sphere_sphere() {
        let c = sphere_sphere(&Vector3::zeros(), 1.0, &Vector3::new(3.0, 0.0, 0.0), 0.5);
        assert_relative_eq!(c.gap, 1.5);
        assert_relative_eq!(c.normal, Vector3::x());
        assert_relative_eq!(c.point_a, Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(c.point_b, Vector3::new(2.5, 0.0, 0.0));
    }

    #[test]
    fn test_plane_sphere() {
        let plane = Shape::ground_plane();
        let ball = Shape::Sphere { radius: 0.1 };
        let c = collide(
            &plane,
            &Transform::identity(),
            &ball,
            &Transform::from_translation(Vector3::new(1.0, 2.0, 0.05)),
        )
        .unwrap();
        assert_relative_eq!(c.gap, -0.05, epsilon = 1e-12);
        assert_relative_eq!(c.normal, Vector3::z());
        assert_relative_eq!(c.point_a, Vector3::new(1.0, 2.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_swapped_order() {
        // 点在平面上方，顺序颠倒后法向从点指向平面
        let c = collide(
            &Shape::Point,
            &Transform::from_translation(Vector3::new(0.0, 0.0, 2.0)),
            &Shape::ground_plane(),
            &Transform::identity(),
        )
        .unwrap();
        assert_relative_eq!(c.gap, 2.0);
        assert_relative_eq!(c.normal, -Vector3::z());
        assert_relative_eq!(c.point_a, Vector3::new(0.0, 0.0, 2.0));
        assert_relative_eq!(c.point_b, Vector3::zeros());
    }

    #[test]
    fn test_box_sphere_outside_and_inside() {
        let half = Vector3::new(1.0, 1.0, 1.0);
        let outside = box_sphere(&Transform::identity(), &half, &Vector3::new(3.0, 0.0, 0.0), 0.5);
        assert_relative_eq!(outside.gap, 1.5);
        assert_relative_eq!(outside.normal, Vector3::x());

        let inside = box_sphere(&Transform::identity(), &half, &Vector3::new(0.0, 0.0, 0.8), 0.1);
        assert_relative_eq!(inside.gap, -0.3, epsilon = 1e-12);
        assert_relative_eq!(inside.normal, Vector3::z());
        assert_relative_eq!(inside.point_a, Vector3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_unsupported_pair() {
        let err = collide(
            &Shape::Box {
                half_extents: Vector3::new(1.0, 1.0, 1.0),
            },
            &Transform::identity(),
            &Shape::ground_plane(),
            &Transform::identity(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("box-plane"));
        assert!(!is_supported_pair(&Shape::Point, &Shape::Point));
        assert!(is_supported_pair(&Shape::Point, &Shape::Sphere { radius: 1.0 }));
    }
}
