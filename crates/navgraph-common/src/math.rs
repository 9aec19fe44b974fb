//! Scalar and vector math helpers

use glam::Vec3;

/// Squares a value
#[inline]
pub fn sqr<T: std::ops::Mul<Output = T> + Copy>(x: T) -> T {
    x * x
}

/// Converts degrees to radians
#[inline]
pub fn deg_to_rad(deg: f32) -> f32 {
    deg.to_radians()
}

/// Unit normal of a triangle, or `None` when it is degenerate
pub fn triangle_normal(a: Vec3, b: Vec3, c: Vec3) -> Option<Vec3> {
    (b - a).cross(c - a).try_normalize()
}

/// Height of the triangle plane at the (x, z) of `p`.
///
/// Returns `None` when `p` falls outside the triangle's XZ projection or the
/// triangle is vertical.
pub fn triangle_height_at(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    const EPS: f32 = 1e-6;

    let v0 = Vec3::new(c.x - a.x, 0.0, c.z - a.z);
    let v1 = Vec3::new(b.x - a.x, 0.0, b.z - a.z);
    let v2 = Vec3::new(p.x - a.x, 0.0, p.z - a.z);

    let denom = v0.x * v1.z - v0.z * v1.x;
    if denom.abs() < EPS {
        return None;
    }

    let u = (v1.z * v2.x - v1.x * v2.z) / denom;
    let v = (v0.x * v2.z - v0.z * v2.x) / denom;

    if u >= -EPS && v >= -EPS && (u + v) <= 1.0 + EPS {
        Some(a.y + (c.y - a.y) * u + (b.y - a.y) * v)
    } else {
        None
    }
}

/// Spherical interpolation between two directions, renormalized to unit length.
///
/// Nearly parallel inputs fall back to a normalized lerp; exactly opposite
/// inputs rotate through an arbitrary perpendicular axis.
pub fn slerp_unit(a: Vec3, b: Vec3, t: f32) -> Vec3 {
    let a = a.try_normalize().unwrap_or(Vec3::Y);
    let b = b.try_normalize().unwrap_or(Vec3::Y);
    let dot = a.dot(b).clamp(-1.0, 1.0);

    if dot > 0.9995 {
        return a.lerp(b, t).try_normalize().unwrap_or(a);
    }

    if dot < -0.9995 {
        let axis = a.any_orthonormal_vector();
        let angle = std::f32::consts::PI * t;
        return (a * angle.cos() + axis * angle.sin())
            .try_normalize()
            .unwrap_or(a);
    }

    let theta = dot.acos() * t;
    let rel = (b - a * dot).normalize();
    (a * theta.cos() + rel * theta.sin())
        .try_normalize()
        .unwrap_or(a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangle_height_at() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(10.0, 10.0, 0.0);
        let c = Vec3::new(0.0, 0.0, 10.0);

        let h = triangle_height_at(Vec3::new(5.0, 100.0, 2.0), a, b, c).unwrap();
        assert!((h - 5.0).abs() < 1e-4);
        assert!(triangle_height_at(Vec3::new(9.0, 0.0, 9.0), a, b, c).is_none());
    }

    #[test]
    fn test_triangle_normal() {
        let n = triangle_normal(
            Vec3::ZERO,
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 0.0),
        )
        .unwrap();
        assert!((n - Vec3::Y).length() < 1e-6);
        assert!(triangle_normal(Vec3::ZERO, Vec3::X, Vec3::X * 2.0).is_none());
    }

    #[test]
    fn test_slerp_unit_length() {
        let a = Vec3::Y;
        let b = Vec3::new(1.0, 1.0, 0.0).normalize();
        for i in 0..=10 {
            let n = slerp_unit(a, b, i as f32 / 10.0);
            assert!((n.length() - 1.0).abs() < 1e-5);
        }
        let mid = slerp_unit(Vec3::Y, Vec3::X, 0.5);
        assert!((mid - Vec3::new(1.0, 1.0, 0.0).normalize()).length() < 1e-5);

        let opposite = slerp_unit(Vec3::Y, -Vec3::Y, 0.5);
        assert!((opposite.length() - 1.0).abs() < 1e-5);
    }
}
