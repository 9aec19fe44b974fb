//! 2D geometry operations on the XZ plane
//!
//! Navigation happens on a Y-up world; most queries only care about the
//! horizontal footprint of points, so these helpers ignore the Y component.

use glam::Vec3;

/// Calculate twice the signed area of a 2D triangle on the XZ plane.
///
/// The sign indicates the winding order:
/// - Positive: clockwise (when looking down Y axis)
/// - Negative: counter-clockwise (when looking down Y axis)
/// - Zero: degenerate (collinear points)
#[inline]
fn tri_area_2d(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let abx = b.x - a.x;
    let abz = b.z - a.z;
    let acx = c.x - a.x;
    let acz = c.z - a.z;
    acx * abz - abx * acz
}

/// Check if point c is left of the line from a to b (on XZ plane).
#[inline]
fn left(a: Vec3, b: Vec3, c: Vec3) -> bool {
    tri_area_2d(a, b, c) < 0.0
}

/// Check if point c is right of the line from a to b (on XZ plane).
#[inline]
fn right(a: Vec3, b: Vec3, c: Vec3) -> bool {
    tri_area_2d(a, b, c) > 0.0
}

/// Calculate squared distance between two points on the XZ plane.
#[inline]
pub fn dist_sqr_2d(a: Vec3, b: Vec3) -> f32 {
    let dx = b.x - a.x;
    let dz = b.z - a.z;
    dx * dx + dz * dz
}

/// Calculate distance between two points on the XZ plane.
#[inline]
pub fn dist_2d(a: Vec3, b: Vec3) -> f32 {
    dist_sqr_2d(a, b).sqrt()
}

/// Squared distance from a point to a segment on the XZ plane, with the
/// parametric position of the closest point on the segment.
pub fn dist_point_segment_sqr_2d(p: Vec3, a: Vec3, b: Vec3) -> (f32, f32) {
    let dx = b.x - a.x;
    let dz = b.z - a.z;
    let d = dx * dx + dz * dz;
    let t = if d > f32::EPSILON {
        (((p.x - a.x) * dx + (p.z - a.z) * dz) / d).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let qx = a.x + t * dx - p.x;
    let qz = a.z + t * dz - p.z;
    (qx * qx + qz * qz, t)
}

/// Check if a point is inside a polygon on the XZ plane (winding number).
pub fn point_in_polygon_2d(p: Vec3, verts: &[Vec3]) -> bool {
    let n = verts.len();
    if n < 3 {
        return false;
    }

    let mut winding = 0;
    for i in 0..n {
        let v1 = verts[i];
        let v2 = verts[(i + 1) % n];

        if v1.z <= p.z {
            if v2.z > p.z && left(v1, v2, p) {
                winding += 1;
            }
        } else if v2.z <= p.z && right(v1, v2, p) {
            winding -= 1;
        }
    }

    winding != 0
}

/// Rotate a vector around the Y axis.
#[inline]
pub fn rotate_y(v: Vec3, radians: f32) -> Vec3 {
    let (s, c) = radians.sin_cos();
    Vec3::new(v.x * c + v.z * s, v.y, -v.x * s + v.z * c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tri_area_2d() {
        let a = Vec3::ZERO;
        let b = Vec3::new(1.0, 0.0, 0.0);
        let c = Vec3::new(0.0, 0.0, 1.0);
        assert!(tri_area_2d(a, b, c) < 0.0);
        assert!(tri_area_2d(a, c, b) > 0.0);
        assert_eq!(tri_area_2d(a, b, Vec3::new(2.0, 0.0, 0.0)), 0.0);
    }

    #[test]
    fn test_point_segment_distance() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(10.0, 2.0, 0.0);
        let (d, t) = dist_point_segment_sqr_2d(Vec3::new(5.0, 0.0, 3.0), a, b);
        assert!((d - 9.0).abs() < 1e-5);
        assert!((t - 0.5).abs() < 1e-5);

        let (d, t) = dist_point_segment_sqr_2d(Vec3::new(-3.0, 0.0, 4.0), a, b);
        assert!((d - 25.0).abs() < 1e-5);
        assert_eq!(t, 0.0);
    }

    #[test]
    fn test_point_in_polygon() {
        let square = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(4.0, 0.0, 0.0),
            Vec3::new(4.0, 0.0, 4.0),
            Vec3::new(0.0, 0.0, 4.0),
        ];
        assert!(point_in_polygon_2d(Vec3::new(2.0, 7.0, 2.0), &square));
        assert!(!point_in_polygon_2d(Vec3::new(5.0, 0.0, 2.0), &square));
        assert!(!point_in_polygon_2d(Vec3::ZERO, &square[..2]));
    }

    #[test]
    fn test_rotate_y() {
        let v = rotate_y(Vec3::X, std::f32::consts::FRAC_PI_2);
        assert!((v - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-5);
    }
}
