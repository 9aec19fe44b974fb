//! Triangle and triangle-mesh types used as navigation source geometry

use crate::{BoundingBox, Containment, Error, Result};
use glam::Vec3;
use serde::{Deserialize, Serialize};

#[cfg(feature = "std")]
use std::fs;
#[cfg(feature = "std")]
use std::path::Path;

/// A single world-space triangle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Triangle {
    pub a: Vec3,
    pub b: Vec3,
    pub c: Vec3,
}

impl Triangle {
    pub fn new(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self { a, b, c }
    }

    /// Axis-aligned bounds of the triangle
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox {
            min: self.a.min(self.b).min(self.c),
            max: self.a.max(self.b).max(self.c),
        }
    }

    /// Unit normal facing up (positive Y), or `None` for degenerate triangles
    pub fn up_normal(&self) -> Option<Vec3> {
        let n = crate::triangle_normal(self.a, self.b, self.c)?;
        Some(if n.y < 0.0 { -n } else { n })
    }

    /// Height of the triangle plane at the XZ location of `p`, if it lies inside
    pub fn height_at(&self, p: Vec3) -> Option<f32> {
        crate::triangle_height_at(p, self.a, self.b, self.c)
    }

    /// Containment of the triangle's bounds against `bounds`
    pub fn containment(&self, bounds: &BoundingBox) -> Containment {
        bounds.contains(&self.bounds())
    }

    /// Möller-Trumbore segment intersection; returns the parametric distance along `from..to`
    pub fn intersect_segment(&self, from: Vec3, to: Vec3) -> Option<f32> {
        const EPS: f32 = 1e-7;

        let dir = to - from;
        let e1 = self.b - self.a;
        let e2 = self.c - self.a;
        let h = dir.cross(e2);
        let det = e1.dot(h);
        if det.abs() < EPS {
            return None;
        }

        let inv_det = 1.0 / det;
        let s = from - self.a;
        let u = s.dot(h) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = s.cross(e1);
        let v = dir.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = e2.dot(q) * inv_det;
        (0.0..=1.0).contains(&t).then_some(t)
    }
}

/// A simple indexed triangle mesh
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriMesh {
    /// Vertex positions
    pub vertices: Vec<Vec3>,
    /// Vertex indices, one entry per triangle
    pub indices: Vec<[u32; 3]>,
}

impl TriMesh {
    /// Creates a new empty triangle mesh
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a mesh from loose triangles without vertex welding
    pub fn from_triangles(triangles: &[Triangle]) -> Self {
        let mut mesh = Self::new();
        for tri in triangles {
            mesh.push_triangle(*tri);
        }
        mesh
    }

    /// Square ground plane centered on the origin, made of two triangles
    pub fn flat_plane(size: f32, height: f32) -> Self {
        let h = size * 0.5;
        Self {
            vertices: vec![
                Vec3::new(-h, height, -h),
                Vec3::new(h, height, -h),
                Vec3::new(h, height, h),
                Vec3::new(-h, height, h),
            ],
            indices: vec![[0, 2, 1], [0, 3, 2]],
        }
    }

    /// Appends a closed axis-aligned box
    pub fn push_box(&mut self, bounds: BoundingBox) {
        let (lo, hi) = (bounds.min, bounds.max);
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&[
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(lo.x, lo.y, hi.z),
            Vec3::new(lo.x, hi.y, lo.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(hi.x, hi.y, hi.z),
            Vec3::new(lo.x, hi.y, hi.z),
        ]);
        const FACES: [[u32; 3]; 12] = [
            [0, 1, 2],
            [0, 2, 3],
            [4, 6, 5],
            [4, 7, 6],
            [0, 4, 5],
            [0, 5, 1],
            [1, 5, 6],
            [1, 6, 2],
            [2, 6, 7],
            [2, 7, 3],
            [3, 7, 4],
            [3, 4, 0],
        ];
        self.indices
            .extend(FACES.iter().map(|f| [base + f[0], base + f[1], base + f[2]]));
    }

    /// Appends a single triangle
    pub fn push_triangle(&mut self, tri: Triangle) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&[tri.a, tri.b, tri.c]);
        self.indices.push([base, base + 1, base + 2]);
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    /// Iterates all triangles; indices that point past the vertex list are skipped
    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        self.indices.iter().filter_map(|idx| {
            let a = *self.vertices.get(idx[0] as usize)?;
            let b = *self.vertices.get(idx[1] as usize)?;
            let c = *self.vertices.get(idx[2] as usize)?;
            Some(Triangle::new(a, b, c))
        })
    }

    /// Axis-aligned bounds of all vertices
    pub fn bounds(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(self.vertices.iter().copied())
    }

    /// Loads a mesh from an OBJ file
    #[cfg(feature = "std")]
    pub fn from_obj<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_obj_str(&content)
    }

    /// Parses OBJ content from a string
    ///
    /// Only `v` and `f` records are read; polygons are fan-triangulated.
    ///
    /// ```
    /// use navgraph_common::TriMesh;
    ///
    /// let mesh = TriMesh::from_obj_str("v 0 0 0\nv 1 0 0\nv 0 0 1\nf 1 2 3\n").unwrap();
    /// assert_eq!(mesh.triangle_count(), 1);
    /// ```
    pub fn from_obj_str(content: &str) -> Result<Self> {
        let mut mesh = Self::new();
        for (line_no, line) in content.lines().enumerate() {
            mesh.parse_obj_line(line)
                .map_err(|e| Error::InvalidInput(format!("OBJ line {}: {}", line_no + 1, e)))?;
        }
        Ok(mesh)
    }

    fn parse_obj_line(&mut self, line: &str) -> std::result::Result<(), String> {
        let mut tokens = line.split_whitespace();

        match tokens.next() {
            Some("v") => {
                let mut coord = |name: &str| {
                    tokens
                        .next()
                        .ok_or_else(|| format!("vertex is missing its {} coordinate", name))?
                        .parse::<f32>()
                        .map_err(|_| format!("vertex {} coordinate is not a number", name))
                };
                let x = coord("x")?;
                let y = coord("y")?;
                let z = coord("z")?;
                self.vertices.push(Vec3::new(x, y, z));
            }
            Some("f") => {
                let mut face = Vec::new();
                for token in tokens {
                    let index = token
                        .split('/')
                        .next()
                        .and_then(|s| s.parse::<i64>().ok())
                        .ok_or_else(|| format!("face index '{}' is not a number", token))?;
                    // OBJ indices are 1-based; negative values count back from the end
                    let resolved = if index < 0 {
                        self.vertices.len() as i64 + index
                    } else {
                        index - 1
                    };
                    if resolved < 0 {
                        return Err(format!("face index {} is out of range", index));
                    }
                    face.push(resolved as u32);
                }

                if face.len() < 3 {
                    return Err("face has fewer than 3 vertices".to_string());
                }

                for i in 1..face.len() - 1 {
                    self.indices.push([face[0], face[i], face[i + 1]]);
                }
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_obj_str_quad_triangulation() {
        let obj = r#"
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 1.0 0.0 1.0
v 0.0 0.0 1.0
f 1/1 2/2 3/3 4/4
"#;
        let mesh = TriMesh::from_obj_str(obj).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.triangle_count(), 2);
    }

    #[test]
    fn test_from_obj_str_skips_comments_and_normals() {
        let obj = r#"
# comment
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 0.5 1.0 0.0
vn 0.0 0.0 1.0
f 1//1 2//1 3//1
"#;
        let mesh = TriMesh::from_obj_str(obj).unwrap();
        assert_eq!(mesh.triangle_count(), 1);
    }

    #[test]
    fn test_from_obj_str_invalid_records() {
        assert!(TriMesh::from_obj_str("v 0.0 0.0").is_err());
        assert!(TriMesh::from_obj_str("v 0 0 0\nv 1 0 0\nf 1 2").is_err());
    }

    #[test]
    fn test_flat_plane_faces_up() {
        let mesh = TriMesh::flat_plane(20.0, 0.0);
        assert_eq!(mesh.triangle_count(), 2);
        for tri in mesh.triangles() {
            let n = tri.up_normal().unwrap();
            assert!((n - Vec3::Y).length() < 1e-6);
            assert_eq!(tri.height_at(tri.a), Some(0.0));
        }
        let bounds = mesh.bounds().unwrap();
        assert_eq!(bounds.min, Vec3::new(-10.0, 0.0, -10.0));
        assert_eq!(bounds.max, Vec3::new(10.0, 0.0, 10.0));
    }

    #[test]
    fn test_segment_intersection() {
        let tri = Triangle::new(
            Vec3::new(-1.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(0.0, 0.0, 1.0),
        );
        let t = tri
            .intersect_segment(Vec3::new(0.0, 2.0, 0.0), Vec3::new(0.0, -2.0, 0.0))
            .unwrap();
        assert!((t - 0.5).abs() < 1e-6);
        assert!(tri
            .intersect_segment(Vec3::new(5.0, 2.0, 0.0), Vec3::new(5.0, -2.0, 0.0))
            .is_none());
    }

    #[test]
    fn test_push_box() {
        let mut mesh = TriMesh::new();
        mesh.push_box(BoundingBox::new(Vec3::ZERO, Vec3::ONE));
        assert_eq!(mesh.triangle_count(), 12);
        assert_eq!(mesh.bounds().unwrap().max, Vec3::ONE);
    }
}
