//! Ground picking against the world's real surfaces
//!
//! The navigation graph samples surfaces at cell centres, so its heights are
//! approximate. A [`GroundPicker`] answers exact ground queries and is used by
//! the world adapter to snap path waypoints and walk positions.

use navgraph::GeometryProvider;
use navgraph_common::{Triangle, Vec3};

/// A ground surface found by a pick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundHit {
    pub position: Vec3,
    /// Unit normal facing up
    pub normal: Vec3,
    /// Distance from the queried point, used to rank candidates
    pub distance: f32,
}

/// Ray and point queries against ground geometry
pub trait GroundPicker: Send + Sync {
    /// Every ground surface directly above or below `position`
    fn pick_ground(&self, position: Vec3) -> Vec<GroundHit>;

    /// First surface hit by the segment `from..to`
    fn raycast(&self, from: Vec3, to: Vec3) -> Option<GroundHit>;

    /// Highest ground surface on the vertical line through `position`
    fn find_top_ground_position(&self, position: Vec3) -> Option<GroundHit> {
        self.pick_ground(position)
            .into_iter()
            .max_by(|a, b| a.position.y.total_cmp(&b.position.y))
    }

    /// Ground surface closest to `position` on its vertical line
    fn find_nearest_ground(&self, position: Vec3) -> Option<GroundHit> {
        self.pick_ground(position)
            .into_iter()
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }
}

/// Brute-force picker over a fixed triangle soup
#[derive(Debug, Clone, Default)]
pub struct MeshGroundPicker {
    triangles: Vec<Triangle>,
}

impl MeshGroundPicker {
    pub fn new(triangles: Vec<Triangle>) -> Self {
        Self { triangles }
    }

    /// Takes a snapshot of every triangle the provider currently supplies
    pub fn from_provider(provider: &dyn GeometryProvider) -> Self {
        Self::new(provider.triangles(None))
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }
}

impl GroundPicker for MeshGroundPicker {
    fn pick_ground(&self, position: Vec3) -> Vec<GroundHit> {
        self.triangles
            .iter()
            .filter_map(|tri| {
                let y = tri.height_at(position)?;
                let normal = tri.up_normal()?;
                // Walls have no usable ground height
                if normal.y <= 1e-3 {
                    return None;
                }
                Some(GroundHit {
                    position: Vec3::new(position.x, y, position.z),
                    normal,
                    distance: (y - position.y).abs(),
                })
            })
            .collect()
    }

    fn raycast(&self, from: Vec3, to: Vec3) -> Option<GroundHit> {
        let length = from.distance(to);
        self.triangles
            .iter()
            .filter_map(|tri| {
                let t = tri.intersect_segment(from, to)?;
                let normal = tri.up_normal()?;
                Some((t, normal))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(t, normal)| GroundHit {
                position: from.lerp(to, t),
                normal,
                distance: t * length,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navgraph_common::{BoundingBox, TriMesh};

    fn two_floors() -> MeshGroundPicker {
        let mut mesh = TriMesh::flat_plane(20.0, 0.0);
        mesh.push_box(BoundingBox::new(
            Vec3::new(-2.0, 2.0, -2.0),
            Vec3::new(2.0, 3.0, 2.0),
        ));
        MeshGroundPicker::from_provider(&mesh)
    }

    #[test]
    fn test_top_and_nearest_ground() {
        let picker = two_floors();
        let top = picker.find_top_ground_position(Vec3::new(0.5, 0.5, -1.0)).unwrap();
        assert!((top.position.y - 3.0).abs() < 1e-4);
        assert!(top.normal.y > 0.99);

        let nearest = picker.find_nearest_ground(Vec3::new(0.5, 0.5, -1.0)).unwrap();
        assert!(nearest.position.y.abs() < 1e-4);
        assert!((nearest.distance - 0.5).abs() < 1e-4);

        assert!(picker.find_top_ground_position(Vec3::new(50.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn test_raycast_hits_first_surface() {
        let picker = two_floors();
        let hit = picker
            .raycast(Vec3::new(5.0, 10.0, -3.0), Vec3::new(5.0, -10.0, -3.0))
            .unwrap();
        assert!(hit.position.y.abs() < 1e-4);
        assert!((hit.distance - 10.0).abs() < 1e-3);

        let roof = picker
            .raycast(Vec3::new(0.5, 10.0, -1.0), Vec3::new(0.5, -10.0, -1.0))
            .unwrap();
        assert!((roof.position.y - 3.0).abs() < 1e-4);

        assert!(picker
            .raycast(Vec3::new(0.5, 10.0, -1.0), Vec3::new(0.5, 5.0, -1.0))
            .is_none());
    }
}
