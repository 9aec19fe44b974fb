//! Test geometry and graph builders shared by the scenario tests

use crate::{AgentType, GeometryInput, GraphSettings, GridGraph, TriMesh, Vec3};
use navgraph_common::{Result, Triangle};

/// Agent used by most tests
pub fn test_agent() -> AgentType {
    AgentType::new("humanoid", 2.0)
}

/// Input over a flat 20x20 ground made of two triangles
pub fn plane_input() -> GeometryInput {
    GeometryInput::from_mesh(TriMesh::flat_plane(20.0, 0.0))
}

/// Builds a graph over `input` with default settings for [`test_agent`]
pub fn build_graph(input: &GeometryInput) -> Result<GridGraph> {
    input.create_graph(&GraphSettings::default(), &[test_agent()], None)
}

/// Axis-aligned quad at height `y` as two up-facing triangles
pub fn quad(min_x: f32, min_z: f32, max_x: f32, max_z: f32, y: f32) -> [Triangle; 2] {
    let a = Vec3::new(min_x, y, min_z);
    let b = Vec3::new(max_x, y, min_z);
    let c = Vec3::new(max_x, y, max_z);
    let d = Vec3::new(min_x, y, max_z);
    [Triangle::new(a, c, b), Triangle::new(a, d, c)]
}

/// Two 9x6 islands separated by a 2 unit gap along X
pub fn two_island_mesh() -> TriMesh {
    let mut triangles = Vec::new();
    triangles.extend(quad(-10.0, -3.0, -1.0, 3.0, 0.0));
    triangles.extend(quad(1.0, -3.0, 10.0, 3.0, 0.0));
    TriMesh::from_triangles(&triangles)
}

/// Minimum distance from `center` to any segment of `path` in XZ
pub fn min_distance_to_path(path: &[Vec3], center: Vec3) -> f32 {
    path.windows(2)
        .map(|w| navgraph_common::dist_point_segment_sqr_2d(center, w[0], w[1]).0.sqrt())
        .fold(f32::MAX, f32::min)
}
