//! Navigation graph construction and queries
//!
//! Source triangles come from a [`GeometryInput`], which builds a
//! [`GridGraph`]: a tiled heightfield with one passability layer per
//! [`AgentType`]. The graph answers path, walkability and random point
//! queries through the [`NavigationGraph`] trait, supports incremental region
//! edits and batched obstacle changes, and can be saved and loaded keyed by a
//! content hash. [`PathFindingPath`] resamples query results for steering.

mod area;
mod connection;
mod filter;
mod graph;
mod grid;
mod heightfield;
mod input;
mod layer;
mod obstacle;
mod path;
pub mod persistence;
mod search;
mod settings;

#[cfg(test)]
mod graph_edit_tests;
#[cfg(test)]
mod test_mesh_helpers;

pub use area::{AgentType, Area, AreaShape, AreaType, NavEnum, NodeFlags};
pub use connection::Connection;
pub use filter::QueryFilter;
pub use graph::{
    find_path_async, shared, EditCallback, GraphDebugInfo, GraphEvent, GraphListener, GraphNode,
    GraphState, ListenerId, NavigationGraph, RaycastHit, Region, SharedGraph, WallSegment,
};
pub use grid::GridGraph;
pub use heightfield::{Span, MAX_SPANS_PER_CELL};
pub use input::{GeometryInput, GeometryProvider, MAX_AREAS, MAX_CONNECTIONS};
pub use layer::NodeRef;
pub use obstacle::{Obstacle, ObstacleId, ObstacleShape, ObstacleState};
pub use path::PathFindingPath;
pub use settings::GraphSettings;

pub use navgraph_common::{BoundingBox, Error, Result, TriMesh, Triangle, Vec3};
