//! World integration for navigation graphs
//!
//! The [`WorldAdapter`] owns the live graph shared with crowds and query
//! tasks. It loads a cached graph or builds one, rebuilds in the background
//! on request (collapsing repeated requests into one), and announces graph
//! swaps and edits through [`WorldEvent`] observers so dependent systems can
//! pause and resume.
//!
//! # Example
//!
//! ```rust,no_run
//! use navgraph::{AgentType, GeometryInput, TriMesh};
//! use navgraph_common::Vec3;
//! use navgraph_world::{WorldAdapter, WorldSettings};
//!
//! # fn example() -> navgraph_common::Result<()> {
//! let input = GeometryInput::from_mesh(TriMesh::flat_plane(20.0, 0.0));
//! let settings = WorldSettings::default().with_cache_path("level.ngph");
//! let mut world = WorldAdapter::new(input, settings)?;
//! world.load_or_build()?;
//!
//! let agent = AgentType::default();
//! if let Some(path) = world.find_path(&agent, Vec3::new(-8.0, 0.0, -8.0), Vec3::new(8.0, 0.0, 8.0), false)? {
//!     println!("{} waypoints", path.len());
//! }
//!
//! // Later, after the level geometry changed
//! world.enqueue_navigation_graph_update(None);
//! loop {
//!     if world.update()? {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod adapter;
mod config;
pub mod picking;
mod rebuild;

#[cfg(test)]
mod world_tests;

pub use adapter::{ObserverId, WorldAdapter, WorldEvent, WorldObserver};
pub use config::WorldSettings;
pub use picking::{GroundHit, GroundPicker, MeshGroundPicker};
pub use rebuild::RebuildCallback;
