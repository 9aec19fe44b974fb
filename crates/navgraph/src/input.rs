//! Source geometry, registered areas and off-mesh connections
//!
//! A [`GeometryInput`] is the starting point of every graph build. It pulls
//! triangles from a [`GeometryProvider`] on demand and owns the area and
//! connection registries along with their id counters.

use crate::persistence::{read_graph, write_graph};
use crate::{
    AgentType, Area, Connection, GraphSettings, GridGraph, NavEnum, NavigationGraph,
};
use navgraph_common::{BoundingBox, Containment, Error, Result, TriMesh, Triangle};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// Maximum number of areas registered on one input
pub const MAX_AREAS: usize = 256;

/// Maximum number of connections registered on one input
pub const MAX_CONNECTIONS: usize = 256;

/// Supplies the navigable triangles of the world
pub trait GeometryProvider: Send + Sync {
    /// Triangles intersecting `bounds`, or all triangles when `bounds` is `None`
    ///
    /// Providers may return extra triangles; callers filter again.
    fn triangles(&self, bounds: Option<&BoundingBox>) -> Vec<Triangle>;
}

impl GeometryProvider for TriMesh {
    fn triangles(&self, bounds: Option<&BoundingBox>) -> Vec<Triangle> {
        match bounds {
            Some(bounds) => self
                .triangles()
                .filter(|t| t.containment(bounds) != Containment::Disjoint)
                .collect(),
            None => TriMesh::triangles(self).collect(),
        }
    }
}

#[derive(Clone)]
pub struct GeometryInput {
    provider: Arc<dyn GeometryProvider>,
    areas: Vec<Area>,
    next_area_id: i32,
    connections: Vec<Connection>,
    next_connection_id: i32,
}

impl GeometryInput {
    pub fn new(provider: Arc<dyn GeometryProvider>) -> Self {
        Self {
            provider,
            areas: Vec::new(),
            next_area_id: 0,
            connections: Vec::new(),
            next_connection_id: 0,
        }
    }

    pub fn from_mesh(mesh: TriMesh) -> Self {
        Self::new(Arc::new(mesh))
    }

    pub fn provider(&self) -> Arc<dyn GeometryProvider> {
        Arc::clone(&self.provider)
    }

    /// Source triangles, keeping only those not disjoint from `bounds`
    pub fn get_triangles(&self, bounds: Option<&BoundingBox>) -> Vec<Triangle> {
        collect_triangles(self.provider.as_ref(), bounds)
    }

    /// [`GeometryInput::get_triangles`] on the blocking thread pool
    pub async fn get_triangles_async(&self, bounds: Option<BoundingBox>) -> Result<Vec<Triangle>> {
        let provider = self.provider();
        tokio::task::spawn_blocking(move || collect_triangles(provider.as_ref(), bounds.as_ref()))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))
    }

    /// Registers an area, returning its id or `-1` when the registry is full
    pub fn add_area(&mut self, mut area: Area) -> i32 {
        if self.areas.len() >= MAX_AREAS {
            log::warn!("Area registry is full ({} areas)", MAX_AREAS);
            return -1;
        }
        let id = self.next_area_id;
        self.next_area_id += 1;
        area.set_id(id);
        self.areas.push(area);
        id
    }

    pub fn remove_area(&mut self, id: i32) -> bool {
        let before = self.areas.len();
        self.areas.retain(|a| a.id() != id);
        self.areas.len() != before
    }

    pub fn get_area(&self, id: i32) -> Option<&Area> {
        self.areas.iter().find(|a| a.id() == id)
    }

    pub fn clear_areas(&mut self) {
        self.areas.clear();
    }

    /// Registered areas in registration order
    pub fn areas(&self) -> &[Area] {
        &self.areas
    }

    /// Registers a connection, returning its id or `-1` when the registry is full
    pub fn add_connection(&mut self, mut connection: Connection) -> i32 {
        if self.connections.len() >= MAX_CONNECTIONS {
            log::warn!("Connection registry is full ({} connections)", MAX_CONNECTIONS);
            return -1;
        }
        let id = self.next_connection_id;
        self.next_connection_id += 1;
        connection.set_id(id);
        self.connections.push(connection);
        id
    }

    /// Registers a connection tagged with typed area and flag values
    pub fn add_connection_with<A: NavEnum, F: NavEnum>(
        &mut self,
        connection: Connection,
        area: A,
        flags: F,
    ) -> i32 {
        self.add_connection(connection.with_area(area).with_flags(flags))
    }

    pub fn remove_connection(&mut self, id: i32) -> bool {
        let before = self.connections.len();
        self.connections.retain(|c| c.id() != id);
        self.connections.len() != before
    }

    pub fn get_connection(&self, id: i32) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id() == id)
    }

    pub fn clear_connections(&mut self) {
        self.connections.clear();
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Builds a graph from the current geometry, areas and connections
    pub fn create_graph(
        &self,
        settings: &GraphSettings,
        agent_types: &[AgentType],
        progress: Option<&mut dyn FnMut(f32)>,
    ) -> Result<GridGraph> {
        let triangles = self.get_triangles(settings.bounds.as_ref());
        log::debug!(
            "Building graph from {} triangles, {} areas, {} connections",
            triangles.len(),
            self.areas.len(),
            self.connections.len()
        );
        GridGraph::build(
            Some(self.provider()),
            &triangles,
            settings,
            agent_types,
            self.areas.clone(),
            self.connections.clone(),
            progress,
        )
    }

    /// Hex-encoded SHA-256 over the geometry inside the build bounds, the
    /// settings, the agent types and the registered areas and connections
    ///
    /// Matches [`NavigationGraph::content_hash`] of a graph built from the
    /// same inputs, so it can be used to validate a saved graph.
    pub fn get_hash(&self, settings: &GraphSettings, agent_types: &[AgentType]) -> String {
        let triangles = self.get_triangles(settings.bounds.as_ref());
        content_hash(&triangles, settings, agent_types, &self.areas, &self.connections)
    }

    /// Saves a graph together with the hash of the inputs it was built from
    pub fn save<P: AsRef<Path>>(&self, path: P, graph: &dyn NavigationGraph) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        write_graph(&mut writer, graph.content_hash(), graph.to_bytes()?)?;
        writer.flush()?;
        log::info!("Saved navigation graph to {}", path.as_ref().display());
        Ok(())
    }

    /// Loads a graph, rejecting it when `hash` is given and does not match
    pub fn try_load<P: AsRef<Path>>(&self, path: P, hash: Option<&str>) -> Result<GridGraph> {
        let mut reader = BufReader::new(File::open(path.as_ref())?);
        let (stored, bytes) = read_graph(&mut reader)?;
        if let Some(expected) = hash {
            if stored != expected {
                return Err(Error::StaleGraph {
                    stored,
                    expected: expected.to_string(),
                });
            }
        }

        let mut graph = GridGraph::from_bytes(&bytes)?;
        graph.attach_source(self.provider());
        log::info!("Loaded navigation graph from {}", path.as_ref().display());
        Ok(graph)
    }

    /// [`GeometryInput::try_load`] that reports failures as `None`
    pub fn load<P: AsRef<Path>>(&self, path: P, hash: Option<&str>) -> Option<GridGraph> {
        match self.try_load(path.as_ref(), hash) {
            Ok(graph) => Some(graph),
            Err(e) => {
                log::warn!(
                    "Not loading navigation graph from {}: {}",
                    path.as_ref().display(),
                    e
                );
                None
            }
        }
    }
}

/// Hash identifying the inputs of a graph build
///
/// Agent types are hashed in name order since layer order does not change
/// what a graph answers.
pub(crate) fn content_hash(
    triangles: &[Triangle],
    settings: &GraphSettings,
    agent_types: &[AgentType],
    areas: &[Area],
    connections: &[Connection],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"navgraph");

    hasher.update((triangles.len() as u64).to_le_bytes());
    for tri in triangles {
        for v in [tri.a, tri.b, tri.c] {
            for c in v.to_array() {
                hasher.update(c.to_le_bytes());
            }
        }
    }

    let mut agents: Vec<&AgentType> = agent_types.iter().collect();
    agents.sort_by(|a, b| a.name.cmp(&b.name).then(a.height.total_cmp(&b.height)));
    hasher.update((agents.len() as u64).to_le_bytes());
    for agent in agents {
        hasher.update((agent.name.len() as u64).to_le_bytes());
        hasher.update(agent.name.as_bytes());
        hasher.update(agent.height.to_le_bytes());
    }

    // Serialization into a Vec only fails on allocation errors
    for part in [
        postcard::to_allocvec(settings),
        postcard::to_allocvec(areas),
        postcard::to_allocvec(connections),
    ] {
        match part {
            Ok(bytes) => {
                hasher.update((bytes.len() as u64).to_le_bytes());
                hasher.update(&bytes);
            }
            Err(e) => log::warn!("Failed to hash graph input: {}", e),
        }
    }

    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn collect_triangles(provider: &dyn GeometryProvider, bounds: Option<&BoundingBox>) -> Vec<Triangle> {
    let triangles = provider.triangles(bounds);
    match bounds {
        Some(bounds) => triangles
            .into_iter()
            .filter(|t| t.containment(bounds) != Containment::Disjoint)
            .collect(),
        None => triangles,
    }
}
