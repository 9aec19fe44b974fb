//! Grid-based navigation graph
//!
//! The graph keeps one heightfield shared by all agent types plus one
//! passability layer per agent type. Region edits resample whole tiles;
//! obstacle commits only re-derive passability around the changed obstacles.

use crate::heightfield::Heightfield;
use crate::layer::AgentLayer;
use crate::search::LayerView;
use crate::{
    AgentType, Area, Connection, EditCallback, GeometryProvider, GraphDebugInfo, GraphEvent,
    GraphListener, GraphNode, GraphSettings, GraphState, ListenerId, NavigationGraph, Obstacle,
    ObstacleId, ObstacleShape, ObstacleState, QueryFilter, RaycastHit, Region, WallSegment,
};
use navgraph_common::{BoundingBox, Containment, Error, Result, Triangle, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use web_time::Instant;

/// Everything that is persisted with a graph
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphData {
    settings: GraphSettings,
    heightfield: Heightfield,
    layers: Vec<AgentLayer>,
    areas: Vec<Area>,
    connections: Vec<Connection>,
    obstacles: BTreeMap<ObstacleId, Obstacle>,
    next_obstacle_id: ObstacleId,
    /// Hash of the inputs the graph was built from
    content_hash: String,
}

/// Kind of region edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegionEdit {
    Create,
    Update,
    Remove,
}

/// Tiled multi-layer heightfield graph
pub struct GridGraph {
    data: GraphData,
    state: GraphState,
    listeners: Vec<(ListenerId, GraphListener)>,
    next_listener_id: u64,
    source: Option<Arc<dyn GeometryProvider>>,
    random_seed: AtomicU32,
}

impl fmt::Debug for GridGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridGraph")
            .field("state", &self.state)
            .field("width", &self.data.heightfield.width)
            .field("depth", &self.data.heightfield.depth)
            .field("layers", &self.data.layers.len())
            .field("obstacles", &self.data.obstacles.len())
            .field("listeners", &self.listeners.len())
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

impl GridGraph {
    /// Builds a graph from source triangles
    ///
    /// `progress` receives a non-decreasing fraction in `[0, 1]`.
    pub fn build(
        source: Option<Arc<dyn GeometryProvider>>,
        triangles: &[Triangle],
        settings: &GraphSettings,
        agent_types: &[AgentType],
        areas: Vec<Area>,
        connections: Vec<Connection>,
        mut progress: Option<&mut dyn FnMut(f32)>,
    ) -> Result<Self> {
        let started = Instant::now();
        settings.validate().map_err(Error::InvalidInput)?;
        if agent_types.is_empty() {
            return Err(Error::InvalidInput(
                "at least one agent type is required".to_string(),
            ));
        }

        let bounds = match settings.bounds {
            Some(bounds) => bounds,
            None => BoundingBox::from_points(
                triangles.iter().flat_map(|t| [t.a, t.b, t.c]),
            )
            .ok_or_else(|| Error::Build("no geometry to build from".to_string()))?,
        };

        let mut report = |fraction: f32| {
            if let Some(cb) = progress.as_mut() {
                cb(fraction.clamp(0.0, 1.0));
            }
        };
        report(0.0);

        let mut heightfield = Heightfield::new(bounds, settings.cell_size, settings.tile_size)?;

        // Bucket triangles per tile so each tile only samples what overlaps it
        let tiles_x = heightfield.tiles_x();
        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); heightfield.tile_count()];
        for (i, tri) in triangles.iter().enumerate() {
            for (tx, tz) in heightfield.tiles_in(&tri.bounds()) {
                buckets[tz as usize * tiles_x as usize + tx as usize].push(i);
            }
        }

        let total_tiles = heightfield.tile_count().max(1);
        let mut scratch = Vec::new();
        for tz in 0..heightfield.tiles_z() {
            for tx in 0..tiles_x {
                let slot = tz as usize * tiles_x as usize + tx as usize;
                scratch.clear();
                scratch.extend(buckets[slot].iter().map(|&i| triangles[i]));
                heightfield.rasterize_tile(tx, tz, &scratch, settings, &areas);
                report(0.8 * (slot + 1) as f32 / total_tiles as f32);
            }
        }

        let content_hash =
            crate::input::content_hash(triangles, settings, agent_types, &areas, &connections);
        let mut data = GraphData {
            settings: settings.clone(),
            layers: Vec::with_capacity(agent_types.len()),
            heightfield,
            areas,
            connections,
            obstacles: BTreeMap::new(),
            next_obstacle_id: 1,
            content_hash,
        };

        for (i, agent) in agent_types.iter().enumerate() {
            let mut layer = AgentLayer::new(agent.clone(), data.heightfield.cell_count());
            layer.derive(
                &data.heightfield,
                &data.settings,
                &[],
                0..data.heightfield.width,
                0..data.heightfield.depth,
            );
            data.layers.push(layer);
            report(0.8 + 0.2 * (i + 1) as f32 / agent_types.len() as f32);
        }
        data.rebuild_links();

        log::info!(
            "Built navigation graph: {}x{} cells, {} tiles, {} agent types in {:.2?}",
            data.heightfield.width,
            data.heightfield.depth,
            data.heightfield.tile_count(),
            data.layers.len(),
            started.elapsed()
        );
        report(1.0);

        Ok(Self::from_data(data, source))
    }

    fn from_data(data: GraphData, source: Option<Arc<dyn GeometryProvider>>) -> Self {
        Self {
            data,
            state: GraphState::Ready,
            listeners: Vec::new(),
            next_listener_id: 1,
            source,
            random_seed: AtomicU32::new(1),
        }
    }

    /// Restores a graph produced by [`NavigationGraph::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let data: GraphData = postcard::from_bytes(bytes)
            .map_err(|e| Error::Persistence(format!("failed to decode graph: {}", e)))?;
        data.validate().map_err(Error::Persistence)?;
        Ok(Self::from_data(data, None))
    }

    fn emit(&self, event: GraphEvent) {
        for (_, listener) in &self.listeners {
            listener(event);
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            GraphState::Ready => Ok(()),
            state => Err(Error::GraphNotReady(state.to_string())),
        }
    }

    fn view(&self, agent: &AgentType) -> Result<LayerView<'_>> {
        self.ensure_ready()?;
        let layer = self
            .data
            .layers
            .iter()
            .find(|l| &l.agent == agent)
            .ok_or_else(|| Error::UnknownAgentType(agent.name.clone()))?;
        Ok(LayerView {
            hf: &self.data.heightfield,
            layer,
            settings: &self.data.settings,
        })
    }

    fn begin_update(&mut self) -> Result<()> {
        if self.state != GraphState::Ready {
            return Err(Error::GraphBusy(self.state.to_string()));
        }
        self.state = GraphState::Updating;
        self.emit(GraphEvent::Updating);
        Ok(())
    }

    fn end_update(&mut self, callback: Option<EditCallback>) {
        self.state = GraphState::Ready;
        self.emit(GraphEvent::Updated);
        if let Some(callback) = callback {
            callback();
        }
    }

    fn next_random(&self) -> f32 {
        let previous = self
            .random_seed
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |seed| {
                Some(seed.wrapping_mul(1103515245).wrapping_add(12345))
            })
            .unwrap_or_else(|seed| seed);
        let seed = previous.wrapping_mul(1103515245).wrapping_add(12345);
        (seed & 0x7FFFFFFF) as f32 / 2147483648.0
    }

    fn edit_region(
        &mut self,
        region: &Region,
        edit: RegionEdit,
        callback: Option<EditCallback>,
    ) -> Result<()> {
        if self.state != GraphState::Ready {
            return Err(Error::GraphBusy(self.state.to_string()));
        }
        let source = match edit {
            RegionEdit::Remove => None,
            _ => Some(self.source.clone().ok_or(Error::NoGeometrySource)?),
        };

        let mut tiles: Vec<(u32, u32)> = region
            .volumes()
            .iter()
            .flat_map(|v| self.data.heightfield.tiles_in(v))
            .collect();
        tiles.sort_unstable();
        tiles.dedup();
        if edit == RegionEdit::Update {
            tiles.retain(|&(tx, tz)| self.data.heightfield.is_tile_built(tx, tz));
        }

        self.begin_update()?;
        let started = Instant::now();
        for &(tx, tz) in &tiles {
            match &source {
                None => self.data.heightfield.clear_tile(tx, tz),
                Some(source) => {
                    let tile_bounds = self.data.heightfield.tile_bounds(tx, tz);
                    let triangles: Vec<Triangle> = source
                        .triangles(Some(&tile_bounds))
                        .into_iter()
                        .filter(|t| t.containment(&tile_bounds) != Containment::Disjoint)
                        .collect();
                    self.data.heightfield.rasterize_tile(
                        tx,
                        tz,
                        &triangles,
                        &self.data.settings,
                        &self.data.areas,
                    );
                }
            }
        }

        if let Some((xs, zs)) = self.data.tiles_cell_range(&tiles) {
            self.data.rederive(xs, zs);
            self.data.rebuild_links();
        }
        log::debug!(
            "{:?} edit resampled {} tiles in {:.2?}",
            edit,
            tiles.len(),
            started.elapsed()
        );

        self.end_update(callback);
        Ok(())
    }

    /// Stored areas, in application order
    pub fn areas(&self) -> &[Area] {
        &self.data.areas
    }

    /// Stored off-mesh connections
    pub fn connections(&self) -> &[Connection] {
        &self.data.connections
    }
}

impl GraphData {
    fn validate(&self) -> std::result::Result<(), String> {
        self.settings.validate()?;
        self.heightfield.validate()?;
        if self.layers.is_empty() {
            return Err("graph has no agent layers".to_string());
        }
        for layer in &self.layers {
            layer.validate(&self.heightfield)?;
        }
        Ok(())
    }

    /// Cell ranges covering the given tiles, grown by the erosion reach
    fn tiles_cell_range(&self, tiles: &[(u32, u32)]) -> Option<(Range<u32>, Range<u32>)> {
        let hf = &self.heightfield;
        let mut xs: Option<Range<u32>> = None;
        let mut zs: Option<Range<u32>> = None;
        for &(tx, tz) in tiles {
            let (tile_xs, tile_zs) = hf.tile_cells(tx, tz);
            xs = Some(match xs {
                Some(r) => r.start.min(tile_xs.start)..r.end.max(tile_xs.end),
                None => tile_xs,
            });
            zs = Some(match zs {
                Some(r) => r.start.min(tile_zs.start)..r.end.max(tile_zs.end),
                None => tile_zs,
            });
        }
        let (xs, zs) = (xs?, zs?);
        let grow = self.erosion_reach();
        Some((
            xs.start.saturating_sub(grow)..(xs.end + grow).min(hf.width),
            zs.start.saturating_sub(grow)..(zs.end + grow).min(hf.depth),
        ))
    }

    /// Cell ranges affected by a change inside `bounds`
    fn bounds_cell_range(&self, bounds: &BoundingBox) -> Option<(Range<u32>, Range<u32>)> {
        let hf = &self.heightfield;
        let margin = self.settings.agent_radius + hf.cell_size;
        hf.cell_range(&bounds.expanded(Vec3::new(margin, 0.0, margin)))
    }

    fn erosion_reach(&self) -> u32 {
        (self.settings.agent_radius / self.heightfield.cell_size).ceil() as u32 + 1
    }

    fn rederive(&mut self, xs: Range<u32>, zs: Range<u32>) {
        let committed: Vec<&Obstacle> = self
            .obstacles
            .values()
            .filter(|o| o.is_committed())
            .collect();
        for layer in &mut self.layers {
            layer.derive(
                &self.heightfield,
                &self.settings,
                &committed,
                xs.clone(),
                zs.clone(),
            );
        }
    }

    fn rebuild_links(&mut self) {
        let all_links: Vec<_> = self
            .layers
            .iter()
            .map(|layer| {
                LayerView {
                    hf: &self.heightfield,
                    layer,
                    settings: &self.settings,
                }
                .build_links(&self.connections)
            })
            .collect();
        for (layer, links) in self.layers.iter_mut().zip(all_links) {
            layer.links = links;
        }
    }
}

impl NavigationGraph for GridGraph {
    fn state(&self) -> GraphState {
        self.state
    }

    fn settings(&self) -> &GraphSettings {
        &self.data.settings
    }

    fn agent_types(&self) -> Vec<AgentType> {
        self.data.layers.iter().map(|l| l.agent.clone()).collect()
    }

    fn content_hash(&self) -> &str {
        &self.data.content_hash
    }

    fn bounds(&self) -> BoundingBox {
        self.data.heightfield.bounds
    }

    fn subscribe(&mut self, listener: GraphListener) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, listener));
        id
    }

    fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    fn attach_source(&mut self, source: Arc<dyn GeometryProvider>) {
        self.source = Some(source);
    }

    fn find_random_point(
        &self,
        agent: &AgentType,
        around: Option<(Vec3, f32)>,
    ) -> Result<Option<Vec3>> {
        let view = self.view(agent)?;
        let mut rand = || self.next_random();
        Ok(view.random_point(&mut rand, around, &QueryFilter::default()))
    }

    fn set_random_seed(&self, seed: u32) {
        self.random_seed.store(seed, Ordering::Relaxed);
    }

    fn find_node(&self, agent: &AgentType, point: Vec3) -> Result<Option<GraphNode>> {
        let view = self.view(agent)?;
        Ok(view
            .nearest_node(point, view.query_extent(), &QueryFilter::default())
            .and_then(|(node, _)| view.node_info(node)))
    }

    fn find_path_with_filter(
        &self,
        agent: &AgentType,
        from: Vec3,
        to: Vec3,
        filter: &QueryFilter,
    ) -> Result<Vec<Vec3>> {
        let view = self.view(agent)?;
        Ok(view.find_path(from, to, filter))
    }

    fn is_walkable(
        &self,
        agent: &AgentType,
        position: Vec3,
        threshold: f32,
    ) -> Result<(bool, Vec3)> {
        let view = self.view(agent)?;
        Ok(
            match view.nearest_node(position, f32::INFINITY, &QueryFilter::default()) {
                Some((_, nearest)) => (nearest.distance(position) <= threshold, nearest),
                None => (false, position),
            },
        )
    }

    fn raycast(
        &self,
        agent: &AgentType,
        from: Vec3,
        to: Vec3,
        filter: &QueryFilter,
    ) -> Result<RaycastHit> {
        let view = self.view(agent)?;
        Ok(view.raycast(from, to, filter))
    }

    fn local_boundary(
        &self,
        agent: &AgentType,
        center: Vec3,
        range: f32,
    ) -> Result<Vec<WallSegment>> {
        let view = self.view(agent)?;
        Ok(view.local_boundary(center, range))
    }

    fn create_at(&mut self, region: &Region, callback: Option<EditCallback>) -> Result<()> {
        self.edit_region(region, RegionEdit::Create, callback)
    }

    fn update_at(&mut self, region: &Region, callback: Option<EditCallback>) -> Result<()> {
        self.edit_region(region, RegionEdit::Update, callback)
    }

    fn remove_at(&mut self, region: &Region, callback: Option<EditCallback>) -> Result<()> {
        self.edit_region(region, RegionEdit::Remove, callback)
    }

    fn add_obstacle(&mut self, shape: ObstacleShape) -> Result<ObstacleId> {
        if self.state != GraphState::Ready {
            return Err(Error::GraphBusy(self.state.to_string()));
        }
        let id = self.data.next_obstacle_id;
        self.data.next_obstacle_id = id.wrapping_add(1).max(1);
        self.data.obstacles.insert(
            id,
            Obstacle {
                id,
                shape,
                state: ObstacleState::Processing,
            },
        );
        log::debug!("Staged obstacle {}", id);
        Ok(id)
    }

    fn remove_obstacle(&mut self, id: ObstacleId) -> Result<bool> {
        if self.state != GraphState::Ready {
            return Err(Error::GraphBusy(self.state.to_string()));
        }
        let Some(obstacle) = self.data.obstacles.get_mut(&id) else {
            return Ok(false);
        };
        match obstacle.state {
            ObstacleState::Processed => obstacle.state = ObstacleState::Removing,
            ObstacleState::Removing => {}
            // Never committed, nothing to undo
            ObstacleState::Processing => {
                self.data.obstacles.remove(&id);
            }
        }
        log::debug!("Staged removal of obstacle {}", id);
        Ok(true)
    }

    fn update_obstacles(&mut self, callback: Option<EditCallback>) -> Result<bool> {
        if self.state != GraphState::Ready {
            return Err(Error::GraphBusy(self.state.to_string()));
        }

        let pending: Vec<BoundingBox> = self
            .data
            .obstacles
            .values()
            .filter(|o| o.is_pending())
            .map(|o| o.shape.bounds())
            .collect();
        if pending.is_empty() {
            if let Some(callback) = callback {
                callback();
            }
            return Ok(false);
        }

        self.begin_update()?;
        for obstacle in self.data.obstacles.values_mut() {
            if obstacle.state == ObstacleState::Processing {
                obstacle.state = ObstacleState::Processed;
            }
        }
        self.data
            .obstacles
            .retain(|_, o| o.state != ObstacleState::Removing);

        for bounds in &pending {
            if let Some((xs, zs)) = self.data.bounds_cell_range(bounds) {
                self.data.rederive(xs, zs);
            }
        }
        self.data.rebuild_links();
        log::debug!("Committed {} obstacle changes", pending.len());

        self.end_update(callback);
        Ok(true)
    }

    fn obstacle(&self, id: ObstacleId) -> Option<Obstacle> {
        self.data.obstacles.get(&id).cloned()
    }

    fn obstacle_count(&self) -> usize {
        self.data
            .obstacles
            .values()
            .filter(|o| o.state != ObstacleState::Removing)
            .count()
    }

    fn pending_obstacle_changes(&self) -> usize {
        self.data
            .obstacles
            .values()
            .filter(|o| o.is_pending())
            .count()
    }

    fn get_debug_info(&self, agent: &AgentType) -> Result<GraphDebugInfo> {
        let view = self.view(agent)?;
        let hf = &self.data.heightfield;
        Ok(GraphDebugInfo {
            state: self.state,
            bounds: hf.bounds,
            tile_count: hf.tile_count(),
            built_tiles: hf.built_tile_count(),
            cell_count: hf.cell_count(),
            span_count: hf.span_count(),
            node_count: view.layer.node_count(),
            link_count: view.layer.links.values().map(Vec::len).sum(),
            obstacle_count: self.obstacle_count(),
            pending_obstacle_changes: self.pending_obstacle_changes(),
            walkable_quads: view.walkable_quads(),
        })
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(&self.data)
            .map_err(|e| Error::Persistence(format!("failed to encode graph: {}", e)))
    }

    fn dispose(&mut self) {
        if self.state == GraphState::Disposed {
            return;
        }
        self.state = GraphState::Disposed;
        self.listeners.clear();
        self.source = None;
        log::debug!("Disposed navigation graph");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navgraph_common::TriMesh;

    fn plane_graph() -> GridGraph {
        let mesh = TriMesh::flat_plane(10.0, 0.0);
        let triangles: Vec<Triangle> = mesh.triangles().collect();
        GridGraph::build(
            None,
            &triangles,
            &GraphSettings::default(),
            &[AgentType::default()],
            Vec::new(),
            Vec::new(),
            None,
        )
        .unwrap()
    }

    fn decode(data: &GraphData) -> Result<GridGraph> {
        GridGraph::from_bytes(&postcard::to_allocvec(data).unwrap())
    }

    #[test]
    fn test_from_bytes_round_trip() {
        let graph = plane_graph();
        let restored = GridGraph::from_bytes(&graph.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.content_hash(), graph.content_hash());
        assert_eq!(restored.agent_types(), graph.agent_types());
    }

    #[test]
    fn test_from_bytes_rejects_zero_tile_size() {
        let graph = plane_graph();
        let mut data = graph.data.clone();
        data.heightfield.tile_size = 0;
        assert!(matches!(decode(&data), Err(Error::Persistence(_))));

        let mut data = graph.data.clone();
        data.settings.tile_size = 0;
        assert!(matches!(decode(&data), Err(Error::Persistence(_))));
    }

    #[test]
    fn test_from_bytes_rejects_mismatched_layers() {
        let graph = plane_graph();
        let mut data = graph.data.clone();
        data.layers[0].passable.push(0);
        assert!(matches!(decode(&data), Err(Error::Persistence(_))));

        let mut data = graph.data.clone();
        data.layers.clear();
        assert!(matches!(decode(&data), Err(Error::Persistence(_))));

        let mut data = graph.data.clone();
        data.heightfield.width += 3;
        assert!(matches!(decode(&data), Err(Error::Persistence(_))));
    }
}
