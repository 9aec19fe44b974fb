//! The navigation graph capability and the types its queries exchange

use crate::{
    AgentType, GeometryProvider, GraphSettings, NodeFlags, NodeRef, Obstacle, ObstacleId,
    ObstacleShape, QueryFilter,
};
use navgraph_common::{point_in_polygon_2d, BoundingBox, Error, Result, Vec3};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Lifecycle of a navigation graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphState {
    Uninitialized,
    Building,
    Ready,
    Updating,
    Disposed,
}

impl fmt::Display for GraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GraphState::Uninitialized => "uninitialized",
            GraphState::Building => "building",
            GraphState::Ready => "ready",
            GraphState::Updating => "updating",
            GraphState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Topology change notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphEvent {
    /// A topology change is about to start
    Updating,
    /// The topology change finished and queries see the new state
    Updated,
}

/// Handle returned by [`NavigationGraph::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

/// Graph event observer
pub type GraphListener = Arc<dyn Fn(GraphEvent) + Send + Sync>;

/// Completion callback for region and obstacle edits
pub type EditCallback = Box<dyn FnOnce() + Send>;

/// Target of an incremental region edit
#[derive(Debug, Clone, PartialEq)]
pub enum Region {
    Point(Vec3),
    Box(BoundingBox),
    Points(Vec<Vec3>),
}

impl Region {
    /// Bounding volumes the edit touches
    pub fn volumes(&self) -> Vec<BoundingBox> {
        match self {
            Region::Point(p) => vec![BoundingBox::new(*p, *p)],
            Region::Box(b) => vec![*b],
            Region::Points(points) => points.iter().map(|p| BoundingBox::new(*p, *p)).collect(),
        }
    }
}

/// A traversable cell
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub reference: NodeRef,
    /// Centre of the cell on its walkable surface
    pub center: Vec3,
    /// Cost of crossing the cell with the default filter
    pub cost: f32,
    pub area: u8,
    pub flags: NodeFlags,
    /// Cell outline on the walkable surface
    pub perimeter: Vec<Vec3>,
    /// Vertical range considered inside the node
    pub min_y: f32,
    pub max_y: f32,
}

impl GraphNode {
    /// Returns true if `p` lies inside the cell outline and vertical range
    pub fn contains(&self, p: Vec3) -> bool {
        p.y >= self.min_y && p.y <= self.max_y && point_in_polygon_2d(p, &self.perimeter)
    }
}

/// Result of [`NavigationGraph::raycast`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastHit {
    /// True when the segment left walkable ground before reaching its end
    pub blocked: bool,
    /// Fraction of the segment that was traversed
    pub t: f32,
    /// Last walkable position along the segment
    pub position: Vec3,
}

/// Edge between walkable and non-walkable ground
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallSegment {
    pub start: Vec3,
    pub end: Vec3,
}

/// Diagnostic snapshot of a graph
#[derive(Debug, Clone, PartialEq)]
pub struct GraphDebugInfo {
    pub state: GraphState,
    pub bounds: BoundingBox,
    pub tile_count: usize,
    pub built_tiles: usize,
    pub cell_count: usize,
    pub span_count: usize,
    pub node_count: usize,
    pub link_count: usize,
    pub obstacle_count: usize,
    pub pending_obstacle_changes: usize,
    /// Outline of every walkable cell for the agent type
    pub walkable_quads: Vec<[Vec3; 4]>,
}

/// A built, queryable and editable navigation graph
///
/// Queries require the [`GraphState::Ready`] state and fail with
/// [`Error::GraphNotReady`] otherwise. Edits move the graph to
/// [`GraphState::Updating`], notify listeners with [`GraphEvent::Updating`],
/// and return to `Ready` with [`GraphEvent::Updated`].
pub trait NavigationGraph: Send + Sync {
    fn state(&self) -> GraphState;

    fn settings(&self) -> &GraphSettings;

    /// Agent types the graph holds passability for
    fn agent_types(&self) -> Vec<AgentType>;

    /// Hash of the geometry, settings, agent types, areas and connections
    /// the graph was built from, as computed by [`GeometryInput::get_hash`]
    ///
    /// [`GeometryInput::get_hash`]: crate::GeometryInput::get_hash
    fn content_hash(&self) -> &str;

    fn bounds(&self) -> BoundingBox;

    /// Registers an observer; listeners run synchronously in registration order
    fn subscribe(&mut self, listener: GraphListener) -> ListenerId;

    /// Removes an observer, returning false if it was not registered
    fn unsubscribe(&mut self, id: ListenerId) -> bool;

    /// Attaches the geometry used by region edits
    fn attach_source(&mut self, source: Arc<dyn GeometryProvider>);

    /// Random walkable point, optionally within `radius` of a connected origin
    fn find_random_point(
        &self,
        agent: &AgentType,
        around: Option<(Vec3, f32)>,
    ) -> Result<Option<Vec3>>;

    /// Seeds the generator used by [`NavigationGraph::find_random_point`]
    fn set_random_seed(&self, seed: u32);

    /// Node containing or nearest to `point`
    fn find_node(&self, agent: &AgentType, point: Vec3) -> Result<Option<GraphNode>>;

    /// Waypoints from `from` to `to`; fewer than two points means no path
    fn find_path_with_filter(
        &self,
        agent: &AgentType,
        from: Vec3,
        to: Vec3,
        filter: &QueryFilter,
    ) -> Result<Vec<Vec3>>;

    /// [`NavigationGraph::find_path_with_filter`] with the default filter
    fn find_path(&self, agent: &AgentType, from: Vec3, to: Vec3) -> Result<Vec<Vec3>> {
        self.find_path_with_filter(agent, from, to, &QueryFilter::default())
    }

    /// Whether walkable ground lies within `threshold` of `position`, and the
    /// nearest walkable point found (or `position` itself if there is none)
    fn is_walkable(&self, agent: &AgentType, position: Vec3, threshold: f32)
        -> Result<(bool, Vec3)>;

    /// Walks the straight segment `from..to` over the surface
    fn raycast(
        &self,
        agent: &AgentType,
        from: Vec3,
        to: Vec3,
        filter: &QueryFilter,
    ) -> Result<RaycastHit>;

    /// Wall segments within `range` of `center` on the same floor
    fn local_boundary(&self, agent: &AgentType, center: Vec3, range: f32)
        -> Result<Vec<WallSegment>>;

    /// Samples the region and (re)creates its cells
    fn create_at(&mut self, region: &Region, callback: Option<EditCallback>) -> Result<()>;

    /// Resamples the already built part of the region
    fn update_at(&mut self, region: &Region, callback: Option<EditCallback>) -> Result<()>;

    /// Clears the region
    fn remove_at(&mut self, region: &Region, callback: Option<EditCallback>) -> Result<()>;

    /// Stages a new obstacle; it takes effect on the next commit
    fn add_obstacle(&mut self, shape: ObstacleShape) -> Result<ObstacleId>;

    /// Stages an obstacle removal; returns false for unknown ids
    fn remove_obstacle(&mut self, id: ObstacleId) -> Result<bool>;

    /// Commits staged obstacle changes; returns false if nothing was pending
    fn update_obstacles(&mut self, callback: Option<EditCallback>) -> Result<bool>;

    fn obstacle(&self, id: ObstacleId) -> Option<Obstacle>;

    fn obstacle_count(&self) -> usize;

    fn pending_obstacle_changes(&self) -> usize;

    fn get_debug_info(&self, agent: &AgentType) -> Result<GraphDebugInfo>;

    /// Serialized form used by persistence
    fn to_bytes(&self) -> Result<Vec<u8>>;

    /// Releases the graph; all later queries fail
    fn dispose(&mut self);
}

/// A graph shared between the world adapter, crowds and query tasks
pub type SharedGraph = Arc<RwLock<dyn NavigationGraph>>;

/// Wraps a graph for sharing
pub fn shared<G: NavigationGraph + 'static>(graph: G) -> SharedGraph {
    Arc::new(RwLock::new(graph))
}

/// Runs [`NavigationGraph::find_path`] on the blocking thread pool
pub async fn find_path_async(
    graph: SharedGraph,
    agent: AgentType,
    from: Vec3,
    to: Vec3,
) -> Result<Vec<Vec3>> {
    tokio::task::spawn_blocking(move || {
        let graph = graph
            .read()
            .map_err(|e| Error::LockPoisoned(e.to_string()))?;
        graph.find_path(&agent, from, to)
    })
    .await
    .map_err(|e| Error::Io(std::io::Error::other(e)))?
}
