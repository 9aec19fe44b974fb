//! Crowd management over a shared navigation graph
//!
//! A [`Crowd`] owns a fixed pool of agent slots. [`Crowd::update`] steps every
//! active agent from a snapshot taken at the start of the step, so no agent
//! reacts to a neighbour's position from the same step. The crowd listens to
//! the graph's update events and skips steps while the graph is changing.

use crate::obstacle_avoidance::{AvoidanceSampling, ObstacleAvoidanceParams, ObstacleAvoidanceQuery};
use crate::proximity_grid::ProximityGrid;
use navgraph::{
    AgentType, GraphEvent, ListenerId, NavigationGraph, NodeRef, QueryFilter, SharedGraph,
};
use navgraph_common::{dist_2d, Error, Result, Vec3};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The maximum number of neighbours an agent takes into account when steering
pub const MAX_NEIGHBOURS: usize = 6;

/// How many path corners ahead the visibility optimisation looks
pub const MAX_CORNERS: usize = 4;

/// Wall segments fed to obstacle avoidance per agent
const MAX_OBSTACLE_SEGMENTS: usize = 16;

/// Default radius of an agent
const DEFAULT_AGENT_RADIUS: f32 = 0.6;

/// Default height of an agent
const DEFAULT_AGENT_HEIGHT: f32 = 2.0;

/// Default max acceleration of an agent
const DEFAULT_AGENT_MAX_ACCELERATION: f32 = 8.0;

/// Default max speed of an agent
const DEFAULT_AGENT_MAX_SPEED: f32 = 3.5;

/// Per-agent steering parameters
#[derive(Debug, Clone, PartialEq)]
pub struct AgentParams {
    pub radius: f32,
    pub height: f32,
    pub max_acceleration: f32,
    pub max_speed: f32,
    /// Neighbours and walls closer than this are considered when steering
    pub collision_query_range: f32,
    /// Furthest path corner the visibility optimisation may skip to
    pub path_optimization_range: f32,
    pub separation_weight: f32,
    /// Index into [`CrowdSettings::avoidance_params`]
    pub obstacle_avoidance_quality: u8,
    /// Index into [`CrowdSettings::filters`]
    pub query_filter_index: usize,
    pub user_data: Option<usize>,
}

impl Default for AgentParams {
    fn default() -> Self {
        Self::with_radius(DEFAULT_AGENT_RADIUS)
    }
}

impl AgentParams {
    /// Default parameters with query ranges scaled to `radius`
    pub fn with_radius(radius: f32) -> Self {
        Self {
            radius,
            height: DEFAULT_AGENT_HEIGHT,
            max_acceleration: DEFAULT_AGENT_MAX_ACCELERATION,
            max_speed: DEFAULT_AGENT_MAX_SPEED,
            collision_query_range: radius * 12.0,
            path_optimization_range: radius * 30.0,
            separation_weight: 2.0,
            obstacle_avoidance_quality: 3,
            query_filter_index: 0,
            user_data: None,
        }
    }
}

/// Crowd-wide configuration
#[derive(Debug, Clone)]
pub struct CrowdSettings {
    pub max_agents: usize,
    /// Agents with a larger radius are rejected
    pub max_agent_radius: f32,
    /// Layer of the graph every agent walks on
    pub agent_type: AgentType,
    /// Skip ahead to path corners in direct line of sight
    pub optimize_visibility: bool,
    /// Replan periodically to pick up graph changes
    pub optimize_topology: bool,
    /// Blend towards the next corner before reaching the current one
    pub anticipate_turns: bool,
    pub obstacle_avoidance: bool,
    pub separation: bool,
    pub collision_resolve_iterations: u32,
    pub collision_resolve_factor: f32,
    /// Seconds between replans when `optimize_topology` is set
    pub topology_optimization_time: f32,
    pub avoidance_params: [ObstacleAvoidanceParams; 4],
    pub filters: Vec<QueryFilter>,
}

impl Default for CrowdSettings {
    fn default() -> Self {
        Self {
            max_agents: 128,
            max_agent_radius: 1.0,
            agent_type: AgentType::default(),
            optimize_visibility: true,
            optimize_topology: true,
            anticipate_turns: true,
            obstacle_avoidance: true,
            separation: false,
            collision_resolve_iterations: 4,
            collision_resolve_factor: 0.7,
            topology_optimization_time: 0.5,
            avoidance_params: ObstacleAvoidanceParams::presets(),
            filters: vec![QueryFilter::default()],
        }
    }
}

impl CrowdSettings {
    pub fn new(agent_type: AgentType, max_agents: usize, max_agent_radius: f32) -> Self {
        Self {
            agent_type,
            max_agents,
            max_agent_radius,
            ..Self::default()
        }
    }

    pub fn with_separation(mut self, separation: bool) -> Self {
        self.separation = separation;
        self
    }

    pub fn with_obstacle_avoidance(mut self, obstacle_avoidance: bool) -> Self {
        self.obstacle_avoidance = obstacle_avoidance;
        self
    }

    /// Uses `sampling` for every avoidance quality level
    pub fn with_avoidance_sampling(mut self, sampling: AvoidanceSampling) -> Self {
        for params in &mut self.avoidance_params {
            params.sampling = sampling;
        }
        self
    }
}

/// Stable reference to an agent slot
///
/// A handle stops resolving once its agent is removed, even if the slot is
/// reused by a later agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgentHandle {
    index: usize,
    generation: u32,
}

impl AgentHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Active steering mode of an agent
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MoveRequest {
    #[default]
    None,
    Target { node: NodeRef, position: Vec3 },
    Velocity(Vec3),
}

/// Progress of the current move request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveRequestState {
    #[default]
    None,
    /// A path will be planned on the next update
    Requesting,
    Valid,
    /// No path to the target exists
    Failed,
    Velocity,
}

/// Whether the agent is on the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrowdAgentState {
    #[default]
    Invalid,
    Walking,
}

/// Agent in the crowd
#[derive(Debug, Clone)]
pub struct CrowdAgent {
    active: bool,
    generation: u32,
    state: CrowdAgentState,
    params: AgentParams,
    position: Vec3,
    velocity: Vec3,
    desired_velocity: Vec3,
    request: MoveRequest,
    request_state: MoveRequestState,
    /// Remaining path corners, the next one first
    corners: Vec<Vec3>,
    replan_time: f32,
}

impl CrowdAgent {
    fn empty() -> Self {
        Self {
            active: false,
            generation: 0,
            state: CrowdAgentState::Invalid,
            params: AgentParams::default(),
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            desired_velocity: Vec3::ZERO,
            request: MoveRequest::None,
            request_state: MoveRequestState::None,
            corners: Vec::new(),
            replan_time: 0.0,
        }
    }

    fn reset(&mut self, position: Vec3, params: AgentParams, state: CrowdAgentState) {
        let generation = self.generation;
        *self = Self::empty();
        self.generation = generation;
        self.active = true;
        self.position = position;
        self.params = params;
        self.state = state;
    }

    fn set_request(&mut self, request: MoveRequest, state: MoveRequestState) {
        self.request = request;
        self.request_state = state;
        self.corners.clear();
        self.replan_time = 0.0;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn state(&self) -> CrowdAgentState {
        self.state
    }

    pub fn params(&self) -> &AgentParams {
        &self.params
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn desired_velocity(&self) -> Vec3 {
        self.desired_velocity
    }

    pub fn request(&self) -> MoveRequest {
        self.request
    }

    pub fn request_state(&self) -> MoveRequestState {
        self.request_state
    }

    /// Path corners still ahead of the agent
    pub fn corners(&self) -> &[Vec3] {
        &self.corners
    }

    pub fn user_data(&self) -> Option<usize> {
        self.params.user_data
    }
}

/// Agent state captured at the start of a step
#[derive(Debug, Clone, Copy)]
struct Snapshot {
    index: usize,
    position: Vec3,
    velocity: Vec3,
    radius: f32,
    walking: bool,
}

/// Bounded pool of steering agents sharing one agent type
pub struct Crowd {
    graph: SharedGraph,
    settings: CrowdSettings,
    agents: Vec<CrowdAgent>,
    grid: ProximityGrid,
    avoidance: ObstacleAvoidanceQuery,
    paused: Arc<AtomicBool>,
    listener: ListenerId,
}

impl fmt::Debug for Crowd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crowd")
            .field("settings", &self.settings)
            .field("active_agents", &self.active_agent_count())
            .field("paused", &self.is_paused())
            .finish()
    }
}

impl Crowd {
    /// Creates a crowd on `graph` and subscribes to its update events
    pub fn new(graph: SharedGraph, settings: CrowdSettings) -> Result<Self> {
        if settings.max_agents == 0 {
            return Err(Error::InvalidInput(
                "crowd needs at least one agent slot".to_string(),
            ));
        }
        if settings.max_agent_radius.is_nan() || settings.max_agent_radius <= 0.0 {
            return Err(Error::InvalidInput(
                "max agent radius must be positive".to_string(),
            ));
        }

        let paused = Arc::new(AtomicBool::new(false));
        let listener = {
            let mut guard = graph
                .write()
                .map_err(|e| Error::LockPoisoned(e.to_string()))?;
            if !guard.agent_types().contains(&settings.agent_type) {
                return Err(Error::UnknownAgentType(settings.agent_type.name.clone()));
            }
            let flag = Arc::clone(&paused);
            guard.subscribe(Arc::new(move |event: GraphEvent| {
                flag.store(event == GraphEvent::Updating, Ordering::SeqCst);
            }))
        };

        let agents = (0..settings.max_agents).map(|_| CrowdAgent::empty()).collect();
        let grid = ProximityGrid::new((settings.max_agent_radius * 4.0).max(2.0));
        log::debug!(
            "Created crowd of {} agents for '{}'",
            settings.max_agents,
            settings.agent_type.name
        );

        Ok(Self {
            graph,
            settings,
            agents,
            grid,
            avoidance: ObstacleAvoidanceQuery::new(MAX_NEIGHBOURS, MAX_OBSTACLE_SEGMENTS),
            paused,
            listener,
        })
    }

    pub fn settings(&self) -> &CrowdSettings {
        &self.settings
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    /// True while the graph is applying an edit
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Adds an agent at the nearest walkable point to `position`
    ///
    /// Returns `None` when every slot is taken or the radius exceeds
    /// [`CrowdSettings::max_agent_radius`].
    pub fn add_agent(&mut self, position: Vec3, params: AgentParams) -> Option<AgentHandle> {
        if params.radius > self.settings.max_agent_radius {
            log::debug!(
                "Rejected agent with radius {} above the crowd limit {}",
                params.radius,
                self.settings.max_agent_radius
            );
            return None;
        }
        let index = self.agents.iter().position(|a| !a.active)?;

        let reach = params.radius.max(params.height * 0.5);
        let snapped = match self.graph.read() {
            Ok(graph) => match graph.is_walkable(&self.settings.agent_type, position, reach) {
                Ok((true, nearest)) => Some(nearest),
                Ok((false, _)) => None,
                Err(e) => {
                    log::debug!("Could not place agent on the graph: {}", e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Navigation graph lock poisoned: {}", e);
                None
            }
        };
        let (position, state) = match snapped {
            Some(nearest) => (nearest, CrowdAgentState::Walking),
            None => (position, CrowdAgentState::Invalid),
        };

        let agent = &mut self.agents[index];
        agent.reset(position, params, state);
        Some(AgentHandle {
            index,
            generation: agent.generation,
        })
    }

    /// Frees the agent's slot; other handles stay valid
    pub fn remove_agent(&mut self, handle: AgentHandle) -> bool {
        let Some(agent) = self.resolve_mut(handle) else {
            return false;
        };
        agent.active = false;
        agent.generation = agent.generation.wrapping_add(1);
        agent.set_request(MoveRequest::None, MoveRequestState::None);
        true
    }

    fn resolve_mut(&mut self, handle: AgentHandle) -> Option<&mut CrowdAgent> {
        self.agents
            .get_mut(handle.index)
            .filter(|a| a.active && a.generation == handle.generation)
    }

    pub fn agent(&self, handle: AgentHandle) -> Option<&CrowdAgent> {
        self.agents
            .get(handle.index)
            .filter(|a| a.active && a.generation == handle.generation)
    }

    /// Replaces the agent's parameters, keeping its position and request
    pub fn update_agent_params(&mut self, handle: AgentHandle, params: AgentParams) -> bool {
        if params.radius > self.settings.max_agent_radius {
            return false;
        }
        match self.resolve_mut(handle) {
            Some(agent) => {
                agent.params = params;
                true
            }
            None => false,
        }
    }

    /// Steers the agent towards `position`, replacing any velocity request
    pub fn request_move_target(&mut self, handle: AgentHandle, node: NodeRef, position: Vec3) -> bool {
        match self.resolve_mut(handle) {
            Some(agent) => {
                agent.set_request(
                    MoveRequest::Target { node, position },
                    MoveRequestState::Requesting,
                );
                true
            }
            None => false,
        }
    }

    /// Moves the agent at a fixed velocity, replacing any target request
    pub fn request_move_velocity(&mut self, handle: AgentHandle, velocity: Vec3) -> bool {
        match self.resolve_mut(handle) {
            Some(agent) => {
                agent.set_request(MoveRequest::Velocity(velocity), MoveRequestState::Velocity);
                true
            }
            None => false,
        }
    }

    pub fn reset_move_target(&mut self, handle: AgentHandle) -> bool {
        match self.resolve_mut(handle) {
            Some(agent) => {
                agent.set_request(MoveRequest::None, MoveRequestState::None);
                true
            }
            None => false,
        }
    }

    /// Every slot in the pool, active or not
    pub fn get_agents(&self) -> &[CrowdAgent] {
        &self.agents
    }

    pub fn get_active_agents(&self) -> Vec<(AgentHandle, &CrowdAgent)> {
        self.agents
            .iter()
            .enumerate()
            .filter(|(_, a)| a.active)
            .map(|(index, a)| {
                (
                    AgentHandle {
                        index,
                        generation: a.generation,
                    },
                    a,
                )
            })
            .collect()
    }

    pub fn active_agent_count(&self) -> usize {
        self.agents.iter().filter(|a| a.active).count()
    }

    pub fn filter(&self, index: usize) -> Option<&QueryFilter> {
        self.settings.filters.get(index)
    }

    pub fn filter_mut(&mut self, index: usize) -> Option<&mut QueryFilter> {
        self.settings.filters.get_mut(index)
    }

    /// Advances the simulation by `dt` seconds
    ///
    /// Each step re-localizes agents, plans and follows paths, avoids nearby
    /// agents and walls, applies separation, integrates velocity and finally
    /// pushes overlapping agents apart.
    pub fn update(&mut self, dt: f32) -> Result<()> {
        if self.is_paused() {
            log::debug!("Skipping crowd update while the graph is updating");
            return Ok(());
        }
        if dt.is_nan() || dt <= 0.0 {
            return Ok(());
        }

        let graph = Arc::clone(&self.graph);
        let graph = graph
            .read()
            .map_err(|e| Error::LockPoisoned(e.to_string()))?;
        let graph: &dyn NavigationGraph = &*graph;

        let active: Vec<usize> = (0..self.agents.len())
            .filter(|&i| self.agents[i].active)
            .collect();
        if active.is_empty() {
            return Ok(());
        }

        for &i in &active {
            self.relocalize(graph, i)?;
        }

        let snapshot: Vec<Snapshot> = active
            .iter()
            .map(|&index| {
                let a = &self.agents[index];
                Snapshot {
                    index,
                    position: a.position,
                    velocity: a.velocity,
                    radius: a.params.radius,
                    walking: a.state == CrowdAgentState::Walking,
                }
            })
            .collect();
        self.rebuild_grid(&snapshot);
        let neighbours: Vec<Vec<usize>> = snapshot
            .iter()
            .enumerate()
            .map(|(slot, s)| {
                self.find_neighbours(slot, s, &snapshot, self.agents[s.index].params.collision_query_range)
            })
            .collect();

        let default_filter = QueryFilter::default();
        let mut desired = Vec::with_capacity(snapshot.len());
        for s in &snapshot {
            desired.push(self.steer(graph, s.index, dt, &default_filter)?);
        }

        let mut velocities = Vec::with_capacity(snapshot.len());
        for (slot, s) in snapshot.iter().enumerate() {
            let v = if s.walking && self.settings.obstacle_avoidance {
                self.avoid(graph, slot, &snapshot, &neighbours[slot], &desired)?
            } else {
                desired[slot]
            };
            velocities.push(v);
        }

        if self.settings.separation {
            for (slot, s) in snapshot.iter().enumerate() {
                if s.walking {
                    velocities[slot] = self.separate(slot, &snapshot, &neighbours[slot], velocities[slot]);
                }
            }
        }

        let mut positions: Vec<Vec3> = Vec::with_capacity(snapshot.len());
        for (slot, s) in snapshot.iter().enumerate() {
            let agent = &mut self.agents[s.index];
            agent.desired_velocity = desired[slot];
            if !s.walking {
                agent.velocity = Vec3::ZERO;
                positions.push(s.position);
                continue;
            }
            let params = &agent.params;
            let dv = (velocities[slot] - agent.velocity).clamp_length_max(params.max_acceleration * dt);
            let mut velocity = (agent.velocity + dv).clamp_length_max(params.max_speed);
            if velocity.length_squared() < 1e-8 {
                velocity = Vec3::ZERO;
            }
            agent.velocity = velocity;
            positions.push(s.position + velocity * dt);
        }

        self.resolve_collisions(&snapshot, &neighbours, &desired, &mut positions);

        for (slot, s) in snapshot.iter().enumerate() {
            if !s.walking {
                continue;
            }
            let filter = filter_for(&self.settings.filters, self.agents[s.index].params.query_filter_index, &default_filter);
            let hit = graph.raycast(&self.settings.agent_type, s.position, positions[slot], filter)?;
            self.agents[s.index].position = hit.position;
        }
        Ok(())
    }

    /// Snaps the agent onto the graph or marks it invalid
    fn relocalize(&mut self, graph: &dyn NavigationGraph, index: usize) -> Result<()> {
        let agent_type = &self.settings.agent_type;
        let agent = &mut self.agents[index];
        let reach = agent.params.radius.max(agent.params.height * 0.5);
        match graph.is_walkable(agent_type, agent.position, reach)? {
            (true, nearest) => {
                agent.position = nearest;
                agent.state = CrowdAgentState::Walking;
            }
            (false, _) => {
                if agent.state == CrowdAgentState::Walking {
                    log::debug!("Agent {} lost the graph at {:?}", index, agent.position);
                }
                agent.state = CrowdAgentState::Invalid;
                agent.velocity = Vec3::ZERO;
            }
        }
        Ok(())
    }

    fn rebuild_grid(&mut self, snapshot: &[Snapshot]) {
        self.grid.clear();
        for s in snapshot {
            self.grid.insert(s.index, s.position, s.radius);
        }
    }

    /// Closest snapshot slots within `range`, nearest first
    fn find_neighbours(&self, slot: usize, s: &Snapshot, snapshot: &[Snapshot], range: f32) -> Vec<usize> {
        let mut found: Vec<(f32, usize)> = self
            .grid
            .query(s.position, range)
            .into_iter()
            .filter(|&id| id != s.index)
            .filter_map(|id| {
                let other = snapshot.iter().position(|o| o.index == id)?;
                let o = &snapshot[other];
                // Ignore agents on another floor
                if (o.position.y - s.position.y).abs() >= self.agents[s.index].params.height {
                    return None;
                }
                Some((dist_2d(s.position, o.position), other))
            })
            .filter(|&(_, other)| other != slot)
            .collect();
        found.sort_by(|a, b| a.0.total_cmp(&b.0));
        found.truncate(MAX_NEIGHBOURS);
        found.into_iter().map(|(_, other)| other).collect()
    }

    /// Plans if needed and returns the path-following velocity
    fn steer(
        &mut self,
        graph: &dyn NavigationGraph,
        index: usize,
        dt: f32,
        default_filter: &QueryFilter,
    ) -> Result<Vec3> {
        let agent_type = &self.settings.agent_type;
        let filter = filter_for(
            &self.settings.filters,
            self.agents[index].params.query_filter_index,
            default_filter,
        );
        let agent = &mut self.agents[index];
        if agent.state != CrowdAgentState::Walking {
            return Ok(Vec3::ZERO);
        }

        let target = match agent.request {
            MoveRequest::None => return Ok(Vec3::ZERO),
            MoveRequest::Velocity(v) => {
                return Ok(Vec3::new(v.x, 0.0, v.z).clamp_length_max(agent.params.max_speed))
            }
            MoveRequest::Target { position, .. } => position,
        };

        agent.replan_time += dt;
        let replan = agent.request_state == MoveRequestState::Requesting
            || (self.settings.optimize_topology
                && agent.request_state == MoveRequestState::Valid
                && agent.replan_time >= self.settings.topology_optimization_time);
        if replan {
            agent.replan_time = 0.0;
            let path = graph.find_path_with_filter(agent_type, agent.position, target, filter)?;
            if path.len() <= 1 {
                log::debug!("Agent {} has no path to {:?}", index, target);
                agent.request_state = MoveRequestState::Failed;
                agent.corners.clear();
            } else {
                agent.request_state = MoveRequestState::Valid;
                agent.corners = path[1..].to_vec();
            }
        }
        if agent.request_state != MoveRequestState::Valid {
            return Ok(Vec3::ZERO);
        }

        let params = &agent.params;
        let reached = (params.radius * 0.5).max(0.05);
        while agent.corners.len() > 1 && dist_2d(agent.position, agent.corners[0]) <= reached {
            agent.corners.remove(0);
        }

        if self.settings.optimize_visibility && agent.corners.len() > 1 {
            let lookahead = agent.corners.len().min(MAX_CORNERS);
            for k in (1..lookahead).rev() {
                if dist_2d(agent.position, agent.corners[k]) > params.path_optimization_range {
                    continue;
                }
                let hit = graph.raycast(agent_type, agent.position, agent.corners[k], filter)?;
                if !hit.blocked {
                    agent.corners.drain(..k);
                    break;
                }
            }
        }

        let Some(&corner) = agent.corners.first() else {
            return Ok(Vec3::ZERO);
        };
        let to_corner = flat(corner - agent.position);
        let mut direction = to_corner;
        if self.settings.anticipate_turns && agent.corners.len() > 1 {
            let to_next = flat(agent.corners[1] - agent.position).normalize_or_zero();
            direction = to_corner - to_next * to_corner.length() * 0.5;
        }

        // Slow down on the final approach
        let remaining: f32 = to_corner.length()
            + agent
                .corners
                .windows(2)
                .map(|w| dist_2d(w[0], w[1]))
                .sum::<f32>();
        if remaining < 0.01 {
            return Ok(Vec3::ZERO);
        }
        let slow_down_radius = params.radius * 2.0;
        let speed = params.max_speed * (remaining / slow_down_radius).min(1.0);
        Ok(direction.normalize_or_zero() * speed)
    }

    fn avoid(
        &mut self,
        graph: &dyn NavigationGraph,
        slot: usize,
        snapshot: &[Snapshot],
        neighbours: &[usize],
        desired: &[Vec3],
    ) -> Result<Vec3> {
        let s = snapshot[slot];
        let agent = &self.agents[s.index];
        let params = agent.params.clone();

        self.avoidance.reset();
        for &other in neighbours {
            let o = &snapshot[other];
            self.avoidance
                .add_circle(o.position, o.radius, o.velocity, desired[other]);
        }
        for wall in graph.local_boundary(&self.settings.agent_type, s.position, params.collision_query_range)? {
            self.avoidance.add_segment(wall.start, wall.end);
        }

        let quality = (params.obstacle_avoidance_quality as usize).min(self.settings.avoidance_params.len() - 1);
        let preset = self.settings.avoidance_params[quality];
        let (velocity, _) = self.avoidance.sample_velocity(
            s.position,
            params.radius,
            params.max_speed,
            s.velocity,
            desired[slot],
            &preset,
        );
        Ok(velocity)
    }

    fn separate(&self, slot: usize, snapshot: &[Snapshot], neighbours: &[usize], velocity: Vec3) -> Vec3 {
        let s = &snapshot[slot];
        let params = &self.agents[s.index].params;
        if params.separation_weight <= 0.0 {
            return velocity;
        }
        let range = params.collision_query_range;
        let inv_range = 1.0 / range;

        let mut displacement = Vec3::ZERO;
        let mut count = 0.0;
        for &other in neighbours {
            let diff = flat(s.position - snapshot[other].position);
            let dist_sqr = diff.length_squared();
            if dist_sqr < 0.00001 || dist_sqr > range * range {
                continue;
            }
            let dist = dist_sqr.sqrt();
            let weight = params.separation_weight * (1.0 - (dist * inv_range).powi(2));
            displacement += diff * (weight / dist);
            count += 1.0;
        }
        if count == 0.0 {
            return velocity;
        }
        (velocity + displacement / count).clamp_length_max(params.max_speed)
    }

    /// Pushes overlapping agents apart over a few relaxation passes
    fn resolve_collisions(
        &self,
        snapshot: &[Snapshot],
        neighbours: &[Vec<usize>],
        desired: &[Vec3],
        positions: &mut [Vec3],
    ) {
        let factor = self.settings.collision_resolve_factor;
        for _ in 0..self.settings.collision_resolve_iterations {
            let mut displacement = vec![Vec3::ZERO; positions.len()];
            for (slot, s) in snapshot.iter().enumerate() {
                if !s.walking {
                    continue;
                }
                let mut weight = 0.0;
                for &other in &neighbours[slot] {
                    let o = &snapshot[other];
                    let mut diff = flat(positions[slot] - positions[other]);
                    let reach = s.radius + o.radius;
                    let dist_sqr = diff.length_squared();
                    if dist_sqr > reach * reach {
                        continue;
                    }
                    let dist = dist_sqr.sqrt();
                    let push = if dist < 0.0001 {
                        // Coincident agents separate sideways to their heading
                        let d = desired[slot];
                        diff = if s.index > o.index {
                            Vec3::new(-d.z, 0.0, d.x)
                        } else {
                            Vec3::new(d.z, 0.0, -d.x)
                        };
                        if diff.length_squared() < 1e-8 {
                            diff = if s.index > o.index { Vec3::X } else { -Vec3::X };
                        }
                        0.01
                    } else {
                        (1.0 / dist) * ((reach - dist) * 0.5) * factor
                    };
                    displacement[slot] += diff * push;
                    weight += 1.0;
                }
                if weight > 0.0 {
                    displacement[slot] /= weight;
                }
            }
            for (p, d) in positions.iter_mut().zip(&displacement) {
                *p += *d;
            }
        }
    }
}

impl Drop for Crowd {
    fn drop(&mut self) {
        if let Ok(mut graph) = self.graph.write() {
            graph.unsubscribe(self.listener);
        }
    }
}

fn flat(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z)
}

fn filter_for<'a>(filters: &'a [QueryFilter], index: usize, fallback: &'a QueryFilter) -> &'a QueryFilter {
    filters.get(index).or_else(|| filters.first()).unwrap_or(fallback)
}
