//! Lightweight agent groups with flocking-only steering
//!
//! Groups are cheaper than a [`Crowd`](crate::Crowd): agents follow their own
//! path and blend in separation, cohesion and alignment with nearby members
//! of the same group. There is no velocity sampling and no collision pass.

use crate::proximity_grid::ProximityGrid;
use navgraph::{AgentType, NavigationGraph, QueryFilter};
use navgraph_common::{dist_2d, Result, Vec3};
use std::collections::BTreeMap;

/// Identifier of a group inside a [`GroupManager`]
pub type GroupId = usize;

/// Identifier of an agent inside a [`Group`]
pub type GroupAgentId = usize;

/// Steering parameters of a group agent
#[derive(Debug, Clone, PartialEq)]
pub struct GroupAgentSettings {
    pub radius: f32,
    pub max_speed: f32,
    pub max_acceleration: f32,
    /// Members closer than this push each other apart
    pub separation_distance: f32,
    pub separation_weight: f32,
    /// Members within this range take part in cohesion and alignment
    pub neighbour_radius: f32,
    pub cohesion_weight: f32,
    pub alignment_weight: f32,
    /// A waypoint counts as reached within this distance
    pub arrival_distance: f32,
    /// Index into the group's query filters
    pub query_filter_index: usize,
}

impl Default for GroupAgentSettings {
    fn default() -> Self {
        Self {
            radius: 0.5,
            max_speed: 3.5,
            max_acceleration: 8.0,
            separation_distance: 2.0,
            separation_weight: 2.0,
            neighbour_radius: 4.0,
            cohesion_weight: 0.3,
            alignment_weight: 0.3,
            arrival_distance: 0.5,
            query_filter_index: 0,
        }
    }
}

/// Agent managed by a [`Group`]
#[derive(Debug, Clone)]
pub struct GroupAgent {
    id: GroupAgentId,
    position: Vec3,
    velocity: Vec3,
    settings: GroupAgentSettings,
    target: Option<Vec3>,
    waypoints: Vec<Vec3>,
    needs_path: bool,
}

impl GroupAgent {
    pub fn id(&self) -> GroupAgentId {
        self.id
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn settings(&self) -> &GroupAgentSettings {
        &self.settings
    }

    /// Current move target, cleared on arrival or when no path exists
    pub fn target(&self) -> Option<Vec3> {
        self.target
    }

    pub fn waypoints(&self) -> &[Vec3] {
        &self.waypoints
    }

    pub fn is_moving(&self) -> bool {
        self.target.is_some()
    }
}

/// A set of agents sharing an agent type and steering together
#[derive(Debug)]
pub struct Group {
    agent_type: AgentType,
    agents: BTreeMap<GroupAgentId, GroupAgent>,
    next_agent_id: GroupAgentId,
    filters: Vec<QueryFilter>,
    grid: ProximityGrid,
}

impl Group {
    pub fn new(agent_type: AgentType) -> Self {
        Self {
            agent_type,
            agents: BTreeMap::new(),
            next_agent_id: 1,
            filters: vec![QueryFilter::default()],
            grid: ProximityGrid::default(),
        }
    }

    pub fn agent_type(&self) -> &AgentType {
        &self.agent_type
    }

    pub fn add_agent(&mut self, position: Vec3, settings: GroupAgentSettings) -> GroupAgentId {
        let id = self.next_agent_id;
        self.next_agent_id += 1;
        self.agents.insert(
            id,
            GroupAgent {
                id,
                position,
                velocity: Vec3::ZERO,
                settings,
                target: None,
                waypoints: Vec::new(),
                needs_path: false,
            },
        );
        id
    }

    pub fn remove_agent(&mut self, id: GroupAgentId) -> bool {
        self.agents.remove(&id).is_some()
    }

    pub fn agent(&self, id: GroupAgentId) -> Option<&GroupAgent> {
        self.agents.get(&id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &GroupAgent> {
        self.agents.values()
    }

    pub fn agent_ids(&self) -> Vec<GroupAgentId> {
        self.agents.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn position(&self, id: GroupAgentId) -> Option<Vec3> {
        self.agents.get(&id).map(|a| a.position)
    }

    /// Teleports an agent; a moving agent replans from its new position
    pub fn set_position(&mut self, id: GroupAgentId, position: Vec3) -> bool {
        let Some(agent) = self.agents.get_mut(&id) else {
            return false;
        };
        agent.position = position;
        agent.velocity = Vec3::ZERO;
        agent.waypoints.clear();
        agent.needs_path = agent.target.is_some();
        true
    }

    pub fn update_agent_settings(&mut self, id: GroupAgentId, settings: GroupAgentSettings) -> bool {
        match self.agents.get_mut(&id) {
            Some(agent) => {
                agent.settings = settings;
                true
            }
            None => false,
        }
    }

    /// Applies `settings` to every agent in the group
    pub fn update_settings(&mut self, settings: &GroupAgentSettings) {
        for agent in self.agents.values_mut() {
            agent.settings = settings.clone();
        }
    }

    pub fn filter(&self, index: usize) -> Option<&QueryFilter> {
        self.filters.get(index)
    }

    /// Stores `filter` at `index`, filling any gap with default filters
    pub fn set_filter(&mut self, index: usize, filter: QueryFilter) {
        if index >= self.filters.len() {
            self.filters.resize_with(index + 1, QueryFilter::default);
        }
        self.filters[index] = filter;
    }

    pub fn request_move(&mut self, id: GroupAgentId, target: Vec3) -> bool {
        match self.agents.get_mut(&id) {
            Some(agent) => {
                agent.target = Some(target);
                agent.waypoints.clear();
                agent.needs_path = true;
                true
            }
            None => false,
        }
    }

    pub fn request_move_all(&mut self, target: Vec3) {
        for agent in self.agents.values_mut() {
            agent.target = Some(target);
            agent.waypoints.clear();
            agent.needs_path = true;
        }
    }

    /// Stops an agent where it stands
    pub fn stop(&mut self, id: GroupAgentId) -> bool {
        match self.agents.get_mut(&id) {
            Some(agent) => {
                agent.target = None;
                agent.waypoints.clear();
                agent.needs_path = false;
                true
            }
            None => false,
        }
    }

    /// Advances every agent by `dt` seconds
    pub fn update(&mut self, graph: &dyn NavigationGraph, dt: f32) -> Result<()> {
        if dt.is_nan() || dt <= 0.0 || self.agents.is_empty() {
            return Ok(());
        }

        // Steering reads the positions from before this step
        let snapshot: Vec<(GroupAgentId, Vec3, Vec3, bool)> = self
            .agents
            .values()
            .map(|a| (a.id, a.position, a.velocity, a.target.is_some()))
            .collect();
        self.grid.clear();
        for (id, position, _, _) in &snapshot {
            let radius = self.agents.get(id).map_or(0.0, |a| a.settings.radius);
            self.grid.insert(*id, *position, radius);
        }

        let default_filter = QueryFilter::default();
        let mut moves = Vec::with_capacity(snapshot.len());
        for &(id, position, velocity, _) in &snapshot {
            let Some(agent) = self.agents.get_mut(&id) else {
                continue;
            };
            let filter = self
                .filters
                .get(agent.settings.query_filter_index)
                .unwrap_or(&default_filter);

            if agent.needs_path {
                agent.needs_path = false;
                if let Some(target) = agent.target {
                    let path =
                        graph.find_path_with_filter(&self.agent_type, position, target, filter)?;
                    if path.len() <= 1 {
                        log::debug!("Group agent {} has no path to {:?}", id, target);
                        agent.target = None;
                        agent.waypoints.clear();
                    } else {
                        agent.waypoints = path[1..].to_vec();
                    }
                }
            }

            let seek = seek_waypoints(agent, position);
            let flock = flock(&self.grid, &snapshot, &agent.settings, id, position);
            let settings = &agent.settings;
            let desired = (seek + flock).clamp_length_max(settings.max_speed);
            let dv = (desired - velocity).clamp_length_max(settings.max_acceleration * dt);
            let mut new_velocity = (velocity + dv).clamp_length_max(settings.max_speed);
            if new_velocity.length_squared() < 1e-6 && agent.target.is_none() {
                new_velocity = Vec3::ZERO;
            }
            moves.push((id, new_velocity));
        }

        for (id, velocity) in moves {
            let Some(agent) = self.agents.get_mut(&id) else {
                continue;
            };
            let filter = self
                .filters
                .get(agent.settings.query_filter_index)
                .unwrap_or(&default_filter);
            let from = agent.position;
            let hit = graph.raycast(&self.agent_type, from, from + velocity * dt, filter)?;
            agent.position = hit.position;
            agent.velocity = if hit.blocked { Vec3::ZERO } else { velocity };
        }
        Ok(())
    }
}

/// Desired velocity towards the next waypoint, slowing down for the last one
fn seek_waypoints(agent: &mut GroupAgent, position: Vec3) -> Vec3 {
    let settings = &agent.settings;
    while let Some(&next) = agent.waypoints.first() {
        if dist_2d(position, next) > settings.arrival_distance {
            break;
        }
        agent.waypoints.remove(0);
    }
    let Some(&next) = agent.waypoints.first() else {
        if agent.target.take().is_some() {
            log::debug!("Group agent {} arrived", agent.id);
        }
        return Vec3::ZERO;
    };

    let to_next = Vec3::new(next.x - position.x, 0.0, next.z - position.z);
    let distance = to_next.length();
    let mut speed = settings.max_speed;
    if agent.waypoints.len() == 1 {
        let slow_down = (settings.radius * 4.0).max(settings.arrival_distance);
        speed *= (distance / slow_down).min(1.0);
    }
    to_next.normalize_or_zero() * speed
}

/// Separation from every close member, plus cohesion and alignment with
/// members that are also moving
fn flock(
    grid: &ProximityGrid,
    snapshot: &[(GroupAgentId, Vec3, Vec3, bool)],
    settings: &GroupAgentSettings,
    id: GroupAgentId,
    position: Vec3,
) -> Vec3 {
    let range = settings.neighbour_radius.max(settings.separation_distance);
    let mut separation = Vec3::ZERO;
    let mut centre = Vec3::ZERO;
    let mut heading = Vec3::ZERO;
    let mut flockmates = 0.0;
    let moving = snapshot.iter().any(|s| s.0 == id && s.3);

    for neighbour in grid.query(position, range) {
        if neighbour == id {
            continue;
        }
        let Some(&(_, other, other_velocity, other_moving)) =
            snapshot.iter().find(|s| s.0 == neighbour)
        else {
            continue;
        };
        let diff = Vec3::new(position.x - other.x, 0.0, position.z - other.z);
        let dist = diff.length();
        if dist > 1e-4 && dist < settings.separation_distance {
            let falloff = 1.0 - dist / settings.separation_distance;
            separation += diff / dist * falloff;
        }
        if moving && other_moving && dist < settings.neighbour_radius {
            centre += other;
            heading += other_velocity;
            flockmates += 1.0;
        }
    }

    let mut steering = separation * settings.separation_weight * settings.max_speed;
    if flockmates > 0.0 {
        let to_centre = centre / flockmates - position;
        steering += Vec3::new(to_centre.x, 0.0, to_centre.z) * settings.cohesion_weight;
        steering += (heading / flockmates) * settings.alignment_weight;
    }
    steering
}

/// Owns every group and updates them together
#[derive(Debug, Default)]
pub struct GroupManager {
    groups: BTreeMap<GroupId, Group>,
    next_id: GroupId,
}

impl GroupManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_group(&mut self, agent_type: AgentType) -> GroupId {
        self.next_id += 1;
        let id = self.next_id;
        self.groups.insert(id, Group::new(agent_type));
        id
    }

    pub fn remove_group(&mut self, id: GroupId) -> Option<Group> {
        self.groups.remove(&id)
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    pub fn group_mut(&mut self, id: GroupId) -> Option<&mut Group> {
        self.groups.get_mut(&id)
    }

    pub fn group_ids(&self) -> Vec<GroupId> {
        self.groups.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Updates every registered group in id order
    pub fn update(&mut self, graph: &dyn NavigationGraph, dt: f32) -> Result<()> {
        for group in self.groups.values_mut() {
            group.update(graph, dt)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navgraph::{GeometryInput, GraphSettings, GridGraph, TriMesh};

    fn plane_graph() -> GridGraph {
        GeometryInput::from_mesh(TriMesh::flat_plane(20.0, 0.0))
            .create_graph(&GraphSettings::default(), &[AgentType::default()], None)
            .unwrap()
    }

    #[test]
    fn test_group_manager_ids() {
        let mut manager = GroupManager::new();
        let a = manager.create_group(AgentType::default());
        let b = manager.create_group(AgentType::default());
        assert_ne!(a, b);
        assert_eq!(manager.group_ids(), vec![a, b]);

        assert!(manager.remove_group(a).is_some());
        assert!(manager.group(a).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_positions_and_settings() {
        let mut group = Group::new(AgentType::default());
        let a = group.add_agent(Vec3::ZERO, GroupAgentSettings::default());
        let b = group.add_agent(Vec3::new(1.0, 0.0, 0.0), GroupAgentSettings::default());

        assert!(group.set_position(a, Vec3::new(2.0, 0.0, 2.0)));
        assert_eq!(group.position(a), Some(Vec3::new(2.0, 0.0, 2.0)));
        assert!(!group.set_position(99, Vec3::ZERO));

        let fast = GroupAgentSettings {
            max_speed: 6.0,
            ..Default::default()
        };
        assert!(group.update_agent_settings(b, fast.clone()));
        assert_eq!(group.agent(b).unwrap().settings().max_speed, 6.0);
        assert_eq!(group.agent(a).unwrap().settings().max_speed, 3.5);

        group.update_settings(&fast);
        assert_eq!(group.agent(a).unwrap().settings().max_speed, 6.0);
    }

    #[test]
    fn test_filter_slots_grow() {
        let mut group = Group::new(AgentType::default());
        let mut filter = QueryFilter::default();
        filter.set_area_cost(4, 3.0);
        group.set_filter(2, filter);

        assert_eq!(group.filter(1).unwrap().get_area_cost(4), 1.0);
        assert_eq!(group.filter(2).unwrap().get_area_cost(4), 3.0);
        assert!(group.filter(3).is_none());
    }

    #[test]
    fn test_group_moves_to_target() -> Result<()> {
        let graph = plane_graph();
        let mut manager = GroupManager::new();
        let id = manager.create_group(AgentType::default());
        let group = manager.group_mut(id).unwrap();
        for z in [-1.5, 0.0, 1.5] {
            group.add_agent(Vec3::new(-6.0, 0.0, z), GroupAgentSettings::default());
        }
        group.request_move_all(Vec3::new(6.0, 0.0, 0.0));

        for _ in 0..100 {
            manager.update(&graph, 0.1)?;
        }

        let group = manager.group(id).unwrap();
        for agent in group.agents() {
            assert!(agent.position().x > 3.0, "agent at {:?}", agent.position());
            assert!(agent.position().x.abs() < 9.5);
        }
        let positions: Vec<Vec3> = group.agents().map(|a| a.position()).collect();
        for i in 0..positions.len() {
            for j in i + 1..positions.len() {
                assert!(dist_2d(positions[i], positions[j]) > 0.5);
            }
        }
        Ok(())
    }

    #[test]
    fn test_request_move_single_agent() -> Result<()> {
        let graph = plane_graph();
        let mut group = Group::new(AgentType::default());
        let mover = group.add_agent(Vec3::new(-5.0, 0.0, -5.0), GroupAgentSettings::default());
        let idle = group.add_agent(Vec3::new(5.0, 0.0, 5.0), GroupAgentSettings::default());
        assert!(group.request_move(mover, Vec3::new(-5.0, 0.0, 3.0)));
        assert!(!group.request_move(42, Vec3::ZERO));

        for _ in 0..60 {
            group.update(&graph, 0.1)?;
        }
        let position = group.position(mover).unwrap();
        assert!(dist_2d(position, Vec3::new(-5.0, 0.0, 3.0)) < 1.0);
        assert!(!group.agent(mover).unwrap().is_moving());
        assert_eq!(group.position(idle), Some(Vec3::new(5.0, 0.0, 5.0)));
        Ok(())
    }

    #[test]
    fn test_stop_cancels_move() -> Result<()> {
        let graph = plane_graph();
        let mut group = Group::new(AgentType::default());
        let id = group.add_agent(Vec3::ZERO, GroupAgentSettings::default());
        assert_eq!(group.agent_ids(), vec![id]);

        group.request_move(id, Vec3::new(8.0, 0.0, 0.0));
        group.update(&graph, 0.1)?;
        assert!(group.agent(id).unwrap().is_moving());

        assert!(group.stop(id));
        assert!(!group.stop(id + 1));
        assert!(!group.agent(id).unwrap().is_moving());
        Ok(())
    }

    #[test]
    fn test_unreachable_target_clears_request() -> Result<()> {
        let graph = plane_graph();
        let mut group = Group::new(AgentType::default());
        let id = group.add_agent(Vec3::ZERO, GroupAgentSettings::default());
        group.request_move(id, Vec3::new(50.0, 0.0, 50.0));

        group.update(&graph, 0.1)?;
        assert!(group.agent(id).unwrap().target().is_none());
        Ok(())
    }
}
