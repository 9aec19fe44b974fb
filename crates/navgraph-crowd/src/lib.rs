//! Multi-agent steering on navigation graphs
//!
//! [`Crowd`] runs a fixed pool of agents over a [`SharedGraph`]: each update
//! re-localizes agents, follows their paths, samples collision-free
//! velocities around neighbours and walls, and resolves overlaps.
//! [`GroupManager`] is a cheaper alternative where agents follow paths with
//! flocking only.
//!
//! # Example
//!
//! ```rust,ignore
//! use navgraph::{shared, AgentType};
//! use navgraph_crowd::{AgentParams, Crowd, CrowdSettings};
//!
//! let graph = shared(input.create_graph(&settings, &[AgentType::default()], None)?);
//! let mut crowd = Crowd::new(graph, CrowdSettings::default())?;
//!
//! let agent = crowd.add_agent(start, AgentParams::default()).expect("free slot");
//! crowd.request_move_target(agent, 0, goal);
//! crowd.update(1.0 / 30.0)?;
//! ```
//!
//! [`SharedGraph`]: navgraph::SharedGraph

mod crowd;
mod group;
pub mod obstacle_avoidance;
pub mod proximity_grid;


pub use crowd::{
    AgentHandle, AgentParams, Crowd, CrowdAgent, CrowdAgentState, CrowdSettings, MoveRequest,
    MoveRequestState, MAX_CORNERS, MAX_NEIGHBOURS,
};
pub use group::{Group, GroupAgent, GroupAgentId, GroupAgentSettings, GroupId, GroupManager};
pub use obstacle_avoidance::{AvoidanceSampling, ObstacleAvoidanceParams, ObstacleAvoidanceQuery};
pub use proximity_grid::ProximityGrid;
