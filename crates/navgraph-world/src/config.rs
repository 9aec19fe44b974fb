use navgraph::{AgentType, GraphSettings};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct WorldSettings {
    pub graph: GraphSettings,
    pub agent_types: Vec<AgentType>,
    /// Saved graphs are loaded from and written to this file when set
    pub cache_path: Option<PathBuf>,
    /// How far a walk target may be from walkable ground and still count
    pub walk_threshold: f32,
}

impl WorldSettings {
    pub fn new(graph: GraphSettings, agent_types: Vec<AgentType>) -> Self {
        WorldSettings {
            graph,
            agent_types,
            cache_path: None,
            walk_threshold: 0.5,
        }
    }

    pub fn with_cache_path(mut self, cache_path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(cache_path.into());
        self
    }

    pub fn with_walk_threshold(mut self, walk_threshold: f32) -> Self {
        self.walk_threshold = walk_threshold;
        self
    }

    pub fn with_agent_type(mut self, agent_type: AgentType) -> Self {
        self.agent_types.push(agent_type);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        self.graph.validate()?;
        if self.agent_types.is_empty() {
            return Err("At least one agent type is required".to_string());
        }
        if self.walk_threshold < 0.0 {
            return Err("Walk threshold cannot be negative".to_string());
        }
        Ok(())
    }
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self::new(GraphSettings::default(), vec![AgentType::default()])
    }
}
