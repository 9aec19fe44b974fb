use crate::AreaType;
use navgraph_common::BoundingBox;
use serde::{Deserialize, Serialize};

/// Parameters controlling how a navigation graph is built
///
/// Settings take part in the content hash, so changing any of them
/// invalidates previously saved graphs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSettings {
    /// Horizontal size of a grid cell
    pub cell_size: f32,
    /// Steepest walkable slope, in degrees
    pub walkable_slope_angle: f32,
    /// Largest height step an agent can climb between adjacent cells
    pub walkable_climb: f32,
    /// Distance kept between agents and walls or obstacles
    pub agent_radius: f32,
    /// Cells per tile edge; tiles are the unit of incremental rebuilds
    pub tile_size: u32,
    /// Explicit build bounds; derived from the geometry when `None`
    pub bounds: Option<BoundingBox>,
    /// Area assigned to walkable surfaces no registered area covers
    pub default_area: AreaType,
}

impl GraphSettings {
    pub fn new(cell_size: f32, tile_size: u32) -> Self {
        GraphSettings {
            cell_size,
            walkable_slope_angle: 45.0,
            walkable_climb: 0.9,
            agent_radius: 0.5,
            tile_size,
            bounds: None,
            default_area: AreaType::WALKABLE,
        }
    }

    pub fn with_walkable_slope_angle(mut self, degrees: f32) -> Self {
        self.walkable_slope_angle = degrees;
        self
    }

    pub fn with_walkable_climb(mut self, climb: f32) -> Self {
        self.walkable_climb = climb;
        self
    }

    pub fn with_agent_radius(mut self, radius: f32) -> Self {
        self.agent_radius = radius;
        self
    }

    pub fn with_bounds(mut self, bounds: BoundingBox) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_default_area(mut self, area: AreaType) -> Self {
        self.default_area = area;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.cell_size > 0.0) {
            return Err("Cell size must be positive".to_string());
        }
        if self.tile_size == 0 {
            return Err("Tile size must be positive".to_string());
        }
        if self.agent_radius < 0.0 {
            return Err("Agent radius cannot be negative".to_string());
        }
        if self.walkable_climb < 0.0 {
            return Err("Walkable climb cannot be negative".to_string());
        }
        if !(self.walkable_slope_angle > 0.0 && self.walkable_slope_angle <= 90.0) {
            return Err("Walkable slope angle must be in (0, 90] degrees".to_string());
        }
        if let Some(bounds) = &self.bounds {
            if bounds.min.x >= bounds.max.x || bounds.min.z >= bounds.max.z {
                return Err("Bounds invalid: min must be less than max".to_string());
            }
        }
        Ok(())
    }
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self::new(0.3, 32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navgraph_common::Vec3;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = GraphSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.cell_size, 0.3);
        assert_eq!(settings.tile_size, 32);
        assert_eq!(settings.default_area, AreaType::WALKABLE);
    }

    #[test]
    fn test_validation_failures() {
        assert!(GraphSettings::new(0.0, 32).validate().is_err());
        assert!(GraphSettings::new(0.3, 0).validate().is_err());
        assert!(GraphSettings::default()
            .with_agent_radius(-1.0)
            .validate()
            .is_err());
        assert!(GraphSettings::default()
            .with_walkable_slope_angle(120.0)
            .validate()
            .is_err());
        assert!(GraphSettings::default()
            .with_bounds(BoundingBox::new(Vec3::ONE, Vec3::ONE))
            .validate()
            .is_err());
    }
}
