//! Temporary obstacles carved out of a navigation graph
//!
//! Obstacles are staged when added or removed and only affect passability
//! once the owning graph commits them in a batch.

use navgraph_common::{dist_sqr_2d, rotate_y, sqr, BoundingBox, Vec3};
use serde::{Deserialize, Serialize};

/// Handle referring to an obstacle owned by a graph
pub type ObstacleId = u32;

/// Obstacle volume
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ObstacleShape {
    /// Upright cylinder standing on `center`
    Cylinder {
        center: Vec3,
        radius: f32,
        height: f32,
    },
    /// Axis-aligned box
    Box { bounds: BoundingBox },
    /// Box rotated around the Y axis
    OrientedBox {
        center: Vec3,
        half_extents: Vec3,
        y_rotation: f32,
    },
}

impl ObstacleShape {
    /// Axis-aligned bounds of the obstacle
    pub fn bounds(&self) -> BoundingBox {
        match *self {
            ObstacleShape::Cylinder {
                center,
                radius,
                height,
            } => BoundingBox::new(
                Vec3::new(center.x - radius, center.y, center.z - radius),
                Vec3::new(center.x + radius, center.y + height, center.z + radius),
            ),
            ObstacleShape::Box { bounds } => bounds,
            ObstacleShape::OrientedBox {
                center,
                half_extents,
                y_rotation,
            } => {
                let (s, c) = y_rotation.sin_cos();
                let ext_x = (c * half_extents.x).abs() + (s * half_extents.z).abs();
                let ext_z = (s * half_extents.x).abs() + (c * half_extents.z).abs();
                BoundingBox::from_center_extents(center, Vec3::new(ext_x, half_extents.y, ext_z))
            }
        }
    }

    /// Returns true if the footprint covers `p` and the vertical range
    /// `[y_min, y_max]` overlaps the obstacle
    pub fn blocks(&self, p: Vec3, y_min: f32, y_max: f32) -> bool {
        let bounds = self.bounds();
        if y_max < bounds.min.y || y_min > bounds.max.y {
            return false;
        }

        match *self {
            ObstacleShape::Cylinder { center, radius, .. } => {
                dist_sqr_2d(p, center) <= sqr(radius)
            }
            ObstacleShape::Box { bounds } => bounds.contains_point_2d(p),
            ObstacleShape::OrientedBox {
                center,
                half_extents,
                y_rotation,
            } => {
                let local = rotate_y(p - center, -y_rotation);
                local.x.abs() <= half_extents.x && local.z.abs() <= half_extents.z
            }
        }
    }
}

/// Commit state of an obstacle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObstacleState {
    /// Added, waiting for the next commit
    Processing,
    /// Committed and carving the graph
    Processed,
    /// Removal staged, still carving until the next commit
    Removing,
}

/// An obstacle and its commit state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub id: ObstacleId,
    pub shape: ObstacleShape,
    pub state: ObstacleState,
}

impl Obstacle {
    /// Returns true if the obstacle currently affects passability
    pub fn is_committed(&self) -> bool {
        matches!(
            self.state,
            ObstacleState::Processed | ObstacleState::Removing
        )
    }

    pub fn is_pending(&self) -> bool {
        self.state != ObstacleState::Processed
    }
}
