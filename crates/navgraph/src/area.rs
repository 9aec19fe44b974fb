//! Area classification, node flags and user-registered area volumes
//!
//! Area types and node flags are stored as plain integers inside the graph.
//! Callers that want their own enums implement [`NavEnum`] and convert at the
//! boundary, so the graph never needs to know the concrete classification type.

use navgraph_common::{dist_2d, point_in_polygon_2d, BoundingBox, Error, Result, Vec3};
use serde::{Deserialize, Serialize};

/// Conversion between a caller-defined enum and the raw integer stored in the graph
pub trait NavEnum: Copy {
    /// Raw integer representation
    fn to_raw(self) -> u32;

    /// Converts a raw value back, or `None` if it has no matching variant
    fn from_raw(raw: u32) -> Option<Self>;
}

impl NavEnum for u8 {
    fn to_raw(self) -> u32 {
        self as u32
    }

    fn from_raw(raw: u32) -> Option<Self> {
        u8::try_from(raw).ok()
    }
}

impl NavEnum for u16 {
    fn to_raw(self) -> u32 {
        self as u32
    }

    fn from_raw(raw: u32) -> Option<Self> {
        u16::try_from(raw).ok()
    }
}

impl NavEnum for u32 {
    fn to_raw(self) -> u32 {
        self
    }

    fn from_raw(raw: u32) -> Option<Self> {
        Some(raw)
    }
}

/// Area classification of a walkable surface
///
/// Only the low six bits are significant. `0` marks unwalkable surfaces and
/// `0x3F` is the generic walkable area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AreaType(u8);

impl AreaType {
    pub const MASK: u8 = 0x3F;
    pub const UNWALKABLE: AreaType = AreaType(0);
    pub const WALKABLE: AreaType = AreaType(Self::MASK);

    pub const fn new(id: u8) -> Self {
        AreaType(id & Self::MASK)
    }

    pub const fn id(self) -> u8 {
        self.0
    }

    pub const fn is_walkable(self) -> bool {
        self.0 != 0
    }
}

impl Default for AreaType {
    fn default() -> Self {
        Self::WALKABLE
    }
}

impl NavEnum for AreaType {
    fn to_raw(self) -> u32 {
        self.0 as u32
    }

    fn from_raw(raw: u32) -> Option<Self> {
        (raw <= Self::MASK as u32).then(|| AreaType(raw as u8))
    }
}

bitflags::bitflags! {
    /// Traversal flags attached to graph nodes and off-mesh connections
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct NodeFlags: u16 {
        /// Ground that can be walked on
        const WALK = 0x01;
        /// Water surfaces
        const SWIM = 0x02;
        /// Doors and gates
        const DOOR = 0x04;
        /// Jump links
        const JUMP = 0x08;
        /// Temporarily disabled
        const DISABLED = 0x10;
    }
}

impl Default for NodeFlags {
    fn default() -> Self {
        NodeFlags::WALK
    }
}

impl NavEnum for NodeFlags {
    fn to_raw(self) -> u32 {
        self.bits() as u32
    }

    fn from_raw(raw: u32) -> Option<Self> {
        u16::try_from(raw).ok().map(NodeFlags::from_bits_retain)
    }
}

/// A named agent profile; graphs hold one passability layer per agent type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentType {
    pub name: String,
    /// Vertical clearance the agent needs
    pub height: f32,
}

impl AgentType {
    pub fn new(name: impl Into<String>, height: f32) -> Self {
        Self {
            name: name.into(),
            height,
        }
    }
}

impl Default for AgentType {
    fn default() -> Self {
        Self::new("humanoid", 2.0)
    }
}

/// Volume of an [`Area`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AreaShape {
    Box {
        bounds: BoundingBox,
    },
    Cylinder {
        center: Vec3,
        radius: f32,
        min_height: f32,
        max_height: f32,
    },
    Polygon {
        vertices: Vec<Vec3>,
        min_height: f32,
        max_height: f32,
    },
}

/// A region that re-classifies the surfaces it contains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    id: i32,
    area_type: AreaType,
    shape: AreaShape,
}

impl Area {
    /// Axis-aligned box area; the vertical range is the box's Y extent
    pub fn new_box(bounds: BoundingBox, area_type: AreaType) -> Self {
        Self {
            id: -1,
            area_type,
            shape: AreaShape::Box { bounds },
        }
    }

    /// Vertical cylinder area
    pub fn cylinder(
        center: Vec3,
        radius: f32,
        min_height: f32,
        max_height: f32,
        area_type: AreaType,
    ) -> Self {
        Self {
            id: -1,
            area_type,
            shape: AreaShape::Cylinder {
                center,
                radius: radius.max(0.0),
                min_height: min_height.min(max_height),
                max_height: max_height.max(min_height),
            },
        }
    }

    /// Extruded polygon area
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArea`] when fewer than three vertices are given.
    pub fn polygon(
        vertices: Vec<Vec3>,
        min_height: f32,
        max_height: f32,
        area_type: AreaType,
    ) -> Result<Self> {
        if vertices.len() < 3 {
            return Err(Error::InvalidArea(format!(
                "polygon area needs at least 3 vertices, got {}",
                vertices.len()
            )));
        }

        Ok(Self {
            id: -1,
            area_type,
            shape: AreaShape::Polygon {
                vertices,
                min_height: min_height.min(max_height),
                max_height: max_height.max(min_height),
            },
        })
    }

    /// Id assigned on registration, `-1` while unregistered
    pub fn id(&self) -> i32 {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: i32) {
        self.id = id;
    }

    pub fn area_type(&self) -> AreaType {
        self.area_type
    }

    pub fn shape(&self) -> &AreaShape {
        &self.shape
    }

    /// Returns true if the point lies inside the area volume
    pub fn contains(&self, p: Vec3) -> bool {
        match &self.shape {
            AreaShape::Box { bounds } => bounds.contains_point(p),
            AreaShape::Cylinder {
                center,
                radius,
                min_height,
                max_height,
            } => p.y >= *min_height && p.y <= *max_height && dist_2d(p, *center) <= *radius,
            AreaShape::Polygon {
                vertices,
                min_height,
                max_height,
            } => p.y >= *min_height && p.y <= *max_height && point_in_polygon_2d(p, vertices),
        }
    }

    /// Bounds of the area volume
    pub fn bounds(&self) -> BoundingBox {
        match &self.shape {
            AreaShape::Box { bounds } => *bounds,
            AreaShape::Cylinder {
                center,
                radius,
                min_height,
                max_height,
            } => BoundingBox::new(
                Vec3::new(center.x - radius, *min_height, center.z - radius),
                Vec3::new(center.x + radius, *max_height, center.z + radius),
            ),
            AreaShape::Polygon {
                vertices,
                min_height,
                max_height,
            } => {
                let (mut lo, mut hi) = (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN));
                for v in vertices {
                    lo = lo.min(*v);
                    hi = hi.max(*v);
                }
                lo.y = *min_height;
                hi.y = *max_height;
                BoundingBox::new(lo, hi)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polygon_requires_three_vertices() {
        let err = Area::polygon(
            vec![Vec3::ZERO, Vec3::X],
            0.0,
            1.0,
            AreaType::WALKABLE,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArea(_)));
        assert!(Area::polygon(vec![], 0.0, 1.0, AreaType::WALKABLE).is_err());
    }

    #[test]
    fn test_area_containment() {
        let square = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(4.0, 0.0, 0.0),
            Vec3::new(4.0, 0.0, 4.0),
            Vec3::new(0.0, 0.0, 4.0),
        ];
        let poly = Area::polygon(square, -1.0, 1.0, AreaType::new(3)).unwrap();
        assert!(poly.contains(Vec3::new(2.0, 0.0, 2.0)));
        assert!(!poly.contains(Vec3::new(2.0, 2.0, 2.0)));
        assert!(!poly.contains(Vec3::new(5.0, 0.0, 2.0)));

        let cyl = Area::cylinder(Vec3::ZERO, 2.0, -1.0, 1.0, AreaType::UNWALKABLE);
        assert!(cyl.contains(Vec3::new(1.0, 0.0, 1.0)));
        assert!(!cyl.contains(Vec3::new(2.0, 0.0, 2.0)));
        assert_eq!(cyl.bounds().min, Vec3::new(-2.0, -1.0, -2.0));

        let boxed = Area::new_box(
            BoundingBox::new(Vec3::splat(-1.0), Vec3::splat(1.0)),
            AreaType::WALKABLE,
        );
        assert!(boxed.contains(Vec3::ZERO));
        assert_eq!(boxed.id(), -1);
    }

    #[test]
    fn test_nav_enum_conversions() {
        assert_eq!(AreaType::WALKABLE.to_raw(), 0x3F);
        assert_eq!(AreaType::from_raw(0x40), None);
        assert_eq!(AreaType::new(0xFF), AreaType::WALKABLE);
        assert_eq!(
            NodeFlags::from_raw((NodeFlags::WALK | NodeFlags::DOOR).to_raw()),
            Some(NodeFlags::WALK | NodeFlags::DOOR)
        );
        assert_eq!(u8::from_raw(300), None);
    }

    #[test]
    fn test_agent_type_equality() {
        assert_eq!(AgentType::new("a", 2.0), AgentType::new("a", 2.0));
        assert_ne!(AgentType::new("a", 2.0), AgentType::new("a", 1.8));
    }
}
