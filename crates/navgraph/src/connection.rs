//! Off-mesh connections bridging points that surface traversal cannot reach

use crate::{AreaType, NavEnum, NodeFlags};
use navgraph_common::Vec3;
use serde::{Deserialize, Serialize};

/// A manually authored link between two points (jumps, doors, ladders)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    id: i32,
    pub start: Vec3,
    pub end: Vec3,
    /// Endpoint snapping radius
    pub radius: f32,
    pub bidirectional: bool,
    area: u32,
    flags: u32,
}

impl Connection {
    pub fn new(start: Vec3, end: Vec3, radius: f32, bidirectional: bool) -> Self {
        Self {
            id: -1,
            start,
            end,
            radius,
            bidirectional,
            area: AreaType::WALKABLE.to_raw(),
            flags: NodeFlags::WALK.to_raw(),
        }
    }

    /// Sets the area classification from any [`NavEnum`]
    pub fn with_area<A: NavEnum>(mut self, area: A) -> Self {
        self.area = area.to_raw();
        self
    }

    /// Sets the traversal flags from any [`NavEnum`]
    pub fn with_flags<F: NavEnum>(mut self, flags: F) -> Self {
        self.flags = flags.to_raw();
        self
    }

    /// Id assigned on registration, `-1` while unregistered
    pub fn id(&self) -> i32 {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: i32) {
        self.id = id;
    }

    /// Area tag converted to the caller's enum
    pub fn area<A: NavEnum>(&self) -> Option<A> {
        A::from_raw(self.area)
    }

    /// Flag tag converted to the caller's enum
    pub fn flags<F: NavEnum>(&self) -> Option<F> {
        F::from_raw(self.flags)
    }

    pub(crate) fn area_id(&self) -> u8 {
        (self.area & AreaType::MASK as u32) as u8
    }

    pub(crate) fn node_flags(&self) -> NodeFlags {
        NodeFlags::from_bits_retain(self.flags as u16)
    }

    pub fn length(&self) -> f32 {
        self.start.distance(self.end)
    }
}
