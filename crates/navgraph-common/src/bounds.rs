//! Axis-aligned bounding volumes and containment tests

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Result of testing one volume against another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    /// The volumes do not touch
    Disjoint,
    /// The volumes overlap partially
    Intersects,
    /// The tested volume lies fully inside
    Contains,
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    /// Creates a box from two corners, reordering components as needed
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Creates a box centered on `center` with the given half extents
    pub fn from_center_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self::new(center - half_extents, center + half_extents)
    }

    /// Smallest box enclosing all points, or `None` for an empty iterator
    pub fn from_points<I: IntoIterator<Item = Vec3>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = Self::new(first, first);
        for p in iter {
            bounds.include(p);
        }
        Some(bounds)
    }

    /// Grows the box to include a point
    pub fn include(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Union of two boxes
    pub fn merged(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Box grown by `margin` on every side
    pub fn expanded(&self, margin: Vec3) -> BoundingBox {
        BoundingBox {
            min: self.min - margin,
            max: self.max + margin,
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Inclusive point test
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Inclusive point test ignoring the Y axis
    pub fn contains_point_2d(&self, p: Vec3) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.z >= self.min.z && p.z <= self.max.z
    }

    /// Tests `other` against this box
    pub fn contains(&self, other: &BoundingBox) -> Containment {
        if other.max.cmplt(self.min).any() || other.min.cmpgt(self.max).any() {
            Containment::Disjoint
        } else if other.min.cmpge(self.min).all() && other.max.cmple(self.max).all() {
            Containment::Contains
        } else {
            Containment::Intersects
        }
    }
}
