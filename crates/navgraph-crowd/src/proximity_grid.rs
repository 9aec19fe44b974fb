//! Spatial buckets for neighbour queries
//!
//! The grid is refilled every simulation step. Each entry is registered in
//! every XZ cell its footprint touches, so a query only has to look at the
//! cells under its own footprint.

use navgraph_common::{dist_sqr_2d, Vec3};
use std::collections::HashMap;

const DEFAULT_CELL_SIZE: f32 = 4.0;

#[derive(Debug, Clone, Copy)]
struct Entry {
    id: usize,
    position: Vec3,
    radius: f32,
}

#[derive(Debug)]
pub struct ProximityGrid {
    inv_cell_size: f32,
    entries: Vec<Entry>,
    /// Cell key to indices into `entries`
    buckets: HashMap<(i32, i32), Vec<u32>>,
}

impl Default for ProximityGrid {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

impl ProximityGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            inv_cell_size: 1.0 / cell_size.max(0.1),
            entries: Vec::new(),
            buckets: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        1.0 / self.inv_cell_size
    }

    /// Empties the grid, keeping its allocations
    pub fn clear(&mut self) {
        self.entries.clear();
        for bucket in self.buckets.values_mut() {
            bucket.clear();
        }
    }

    fn cell_range(&self, position: Vec3, radius: f32) -> (i32, i32, i32, i32) {
        let s = self.inv_cell_size;
        (
            ((position.x - radius) * s).floor() as i32,
            ((position.z - radius) * s).floor() as i32,
            ((position.x + radius) * s).floor() as i32,
            ((position.z + radius) * s).floor() as i32,
        )
    }

    /// Registers a circle of `radius` around `position` under `id`
    pub fn insert(&mut self, id: usize, position: Vec3, radius: f32) {
        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            id,
            position,
            radius,
        });
        let (x0, z0, x1, z1) = self.cell_range(position, radius);
        for z in z0..=z1 {
            for x in x0..=x1 {
                self.buckets.entry((x, z)).or_default().push(index);
            }
        }
    }

    /// Ids of every circle overlapping the query circle, in insertion order
    pub fn query(&self, position: Vec3, range: f32) -> Vec<usize> {
        let (x0, z0, x1, z1) = self.cell_range(position, range);
        let mut hits: Vec<u32> = Vec::new();
        for z in z0..=z1 {
            for x in x0..=x1 {
                let Some(bucket) = self.buckets.get(&(x, z)) else {
                    continue;
                };
                hits.extend(bucket.iter().copied().filter(|&i| {
                    let e = &self.entries[i as usize];
                    let reach = range + e.radius;
                    dist_sqr_2d(position, e.position) <= reach * reach
                }));
            }
        }
        // Circles spanning several cells show up more than once
        hits.sort_unstable();
        hits.dedup();
        hits.into_iter()
            .map(|i| self.entries[i as usize].id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cells holding at least one entry
    pub fn occupied_cells(&self) -> usize {
        self.buckets.values().filter(|b| !b.is_empty()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f32, z: f32) -> Vec3 {
        Vec3::new(x, 0.0, z)
    }

    #[test]
    fn test_query_finds_overlapping_circles() {
        let mut grid = ProximityGrid::new(2.0);
        grid.insert(1, at(1.0, 1.0), 0.5);
        grid.insert(2, at(3.0, 3.0), 0.5);
        grid.insert(3, at(10.0, 10.0), 0.5);
        assert_eq!(grid.len(), 3);

        assert_eq!(grid.query(at(1.0, 1.0), 3.0), vec![1, 2]);
        assert_eq!(grid.query(at(10.0, 10.0), 3.0), vec![3]);
        assert!(grid.query(at(-20.0, 0.0), 1.0).is_empty());
    }

    #[test]
    fn test_large_circle_reported_once() {
        let mut grid = ProximityGrid::new(1.0);
        grid.insert(7, at(0.0, 0.0), 3.0);
        assert!(grid.occupied_cells() > 4);
        assert_eq!(grid.query(at(0.5, 0.5), 2.0), vec![7]);
        // Touches only through the stored radius
        assert_eq!(grid.query(at(3.8, 0.0), 1.0), vec![7]);
    }

    #[test]
    fn test_negative_coordinates() {
        let mut grid = ProximityGrid::new(2.0);
        grid.insert(1, at(-1.5, -3.7), 0.1);
        assert_eq!(grid.query(at(-1.0, -3.0), 1.0), vec![1]);
    }

    #[test]
    fn test_clear_keeps_cell_size() {
        let mut grid = ProximityGrid::new(2.5);
        grid.insert(1, at(0.0, 0.0), 0.5);
        grid.clear();
        assert!(grid.is_empty());
        assert_eq!(grid.occupied_cells(), 0);
        assert!(grid.query(at(0.0, 0.0), 5.0).is_empty());
        assert!((grid.cell_size() - 2.5).abs() < 1e-6);
    }
}
