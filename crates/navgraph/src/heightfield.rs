//! Tiled multi-layer heightfield sampled from source triangles
//!
//! Each grid cell holds the walkable surfaces (spans) found under its centre,
//! lowest first. A span records its height, the height of the next surface
//! above it and its area classification. Tiles group cells so that region
//! edits only resample the affected part of the grid.

use crate::{Area, GraphSettings};
use navgraph_common::{deg_to_rad, BoundingBox, Error, Result, Triangle, Vec3};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Maximum number of spans stored per cell
pub const MAX_SPANS_PER_CELL: usize = 16;

/// Largest grid accepted by a build
pub const MAX_CELLS: u64 = 1 << 26;

/// Surfaces closer than this are merged into one
const SURFACE_MERGE_DISTANCE: f32 = 0.01;

/// Ceiling value for spans with open sky above
pub const OPEN_CEILING: f32 = f32::MAX;

/// A walkable surface inside a cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub y: f32,
    pub ceiling: f32,
    pub area: u8,
}

impl Span {
    /// Free vertical space above the surface
    pub fn clearance(&self) -> f32 {
        self.ceiling - self.y
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heightfield {
    pub bounds: BoundingBox,
    pub cell_size: f32,
    pub width: u32,
    pub depth: u32,
    pub tile_size: u32,
    cells: Vec<Vec<Span>>,
    built: Vec<bool>,
}

impl Heightfield {
    /// Creates an empty heightfield covering `bounds`
    pub fn new(bounds: BoundingBox, cell_size: f32, tile_size: u32) -> Result<Self> {
        let size = bounds.size();
        let width = ((size.x / cell_size).ceil() as u32).max(1);
        let depth = ((size.z / cell_size).ceil() as u32).max(1);

        if width as u64 * depth as u64 > MAX_CELLS {
            return Err(Error::Build(format!(
                "grid of {}x{} cells exceeds the limit of {} cells",
                width, depth, MAX_CELLS
            )));
        }

        let tiles = width.div_ceil(tile_size) as usize * depth.div_ceil(tile_size) as usize;
        Ok(Self {
            bounds,
            cell_size,
            width,
            depth,
            tile_size,
            cells: vec![Vec::new(); width as usize * depth as usize],
            built: vec![false; tiles],
        })
    }

    /// Checks the invariants queries and edits rely on
    ///
    /// Used on decoded graphs, which may come from a damaged file.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(format!("invalid cell size {}", self.cell_size));
        }
        if self.tile_size == 0 {
            return Err("tile size is zero".to_string());
        }
        let (min, max) = (self.bounds.min, self.bounds.max);
        if !(min.is_finite() && max.is_finite()) || min.x > max.x || min.z > max.z {
            return Err("bounds are not a finite box".to_string());
        }
        let cells = self.width as u64 * self.depth as u64;
        if self.width == 0 || self.depth == 0 || cells > MAX_CELLS {
            return Err(format!("invalid grid size {}x{}", self.width, self.depth));
        }
        if self.cells.len() as u64 != cells {
            return Err(format!(
                "{} cells stored for a {}x{} grid",
                self.cells.len(),
                self.width,
                self.depth
            ));
        }
        let tiles = self.tiles_x() as usize * self.tiles_z() as usize;
        if self.built.len() != tiles {
            return Err(format!("{} tile flags stored for {} tiles", self.built.len(), tiles));
        }
        if self.cells.iter().any(|c| c.len() > MAX_SPANS_PER_CELL) {
            return Err("cell holds too many spans".to_string());
        }
        Ok(())
    }

    pub fn tiles_x(&self) -> u32 {
        self.width.div_ceil(self.tile_size)
    }

    pub fn tiles_z(&self) -> u32 {
        self.depth.div_ceil(self.tile_size)
    }

    pub fn tile_count(&self) -> usize {
        self.built.len()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn span_count(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    #[inline]
    pub fn cell_index(&self, x: u32, z: u32) -> usize {
        z as usize * self.width as usize + x as usize
    }

    #[inline]
    pub fn cell_coords(&self, index: usize) -> (u32, u32) {
        let w = self.width as usize;
        ((index % w) as u32, (index / w) as u32)
    }

    #[inline]
    pub fn in_bounds(&self, x: i64, z: i64) -> bool {
        x >= 0 && z >= 0 && x < self.width as i64 && z < self.depth as i64
    }

    /// Centre of a cell at height zero
    pub fn cell_center(&self, x: u32, z: u32) -> Vec3 {
        Vec3::new(
            self.bounds.min.x + (x as f32 + 0.5) * self.cell_size,
            0.0,
            self.bounds.min.z + (z as f32 + 0.5) * self.cell_size,
        )
    }

    /// XZ rectangle of a cell as (min, max) corners
    pub fn cell_rect(&self, x: u32, z: u32) -> (Vec3, Vec3) {
        let min = Vec3::new(
            self.bounds.min.x + x as f32 * self.cell_size,
            0.0,
            self.bounds.min.z + z as f32 * self.cell_size,
        );
        (min, min + Vec3::new(self.cell_size, 0.0, self.cell_size))
    }

    /// Cell containing the XZ location of `p`
    pub fn cell_at(&self, p: Vec3) -> Option<(u32, u32)> {
        let fx = ((p.x - self.bounds.min.x) / self.cell_size).floor();
        let fz = ((p.z - self.bounds.min.z) / self.cell_size).floor();
        if !fx.is_finite() || !fz.is_finite() {
            return None;
        }
        let (x, z) = (fx as i64, fz as i64);
        self.in_bounds(x, z).then_some((x as u32, z as u32))
    }

    /// Cell nearest to the XZ location of `p`
    pub fn clamp_cell(&self, p: Vec3) -> (u32, u32) {
        let fx = ((p.x - self.bounds.min.x) / self.cell_size).floor();
        let fz = ((p.z - self.bounds.min.z) / self.cell_size).floor();
        let x = if fx.is_finite() { fx as i64 } else { 0 };
        let z = if fz.is_finite() { fz as i64 } else { 0 };
        (
            x.clamp(0, self.width as i64 - 1) as u32,
            z.clamp(0, self.depth as i64 - 1) as u32,
        )
    }

    /// Cell ranges overlapping `area` in XZ, clamped to the grid
    pub fn cell_range(&self, area: &BoundingBox) -> Option<(Range<u32>, Range<u32>)> {
        if area.max.x < self.bounds.min.x
            || area.max.z < self.bounds.min.z
            || area.min.x > self.bounds.min.x + self.width as f32 * self.cell_size
            || area.min.z > self.bounds.min.z + self.depth as f32 * self.cell_size
        {
            return None;
        }
        let (x0, z0) = self.clamp_cell(area.min);
        let (x1, z1) = self.clamp_cell(area.max);
        Some((x0..x1 + 1, z0..z1 + 1))
    }

    #[inline]
    pub fn spans(&self, x: u32, z: u32) -> &[Span] {
        &self.cells[self.cell_index(x, z)]
    }

    #[inline]
    pub fn spans_at(&self, index: usize) -> &[Span] {
        self.cells.get(index).map_or(&[], Vec::as_slice)
    }

    /// Cells belonging to a tile
    pub fn tile_cells(&self, tx: u32, tz: u32) -> (Range<u32>, Range<u32>) {
        let x0 = tx * self.tile_size;
        let z0 = tz * self.tile_size;
        (
            x0..(x0 + self.tile_size).min(self.width),
            z0..(z0 + self.tile_size).min(self.depth),
        )
    }

    /// World bounds of a tile, spanning the full vertical extent of the grid
    pub fn tile_bounds(&self, tx: u32, tz: u32) -> BoundingBox {
        let (xs, zs) = self.tile_cells(tx, tz);
        let min = Vec3::new(
            self.bounds.min.x + xs.start as f32 * self.cell_size,
            self.bounds.min.y - 1.0,
            self.bounds.min.z + zs.start as f32 * self.cell_size,
        );
        let max = Vec3::new(
            self.bounds.min.x + xs.end as f32 * self.cell_size,
            self.bounds.max.y + 1.0,
            self.bounds.min.z + zs.end as f32 * self.cell_size,
        );
        BoundingBox::new(min, max)
    }

    /// Tiles overlapping `area` in XZ
    pub fn tiles_in(&self, area: &BoundingBox) -> Vec<(u32, u32)> {
        let Some((xs, zs)) = self.cell_range(area) else {
            return Vec::new();
        };
        let ts = self.tile_size;
        let mut tiles = Vec::new();
        for tz in zs.start / ts..=(zs.end - 1) / ts {
            for tx in xs.start / ts..=(xs.end - 1) / ts {
                tiles.push((tx, tz));
            }
        }
        tiles
    }

    pub fn is_tile_built(&self, tx: u32, tz: u32) -> bool {
        self.tile_slot(tx, tz)
            .map_or(false, |slot| self.built[slot])
    }

    pub fn built_tile_count(&self) -> usize {
        self.built.iter().filter(|b| **b).count()
    }

    fn tile_slot(&self, tx: u32, tz: u32) -> Option<usize> {
        (tx < self.tiles_x() && tz < self.tiles_z())
            .then(|| tz as usize * self.tiles_x() as usize + tx as usize)
    }

    /// Resamples every cell of a tile from `triangles`
    ///
    /// Walkable surfaces become spans; steeper surfaces only act as ceilings.
    /// Registered areas are applied in order, so later areas override earlier
    /// ones where they overlap.
    pub fn rasterize_tile(
        &mut self,
        tx: u32,
        tz: u32,
        triangles: &[Triangle],
        settings: &GraphSettings,
        areas: &[Area],
    ) {
        let Some(slot) = self.tile_slot(tx, tz) else {
            return;
        };

        let walkable_normal_y = deg_to_rad(settings.walkable_slope_angle).cos() - 1e-4;
        let prepared: Vec<(BoundingBox, bool, &Triangle)> = triangles
            .iter()
            .filter_map(|tri| {
                let normal = tri.up_normal()?;
                Some((tri.bounds(), normal.y >= walkable_normal_y, tri))
            })
            .collect();

        let (xs, zs) = self.tile_cells(tx, tz);
        let mut surfaces: Vec<(f32, bool)> = Vec::new();

        for z in zs.clone() {
            for x in xs.clone() {
                let center = self.cell_center(x, z);
                surfaces.clear();
                for (bounds, walkable, tri) in &prepared {
                    if !bounds.contains_point_2d(center) {
                        continue;
                    }
                    if let Some(h) = tri.height_at(center) {
                        surfaces.push((h, *walkable));
                    }
                }
                surfaces.sort_by(|a, b| a.0.total_cmp(&b.0));

                let mut merged: Vec<(f32, bool)> = Vec::with_capacity(surfaces.len());
                for &(h, walkable) in &surfaces {
                    match merged.last_mut() {
                        Some(last) if h - last.0 <= SURFACE_MERGE_DISTANCE => {
                            last.0 = last.0.max(h);
                            last.1 |= walkable;
                        }
                        _ => merged.push((h, walkable)),
                    }
                }

                let mut spans = Vec::new();
                for (i, &(y, walkable)) in merged.iter().enumerate() {
                    if !walkable {
                        continue;
                    }
                    if spans.len() == MAX_SPANS_PER_CELL {
                        log::warn!(
                            "Cell ({}, {}) has more than {} walkable surfaces, dropping the rest",
                            x,
                            z,
                            MAX_SPANS_PER_CELL
                        );
                        break;
                    }

                    let ceiling = merged.get(i + 1).map_or(OPEN_CEILING, |next| next.0);
                    let point = Vec3::new(center.x, y, center.z);
                    let area = areas
                        .iter()
                        .filter(|a| a.contains(point))
                        .last()
                        .map_or(settings.default_area, |a| a.area_type());

                    spans.push(Span {
                        y,
                        ceiling,
                        area: area.id(),
                    });
                }

                let index = self.cell_index(x, z);
                self.cells[index] = spans;
            }
        }

        self.built[slot] = true;
    }

    /// Removes every span of a tile
    pub fn clear_tile(&mut self, tx: u32, tz: u32) {
        let Some(slot) = self.tile_slot(tx, tz) else {
            return;
        };
        let (xs, zs) = self.tile_cells(tx, tz);
        for z in zs {
            for x in xs.clone() {
                let index = self.cell_index(x, z);
                self.cells[index].clear();
            }
        }
        self.built[slot] = false;
    }
}
