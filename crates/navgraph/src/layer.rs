//! Per-agent passability derived from the shared heightfield

use crate::heightfield::{Heightfield, Span};
use crate::{AgentType, GraphSettings, NodeFlags, Obstacle};
use navgraph_common::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

/// Reference to a graph node: cell index in the high bits, span index in the low four
pub type NodeRef = u32;

const SPAN_BITS: u32 = 4;
const SPAN_MASK: u32 = (1 << SPAN_BITS) - 1;

#[inline]
pub(crate) fn encode_node(cell: usize, span: usize) -> NodeRef {
    ((cell as u32) << SPAN_BITS) | (span as u32 & SPAN_MASK)
}

#[inline]
pub(crate) fn decode_node(node: NodeRef) -> (usize, usize) {
    ((node >> SPAN_BITS) as usize, (node & SPAN_MASK) as usize)
}

/// Directed off-mesh edge leaving a node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct Link {
    pub to: NodeRef,
    pub start: Vec3,
    pub end: Vec3,
    pub area: u8,
    pub flags: NodeFlags,
}

/// Passability of every span for one agent type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AgentLayer {
    pub agent: AgentType,
    /// One bit per span of each cell
    pub passable: Vec<u16>,
    pub links: BTreeMap<NodeRef, Vec<Link>>,
}

impl AgentLayer {
    pub fn new(agent: AgentType, cell_count: usize) -> Self {
        Self {
            agent,
            passable: vec![0; cell_count],
            links: BTreeMap::new(),
        }
    }

    /// Checks that the layer and its links fit `hf`
    pub fn validate(&self, hf: &Heightfield) -> Result<(), String> {
        if self.passable.len() != hf.cell_count() {
            return Err(format!(
                "layer {:?} covers {} cells, heightfield has {}",
                self.agent.name,
                self.passable.len(),
                hf.cell_count()
            ));
        }
        let in_range = |node: NodeRef| {
            let (cell, span) = decode_node(node);
            span < hf.spans_at(cell).len()
        };
        let dangling = self
            .links
            .iter()
            .any(|(from, links)| !in_range(*from) || links.iter().any(|l| !in_range(l.to)));
        if dangling {
            return Err(format!("layer {:?} links a missing node", self.agent.name));
        }
        Ok(())
    }

    #[inline]
    pub fn is_passable(&self, cell: usize, span: usize) -> bool {
        self.passable
            .get(cell)
            .map_or(false, |mask| mask & (1 << span) != 0)
    }

    pub fn node_count(&self) -> usize {
        self.passable.iter().map(|m| m.count_ones() as usize).sum()
    }

    /// Iterates every passable node
    pub fn nodes(&self) -> impl Iterator<Item = NodeRef> + '_ {
        self.passable
            .iter()
            .enumerate()
            .flat_map(|(cell, mask)| {
                (0..16usize)
                    .filter(move |s| mask & (1 << s) != 0)
                    .map(move |s| encode_node(cell, s))
            })
    }

    /// Recomputes passability for the given cell ranges
    ///
    /// A span is passable when it has the agent's clearance, a walkable area,
    /// no committed obstacle over it, and every cell within the agent radius
    /// holds a connected span that satisfies the same conditions.
    pub fn derive(
        &mut self,
        hf: &Heightfield,
        settings: &GraphSettings,
        obstacles: &[&Obstacle],
        xs: Range<u32>,
        zs: Range<u32>,
    ) {
        let cs = hf.cell_size;
        let radius = settings.agent_radius;
        let reach = (radius / cs).ceil() as i64;

        let mut offsets = Vec::new();
        for dz in -reach..=reach {
            for dx in -reach..=reach {
                let d2 = ((dx * dx + dz * dz) as f32) * cs * cs;
                if (dx, dz) != (0, 0) && d2 < radius * radius {
                    offsets.push((dx, dz));
                }
            }
        }

        let height = self.agent.height;
        let raw = |x: u32, z: u32, span: &Span| -> bool {
            if span.area == 0 || span.clearance() < height {
                return false;
            }
            let center = hf.cell_center(x, z);
            let p = Vec3::new(center.x, span.y, center.z);
            !obstacles
                .iter()
                .any(|o| o.shape.blocks(p, span.y, span.y + height))
        };

        let climb = settings.walkable_climb;
        for z in zs {
            for x in xs.clone() {
                let mut mask = 0u16;
                for (si, span) in hf.spans(x, z).iter().enumerate() {
                    if !raw(x, z, span) {
                        continue;
                    }

                    let eroded = offsets.iter().any(|&(dx, dz)| {
                        let (nx, nz) = (x as i64 + dx, z as i64 + dz);
                        if !hf.in_bounds(nx, nz) {
                            return true;
                        }
                        let (nx, nz) = (nx as u32, nz as u32);
                        let tolerance = climb * dx.abs().max(dz.abs()) as f32;
                        !hf.spans(nx, nz)
                            .iter()
                            .any(|s| (s.y - span.y).abs() <= tolerance && raw(nx, nz, s))
                    });

                    if !eroded {
                        mask |= 1 << si;
                    }
                }
                let index = hf.cell_index(x, z);
                self.passable[index] = mask;
            }
        }
    }
}
