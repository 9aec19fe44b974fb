//! Queries over one agent layer of a grid graph
//!
//! Nodes are passable spans; surface edges connect the 8-neighbourhood when
//! the height step is climbable (diagonals also need both orthogonal
//! neighbours) and off-mesh links add explicit edges.

use crate::heightfield::{Heightfield, Span};
use crate::layer::{decode_node, encode_node, AgentLayer, Link, NodeRef};
use crate::{Connection, GraphNode, GraphSettings, NodeFlags, QueryFilter, RaycastHit, WallSegment};
use navgraph_common::{dist_2d, dist_point_segment_sqr_2d, BoundingBox, Vec3};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet, VecDeque};

/// Upper bound on nodes visited by a single path search
const MAX_SEARCH_NODES: usize = 1 << 18;

/// Surface samples taken per cell length when tracing a segment
const TRACE_STEPS_PER_CELL: f32 = 4.0;

/// Maximum number of wall segments returned by a boundary query
pub(crate) const MAX_BOUNDARY_SEGMENTS: usize = 64;

const ORTHOGONAL: [(i64, i64); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];
/// Diagonal offsets and the two orthogonal slots each one depends on
const DIAGONAL: [((i64, i64), usize, usize); 4] = [
    ((1, 1), 0, 1),
    ((-1, 1), 2, 1),
    ((-1, -1), 2, 3),
    ((1, -1), 0, 3),
];

/// Open list entry ordered so the heap pops the lowest total cost first
#[derive(Debug, Clone, Copy)]
struct OpenEntry {
    total: f32,
    node: NodeRef,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .total
            .total_cmp(&self.total)
            .then_with(|| other.node.cmp(&self.node))
    }
}

#[derive(Debug, Clone, Copy)]
struct Visit {
    cost: f32,
    parent: Option<NodeRef>,
    via: Option<Link>,
    closed: bool,
}

/// Outcome of walking a straight segment over the surface
#[derive(Debug, Clone, Copy)]
struct Trace {
    reached: bool,
    t: f32,
    position: Vec3,
}

/// Read-only view of one agent layer
pub(crate) struct LayerView<'a> {
    pub hf: &'a Heightfield,
    pub layer: &'a AgentLayer,
    pub settings: &'a GraphSettings,
}

impl<'a> LayerView<'a> {
    fn span(&self, node: NodeRef) -> Option<&'a Span> {
        let (cell, span) = decode_node(node);
        self.hf.spans_at(cell).get(span)
    }

    fn node_cell(&self, node: NodeRef) -> (u32, u32) {
        self.hf.cell_coords(decode_node(node).0)
    }

    pub fn node_position(&self, node: NodeRef) -> Option<Vec3> {
        let span = self.span(node)?;
        let (x, z) = self.node_cell(node);
        let center = self.hf.cell_center(x, z);
        Some(Vec3::new(center.x, span.y, center.z))
    }

    fn node_area(&self, node: NodeRef) -> u8 {
        self.span(node).map_or(0, |s| s.area)
    }

    fn node_cost(&self, node: NodeRef, filter: &QueryFilter) -> f32 {
        filter.get_area_cost(self.node_area(node))
    }

    fn node_passes(&self, node: NodeRef, filter: &QueryFilter) -> bool {
        self.node_area(node) != 0 && filter.pass_filter(NodeFlags::WALK)
    }

    /// Search distance used to attach query points to the graph
    pub fn query_extent(&self) -> f32 {
        self.layer.agent.height.max(self.hf.cell_size * 4.0)
    }

    /// Closest point of a node's cell to `p`, on the node's surface
    fn closest_point_in_node(&self, node: NodeRef, p: Vec3) -> Option<Vec3> {
        let span = self.span(node)?;
        let (x, z) = self.node_cell(node);
        let (min, max) = self.hf.cell_rect(x, z);
        let inset = self.hf.cell_size * 0.01;
        Some(Vec3::new(
            p.x.clamp(min.x + inset, max.x - inset),
            span.y,
            p.z.clamp(min.z + inset, max.z - inset),
        ))
    }

    /// Passable span of cell `(x, z)` closest in height to `y` and within climb
    fn step_to(&self, x: i64, z: i64, y: f32) -> Option<NodeRef> {
        if !self.hf.in_bounds(x, z) {
            return None;
        }
        let cell = self.hf.cell_index(x as u32, z as u32);
        let climb = self.settings.walkable_climb;
        self.hf
            .spans_at(cell)
            .iter()
            .enumerate()
            .filter(|(si, s)| self.layer.is_passable(cell, *si) && (s.y - y).abs() <= climb)
            .min_by(|a, b| (a.1.y - y).abs().total_cmp(&(b.1.y - y).abs()))
            .map(|(si, _)| encode_node(cell, si))
    }

    /// Surface neighbours, orthogonal first, then diagonals
    fn neighbours(&self, node: NodeRef) -> [Option<NodeRef>; 8] {
        let mut out = [None; 8];
        let Some(span) = self.span(node) else {
            return out;
        };
        let (x, z) = self.node_cell(node);
        let (x, z) = (x as i64, z as i64);

        for (i, (dx, dz)) in ORTHOGONAL.iter().enumerate() {
            out[i] = self.step_to(x + dx, z + dz, span.y);
        }
        for (i, ((dx, dz), a, b)) in DIAGONAL.iter().enumerate() {
            if out[*a].is_some() && out[*b].is_some() {
                out[4 + i] = self.step_to(x + dx, z + dz, span.y);
            }
        }
        out
    }

    /// Nearest passable node within `max_dist` of `p` and the closest point on it
    pub fn nearest_node(
        &self,
        p: Vec3,
        max_dist: f32,
        filter: &QueryFilter,
    ) -> Option<(NodeRef, Vec3)> {
        let cs = self.hf.cell_size;
        let (cx, cz) = self.hf.clamp_cell(p);
        let (cx, cz) = (cx as i64, cz as i64);
        let grid_extent = self.hf.width.max(self.hf.depth) as i64;
        let max_ring = if max_dist.is_finite() {
            ((max_dist / cs).ceil() as i64 + 1).min(grid_extent)
        } else {
            grid_extent
        };

        let mut best: Option<(f32, NodeRef, Vec3)> = None;
        for ring in 0..=max_ring {
            if let Some((d, _, _)) = best {
                if (ring - 1) as f32 * cs > d {
                    break;
                }
            }

            for dz in -ring..=ring {
                let edge_row = dz.abs() == ring;
                let mut dx = -ring;
                while dx <= ring {
                    let (x, z) = (cx + dx, cz + dz);
                    dx += if edge_row || ring == 0 { 1 } else { 2 * ring };
                    if !self.hf.in_bounds(x, z) {
                        continue;
                    }
                    let cell = self.hf.cell_index(x as u32, z as u32);
                    for si in 0..self.hf.spans_at(cell).len() {
                        if !self.layer.is_passable(cell, si) {
                            continue;
                        }
                        let node = encode_node(cell, si);
                        if !self.node_passes(node, filter) {
                            continue;
                        }
                        let Some(q) = self.closest_point_in_node(node, p) else {
                            continue;
                        };
                        let d = q.distance(p);
                        if d <= max_dist && best.map_or(true, |(bd, _, _)| d < bd) {
                            best = Some((d, node, q));
                        }
                    }
                }
            }
        }

        best.map(|(_, node, q)| (node, q))
    }

    pub fn node_info(&self, node: NodeRef) -> Option<GraphNode> {
        let span = self.span(node)?;
        let (x, z) = self.node_cell(node);
        let (min, max) = self.hf.cell_rect(x, z);
        let y = span.y;
        Some(GraphNode {
            reference: node,
            center: self.node_position(node)?,
            cost: self.hf.cell_size,
            area: span.area,
            flags: NodeFlags::WALK,
            perimeter: vec![
                Vec3::new(min.x, y, min.z),
                Vec3::new(max.x, y, min.z),
                Vec3::new(max.x, y, max.z),
                Vec3::new(min.x, y, max.z),
            ],
            min_y: y - self.settings.walkable_climb,
            max_y: y + self.layer.agent.height.min(span.clearance()),
        })
    }

    /// Outline of every walkable cell
    pub fn walkable_quads(&self) -> Vec<[Vec3; 4]> {
        self.layer
            .nodes()
            .filter_map(|node| {
                let info = self.node_info(node)?;
                Some([
                    info.perimeter[0],
                    info.perimeter[1],
                    info.perimeter[2],
                    info.perimeter[3],
                ])
            })
            .collect()
    }

    /// A* from `from` to `to` followed by string pulling
    pub fn find_path(&self, from: Vec3, to: Vec3, filter: &QueryFilter) -> Vec<Vec3> {
        let extent = self.query_extent();
        let Some((start, start_pos)) = self.nearest_node(from, extent, filter) else {
            log::debug!("No start node near {:?}", from);
            return Vec::new();
        };
        let Some((goal, goal_pos)) = self.nearest_node(to, extent, filter) else {
            log::debug!("No goal node near {:?}", to);
            return Vec::new();
        };

        if start == goal {
            return vec![start_pos, goal_pos];
        }

        match self.search(start, goal, filter) {
            Some(steps) => self.string_pull(&steps, start_pos, goal_pos, filter),
            None => Vec::new(),
        }
    }

    fn search(
        &self,
        start: NodeRef,
        goal: NodeRef,
        filter: &QueryFilter,
    ) -> Option<Vec<(NodeRef, Option<Link>)>> {
        let goal_pos = self.node_position(goal)?;
        let heuristic_scale = filter.min_area_cost();
        let heuristic = |pos: Vec3| pos.distance(goal_pos) * heuristic_scale;

        let mut visits: HashMap<NodeRef, Visit> = HashMap::new();
        let mut open = BinaryHeap::new();

        visits.insert(
            start,
            Visit {
                cost: 0.0,
                parent: None,
                via: None,
                closed: false,
            },
        );
        open.push(OpenEntry {
            total: heuristic(self.node_position(start)?),
            node: start,
        });

        while let Some(OpenEntry { node, .. }) = open.pop() {
            let Some(visit) = visits.get_mut(&node) else {
                continue;
            };
            if visit.closed {
                continue;
            }
            visit.closed = true;
            let cost = visit.cost;

            if node == goal {
                return Some(Self::reconstruct(&visits, goal));
            }
            if visits.len() > MAX_SEARCH_NODES {
                log::warn!("Path search exceeded {} nodes", MAX_SEARCH_NODES);
                return None;
            }

            let pos = self.node_position(node)?;
            let here_cost = self.node_cost(node, filter);

            let mut relax = |next: NodeRef, next_pos: Vec3, step: f32, via: Option<Link>| {
                let total_cost = cost + step;
                let entry = visits.entry(next).or_insert(Visit {
                    cost: f32::INFINITY,
                    parent: None,
                    via: None,
                    closed: false,
                });
                if entry.closed || total_cost >= entry.cost {
                    return;
                }
                *entry = Visit {
                    cost: total_cost,
                    parent: Some(node),
                    via,
                    closed: false,
                };
                open.push(OpenEntry {
                    total: total_cost + heuristic(next_pos),
                    node: next,
                });
            };

            for next in self.neighbours(node).into_iter().flatten() {
                if !self.node_passes(next, filter) {
                    continue;
                }
                let Some(next_pos) = self.node_position(next) else {
                    continue;
                };
                let step =
                    pos.distance(next_pos) * 0.5 * (here_cost + self.node_cost(next, filter));
                relax(next, next_pos, step, None);
            }

            if let Some(links) = self.layer.links.get(&node) {
                for link in links {
                    if !filter.pass_filter(link.flags) || !self.node_passes(link.to, filter) {
                        continue;
                    }
                    let Some(next_pos) = self.node_position(link.to) else {
                        continue;
                    };
                    let step = pos.distance(link.start) * here_cost
                        + link.start.distance(link.end) * filter.get_area_cost(link.area)
                        + link.end.distance(next_pos) * self.node_cost(link.to, filter);
                    relax(link.to, next_pos, step, Some(*link));
                }
            }
        }

        None
    }

    fn reconstruct(
        visits: &HashMap<NodeRef, Visit>,
        goal: NodeRef,
    ) -> Vec<(NodeRef, Option<Link>)> {
        let mut steps = Vec::new();
        let mut current = Some(goal);
        while let Some(node) = current {
            let visit = visits.get(&node);
            steps.push((node, visit.and_then(|v| v.via)));
            current = visit.and_then(|v| v.parent);
        }
        steps.reverse();
        steps
    }

    /// Straightens a node corridor into waypoints, keeping link endpoints
    fn string_pull(
        &self,
        steps: &[(NodeRef, Option<Link>)],
        start_pos: Vec3,
        goal_pos: Vec3,
        filter: &QueryFilter,
    ) -> Vec<Vec3> {
        let mut points = vec![start_pos];
        let mut run_start = 0;
        let mut entry = start_pos;

        loop {
            let run_end = (run_start + 1..steps.len())
                .find(|&i| steps[i].1.is_some())
                .unwrap_or(steps.len());
            let run: Vec<NodeRef> = steps[run_start..run_end].iter().map(|s| s.0).collect();

            match steps.get(run_end).and_then(|s| s.1) {
                Some(link) => {
                    self.pull_run(&run, entry, link.start, filter, &mut points);
                    points.push(link.end);
                    entry = link.end;
                    run_start = run_end;
                }
                None => {
                    self.pull_run(&run, entry, goal_pos, filter, &mut points);
                    break;
                }
            }
        }

        points.dedup_by(|a, b| a.distance_squared(*b) < 1e-8);
        points
    }

    fn pull_run(
        &self,
        nodes: &[NodeRef],
        entry: Vec3,
        exit: Vec3,
        filter: &QueryFilter,
        points: &mut Vec<Vec3>,
    ) {
        let Some(last) = nodes.len().checked_sub(1) else {
            points.push(exit);
            return;
        };

        let mut anchor = 0;
        let mut anchor_pos = entry;
        loop {
            if anchor == last {
                points.push(exit);
                return;
            }

            let anchor_cost = self.node_cost(nodes[anchor], filter);
            let cap = |j: usize| anchor_cost.max(self.node_cost(nodes[j], filter));

            if self.visible(nodes[anchor], anchor_pos, exit, filter, cap(last)) {
                points.push(exit);
                return;
            }

            let mut next = anchor + 1;
            for j in anchor + 2..=last {
                let Some(target) = self.node_position(nodes[j]) else {
                    break;
                };
                if self.visible(nodes[anchor], anchor_pos, target, filter, cap(j)) {
                    next = j;
                } else {
                    break;
                }
            }

            anchor = next;
            match self.node_position(nodes[next]) {
                Some(pos) => {
                    anchor_pos = pos;
                    points.push(pos);
                }
                None => {
                    points.push(exit);
                    return;
                }
            }
        }
    }

    fn visible(
        &self,
        start: NodeRef,
        a: Vec3,
        b: Vec3,
        filter: &QueryFilter,
        max_cost: f32,
    ) -> bool {
        self.trace(start, a, b, filter, max_cost).reached
    }

    /// Follows the surface from `a` towards `b`, starting on node `start`
    fn trace(
        &self,
        start: NodeRef,
        a: Vec3,
        b: Vec3,
        filter: &QueryFilter,
        max_cost: f32,
    ) -> Trace {
        let Some(span) = self.span(start) else {
            return Trace {
                reached: false,
                t: 0.0,
                position: a,
            };
        };

        let (mut cx, mut cz) = self.node_cell(start);
        let mut y = span.y;
        let mut last = Trace {
            reached: false,
            t: 0.0,
            position: Vec3::new(a.x, y, a.z),
        };

        let cs = self.hf.cell_size;
        let steps = ((dist_2d(a, b) / cs) * TRACE_STEPS_PER_CELL).ceil().max(1.0) as usize;

        for i in 1..=steps {
            let t = i as f32 / steps as f32;
            let p = a.lerp(b, t);
            let Some((x, z)) = self.hf.cell_at(p) else {
                return last;
            };

            if (x, z) != (cx, cz) {
                let (ox, oz) = (cx as i64, cz as i64);
                let (dx, dz) = (x as i64 - ox, z as i64 - oz);
                if dx.abs() > 1 || dz.abs() > 1 {
                    return last;
                }
                if dx != 0
                    && dz != 0
                    && (self.step_to(ox + dx, oz, y).is_none()
                        || self.step_to(ox, oz + dz, y).is_none())
                {
                    return last;
                }
                let Some(next) = self.step_to(x as i64, z as i64, y) else {
                    return last;
                };
                if !self.node_passes(next, filter)
                    || self.node_cost(next, filter) > max_cost + 1e-6
                {
                    return last;
                }
                y = self.span(next).map_or(y, |s| s.y);
                cx = x;
                cz = z;
            }

            last.t = t;
            last.position = Vec3::new(p.x, y, p.z);
        }

        last.reached = true;
        last
    }

    pub fn raycast(&self, from: Vec3, to: Vec3, filter: &QueryFilter) -> RaycastHit {
        let Some((start, start_pos)) = self.nearest_node(from, self.query_extent(), filter)
        else {
            return RaycastHit {
                blocked: true,
                t: 0.0,
                position: from,
            };
        };
        let trace = self.trace(start, start_pos, to, filter, f32::MAX);
        RaycastHit {
            blocked: !trace.reached,
            t: trace.t,
            position: trace.position,
        }
    }

    /// Random passable point, optionally inside a disc connected to its centre
    pub fn random_point(
        &self,
        rand: &mut dyn FnMut() -> f32,
        around: Option<(Vec3, f32)>,
        filter: &QueryFilter,
    ) -> Option<Vec3> {
        let candidates: Vec<NodeRef> = match around {
            None => self
                .layer
                .nodes()
                .filter(|n| self.node_passes(*n, filter))
                .collect(),
            Some((origin, radius)) => self.nodes_in_disc(origin, radius, filter)?,
        };
        if candidates.is_empty() {
            return None;
        }

        let index = ((rand() * candidates.len() as f32) as usize).min(candidates.len() - 1);
        let node = candidates[index];
        let center = self.node_position(node)?;
        let half = self.hf.cell_size * 0.5;
        let point = center + Vec3::new((rand() * 2.0 - 1.0) * half, 0.0, (rand() * 2.0 - 1.0) * half);

        match around {
            Some((origin, radius)) if dist_2d(point, origin) > radius => {
                if dist_2d(center, origin) <= radius {
                    Some(center)
                } else {
                    self.closest_point_in_node(node, origin)
                }
            }
            _ => Some(point),
        }
    }

    /// Nodes reachable from `origin` whose cells touch the disc
    fn nodes_in_disc(&self, origin: Vec3, radius: f32, filter: &QueryFilter) -> Option<Vec<NodeRef>> {
        let (start, _) = self.nearest_node(origin, self.query_extent(), filter)?;
        let touches = |node: NodeRef| {
            self.closest_point_in_node(node, origin)
                .map_or(false, |q| dist_2d(q, origin) <= radius)
        };

        let mut found = vec![start];
        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            let links = self.layer.links.get(&node).into_iter().flatten();
            let next_nodes = self
                .neighbours(node)
                .into_iter()
                .flatten()
                .chain(links.filter(|l| filter.pass_filter(l.flags)).map(|l| l.to));
            for next in next_nodes {
                if !self.node_passes(next, filter) || !touches(next) || !visited.insert(next) {
                    continue;
                }
                found.push(next);
                queue.push_back(next);
            }
        }
        Some(found)
    }

    /// Wall segments near `center` on the floor closest to it
    pub fn local_boundary(&self, center: Vec3, range: f32) -> Vec<WallSegment> {
        let filter = QueryFilter::default();
        let Some((origin, _)) = self.nearest_node(center, self.query_extent(), &filter) else {
            return Vec::new();
        };
        let Some(floor_y) = self.span(origin).map(|s| s.y) else {
            return Vec::new();
        };

        let extent = Vec3::new(range, 0.0, range);
        let Some((xs, zs)) = self
            .hf
            .cell_range(&BoundingBox::new(center - extent, center + extent))
        else {
            return Vec::new();
        };

        let height = self.layer.agent.height;
        let mut segments: Vec<(f32, WallSegment)> = Vec::new();
        for z in zs {
            for x in xs.clone() {
                let cell = self.hf.cell_index(x, z);
                for (si, span) in self.hf.spans_at(cell).iter().enumerate() {
                    if !self.layer.is_passable(cell, si) || (span.y - floor_y).abs() > height {
                        continue;
                    }
                    let (min, max) = self.hf.cell_rect(x, z);
                    let y = span.y;
                    let edges = [
                        ((1, 0), Vec3::new(max.x, y, min.z), Vec3::new(max.x, y, max.z)),
                        ((0, 1), Vec3::new(max.x, y, max.z), Vec3::new(min.x, y, max.z)),
                        ((-1, 0), Vec3::new(min.x, y, max.z), Vec3::new(min.x, y, min.z)),
                        ((0, -1), Vec3::new(min.x, y, min.z), Vec3::new(max.x, y, min.z)),
                    ];
                    for ((dx, dz), a, b) in edges {
                        if self.step_to(x as i64 + dx, z as i64 + dz, y).is_some() {
                            continue;
                        }
                        let (d2, _) = dist_point_segment_sqr_2d(center, a, b);
                        if d2 <= range * range {
                            segments.push((d2, WallSegment { start: a, end: b }));
                        }
                    }
                }
            }
        }

        segments.sort_by(|a, b| a.0.total_cmp(&b.0));
        segments.truncate(MAX_BOUNDARY_SEGMENTS);
        segments.into_iter().map(|(_, s)| s).collect()
    }

    /// Off-mesh edges for every connection whose endpoints reach the layer
    pub fn build_links(&self, connections: &[Connection]) -> BTreeMap<NodeRef, Vec<Link>> {
        let filter = QueryFilter::default();
        let mut links: BTreeMap<NodeRef, Vec<Link>> = BTreeMap::new();

        for conn in connections {
            let reach = conn
                .radius
                .max(self.hf.cell_size)
                .max(self.settings.walkable_climb);
            let start = self.nearest_node(conn.start, reach, &filter);
            let end = self.nearest_node(conn.end, reach, &filter);
            let (Some((a, _)), Some((b, _))) = (start, end) else {
                log::debug!(
                    "Connection {} has no walkable endpoint for agent '{}'",
                    conn.id(),
                    self.layer.agent.name
                );
                continue;
            };
            if a == b {
                continue;
            }

            links.entry(a).or_default().push(Link {
                to: b,
                start: conn.start,
                end: conn.end,
                area: conn.area_id(),
                flags: conn.node_flags(),
            });
            if conn.bidirectional {
                links.entry(b).or_default().push(Link {
                    to: a,
                    start: conn.end,
                    end: conn.start,
                    area: conn.area_id(),
                    flags: conn.node_flags(),
                });
            }
        }

        links
    }
}
