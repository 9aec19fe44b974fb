//! Sampling-based local obstacle avoidance
//!
//! Candidate velocities are scored against nearby agents (circles) and walls
//! (segments). Each sample pays for deviating from the desired and current
//! velocity, for passing on the wrong side of an agent, and for an early time
//! of impact. The lowest penalty wins.

use navgraph_common::{dist_2d, dist_point_segment_sqr_2d, sqr, Vec3};
use serde::{Deserialize, Serialize};

/// Upper bound on directions per ring in the adaptive pattern
pub const MAX_PATTERN_DIVS: usize = 32;
/// Upper bound on rings in the adaptive pattern
pub const MAX_PATTERN_RINGS: usize = 4;

/// A moving agent seen as a circular obstacle
#[derive(Debug, Clone, Copy, Default)]
pub struct ObstacleCircle {
    pub position: Vec3,
    pub velocity: Vec3,
    pub desired_velocity: Vec3,
    pub radius: f32,
    // Direction towards the obstacle and the preferred passing side
    dp: Vec3,
    np: Vec3,
}

/// A wall segment near the agent
#[derive(Debug, Clone, Copy, Default)]
pub struct ObstacleSegment {
    pub p: Vec3,
    pub q: Vec3,
    touch: bool,
}

/// How candidate velocities are laid out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AvoidanceSampling {
    /// Rings of directions refined around the best sample
    #[default]
    Adaptive,
    /// A regular `grid_size` x `grid_size` grid
    Grid,
}

/// Weights and sampling pattern for one avoidance quality level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObstacleAvoidanceParams {
    /// Fraction of the desired velocity the sampling pattern is centred on
    pub vel_bias: f32,
    pub weight_desired_velocity: f32,
    pub weight_current_velocity: f32,
    pub weight_side: f32,
    pub weight_toi: f32,
    /// Time horizon in seconds for impact prediction
    pub horizon_time: f32,
    pub sampling: AvoidanceSampling,
    pub grid_size: u8,
    pub adaptive_divs: u8,
    pub adaptive_rings: u8,
    pub adaptive_depth: u8,
}

impl Default for ObstacleAvoidanceParams {
    fn default() -> Self {
        Self {
            vel_bias: 0.4,
            weight_desired_velocity: 2.0,
            weight_current_velocity: 0.75,
            weight_side: 0.75,
            weight_toi: 2.5,
            horizon_time: 2.5,
            sampling: AvoidanceSampling::Adaptive,
            grid_size: 33,
            adaptive_divs: 7,
            adaptive_rings: 2,
            adaptive_depth: 5,
        }
    }
}

impl ObstacleAvoidanceParams {
    fn with_pattern(divs: u8, rings: u8, depth: u8) -> Self {
        Self {
            adaptive_divs: divs,
            adaptive_rings: rings,
            adaptive_depth: depth,
            ..Self::default()
        }
    }

    pub fn low() -> Self {
        Self::with_pattern(5, 2, 1)
    }

    pub fn medium() -> Self {
        Self::with_pattern(5, 2, 2)
    }

    pub fn good() -> Self {
        Self::with_pattern(7, 2, 3)
    }

    pub fn high() -> Self {
        Self::with_pattern(7, 3, 3)
    }

    /// Quality presets indexed by `AgentParams::obstacle_avoidance_quality`
    pub fn presets() -> [Self; 4] {
        [Self::low(), Self::medium(), Self::good(), Self::high()]
    }
}

/// Reusable avoidance query with bounded obstacle buffers
#[derive(Debug, Clone)]
pub struct ObstacleAvoidanceQuery {
    params: ObstacleAvoidanceParams,
    inv_horizon_time: f32,
    inv_vmax: f32,
    max_circles: usize,
    circles: Vec<ObstacleCircle>,
    max_segments: usize,
    segments: Vec<ObstacleSegment>,
}

impl ObstacleAvoidanceQuery {
    pub fn new(max_circles: usize, max_segments: usize) -> Self {
        Self {
            params: ObstacleAvoidanceParams::default(),
            inv_horizon_time: 0.0,
            inv_vmax: 0.0,
            max_circles,
            circles: Vec::with_capacity(max_circles),
            max_segments,
            segments: Vec::with_capacity(max_segments),
        }
    }

    pub fn reset(&mut self) {
        self.circles.clear();
        self.segments.clear();
    }

    /// Adds a circle, ignored once the buffer is full
    pub fn add_circle(&mut self, position: Vec3, radius: f32, velocity: Vec3, desired_velocity: Vec3) {
        if self.circles.len() >= self.max_circles {
            return;
        }
        self.circles.push(ObstacleCircle {
            position,
            velocity,
            desired_velocity,
            radius,
            ..Default::default()
        });
    }

    /// Adds a wall segment, ignored once the buffer is full
    pub fn add_segment(&mut self, p: Vec3, q: Vec3) {
        if self.segments.len() >= self.max_segments {
            return;
        }
        self.segments.push(ObstacleSegment { p, q, touch: false });
    }

    pub fn circle_count(&self) -> usize {
        self.circles.len()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn circle(&self, i: usize) -> Option<&ObstacleCircle> {
        self.circles.get(i)
    }

    pub fn segment(&self, i: usize) -> Option<&ObstacleSegment> {
        self.segments.get(i)
    }

    fn begin(&mut self, position: Vec3, vmax: f32, desired_velocity: Vec3, params: &ObstacleAvoidanceParams) {
        self.prepare(position, desired_velocity);
        self.params = *params;
        self.inv_horizon_time = 1.0 / params.horizon_time;
        self.inv_vmax = if vmax > 0.0 { 1.0 / vmax } else { f32::MAX };
    }

    /// Picks a velocity with the pattern selected by `params.sampling`
    pub fn sample_velocity(
        &mut self,
        position: Vec3,
        radius: f32,
        vmax: f32,
        velocity: Vec3,
        desired_velocity: Vec3,
        params: &ObstacleAvoidanceParams,
    ) -> (Vec3, usize) {
        match params.sampling {
            AvoidanceSampling::Adaptive => self.sample_velocity_adaptive(
                position,
                radius,
                vmax,
                velocity,
                desired_velocity,
                params,
            ),
            AvoidanceSampling::Grid => {
                self.sample_velocity_grid(position, radius, vmax, velocity, desired_velocity, params)
            }
        }
    }

    /// Scores a regular grid of velocities around the biased desired velocity
    ///
    /// Returns the chosen velocity and the number of samples taken.
    pub fn sample_velocity_grid(
        &mut self,
        position: Vec3,
        radius: f32,
        vmax: f32,
        velocity: Vec3,
        desired_velocity: Vec3,
        params: &ObstacleAvoidanceParams,
    ) -> (Vec3, usize) {
        self.begin(position, vmax, desired_velocity, params);
        if params.grid_size < 2 {
            return (Vec3::ZERO, 0);
        }

        let cvx = desired_velocity.x * params.vel_bias;
        let cvz = desired_velocity.z * params.vel_bias;
        let cs = vmax * 2.0 * (1.0 - params.vel_bias) / (params.grid_size - 1) as f32;
        let half = (params.grid_size - 1) as f32 * cs * 0.5;

        let mut best = Vec3::ZERO;
        let mut min_penalty = f32::MAX;
        let mut samples = 0;
        for y in 0..params.grid_size {
            for x in 0..params.grid_size {
                let candidate = Vec3::new(
                    cvx + cs * x as f32 - half,
                    0.0,
                    cvz + cs * y as f32 - half,
                );
                if sqr(candidate.x) + sqr(candidate.z) > sqr(vmax + cs / 2.0) {
                    continue;
                }
                let penalty =
                    self.process_sample(candidate, position, radius, velocity, desired_velocity, min_penalty);
                samples += 1;
                if penalty < min_penalty {
                    min_penalty = penalty;
                    best = candidate;
                }
            }
        }
        (best, samples)
    }

    /// Scores rings of directions aligned with the desired velocity, refining
    /// around the best sample at each depth level
    pub fn sample_velocity_adaptive(
        &mut self,
        position: Vec3,
        radius: f32,
        vmax: f32,
        velocity: Vec3,
        desired_velocity: Vec3,
        params: &ObstacleAvoidanceParams,
    ) -> (Vec3, usize) {
        self.begin(position, vmax, desired_velocity, params);

        let pattern = sampling_pattern(
            desired_velocity,
            (params.adaptive_divs as usize).clamp(1, MAX_PATTERN_DIVS),
            (params.adaptive_rings as usize).clamp(1, MAX_PATTERN_RINGS),
        );

        let mut radius_scale = vmax * (1.0 - params.vel_bias);
        let mut result = Vec3::new(
            desired_velocity.x * params.vel_bias,
            0.0,
            desired_velocity.z * params.vel_bias,
        );
        let mut samples = 0;

        for _ in 0..params.adaptive_depth {
            let mut min_penalty = f32::MAX;
            let mut best = Vec3::ZERO;
            for &(px, pz) in &pattern {
                let candidate = Vec3::new(
                    result.x + px * radius_scale,
                    0.0,
                    result.z + pz * radius_scale,
                );
                if sqr(candidate.x) + sqr(candidate.z) > sqr(vmax + 0.001) {
                    continue;
                }
                let penalty =
                    self.process_sample(candidate, position, radius, velocity, desired_velocity, min_penalty);
                samples += 1;
                if penalty < min_penalty {
                    min_penalty = penalty;
                    best = candidate;
                }
            }
            result = best;
            radius_scale *= 0.5;
        }
        (result, samples)
    }

    fn prepare(&mut self, position: Vec3, desired_velocity: Vec3) {
        for circle in &mut self.circles {
            let mut dp = circle.position - position;
            dp.y = 0.0;
            let dp = dp.normalize_or_zero();
            let dv = circle.desired_velocity - desired_velocity;
            // Pass on the side the relative desired velocity already favours
            let area = dv.x * dp.z - dp.x * dv.z;
            circle.np = if area < 0.01 {
                Vec3::new(-dp.z, 0.0, dp.x)
            } else {
                Vec3::new(dp.z, 0.0, -dp.x)
            };
            circle.dp = dp;
        }

        for segment in &mut self.segments {
            let (d2, _) = dist_point_segment_sqr_2d(position, segment.p, segment.q);
            segment.touch = d2 < sqr(0.01);
        }
    }

    fn process_sample(
        &self,
        candidate: Vec3,
        position: Vec3,
        radius: f32,
        velocity: Vec3,
        desired_velocity: Vec3,
        min_penalty: f32,
    ) -> f32 {
        let p = &self.params;
        let vpen = p.weight_desired_velocity * dist_2d(candidate, desired_velocity) * self.inv_vmax;
        let vcpen = p.weight_current_velocity * dist_2d(candidate, velocity) * self.inv_vmax;

        // Bail out once the impact term alone cannot beat the best sample
        let remaining = min_penalty - vpen - vcpen;
        let threshold = (p.weight_toi / remaining - 0.1) * p.horizon_time;
        if threshold - p.horizon_time > -f32::EPSILON {
            return min_penalty;
        }

        let mut tmin = p.horizon_time;
        let mut side = 0.0;
        let mut sides = 0;

        for circle in &self.circles {
            let vab = candidate * 2.0 - circle.velocity - velocity;
            side += dot_2d(circle.dp, vab)
                .mul_add(0.5, 0.5)
                .min(dot_2d(circle.np, vab) * 2.0)
                .clamp(0.0, 1.0);
            sides += 1;

            let Some((mut htmin, htmax)) =
                sweep_circle_circle(position, radius, vab, circle.position, circle.radius)
            else {
                continue;
            };
            // Already overlapping, prefer leaving quickly
            if htmin < 0.0 && htmax > 0.0 {
                htmin = -htmin * 0.5;
            }
            if htmin >= 0.0 && htmin < tmin {
                tmin = htmin;
                if tmin < threshold {
                    return min_penalty;
                }
            }
        }

        for segment in &self.segments {
            let htmin = if segment.touch {
                let dir = segment.q - segment.p;
                let normal = Vec3::new(-dir.z, 0.0, dir.x);
                if dot_2d(normal, candidate) < 0.0 {
                    continue;
                }
                0.0
            } else {
                match intersect_ray_segment(position, candidate, segment.p, segment.q) {
                    Some(t) => t,
                    None => continue,
                }
            };
            // Walls are avoided less eagerly than agents
            let htmin = htmin * 2.0;
            if htmin < tmin {
                tmin = htmin;
                if tmin < threshold {
                    return min_penalty;
                }
            }
        }

        if sides > 0 {
            side /= sides as f32;
        }
        let spen = p.weight_side * side;
        let tpen = p.weight_toi * (1.0 / (0.1 + tmin * self.inv_horizon_time));
        vpen + vcpen + spen + tpen
    }
}

/// Unit directions for the adaptive pattern: a centre sample plus rings that
/// alternate between the desired direction and one rotated by half a division
fn sampling_pattern(desired_velocity: Vec3, divs: usize, rings: usize) -> Vec<(f32, f32)> {
    let da = std::f32::consts::TAU / divs as f32;
    let (sa, ca) = da.sin_cos();
    let rotate_cw = |(x, z): (f32, f32)| (x * ca + z * sa, -x * sa + z * ca);
    let rotate_ccw = |(x, z): (f32, f32)| (x * ca - z * sa, x * sa + z * ca);

    let dir = Vec3::new(desired_velocity.x, 0.0, desired_velocity.z).normalize_or_zero();
    let (hs, hc) = (da * 0.5).sin_cos();
    let directions = [(dir.x, dir.z), (dir.x * hc - dir.z * hs, dir.x * hs + dir.z * hc)];

    let mut pattern = Vec::with_capacity(divs * rings + 1);
    pattern.push((0.0, 0.0));
    for ring in 0..rings {
        let r = (rings - ring) as f32 / rings as f32;
        let (x, z) = directions[ring % 2];
        let first = (x * r, z * r);
        pattern.push(first);

        let mut right = first;
        let mut left = first;
        let mut i = 1;
        while i + 1 < divs {
            right = rotate_cw(right);
            left = rotate_ccw(left);
            pattern.push(right);
            pattern.push(left);
            i += 2;
        }
        if divs % 2 == 0 {
            pattern.push(rotate_ccw(left));
        }
    }
    pattern
}

fn dot_2d(a: Vec3, b: Vec3) -> f32 {
    a.x * b.x + a.z * b.z
}

fn perp_2d(u: Vec3, v: Vec3) -> f32 {
    u.z * v.x - u.x * v.z
}

/// Entry and exit times of circle 0 moving at `v` through circle 1
fn sweep_circle_circle(c0: Vec3, r0: f32, v: Vec3, c1: Vec3, r1: f32) -> Option<(f32, f32)> {
    const EPS: f32 = 0.0001;
    let s = c1 - c0;
    let r = r0 + r1;
    let c = dot_2d(s, s) - r * r;
    let a = dot_2d(v, v);
    if a < EPS {
        return None;
    }
    let b = dot_2d(v, s);
    let d = b * b - a * c;
    if d < 0.0 {
        return None;
    }
    let rd = d.sqrt();
    Some(((b - rd) / a, (b + rd) / a))
}

/// Time along the ray `ap + u * t` at which it crosses segment `bp..bq`
fn intersect_ray_segment(ap: Vec3, u: Vec3, bp: Vec3, bq: Vec3) -> Option<f32> {
    let v = bq - bp;
    let w = ap - bp;
    let d = perp_2d(u, v);
    if d.abs() < 1e-6 {
        return None;
    }
    let t = perp_2d(v, w) / d;
    if !(0.0..=1.0).contains(&t) {
        return None;
    }
    let s = perp_2d(u, w) / d;
    if !(0.0..=1.0).contains(&s) {
        return None;
    }
    Some(t)
}
