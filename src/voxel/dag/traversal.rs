//! Traversal engine - point queries and stackless ray marching
//!
//! The ray march keeps an explicit record of the node path from the root to
//! the current cell instead of recursing. Each step does one unit of work:
//! ascend out of cells the ray has left, descend one level into an occupied
//! octant, or jump the ray to the exit face of an empty cell. Empty cells high
//! in the tree are skipped in a single step regardless of their size.

use glam::{IVec3, UVec3, Vec3};
use rayon::prelude::*;

use crate::core::config::DagConfig;
use crate::core::types::Result;
use crate::math::aabb::Aabb;
use crate::math::ray::Ray;
use crate::math::region::Region;
use super::arena::NodeArena;
use super::index::SvdagIndex;
use super::node::NodeId;
use super::payload::Payload;

/// Payload at a voxel
pub fn point_query<P: Payload>(index: &SvdagIndex<P>, x: u32, y: u32, z: u32) -> Result<P> {
    index.get(x, y, z)
}

/// Termination bounds for one march
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarchLimits {
    /// Hits farther than this along the (normalized) ray are reported as misses
    pub max_distance: f32,
    /// Optional cap on traversal steps; exceeding it is a miss
    pub max_steps: Option<u32>,
}

impl Default for MarchLimits {
    fn default() -> Self {
        Self {
            max_distance: f32::INFINITY,
            max_steps: None,
        }
    }
}

impl MarchLimits {
    pub fn distance(max_distance: f32) -> Self {
        Self {
            max_distance,
            max_steps: None,
        }
    }

    /// Distance limit plus the step budget from a config
    pub fn from_config(max_distance: f32, config: &DagConfig) -> Self {
        Self {
            max_distance,
            max_steps: config.max_ray_steps,
        }
    }

    pub fn with_max_steps(self, max_steps: u32) -> Self {
        Self {
            max_steps: Some(max_steps),
            ..self
        }
    }
}

/// First non-empty leaf along a ray
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit<P> {
    /// Distance from the ray origin to the entry point
    pub t: f32,
    /// Entry point into the hit cell (the origin if it starts inside)
    pub position: Vec3,
    /// Voxel containing the entry point
    pub voxel: UVec3,
    pub payload: P,
    /// Tree level of the leaf that was reached (0 = root)
    pub depth: u8,
    /// Normal of the face the ray entered through, zero if it started inside
    pub normal: IVec3,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RayResult<P> {
    Hit(RayHit<P>),
    Miss,
}

impl<P> RayResult<P> {
    pub fn is_hit(&self) -> bool {
        matches!(self, RayResult::Hit(_))
    }

    pub fn hit(&self) -> Option<&RayHit<P>> {
        match self {
            RayResult::Hit(hit) => Some(hit),
            RayResult::Miss => None,
        }
    }
}

/// Progress of a resumable march
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MarchStatus<P> {
    Pending,
    Done(RayResult<P>),
}

/// Node covering a cube of voxels
#[derive(Clone, Copy, Debug)]
struct Frame {
    node: NodeId,
    origin: UVec3,
    size: u32,
}

impl Frame {
    fn contains(&self, cell: UVec3) -> bool {
        cell.cmpge(self.origin).all() && cell.cmplt(self.origin + self.size).all()
    }
}

/// Complete state of a march in progress. Holds no borrows, so it can be
/// parked between frames and resumed against the same root.
#[derive(Clone, Debug)]
pub struct MarchState {
    ray: Ray,
    root: NodeId,
    extent: u32,
    limits: MarchLimits,
    /// Distance travelled so far
    t: f32,
    /// Current point on the ray, snapped onto the last crossed face
    position: Vec3,
    normal: IVec3,
    path: Vec<Frame>,
    steps: u32,
    finished: bool,
}

impl MarchState {
    /// Start a march from `root` over a cube of `extent` voxels per axis.
    /// `ray.direction` is expected to be normalized (or zero).
    pub fn new(root: NodeId, extent: u32, ray: Ray, limits: MarchLimits) -> Self {
        let mut state = Self {
            ray,
            root,
            extent,
            limits,
            t: 0.0,
            position: ray.origin,
            normal: IVec3::ZERO,
            path: Vec::new(),
            steps: 0,
            finished: false,
        };

        if !ray.origin.is_finite() || !ray.direction.is_finite() {
            state.finished = true;
            return state;
        }

        let size = extent as f32;
        let bounds = Aabb::from_region(&Region::cube(UVec3::ZERO, extent));
        let Some((t_near, _)) = ray.intersects_aabb(&bounds) else {
            state.finished = true;
            return state;
        };

        if t_near > 0.0 {
            // Entering from outside: land exactly on the entry face
            let mut position = ray.at(t_near);
            for axis in 0..3 {
                let d = ray.direction[axis];
                if d == 0.0 {
                    continue;
                }
                let plane = if d > 0.0 { 0.0 } else { size };
                if (plane - ray.origin[axis]) * ray.inv_direction[axis] == t_near {
                    position[axis] = plane;
                    state.normal[axis] = if d > 0.0 { -1 } else { 1 };
                }
            }
            state.position = position.clamp(Vec3::ZERO, Vec3::splat(size));
            state.t = t_near;
        }
        state
    }

    /// Distance travelled so far
    pub fn distance(&self) -> f32 {
        self.t
    }

    /// Steps taken so far
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Current depth of the node path (0 before the first step)
    pub fn path_len(&self) -> usize {
        self.path.len()
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Perform one step. Returns the outcome once the march is decided.
    ///
    /// `arena` must be the arena `root` lives in, and the root must still be
    /// held by someone for the duration of the march.
    pub fn step<P: Payload>(&mut self, arena: &NodeArena<P>) -> Option<RayResult<P>> {
        if self.finished || self.t > self.limits.max_distance {
            return Some(self.miss());
        }
        if let Some(max_steps) = self.limits.max_steps {
            if self.steps >= max_steps {
                return Some(self.miss());
            }
        }
        self.steps += 1;

        let Some(cell) = self.current_cell() else {
            return Some(self.miss());
        };

        // Ascend out of cells the ray has left
        while let Some(top) = self.path.last() {
            if top.contains(cell) {
                break;
            }
            self.path.pop();
        }
        if self.path.is_empty() {
            self.path.push(Frame {
                node: self.root,
                origin: UVec3::ZERO,
                size: self.extent,
            });
        }
        let Some(&top) = self.path.last() else {
            return Some(self.miss());
        };

        let view = arena.get(top.node);
        match view.payload() {
            Some(payload) if !payload.is_empty() => {
                self.finished = true;
                let hit = RayHit {
                    t: self.t,
                    position: self.position,
                    voxel: cell,
                    payload,
                    depth: (self.path.len() - 1) as u8,
                    normal: self.normal,
                };
                log::trace!("Ray hit {:?} at t={} after {} steps", cell, self.t, self.steps);
                Some(RayResult::Hit(hit))
            }
            // Only an entirely empty root is an empty leaf
            Some(_) => self.skip_cell(top.origin, top.size),
            None => {
                let half = top.size / 2;
                let mid = top.origin + half;
                let octant = (cell.x >= mid.x) as u8
                    | ((cell.y >= mid.y) as u8) << 1
                    | ((cell.z >= mid.z) as u8) << 2;
                let child_origin = Region::child_octant(top.origin, half, octant);
                match view.child(octant) {
                    Some(child) => {
                        self.path.push(Frame {
                            node: child,
                            origin: child_origin,
                            size: half,
                        });
                        None
                    }
                    None => self.skip_cell(child_origin, half),
                }
            }
        }
    }

    /// Step until the outcome is known
    pub fn run<P: Payload>(&mut self, arena: &NodeArena<P>) -> RayResult<P> {
        loop {
            if let Some(result) = self.step(arena) {
                return result;
            }
        }
    }

    fn miss<P>(&mut self) -> RayResult<P> {
        if !self.finished {
            log::trace!("Ray missed at t={} after {} steps", self.t, self.steps);
        }
        self.finished = true;
        RayResult::Miss
    }

    /// Voxel the ray is in. Points on a face belong to the cell the ray is
    /// heading into; `None` once the ray has left the volume.
    fn current_cell(&self) -> Option<UVec3> {
        let mut cell = UVec3::ZERO;
        for axis in 0..3 {
            let p = self.position[axis];
            let floor = p.floor();
            let coord = if p == floor && self.ray.direction[axis] < 0.0 {
                floor as i64 - 1
            } else {
                floor as i64
            };
            if coord < 0 || coord >= self.extent as i64 {
                return None;
            }
            cell[axis] = coord as u32;
        }
        Some(cell)
    }

    /// Move the ray to the exit face of an empty cell
    fn skip_cell<P>(&mut self, origin: UVec3, size: u32) -> Option<RayResult<P>> {
        let lo = origin.as_vec3();
        let hi = lo + Vec3::splat(size as f32);

        let mut exits = [f32::INFINITY; 3];
        for axis in 0..3 {
            let d = self.ray.direction[axis];
            let plane = if d > 0.0 {
                hi[axis]
            } else if d < 0.0 {
                lo[axis]
            } else {
                continue;
            };
            exits[axis] = (plane - self.ray.origin[axis]) * self.ray.inv_direction[axis];
        }
        let t_exit = exits[0].min(exits[1]).min(exits[2]);
        if !t_exit.is_finite() {
            // Stationary ray inside an empty cell
            return Some(self.miss());
        }

        // Keep the point on the exit face of this cell despite rounding
        let mut position = self.ray.at(t_exit).clamp(lo, hi);
        let mut normal = IVec3::ZERO;
        for axis in 0..3 {
            if exits[axis] == t_exit {
                let d = self.ray.direction[axis];
                position[axis] = if d > 0.0 { hi[axis] } else { lo[axis] };
                normal[axis] = if d > 0.0 { -1 } else { 1 };
            }
        }

        self.position = position;
        self.normal = normal;
        self.t = t_exit.max(self.t);
        None
    }
}

/// Resumable march over a snapshot of an index.
///
/// Owns a clone of the index so the snapshot stays alive while the march is
/// parked; edits made elsewhere in the meantime are not observed. Dropping a
/// marcher midway has no side effects beyond releasing that snapshot.
pub struct RayMarcher<P: Payload> {
    index: SvdagIndex<P>,
    state: MarchState,
    outcome: Option<RayResult<P>>,
}

impl<P: Payload> RayMarcher<P> {
    /// Prepare a march; the ray direction is normalized here
    pub fn new(index: &SvdagIndex<P>, ray: Ray, limits: MarchLimits) -> Self {
        let ray = Ray::normalized(ray.origin, ray.direction);
        Self {
            state: MarchState::new(index.root_id(), index.extent(), ray, limits),
            index: index.clone(),
            outcome: None,
        }
    }

    /// Single step
    pub fn step(&mut self) -> MarchStatus<P> {
        self.advance(1)
    }

    /// Up to `budget` steps under one read lock
    pub fn advance(&mut self, budget: u32) -> MarchStatus<P> {
        if let Some(outcome) = self.outcome {
            return MarchStatus::Done(outcome);
        }
        let arena = self.index.store().read();
        for _ in 0..budget {
            if let Some(result) = self.state.step(&arena) {
                self.outcome = Some(result);
                return MarchStatus::Done(result);
            }
        }
        MarchStatus::Pending
    }

    /// Finish the march
    pub fn run(mut self) -> RayResult<P> {
        loop {
            if let MarchStatus::Done(result) = self.advance(u32::MAX) {
                return result;
            }
        }
    }

    pub fn state(&self) -> &MarchState {
        &self.state
    }

    pub fn is_done(&self) -> bool {
        self.outcome.is_some()
    }
}

/// First non-empty voxel along a ray within `max_distance`
pub fn ray_march<P: Payload>(
    index: &SvdagIndex<P>,
    origin: Vec3,
    direction: Vec3,
    max_distance: f32,
) -> RayResult<P> {
    ray_march_with(index, Ray::new(origin, direction), MarchLimits::distance(max_distance))
}

/// `ray_march` with full limits
pub fn ray_march_with<P: Payload>(index: &SvdagIndex<P>, ray: Ray, limits: MarchLimits) -> RayResult<P> {
    let ray = Ray::normalized(ray.origin, ray.direction);
    let arena = index.store().read();
    MarchState::new(index.root_id(), index.extent(), ray, limits).run(&arena)
}

/// March many rays in parallel against one snapshot
pub fn ray_march_batch<P: Payload>(
    index: &SvdagIndex<P>,
    rays: &[Ray],
    limits: MarchLimits,
) -> Vec<RayResult<P>> {
    let guard = index.store().read();
    let arena: &NodeArena<P> = &guard;
    let (root, extent) = (index.root_id(), index.extent());
    rays.par_iter()
        .map(|ray| {
            let ray = Ray::normalized(ray.origin, ray.direction);
            MarchState::new(root, extent, ray, limits).run(arena)
        })
        .collect()
}
