//! Voxel SDF volume: a grid³ lattice over the volume world transform holding, per voxel, the
//! signed distance to the nearest surface found so far, the owning triangle and the hit
//! barycentrics.
//!
//! The volume is baked over `sample_budget` warm-up frames, each casting a few rays per voxel
//! along a spherical Fibonacci set and keeping only improving hits. After warm-up only voxels
//! tied to dynamic meshes are touched:
//!
//! - voxels owned by a dynamic mesh are recomputed from scratch, keeping the old value when no
//!   ray finds a surface;
//! - voxels inside the swept bound of a dynamic mesh are refined monotonically;
//! - everything else is left bit-identical.
//!
//! The kernels here are the CPU reference; `cs_build` / `cs_update` in `shaders/sdf.wgsl` mirror them.

use bytemuck::{Pod, Zeroable};
use cgmath::InnerSpace;

use crate::accel::trace_closest;
use crate::backend::SceneView;
use crate::math::{fibonacci_direction, rows_point, rows_scale, Aabb, Vec3};
use crate::mesh::DYNAMIC_NONE;

pub const SDF_EMPTY: f32 = f32::MAX;
pub const VOXEL_NONE: u32 = u32::MAX;

const PRIMITIVE_BITS: u32 = 24;
const PRIMITIVE_MASK: u32 = (1 << PRIMITIVE_BITS) - 1;

/// Distances are clamped to the lattice diagonal when sampled, so empty voxels read as "far".
pub const MAX_LATTICE_DISTANCE: f32 = 3.464_101_6;

pub const SHADOW_STEPS: u32 = 64;
/// Penumbra sharpness of the sphere-traced soft shadow.
pub const SHADOW_SHARPNESS: f32 = 8.0;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Voxel {
    /// Volume-local units; negative inside geometry.
    pub distance: f32,
    /// `(mesh << 24) | primitive`, or [`VOXEL_NONE`].
    pub owner: u32,
    /// Two unorm16 weights of the second and third triangle vertex.
    pub barycentrics: u32,
}

impl Voxel {
    pub const EMPTY: Voxel = Voxel { distance: SDF_EMPTY, owner: VOXEL_NONE, barycentrics: 0 };

    pub fn is_empty(&self) -> bool {
        self.owner == VOXEL_NONE
    }

    pub fn mesh(&self) -> Option<u32> {
        (!self.is_empty()).then(|| unpack_owner(self.owner).0)
    }

    pub fn primitive(&self) -> Option<u32> {
        (!self.is_empty()).then(|| unpack_owner(self.owner).1)
    }

    pub fn barycentrics(&self) -> [f32; 2] {
        unpack_barycentrics(self.barycentrics)
    }
}

pub fn pack_owner(mesh: u32, primitive: u32) -> u32 {
    (mesh << PRIMITIVE_BITS) | (primitive & PRIMITIVE_MASK)
}

pub fn unpack_owner(owner: u32) -> (u32, u32) {
    (owner >> PRIMITIVE_BITS, owner & PRIMITIVE_MASK)
}

/// Same bit layout as WGSL `pack2x16unorm`.
pub fn pack_barycentrics(b: [f32; 2]) -> u32 {
    let q = |x: f32| (x.clamp(0.0, 1.0) * 65535.0).round() as u32;
    q(b[0]) | (q(b[1]) << 16)
}

pub fn unpack_barycentrics(packed: u32) -> [f32; 2] {
    [(packed & 0xffff) as f32 / 65535.0, (packed >> 16) as f32 / 65535.0]
}

/// Build/refresh state of the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdfPhase {
    /// Baking; `sample_index` counts warm-up frames from 0.
    Warmup { sample_index: u32 },
    Steady,
}

/// WARMUP for the first `sample_budget` frames, STEADY forever after.
#[derive(Debug, Clone)]
pub struct SdfSchedule {
    sample_budget: u32,
    frames: u64,
}

impl SdfSchedule {
    pub fn new(sample_budget: u32) -> Self {
        Self { sample_budget, frames: 0 }
    }

    pub fn phase(&self) -> SdfPhase {
        if self.frames < self.sample_budget as u64 {
            SdfPhase::Warmup { sample_index: self.frames as u32 }
        } else {
            SdfPhase::Steady
        }
    }

    /// Count one frame. Returns true on the frame that completes warm-up.
    pub fn advance(&mut self) -> bool {
        self.frames += 1;
        self.frames == self.sample_budget as u64
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

pub fn voxel_count(grid: u32) -> usize {
    (grid as usize).pow(3)
}

pub fn voxel_index(x: u32, y: u32, z: u32, grid: u32) -> usize {
    x as usize + y as usize * grid as usize + z as usize * (grid as usize).pow(2)
}

pub fn voxel_coords(index: usize, grid: u32) -> [u32; 3] {
    let g = grid as usize;
    [(index % g) as u32, ((index / g) % g) as u32, (index / (g * g)) as u32]
}

/// Voxel centre in volume-local space, inside [-1, 1]^3.
pub fn voxel_center_local(index: usize, grid: u32) -> Vec3 {
    let [x, y, z] = voxel_coords(index, grid);
    let c = |v: u32| (v as f32 + 0.5) / grid as f32 * 2.0 - 1.0;
    Vec3::new(c(x), c(y), c(z))
}

fn voxel_center_world(scene: &SceneView, index: usize) -> Vec3 {
    let c = scene.constants;
    rows_point(&c.volume_world, voxel_center_local(index, c.grid_size))
}

/// Cast this frame's rays from `origin`, keeping `best` unless a hit is strictly closer.
fn refine(scene: &SceneView, origin: Vec3, mut best: Voxel) -> Voxel {
    let c = scene.constants;
    let t_max = c.query_distance * c.volume_radius;
    for r in 0..c.ray_count {
        let dir = fibonacci_direction(c.sample_index.wrapping_mul(c.ray_count).wrapping_add(r), c.direction_count);
        let Some(hit) = trace_closest(scene, origin, dir, t_max) else {
            continue;
        };
        let d = hit.t / c.volume_radius;
        if d < best.distance.abs() {
            best = Voxel {
                distance: if hit.front_face { d } else { -d },
                owner: pack_owner(hit.mesh, hit.primitive),
                barycentrics: pack_barycentrics(hit.barycentrics),
            };
        }
    }
    best
}

/// Warm-up kernel for one voxel.
pub fn build_voxel(scene: &SceneView, index: usize, prev: Voxel) -> Voxel {
    refine(scene, voxel_center_world(scene, index), prev)
}

/// Steady-state kernel for one voxel.
pub fn update_voxel(scene: &SceneView, index: usize, prev: Voxel) -> Voxel {
    let p = voxel_center_world(scene, index);
    let owner_dynamic = prev
        .mesh()
        .and_then(|m| scene.meshes.get(m as usize))
        .is_some_and(|m| m.dynamic_slot != DYNAMIC_NONE);
    if owner_dynamic {
        let fresh = refine(scene, p, Voxel::EMPTY);
        return if fresh.is_empty() { prev } else { fresh };
    }
    let c = scene.constants;
    let margin = 3f32.sqrt() * c.volume_radius / c.grid_size as f32;
    if scene.dynamic_list.iter().any(|&m| swept_bounds(scene, m, margin).contains(p)) {
        return refine(scene, p, prev);
    }
    prev
}

/// World box covering the mesh's bounding sphere under last frame's and this frame's transform.
pub fn swept_bounds(scene: &SceneView, mesh: u32, margin: f32) -> Aabb {
    let (Some(info), Some(obj)) = (scene.meshes.get(mesh as usize), scene.objects.get(mesh as usize)) else {
        return Aabb::empty();
    };
    let b = info.bound;
    let sphere = |rows| {
        let c = rows_point(rows, Vec3::new(b[0], b[1], b[2]));
        Aabb::new(c, c).expanded(b[3] * rows_scale(rows))
    };
    sphere(&obj.prev_world).union(&sphere(&obj.world)).expanded(margin)
}

/// Trilinear distance at a volume-local point; outside the lattice adds the distance to it.
pub fn sample_distance(volume: &[Voxel], grid: u32, local: Vec3) -> f32 {
    let g = grid as f32;
    let coord = |x: f32| ((x + 1.0) * 0.5 * g - 0.5).clamp(0.0, g - 1.0);
    let f = [coord(local.x), coord(local.y), coord(local.z)];
    let lo = f.map(|x| x.floor() as u32);
    let hi = lo.map(|x| (x + 1).min(grid - 1));
    let t = [f[0] - lo[0] as f32, f[1] - lo[1] as f32, f[2] - lo[2] as f32];
    let d = |x: u32, y: u32, z: u32| {
        volume
            .get(voxel_index(x, y, z, grid))
            .map_or(MAX_LATTICE_DISTANCE, |v| v.distance.clamp(-MAX_LATTICE_DISTANCE, MAX_LATTICE_DISTANCE))
    };
    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    let x00 = lerp(d(lo[0], lo[1], lo[2]), d(hi[0], lo[1], lo[2]), t[0]);
    let x10 = lerp(d(lo[0], hi[1], lo[2]), d(hi[0], hi[1], lo[2]), t[0]);
    let x01 = lerp(d(lo[0], lo[1], hi[2]), d(hi[0], lo[1], hi[2]), t[0]);
    let x11 = lerp(d(lo[0], hi[1], hi[2]), d(hi[0], hi[1], hi[2]), t[0]);
    let inside = lerp(lerp(x00, x10, t[1]), lerp(x01, x11, t[1]), t[2]);
    let outside = Vec3::new(
        (local.x.abs() - 1.0).max(0.0),
        (local.y.abs() - 1.0).max(0.0),
        (local.z.abs() - 1.0).max(0.0),
    );
    inside + outside.magnitude()
}

/// Sphere-traced visibility from `from` towards `to` (volume-local), stopping `stop` short of it.
/// 0 = blocked, 1 = clear, in between = penumbra.
pub fn soft_shadow(volume: &[Voxel], grid: u32, from: Vec3, to: Vec3, stop: f32) -> f32 {
    let voxel = 2.0 / grid as f32;
    let hit_eps = 1.0 / grid as f32;
    let delta = to - from;
    let len = delta.magnitude();
    if len <= stop {
        return 1.0;
    }
    let dir = delta / len;
    let end = len - stop;
    let mut t = 1.5 * voxel;
    let mut vis = 1.0f32;
    for _ in 0..SHADOW_STEPS {
        if t >= end {
            break;
        }
        let d = sample_distance(volume, grid, from + dir * t);
        if d < hit_eps {
            return 0.0;
        }
        vis = vis.min(SHADOW_SHARPNESS * d / t);
        t += d.max(0.5 * voxel);
    }
    vis.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MeshInfo;
    use crate::frame::{FrameConstants, PerObject};
    use crate::math::IDENTITY_ROWS;

    fn slab(grid: u32, half_thickness: f32) -> Vec<Voxel> {
        (0..voxel_count(grid))
            .map(|i| Voxel {
                distance: voxel_center_local(i, grid).x.abs() - half_thickness,
                owner: pack_owner(0, 0),
                barycentrics: 0,
            })
            .collect()
    }

    #[test]
    fn owner_and_barycentric_packing() {
        let v = Voxel { distance: -0.1, owner: pack_owner(7, 123_456), barycentrics: pack_barycentrics([0.25, 0.5]) };
        assert_eq!(v.mesh(), Some(7));
        assert_eq!(v.primitive(), Some(123_456));
        let [u, w] = v.barycentrics();
        assert!((u - 0.25).abs() < 1e-4 && (w - 0.5).abs() < 1e-4);
        assert_eq!(Voxel::EMPTY.mesh(), None);
        assert_eq!(pack_barycentrics([1.0, 0.0]), 0xffff);
    }

    #[test]
    fn schedule_leaves_warmup_once() {
        let mut s = SdfSchedule::new(3);
        assert_eq!(s.phase(), SdfPhase::Warmup { sample_index: 0 });
        assert!(!s.advance());
        assert!(!s.advance());
        assert_eq!(s.phase(), SdfPhase::Warmup { sample_index: 2 });
        assert!(s.advance());
        for _ in 0..10 {
            assert_eq!(s.phase(), SdfPhase::Steady);
            assert!(!s.advance());
        }
    }

    #[test]
    fn voxel_centers_follow_x_major_layout() {
        let g = 4;
        assert_eq!(voxel_coords(voxel_index(1, 2, 3, g), g), [1, 2, 3]);
        assert_eq!(voxel_center_local(0, g), Vec3::new(-0.75, -0.75, -0.75));
        assert_eq!(voxel_center_local(voxel_count(g) - 1, g), Vec3::new(0.75, 0.75, 0.75));
    }

    #[test]
    fn empty_volume_samples_far_and_grows_outside() {
        let volume = vec![Voxel::EMPTY; voxel_count(4)];
        assert_eq!(sample_distance(&volume, 4, Vec3::new(0.0, 0.0, 0.0)), MAX_LATTICE_DISTANCE);
        let outside = sample_distance(&volume, 4, Vec3::new(2.0, 0.0, 0.0));
        assert!((outside - (MAX_LATTICE_DISTANCE + 1.0)).abs() < 1e-5);
    }

    #[test]
    fn wall_blocks_crossing_path_but_not_parallel_path() {
        let grid = 8;
        let volume = slab(grid, 0.1);
        let blocked = soft_shadow(&volume, grid, Vec3::new(-0.6, 0.0, 0.0), Vec3::new(0.6, 0.0, 0.0), 0.05);
        assert_eq!(blocked, 0.0);
        let clear = soft_shadow(&volume, grid, Vec3::new(-0.6, -0.6, 0.0), Vec3::new(-0.6, 0.6, 0.0), 0.05);
        assert!(clear > 0.5);
    }

    #[test]
    fn swept_bounds_cover_both_poses() {
        let constants = FrameConstants::default();
        let meshes = [MeshInfo { bound: [0.0, 0.0, 0.0, 0.5], ..Default::default() }];
        let mut world = IDENTITY_ROWS;
        world[0][3] = 2.0;
        let objects = [PerObject { world, world_it: IDENTITY_ROWS, prev_world: IDENTITY_ROWS }];
        let scene = SceneView {
            constants: &constants,
            vertices: &[],
            indices: &[],
            meshes: &meshes,
            subsets: &[],
            nodes: &[],
            instances: &[],
            objects: &objects,
            lights: &[],
            dynamic_list: &[0],
        };
        let b = swept_bounds(&scene, 0, 0.1);
        assert!((b.min.x + 0.6).abs() < 1e-6 && (b.max.x - 2.6).abs() < 1e-6);
        assert!((b.max.y - 0.6).abs() < 1e-6);
        assert!(swept_bounds(&scene, 3, 0.1).is_empty());
    }
}
