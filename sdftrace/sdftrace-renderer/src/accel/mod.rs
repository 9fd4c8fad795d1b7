//! Acceleration structure manager: one bottom-level BVH per mesh over its object-space
//! triangles and one top-level BVH over per-instance world bounds, all living in one arena.
//!
//! Structures are built on the CPU and written into the arena buffer; ray queries on the device
//! traverse the same node layout. Only the top level changes after the first build: `refit_top`
//! recomputes instance bounds in place, or rebuilds when the instance count changes.

mod arena;
pub mod bvh;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

pub use arena::{AccelArena, ArenaSlot, StructureId, ARENA_ALIGNMENT};
pub use bvh::{BvhNode, NODE_BYTES};

use crate::backend::SceneView;
use crate::error::{Error, Result};
use crate::math::{intersect_triangle, rows_point, rows_vector, Aabb, Rows3x4, Vec3};

bitflags! {
    /// Build options of a structure.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BuildFlags: u32 {
        /// Keep topology stable so the structure can be refit in place.
        const ALLOW_UPDATE = 1 << 0;
        const PREFER_FAST_TRACE = 1 << 1;
        const PREFER_FAST_BUILD = 1 << 2;
    }
}

bitflags! {
    /// Per-geometry flags, copied onto every instance of the mesh.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GeometryFlags: u32 {
        /// No subset needs alpha evaluation during traversal.
        const OPAQUE = 1 << 0;
    }
}

/// Sizes a structure needs before it can be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrebuildInfo {
    pub result_bytes: u64,
    pub scratch_bytes: u64,
    pub update_scratch_bytes: u64,
}

/// Top-level instance. World-inverse rows carry rays into object space without renormalising,
/// so hit distances stay in world units.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct InstanceRecord {
    pub world: Rows3x4,
    pub world_inv: Rows3x4,
    pub blas_root: u32,
    pub mesh: u32,
    pub mask: u32,
    pub flags: u32,
}

/// Nodes to write at an arena region.
#[derive(Debug, Clone)]
pub struct AccelWrite {
    pub id: StructureId,
    pub slot: ArenaSlot,
    pub nodes: Vec<BvhNode>,
}

/// Triangle geometry of one mesh, in object space.
pub struct GeometryDesc<'a> {
    pub positions: &'a [[f32; 3]],
    pub indices: &'a [u32],
    pub flags: GeometryFlags,
}

impl GeometryDesc<'_> {
    pub fn primitive_count(&self) -> usize {
        self.indices.len() / 3
    }

    fn primitive_bounds(&self) -> Vec<Aabb> {
        self.indices
            .chunks_exact(3)
            .map(|t| Aabb::from_points(t.iter().map(|&i| Vec3::from(self.positions[i as usize]))))
            .collect()
    }
}

fn rows_bounds(rows: &Rows3x4, b: &Aabb) -> Aabb {
    if b.is_empty() {
        return *b;
    }
    Aabb::from_points(b.corners().iter().map(|&c| rows_point(rows, c)))
}

#[derive(Debug)]
struct BottomLevel {
    slot: ArenaSlot,
    bounds: Aabb,
    primitive_count: usize,
    flags: GeometryFlags,
}

#[derive(Debug)]
struct TopLevel {
    slot: ArenaSlot,
    nodes: Vec<BvhNode>,
    instance_count: usize,
    flags: BuildFlags,
}

#[derive(Debug)]
pub struct AccelManager {
    arena: AccelArena,
    bottoms: Vec<Option<BottomLevel>>,
    top: Option<TopLevel>,
}

impl AccelManager {
    pub fn new(budget_bytes: u64) -> Self {
        Self { arena: AccelArena::new(budget_bytes), bottoms: Vec::new(), top: None }
    }

    pub fn prebuild_bottom(geometry: &GeometryDesc) -> PrebuildInfo {
        let nodes = bvh::node_count(geometry.primitive_count()) as u64;
        let prims = geometry.primitive_count() as u64;
        PrebuildInfo {
            result_bytes: nodes * NODE_BYTES,
            // primitive references plus their bounds
            scratch_bytes: prims * (4 + 24),
            update_scratch_bytes: 0,
        }
    }

    pub fn prebuild_top(instance_count: usize, flags: BuildFlags) -> PrebuildInfo {
        let nodes = bvh::node_count(instance_count) as u64;
        let scratch = instance_count as u64 * (4 + 24);
        PrebuildInfo {
            result_bytes: nodes * NODE_BYTES,
            scratch_bytes: if flags.contains(BuildFlags::PREFER_FAST_BUILD) { scratch } else { scratch * 3 / 2 },
            update_scratch_bytes: if flags.contains(BuildFlags::ALLOW_UPDATE) { instance_count as u64 * 24 } else { 0 },
        }
    }

    /// Reserve destination storage for a mesh's bottom-level structure.
    pub fn allocate_bottom(&mut self, mesh: u32, info: &PrebuildInfo) -> Result<ArenaSlot> {
        self.arena.reserve(StructureId::Bottom(mesh), info.result_bytes)
    }

    pub fn allocate_top(&mut self, info: &PrebuildInfo) -> Result<ArenaSlot> {
        self.arena.reserve(StructureId::Top, info.result_bytes)
    }

    pub fn build_bottom(&mut self, mesh: u32, geometry: &GeometryDesc) -> Result<AccelWrite> {
        let slot = self
            .arena
            .slot(StructureId::Bottom(mesh))
            .ok_or_else(|| Error::Scene(format!("bottom-level structure {} built before allocation", mesh)))?;
        let bounds = geometry.primitive_bounds();
        let nodes = bvh::build(&bounds);
        check_fits(&slot, nodes.len())?;
        let idx = mesh as usize;
        if self.bottoms.len() <= idx {
            self.bottoms.resize_with(idx + 1, || None);
        }
        self.bottoms[idx] = Some(BottomLevel {
            slot,
            bounds: nodes[0].bounds(),
            primitive_count: geometry.primitive_count(),
            flags: geometry.flags,
        });
        Ok(AccelWrite { id: StructureId::Bottom(mesh), slot, nodes })
    }

    /// First node of the mesh's bottom-level structure in the arena.
    pub fn blas_root(&self, mesh: u32) -> Option<u32> {
        self.bottom(mesh).map(|b| b.slot.first_element(NODE_BYTES))
    }

    pub fn bottom_flags(&self, mesh: u32) -> Option<GeometryFlags> {
        self.bottom(mesh).map(|b| b.flags)
    }

    pub fn bottom_primitive_count(&self, mesh: u32) -> Option<usize> {
        self.bottom(mesh).map(|b| b.primitive_count)
    }

    fn bottom(&self, mesh: u32) -> Option<&BottomLevel> {
        self.bottoms.get(mesh as usize).and_then(|b| b.as_ref())
    }

    pub fn tlas_root(&self) -> Option<u32> {
        self.top.as_ref().map(|t| t.slot.first_element(NODE_BYTES))
    }

    fn instance_bounds(&self, instances: &[InstanceRecord]) -> Result<Vec<Aabb>> {
        instances
            .iter()
            .map(|inst| {
                let b = self
                    .bottom(inst.mesh)
                    .ok_or_else(|| Error::Scene(format!("instance of unbuilt mesh {}", inst.mesh)))?;
                Ok(rows_bounds(&inst.world, &b.bounds))
            })
            .collect()
    }

    pub fn build_top(&mut self, instances: &[InstanceRecord], flags: BuildFlags) -> Result<AccelWrite> {
        let slot = self
            .arena
            .slot(StructureId::Top)
            .ok_or_else(|| Error::Scene("top-level structure built before allocation".to_string()))?;
        let bounds = self.instance_bounds(instances)?;
        let nodes = bvh::build(&bounds);
        check_fits(&slot, nodes.len())?;
        self.top = Some(TopLevel { slot, nodes: nodes.clone(), instance_count: instances.len(), flags });
        Ok(AccelWrite { id: StructureId::Top, slot, nodes })
    }

    /// Refit the top level for moved instances; rebuild if the instance count changed or the
    /// structure was not built for updates.
    pub fn refit_top(&mut self, instances: &[InstanceRecord]) -> Result<AccelWrite> {
        let bounds = self.instance_bounds(instances)?;
        let top = self.top.as_mut().ok_or_else(|| Error::Scene("refit before the first top-level build".to_string()))?;
        if top.instance_count == instances.len() && top.flags.contains(BuildFlags::ALLOW_UPDATE) {
            bvh::refit(&mut top.nodes, &bounds);
            return Ok(AccelWrite { id: StructureId::Top, slot: top.slot, nodes: top.nodes.clone() });
        }
        log::debug!("top-level instance count {} -> {}, rebuilding", top.instance_count, instances.len());
        let flags = top.flags;
        let info = Self::prebuild_top(instances.len(), flags);
        self.allocate_top(&info)?;
        self.build_top(instances, flags)
    }

    pub fn arena(&self) -> &AccelArena {
        &self.arena
    }
}

fn check_fits(slot: &ArenaSlot, nodes: usize) -> Result<()> {
    let bytes = nodes as u64 * NODE_BYTES;
    if bytes > slot.size {
        return Err(Error::Allocation { resource: "acceleration structure", requested: bytes, available: slot.size });
    }
    Ok(())
}

/// Closest hit of a world-space ray against the scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub t: f32,
    pub mesh: u32,
    pub primitive: u32,
    /// Weights of the second and third triangle vertex.
    pub barycentrics: [f32; 2],
    pub front_face: bool,
}

pub fn trace_closest(scene: &SceneView, origin: Vec3, dir: Vec3, t_max: f32) -> Option<RayHit> {
    let mut best: Option<RayHit> = None;
    bvh::traverse(scene.nodes, scene.constants.tlas_root as usize, origin, dir, t_max, |instance, t_limit| {
        let inst = scene.instances.get(instance as usize)?;
        let o = rows_point(&inst.world_inv, origin);
        let d = rows_vector(&inst.world_inv, dir);
        let opaque = GeometryFlags::from_bits_truncate(inst.flags).contains(GeometryFlags::OPAQUE);
        let mut closest: Option<RayHit> = None;
        bvh::traverse(scene.nodes, inst.blas_root as usize, o, d, t_limit, |prim, t| {
            let tri = scene.triangle(inst.mesh, prim)?;
            let hit = intersect_triangle(o, d, tri.positions[0], tri.positions[1], tri.positions[2], t)?;
            if !opaque && !scene.primitive_visible(inst.mesh, prim) {
                return None;
            }
            closest = Some(RayHit {
                t: hit.t,
                mesh: inst.mesh,
                primitive: prim,
                barycentrics: [hit.u, hit.v],
                front_face: hit.front_face,
            });
            Some(hit.t)
        });
        let hit = closest?;
        best = Some(hit);
        Some(hit.t)
    });
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::shapes;

    fn box_geometry(mesh: &crate::mesh::LoadedMesh) -> GeometryDesc<'_> {
        GeometryDesc { positions: &mesh.positions, indices: &mesh.indices, flags: GeometryFlags::OPAQUE }
    }

    fn instance(mesh: u32, x: f32) -> InstanceRecord {
        let mut world = crate::math::IDENTITY_ROWS;
        world[0][3] = x;
        let mut world_inv = crate::math::IDENTITY_ROWS;
        world_inv[0][3] = -x;
        InstanceRecord { world, world_inv, blas_root: 0, mesh, mask: 0xff, flags: GeometryFlags::OPAQUE.bits() }
    }

    #[test]
    fn prebuild_estimates_cover_the_build() {
        let cube = shapes::unit_box();
        let geom = box_geometry(&cube);
        let info = AccelManager::prebuild_bottom(&geom);
        assert_eq!(info.result_bytes, 23 * NODE_BYTES);
        let top = AccelManager::prebuild_top(4, BuildFlags::ALLOW_UPDATE | BuildFlags::PREFER_FAST_TRACE);
        assert_eq!(top.result_bytes, 7 * NODE_BYTES);
        assert!(top.update_scratch_bytes > 0);
        assert_eq!(AccelManager::prebuild_top(4, BuildFlags::PREFER_FAST_TRACE).update_scratch_bytes, 0);
    }

    #[test]
    fn build_requires_allocation() {
        let cube = shapes::unit_box();
        let mut accel = AccelManager::new(1 << 20);
        assert!(accel.build_bottom(0, &box_geometry(&cube)).is_err());
        let info = AccelManager::prebuild_bottom(&box_geometry(&cube));
        accel.allocate_bottom(0, &info).unwrap();
        let write = accel.build_bottom(0, &box_geometry(&cube)).unwrap();
        assert_eq!(write.nodes.len(), 23);
        assert_eq!(accel.blas_root(0), Some(0));
    }

    #[test]
    fn allocation_failure_is_fatal() {
        let cube = shapes::unit_box();
        let mut accel = AccelManager::new(512);
        let info = AccelManager::prebuild_bottom(&box_geometry(&cube));
        assert!(matches!(accel.allocate_bottom(0, &info), Err(Error::Allocation { .. })));
    }

    #[test]
    fn refit_keeps_slot_and_rebuild_follows_count() {
        let cube = shapes::unit_box();
        let mut accel = AccelManager::new(1 << 20);
        let info = AccelManager::prebuild_bottom(&box_geometry(&cube));
        accel.allocate_bottom(0, &info).unwrap();
        accel.build_bottom(0, &box_geometry(&cube)).unwrap();
        let flags = BuildFlags::ALLOW_UPDATE | BuildFlags::PREFER_FAST_TRACE;
        accel.allocate_top(&AccelManager::prebuild_top(2, flags)).unwrap();
        let built = accel.build_top(&[instance(0, 0.0), instance(0, 3.0)], flags).unwrap();

        let refit = accel.refit_top(&[instance(0, 0.0), instance(0, 5.0)]).unwrap();
        assert_eq!(refit.slot, built.slot);
        assert_eq!(refit.nodes.len(), built.nodes.len());
        assert_eq!(refit.nodes[0].max[0], 5.5);

        let many: Vec<InstanceRecord> = (0..10).map(|i| instance(0, i as f32 * 2.0)).collect();
        let rebuilt = accel.refit_top(&many).unwrap();
        assert_eq!(rebuilt.nodes.len(), 19);
        assert_ne!(rebuilt.slot, built.slot);
        assert_eq!(accel.tlas_root(), Some(rebuilt.slot.first_element(NODE_BYTES)));
    }
}
