//! Device capability seam. The renderer owns every decision; a backend owns resources, accepts
//! uploads and executes named passes.
//!
//! Two implementations share the buffer layouts declared here: [`SoftwareBackend`] runs every
//! pass on the CPU with rayon, [`WgpuBackend`] runs the WGSL pipelines.

pub mod hardware;
pub mod software;

use bytemuck::{Pod, Zeroable};

pub use crate::graph::PassKind;
pub use hardware::{request_device, WgpuBackend};
pub use software::SoftwareBackend;

use crate::accel::{AccelWrite, BvhNode, InstanceRecord};
use crate::error::Result;
use crate::frame::{FrameConstants, FrameSnapshot, LightSourceGpu, PerObject};
use crate::math::Vec3;
use crate::mesh::AlphaMode;

/// Voxel passes run 4x4x4 threads per group.
pub const VOXEL_GROUP: u32 = 4;
/// Pixel passes run 8x8 threads per group.
pub const PIXEL_GROUP: u32 = 8;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuVertex {
    pub position: [f32; 4],
    pub normal: [f32; 4],
}

/// Per-mesh ranges into the shared vertex/index/subset buffers.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshInfo {
    pub base_vertex: u32,
    pub first_index: u32,
    pub index_count: u32,
    pub subset_start: u32,
    pub subset_count: u32,
    pub blas_root: u32,
    /// `GeometryFlags` bits.
    pub flags: u32,
    /// Slot in the dynamic mesh list, `DYNAMIC_NONE` when static.
    pub dynamic_slot: u32,
    /// Object-space bounding sphere.
    pub bound: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SubsetInfo {
    pub base_color: [f32; 4],
    /// rgb = emissive, w = alpha cutoff.
    pub emissive: [f32; 4],
    pub mesh: u32,
    /// Relative to the mesh's first index.
    pub index_offset: u32,
    pub index_count: u32,
    pub alpha_mode: u32,
}

impl SubsetInfo {
    /// Alpha-tested subsets whose coverage falls below the cutoff are invisible.
    pub fn is_visible(&self) -> bool {
        self.alpha_mode == AlphaMode::Opaque.as_u32() || self.base_color[3] >= self.emissive[3]
    }
}

/// Scene-lifetime data, uploaded once.
#[derive(Clone, Debug, Default)]
pub struct SceneUpload {
    pub vertices: Vec<GpuVertex>,
    pub indices: Vec<u32>,
    pub meshes: Vec<MeshInfo>,
    pub subsets: Vec<SubsetInfo>,
    /// Mesh index of every dynamic mesh, in slot order.
    pub dynamic_list: Vec<u32>,
    pub grid_size: u32,
    pub mip_count: u32,
    pub light_count: u32,
    pub frame_count: usize,
    /// Initial size of the acceleration-structure arena.
    pub arena_bytes: u64,
}

/// Borrowed view of everything a pass reads, in the device layouts.
#[derive(Clone, Copy)]
pub struct SceneView<'a> {
    pub constants: &'a FrameConstants,
    pub vertices: &'a [GpuVertex],
    pub indices: &'a [u32],
    pub meshes: &'a [MeshInfo],
    pub subsets: &'a [SubsetInfo],
    pub nodes: &'a [BvhNode],
    pub instances: &'a [InstanceRecord],
    pub objects: &'a [PerObject],
    pub lights: &'a [LightSourceGpu],
    pub dynamic_list: &'a [u32],
}

/// Object-space corners and normals of one triangle.
#[derive(Clone, Copy, Debug)]
pub struct Triangle {
    pub positions: [Vec3; 3],
    pub normals: [Vec3; 3],
}

impl<'a> SceneView<'a> {
    pub fn triangle(&self, mesh: u32, primitive: u32) -> Option<Triangle> {
        let info = self.meshes.get(mesh as usize)?;
        if primitive * 3 >= info.index_count {
            return None;
        }
        let first = (info.first_index + primitive * 3) as usize;
        let mut positions = [Vec3::new(0.0, 0.0, 0.0); 3];
        let mut normals = positions;
        for k in 0..3 {
            let v = self.vertices.get((info.base_vertex + *self.indices.get(first + k)?) as usize)?;
            positions[k] = Vec3::new(v.position[0], v.position[1], v.position[2]);
            normals[k] = Vec3::new(v.normal[0], v.normal[1], v.normal[2]);
        }
        Some(Triangle { positions, normals })
    }

    pub fn subset_of(&self, mesh: u32, primitive: u32) -> Option<&'a SubsetInfo> {
        let info = self.meshes.get(mesh as usize)?;
        let start = info.subset_start as usize;
        let first = primitive * 3;
        self.subsets
            .get(start..start + info.subset_count as usize)?
            .iter()
            .find(|s| first >= s.index_offset && first < s.index_offset + s.index_count)
    }

    pub fn primitive_visible(&self, mesh: u32, primitive: u32) -> bool {
        self.subset_of(mesh, primitive).map_or(true, SubsetInfo::is_visible)
    }
}

/// Workgroup counts of a pass.
pub fn dispatch_size(pass: PassKind, grid_size: u32, viewport: (u32, u32)) -> [u32; 3] {
    match pass {
        PassKind::ClearSdf | PassKind::BuildSdf | PassKind::UpdateSdf | PassKind::ShadeVolume => {
            let n = grid_size.div_ceil(VOXEL_GROUP);
            [n, n, n]
        }
        PassKind::GenerateMips => {
            let n = (grid_size / 2).max(1).div_ceil(VOXEL_GROUP);
            [n, n, n]
        }
        PassKind::Shade => [viewport.0.div_ceil(PIXEL_GROUP), viewport.1.div_ceil(PIXEL_GROUP), 1],
        PassKind::RefitAccel | PassKind::Visibility | PassKind::Resolve => [1, 1, 1],
    }
}

pub trait GpuBackend {
    /// Presentable image the resolve pass writes.
    type Target;

    fn create_scene(&mut self, scene: &SceneUpload) -> Result<()>;
    /// Write built or refit structures into the arena, growing it if needed.
    fn write_acceleration(&mut self, writes: &[AccelWrite]) -> Result<()>;
    /// Upload the snapshot of one ring slot. The slot must not be in flight.
    fn write_frame(&mut self, slot: usize, frame: &FrameSnapshot) -> Result<()>;
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;
    fn begin_frame(&mut self, slot: usize) -> Result<()>;
    fn encode(&mut self, pass: PassKind, groups: [u32; 3], target: &Self::Target) -> Result<()>;
    /// Submit the frame's work.
    fn end_frame(&mut self, frame: u64) -> Result<()>;
    /// Newest frame whose submission the device has finished.
    fn completed_frame(&self) -> Option<u64>;
    fn wait_idle(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_match_shader_structs() {
        assert_eq!(std::mem::size_of::<GpuVertex>(), 32);
        assert_eq!(std::mem::size_of::<MeshInfo>(), 48);
        assert_eq!(std::mem::size_of::<SubsetInfo>(), 48);
    }

    #[test]
    fn dispatch_grids_cover_the_domain() {
        assert_eq!(dispatch_size(PassKind::BuildSdf, 128, (0, 0)), [32, 32, 32]);
        assert_eq!(dispatch_size(PassKind::Shade, 16, (1280, 721)), [160, 91, 1]);
        assert_eq!(dispatch_size(PassKind::GenerateMips, 16, (0, 0)), [2, 2, 2]);
    }

    #[test]
    fn masked_subset_below_cutoff_is_hidden() {
        let mut s = SubsetInfo { alpha_mode: AlphaMode::Mask.as_u32(), ..Default::default() };
        s.base_color[3] = 0.2;
        s.emissive[3] = 0.5;
        assert!(!s.is_visible());
        s.alpha_mode = AlphaMode::Opaque.as_u32();
        assert!(s.is_visible());
    }
}
