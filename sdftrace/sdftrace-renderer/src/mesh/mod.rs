//! Mesh resource table: geometry, placement, static/dynamic classification and bounds for every
//! mesh of the scene, plus the per-frame transform evaluation.
//!
//! Rotation of dynamic meshes is not stored on the mesh. Poses live in the frame driver and are
//! folded into a [`TransformSet`] once per frame, before anything reads a world matrix.

mod gltf_file;
mod loader;
mod obj_file;
pub mod shapes;

use cgmath::{One, Quaternion};

pub use loader::{AlphaMode, EmissiveBox, FileMeshLoader, LoadedMesh, Material, MeshLoader, Subset};

use crate::error::{Error, Result};
use crate::math::{to_rows, transform_point, Aabb, Mat4, Rows3x4, Vec3};

/// Value of `dynamic_mesh_ids[mesh]` for a static mesh.
pub const DYNAMIC_NONE: u32 = u32::MAX;

/// Owner ids pack the mesh index into 8 bits.
pub const MAX_MESHES: usize = 255;

/// Position, uniform scale and rotation of one mesh instance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshPose {
    pub position: Vec3,
    pub scale: f32,
    pub rotation: Quaternion<f32>,
}

impl MeshPose {
    pub fn new(position: Vec3, scale: f32) -> Self {
        Self { position, scale, rotation: Quaternion::one() }
    }

    /// translate * rotate * scale
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_translation(self.position) * Mat4::from(self.rotation) * Mat4::from_scale(self.scale)
    }
}

#[derive(Clone, Debug)]
pub struct MeshEntry {
    pub name: String,
    pub geometry: LoadedMesh,
    pub base_pose: MeshPose,
    pub is_dynamic: bool,
    pub light_map_size: u32,
    /// Object-space bounds of the geometry.
    pub bounds: Aabb,
    /// Object-space bounding sphere: xyz = center, w = radius.
    pub bound: [f32; 4],
}

impl MeshEntry {
    pub fn new(name: impl Into<String>, geometry: LoadedMesh, base_pose: MeshPose, is_dynamic: bool) -> Self {
        let bounds = geometry.bounds();
        let (c, r) = geometry.bound_sphere();
        Self {
            name: name.into(),
            geometry,
            base_pose,
            is_dynamic,
            light_map_size: 0,
            bounds,
            bound: [c.x, c.y, c.z, r],
        }
    }

    /// Every subset is alpha-opaque, so ray queries may skip alpha evaluation.
    pub fn is_opaque(&self) -> bool {
        self.geometry.subsets.iter().all(|s| s.material.alpha_mode == AlphaMode::Opaque)
    }
}

/// Slot in the dynamic mesh list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DynamicMeshEntry {
    pub mesh: u32,
}

#[derive(Debug, Default)]
pub struct MeshTable {
    meshes: Vec<MeshEntry>,
    dynamic_ids: Vec<u32>,
    dynamic_list: Vec<DynamicMeshEntry>,
}

impl MeshTable {
    pub fn new(meshes: Vec<MeshEntry>) -> Result<Self> {
        if meshes.is_empty() {
            return Err(Error::Scene("scene has no meshes".to_string()));
        }
        if meshes.len() > MAX_MESHES {
            return Err(Error::Scene(format!("{} meshes exceed the limit of {}", meshes.len(), MAX_MESHES)));
        }
        let mut dynamic_ids = Vec::with_capacity(meshes.len());
        let mut dynamic_list = Vec::new();
        for (i, mesh) in meshes.iter().enumerate() {
            if mesh.is_dynamic {
                dynamic_ids.push(dynamic_list.len() as u32);
                dynamic_list.push(DynamicMeshEntry { mesh: i as u32 });
            } else {
                dynamic_ids.push(DYNAMIC_NONE);
            }
        }
        Ok(Self { meshes, dynamic_ids, dynamic_list })
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn get(&self, mesh: usize) -> Option<&MeshEntry> {
        self.meshes.get(mesh)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MeshEntry> {
        self.meshes.iter()
    }

    pub fn dynamic_ids(&self) -> &[u32] {
        &self.dynamic_ids
    }

    pub fn dynamic_list(&self) -> &[DynamicMeshEntry] {
        &self.dynamic_list
    }

    pub fn dynamic_count(&self) -> usize {
        self.dynamic_list.len()
    }

    pub fn base_poses(&self) -> Vec<MeshPose> {
        self.meshes.iter().map(|m| m.base_pose).collect()
    }

    /// World bounds of the static meshes at their base pose. Falls back to every mesh when the
    /// scene has no static geometry.
    pub fn static_bounds(&self) -> Aabb {
        let gather = |only_static: bool| {
            self.meshes
                .iter()
                .filter(|m| !only_static || !m.is_dynamic)
                .fold(Aabb::empty(), |acc, m| acc.union(&m.bounds.transformed(&m.base_pose.matrix())))
        };
        let bounds = gather(true);
        if bounds.is_empty() {
            log::warn!("scene has no static meshes; sizing the SDF volume from dynamic meshes");
            return gather(false);
        }
        bounds
    }
}

/// World matrices of every mesh for one frame.
#[derive(Clone, Debug)]
pub struct TransformSet {
    worlds: Vec<Mat4>,
}

impl TransformSet {
    pub fn evaluate(poses: &[MeshPose]) -> Self {
        Self { worlds: poses.iter().map(MeshPose::matrix).collect() }
    }

    pub fn world(&self, mesh: usize) -> &Mat4 {
        &self.worlds[mesh]
    }

    pub fn rows(&self, mesh: usize) -> Rows3x4 {
        to_rows(&self.worlds[mesh])
    }

    pub fn len(&self) -> usize {
        self.worlds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.worlds.is_empty()
    }

    /// World bounds of the mesh's bounding sphere. Valid for similarity transforms.
    pub fn sphere_bounds(&self, mesh: usize, bound: [f32; 4]) -> Aabb {
        let m = &self.worlds[mesh];
        let c = transform_point(m, Vec3::new(bound[0], bound[1], bound[2]));
        let scale = crate::math::rows_scale(&to_rows(m));
        Aabb::new(c, c).expanded(bound[3] * scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Rad, Rotation3};

    fn entry(dynamic: bool, x: f32) -> MeshEntry {
        MeshEntry::new("box", shapes::unit_box(), MeshPose::new(Vec3::new(x, 0.0, 0.0), 1.0), dynamic)
    }

    #[test]
    fn dynamic_ids_index_the_dynamic_list() {
        let flags = [false, true, false, true, true];
        let table = MeshTable::new(flags.iter().enumerate().map(|(i, &d)| entry(d, i as f32)).collect()).unwrap();
        assert_eq!(table.dynamic_count(), flags.iter().filter(|&&d| d).count());
        for (mesh, &dynamic) in flags.iter().enumerate() {
            let id = table.dynamic_ids()[mesh];
            if dynamic {
                assert_ne!(id, DYNAMIC_NONE);
                assert_eq!(table.dynamic_list()[id as usize].mesh, mesh as u32);
            } else {
                assert_eq!(id, DYNAMIC_NONE);
            }
        }
    }

    #[test]
    fn static_bounds_ignore_dynamic_meshes() {
        let table = MeshTable::new(vec![entry(false, 0.0), entry(true, 10.0)]).unwrap();
        let b = table.static_bounds();
        assert_eq!(b.max.x, 0.5);
        let all_dynamic = MeshTable::new(vec![entry(true, 10.0)]).unwrap();
        assert_eq!(all_dynamic.static_bounds().min.x, 9.5);
    }

    #[test]
    fn too_many_meshes_are_rejected() {
        let meshes = (0..=MAX_MESHES).map(|i| entry(false, i as f32)).collect();
        assert!(matches!(MeshTable::new(meshes), Err(Error::Scene(_))));
        assert!(MeshTable::new(Vec::new()).is_err());
    }

    #[test]
    fn sphere_bounds_follow_scale_not_rotation() {
        let mut pose = MeshPose::new(Vec3::new(1.0, 2.0, 3.0), 2.0);
        let a = TransformSet::evaluate(&[pose]).sphere_bounds(0, [0.0, 0.0, 0.0, 0.5]);
        pose.rotation = Quaternion::from_angle_y(Rad(1.3));
        let b = TransformSet::evaluate(&[pose]).sphere_bounds(0, [0.0, 0.0, 0.0, 0.5]);
        assert!((a.min - b.min).x.abs() < 1e-5);
        assert!((a.max.y - 3.0).abs() < 1e-5);
    }
}
