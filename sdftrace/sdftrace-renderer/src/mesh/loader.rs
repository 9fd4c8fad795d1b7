//! Mesh loading seam. A loader turns a file identifier into decoded geometry, subsets and any
//! emissive surfaces; the renderer never parses files itself.

use std::path::{Path, PathBuf};

use cgmath::InnerSpace;

use crate::error::{Error, Result};
use crate::math::{Aabb, Vec3};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AlphaMode {
    #[default]
    Opaque,
    Mask,
    Blend,
}

impl AlphaMode {
    pub fn as_u32(self) -> u32 {
        match self {
            AlphaMode::Opaque => 0,
            AlphaMode::Mask => 1,
            AlphaMode::Blend => 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub base_color: [f32; 4],
    pub emissive: [f32; 3],
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self { base_color: [0.8, 0.8, 0.8, 1.0], emissive: [0.0; 3], alpha_mode: AlphaMode::Opaque, alpha_cutoff: 0.5 }
    }
}

/// Contiguous index range sharing one material.
#[derive(Clone, Debug, PartialEq)]
pub struct Subset {
    pub index_offset: u32,
    pub index_count: u32,
    pub material: Material,
    pub light_map_scale: f32,
}

/// Emissive box in the mesh's object space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmissiveBox {
    pub min: Vec3,
    pub max: Vec3,
    pub emissive: [f32; 4],
}

#[derive(Clone, Debug, Default)]
pub struct LoadedMesh {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    pub subsets: Vec<Subset>,
    pub lights: Vec<EmissiveBox>,
}

impl LoadedMesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(self.positions.iter().map(|p| Vec3::from(*p)))
    }

    /// Bounding sphere as (center, radius) around the bounds center.
    pub fn bound_sphere(&self) -> (Vec3, f32) {
        let b = self.bounds();
        if b.is_empty() {
            return (Vec3::new(0.0, 0.0, 0.0), 0.0);
        }
        let c = b.center();
        let r = self.positions.iter().map(|p| (Vec3::from(*p) - c).magnitude()).fold(0.0f32, f32::max);
        (c, r)
    }

    pub fn has_multiple_subsets(&self) -> bool {
        self.subsets.len() > 1
    }

    /// Mirror along z. Winding is swapped so outward faces stay counter-clockwise.
    pub fn invert_z(&mut self) {
        for p in &mut self.positions {
            p[2] = -p[2];
        }
        for n in &mut self.normals {
            n[2] = -n[2];
        }
        for tri in self.indices.chunks_exact_mut(3) {
            tri.swap(1, 2);
        }
        for light in &mut self.lights {
            let (min_z, max_z) = (-light.max.z, -light.min.z);
            light.min.z = min_z;
            light.max.z = max_z;
        }
    }

    /// Replace missing or mismatched normals with area-weighted face normals.
    pub fn ensure_normals(&mut self) {
        if self.normals.len() == self.positions.len() {
            return;
        }
        let mut acc = vec![Vec3::new(0.0, 0.0, 0.0); self.positions.len()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            let (pa, pb, pc) = (Vec3::from(self.positions[a]), Vec3::from(self.positions[b]), Vec3::from(self.positions[c]));
            let n = (pb - pa).cross(pc - pa);
            acc[a] += n;
            acc[b] += n;
            acc[c] += n;
        }
        self.normals = acc
            .into_iter()
            .map(|n| if n.magnitude2() > 0.0 { n.normalize().into() } else { [0.0, 1.0, 0.0] })
            .collect();
    }

    pub fn validate(&self, path: &str) -> Result<()> {
        if self.positions.is_empty() || self.indices.is_empty() {
            return Err(Error::asset(path, "mesh has no triangles"));
        }
        if self.indices.len() % 3 != 0 {
            return Err(Error::asset(path, "index count is not a multiple of three"));
        }
        let vertex_count = self.positions.len() as u32;
        if let Some(bad) = self.indices.iter().find(|&&i| i >= vertex_count) {
            return Err(Error::asset(path, format!("index {} out of range for {} vertices", bad, vertex_count)));
        }
        if self.triangle_count() >= 1 << 24 {
            return Err(Error::asset(path, "more than 2^24 triangles in one mesh"));
        }
        let covered: u32 = self.subsets.iter().map(|s| s.index_count).sum();
        if covered as usize != self.indices.len() {
            return Err(Error::asset(path, "subsets do not cover the index buffer"));
        }
        Ok(())
    }
}

/// Collaborator that decodes mesh files.
pub trait MeshLoader {
    fn load(&self, file_name: &str, invert_z: bool) -> Result<LoadedMesh>;
}

/// Default loader: `.obj` through tobj, `.gltf`/`.glb` through gltf, `builtin:*` procedural shapes.
#[derive(Clone, Debug, Default)]
pub struct FileMeshLoader {
    root: PathBuf,
}

impl FileMeshLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl MeshLoader for FileMeshLoader {
    fn load(&self, file_name: &str, invert_z: bool) -> Result<LoadedMesh> {
        let mut mesh = if let Some(shape) = file_name.strip_prefix("builtin:") {
            super::shapes::builtin(shape).ok_or_else(|| Error::asset(file_name, "unknown builtin shape"))?
        } else {
            let path = self.root.join(file_name);
            let ext = path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase());
            match ext.as_deref() {
                Some("obj") => super::obj_file::load(&path)?,
                Some("gltf") | Some("glb") => super::gltf_file::load(&path)?,
                _ => return Err(Error::asset(file_name, "unsupported mesh format")),
            }
        };
        if invert_z {
            mesh.invert_z();
        }
        mesh.ensure_normals();
        mesh.validate(file_name)?;
        log::debug!(
            "loaded {}: {} vertices, {} triangles, {} subsets, {} lights",
            file_name,
            mesh.positions.len(),
            mesh.triangle_count(),
            mesh.subsets.len(),
            mesh.lights.len()
        );
        Ok(mesh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_box_loads_through_file_loader() {
        let loader = FileMeshLoader::new(".");
        let mesh = loader.load("builtin:box", false).unwrap();
        assert_eq!(mesh.triangle_count(), 12);
        assert!(!mesh.has_multiple_subsets());
        let (center, radius) = mesh.bound_sphere();
        assert!(center.magnitude() < 1e-6);
        assert!((radius - 0.75f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn missing_file_is_an_asset_error() {
        let loader = FileMeshLoader::new("/nonexistent");
        let err = loader.load("missing.obj", false).unwrap_err();
        assert!(matches!(err, Error::AssetLoad { .. }));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = FileMeshLoader::new(".").load("mesh.fbx", false).unwrap_err();
        assert!(matches!(err, Error::AssetLoad { .. }));
    }

    #[test]
    fn invert_z_keeps_outward_winding() {
        let mut mesh = super::super::shapes::unit_box();
        let before = mesh.clone();
        mesh.invert_z();
        for (tri_a, tri_b) in before.indices.chunks(3).zip(mesh.indices.chunks(3)) {
            assert_eq!(tri_a[0], tri_b[0]);
            assert_eq!(tri_a[1], tri_b[2]);
        }
        let p = mesh.positions[0];
        assert_eq!(p[2], -before.positions[0][2]);
        // Outward normals survive the mirror: a face normal still points away from the center.
        let tri = &mesh.indices[0..3];
        let (a, b, c) = (Vec3::from(mesh.positions[tri[0] as usize]), Vec3::from(mesh.positions[tri[1] as usize]), Vec3::from(mesh.positions[tri[2] as usize]));
        let n = (b - a).cross(c - a);
        assert!(n.dot((a + b + c) / 3.0) > 0.0);
    }
}
