//! Scene assembly: resolve a descriptor through a mesh loader into the mesh table and the light list.

use render_api::SceneDescriptor;

use crate::error::Result;
use crate::math::Vec3;
use crate::mesh::{MeshEntry, MeshLoader, MeshPose, MeshTable};

/// Emissive box. Boxes attached to a mesh follow that mesh's world transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightSource {
    pub min: Vec3,
    pub max: Vec3,
    pub emissive: [f32; 4],
    pub owner: Option<u32>,
}

#[derive(Debug)]
pub struct Scene {
    pub name: String,
    pub meshes: MeshTable,
    pub lights: Vec<LightSource>,
    pub ambient_bottom: [f32; 3],
    pub ambient_top: [f32; 3],
}

impl Scene {
    pub fn new(name: impl Into<String>, meshes: Vec<MeshEntry>, lights: Vec<LightSource>) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            meshes: MeshTable::new(meshes)?,
            lights,
            ambient_bottom: [0.0; 3],
            ambient_top: [0.0; 3],
        })
    }

    pub fn with_ambient(mut self, bottom: [f32; 3], top: [f32; 3]) -> Self {
        self.ambient_bottom = bottom;
        self.ambient_top = top;
        self
    }

    /// Load every mesh listed by the descriptor. The first failing mesh aborts the load.
    pub fn load(desc: &SceneDescriptor, loader: &dyn MeshLoader) -> Result<Self> {
        let mut meshes = Vec::with_capacity(desc.meshes.len());
        let mut lights = Vec::new();
        for (i, m) in desc.meshes.iter().enumerate() {
            let geometry = loader.load(&m.file_name, m.invert_z)?;
            lights.extend(geometry.lights.iter().map(|l| LightSource {
                min: l.min,
                max: l.max,
                emissive: l.emissive,
                owner: Some(i as u32),
            }));
            let name = m.file_name.rsplit('/').next().unwrap_or(&m.file_name);
            let name = name.split('.').next().unwrap_or(name);
            let pose = MeshPose::new(Vec3::from(m.position), m.scaling);
            let mut entry = MeshEntry::new(name, geometry, pose, m.is_dynamic);
            entry.light_map_size = m.light_map_size;
            meshes.push(entry);
        }
        for l in &desc.light_sources {
            let (min, max) = l.scaled_corners();
            lights.push(LightSource { min: Vec3::from(min), max: Vec3::from(max), emissive: l.emissive, owner: None });
        }
        let scene = Scene::new(desc.name.clone(), meshes, lights)?.with_ambient(desc.ambient_bottom, desc.ambient_top);
        log::info!(
            "scene '{}': {} meshes ({} dynamic), {} light sources",
            scene.name,
            scene.meshes.len(),
            scene.meshes.dynamic_count(),
            scene.lights.len()
        );
        Ok(scene)
    }
}
