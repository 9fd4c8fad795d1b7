//! glTF 2.0 import via the gltf crate. Node transforms are baked into the vertices; every
//! triangle primitive becomes a subset carrying its base colour, emission and alpha mode.

use std::path::Path;

use cgmath::{InnerSpace, SquareMatrix};

use super::loader::{AlphaMode, EmissiveBox, LoadedMesh, Material, Subset};
use crate::error::{Error, Result};
use crate::math::{inverse_transpose, transform_point, transform_vector, Aabb, Mat4, Vec3};

fn convert_material(m: &gltf::Material) -> Material {
    let alpha_mode = match m.alpha_mode() {
        gltf::material::AlphaMode::Opaque => AlphaMode::Opaque,
        gltf::material::AlphaMode::Mask => AlphaMode::Mask,
        gltf::material::AlphaMode::Blend => AlphaMode::Blend,
    };
    Material {
        base_color: m.pbr_metallic_roughness().base_color_factor(),
        emissive: m.emissive_factor(),
        alpha_mode,
        alpha_cutoff: m.alpha_cutoff().unwrap_or(0.5),
    }
}

struct Importer<'a> {
    buffers: &'a [gltf::buffer::Data],
    mesh: LoadedMesh,
    missing_normals: bool,
}

impl Importer<'_> {
    fn visit(&mut self, node: &gltf::Node, parent: Mat4) {
        let world = parent * Mat4::from(node.transform().matrix());
        if let Some(m) = node.mesh() {
            let normal_matrix = inverse_transpose(&world);
            for primitive in m.primitives() {
                if primitive.mode() != gltf::mesh::Mode::Triangles {
                    continue;
                }
                self.append(&primitive, &world, &normal_matrix);
            }
        }
        for child in node.children() {
            self.visit(&child, world);
        }
    }

    fn append(&mut self, primitive: &gltf::Primitive, world: &Mat4, normal_matrix: &Mat4) {
        let buffers = self.buffers;
        let reader = primitive.reader(move |b| buffers.get(b.index()).map(|d| d.0.as_slice()));
        let positions: Vec<[f32; 3]> = match reader.read_positions() {
            Some(it) => it.map(|p| transform_point(world, p.into()).into()).collect(),
            None => return,
        };
        match reader.read_normals() {
            Some(it) => self.mesh.normals.extend(it.map(|n| {
                let n = transform_vector(normal_matrix, n.into());
                if n.magnitude2() > 0.0 { n.normalize().into() } else { [0.0, 1.0, 0.0] }
            })),
            None => self.missing_normals = true,
        }
        let indices: Vec<u32> = match reader.read_indices() {
            Some(it) => it.into_u32().collect(),
            None => (0..positions.len() as u32).collect(),
        };
        let base = self.mesh.positions.len() as u32;
        let index_offset = self.mesh.indices.len() as u32;
        let material = convert_material(&primitive.material());
        if material.emissive.iter().any(|&e| e > 0.0) {
            let b = Aabb::from_points(positions.iter().map(|p| Vec3::from(*p)));
            let e = material.emissive;
            self.mesh.lights.push(EmissiveBox { min: b.min, max: b.max, emissive: [e[0], e[1], e[2], 1.0] });
        }
        self.mesh.positions.extend(positions);
        self.mesh.indices.extend(indices.iter().map(|&i| base + i));
        self.mesh.subsets.push(Subset { index_offset, index_count: indices.len() as u32, material, light_map_scale: 1.0 });
    }
}

pub fn load(path: &Path) -> Result<LoadedMesh> {
    let display = path.display().to_string();
    let (document, buffers, _images) = gltf::import(path).map_err(|e| Error::asset(&display, e))?;
    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| Error::asset(&display, "document has no scene"))?;
    let mut importer = Importer { buffers: &buffers, mesh: LoadedMesh::default(), missing_normals: false };
    for node in scene.nodes() {
        importer.visit(&node, Mat4::identity());
    }
    let mut mesh = importer.mesh;
    if importer.missing_normals {
        mesh.normals.clear();
    }
    if mesh.subsets.is_empty() {
        return Err(Error::asset(&display, "no triangle primitives"));
    }
    Ok(mesh)
}
