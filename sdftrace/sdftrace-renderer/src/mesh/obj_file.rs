//! Wavefront OBJ import via tobj. Each model becomes one subset; `Ke` emission turns the model's
//! bounds into a light source.

use std::path::Path;

use super::loader::{AlphaMode, EmissiveBox, LoadedMesh, Material, Subset};
use crate::error::{Error, Result};
use crate::math::{Aabb, Vec3};

fn parse_rgb(raw: &str) -> Option<[f32; 3]> {
    let v: Vec<f32> = raw.split_whitespace().filter_map(|s| s.parse().ok()).collect();
    match v.as_slice() {
        [r, g, b, ..] => Some([*r, *g, *b]),
        [x] => Some([*x, *x, *x]),
        _ => None,
    }
}

fn convert_material(m: &tobj::Material) -> Material {
    let diffuse = m.diffuse.unwrap_or([0.8, 0.8, 0.8]);
    let dissolve = m.dissolve.unwrap_or(1.0);
    let emissive = m.unknown_param.get("Ke").and_then(|raw| parse_rgb(raw)).unwrap_or([0.0; 3]);
    Material {
        base_color: [diffuse[0], diffuse[1], diffuse[2], dissolve],
        emissive,
        alpha_mode: if dissolve < 1.0 { AlphaMode::Blend } else { AlphaMode::Opaque },
        alpha_cutoff: 0.5,
    }
}

pub fn load(path: &Path) -> Result<LoadedMesh> {
    let display = path.display().to_string();
    let (models, materials) =
        tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS).map_err(|e| Error::asset(&display, format!("load_obj: {:?}", e)))?;
    let materials = materials.unwrap_or_else(|e| {
        log::warn!("{}: material library unavailable ({:?}), using defaults", display, e);
        Vec::new()
    });

    let mut mesh = LoadedMesh::default();
    let mut missing_normals = false;
    for model in models {
        let m = model.mesh;
        if m.indices.is_empty() {
            continue;
        }
        let base = mesh.positions.len() as u32;
        let index_offset = mesh.indices.len() as u32;
        let positions: Vec<[f32; 3]> = m.positions.chunks_exact(3).map(|p| [p[0] as f32, p[1] as f32, p[2] as f32]).collect();
        if m.normals.len() == m.positions.len() {
            mesh.normals.extend(m.normals.chunks_exact(3).map(|n| [n[0] as f32, n[1] as f32, n[2] as f32]));
        } else {
            missing_normals = true;
        }
        let bounds = Aabb::from_points(positions.iter().map(|p| Vec3::from(*p)));
        mesh.positions.extend(positions);
        mesh.indices.extend(m.indices.iter().map(|&i| base + i));

        let material = m.material_id.and_then(|id| materials.get(id)).map(convert_material).unwrap_or_default();
        if material.emissive.iter().any(|&e| e > 0.0) {
            let e = material.emissive;
            mesh.lights.push(EmissiveBox { min: bounds.min, max: bounds.max, emissive: [e[0], e[1], e[2], 1.0] });
        }
        mesh.subsets.push(Subset {
            index_offset,
            index_count: m.indices.len() as u32,
            material,
            light_map_scale: 1.0,
        });
    }
    if missing_normals {
        mesh.normals.clear();
    }
    if mesh.subsets.is_empty() {
        return Err(Error::asset(&display, "no triangles in OBJ"));
    }
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_emission_from_unknown_params() {
        assert_eq!(parse_rgb("1 0.5 0.25"), Some([1.0, 0.5, 0.25]));
        assert_eq!(parse_rgb("2"), Some([2.0, 2.0, 2.0]));
        assert_eq!(parse_rgb(""), None);
    }

    #[test]
    fn loads_a_quad_with_emissive_material() {
        let dir = std::env::temp_dir().join(format!("sdftrace_obj_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("quad.mtl"), "newmtl glow\nKd 1 1 1\nKe 4 4 4\n").unwrap();
        std::fs::write(
            dir.join("quad.obj"),
            "mtllib quad.mtl\no quad\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nusemtl glow\nf 1 2 3 4\n",
        )
        .unwrap();
        let mesh = load(&dir.join("quad.obj")).unwrap();
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.subsets.len(), 1);
        assert_eq!(mesh.lights.len(), 1);
        assert_eq!(mesh.lights[0].emissive, [4.0, 4.0, 4.0, 1.0]);
        assert!(mesh.normals.is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
