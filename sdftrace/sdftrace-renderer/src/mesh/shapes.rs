//! Procedural meshes addressable as `builtin:<name>`. All shapes are centered at the origin,
//! fit the unit cube and wind outward faces counter-clockwise.

use super::loader::{EmissiveBox, LoadedMesh, Material, Subset};
use crate::math::Vec3;

pub fn builtin(name: &str) -> Option<LoadedMesh> {
    match name {
        "box" | "cube" => Some(unit_box()),
        "sphere" => Some(uv_sphere(24, 16)),
        "plane" => Some(plane()),
        "lamp" => Some(lamp()),
        _ => None,
    }
}

fn single_subset(index_count: usize, material: Material) -> Vec<Subset> {
    vec![Subset { index_offset: 0, index_count: index_count as u32, material, light_map_scale: 1.0 }]
}

/// Axis-aligned cube with side 1.
pub fn unit_box() -> LoadedMesh {
    let axes = [
        ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
    ];
    let mut mesh = LoadedMesh::default();
    for (n, u, v) in axes {
        let (n, u, v) = (Vec3::from(n), Vec3::from(u) * 0.5, Vec3::from(v) * 0.5);
        let c = n * 0.5;
        let base = mesh.positions.len() as u32;
        for p in [c - u - v, c + u - v, c + u + v, c - u + v] {
            mesh.positions.push(p.into());
            mesh.normals.push(n.into());
        }
        mesh.indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    mesh.subsets = single_subset(mesh.indices.len(), Material::default());
    mesh
}

/// Latitude/longitude sphere with radius 0.5.
pub fn uv_sphere(sectors: u32, stacks: u32) -> LoadedMesh {
    let mut mesh = LoadedMesh::default();
    for i in 0..=stacks {
        let theta = std::f32::consts::PI * i as f32 / stacks as f32;
        for j in 0..=sectors {
            let phi = std::f32::consts::TAU * j as f32 / sectors as f32;
            let n = Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
            mesh.positions.push((n * 0.5).into());
            mesh.normals.push(n.into());
        }
    }
    let row = sectors + 1;
    for i in 0..stacks {
        for j in 0..sectors {
            let a = i * row + j;
            let b = (i + 1) * row + j;
            let c = b + 1;
            let d = a + 1;
            if i != 0 {
                mesh.indices.extend_from_slice(&[a, d, c]);
            }
            if i + 1 != stacks {
                mesh.indices.extend_from_slice(&[a, c, b]);
            }
        }
    }
    mesh.subsets = single_subset(mesh.indices.len(), Material::default());
    mesh
}

/// Unit square in the XZ plane facing +Y.
pub fn plane() -> LoadedMesh {
    let mut mesh = LoadedMesh::default();
    for p in [[-0.5, 0.0, -0.5], [0.5, 0.0, -0.5], [0.5, 0.0, 0.5], [-0.5, 0.0, 0.5]] {
        mesh.positions.push(p);
        mesh.normals.push([0.0, 1.0, 0.0]);
    }
    mesh.indices = vec![0, 2, 1, 0, 3, 2];
    mesh.subsets = single_subset(6, Material::default());
    mesh
}

/// Small glowing box carrying one light source over its own bounds.
pub fn lamp() -> LoadedMesh {
    let mut mesh = unit_box();
    for p in &mut mesh.positions {
        *p = p.map(|v| v * 0.2);
    }
    let emissive = [6.0, 5.6, 5.0];
    mesh.subsets[0].material = Material { base_color: [1.0, 1.0, 1.0, 1.0], emissive, ..Material::default() };
    let b = mesh.bounds();
    mesh.lights.push(EmissiveBox { min: b.min, max: b.max, emissive: [emissive[0], emissive[1], emissive[2], 1.0] });
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::InnerSpace;

    fn assert_outward(mesh: &LoadedMesh) {
        for tri in mesh.indices.chunks(3) {
            let p = |i: u32| Vec3::from(mesh.positions[i as usize]);
            let (a, b, c) = (p(tri[0]), p(tri[1]), p(tri[2]));
            let n = (b - a).cross(c - a);
            assert!(n.magnitude() > 0.0, "degenerate triangle {:?}", tri);
            assert!(n.dot((a + b + c) / 3.0) > 0.0, "inward triangle {:?}", tri);
        }
    }

    #[test]
    fn box_faces_point_outward() {
        let mesh = unit_box();
        assert_eq!(mesh.positions.len(), 24);
        assert_outward(&mesh);
        let b = mesh.bounds();
        assert_eq!(b.min, Vec3::new(-0.5, -0.5, -0.5));
        assert_eq!(b.max, Vec3::new(0.5, 0.5, 0.5));
    }

    #[test]
    fn sphere_faces_point_outward() {
        let mesh = uv_sphere(12, 8);
        assert_outward(&mesh);
        assert_eq!(mesh.triangle_count(), (12 * 8 * 2 - 2 * 12) as usize);
    }

    #[test]
    fn lamp_carries_its_light() {
        let mesh = builtin("lamp").unwrap();
        assert_eq!(mesh.lights.len(), 1);
        assert!((mesh.lights[0].max.x - 0.1).abs() < 1e-6);
        assert!(builtin("teapot").is_none());
    }
}
