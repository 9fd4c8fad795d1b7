//! Irradiance volume: per-voxel light energy at SDF resolution plus a box-filtered mip chain.
//!
//! Voxels near their owner surface light a point reconstructed from the owner triangle; the rest
//! act as free-space probes (no cosine term, averaged ambient).

use cgmath::InnerSpace;

use crate::backend::SceneView;
use crate::frame::{FrameConstants, LightSourceGpu};
use crate::math::{rows_point, rows_scale, rows_vector, Vec3};
use crate::sdf::{self, Voxel};

/// RGBA energy of one irradiance voxel.
pub type Texel = [f32; 4];

/// `floor(log2(grid)) + 1`
pub fn mip_count(grid: u32) -> u32 {
    32 - grid.max(1).leading_zeros()
}

pub fn level_size(grid: u32, level: u32) -> u32 {
    (grid >> level).max(1)
}

/// Point and normal a voxel is lit at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Probe {
    pub position: Vec3,
    /// `None` for a free-space probe.
    pub normal: Option<Vec3>,
}

/// Surface point and world normal of a hit on `mesh`/`primitive`.
pub fn surface_point(scene: &SceneView, mesh: u32, primitive: u32, bary: [f32; 2]) -> Option<(Vec3, Vec3)> {
    let tri = scene.triangle(mesh, primitive)?;
    let obj = scene.objects.get(mesh as usize)?;
    let w = [1.0 - bary[0] - bary[1], bary[0], bary[1]];
    let p = tri.positions[0] * w[0] + tri.positions[1] * w[1] + tri.positions[2] * w[2];
    let n = tri.normals[0] * w[0] + tri.normals[1] * w[1] + tri.normals[2] * w[2];
    let mut n = rows_vector(&obj.world_it, n);
    if n.magnitude2() < 1e-12 {
        let e = (tri.positions[1] - tri.positions[0]).cross(tri.positions[2] - tri.positions[0]);
        n = rows_vector(&obj.world_it, e);
    }
    Some((rows_point(&obj.world, p), n.normalize()))
}

pub fn probe_for_voxel(scene: &SceneView, voxel: &Voxel, index: usize) -> Probe {
    let c = scene.constants;
    let center = rows_point(&c.volume_world, sdf::voxel_center_local(index, c.grid_size));
    if voxel.distance.abs() < c.surface_band {
        if let (Some(mesh), Some(prim)) = (voxel.mesh(), voxel.primitive()) {
            if let Some((p, n)) = surface_point(scene, mesh, prim, voxel.barycentrics()) {
                // lift off the surface so the shadow march starts in free space
                let lift = 2.0 * c.volume_radius / c.grid_size as f32;
                return Probe { position: p + n * lift, normal: Some(n) };
            }
        }
    }
    Probe { position: center, normal: None }
}

/// Sky gradient / ambient term.
pub fn ambient(c: &FrameConstants, normal: Option<Vec3>) -> [f32; 3] {
    let t = normal.map_or(0.5, |n| n.y * 0.5 + 0.5);
    let (b, top) = (c.ambient_bottom, c.ambient_top);
    [b[0] + (top[0] - b[0]) * t, b[1] + (top[1] - b[1]) * t, b[2] + (top[2] - b[2]) * t]
}

/// World centre and half-diagonal of a light box.
pub fn light_extent(light: &LightSourceGpu) -> (Vec3, f32) {
    let min = Vec3::new(light.min[0], light.min[1], light.min[2]);
    let max = Vec3::new(light.max[0], light.max[1], light.max[2]);
    let center = rows_point(&light.world, (min + max) * 0.5);
    (center, ((max - min) * 0.5).magnitude() * rows_scale(&light.world))
}

/// Energy from one emissive box reaching `probe`, shadowed by the SDF.
pub fn light_contribution(scene: &SceneView, volume: &[Voxel], probe: &Probe, light: &LightSourceGpu) -> [f32; 3] {
    let c = scene.constants;
    let (center, extent) = light_extent(light);
    let to_light = center - probe.position;
    let dist2 = to_light.magnitude2();
    let cos = match probe.normal {
        Some(n) if dist2 > 0.0 => n.dot(to_light / dist2.sqrt()).max(0.0),
        Some(_) => 0.0,
        None => 1.0,
    };
    if cos <= 0.0 {
        return [0.0; 3];
    }
    let extent2 = (extent * extent).max(1e-8);
    let falloff = extent2 / dist2.max(extent2);
    let from = rows_point(&c.volume_world_inv, probe.position);
    let to = rows_point(&c.volume_world_inv, center);
    let shadow = sdf::soft_shadow(volume, c.grid_size, from, to, extent / c.volume_radius);
    let k = light.emissive[3] * cos * falloff * shadow;
    [light.emissive[0] * k, light.emissive[1] * k, light.emissive[2] * k]
}

/// Total energy at a probe: ambient plus every light.
pub fn irradiance_at(scene: &SceneView, volume: &[Voxel], probe: &Probe) -> Texel {
    let mut e = ambient(scene.constants, probe.normal);
    for light in scene.lights {
        let l = light_contribution(scene, volume, probe, light);
        e[0] += l[0];
        e[1] += l[1];
        e[2] += l[2];
    }
    [e[0], e[1], e[2], 1.0]
}

/// Finest-level kernel for one voxel.
pub fn shade_voxel(scene: &SceneView, volume: &[Voxel], index: usize) -> Texel {
    let voxel = volume.get(index).copied().unwrap_or(Voxel::EMPTY);
    irradiance_at(scene, volume, &probe_for_voxel(scene, &voxel, index))
}

/// Next mip: 2x2x2 box filter.
pub fn downsample(src: &[Texel], src_size: u32) -> Vec<Texel> {
    let dst_size = (src_size / 2).max(1);
    let n = dst_size as usize;
    (0..n * n * n)
        .map(|i| {
            let [x, y, z] = sdf::voxel_coords(i, dst_size);
            let mut acc = [0.0f32; 4];
            let mut count = 0.0;
            for dz in 0..2 {
                for dy in 0..2 {
                    for dx in 0..2 {
                        let s = |v: u32, d: u32| (2 * v + d).min(src_size - 1);
                        let t = src[sdf::voxel_index(s(x, dx), s(y, dy), s(z, dz), src_size)];
                        for k in 0..4 {
                            acc[k] += t[k];
                        }
                        count += 1.0;
                    }
                }
            }
            acc.map(|v| v / count)
        })
        .collect()
}

/// Trilinear lookup of one level at a volume-local point.
pub fn sample_level(level: &[Texel], size: u32, local: Vec3) -> Texel {
    let s = size as f32;
    let coord = |x: f32| ((x + 1.0) * 0.5 * s - 0.5).clamp(0.0, s - 1.0);
    let f = [coord(local.x), coord(local.y), coord(local.z)];
    let lo = f.map(|x| x.floor() as u32);
    let hi = lo.map(|x| (x + 1).min(size - 1));
    let t = [f[0] - lo[0] as f32, f[1] - lo[1] as f32, f[2] - lo[2] as f32];
    let mut out = [0.0f32; 4];
    for corner in 0..8u32 {
        let pick = |axis: usize| if corner & (1 << axis) != 0 { (hi[axis], t[axis]) } else { (lo[axis], 1.0 - t[axis]) };
        let ((x, wx), (y, wy), (z, wz)) = (pick(0), pick(1), pick(2));
        let w = wx * wy * wz;
        if w == 0.0 {
            continue;
        }
        let texel = level[sdf::voxel_index(x, y, z, size)];
        for k in 0..4 {
            out[k] += texel[k] * w;
        }
    }
    out
}

/// Lookup between two mips: `mip` is fractional.
pub fn sample_mips(levels: &[Vec<Texel>], grid: u32, local: Vec3, mip: f32) -> Texel {
    if levels.is_empty() {
        return [0.0; 4];
    }
    let top = (levels.len() - 1) as f32;
    let m = mip.clamp(0.0, top);
    let l0 = m.floor() as usize;
    let l1 = (l0 + 1).min(levels.len() - 1);
    let a = sample_level(&levels[l0], level_size(grid, l0 as u32), local);
    let b = sample_level(&levels[l1], level_size(grid, l1 as u32), local);
    let t = m - l0 as f32;
    std::array::from_fn(|k| a[k] + (b[k] - a[k]) * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::IDENTITY_ROWS;

    #[test]
    fn mip_chain_length() {
        assert_eq!(mip_count(128), 8);
        assert_eq!(mip_count(16), 5);
        assert_eq!(mip_count(1), 1);
        assert_eq!(level_size(16, 4), 1);
    }

    #[test]
    fn downsample_averages_blocks() {
        let size = 4;
        let src: Vec<Texel> = (0..64).map(|i| [(sdf::voxel_coords(i, size)[0] / 2) as f32, 1.0, 0.0, 1.0]).collect();
        let dst = downsample(&src, size);
        assert_eq!(dst.len(), 8);
        assert_eq!(dst[sdf::voxel_index(1, 0, 0, 2)], [1.0, 1.0, 0.0, 1.0]);
        assert_eq!(dst[sdf::voxel_index(0, 1, 1, 2)], [0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn trilinear_lookup_reproduces_a_ramp() {
        let size = 8;
        let level: Vec<Texel> = (0..512).map(|i| [sdf::voxel_center_local(i, size).x, 0.0, 0.0, 1.0]).collect();
        let s = sample_level(&level, size, Vec3::new(0.1, -0.3, 0.5));
        assert!((s[0] - 0.1).abs() < 1e-5);
        assert!((s[3] - 1.0).abs() < 1e-5);
        let mips = vec![level.clone(), downsample(&level, size)];
        let half = sample_mips(&mips, size, Vec3::new(0.1, 0.0, 0.0), 0.5);
        assert!((half[0] - 0.1).abs() < 0.1);
    }

    #[test]
    fn ambient_blends_by_normal_height() {
        let c = FrameConstants { ambient_bottom: [0.0, 0.0, 0.0, 0.0], ambient_top: [1.0, 0.5, 0.0, 0.0], ..Default::default() };
        assert_eq!(ambient(&c, Some(Vec3::unit_y())), [1.0, 0.5, 0.0]);
        assert_eq!(ambient(&c, Some(-Vec3::unit_y())), [0.0, 0.0, 0.0]);
        assert_eq!(ambient(&c, None), [0.5, 0.25, 0.0]);
    }

    #[test]
    fn light_falloff_saturates_inside_the_box() {
        let light = LightSourceGpu {
            min: [-0.1, -0.1, -0.1, 0.0],
            max: [0.1, 0.1, 0.1, 0.0],
            emissive: [1.0, 1.0, 1.0, 2.0],
            world: IDENTITY_ROWS,
        };
        let (center, extent) = light_extent(&light);
        assert_eq!(center, Vec3::new(0.0, 0.0, 0.0));
        assert!((extent - 0.173_205).abs() < 1e-5);
        let constants = FrameConstants { grid_size: 4, ..Default::default() };
        let volume = vec![Voxel::EMPTY; sdf::voxel_count(4)];
        let scene = SceneView {
            constants: &constants,
            vertices: &[],
            indices: &[],
            meshes: &[],
            subsets: &[],
            nodes: &[],
            instances: &[],
            objects: &[],
            lights: &[],
            dynamic_list: &[],
        };
        let near = light_contribution(&scene, &volume, &Probe { position: Vec3::new(0.05, 0.0, 0.0), normal: None }, &light);
        assert!((near[0] - 2.0).abs() < 1e-5);
        let far = light_contribution(&scene, &volume, &Probe { position: Vec3::new(0.6, 0.0, 0.0), normal: None }, &light);
        assert!(far[0] < near[0] && far[0] > 0.0);
        let facing_away = Probe { position: Vec3::new(0.6, 0.0, 0.0), normal: Some(Vec3::unit_x()) };
        assert_eq!(light_contribution(&scene, &volume, &facing_away, &light), [0.0; 3]);
    }
}
