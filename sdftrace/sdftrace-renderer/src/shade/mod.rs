//! Per-pixel shading from the visibility buffer and the edge-aware resolve.

use cgmath::{InnerSpace, Vector4};

use crate::backend::SceneView;
use crate::frame::FrameConstants;
use crate::irradiance::{self, Probe, Texel};
use crate::math::{intersect_triangle, rows_point, Mat4, Vec3};
use crate::sdf::{unpack_owner, Voxel, VOXEL_NONE};

/// Luma contrast below which a pixel is never treated as an edge.
pub const EDGE_THRESHOLD_MIN: f32 = 0.0312;
/// Luma contrast, relative to the local maximum, that marks an edge.
pub const EDGE_THRESHOLD: f32 = 0.125;

/// Eye position and unit direction through the centre of pixel `(x, y)`.
pub fn camera_ray(c: &FrameConstants, x: u32, y: u32) -> (Vec3, Vec3) {
    let (w, h) = (c.viewport[0].max(1) as f32, c.viewport[1].max(1) as f32);
    let ndc_x = (x as f32 + 0.5) / w * 2.0 - 1.0;
    let ndc_y = 1.0 - (y as f32 + 0.5) / h * 2.0;
    let inv = Mat4::from(c.inv_view_proj);
    let unproject = |z: f32| {
        let p = inv * Vector4::new(ndc_x, ndc_y, z, 1.0);
        p.truncate() / p.w
    };
    let eye = Vec3::new(c.eye[0], c.eye[1], c.eye[2]);
    let dir = (unproject(1.0) - unproject(0.0)).normalize();
    (eye, dir)
}

/// HDR colour of one pixel.
pub fn shade_pixel(scene: &SceneView, volume: &[Voxel], irradiance: &[Vec<Texel>], id: u32, x: u32, y: u32) -> Texel {
    let c = scene.constants;
    let (eye, dir) = camera_ray(c, x, y);
    let sky = || {
        let s = irradiance::ambient(c, Some(dir));
        [s[0], s[1], s[2], 1.0]
    };
    if id == VOXEL_NONE {
        return sky();
    }
    let (mesh, prim) = unpack_owner(id);
    let (Some(tri), Some(obj)) = (scene.triangle(mesh, prim), scene.objects.get(mesh as usize)) else {
        return sky();
    };
    let world = tri.positions.map(|p| rows_point(&obj.world, p));
    let bary = intersect_triangle(eye, dir, world[0], world[1], world[2], f32::MAX)
        .map_or([1.0 / 3.0, 1.0 / 3.0], |hit| [hit.u, hit.v]);
    let Some((p, mut n)) = irradiance::surface_point(scene, mesh, prim, bary) else {
        return sky();
    };
    if n.dot(dir) > 0.0 {
        n = -n;
    }
    let (albedo, emissive) = scene.subset_of(mesh, prim).map_or(([0.8; 3], [0.0; 3]), |s| {
        ([s.base_color[0], s.base_color[1], s.base_color[2]], [s.emissive[0], s.emissive[1], s.emissive[2]])
    });

    let voxel = 2.0 * c.volume_radius / c.grid_size.max(1) as f32;
    let probe = Probe { position: p + n * voxel, normal: Some(n) };
    let mut direct = [0.0f32; 3];
    for light in scene.lights {
        let l = irradiance::light_contribution(scene, volume, &probe, light);
        for k in 0..3 {
            direct[k] += l[k];
        }
    }
    let local = rows_point(&c.volume_world_inv, probe.position);
    let mip = (p - eye).magnitude() * c.mip_scale;
    let indirect = irradiance::sample_mips(irradiance, c.grid_size, local, mip);
    let rgb: [f32; 3] = std::array::from_fn(|k| albedo[k] * (direct[k] + indirect[k]) + emissive[k]);
    [rgb[0], rgb[1], rgb[2], 1.0]
}

pub fn tone_map(rgb: [f32; 3], mode: u32) -> [f32; 3] {
    match mode {
        // Reinhard
        0 => rgb.map(|v| v.max(0.0) / (1.0 + v.max(0.0))),
        _ => rgb.map(|v| v.clamp(0.0, 1.0)),
    }
}

fn luma(rgb: [f32; 3]) -> f32 {
    0.299 * rgb[0] + 0.587 * rgb[1] + 0.114 * rgb[2]
}

/// FXAA-style resolve of pixel `(x, y)` followed by tone mapping.
pub fn resolve_pixel(hdr: &[Texel], width: u32, height: u32, x: u32, y: u32, mode: u32) -> Texel {
    let fetch = |dx: i32, dy: i32| {
        let sx = (x as i32 + dx).clamp(0, width as i32 - 1) as usize;
        let sy = (y as i32 + dy).clamp(0, height as i32 - 1) as usize;
        let t = hdr[sy * width as usize + sx];
        tone_map([t[0], t[1], t[2]], mode)
    };
    let m = fetch(0, 0);
    let (n, s, e, w) = (fetch(0, -1), fetch(0, 1), fetch(1, 0), fetch(-1, 0));
    let (lm, ln, ls, le, lw) = (luma(m), luma(n), luma(s), luma(e), luma(w));
    let max = lm.max(ln).max(ls).max(le).max(lw);
    let min = lm.min(ln).min(ls).min(le).min(lw);
    let range = max - min;
    if range < EDGE_THRESHOLD_MIN.max(max * EDGE_THRESHOLD) {
        return [m[0], m[1], m[2], 1.0];
    }
    let horizontal = (ln + ls - 2.0 * lm).abs() >= (le + lw - 2.0 * lm).abs();
    let (a, la, b, lb) = if horizontal { (n, ln, s, ls) } else { (w, lw, e, le) };
    let other = if (la - lm).abs() >= (lb - lm).abs() { a } else { b };
    let sub = (((ln + ls + le + lw) * 0.25 - lm).abs() / range).clamp(0.0, 1.0);
    let smooth = sub * sub * (3.0 - 2.0 * sub);
    let blend = smooth * smooth * 0.75;
    let out: [f32; 3] = std::array::from_fn(|k| m[k] + (other[k] - m[k]) * blend * 0.5);
    [out[0], out[1], out[2], 1.0]
}
