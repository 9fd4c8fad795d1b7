//! Visibility buffer: per pixel, the packed `(mesh << 24) | primitive` of the nearest surface.
//!
//! CPU rasterizer used by the software backend. Rows are shaded in parallel; each row walks the
//! screen-space triangles overlapping it.

use cgmath::Vector4;
use rayon::prelude::*;

use crate::backend::SceneView;
use crate::math::{rows_point, Mat4, Vec3};
use crate::mesh::AlphaMode;
use crate::sdf::{pack_owner, VOXEL_NONE};

pub const VISIBILITY_NONE: u32 = VOXEL_NONE;

/// Clip-space w below which a triangle is dropped instead of clipped.
const MIN_CLIP_W: f32 = 1e-5;

#[derive(Debug, Clone)]
pub struct VisibilityBuffer {
    pub width: u32,
    pub height: u32,
    pub ids: Vec<u32>,
    /// NDC depth, cleared to 1.0.
    pub depth: Vec<f32>,
}

impl VisibilityBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let n = width as usize * height as usize;
        Self { width, height, ids: vec![VISIBILITY_NONE; n], depth: vec![1.0; n] }
    }

    pub fn id(&self, x: u32, y: u32) -> u32 {
        self.ids[y as usize * self.width as usize + x as usize]
    }
}

struct ScreenTriangle {
    id: u32,
    /// Pixel-space x, y and NDC depth.
    p: [[f32; 3]; 3],
    rows: (u32, u32),
    cols: (u32, u32),
}

fn edge(a: [f32; 3], b: [f32; 3], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

fn setup(scene: &SceneView, width: u32, height: u32) -> Vec<ScreenTriangle> {
    let view_proj = Mat4::from(scene.constants.view_proj);
    let (w, h) = (width as f32, height as f32);
    let mut out = Vec::new();
    for (mesh, info) in scene.meshes.iter().enumerate() {
        let Some(obj) = scene.objects.get(mesh) else { continue };
        let start = info.subset_start as usize;
        let Some(subsets) = scene.subsets.get(start..start + info.subset_count as usize) else { continue };
        for subset in subsets.iter().filter(|s| s.is_visible()) {
            let cull_back = subset.alpha_mode == AlphaMode::Opaque.as_u32();
            let first = subset.index_offset / 3;
            for prim in first..first + subset.index_count / 3 {
                let Some(tri) = scene.triangle(mesh as u32, prim) else { continue };
                let clip = tri.positions.map(|p| {
                    let wp = rows_point(&obj.world, p);
                    view_proj * Vector4::new(wp.x, wp.y, wp.z, 1.0)
                });
                if clip.iter().any(|c| c.w <= MIN_CLIP_W) {
                    continue;
                }
                let ndc = clip.map(|c| Vec3::new(c.x / c.w, c.y / c.w, c.z / c.w));
                let area = (ndc[1].x - ndc[0].x) * (ndc[2].y - ndc[0].y) - (ndc[1].y - ndc[0].y) * (ndc[2].x - ndc[0].x);
                if area == 0.0 || (cull_back && area < 0.0) {
                    continue;
                }
                let p = ndc.map(|n| [(n.x * 0.5 + 0.5) * w, (0.5 - n.y * 0.5) * h, n.z]);
                let min_x = p.iter().fold(f32::MAX, |a, v| a.min(v[0]));
                let max_x = p.iter().fold(f32::MIN, |a, v| a.max(v[0]));
                let min_y = p.iter().fold(f32::MAX, |a, v| a.min(v[1]));
                let max_y = p.iter().fold(f32::MIN, |a, v| a.max(v[1]));
                if max_x < 0.0 || max_y < 0.0 || min_x >= w || min_y >= h {
                    continue;
                }
                out.push(ScreenTriangle {
                    id: pack_owner(mesh as u32, prim),
                    p,
                    rows: (min_y.max(0.0) as u32, (max_y.min(h - 1.0)) as u32),
                    cols: (min_x.max(0.0) as u32, (max_x.min(w - 1.0)) as u32),
                });
            }
        }
    }
    out
}

/// Rasterize every visible subset. Opaque subsets are back-face culled; alpha-tested subsets
/// draw both faces and are dropped entirely when their coverage is below the cutoff.
pub fn rasterize(scene: &SceneView, width: u32, height: u32) -> VisibilityBuffer {
    let tris = setup(scene, width, height);
    let mut buf = VisibilityBuffer::new(width, height);
    let w = width.max(1) as usize;
    buf.ids.par_chunks_mut(w).zip(buf.depth.par_chunks_mut(w)).enumerate().for_each(|(y, (ids, depth))| {
        let y = y as u32;
        for t in tris.iter().filter(|t| t.rows.0 <= y && y <= t.rows.1) {
            let area = edge(t.p[0], t.p[1], [t.p[2][0], t.p[2][1]]);
            for x in t.cols.0..=t.cols.1 {
                let pc = [x as f32 + 0.5, y as f32 + 0.5];
                let w0 = edge(t.p[1], t.p[2], pc) / area;
                let w1 = edge(t.p[2], t.p[0], pc) / area;
                let w2 = edge(t.p[0], t.p[1], pc) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let z = w0 * t.p[0][2] + w1 * t.p[1][2] + w2 * t.p[2][2];
                let i = x as usize;
                if (0.0..=1.0).contains(&z) && z < depth[i] {
                    depth[i] = z;
                    ids[i] = t.id;
                }
            }
        }
    });
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GpuVertex, MeshInfo, SubsetInfo};
    use crate::frame::{FrameConstants, PerObject};
    use crate::math::{to_array, view_projection, IDENTITY_ROWS};

    struct Quad {
        constants: FrameConstants,
        vertices: Vec<GpuVertex>,
        indices: Vec<u32>,
        meshes: Vec<MeshInfo>,
        subsets: Vec<SubsetInfo>,
        objects: Vec<PerObject>,
    }

    impl Quad {
        /// Unit quad in the z = 0 plane facing +z, camera on +z or -z.
        fn new(eye_z: f32, alpha_mode: AlphaMode, alpha: f32) -> Self {
            let vp = view_projection(Vec3::new(0.0, 0.0, eye_z), Vec3::new(0.0, 0.0, 0.0), 1.0, 1.0, 0.1, 10.0);
            let constants = FrameConstants { view_proj: to_array(&vp), ..Default::default() };
            let vertices = [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]]
                .iter()
                .map(|p| GpuVertex { position: [p[0], p[1], 0.0, 1.0], normal: [0.0, 0.0, 1.0, 0.0] })
                .collect();
            let subsets = vec![SubsetInfo {
                base_color: [1.0, 1.0, 1.0, alpha],
                emissive: [0.0, 0.0, 0.0, 0.5],
                mesh: 0,
                index_offset: 0,
                index_count: 6,
                alpha_mode: alpha_mode.as_u32(),
            }];
            Self {
                constants,
                vertices,
                indices: vec![0, 1, 2, 0, 2, 3],
                meshes: vec![MeshInfo { index_count: 6, subset_count: 1, ..Default::default() }],
                subsets,
                objects: vec![PerObject { world: IDENTITY_ROWS, world_it: IDENTITY_ROWS, prev_world: IDENTITY_ROWS }],
            }
        }

        fn view(&self) -> SceneView<'_> {
            SceneView {
                constants: &self.constants,
                vertices: &self.vertices,
                indices: &self.indices,
                meshes: &self.meshes,
                subsets: &self.subsets,
                nodes: &[],
                instances: &[],
                objects: &self.objects,
                lights: &[],
                dynamic_list: &[],
            }
        }
    }

    #[test]
    fn front_facing_quad_covers_the_centre() {
        let quad = Quad::new(3.0, AlphaMode::Opaque, 1.0);
        let buf = rasterize(&quad.view(), 32, 32);
        let (mesh, _) = crate::sdf::unpack_owner(buf.id(16, 16));
        assert_eq!(mesh, 0);
        assert_eq!(buf.id(0, 0), VISIBILITY_NONE);
        assert!(buf.depth[16 * 32 + 16] < 1.0);
    }

    #[test]
    fn opaque_back_faces_are_culled_but_masked_are_not() {
        let opaque = Quad::new(-3.0, AlphaMode::Opaque, 1.0);
        assert!(rasterize(&opaque.view(), 16, 16).ids.iter().all(|&id| id == VISIBILITY_NONE));
        let masked = Quad::new(-3.0, AlphaMode::Mask, 1.0);
        assert_ne!(rasterize(&masked.view(), 16, 16).id(8, 8), VISIBILITY_NONE);
    }

    #[test]
    fn masked_subset_below_cutoff_is_discarded() {
        let quad = Quad::new(3.0, AlphaMode::Mask, 0.1);
        assert!(rasterize(&quad.view(), 16, 16).ids.iter().all(|&id| id == VISIBILITY_NONE));
    }
}
