//! CPU backend: every pass runs on the host with rayon, over the same layouts the shaders use.
//! Work completes inside `encode`, so a frame is done as soon as it ends.

use rayon::prelude::*;

use super::{GpuBackend, MeshInfo, PassKind, SceneUpload, SceneView, SubsetInfo, GpuVertex};
use crate::accel::{AccelWrite, BvhNode, NODE_BYTES};
use crate::error::{Error, Result};
use crate::frame::FrameSnapshot;
use crate::irradiance::{self, Texel};
use crate::sdf::{self, Voxel};
use crate::shade;
use crate::visibility::{self, VisibilityBuffer};

#[derive(Default)]
pub struct SoftwareBackend {
    vertices: Vec<GpuVertex>,
    indices: Vec<u32>,
    meshes: Vec<MeshInfo>,
    subsets: Vec<SubsetInfo>,
    dynamic_list: Vec<u32>,
    nodes: Vec<BvhNode>,
    frames: Vec<FrameSnapshot>,
    grid_size: u32,
    sdf: Vec<Voxel>,
    irradiance: Vec<Vec<Texel>>,
    visibility: Option<VisibilityBuffer>,
    hdr: Vec<Texel>,
    output: Vec<Texel>,
    size: (u32, u32),
    slot: Option<usize>,
    completed: Option<u64>,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sdf(&self) -> &[Voxel] {
        &self.sdf
    }

    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    pub fn irradiance_level(&self, level: usize) -> Option<&[Texel]> {
        self.irradiance.get(level).map(Vec::as_slice)
    }

    pub fn visibility(&self) -> Option<&VisibilityBuffer> {
        self.visibility.as_ref()
    }

    pub fn hdr(&self) -> &[Texel] {
        &self.hdr
    }

    /// Tone-mapped image of the last resolve, row-major.
    pub fn output(&self) -> &[Texel] {
        &self.output
    }

    pub fn output_size(&self) -> (u32, u32) {
        self.size
    }

    /// Resolved image as RGBA8.
    pub fn output_rgba8(&self) -> Vec<u8> {
        self.output.iter().flat_map(|t| t.map(|v| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8)).collect()
    }

    fn view(&self) -> Result<SceneView<'_>> {
        let slot = self.slot.ok_or_else(|| Error::Device("pass encoded outside begin_frame/end_frame".to_string()))?;
        let frame = self
            .frames
            .get(slot)
            .ok_or_else(|| Error::Device(format!("frame slot {} was never written", slot)))?;
        Ok(SceneView {
            constants: &frame.constants,
            vertices: &self.vertices,
            indices: &self.indices,
            meshes: &self.meshes,
            subsets: &self.subsets,
            nodes: &self.nodes,
            instances: &frame.instances,
            objects: &frame.objects,
            lights: &frame.lights,
            dynamic_list: &self.dynamic_list,
        })
    }

    fn run_voxels(&self, kernel: fn(&SceneView, usize, Voxel) -> Voxel) -> Result<Vec<Voxel>> {
        let view = self.view()?;
        Ok(self.sdf.par_iter().enumerate().map(|(i, &v)| kernel(&view, i, v)).collect())
    }
}

impl GpuBackend for SoftwareBackend {
    type Target = ();

    fn create_scene(&mut self, scene: &SceneUpload) -> Result<()> {
        self.vertices = scene.vertices.clone();
        self.indices = scene.indices.clone();
        self.meshes = scene.meshes.clone();
        self.subsets = scene.subsets.clone();
        self.dynamic_list = scene.dynamic_list.clone();
        self.nodes = vec![BvhNode::default(); (scene.arena_bytes / NODE_BYTES) as usize];
        self.frames = vec![FrameSnapshot::default(); scene.frame_count.max(1)];
        self.grid_size = scene.grid_size;
        self.sdf = vec![Voxel::EMPTY; sdf::voxel_count(scene.grid_size)];
        self.irradiance = (0..scene.mip_count)
            .map(|l| vec![[0.0; 4]; sdf::voxel_count(irradiance::level_size(scene.grid_size, l))])
            .collect();
        Ok(())
    }

    fn write_acceleration(&mut self, writes: &[AccelWrite]) -> Result<()> {
        for w in writes {
            let first = w.slot.first_element(NODE_BYTES) as usize;
            let end = first + w.nodes.len();
            if end > self.nodes.len() {
                log::debug!("growing acceleration arena to {} nodes", end);
                self.nodes.resize(end, BvhNode::default());
            }
            self.nodes[first..end].copy_from_slice(&w.nodes);
        }
        Ok(())
    }

    fn write_frame(&mut self, slot: usize, frame: &FrameSnapshot) -> Result<()> {
        let dst = self
            .frames
            .get_mut(slot)
            .ok_or_else(|| Error::Device(format!("frame slot {} out of range", slot)))?;
        dst.clone_from(frame);
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(Error::Device("viewport width and height must be > 0".to_string()));
        }
        self.size = (width, height);
        let n = width as usize * height as usize;
        self.hdr = vec![[0.0; 4]; n];
        self.output = vec![[0.0; 4]; n];
        self.visibility = None;
        Ok(())
    }

    fn begin_frame(&mut self, slot: usize) -> Result<()> {
        self.slot = Some(slot);
        Ok(())
    }

    fn encode(&mut self, pass: PassKind, _groups: [u32; 3], _target: &()) -> Result<()> {
        let (w, h) = self.size;
        match pass {
            PassKind::ClearSdf => self.sdf.fill(Voxel::EMPTY),
            PassKind::BuildSdf => self.sdf = self.run_voxels(sdf::build_voxel)?,
            PassKind::UpdateSdf => self.sdf = self.run_voxels(sdf::update_voxel)?,
            PassKind::RefitAccel => {}
            PassKind::Visibility => {
                let buf = visibility::rasterize(&self.view()?, w, h);
                self.visibility = Some(buf);
            }
            PassKind::ShadeVolume => {
                let view = self.view()?;
                let level: Vec<Texel> =
                    (0..self.sdf.len()).into_par_iter().map(|i| irradiance::shade_voxel(&view, &self.sdf, i)).collect();
                if let Some(l0) = self.irradiance.first_mut() {
                    *l0 = level;
                }
            }
            PassKind::GenerateMips => {
                for l in 1..self.irradiance.len() {
                    let src = irradiance::level_size(self.grid_size, l as u32 - 1);
                    self.irradiance[l] = irradiance::downsample(&self.irradiance[l - 1], src);
                }
            }
            PassKind::Shade => {
                let view = self.view()?;
                let vis = self.visibility.as_ref().ok_or_else(|| Error::Device("shade before visibility".to_string()))?;
                let hdr: Vec<Texel> = (0..(w * h) as usize)
                    .into_par_iter()
                    .map(|i| {
                        let (x, y) = ((i % w as usize) as u32, (i / w as usize) as u32);
                        shade::shade_pixel(&view, &self.sdf, &self.irradiance, vis.ids[i], x, y)
                    })
                    .collect();
                self.hdr = hdr;
            }
            PassKind::Resolve => {
                let mode = self.view()?.constants.tone_mapping;
                let out: Vec<Texel> = (0..(w * h) as usize)
                    .into_par_iter()
                    .map(|i| shade::resolve_pixel(&self.hdr, w, h, (i % w as usize) as u32, (i / w as usize) as u32, mode))
                    .collect();
                self.output = out;
            }
        }
        Ok(())
    }

    fn end_frame(&mut self, frame: u64) -> Result<()> {
        self.slot = None;
        self.completed = Some(frame);
        Ok(())
    }

    fn completed_frame(&self) -> Option<u64> {
        self.completed
    }

    fn wait_idle(&mut self) -> Result<()> {
        Ok(())
    }
}
