//! wgpu backend: the passes run as WGSL compute/render pipelines over storage buffers laid out
//! exactly like the host structs. The two-level BVH lives in one storage buffer (the arena) and
//! is traversed in the shaders.

mod layouts;
mod pipelines;
mod resources;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use layouts::BindLayouts;
use pipelines::Pipelines;
use resources::{FrameSlot, FrameTargets, SceneBuffers, VolumeResources};

use super::{GpuBackend, PassKind, SceneUpload, VOXEL_GROUP};
use crate::accel::AccelWrite;
use crate::error::{Error, Result};
use crate::frame::FrameSnapshot;
use crate::irradiance;
use crate::mesh::AlphaMode;

/// Storage buffers bound by the widest compute pass (frame 3, scene 6, SDF 1).
const REQUIRED_STORAGE_BUFFERS: u32 = 10;

/// Request a device able to run every pass, with the adapter's own limits.
pub async fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue)> {
    let limits = adapter.limits();
    if limits.max_storage_buffers_per_shader_stage < REQUIRED_STORAGE_BUFFERS {
        return Err(Error::Device(format!(
            "adapter supports {} storage buffers per stage, {} required",
            limits.max_storage_buffers_per_shader_stage, REQUIRED_STORAGE_BUFFERS
        )));
    }
    adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("sdftrace_device"),
                required_features: wgpu::Features::empty(),
                required_limits: limits,
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        )
        .await
        .map_err(|e| Error::Device(e.to_string()))
}

struct SceneState {
    buffers: SceneBuffers,
    bind_group: wgpu::BindGroup,
    volume: VolumeResources,
    slots: Vec<FrameSlot>,
    grid_size: u32,
}

pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    layouts: BindLayouts,
    pipelines: Pipelines,
    sampler: wgpu::Sampler,
    scene: Option<SceneState>,
    targets: Option<FrameTargets>,
    encoder: Option<(usize, wgpu::CommandEncoder)>,
    /// Last completed frame + 1; 0 until the first submission finishes.
    completed: Arc<AtomicU64>,
}

impl WgpuBackend {
    /// Pipelines are compiled for `output_format`; resolve targets must match it.
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, output_format: wgpu::TextureFormat) -> Result<Self> {
        let layouts = BindLayouts::new(&device);
        let pipelines = Pipelines::new(&device, &layouts, output_format);
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("sdftrace_irradiance_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        Ok(Self {
            device,
            queue,
            layouts,
            pipelines,
            sampler,
            scene: None,
            targets: None,
            encoder: None,
            completed: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn scene(&self) -> Result<&SceneState> {
        self.scene.as_ref().ok_or_else(|| Error::Device("no scene uploaded".to_string()))
    }

    /// Replace the arena with one of at least `bytes`, keeping its contents.
    fn grow_arena(&mut self, bytes: u64) -> Result<()> {
        let scene = self.scene.as_mut().ok_or_else(|| Error::Device("no scene uploaded".to_string()))?;
        let old = &scene.buffers.nodes;
        let size = bytes.next_power_of_two();
        log::debug!("growing acceleration arena from {} to {} bytes", old.size(), size);
        let grown = resources::storage_buffer(&self.device, "sdftrace_accel_arena", size, wgpu::BufferUsages::COPY_SRC);
        let mut encoder =
            self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("sdftrace_arena_grow") });
        encoder.copy_buffer_to_buffer(old, 0, &grown, 0, old.size());
        self.queue.submit([encoder.finish()]);
        scene.buffers.nodes = grown;
        scene.bind_group = scene.buffers.bind_group(&self.device, &self.layouts.scene);
        Ok(())
    }
}

impl GpuBackend for WgpuBackend {
    type Target = wgpu::TextureView;

    fn create_scene(&mut self, scene: &SceneUpload) -> Result<()> {
        let buffers = SceneBuffers::new(&self.device, &self.queue, scene);
        let bind_group = buffers.bind_group(&self.device, &self.layouts.scene);
        let slots = (0..scene.frame_count.max(1))
            .map(|_| FrameSlot::new(&self.device, &self.layouts.frame, scene.meshes.len(), scene.light_count as usize))
            .collect();
        log::info!(
            "uploaded {} vertices, {} indices, {} meshes; SDF {}^3 with {} irradiance mips",
            scene.vertices.len(),
            scene.indices.len(),
            scene.meshes.len(),
            scene.grid_size,
            scene.mip_count
        );
        self.scene = Some(SceneState {
            buffers,
            bind_group,
            volume: VolumeResources::new(&self.device, scene.grid_size, scene.mip_count),
            slots,
            grid_size: scene.grid_size,
        });
        Ok(())
    }

    fn write_acceleration(&mut self, writes: &[AccelWrite]) -> Result<()> {
        let needed = writes.iter().map(|w| w.slot.offset + w.slot.size).max().unwrap_or(0);
        if needed > self.scene()?.buffers.nodes.size() {
            self.grow_arena(needed)?;
        }
        let nodes = &self.scene()?.buffers.nodes;
        for w in writes {
            self.queue.write_buffer(nodes, w.slot.offset, bytemuck::cast_slice(&w.nodes));
        }
        Ok(())
    }

    fn write_frame(&mut self, slot: usize, frame: &FrameSnapshot) -> Result<()> {
        let slots = &self.scene()?.slots;
        let dst = slots.get(slot).ok_or_else(|| Error::Device(format!("frame slot {} out of range", slot)))?;
        dst.write(&self.queue, frame)
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let existing = self.targets.take();
        self.targets = Some(FrameTargets::ensure_size(&self.device, existing, width, height)?);
        Ok(())
    }

    fn begin_frame(&mut self, slot: usize) -> Result<()> {
        let encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("sdftrace_frame") });
        self.encoder = Some((slot, encoder));
        Ok(())
    }

    fn encode(&mut self, pass: PassKind, groups: [u32; 3], target: &wgpu::TextureView) -> Result<()> {
        let scene = self.scene.as_ref().ok_or_else(|| Error::Device("no scene uploaded".to_string()))?;
        let (slot, encoder) = self.encoder.as_mut().ok_or_else(|| Error::Device("pass encoded outside a frame".to_string()))?;
        let ctx = PassContext {
            device: &self.device,
            layouts: &self.layouts,
            pipelines: &self.pipelines,
            sampler: &self.sampler,
            scene,
            targets: self.targets.as_ref(),
            frame_group: &scene.slots[*slot].bind_group,
        };
        match pass {
            PassKind::ClearSdf => ctx.sdf_pass(encoder, pass, &self.pipelines.clear, groups),
            PassKind::BuildSdf => ctx.sdf_pass(encoder, pass, &self.pipelines.build, groups),
            PassKind::UpdateSdf => ctx.sdf_pass(encoder, pass, &self.pipelines.update, groups),
            // refit nodes arrive through write_acceleration before submission
            PassKind::RefitAccel => Ok(()),
            PassKind::Visibility => ctx.visibility(encoder),
            PassKind::ShadeVolume => ctx.shade_volume(encoder, groups),
            PassKind::GenerateMips => ctx.generate_mips(encoder),
            PassKind::Shade => ctx.shade(encoder, groups),
            PassKind::Resolve => ctx.resolve(encoder, target),
        }
    }

    fn end_frame(&mut self, frame: u64) -> Result<()> {
        let (_, encoder) = self.encoder.take().ok_or_else(|| Error::Device("end_frame without begin_frame".to_string()))?;
        self.queue.submit([encoder.finish()]);
        let completed = Arc::clone(&self.completed);
        self.queue.on_submitted_work_done(move || {
            completed.fetch_max(frame + 1, Ordering::AcqRel);
        });
        Ok(())
    }

    fn completed_frame(&self) -> Option<u64> {
        let _ = self.device.poll(wgpu::Maintain::Poll);
        self.completed.load(Ordering::Acquire).checked_sub(1)
    }

    fn wait_idle(&mut self) -> Result<()> {
        let _ = self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }
}

/// Borrowed state one pass encodes against.
struct PassContext<'a> {
    device: &'a wgpu::Device,
    layouts: &'a BindLayouts,
    pipelines: &'a Pipelines,
    sampler: &'a wgpu::Sampler,
    scene: &'a SceneState,
    targets: Option<&'a FrameTargets>,
    frame_group: &'a wgpu::BindGroup,
}

impl PassContext<'_> {
    fn bind(&self, label: &str, layout: &wgpu::BindGroupLayout, entries: &[wgpu::BindGroupEntry]) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor { label: Some(label), layout, entries })
    }

    fn targets(&self) -> Result<&FrameTargets> {
        self.targets.ok_or_else(|| Error::Device("viewport not sized".to_string()))
    }

    fn dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        pass_group: &wgpu::BindGroup,
        groups: [u32; 3],
    ) {
        let mut cp = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some(label), timestamp_writes: None });
        cp.set_pipeline(pipeline);
        cp.set_bind_group(0, self.frame_group, &[]);
        cp.set_bind_group(1, &self.scene.bind_group, &[]);
        cp.set_bind_group(2, pass_group, &[]);
        cp.dispatch_workgroups(groups[0], groups[1], groups[2]);
    }

    fn sdf_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pass: PassKind,
        pipeline: &wgpu::ComputePipeline,
        groups: [u32; 3],
    ) -> Result<()> {
        let group = self.bind(
            "sdftrace_sdf_bind_group",
            &self.layouts.sdf,
            &[wgpu::BindGroupEntry { binding: 0, resource: self.scene.volume.sdf.as_entire_binding() }],
        );
        self.dispatch(encoder, pass.label(), pipeline, &group, groups);
        Ok(())
    }

    fn visibility(&self, encoder: &mut wgpu::CommandEncoder) -> Result<()> {
        let targets = self.targets()?;
        let vis_view = targets.visibility_view();
        let depth_view = targets.depth_view();
        let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("sdftrace_visibility"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &vis_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color { r: u32::MAX as f64, g: 0.0, b: 0.0, a: 0.0 }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth_view,
                depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Discard }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        rp.set_bind_group(0, self.frame_group, &[]);
        rp.set_bind_group(1, &self.scene.bind_group, &[]);
        let buffers = &self.scene.buffers;
        for (mesh, info) in buffers.mesh_info.iter().enumerate() {
            let start = info.subset_start as usize;
            let Some(subsets) = buffers.subset_info.get(start..start + info.subset_count as usize) else {
                continue;
            };
            for s in subsets.iter().filter(|s| s.is_visible()) {
                let pipeline = if s.alpha_mode == AlphaMode::Opaque.as_u32() {
                    &self.pipelines.visibility_opaque
                } else {
                    &self.pipelines.visibility_two_sided
                };
                rp.set_pipeline(pipeline);
                let mesh = mesh as u32;
                rp.draw(s.index_offset..s.index_offset + s.index_count, mesh..mesh + 1);
            }
        }
        Ok(())
    }

    fn shade_volume(&self, encoder: &mut wgpu::CommandEncoder, groups: [u32; 3]) -> Result<()> {
        let volume = &self.scene.volume;
        let level0 = volume.levels.first().ok_or_else(|| Error::Device("irradiance has no levels".to_string()))?;
        let group = self.bind(
            "sdftrace_shade_volume_bind_group",
            &self.layouts.shade_volume,
            &[
                wgpu::BindGroupEntry { binding: 0, resource: volume.sdf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(level0) },
            ],
        );
        self.dispatch(encoder, PassKind::ShadeVolume.label(), &self.pipelines.shade_volume, &group, groups);
        Ok(())
    }

    /// One dispatch per level, each reading the level above.
    fn generate_mips(&self, encoder: &mut wgpu::CommandEncoder) -> Result<()> {
        let levels = &self.scene.volume.levels;
        for l in 1..levels.len() {
            let group = self.bind(
                "sdftrace_downsample_bind_group",
                &self.layouts.downsample,
                &[
                    wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(&levels[l - 1]) },
                    wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(&levels[l]) },
                ],
            );
            let n = irradiance::level_size(self.scene.grid_size, l as u32).div_ceil(VOXEL_GROUP);
            self.dispatch(encoder, PassKind::GenerateMips.label(), &self.pipelines.downsample, &group, [n, n, n]);
        }
        Ok(())
    }

    fn shade(&self, encoder: &mut wgpu::CommandEncoder, groups: [u32; 3]) -> Result<()> {
        let targets = self.targets()?;
        let (vis, hdr) = (targets.visibility_view(), targets.hdr_view());
        let volume = &self.scene.volume;
        let group = self.bind(
            "sdftrace_shade_bind_group",
            &self.layouts.shade,
            &[
                wgpu::BindGroupEntry { binding: 0, resource: volume.sdf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&vis) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(&volume.full) },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::Sampler(self.sampler) },
                wgpu::BindGroupEntry { binding: 4, resource: wgpu::BindingResource::TextureView(&hdr) },
            ],
        );
        self.dispatch(encoder, PassKind::Shade.label(), &self.pipelines.shade, &group, groups);
        Ok(())
    }

    fn resolve(&self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) -> Result<()> {
        let hdr_view = self.targets()?.hdr_view();
        let group = self.bind(
            "sdftrace_resolve_bind_group",
            &self.layouts.resolve,
            &[wgpu::BindGroupEntry { binding: 5, resource: wgpu::BindingResource::TextureView(&hdr_view) }],
        );
        let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("sdftrace_resolve"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations { load: wgpu::LoadOp::Clear(wgpu::Color::BLACK), store: wgpu::StoreOp::Store },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        rp.set_pipeline(&self.pipelines.resolve);
        rp.set_bind_group(0, self.frame_group, &[]);
        rp.set_bind_group(1, &self.scene.bind_group, &[]);
        rp.set_bind_group(2, &group, &[]);
        rp.draw(0..3, 0..1);
        Ok(())
    }
}
