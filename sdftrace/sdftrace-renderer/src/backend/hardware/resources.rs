//! Device resources: scene buffers, the per-slot frame buffers, the SDF/irradiance volume and
//! the viewport-sized targets.

use wgpu::TextureView;

use crate::backend::{MeshInfo, SceneUpload, SubsetInfo};
use crate::error::{Error, Result};
use crate::frame::FrameSnapshot;
use crate::sdf::{self, Voxel};

pub const VISIBILITY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Uint;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Storage bindings may not be empty; every buffer holds at least one element.
pub fn storage_buffer(device: &wgpu::Device, label: &str, bytes: u64, extra: wgpu::BufferUsages) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: bytes.max(16).next_multiple_of(4),
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | extra,
        mapped_at_creation: false,
    })
}

fn upload(device: &wgpu::Device, queue: &wgpu::Queue, label: &str, data: &[u8]) -> wgpu::Buffer {
    let buf = storage_buffer(device, label, data.len() as u64, wgpu::BufferUsages::empty());
    if !data.is_empty() {
        queue.write_buffer(&buf, 0, data);
    }
    buf
}

pub struct SceneBuffers {
    pub vertices: wgpu::Buffer,
    pub indices: wgpu::Buffer,
    pub meshes: wgpu::Buffer,
    pub subsets: wgpu::Buffer,
    pub nodes: wgpu::Buffer,
    pub dynamic_list: wgpu::Buffer,
    /// Host copies for building the visibility draw list.
    pub mesh_info: Vec<MeshInfo>,
    pub subset_info: Vec<SubsetInfo>,
}

impl SceneBuffers {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, scene: &SceneUpload) -> Self {
        Self {
            vertices: upload(device, queue, "sdftrace_vertices", bytemuck::cast_slice(&scene.vertices)),
            indices: upload(device, queue, "sdftrace_indices", bytemuck::cast_slice(&scene.indices)),
            meshes: upload(device, queue, "sdftrace_meshes", bytemuck::cast_slice(&scene.meshes)),
            subsets: upload(device, queue, "sdftrace_subsets", bytemuck::cast_slice(&scene.subsets)),
            nodes: storage_buffer(device, "sdftrace_accel_arena", scene.arena_bytes, wgpu::BufferUsages::COPY_SRC),
            dynamic_list: upload(device, queue, "sdftrace_dynamic_list", bytemuck::cast_slice(&scene.dynamic_list)),
            mesh_info: scene.meshes.clone(),
            subset_info: scene.subsets.clone(),
        }
    }

    pub fn bind_group(&self, device: &wgpu::Device, layout: &wgpu::BindGroupLayout) -> wgpu::BindGroup {
        let buffers = [&self.vertices, &self.indices, &self.meshes, &self.subsets, &self.nodes, &self.dynamic_list];
        let entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .enumerate()
            .map(|(i, b)| wgpu::BindGroupEntry { binding: i as u32, resource: b.as_entire_binding() })
            .collect();
        device.create_bind_group(&wgpu::BindGroupDescriptor { label: Some("sdftrace_scene_bind_group"), layout, entries: &entries })
    }
}

/// Buffers of one ring slot.
pub struct FrameSlot {
    constants: wgpu::Buffer,
    objects: wgpu::Buffer,
    instances: wgpu::Buffer,
    lights: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
}

impl FrameSlot {
    /// Sized for `meshes` objects and instances and `lights` light boxes.
    pub fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, meshes: usize, lights: usize) -> Self {
        let object_bytes = (meshes * std::mem::size_of::<crate::frame::PerObject>()) as u64;
        let instance_bytes = (meshes * std::mem::size_of::<crate::accel::InstanceRecord>()) as u64;
        let light_bytes = (lights * std::mem::size_of::<crate::frame::LightSourceGpu>()) as u64;
        let constants = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sdftrace_frame_constants"),
            size: std::mem::size_of::<crate::frame::FrameConstants>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let objects = storage_buffer(device, "sdftrace_objects", object_bytes, wgpu::BufferUsages::empty());
        let instances = storage_buffer(device, "sdftrace_instances", instance_bytes, wgpu::BufferUsages::empty());
        let lights = storage_buffer(device, "sdftrace_lights", light_bytes, wgpu::BufferUsages::empty());
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sdftrace_frame_bind_group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: constants.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: objects.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: instances.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: lights.as_entire_binding() },
            ],
        });
        Self { constants, objects, instances, lights, bind_group }
    }

    pub fn write(&self, queue: &wgpu::Queue, frame: &FrameSnapshot) -> Result<()> {
        let parts: [(&wgpu::Buffer, &[u8]); 3] = [
            (&self.objects, bytemuck::cast_slice(&frame.objects)),
            (&self.instances, bytemuck::cast_slice(&frame.instances)),
            (&self.lights, bytemuck::cast_slice(&frame.lights)),
        ];
        for (buf, data) in parts {
            if data.len() as u64 > buf.size() {
                return Err(Error::Allocation { resource: "frame slot", requested: data.len() as u64, available: buf.size() });
            }
        }
        queue.write_buffer(&self.constants, 0, bytemuck::bytes_of(&frame.constants));
        for (buf, data) in parts {
            if !data.is_empty() {
                queue.write_buffer(buf, 0, data);
            }
        }
        Ok(())
    }
}

/// SDF voxels and the irradiance mip chain.
pub struct VolumeResources {
    pub sdf: wgpu::Buffer,
    pub irradiance: wgpu::Texture,
    /// Single-level views, one per mip.
    pub levels: Vec<TextureView>,
    /// All levels, for filtered lookups.
    pub full: TextureView,
}

impl VolumeResources {
    pub fn new(device: &wgpu::Device, grid_size: u32, mip_count: u32) -> Self {
        let bytes = (sdf::voxel_count(grid_size) * std::mem::size_of::<Voxel>()) as u64;
        let sdf = storage_buffer(device, "sdftrace_sdf", bytes, wgpu::BufferUsages::COPY_SRC);
        let irradiance = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("sdftrace_irradiance"),
            size: wgpu::Extent3d { width: grid_size, height: grid_size, depth_or_array_layers: grid_size },
            mip_level_count: mip_count.max(1),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D3,
            format: HDR_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let levels = (0..mip_count.max(1))
            .map(|l| {
                irradiance.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("sdftrace_irradiance_level"),
                    base_mip_level: l,
                    mip_level_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();
        let full = irradiance.create_view(&Default::default());
        Self { sdf, irradiance, levels, full }
    }
}

/// Viewport-sized targets: visibility ids, depth, HDR colour.
pub struct FrameTargets {
    pub visibility: wgpu::Texture,
    pub depth: wgpu::Texture,
    pub hdr: wgpu::Texture,
    width: u32,
    height: u32,
}

impl FrameTargets {
    pub fn ensure_size(device: &wgpu::Device, existing: Option<Self>, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::Device("FrameTargets: width and height must be > 0".to_string()));
        }
        if let Some(t) = existing {
            if t.width == width && t.height == height {
                return Ok(t);
            }
        }
        let make = |label: &str, format: wgpu::TextureFormat, usage: wgpu::TextureUsages| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            })
        };
        let attachment = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
        Ok(Self {
            visibility: make("sdftrace_visibility", VISIBILITY_FORMAT, attachment),
            depth: make("sdftrace_depth", DEPTH_FORMAT, wgpu::TextureUsages::RENDER_ATTACHMENT),
            hdr: make(
                "sdftrace_hdr",
                HDR_FORMAT,
                wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
            ),
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn visibility_view(&self) -> TextureView {
        self.visibility.create_view(&Default::default())
    }

    pub fn depth_view(&self) -> TextureView {
        self.depth.create_view(&Default::default())
    }

    pub fn hdr_view(&self) -> TextureView {
        self.hdr.create_view(&Default::default())
    }
}
