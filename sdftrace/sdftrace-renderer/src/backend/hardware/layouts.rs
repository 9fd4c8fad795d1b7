//! Bind group layouts. Group 0 holds the per-frame ring slot, group 1 the scene-lifetime buffers,
//! group 2 the resources of one pass. Binding numbers match the WGSL declarations.

use std::num::NonZeroU64;

use crate::frame::FrameConstants;

const ALL_STAGES: wgpu::ShaderStages = wgpu::ShaderStages::VERTEX_FRAGMENT.union(wgpu::ShaderStages::COMPUTE);

fn uniform(binding: u32, size: u64) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: ALL_STAGES,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: NonZeroU64::new(size),
        },
        count: None,
    }
}

fn storage(binding: u32, read_only: bool, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn texture(
    binding: u32,
    sample_type: wgpu::TextureSampleType,
    view_dimension: wgpu::TextureViewDimension,
    visibility: wgpu::ShaderStages,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Texture { sample_type, view_dimension, multisampled: false },
        count: None,
    }
}

fn storage_texture(binding: u32, view_dimension: wgpu::TextureViewDimension) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: wgpu::TextureFormat::Rgba16Float,
            view_dimension,
        },
        count: None,
    }
}

pub struct BindLayouts {
    pub frame: wgpu::BindGroupLayout,
    pub scene: wgpu::BindGroupLayout,
    /// Clear / build / update: the SDF alone.
    pub sdf: wgpu::BindGroupLayout,
    pub shade_volume: wgpu::BindGroupLayout,
    pub downsample: wgpu::BindGroupLayout,
    pub shade: wgpu::BindGroupLayout,
    pub resolve: wgpu::BindGroupLayout,
}

impl BindLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        let create = |label: &str, entries: &[wgpu::BindGroupLayoutEntry]| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor { label: Some(label), entries })
        };
        let sdf_rw = storage(0, false, wgpu::ShaderStages::COMPUTE);
        let float3d = wgpu::TextureSampleType::Float { filterable: true };
        Self {
            frame: create(
                "sdftrace_frame_layout",
                &[
                    uniform(0, std::mem::size_of::<FrameConstants>() as u64),
                    storage(1, true, ALL_STAGES),
                    storage(2, true, ALL_STAGES),
                    storage(3, true, ALL_STAGES),
                ],
            ),
            scene: create("sdftrace_scene_layout", &(0..6).map(|b| storage(b, true, ALL_STAGES)).collect::<Vec<_>>()),
            sdf: create("sdftrace_sdf_layout", &[sdf_rw]),
            shade_volume: create(
                "sdftrace_shade_volume_layout",
                &[sdf_rw, storage_texture(1, wgpu::TextureViewDimension::D3)],
            ),
            downsample: create(
                "sdftrace_downsample_layout",
                &[
                    texture(2, float3d, wgpu::TextureViewDimension::D3, wgpu::ShaderStages::COMPUTE),
                    storage_texture(3, wgpu::TextureViewDimension::D3),
                ],
            ),
            shade: create(
                "sdftrace_shade_layout",
                &[
                    sdf_rw,
                    texture(1, wgpu::TextureSampleType::Uint, wgpu::TextureViewDimension::D2, wgpu::ShaderStages::COMPUTE),
                    texture(2, float3d, wgpu::TextureViewDimension::D3, wgpu::ShaderStages::COMPUTE),
                    wgpu::BindGroupLayoutEntry {
                        binding: 3,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                    storage_texture(4, wgpu::TextureViewDimension::D2),
                ],
            ),
            resolve: create(
                "sdftrace_resolve_layout",
                &[texture(
                    5,
                    wgpu::TextureSampleType::Float { filterable: false },
                    wgpu::TextureViewDimension::D2,
                    wgpu::ShaderStages::FRAGMENT,
                )],
            ),
        }
    }
}
