//! Compute and render pipelines. Every module is `common.wgsl` followed by the pass source.

use super::layouts::BindLayouts;
use crate::backend::hardware::resources::{DEPTH_FORMAT, VISIBILITY_FORMAT};

const COMMON: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/common.wgsl"));
const SDF_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/sdf.wgsl"));
const IRRADIANCE_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/irradiance.wgsl"));
const VISIBILITY_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/visibility.wgsl"));
const SHADE_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/shade.wgsl"));
const RESOLVE_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/resolve.wgsl"));

fn module(device: &wgpu::Device, label: &str, source: &str) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(format!("{}\n{}", COMMON, source).into()),
    })
}

fn compute(
    device: &wgpu::Device,
    label: &str,
    module: &wgpu::ShaderModule,
    entry_point: &str,
    layouts: &[&wgpu::BindGroupLayout],
) -> wgpu::ComputePipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: layouts,
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        module,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}

fn visibility(
    device: &wgpu::Device,
    module: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    cull_mode: Option<wgpu::Face>,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("sdftrace_visibility_pipeline"),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("fs"),
            targets: &[Some(VISIBILITY_FORMAT.into())],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState { front_face: wgpu::FrontFace::Ccw, cull_mode, ..Default::default() },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

pub struct Pipelines {
    pub clear: wgpu::ComputePipeline,
    pub build: wgpu::ComputePipeline,
    pub update: wgpu::ComputePipeline,
    pub shade_volume: wgpu::ComputePipeline,
    pub downsample: wgpu::ComputePipeline,
    pub shade: wgpu::ComputePipeline,
    /// Back faces culled.
    pub visibility_opaque: wgpu::RenderPipeline,
    /// Alpha-tested and blended subsets draw both faces.
    pub visibility_two_sided: wgpu::RenderPipeline,
    pub resolve: wgpu::RenderPipeline,
}

impl Pipelines {
    pub fn new(device: &wgpu::Device, layouts: &BindLayouts, output_format: wgpu::TextureFormat) -> Self {
        let sdf = module(device, "sdftrace_sdf_shader", SDF_SHADER);
        let irradiance = module(device, "sdftrace_irradiance_shader", IRRADIANCE_SHADER);
        let shade = module(device, "sdftrace_shade_shader", SHADE_SHADER);
        let vis = module(device, "sdftrace_visibility_shader", VISIBILITY_SHADER);
        let resolve = module(device, "sdftrace_resolve_shader", RESOLVE_SHADER);

        let sdf_layouts = [&layouts.frame, &layouts.scene, &layouts.sdf];
        let vis_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sdftrace_visibility_layout"),
            bind_group_layouts: &[&layouts.frame, &layouts.scene],
            push_constant_ranges: &[],
        });
        let resolve_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sdftrace_resolve_layout"),
            bind_group_layouts: &[&layouts.frame, &layouts.scene, &layouts.resolve],
            push_constant_ranges: &[],
        });
        let resolve = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("sdftrace_resolve_pipeline"),
            layout: Some(&resolve_layout),
            vertex: wgpu::VertexState {
                module: &resolve,
                entry_point: Some("vs"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &resolve,
                entry_point: Some("fs"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: output_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self {
            clear: compute(device, "sdftrace_clear_sdf", &sdf, "cs_clear", &sdf_layouts),
            build: compute(device, "sdftrace_build_sdf", &sdf, "cs_build", &sdf_layouts),
            update: compute(device, "sdftrace_update_sdf", &sdf, "cs_update", &sdf_layouts),
            shade_volume: compute(
                device,
                "sdftrace_shade_volume",
                &irradiance,
                "cs_shade_volume",
                &[&layouts.frame, &layouts.scene, &layouts.shade_volume],
            ),
            downsample: compute(
                device,
                "sdftrace_downsample",
                &irradiance,
                "cs_downsample",
                &[&layouts.frame, &layouts.scene, &layouts.downsample],
            ),
            shade: compute(device, "sdftrace_shade", &shade, "cs_shade", &[&layouts.frame, &layouts.scene, &layouts.shade]),
            visibility_opaque: visibility(device, &vis, &vis_layout, Some(wgpu::Face::Back)),
            visibility_two_sided: visibility(device, &vis, &vis_layout, None),
            resolve,
        }
    }
}
