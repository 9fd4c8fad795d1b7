//! SDF tracing plugin: implements RenderBackend for the host.

use std::path::PathBuf;
use std::sync::Arc;

use render_api::{ExtractedView, RenderBackend, SceneDescriptor};
use sdftrace_renderer::{Error, FileMeshLoader, Renderer, Scene, SdfConfig, WgpuBackend};

/// Colour target the plugin resolves into when the host gives it none.
struct OffscreenTarget {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: (u32, u32),
}

impl OffscreenTarget {
    fn ensure_size(
        device: &wgpu::Device,
        existing: Option<Self>,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Self {
        if let Some(t) = existing {
            if t.size == (width, height) {
                return t;
            }
        }
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("sdftrace_offscreen"),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&Default::default());
        Self { _texture: texture, view, size: (width, height) }
    }
}

/// Owns the wgpu device/queue and, once a scene is loaded, the renderer.
pub struct SdfTracePlugin {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: SdfConfig,
    loader: FileMeshLoader,
    renderer: Option<Renderer<WgpuBackend>>,
    offscreen: Option<OffscreenTarget>,
}

impl SdfTracePlugin {
    /// Create with default config; mesh file names resolve against `asset_root`.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, asset_root: impl Into<PathBuf>) -> Result<Self, String> {
        Self::new_with_config(device, queue, asset_root, SdfConfig::default())
    }

    pub fn new_with_config(
        device: wgpu::Device,
        queue: wgpu::Queue,
        asset_root: impl Into<PathBuf>,
        config: SdfConfig,
    ) -> Result<Self, String> {
        config.validate()?;
        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            config,
            loader: FileMeshLoader::new(asset_root),
            renderer: None,
            offscreen: None,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn config(&self) -> &SdfConfig {
        &self.config
    }

    /// `None` until `load_scene` succeeds.
    pub fn renderer(&self) -> Option<&Renderer<WgpuBackend>> {
        self.renderer.as_ref()
    }

    pub fn renderer_mut(&mut self) -> Option<&mut Renderer<WgpuBackend>> {
        self.renderer.as_mut()
    }

    /// Render one frame into `target`, which must have the configured output format.
    pub fn render_frame_to_view(&mut self, view: &ExtractedView, target: &wgpu::TextureView) -> Result<(), String> {
        let renderer = self.renderer.as_mut().ok_or("no scene loaded")?;
        match renderer.render(view, target) {
            Err(Error::FrameInFlight { slot, frame }) => {
                log::debug!("slot {} still read by frame {}; waiting for the device", slot, frame);
                renderer.wait_idle()?;
                renderer.render(view, target)?;
                Ok(())
            }
            other => other.map_err(String::from),
        }
    }
}

impl RenderBackend for SdfTracePlugin {
    fn load_scene(&mut self, scene: &SceneDescriptor) -> Result<(), String> {
        if let Some(mut old) = self.renderer.take() {
            old.wait_idle()?;
        }
        let scene = Scene::load(scene, &self.loader)?;
        let backend = WgpuBackend::new(Arc::clone(&self.device), Arc::clone(&self.queue), self.config.output_format)?;
        self.renderer = Some(Renderer::new(backend, self.config.clone(), scene)?);
        Ok(())
    }

    fn render_frame(&mut self, view: &ExtractedView) -> Result<(), String> {
        let (width, height) = view.viewport_size;
        if width == 0 || height == 0 {
            return Ok(());
        }
        let target =
            OffscreenTarget::ensure_size(&self.device, self.offscreen.take(), self.config.output_format, width, height);
        let result = self.render_frame_to_view(view, &target.view);
        self.offscreen = Some(target);
        result
    }
}
