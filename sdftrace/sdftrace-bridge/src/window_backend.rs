//! Window-capable backend: created from a window, implements RenderBackendWindow.

use std::path::PathBuf;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use render_api::{ExtractedView, RenderBackend, RenderBackendWindow, SceneDescriptor};
use sdftrace_renderer::{request_device, SdfConfig};
use wgpu::SurfaceTargetUnsafe;

use crate::plugin::SdfTracePlugin;

/// Backend that owns the wgpu Instance and an SdfTracePlugin; can present to a window.
/// The surface is recreated each frame from the raw handles the host passes in, so its
/// lifetime never outlives the window.
pub struct SdfTraceWindowBackend {
    instance: wgpu::Instance,
    plugin: SdfTracePlugin,
    /// Format the surface is configured with; the resolve pass writes its sRGB view.
    surface_format: wgpu::TextureFormat,
}

impl SdfTraceWindowBackend {
    /// Create from a window (e.g. winit). The window is only used for raw handles and to pick
    /// an adapter that can present to it; the host keeps it alive.
    pub fn from_window(
        window: &(impl HasWindowHandle + HasDisplayHandle),
        asset_root: impl Into<PathBuf>,
        config: SdfConfig,
    ) -> Result<Box<dyn RenderBackendWindow>, String> {
        let (raw_window, raw_display) = {
            let wh = window.window_handle().map_err(|e| e.to_string())?;
            let dh = window.display_handle().map_err(|e| e.to_string())?;
            (wh.as_raw(), dh.as_raw())
        };
        let backend = pollster::block_on(Self::from_raw_handles_async(raw_window, raw_display, asset_root.into(), config))?;
        Ok(Box::new(backend))
    }

    async fn from_raw_handles_async(
        raw_window_handle: raw_window_handle::RawWindowHandle,
        raw_display_handle: raw_window_handle::RawDisplayHandle,
        asset_root: PathBuf,
        config: SdfConfig,
    ) -> Result<Self, String> {
        let instance = wgpu::Instance::default();
        let target = SurfaceTargetUnsafe::RawHandle { raw_window_handle, raw_display_handle };
        let surface = unsafe { instance.create_surface_unsafe(target).map_err(|e| e.to_string())? };
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or("No adapter")?;
        log::info!("adapter: {:?}", adapter.get_info());
        let (device, queue) = request_device(&adapter).await?;
        let caps = surface.get_capabilities(&adapter);
        let surface_format = caps.formats.first().copied().unwrap_or(wgpu::TextureFormat::Rgba8Unorm);
        let config = SdfConfig { output_format: surface_format.add_srgb_suffix(), ..config };
        let plugin = SdfTracePlugin::new_with_config(device, queue, asset_root, config)?;
        drop(surface);
        Ok(Self { instance, plugin, surface_format })
    }

    fn surface_config(&self, width: u32, height: u32) -> wgpu::SurfaceConfiguration {
        let view_format = self.plugin.config().output_format;
        wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: self.surface_format,
            width,
            height,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: wgpu::CompositeAlphaMode::Opaque,
            view_formats: if view_format == self.surface_format { vec![] } else { vec![view_format] },
            desired_maximum_frame_latency: 2,
        }
    }

    pub fn plugin(&self) -> &SdfTracePlugin {
        &self.plugin
    }
}

impl RenderBackend for SdfTraceWindowBackend {
    fn load_scene(&mut self, scene: &SceneDescriptor) -> Result<(), String> {
        self.plugin.load_scene(scene)
    }

    fn render_frame(&mut self, view: &ExtractedView) -> Result<(), String> {
        self.plugin.render_frame(view)
    }
}

impl RenderBackendWindow for SdfTraceWindowBackend {
    fn render_frame_to_window(
        &mut self,
        view: &ExtractedView,
        raw_window_handle: raw_window_handle::RawWindowHandle,
        raw_display_handle: raw_window_handle::RawDisplayHandle,
    ) -> Result<(), String> {
        let (width, height) = view.viewport_size;
        if width == 0 || height == 0 {
            return Ok(());
        }
        let target = SurfaceTargetUnsafe::RawHandle { raw_window_handle, raw_display_handle };
        let surface = unsafe { self.instance.create_surface_unsafe(target).map_err(|e| e.to_string())? };
        let config = self.surface_config(width, height);
        surface.configure(self.plugin.device(), &config);

        let frame = match surface.get_current_texture() {
            Ok(f) => f,
            Err(wgpu::SurfaceError::Outdated) | Err(wgpu::SurfaceError::Lost) => {
                surface.configure(self.plugin.device(), &config);
                surface.get_current_texture().map_err(|e| e.to_string())?
            }
            Err(wgpu::SurfaceError::Timeout) => return Err("Surface get_current_texture timeout".to_string()),
            Err(e) => return Err(e.to_string()),
        };
        let target_view = frame.texture.create_view(&wgpu::TextureViewDescriptor {
            format: Some(self.plugin.config().output_format),
            ..Default::default()
        });
        self.plugin.render_frame_to_view(view, &target_view)?;
        frame.present();
        Ok(())
    }
}
