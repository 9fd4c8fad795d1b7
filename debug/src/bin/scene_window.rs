//! Backend-agnostic window demo: only render-api + SdfTraceWindowBackend, the host never touches wgpu.
//! Run: cargo run -p debug --bin scene_window [scene.json]

use std::path::PathBuf;
use std::time::Instant;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use render_api::{RenderBackendWindow, SceneDescriptor};
use sdftrace_bridge::SdfTraceWindowBackend;
use sdftrace_renderer::SdfConfig;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::window::WindowId;

struct App {
    window: Option<winit::window::Window>,
    backend: Option<Box<dyn RenderBackendWindow>>,
    scene: SceneDescriptor,
    asset_root: PathBuf,
    size: (u32, u32),
    start: Instant,
}

impl App {
    /// Create the backend on first redraw and load the scene into it.
    fn ensure_backend(&mut self) -> Result<(), String> {
        if self.backend.is_some() {
            return Ok(());
        }
        let window = self.window.as_ref().ok_or("no window")?;
        let mut backend = SdfTraceWindowBackend::from_window(window, self.asset_root.clone(), SdfConfig::default())?;
        backend.load_scene(&self.scene)?;
        self.backend = Some(backend);
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = winit::window::WindowAttributes::default()
            .with_title(format!("sdftrace: {}", self.scene.name))
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));
        match event_loop.create_window(attrs) {
            Ok(window) => {
                let phys = window.inner_size();
                self.size = (phys.width, phys.height);
                window.request_redraw();
                self.window = Some(window);
            }
            Err(e) => {
                log::error!("create window: {}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(physical) => {
                self.size = (physical.width, physical.height);
                if let Some(ref w) = self.window {
                    w.request_redraw();
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.ensure_backend() {
                    log::error!("backend: {}", e);
                    event_loop.exit();
                    return;
                }
                let (Some(window), Some(backend)) = (&self.window, &mut self.backend) else {
                    return;
                };
                let (raw_window, raw_display) = match (window.window_handle(), window.display_handle()) {
                    (Ok(wh), Ok(dh)) => (wh.as_raw(), dh.as_raw()),
                    _ => return,
                };
                let view = debug::orbit_view(self.start.elapsed().as_secs_f64(), self.size);
                if let Err(e) = backend.render_frame_to_window(&view, raw_window, raw_display) {
                    log::warn!("frame: {}", e);
                }
                window.request_redraw();
            }
            _ => {}
        }
    }
}

fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let (scene, asset_root) = debug::load_descriptor(&debug::scene_path())?;
    let event_loop = winit::event_loop::EventLoop::new().map_err(|e| e.to_string())?;
    let mut app = App { window: None, backend: None, scene, asset_root, size: (1280, 720), start: Instant::now() };
    event_loop.run_app(&mut app).map_err(|e| e.to_string())?;
    Ok(())
}
