//! Host loop: drive SdfTracePlugin through render_api only (load_scene + render_frame), offscreen.
//! Run: cargo run -p debug --bin plugin_loop [scene.json]

use render_api::RenderBackend;
use sdftrace_bridge::SdfTracePlugin;

const FRAMES: u32 = 80;

fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let (desc, root) = debug::load_descriptor(&debug::scene_path())?;
    let (device, queue) = pollster::block_on(request_device())?;
    let mut plugin = SdfTracePlugin::new(device, queue, root)?;
    plugin.load_scene(&desc)?;

    let start = std::time::Instant::now();
    for i in 0..FRAMES {
        let view = debug::orbit_view(i as f64 / 60.0, (640, 360));
        plugin.render_frame(&view)?;
    }
    if let Some(renderer) = plugin.renderer_mut() {
        renderer.wait_idle().map_err(String::from)?;
        log::info!("phase after {} frames: {:?}", renderer.frame_index(), renderer.phase());
    }
    println!("sdftrace plugin_loop: {} frames in {:.2?}", FRAMES, start.elapsed());
    Ok(())
}

async fn request_device() -> Result<(wgpu::Device, wgpu::Queue), String> {
    let instance = wgpu::Instance::default();
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions::default())
        .await
        .ok_or("No adapter")?;
    Ok(sdftrace_renderer::request_device(&adapter).await?)
}
