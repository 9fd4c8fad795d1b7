//! Headless render on the CPU backend: warm the SDF up, then write the resolved frame as a PNG.
//! Run: cargo run -p debug --release --bin software_png [scene.json] [out.png]

use sdftrace_renderer::{FileMeshLoader, Renderer, Scene, SdfConfig, SoftwareBackend};

const SIZE: (u32, u32) = (320, 180);

fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let (desc, root) = debug::load_descriptor(&debug::scene_path())?;
    let out = std::env::args().nth(2).unwrap_or_else(|| "sdftrace.png".to_string());

    let scene = Scene::load(&desc, &FileMeshLoader::new(root))?;
    let config = SdfConfig { grid_size: 32, sample_budget: 16, rays_per_frame: 8, update_rays: 8, ..SdfConfig::default() };
    let mut renderer = Renderer::new(SoftwareBackend::new(), config, scene)?;

    let start = std::time::Instant::now();
    let frames = renderer.config().sample_budget + 1;
    for i in 0..frames {
        renderer.render(&debug::orbit_view(i as f64 / 30.0, SIZE), &())?;
    }
    log::info!("{} frames in {:.2?}, phase {:?}", frames, start.elapsed(), renderer.phase());

    let (w, h) = renderer.backend().output_size();
    let img = image::RgbaImage::from_raw(w, h, renderer.backend().output_rgba8()).ok_or("output size mismatch")?;
    img.save(&out).map_err(|e| e.to_string())?;
    println!("wrote {} ({}x{})", out, w, h);
    Ok(())
}
