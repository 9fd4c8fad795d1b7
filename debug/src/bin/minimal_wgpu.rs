//! Minimal wgpu init (no window). Verifies the device limits and that every pipeline compiles.

use std::sync::Arc;

fn main() -> Result<(), String> {
    env_logger::init();
    pollster::block_on(run())
}

async fn run() -> Result<(), String> {
    let instance = wgpu::Instance::default();
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions::default())
        .await
        .ok_or("No adapter")?;
    let (device, queue) = sdftrace_renderer::request_device(&adapter).await?;
    let _backend =
        sdftrace_renderer::WgpuBackend::new(Arc::new(device), Arc::new(queue), wgpu::TextureFormat::Rgba8Unorm)?;
    println!("sdftrace minimal_wgpu: OK ({})", adapter.get_info().name);
    Ok(())
}
