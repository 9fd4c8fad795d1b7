//! SDF tracing bridge: implements render_api::RenderBackend using sdftrace-renderer.

mod plugin;
mod window_backend;

pub use plugin::SdfTracePlugin;
pub use window_backend::SdfTraceWindowBackend;
