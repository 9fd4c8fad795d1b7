//! Shared render backend API for the SDF tracing renderer.
//! Defines the scene descriptor document, per-frame view data and the RenderBackend traits so a
//! host can drive the renderer (load_scene + render_frame) without touching GPU types.

mod backend;
mod extract;
mod scene;

pub use backend::{RenderBackend, RenderBackendWindow};
pub use extract::ExtractedView;
pub use scene::{LightSourceDesc, MeshDesc, SceneDescriptor};
pub use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
