//! Traits for render backends. The host uses these to load a scene and render frames uniformly.

use crate::{ExtractedView, SceneDescriptor};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

/// Render backend the host drives without knowing which device implementation sits behind it.
pub trait RenderBackend: Send {
    /// Load every mesh and light of the scene. Any failure aborts the whole load.
    fn load_scene(&mut self, scene: &SceneDescriptor) -> Result<(), String>;

    /// Render one frame. Submits work internally; caller does not need to submit command buffers.
    fn render_frame(&mut self, view: &ExtractedView) -> Result<(), String>;
}

/// Extension for backends that can present to a window. Host passes raw handles (e.g. from winit);
/// the backend owns swapchain/surface and performs get_current_texture + present internally.
pub trait RenderBackendWindow: RenderBackend + Send {
    /// Render one frame and present to the window identified by the given raw handles.
    /// The backend configures the surface from `view.viewport_size` and submits work.
    fn render_frame_to_window(
        &mut self,
        view: &ExtractedView,
        raw_window_handle: RawWindowHandle,
        raw_display_handle: RawDisplayHandle,
    ) -> Result<(), String>;
}
