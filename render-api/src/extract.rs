//! Per-frame data extracted from the host and handed to the render world.

/// View/camera data for the current frame.
#[derive(Clone, Debug)]
pub struct ExtractedView {
    /// Column-major 4x4 view-projection (WGSL/wgpu convention, NDC z in [0, 1]).
    pub view_proj: [f32; 16],
    /// Camera position in world space.
    pub eye: [f32; 3],
    pub viewport_size: (u32, u32),
    /// Host clock in seconds. Drives the animation of dynamic meshes.
    pub time: f64,
}

impl Default for ExtractedView {
    fn default() -> Self {
        Self {
            view_proj: [
                1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
            ],
            eye: [0.0, 0.0, 0.0],
            viewport_size: (800, 600),
            time: 0.0,
        }
    }
}
