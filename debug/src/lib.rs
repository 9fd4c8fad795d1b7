//! Helpers shared by the debug programs: demo scene path and an orbiting camera.

use std::path::{Path, PathBuf};

use render_api::{ExtractedView, SceneDescriptor};
use sdftrace_renderer::math::{to_cols_slice, view_projection, Vec3};

/// Scene from the first CLI argument, or the bundled courtyard.
pub fn scene_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(env!("CARGO_MANIFEST_DIR")).join("scenes/courtyard.json"))
}

/// Descriptor plus the directory its mesh file names resolve against.
pub fn load_descriptor(path: &Path) -> Result<(SceneDescriptor, PathBuf), String> {
    let desc = SceneDescriptor::from_path(path)?;
    let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok((desc, root))
}

/// Camera circling the origin once every 40 seconds.
pub fn orbit_view(time: f64, size: (u32, u32)) -> ExtractedView {
    let angle = (time * std::f64::consts::TAU / 40.0) as f32;
    let eye = Vec3::new(5.5 * angle.sin(), 2.6, 5.5 * angle.cos());
    let aspect = size.0.max(1) as f32 / size.1.max(1) as f32;
    let vp = view_projection(eye, Vec3::new(0.0, 0.6, 0.0), std::f32::consts::FRAC_PI_4, aspect, 0.1, 100.0);
    ExtractedView { view_proj: to_cols_slice(&vp), eye: eye.into(), viewport_size: size, time }
}
