#![allow(dead_code)]

use render_api::ExtractedView;
use sdftrace_renderer::math::{to_cols_slice, view_projection, Vec3};
use sdftrace_renderer::mesh::{shapes, LoadedMesh};
use sdftrace_renderer::{DynamicMotion, MeshEntry, MeshPose, Renderer, Scene, SdfConfig, SoftwareBackend};

pub const SPHERE_SCALE: f32 = 0.25;
pub const ORBIT_RADIUS: f32 = 1.0;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Small volume: 16^3 voxels, 8 warm-up frames of 8 rays.
pub fn small_config() -> SdfConfig {
    SdfConfig {
        grid_size: 16,
        sample_budget: 8,
        rays_per_frame: 8,
        update_rays: 8,
        frame_count: 2,
        dynamic_motion: DynamicMotion::External,
        ..SdfConfig::default()
    }
}

pub fn orbit_pose(angle: f32) -> MeshPose {
    MeshPose::new(Vec3::new(angle.cos() * ORBIT_RADIUS, 0.0, angle.sin() * ORBIT_RADIUS), SPHERE_SCALE)
}

/// Static unit cube at the origin plus a small dynamic sphere on a unit orbit around it.
pub fn cube_and_sphere() -> Scene {
    cube_and_sphere_at(0.0)
}

/// As [`cube_and_sphere`], with the sphere loaded at orbit angle `angle`.
pub fn cube_and_sphere_at(angle: f32) -> Scene {
    let cube = MeshEntry::new("cube", shapes::unit_box(), MeshPose::new(Vec3::new(0.0, 0.0, 0.0), 1.0), false);
    let sphere = MeshEntry::new("sphere", shapes::uv_sphere(24, 16), orbit_pose(angle), true);
    Scene::new("cube_and_sphere", vec![cube, sphere], Vec::new()).unwrap()
}

pub fn static_cube() -> Scene {
    let cube = MeshEntry::new("cube", shapes::unit_box(), MeshPose::new(Vec3::new(0.0, 0.0, 0.0), 1.0), false);
    Scene::new("cube", vec![cube], Vec::new()).unwrap()
}

/// Unit box stretched per axis.
pub fn stretched_box(extent: [f32; 3]) -> LoadedMesh {
    let mut mesh = shapes::unit_box();
    for p in &mut mesh.positions {
        for k in 0..3 {
            p[k] *= extent[k];
        }
    }
    mesh
}

pub fn view(eye: Vec3, width: u32, height: u32) -> ExtractedView {
    let vp = view_projection(eye, Vec3::new(0.0, 0.0, 0.0), 1.0, width as f32 / height as f32, 0.1, 50.0);
    ExtractedView { view_proj: to_cols_slice(&vp), eye: eye.into(), viewport_size: (width, height), time: 0.0 }
}

pub fn default_view() -> ExtractedView {
    view(Vec3::new(0.0, 1.0, 4.0), 16, 16)
}

pub fn software_renderer(config: SdfConfig, scene: Scene) -> Renderer<SoftwareBackend> {
    init_logger();
    Renderer::new(SoftwareBackend::new(), config, scene).unwrap()
}

pub fn warm_up(renderer: &mut Renderer<SoftwareBackend>) {
    let view = default_view();
    for _ in 0..renderer.config().sample_budget {
        renderer.render(&view, &()).unwrap();
    }
}
