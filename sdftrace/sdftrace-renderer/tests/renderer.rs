mod common;

use common::*;
use sdftrace_renderer::accel::AccelWrite;
use sdftrace_renderer::frame::FrameSnapshot;
use sdftrace_renderer::math::Vec3;
use sdftrace_renderer::sdf::{unpack_owner, voxel_index};
use sdftrace_renderer::visibility::VISIBILITY_NONE;
use sdftrace_renderer::{
    Error, GpuBackend, LightSource, MeshEntry, MeshPose, PassKind, Renderer, Scene, SceneUpload, SdfConfig,
    SoftwareBackend,
};

/// Software backend whose submissions only complete on `wait_idle`.
#[derive(Default)]
struct StalledBackend {
    inner: SoftwareBackend,
    released: Option<u64>,
    submitted: Option<u64>,
}

impl GpuBackend for StalledBackend {
    type Target = ();

    fn create_scene(&mut self, scene: &SceneUpload) -> sdftrace_renderer::Result<()> {
        self.inner.create_scene(scene)
    }

    fn write_acceleration(&mut self, writes: &[AccelWrite]) -> sdftrace_renderer::Result<()> {
        self.inner.write_acceleration(writes)
    }

    fn write_frame(&mut self, slot: usize, frame: &FrameSnapshot) -> sdftrace_renderer::Result<()> {
        self.inner.write_frame(slot, frame)
    }

    fn resize(&mut self, width: u32, height: u32) -> sdftrace_renderer::Result<()> {
        self.inner.resize(width, height)
    }

    fn begin_frame(&mut self, slot: usize) -> sdftrace_renderer::Result<()> {
        self.inner.begin_frame(slot)
    }

    fn encode(&mut self, pass: PassKind, groups: [u32; 3], target: &()) -> sdftrace_renderer::Result<()> {
        self.inner.encode(pass, groups, target)
    }

    fn end_frame(&mut self, frame: u64) -> sdftrace_renderer::Result<()> {
        self.submitted = Some(frame);
        self.inner.end_frame(frame)
    }

    fn completed_frame(&self) -> Option<u64> {
        self.released
    }

    fn wait_idle(&mut self) -> sdftrace_renderer::Result<()> {
        self.released = self.submitted;
        Ok(())
    }
}

/// Software backend that can be told to fail the next pass, and remembers the last snapshot.
#[derive(Default)]
struct FlakyBackend {
    inner: SoftwareBackend,
    fail_next: bool,
    last_frame: Option<FrameSnapshot>,
}

impl GpuBackend for FlakyBackend {
    type Target = ();

    fn create_scene(&mut self, scene: &SceneUpload) -> sdftrace_renderer::Result<()> {
        self.inner.create_scene(scene)
    }

    fn write_acceleration(&mut self, writes: &[AccelWrite]) -> sdftrace_renderer::Result<()> {
        self.inner.write_acceleration(writes)
    }

    fn write_frame(&mut self, slot: usize, frame: &FrameSnapshot) -> sdftrace_renderer::Result<()> {
        self.last_frame = Some(frame.clone());
        self.inner.write_frame(slot, frame)
    }

    fn resize(&mut self, width: u32, height: u32) -> sdftrace_renderer::Result<()> {
        self.inner.resize(width, height)
    }

    fn begin_frame(&mut self, slot: usize) -> sdftrace_renderer::Result<()> {
        self.inner.begin_frame(slot)
    }

    fn encode(&mut self, pass: PassKind, groups: [u32; 3], target: &()) -> sdftrace_renderer::Result<()> {
        if std::mem::take(&mut self.fail_next) {
            return Err(Error::Device(format!("{:?} lost", pass)));
        }
        self.inner.encode(pass, groups, target)
    }

    fn end_frame(&mut self, frame: u64) -> sdftrace_renderer::Result<()> {
        self.inner.end_frame(frame)
    }

    fn completed_frame(&self) -> Option<u64> {
        self.inner.completed_frame()
    }

    fn wait_idle(&mut self) -> sdftrace_renderer::Result<()> {
        self.inner.wait_idle()
    }
}

#[test]
fn failed_frame_keeps_the_previous_transforms() {
    init_logger();
    let mut renderer = Renderer::new(FlakyBackend::default(), small_config(), cube_and_sphere()).unwrap();
    let view = default_view();
    for _ in 0..=renderer.config().sample_budget {
        renderer.render(&view, &()).unwrap();
    }
    let start_x = orbit_pose(0.0).position.x;

    renderer.set_pose(1, orbit_pose(0.3)).unwrap();
    renderer.backend_mut().fail_next = true;
    assert!(matches!(renderer.render(&view, &()), Err(Error::Device(_))));
    renderer.render(&view, &()).unwrap();

    let frame = renderer.backend().last_frame.as_ref().unwrap();
    let sphere = frame.objects[1];
    assert!((sphere.prev_world[0][3] - start_x).abs() < 1e-5, "prev {:?}", sphere.prev_world);
    assert!((sphere.world[0][3] - orbit_pose(0.3).position.x).abs() < 1e-5);
}

#[test]
fn reusing_a_busy_ring_slot_fails_until_the_device_drains() {
    init_logger();
    let config = SdfConfig { frame_count: 2, ..small_config() };
    let mut renderer = Renderer::new(StalledBackend::default(), config, static_cube()).unwrap();
    let view = default_view();
    renderer.render(&view, &()).unwrap();
    renderer.render(&view, &()).unwrap();
    let err = renderer.render(&view, &()).unwrap_err();
    assert_eq!(err, Error::FrameInFlight { slot: 0, frame: 0 });
    assert_eq!(renderer.frame_index(), 2);

    renderer.wait_idle().unwrap();
    renderer.render(&view, &()).unwrap();
    assert_eq!(renderer.frame_index(), 3);
}

#[test]
fn static_meshes_cannot_be_posed() {
    let mut renderer = software_renderer(small_config(), cube_and_sphere());
    let moved = MeshPose::new(Vec3::new(0.0, 2.0, 0.0), 1.0);
    assert!(matches!(renderer.set_pose(0, moved), Err(Error::Scene(_))));
    assert!(matches!(renderer.set_pose(7, moved), Err(Error::Scene(_))));
    renderer.set_pose(1, orbit_pose(1.0)).unwrap();
    assert_eq!(renderer.pose(1), Some(&orbit_pose(1.0)));
}

#[test]
fn invalid_configuration_is_rejected() {
    init_logger();
    let config = SdfConfig { grid_size: 20, ..small_config() };
    let err = Renderer::new(SoftwareBackend::new(), config, static_cube()).err();
    assert!(matches!(err, Some(Error::Scene(_))));
}

#[test]
fn frame_shows_the_cube_against_the_sky() {
    let scene = static_cube().with_ambient([0.0, 0.0, 0.2], [0.2, 0.4, 1.0]);
    let mut renderer = software_renderer(small_config(), scene);
    let view = view(Vec3::new(0.0, 0.0, 3.0), 16, 16);
    renderer.render(&view, &()).unwrap();

    let backend = renderer.backend();
    let vis = backend.visibility().unwrap();
    let (mesh, _) = unpack_owner(vis.id(8, 8));
    assert_eq!(mesh, 0);
    assert_eq!(vis.id(0, 0), VISIBILITY_NONE);

    assert_eq!(backend.output_size(), (16, 16));
    let rgba = backend.output_rgba8();
    assert_eq!(rgba.len(), 16 * 16 * 4);
    let sky = &backend.output()[0];
    assert!(sky[2] > sky[0], "sky should lean blue: {sky:?}");
    assert!(backend.output().iter().flatten().all(|v| (0.0..=1.0).contains(v)));
}

#[test]
fn wall_shadows_the_irradiance_behind_it() {
    let wall = MeshEntry::new("wall", stretched_box([0.4, 0.8, 0.8]), MeshPose::new(Vec3::new(0.0, 0.0, 0.0), 1.0), false);
    let c = Vec3::new(1.09375, 0.15625, 0.15625);
    let h = Vec3::new(0.1, 0.1, 0.1);
    let light = LightSource { min: c - h, max: c + h, emissive: [1.0, 1.0, 1.0, 1.0], owner: None };
    let scene = Scene::new("wall", vec![wall], vec![light]).unwrap();
    let config = SdfConfig { volume_padding: 6.25, ..small_config() };
    let mut renderer = software_renderer(config, scene);
    assert!((renderer.volume_transform().radius - 2.5).abs() < 1e-5);
    warm_up(&mut renderer);

    let grid = renderer.config().grid_size;
    let level0 = renderer.backend().irradiance_level(0).unwrap();
    let occluded = level0[voxel_index(4, 8, 8, grid)];
    let open = level0[voxel_index(11, 15, 8, grid)];
    assert!(open[0] > 0.0);
    assert!(occluded[0] < open[0], "occluded {occluded:?} vs open {open:?}");
    assert_eq!(renderer.backend().irradiance_level(5).map(<[_]>::len), None);
    assert_eq!(renderer.backend().irradiance_level(4).map(<[_]>::len), Some(1));
}
