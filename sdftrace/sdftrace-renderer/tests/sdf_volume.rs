mod common;

use cgmath::InnerSpace;
use common::*;
use sdftrace_renderer::math::Vec3;
use sdftrace_renderer::sdf::{voxel_center_local, voxel_count, voxel_index};
use sdftrace_renderer::{SdfPhase, Voxel, SDF_EMPTY};

#[test]
fn warmup_bakes_interior_and_leaves_far_voxels_empty() {
    let config = sdftrace_renderer::SdfConfig { volume_padding: 3.0, max_query_distance: Some(0.45), ..small_config() };
    let mut renderer = software_renderer(config, cube_and_sphere());
    assert!((renderer.volume_transform().radius - 1.5).abs() < 1e-6);
    warm_up(&mut renderer);
    assert_eq!(renderer.phase(), SdfPhase::Steady);

    let sdf = renderer.backend().sdf();
    for z in 5..=10 {
        for y in 5..=10 {
            for x in 5..=10 {
                let v = sdf[voxel_index(x, y, z, 16)];
                assert!(v.distance < 0.0, "voxel ({x}, {y}, {z}) should be inside the cube: {v:?}");
                assert_eq!(v.mesh(), Some(0));
            }
        }
    }
    let corner = sdf[voxel_index(15, 15, 15, 16)];
    assert_eq!(corner.distance, SDF_EMPTY);
    assert!(corner.is_empty());
}

#[test]
fn warmup_refinement_never_grows_a_distance() {
    let mut renderer = software_renderer(small_config(), cube_and_sphere());
    let view = default_view();
    let mut previous: Option<Vec<Voxel>> = None;
    for _ in 0..renderer.config().sample_budget {
        renderer.render(&view, &()).unwrap();
        let current = renderer.backend().sdf().to_vec();
        if let Some(prev) = &previous {
            for (i, (a, b)) in prev.iter().zip(&current).enumerate() {
                assert!(b.distance.abs() <= a.distance.abs(), "voxel {i} grew from {} to {}", a.distance, b.distance);
            }
        }
        previous = Some(current);
    }
    let baked = previous.unwrap();
    assert!(baked.iter().any(|v| !v.is_empty()));
}

#[test]
fn static_scene_is_bit_identical_after_warmup() {
    let mut renderer = software_renderer(small_config(), static_cube());
    warm_up(&mut renderer);
    let baked = renderer.backend().sdf().to_vec();
    let view = default_view();
    for _ in 0..3 {
        renderer.render(&view, &()).unwrap();
        assert_eq!(renderer.backend().sdf(), baked.as_slice());
    }
}

#[test]
fn steady_updates_stay_near_the_moving_mesh() {
    let mut renderer = software_renderer(small_config(), cube_and_sphere());
    warm_up(&mut renderer);
    let before = renderer.backend().sdf().to_vec();

    let (from, to) = (0.0f32, 0.3f32);
    renderer.set_pose(1, orbit_pose(to)).unwrap();
    renderer.render(&default_view(), &()).unwrap();
    let after = renderer.backend().sdf();

    let volume = *renderer.volume_transform();
    let grid = renderer.config().grid_size;
    let centers = [orbit_pose(from).position, orbit_pose(to).position];
    let bound = renderer.scene().meshes.get(1).unwrap().bound[3] * SPHERE_SCALE;
    let reach = bound + 3f32.sqrt() * volume.radius / grid as f32 + 1e-4;
    let near_sphere = |p: Vec3| {
        let lo = Vec3::new(centers[0].x.min(centers[1].x), centers[0].y.min(centers[1].y), centers[0].z.min(centers[1].z));
        let hi = Vec3::new(centers[0].x.max(centers[1].x), centers[0].y.max(centers[1].y), centers[0].z.max(centers[1].z));
        (0..3).all(|k| p[k] >= lo[k] - reach && p[k] <= hi[k] + reach)
    };

    let mut touched = 0;
    for i in 0..voxel_count(grid) {
        if before[i] == after[i] {
            continue;
        }
        touched += 1;
        let p = volume.to_world(voxel_center_local(i, grid));
        let owned_by_sphere = before[i].mesh() == Some(1);
        assert!(owned_by_sphere || near_sphere(p), "voxel {i} at {p:?} changed far from the sphere");
    }
    assert!(touched > 0);
    let interior = voxel_index(8, 8, 8, grid);
    assert_eq!(before[interior], after[interior]);
    assert!((volume.to_world(voxel_center_local(interior, grid)) - centers[1]).magnitude() > 0.5);
}

#[test]
fn pose_set_before_the_first_frame_is_baked_where_it_was_placed() {
    let far_side = std::f32::consts::PI;
    let config = sdftrace_renderer::SdfConfig { volume_padding: 3.0, ..small_config() };
    let mut loaded_there = software_renderer(config.clone(), cube_and_sphere_at(far_side));
    let mut moved_there = software_renderer(config, cube_and_sphere_at(0.0));
    moved_there.set_pose(1, orbit_pose(far_side)).unwrap();
    warm_up(&mut loaded_there);
    warm_up(&mut moved_there);

    let expected = loaded_there.backend().sdf();
    let actual = moved_there.backend().sdf();
    let owned = |sdf: &[Voxel]| sdf.iter().filter(|v| v.mesh() == Some(1)).count();
    assert!(owned(expected) > 0);
    assert_eq!(owned(actual), owned(expected));
    for (i, (a, b)) in expected.iter().zip(actual).enumerate() {
        assert_eq!(a.mesh(), b.mesh(), "voxel {i} owner");
        assert!((a.distance - b.distance).abs() < 1e-6, "voxel {i}: {} vs {}", a.distance, b.distance);
    }
}

#[test]
fn steady_keeps_dynamic_voxels_that_lose_every_hit() {
    let config = sdftrace_renderer::SdfConfig { volume_padding: 3.0, max_query_distance: Some(0.3), ..small_config() };
    let mut renderer = software_renderer(config, cube_and_sphere());
    warm_up(&mut renderer);
    let before = renderer.backend().sdf().to_vec();
    let beside_sphere = voxel_index(13, 8, 8, 16);
    assert_eq!(before[beside_sphere].mesh(), Some(1));

    renderer.set_pose(1, orbit_pose(std::f32::consts::PI)).unwrap();
    renderer.render(&default_view(), &()).unwrap();
    let after = renderer.backend().sdf();

    for (i, (a, b)) in before.iter().zip(after).enumerate() {
        assert!(a.is_empty() || !b.is_empty(), "voxel {i} lost its value: {a:?} -> {b:?}");
    }
    assert_eq!(after[beside_sphere], before[beside_sphere]);
}
