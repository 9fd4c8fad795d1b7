//! SDF tracing renderer: voxel signed-distance volume baked and refreshed by ray queries over a
//! two-level BVH, an irradiance volume lit through the SDF, and a visibility -> shade -> resolve
//! pipeline. The [`Renderer`] drives any [`GpuBackend`].

pub mod accel;
pub mod backend;
pub mod config;
pub mod error;
pub mod frame;
pub mod graph;
pub mod irradiance;
pub mod math;
pub mod mesh;
pub mod scene;
pub mod sdf;
pub mod shade;
pub mod visibility;

use cgmath::{Quaternion, Rad, Rotation3};
use render_api::ExtractedView;

pub use accel::{AccelManager, BuildFlags, GeometryFlags, InstanceRecord};
pub use backend::{request_device, GpuBackend, PassKind, SceneUpload, SoftwareBackend, WgpuBackend};
pub use config::{DynamicMotion, SdfConfig, ToneMapping};
pub use error::{Error, Result};
pub use frame::{FrameConstants, FrameRing, FrameSnapshot};
pub use graph::{FrameGraph, PhaseSchedules};
pub use math::VolumeTransform;
pub use mesh::{FileMeshLoader, MeshEntry, MeshLoader, MeshPose};
pub use scene::{LightSource, Scene};
pub use sdf::{SdfPhase, Voxel, SDF_EMPTY, VOXEL_NONE};

use accel::GeometryDesc;
use backend::{dispatch_size, GpuVertex, MeshInfo, SubsetInfo};
use frame::{LightSourceGpu, PerObject};
use math::{from_cols_slice, inverse_or_identity, inverse_transpose, to_array, to_rows, IDENTITY_ROWS};
use mesh::TransformSet;
use sdf::SdfSchedule;

/// Host clock of the dynamic-mesh animation. Held at zero while the volume warms up.
#[derive(Debug, Default)]
struct AnimationClock {
    start: Option<f64>,
}

impl AnimationClock {
    fn elapsed(&mut self, now: f64, hold: bool) -> f64 {
        if hold || self.start.is_none() {
            self.start = Some(now);
        }
        now - self.start.unwrap_or(now)
    }
}

pub struct Renderer<B: GpuBackend> {
    backend: B,
    config: SdfConfig,
    scene: Scene,
    accel: AccelManager,
    volume: VolumeTransform,
    schedule: SdfSchedule,
    passes: PhaseSchedules,
    ring: FrameRing<FrameSnapshot>,
    frame: u64,
    clock: AnimationClock,
    poses: Vec<MeshPose>,
    /// Poses the top-level structure was last built or refit with.
    accel_poses: Vec<MeshPose>,
    previous: Option<TransformSet>,
    viewport: (u32, u32),
    mip_count: u32,
}

fn geometry_flags(mesh: &MeshEntry) -> GeometryFlags {
    if mesh.is_opaque() {
        GeometryFlags::OPAQUE
    } else {
        GeometryFlags::empty()
    }
}

fn instance_records(scene: &Scene, accel: &AccelManager, transforms: &TransformSet) -> Vec<InstanceRecord> {
    scene
        .meshes
        .iter()
        .enumerate()
        .map(|(i, m)| InstanceRecord {
            world: transforms.rows(i),
            world_inv: to_rows(&inverse_or_identity(transforms.world(i))),
            blas_root: accel.blas_root(i as u32).unwrap_or(0),
            mesh: i as u32,
            mask: 0xff,
            flags: geometry_flags(m).bits(),
        })
        .collect()
}

fn scene_upload(scene: &Scene, accel: &AccelManager, config: &SdfConfig, mip_count: u32) -> SceneUpload {
    let mut up = SceneUpload {
        dynamic_list: scene.meshes.dynamic_list().iter().map(|d| d.mesh).collect(),
        grid_size: config.grid_size,
        mip_count,
        light_count: scene.lights.len() as u32,
        frame_count: config.frame_count,
        arena_bytes: accel.arena().used_bytes(),
        ..Default::default()
    };
    for (i, m) in scene.meshes.iter().enumerate() {
        let g = &m.geometry;
        let info = MeshInfo {
            base_vertex: up.vertices.len() as u32,
            first_index: up.indices.len() as u32,
            index_count: g.indices.len() as u32,
            subset_start: up.subsets.len() as u32,
            subset_count: g.subsets.len() as u32,
            blas_root: accel.blas_root(i as u32).unwrap_or(0),
            flags: geometry_flags(m).bits(),
            dynamic_slot: scene.meshes.dynamic_ids()[i],
            bound: m.bound,
        };
        up.vertices.extend(g.positions.iter().enumerate().map(|(v, p)| {
            let n = g.normals.get(v).copied().unwrap_or([0.0, 1.0, 0.0]);
            GpuVertex { position: [p[0], p[1], p[2], 1.0], normal: [n[0], n[1], n[2], 0.0] }
        }));
        up.indices.extend_from_slice(&g.indices);
        up.subsets.extend(g.subsets.iter().map(|s| {
            let e = s.material.emissive;
            SubsetInfo {
                base_color: s.material.base_color,
                emissive: [e[0], e[1], e[2], s.material.alpha_cutoff],
                mesh: i as u32,
                index_offset: s.index_offset,
                index_count: s.index_count,
                alpha_mode: s.material.alpha_mode.as_u32(),
            }
        }));
        up.meshes.push(info);
    }
    up
}

impl<B: GpuBackend> Renderer<B> {
    /// Place the volume around the static scene, build every acceleration structure and upload
    /// the scene. Any allocation failure aborts construction.
    pub fn new(mut backend: B, config: SdfConfig, scene: Scene) -> Result<Self> {
        config.validate()?;
        debug_assert!(
            scene.lights.iter().all(|l| l.owner.map_or(true, |o| (o as usize) < scene.meshes.len())),
            "light source owned by a mesh that does not exist"
        );
        let volume = VolumeTransform::enclosing(&scene.meshes.static_bounds(), config.volume_padding)?;

        let mut accel = AccelManager::new(config.max_accel_bytes);
        let geometries: Vec<GeometryDesc> = scene
            .meshes
            .iter()
            .map(|m| GeometryDesc { positions: &m.geometry.positions, indices: &m.geometry.indices, flags: geometry_flags(m) })
            .collect();
        for (i, g) in geometries.iter().enumerate() {
            accel.allocate_bottom(i as u32, &AccelManager::prebuild_bottom(g))?;
        }
        let top_flags = BuildFlags::ALLOW_UPDATE | BuildFlags::PREFER_FAST_TRACE;
        accel.allocate_top(&AccelManager::prebuild_top(scene.meshes.len(), top_flags))?;
        let mut writes = geometries
            .iter()
            .enumerate()
            .map(|(i, g)| accel.build_bottom(i as u32, g))
            .collect::<Result<Vec<_>>>()?;
        let poses = scene.meshes.base_poses();
        let instances = instance_records(&scene, &accel, &TransformSet::evaluate(&poses));
        writes.push(accel.build_top(&instances, top_flags)?);

        let mip_count = irradiance::mip_count(config.grid_size);
        backend.create_scene(&scene_upload(&scene, &accel, &config, mip_count))?;
        backend.write_acceleration(&writes)?;

        log::info!(
            "'{}': SDF volume {}^3 centred at ({:.3}, {:.3}, {:.3}) radius {:.3}; arena {} bytes",
            scene.name,
            config.grid_size,
            volume.center.x,
            volume.center.y,
            volume.center.z,
            volume.radius,
            accel.arena().used_bytes()
        );

        Ok(Self {
            backend,
            schedule: SdfSchedule::new(config.sample_budget),
            passes: PhaseSchedules::new()?,
            ring: FrameRing::new(config.frame_count, FrameSnapshot::default),
            config,
            scene,
            accel,
            volume,
            frame: 0,
            clock: AnimationClock::default(),
            accel_poses: poses.clone(),
            poses,
            previous: None,
            viewport: (0, 0),
            mip_count,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &SdfConfig {
        &self.config
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn accel(&self) -> &AccelManager {
        &self.accel
    }

    pub fn volume_transform(&self) -> &VolumeTransform {
        &self.volume
    }

    pub fn phase(&self) -> SdfPhase {
        self.schedule.phase()
    }

    /// Frames rendered so far.
    pub fn frame_index(&self) -> u64 {
        self.frame
    }

    pub fn pose(&self, mesh: usize) -> Option<&MeshPose> {
        self.poses.get(mesh)
    }

    /// Place a dynamic mesh for the next frame. Static meshes never move.
    pub fn set_pose(&mut self, mesh: usize, pose: MeshPose) -> Result<()> {
        match self.scene.meshes.get(mesh) {
            Some(m) if m.is_dynamic => {
                self.poses[mesh] = pose;
                Ok(())
            }
            Some(m) => Err(Error::Scene(format!("mesh '{}' is static and cannot be moved", m.name))),
            None => Err(Error::Scene(format!("mesh index {} out of range", mesh))),
        }
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) -> Result<()> {
        if (width, height) != self.viewport {
            self.backend.resize(width, height)?;
            self.viewport = (width, height);
        }
        Ok(())
    }

    /// Block until the device is idle and release every ring slot.
    pub fn wait_idle(&mut self) -> Result<()> {
        self.backend.wait_idle()?;
        if let Some(done) = self.backend.completed_frame() {
            self.ring.retire_through(done);
        }
        Ok(())
    }

    fn advance_poses(&mut self, now: f64, warming: bool) {
        let elapsed = self.clock.elapsed(now, warming);
        if let DynamicMotion::Spin { radians_per_second } = self.config.dynamic_motion {
            let angle = Rad((elapsed * radians_per_second as f64) as f32);
            for (i, m) in self.scene.meshes.iter().enumerate().filter(|(_, m)| m.is_dynamic) {
                self.poses[i].rotation = m.base_pose.rotation * Quaternion::from_angle_y(angle);
            }
        }
    }

    fn snapshot(&self, phase: SdfPhase, view: &ExtractedView, transforms: &TransformSet, previous: &TransformSet) -> FrameSnapshot {
        let cfg = &self.config;
        let objects = (0..transforms.len())
            .map(|i| PerObject {
                world: transforms.rows(i),
                world_it: to_rows(&inverse_transpose(transforms.world(i))),
                prev_world: previous.rows(i),
            })
            .collect();
        let lights = self
            .scene
            .lights
            .iter()
            .map(|l| LightSourceGpu {
                min: [l.min.x, l.min.y, l.min.z, 0.0],
                max: [l.max.x, l.max.y, l.max.z, 0.0],
                emissive: l.emissive,
                world: l.owner.map_or(IDENTITY_ROWS, |m| transforms.rows(m as usize)),
            })
            .collect();
        let view_proj = from_cols_slice(&view.view_proj);
        let (sample_index, ray_count) = match phase {
            SdfPhase::Warmup { sample_index } => (sample_index, cfg.rays_per_frame),
            SdfPhase::Steady => (self.frame as u32, cfg.update_rays),
        };
        let (ab, at) = (self.scene.ambient_bottom, self.scene.ambient_top);
        let constants = FrameConstants {
            view_proj: to_array(&view_proj),
            inv_view_proj: to_array(&inverse_or_identity(&view_proj)),
            volume_world: to_rows(&self.volume.world()),
            volume_world_inv: to_rows(&self.volume.world_inverse()),
            eye: [view.eye[0], view.eye[1], view.eye[2], 1.0],
            ambient_bottom: [ab[0], ab[1], ab[2], 0.0],
            ambient_top: [at[0], at[1], at[2], 0.0],
            sample_index,
            grid_size: cfg.grid_size,
            mesh_count: self.scene.meshes.len() as u32,
            light_count: self.scene.lights.len() as u32,
            dynamic_count: self.scene.meshes.dynamic_count() as u32,
            ray_count,
            direction_count: cfg.direction_count(),
            tone_mapping: cfg.tone_mapping.as_u32(),
            viewport: [self.viewport.0, self.viewport.1],
            tlas_root: self.accel.tlas_root().unwrap_or(0),
            mip_count: self.mip_count,
            query_distance: cfg.query_distance(),
            volume_radius: self.volume.radius,
            surface_band: cfg.surface_band * cfg.voxel_size(),
            mip_scale: 0.5 / self.volume.radius,
        };
        FrameSnapshot {
            constants,
            objects,
            instances: instance_records(&self.scene, &self.accel, transforms),
            lights,
        }
    }

    /// Render one frame into `target`.
    ///
    /// Fails with [`Error::FrameInFlight`] before touching any state when the ring slot of this
    /// frame is still being read by the device; call [`Renderer::wait_idle`] and retry.
    pub fn render(&mut self, view: &ExtractedView, target: &B::Target) -> Result<()> {
        self.set_viewport(view.viewport_size.0, view.viewport_size.1)?;
        if let Some(done) = self.backend.completed_frame() {
            self.ring.retire_through(done);
        }
        let slot = self.ring.acquire(self.frame)?;
        let phase = self.schedule.phase();
        self.advance_poses(view.time, matches!(phase, SdfPhase::Warmup { .. }));
        let transforms = TransformSet::evaluate(&self.poses);
        let previous = self.previous.clone().unwrap_or_else(|| transforms.clone());
        let snapshot = self.snapshot(phase, view, &transforms, &previous);

        let mut order = match phase {
            SdfPhase::Warmup { sample_index: 0 } => &self.passes.first_warmup,
            SdfPhase::Warmup { .. } => &self.passes.warmup,
            SdfPhase::Steady => &self.passes.steady,
        }
        .clone();
        if matches!(phase, SdfPhase::Warmup { .. }) && self.poses != self.accel_poses {
            log::debug!("poses changed during warm-up; refitting the top level before the bake");
            order.insert(0, PassKind::RefitAccel);
        }
        log::trace!("frame {} slot {} {:?}: {:?}", self.frame, slot, phase, order);

        self.backend.write_frame(slot, &snapshot)?;
        *self.ring.get_mut(slot)? = snapshot;
        self.backend.begin_frame(slot)?;
        for pass in order {
            if pass == PassKind::RefitAccel {
                let write = self.accel.refit_top(&self.ring.get(slot).instances)?;
                self.backend.write_acceleration(&[write])?;
                self.accel_poses.clone_from(&self.poses);
                continue;
            }
            let groups = dispatch_size(pass, self.config.grid_size, self.viewport);
            self.backend.encode(pass, groups, target)?;
        }
        self.backend.end_frame(self.frame)?;
        self.ring.submit(slot, self.frame);
        self.previous = Some(transforms);

        if self.schedule.advance() {
            log::info!(
                "SDF warm-up complete after {} frames; switching to incremental updates",
                self.config.sample_budget
            );
        }
        self.frame += 1;
        Ok(())
    }
}
