//! Per-frame data: the constant block every pass binds, the instance snapshot, and the N-deep
//! ring that keeps the CPU from rewriting a slot the device may still be reading.

use bytemuck::{Pod, Zeroable};

use crate::accel::InstanceRecord;
use crate::error::{Error, Result};
use crate::math::{Rows3x4, IDENTITY_ROWS};

/// Uniform block shared by every pass. Layout matches `FrameConstants` in `common.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct FrameConstants {
    pub view_proj: [[f32; 4]; 4],
    pub inv_view_proj: [[f32; 4]; 4],
    /// Lattice [-1, 1]^3 to world.
    pub volume_world: Rows3x4,
    pub volume_world_inv: Rows3x4,
    pub eye: [f32; 4],
    pub ambient_bottom: [f32; 4],
    pub ambient_top: [f32; 4],
    pub sample_index: u32,
    pub grid_size: u32,
    pub mesh_count: u32,
    pub light_count: u32,
    pub dynamic_count: u32,
    /// Rays per voxel this frame.
    pub ray_count: u32,
    /// Size of the Fibonacci direction set the sample index walks through.
    pub direction_count: u32,
    pub tone_mapping: u32,
    pub viewport: [u32; 2],
    pub tlas_root: u32,
    pub mip_count: u32,
    /// Ray query range, volume-local units.
    pub query_distance: f32,
    pub volume_radius: f32,
    /// Surface reconstruction band, volume-local units.
    pub surface_band: f32,
    /// Irradiance mip per world unit of eye distance.
    pub mip_scale: f32,
}

impl Default for FrameConstants {
    fn default() -> Self {
        let identity = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0], [0.0, 0.0, 0.0, 1.0]];
        Self {
            view_proj: identity,
            inv_view_proj: identity,
            volume_world: IDENTITY_ROWS,
            volume_world_inv: IDENTITY_ROWS,
            volume_radius: 1.0,
            ..Zeroable::zeroed()
        }
    }
}

/// Per-object matrices, one per mesh.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PerObject {
    pub world: Rows3x4,
    /// Inverse transpose of `world`, for normals.
    pub world_it: Rows3x4,
    /// `world` of the previous frame; the swept bound of a moving mesh spans both.
    pub prev_world: Rows3x4,
}

/// Emissive box in the owner's object space (world space when unowned) plus that space's matrix.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct LightSourceGpu {
    pub min: [f32; 4],
    pub max: [f32; 4],
    pub emissive: [f32; 4],
    pub world: Rows3x4,
}

/// Everything the CPU writes for one frame.
#[derive(Clone, Debug, Default)]
pub struct FrameSnapshot {
    pub constants: FrameConstants,
    pub objects: Vec<PerObject>,
    pub instances: Vec<InstanceRecord>,
    pub lights: Vec<LightSourceGpu>,
}

#[derive(Debug)]
struct RingSlot<T> {
    data: T,
    /// Frame whose submission may still read this slot.
    in_flight: Option<u64>,
}

/// N copies of per-frame data; frame `f` uses slot `f % N`.
#[derive(Debug)]
pub struct FrameRing<T> {
    slots: Vec<RingSlot<T>>,
}

impl<T> FrameRing<T> {
    pub fn new(count: usize, mut init: impl FnMut() -> T) -> Self {
        let slots = (0..count.max(1)).map(|_| RingSlot { data: init(), in_flight: None }).collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot_of(&self, frame: u64) -> usize {
        (frame % self.slots.len() as u64) as usize
    }

    /// Slot for `frame`, writable. Fails while the previous occupant has not been retired.
    pub fn acquire(&mut self, frame: u64) -> Result<usize> {
        let slot = self.slot_of(frame);
        if let Some(prev) = self.slots[slot].in_flight {
            return Err(Error::FrameInFlight { slot, frame: prev });
        }
        Ok(slot)
    }

    /// Mark `slot` as read by the submission of `frame`.
    pub fn submit(&mut self, slot: usize, frame: u64) {
        self.slots[slot].in_flight = Some(frame);
    }

    /// Release every slot whose frame is at or before `frame`.
    pub fn retire_through(&mut self, frame: u64) {
        for s in &mut self.slots {
            if s.in_flight.is_some_and(|f| f <= frame) {
                s.in_flight = None;
            }
        }
    }

    pub fn in_flight(&self, slot: usize) -> Option<u64> {
        self.slots.get(slot).and_then(|s| s.in_flight)
    }

    pub fn get(&self, slot: usize) -> &T {
        &self.slots[slot].data
    }

    /// Writable access. Only valid for a slot returned by `acquire` and not yet submitted.
    pub fn get_mut(&mut self, slot: usize) -> Result<&mut T> {
        match self.slots[slot].in_flight {
            Some(frame) => Err(Error::FrameInFlight { slot, frame }),
            None => Ok(&mut self.slots[slot].data),
        }
    }
}
