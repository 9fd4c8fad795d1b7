//! Renderer configuration: volume resolution, temporal budget, frame ring depth, motion, tone mapping.

use crate::error::{Error, Result};

/// Tone mapping mode for the resolve pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ToneMapping {
    #[default]
    Reinhard,
    /// No tone mapping (clamp).
    None,
}

impl ToneMapping {
    pub fn as_u32(self) -> u32 {
        match self {
            ToneMapping::Reinhard => 0,
            ToneMapping::None => 1,
        }
    }
}

/// How dynamic meshes get their per-frame rotation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DynamicMotion {
    /// Spin about +Y, clock starting when the SDF warm-up ends.
    Spin { radians_per_second: f32 },
    /// Poses are pushed by the host every frame via `Renderer::set_pose`.
    External,
}

impl Default for DynamicMotion {
    fn default() -> Self {
        DynamicMotion::Spin { radians_per_second: 0.2 }
    }
}

#[derive(Clone, Debug)]
pub struct SdfConfig {
    /// Voxels per axis of the SDF and irradiance volumes.
    pub grid_size: u32,
    /// Number of warm-up frames spent baking the SDF (K).
    pub sample_budget: u32,
    /// Rays per voxel per warm-up frame.
    pub rays_per_frame: u32,
    /// Rays per touched voxel in the steady state.
    pub update_rays: u32,
    /// Depth of the per-frame resource ring (N).
    pub frame_count: usize,
    /// Scale applied to the largest half-extent of the static scene bounds.
    pub volume_padding: f32,
    /// Ray query range in volume-local units. `None` spans the whole lattice diagonal.
    pub max_query_distance: Option<f32>,
    /// Voxels closer than this many voxel widths to their owner surface reconstruct a surface point.
    pub surface_band: f32,
    pub dynamic_motion: DynamicMotion,
    pub tone_mapping: ToneMapping,
    /// Format of the presentable image written by the resolve pass.
    pub output_format: wgpu::TextureFormat,
    /// Byte budget of the acceleration-structure arena.
    pub max_accel_bytes: u64,
}

impl Default for SdfConfig {
    fn default() -> Self {
        Self {
            grid_size: 128,
            sample_budget: 64,
            rays_per_frame: 4,
            update_rays: 16,
            frame_count: 3,
            volume_padding: 1.08,
            max_query_distance: None,
            surface_band: 1.5,
            dynamic_motion: DynamicMotion::default(),
            tone_mapping: ToneMapping::default(),
            output_format: wgpu::TextureFormat::Rgba8Unorm,
            max_accel_bytes: 256 << 20,
        }
    }
}

impl SdfConfig {
    pub fn validate(&self) -> Result<()> {
        if self.grid_size < 4 || !self.grid_size.is_power_of_two() {
            return Err(Error::Scene(format!("grid_size {} must be a power of two >= 4", self.grid_size)));
        }
        if self.sample_budget == 0 || self.rays_per_frame == 0 || self.update_rays == 0 {
            return Err(Error::Scene("sample budget and ray counts must be non-zero".to_string()));
        }
        if self.frame_count == 0 {
            return Err(Error::Scene("frame_count must be at least 1".to_string()));
        }
        if self.volume_padding < 1.0 {
            return Err(Error::Scene(format!("volume_padding {} would clip the static scene", self.volume_padding)));
        }
        if let Some(d) = self.max_query_distance {
            if !(d > 0.0) {
                return Err(Error::Scene(format!("max_query_distance {} must be positive", d)));
            }
        }
        Ok(())
    }

    /// Query range in volume-local units.
    pub fn query_distance(&self) -> f32 {
        self.max_query_distance.unwrap_or(2.0 * 3f32.sqrt())
    }

    /// Total number of distinct bake directions over the warm-up.
    pub fn direction_count(&self) -> u32 {
        self.sample_budget * self.rays_per_frame
    }

    /// Width of one voxel in volume-local units.
    pub fn voxel_size(&self) -> f32 {
        2.0 / self.grid_size as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SdfConfig::default();
        config.validate().unwrap();
        assert_eq!(config.direction_count(), 256);
        assert_eq!(config.frame_count, 3);
    }

    #[test]
    fn rejects_non_power_of_two_grid() {
        let config = SdfConfig { grid_size: 100, ..SdfConfig::default() };
        assert!(matches!(config.validate(), Err(Error::Scene(_))));
    }

    #[test]
    fn rejects_shrinking_padding() {
        let config = SdfConfig { volume_padding: 0.9, ..SdfConfig::default() };
        assert!(config.validate().is_err());
    }
}
