//! Scene descriptor document: which meshes to load, how to place them, ambient terms and
//! free-standing light sources. Stored as JSON with PascalCase keys.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SceneDescriptor {
    #[serde(default)]
    pub name: String,
    pub meshes: Vec<MeshDesc>,
    #[serde(default)]
    pub ambient_bottom: [f32; 3],
    #[serde(default)]
    pub ambient_top: [f32; 3],
    #[serde(default)]
    pub light_sources: Vec<LightSourceDesc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MeshDesc {
    pub file_name: String,
    #[serde(default)]
    pub position: [f32; 3],
    #[serde(default = "unit_scale")]
    pub scaling: f32,
    #[serde(default)]
    pub light_map_size: u32,
    #[serde(default)]
    pub is_dynamic: bool,
    #[serde(default, rename = "InvertZ")]
    pub invert_z: bool,
}

/// Emissive box placed directly in world space. `AABBScaling` scales both corners.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LightSourceDesc {
    #[serde(rename = "AABBMin")]
    pub aabb_min: [f32; 3],
    #[serde(rename = "AABBScaling", default = "unit_scale")]
    pub aabb_scaling: f32,
    #[serde(rename = "AABBMax")]
    pub aabb_max: [f32; 3],
    #[serde(rename = "Emissive")]
    pub emissive: [f32; 4],
}

fn unit_scale() -> f32 {
    1.0
}

impl LightSourceDesc {
    /// World-space corners after applying `AABBScaling`.
    pub fn scaled_corners(&self) -> ([f32; 3], [f32; 3]) {
        let s = self.aabb_scaling;
        let a = self.aabb_min.map(|v| v * s);
        let b = self.aabb_max.map(|v| v * s);
        (
            [a[0].min(b[0]), a[1].min(b[1]), a[2].min(b[2])],
            [a[0].max(b[0]), a[1].max(b[1]), a[2].max(b[2])],
        )
    }
}

impl SceneDescriptor {
    pub fn from_json_str(raw: &str) -> Result<Self, String> {
        let scene: SceneDescriptor =
            serde_json::from_str(raw).map_err(|e| format!("scene descriptor: {}", e))?;
        if scene.meshes.is_empty() {
            return Err(format!("scene descriptor '{}' lists no meshes", scene.name));
        }
        Ok(scene)
    }

    pub fn from_path(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        Self::from_json_str(&raw)
    }

    pub fn to_json_string(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| e.to_string())
    }

    pub fn dynamic_mesh_count(&self) -> usize {
        self.meshes.iter().filter(|m| m.is_dynamic).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPONZA_LIKE: &str = r#"{
        "Name": "Courtyard",
        "Meshes": [
            { "FileName": "courtyard.gltf", "Position": [0.0, 0.0, 0.0], "Scaling": 1.0,
              "LightMapSize": 256, "IsDynamic": false, "InvertZ": true },
            { "FileName": "builtin:sphere", "Position": [1.0, 0.5, 0.0], "Scaling": 0.25,
              "IsDynamic": true }
        ],
        "AmbientBottom": [0.05, 0.04, 0.03],
        "AmbientTop": [0.2, 0.25, 0.3],
        "LightSources": [
            { "AABBMin": [-1.0, 4.0, -1.0], "AABBScaling": 2.0, "AABBMax": [1.0, 4.5, 1.0],
              "Emissive": [8.0, 7.5, 7.0, 1.0] }
        ]
    }"#;

    #[test]
    fn parses_pascal_case_document() {
        let scene = SceneDescriptor::from_json_str(SPONZA_LIKE).unwrap();
        assert_eq!(scene.name, "Courtyard");
        assert_eq!(scene.meshes.len(), 2);
        assert!(scene.meshes[0].invert_z);
        assert_eq!(scene.meshes[0].light_map_size, 256);
        assert_eq!(scene.meshes[1].light_map_size, 0);
        assert_eq!(scene.dynamic_mesh_count(), 1);
        assert_eq!(scene.ambient_top, [0.2, 0.25, 0.3]);
        assert_eq!(scene.light_sources[0].emissive[0], 8.0);
    }

    #[test]
    fn light_scaling_applies_to_both_corners() {
        let scene = SceneDescriptor::from_json_str(SPONZA_LIKE).unwrap();
        let (min, max) = scene.light_sources[0].scaled_corners();
        assert_eq!(min, [-2.0, 8.0, -2.0]);
        assert_eq!(max, [2.0, 9.0, 2.0]);
    }

    #[test]
    fn rejects_empty_mesh_list() {
        let err = SceneDescriptor::from_json_str(r#"{ "Name": "Empty", "Meshes": [] }"#).unwrap_err();
        assert!(err.contains("no meshes"));
    }

    #[test]
    fn survives_a_json_round_trip() {
        let scene = SceneDescriptor::from_json_str(SPONZA_LIKE).unwrap();
        let raw = scene.to_json_string().unwrap();
        assert!(raw.contains("\"InvertZ\""));
        assert!(raw.contains("\"AABBScaling\""));
        assert_eq!(SceneDescriptor::from_json_str(&raw).unwrap(), scene);
    }
}
