//! Persistent render settings

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bvh::{BvhSettings, LEAF_THRESHOLD_RANGE};
use crate::pipeline::{PipelineConfig, PipelineVariant, DEFAULT_MAX_WORKGROUPS};
use crate::scene::SceneCapacity;
use crate::util::{Error, Result, UVec2, Vec3};

/// Render settings that persist between sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    // Output
    pub width: u32,
    pub height: u32,
    pub fov_y_degrees: f32,

    // Integrator
    pub ray_depth: u32,
    pub samples_per_frame: u32,
    /// Stop accumulating after this many samples (0 = never).
    pub max_samples: u32,
    pub background: [f32; 3],
    pub seed: u64,
    pub variant: PipelineVariant,

    // Acceleration
    pub enable_bvh: bool,
    pub leaf_threshold: usize,

    // Buffers (requires restart)
    pub capacity: SceneCapacity,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fov_y_degrees: 45.0,
            ray_depth: 8,
            samples_per_frame: 1,
            max_samples: 0,
            background: [0.0; 3],
            seed: 0x5eed,
            variant: PipelineVariant::FullGrid,
            enable_bvh: true,
            leaf_threshold: crate::bvh::DEFAULT_LEAF_THRESHOLD,
            capacity: SceneCapacity::default(),
        }
    }
}

impl RenderSettings {
    /// Default settings file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("pathtracer");
            p.push("settings.json");
            p
        })
    }

    /// Load and validate settings from `path`
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from the default path, falling back to defaults on any problem
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        match Self::load(&path) {
            Ok(s) => s,
            Err(Error::FileNotFound(_)) => Self::default(),
            Err(e) => {
                tracing::warn!("ignoring {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Save settings to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !LEAF_THRESHOLD_RANGE.contains(&self.leaf_threshold) {
            return Err(Error::config(format!(
                "leaf_threshold {} outside {:?}",
                self.leaf_threshold, LEAF_THRESHOLD_RANGE
            )));
        }
        if !(self.fov_y_degrees > 0.0 && self.fov_y_degrees < 180.0) {
            return Err(Error::config(format!(
                "fov_y_degrees {} outside (0, 180)",
                self.fov_y_degrees
            )));
        }
        if self.background.iter().any(|c| !c.is_finite() || *c < 0.0) {
            return Err(Error::config("background radiance must be finite and non-negative"));
        }
        self.pipeline_config(DEFAULT_MAX_WORKGROUPS).validate()
    }

    pub fn resolution(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    pub fn background(&self) -> Vec3 {
        Vec3::from_array(self.background)
    }

    pub fn bvh_settings(&self) -> BvhSettings {
        BvhSettings {
            leaf_threshold: self.leaf_threshold,
            enabled: self.enable_bvh,
        }
    }

    pub fn pipeline_config(&self, max_workgroups: u32) -> PipelineConfig {
        PipelineConfig {
            variant: self.variant,
            width: self.width,
            height: self.height,
            ray_depth: self.ray_depth,
            samples_per_frame: self.samples_per_frame,
            seed: self.seed,
            max_workgroups,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = RenderSettings {
            ray_depth: 3,
            variant: PipelineVariant::StreamCompaction,
            max_samples: 256,
            ..Default::default()
        };
        settings.save(&path).unwrap();
        let loaded = RenderSettings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "width": 320, "capacity": { "max_geoms": 8 } }"#).unwrap();
        let s = RenderSettings::load(&path).unwrap();
        assert_eq!(s.width, 320);
        assert_eq!(s.height, 720);
        assert_eq!(s.capacity.max_geoms, 8);
        assert_eq!(s.capacity.max_triangles, SceneCapacity::default().max_triangles);
    }

    #[test]
    fn test_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(RenderSettings::load(&missing), Err(Error::FileNotFound(_))));

        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "leaf_threshold": 0 }"#).unwrap();
        assert!(matches!(RenderSettings::load(&path), Err(Error::InvalidConfig(_))));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(RenderSettings::load(&path), Err(Error::Json(_))));
    }

    #[test]
    fn test_derived_configs() {
        let s = RenderSettings {
            enable_bvh: false,
            leaf_threshold: 8,
            ..Default::default()
        };
        assert_eq!(
            s.bvh_settings(),
            BvhSettings {
                leaf_threshold: 8,
                enabled: false
            }
        );
        let c = s.pipeline_config(1024);
        assert_eq!(c.max_workgroups, 1024);
        assert_eq!((c.width, c.height), (1280, 720));
    }
}
