//! Bake settings, loadable from JSON and overridden by flags.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use heightmap_rtx::bake::SamplerDesc;
use heightmap_rtx::format::MAX_SUBDIVISION_LEVEL;
use heightmap_rtx::{Error, Result};

/// Largest grid resolution accepted by `hrtx bake`.
pub const MAX_GRID: u32 = 1024;

/// Settings for `hrtx bake`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeConfig {
    /// Subdivision level 0-5.
    pub subdivision_level: u32,
    /// Grid quads per side; the mesh has `2 * grid^2` triangles.
    pub grid: u32,
    pub bias: f32,
    pub scale: f32,
    /// Used instead of a heightmap file when set.
    pub flat_height: Option<f32>,
    pub sampler: SamplerDesc,
    /// Where to write the packed displacement bytes.
    pub output: Option<PathBuf>,
}

impl Default for BakeConfig {
    fn default() -> Self {
        Self {
            subdivision_level: 3,
            grid: 16,
            bias: 0.0,
            scale: 1.0,
            flat_height: None,
            sampler: SamplerDesc::default(),
            output: None,
        }
    }
}

impl BakeConfig {
    /// Load from a JSON file; missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.subdivision_level > MAX_SUBDIVISION_LEVEL {
            return Err(Error::Config(format!(
                "subdivision level {} (max {})",
                self.subdivision_level, MAX_SUBDIVISION_LEVEL
            )));
        }
        if self.grid == 0 || self.grid > MAX_GRID {
            return Err(Error::Config(format!(
                "grid {} (expected 1..={})",
                self.grid, MAX_GRID
            )));
        }
        if !self.scale.is_finite() || !self.bias.is_finite() {
            return Err(Error::Config("bias and scale must be finite".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heightmap_rtx::bake::{AddressMode, FilterMode};

    #[test]
    fn test_defaults_validate() {
        BakeConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: BakeConfig = serde_json::from_str(
            r#"{"subdivision_level": 5, "sampler": {"address": "clamp_to_edge"}}"#,
        )
        .unwrap();
        assert_eq!(config.subdivision_level, 5);
        assert_eq!(config.grid, 16);
        assert_eq!(config.sampler.address, AddressMode::ClampToEdge);
        assert_eq!(config.sampler.filter, FilterMode::Linear);
    }

    #[test]
    fn test_save_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bake.json");
        let config = BakeConfig {
            grid: 4,
            flat_height: Some(0.5),
            output: Some(dir.path().join("out.bin")),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(BakeConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects() {
        let config = BakeConfig {
            subdivision_level: 6,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = BakeConfig {
            grid: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = BakeConfig {
            scale: f32::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            BakeConfig::load(dir.path().join("nope.json")),
            Err(Error::Io(_))
        ));
    }
}
