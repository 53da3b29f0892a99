use std::path::Path;

use anyhow::{Result, ensure};
use serde::Deserialize;

/// Which backends the renderer may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackendPreference {
    /// GPU when the adapter exists and the image fits its textures, CPU otherwise.
    #[default]
    Auto,
    /// Never touch the GPU.
    Cpu,
}

/// Filter for the CPU backend's final resample to the target size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ResampleFilter {
    Nearest,
    Bilinear,
    #[default]
    CatmullRom,
    Lanczos3,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RenderConfig {
    /// Backend policy applied to every context.
    pub backend: BackendPreference,
    /// Cap on output pixel count; larger targets are scaled down keeping
    /// their aspect ratio. `None` leaves targets uncapped.
    pub max_output_pixels: Option<u64>,
    /// Overrides the texture dimension reported by the adapter.
    pub max_texture_dimension: Option<u32>,
    /// Texture dimension assumed when no adapter can be queried.
    pub fallback_texture_dimension: u32,
    pub resample_filter: ResampleFilter,
}

impl RenderConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        if let Some(max) = self.max_output_pixels {
            ensure!(max > 0, "max-output-pixels must be greater than zero");
        }
        if let Some(dim) = self.max_texture_dimension {
            ensure!(dim > 0, "max-texture-dimension must be greater than zero");
        }
        ensure!(
            self.fallback_texture_dimension > 0,
            "fallback-texture-dimension must be greater than zero"
        );
        Ok(self)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            max_output_pixels: None,
            max_texture_dimension: None,
            fallback_texture_dimension: 4096,
            resample_filter: ResampleFilter::default(),
        }
    }
}
