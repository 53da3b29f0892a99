use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// A single recorded edit, replayable onto any image.
///
/// Actions are plain values: once appended to a session they are never
/// mutated, and replaying the same ordered list onto the same source always
/// yields the same output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EditAction {
    /// Keep the `width x height` rectangle at `(x, y)`, clipped to the image.
    Crop {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    /// Rotate clockwise by `turns` quarter turns.
    Rotate { turns: u8 },
    /// Mirror across the given axis.
    Flip { axis: FlipAxis },
    /// Brightness offset plus contrast and saturation factors.
    Adjust {
        #[serde(default)]
        brightness: f32,
        #[serde(default = "EditAction::identity_factor")]
        contrast: f32,
        #[serde(default = "EditAction::identity_factor")]
        saturation: f32,
    },
    /// Separable Gaussian blur.
    Blur { sigma: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlipAxis {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Crop,
    Rotate,
    Flip,
    Adjust,
    Blur,
}

impl ActionKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Crop => "crop",
            Self::Rotate => "rotate",
            Self::Flip => "flip",
            Self::Adjust => "adjust",
            Self::Blur => "blur",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel rectangle resolved against a concrete image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl EditAction {
    const fn identity_factor() -> f32 {
        1.0
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Crop { .. } => ActionKind::Crop,
            Self::Rotate { .. } => ActionKind::Rotate,
            Self::Flip { .. } => ActionKind::Flip,
            Self::Adjust { .. } => ActionKind::Adjust,
            Self::Blur { .. } => ActionKind::Blur,
        }
    }

    /// Dimensions of the image produced by applying this action to a
    /// `width x height` input.
    pub fn output_dimensions(&self, width: u32, height: u32) -> Result<(u32, u32), BackendError> {
        match self {
            Self::Crop { .. } => {
                let rect = self.crop_rect(width, height)?;
                Ok((rect.width, rect.height))
            }
            Self::Rotate { turns } if turns % 2 == 1 => Ok((height, width)),
            _ => Ok((width, height)),
        }
    }

    /// Clip a crop action against a `width x height` image.
    ///
    /// Non-crop actions cover the whole image.
    pub fn crop_rect(&self, width: u32, height: u32) -> Result<CropRect, BackendError> {
        let Self::Crop {
            x,
            y,
            width: crop_w,
            height: crop_h,
        } = *self
        else {
            return Ok(CropRect {
                x: 0,
                y: 0,
                width,
                height,
            });
        };
        let right = x.saturating_add(crop_w).min(width);
        let bottom = y.saturating_add(crop_h).min(height);
        if x >= right || y >= bottom {
            return Err(BackendError::invalid_action(format!(
                "crop {crop_w}x{crop_h}+{x}+{y} lies outside the {width}x{height} image"
            )));
        }
        Ok(CropRect {
            x,
            y,
            width: right - x,
            height: bottom - y,
        })
    }
}

/// An ordered list of actions stored on disk, used to drive a session from a
/// file instead of an interactive editor.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EditScript {
    #[serde(default)]
    pub actions: Vec<EditAction>,
}

impl EditScript {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read edit script {}", path.display()))?;
        serde_yaml::from_str(&s)
            .with_context(|| format!("failed to parse edit script {}", path.display()))
    }
}
