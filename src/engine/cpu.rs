use image::RgbaImage;

use crate::action::EditAction;
use crate::config::ResampleFilter;
use crate::engine::ReplayBackend;
use crate::error::BackendError;
use crate::processing::blur::blur;
use crate::processing::color::adjust_colors;
use crate::processing::geometry::{crop, flip, rotate};
use crate::processing::layout::OutputSize;
use crate::processing::resample::resample;

/// Software replay. Works for any image size and can apply actions one at a
/// time, which is what lets a CPU context start before the session closes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend {
    filter: ResampleFilter,
}

impl CpuBackend {
    pub fn new(filter: ResampleFilter) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> ResampleFilter {
        self.filter
    }

    pub fn apply_action(
        &self,
        image: RgbaImage,
        action: &EditAction,
    ) -> Result<RgbaImage, BackendError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(BackendError::invalid_action(format!(
                "cannot apply {} to an empty image",
                action.kind()
            )));
        }
        let out = match *action {
            EditAction::Crop { .. } => {
                let rect = action.crop_rect(image.width(), image.height())?;
                crop(&image, rect)
            }
            EditAction::Rotate { turns } => rotate(&image, turns),
            EditAction::Flip { axis } => flip(&image, axis),
            EditAction::Adjust {
                brightness,
                contrast,
                saturation,
            } => {
                let mut image = image;
                adjust_colors(&mut image, brightness, contrast, saturation);
                image
            }
            EditAction::Blur { sigma } => blur(&image, sigma)?,
        };
        Ok(out)
    }

    pub fn finish(&self, image: RgbaImage, target: OutputSize) -> Result<RgbaImage, BackendError> {
        resample(image, target, self.filter).map_err(BackendError::Resample)
    }
}

impl ReplayBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn apply(
        &self,
        actions: &[EditAction],
        source: &RgbaImage,
        target: OutputSize,
    ) -> Result<RgbaImage, BackendError> {
        let image = actions
            .iter()
            .try_fold(source.clone(), |image, action| self.apply_action(image, action))?;
        self.finish(image, target)
    }
}
