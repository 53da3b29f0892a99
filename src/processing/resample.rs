use anyhow::{Context, Result, anyhow, bail};
use fast_image_resize as fir;
use image::RgbaImage;

use crate::config::ResampleFilter;
use crate::processing::layout::OutputSize;

impl ResampleFilter {
    fn algorithm(self) -> fir::ResizeAlg {
        match self {
            Self::Nearest => fir::ResizeAlg::Nearest,
            Self::Bilinear => fir::ResizeAlg::Convolution(fir::FilterType::Bilinear),
            Self::CatmullRom => fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom),
            Self::Lanczos3 => fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3),
        }
    }
}

/// Resample `source` to exactly `target`. Same-size input is returned as is.
pub fn resample(source: RgbaImage, target: OutputSize, filter: ResampleFilter) -> Result<RgbaImage> {
    if source.width() == 0 || source.height() == 0 {
        bail!("cannot resample an empty image");
    }
    if source.width() == target.width && source.height() == target.height {
        return Ok(source);
    }

    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )
    .context("failed to create source view for resample")?;
    let mut dst_image = fir::images::Image::new(target.width, target.height, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new().resize_alg(filter.algorithm());
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .context("resample to target size failed")?;
    let buffer = dst_image.into_vec();
    RgbaImage::from_raw(target.width, target.height, buffer)
        .ok_or_else(|| anyhow!("failed to construct resampled RGBA image"))
}
