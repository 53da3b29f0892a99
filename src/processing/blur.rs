use image::RgbaImage;

use crate::error::BackendError;
use crate::processing::color::to_unorm8;

/// Normalized 1D Gaussian weights for a blur of `sigma` on a
/// `width x height` image, plus the radius. `None` when the blur is the
/// identity.
///
/// The radius is `ceil(3σ)`, capped at the image's longer edge: taps beyond it
/// only resample clamped edge pixels. Both backends build their kernel here.
pub fn blur_kernel(
    sigma: f32,
    width: u32,
    height: u32,
) -> Result<Option<(Vec<f32>, u32)>, BackendError> {
    if !sigma.is_finite() {
        return Err(BackendError::invalid_action(format!(
            "blur sigma must be finite, got {sigma}"
        )));
    }
    if sigma <= 0.0 || width == 0 || height == 0 {
        return Ok(None);
    }
    let radius = (sigma * 3.0).ceil().min(width.max(height) as f32) as u32;
    if radius == 0 {
        return Ok(None);
    }
    Ok(Some((gaussian_weights(sigma, radius), radius)))
}

fn gaussian_weights(sigma: f32, radius: u32) -> Vec<f32> {
    let radius = radius as i64;
    let denom = 2.0 * sigma * sigma;
    let mut weights: Vec<f32> = (-radius..=radius)
        .map(|i| {
            let x = i as f32;
            (-x * x / denom).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    if sum > 0.0 {
        for w in &mut weights {
            *w /= sum;
        }
    }
    weights
}

/// Separable Gaussian blur with clamped edges.
///
/// Done in explicit f32 passes rather than `imageops::blur` so the CPU result
/// tracks the GPU `blur` kernel tap for tap.
pub fn blur(image: &RgbaImage, sigma: f32) -> Result<RgbaImage, BackendError> {
    let Some((weights, radius)) = blur_kernel(sigma, image.width(), image.height())? else {
        return Ok(image.clone());
    };
    let width = image.width() as usize;
    let height = image.height() as usize;
    let src = rgba_to_f32(image);
    let mut tmp = vec![0.0f32; src.len()];
    let mut out = vec![0.0f32; src.len()];
    blur_pass(&src, &mut tmp, width, height, radius as usize, &weights, true);
    blur_pass(&tmp, &mut out, width, height, radius as usize, &weights, false);
    Ok(f32_to_rgba(image.width(), image.height(), &out))
}

fn blur_pass(
    src: &[f32],
    dst: &mut [f32],
    width: usize,
    height: usize,
    radius: usize,
    weights: &[f32],
    horizontal: bool,
) {
    let kernel = &weights[..(2 * radius + 1)];
    for y in 0..height {
        for x in 0..width {
            let mut acc = [0.0f32; 4];
            for (idx, &weight) in kernel.iter().enumerate() {
                let offset = idx as isize - radius as isize;
                let sample = if horizontal {
                    let sx = clamp_i(x as isize + offset, width as isize);
                    (y * width + sx) * 4
                } else {
                    let sy = clamp_i(y as isize + offset, height as isize);
                    (sy * width + x) * 4
                };
                for (c, value) in acc.iter_mut().enumerate() {
                    *value += src[sample + c] * weight;
                }
            }
            let out = (y * width + x) * 4;
            dst[out..out + 4].copy_from_slice(&acc);
        }
    }
}

#[inline(always)]
fn clamp_i(value: isize, max: isize) -> usize {
    value.clamp(0, max.saturating_sub(1)) as usize
}

fn rgba_to_f32(image: &RgbaImage) -> Vec<f32> {
    image
        .pixels()
        .flat_map(|p| p.0.iter().map(|&c| (c as f32) / 255.0))
        .collect()
}

fn f32_to_rgba(width: u32, height: u32, data: &[f32]) -> RgbaImage {
    let mut out = RgbaImage::new(width, height);
    for (i, pixel) in out.pixels_mut().enumerate() {
        let base = i * 4;
        pixel.0 = [
            to_unorm8(data[base]),
            to_unorm8(data[base + 1]),
            to_unorm8(data[base + 2]),
            to_unorm8(data[base + 3]),
        ];
    }
    out
}
