use image::RgbaImage;

const LUMA: [f32; 3] = [0.2126, 0.7152, 0.0722];

/// Brightness offset, then contrast around mid-grey, then saturation around
/// luma, all in normalized sRGB. Alpha is left untouched.
///
/// Mirrors the `adjust` compute kernel so both backends agree within rounding.
pub fn adjust_colors(image: &mut RgbaImage, brightness: f32, contrast: f32, saturation: f32) {
    if brightness.abs() <= f32::EPSILON
        && (contrast - 1.0).abs() <= f32::EPSILON
        && (saturation - 1.0).abs() <= f32::EPSILON
    {
        return;
    }
    let brightness = brightness.clamp(-1.0, 1.0);
    let contrast = contrast.max(0.0);
    let saturation = saturation.max(0.0);
    for pixel in image.pixels_mut() {
        let mut rgb = [0.0_f32; 3];
        for (c, out) in rgb.iter_mut().enumerate() {
            let v = f32::from(pixel[c]) / 255.0;
            *out = (v - 0.5) * contrast + 0.5 + brightness;
        }
        let luma = rgb[0] * LUMA[0] + rgb[1] * LUMA[1] + rgb[2] * LUMA[2];
        for (c, value) in rgb.iter().enumerate() {
            let mixed = luma + (value - luma) * saturation;
            pixel[c] = to_unorm8(mixed);
        }
    }
}

pub(crate) fn to_unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}
