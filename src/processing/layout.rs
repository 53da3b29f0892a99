use std::fmt;
use std::str::FromStr;

use image::RgbaImage;

/// Output resolution of a render. Both edges are at least one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputSize {
    pub width: u32,
    pub height: u32,
}

impl OutputSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn of(image: &RgbaImage) -> Self {
        Self::new(image.width(), image.height())
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Approximate peak working memory for an RGBA8 buffer of this size.
    pub fn estimated_memory_bytes(&self) -> u64 {
        self.pixel_count() * 4
    }

    /// Scale down, keeping the aspect ratio, until both edges fit in `max`.
    /// Never upscales.
    pub fn fit_within(self, max: OutputSize) -> Self {
        let iw = self.width as f32;
        let ih = self.height as f32;
        let scale = (max.width as f32 / iw).min(max.height as f32 / ih).min(1.0);
        let scale = if scale.is_finite() { scale } else { 1.0 };
        let w = (iw * scale).round().clamp(1.0, max.width as f32);
        let h = (ih * scale).round().clamp(1.0, max.height as f32);
        Self::new(w as u32, h as u32)
    }

    /// Scale down, keeping the aspect ratio, until the pixel count is at most
    /// `max_pixels`.
    pub fn cap_pixels(self, max_pixels: u64) -> Self {
        let max_pixels = max_pixels.max(1);
        let total = self.pixel_count();
        if total <= max_pixels {
            return self;
        }
        let scale = (max_pixels as f64 / total as f64).sqrt();
        let mut w = ((self.width as f64 * scale).floor() as u32).max(1);
        let mut h = ((self.height as f64 * scale).floor() as u32).max(1);
        while u64::from(w) * u64::from(h) > max_pixels {
            if w >= h {
                w = (w - 1).max(1);
            } else {
                h = (h - 1).max(1);
            }
            if w == 1 && h == 1 {
                break;
            }
        }
        Self::new(w, h)
    }
}

impl fmt::Display for OutputSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for OutputSize {
    type Err = String;

    /// Parses `WIDTHxHEIGHT`, e.g. `1920x1080`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
        let width: u32 = w
            .trim()
            .parse()
            .map_err(|err| format!("invalid width {w:?}: {err}"))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|err| format!("invalid height {h:?}: {err}"))?;
        if width == 0 || height == 0 {
            return Err(format!("size must be positive, got {s:?}"));
        }
        Ok(Self::new(width, height))
    }
}
