use image::{RgbaImage, imageops};

use crate::action::{CropRect, FlipAxis};

pub fn crop(image: &RgbaImage, rect: CropRect) -> RgbaImage {
    if rect.x == 0 && rect.y == 0 && rect.width == image.width() && rect.height == image.height()
    {
        return image.clone();
    }
    imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image()
}

/// Rotate clockwise by `turns` quarter turns.
pub fn rotate(image: &RgbaImage, turns: u8) -> RgbaImage {
    match turns % 4 {
        1 => imageops::rotate90(image),
        2 => imageops::rotate180(image),
        3 => imageops::rotate270(image),
        _ => image.clone(),
    }
}

pub fn flip(image: &RgbaImage, axis: FlipAxis) -> RgbaImage {
    match axis {
        FlipAxis::Horizontal => imageops::flip_horizontal(image),
        FlipAxis::Vertical => imageops::flip_vertical(image),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn numbered(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 0, 255]))
    }

    #[test]
    fn quarter_turn_moves_bottom_left_to_top_left() {
        let img = numbered(3, 2);
        let rotated = rotate(&img, 1);
        assert_eq!(rotated.dimensions(), (2, 3));
        assert_eq!(rotated.get_pixel(0, 0), img.get_pixel(0, 1));
        assert_eq!(rotated.get_pixel(1, 0), img.get_pixel(0, 0));
    }

    #[test]
    fn full_turn_is_identity() {
        let img = numbered(4, 3);
        assert_eq!(rotate(&img, 4), img);
    }

    #[test]
    fn crop_extracts_rectangle() {
        let img = numbered(10, 10);
        let out = crop(
            &img,
            CropRect {
                x: 2,
                y: 3,
                width: 4,
                height: 5,
            },
        );
        assert_eq!(out.dimensions(), (4, 5));
        assert_eq!(out.get_pixel(0, 0), &Rgba([2, 3, 0, 255]));
    }

    #[test]
    fn horizontal_flip_mirrors_columns() {
        let img = numbered(3, 1);
        let out = flip(&img, FlipAxis::Horizontal);
        assert_eq!(out.get_pixel(0, 0), &Rgba([2, 0, 0, 255]));
    }
}
