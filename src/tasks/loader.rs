use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::RgbaImage;
use tracing::debug;

use crate::action::FlipAxis;
use crate::error::Error;
use crate::processing::geometry::{flip, rotate};

/// Decode `path` to RGBA8, upright according to its EXIF orientation.
///
/// Missing or unreadable metadata leaves the pixels as stored.
pub fn load_source(path: &Path) -> Result<RgbaImage, Error> {
    let decoded = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?;
    let image = decoded.to_rgba8();
    let orientation = read_orientation(path).unwrap_or(1);
    Ok(apply_orientation(image, orientation))
}

/// Encode `image` to `path`; the format follows the file extension.
pub fn save_output(image: &RgbaImage, path: &Path) -> Result<(), Error> {
    image.save(path)?;
    debug!(path = %path.display(), width = image.width(), height = image.height(), "saved render");
    Ok(())
}

fn apply_orientation(image: RgbaImage, orientation: u16) -> RgbaImage {
    match orientation {
        2 => flip(&image, FlipAxis::Horizontal),
        3 => rotate(&image, 2),
        4 => flip(&image, FlipAxis::Vertical),
        // transpose
        5 => flip(&rotate(&image, 1), FlipAxis::Horizontal),
        6 => rotate(&image, 1),
        // transverse
        7 => flip(&rotate(&image, 3), FlipAxis::Horizontal),
        8 => rotate(&image, 3),
        _ => image,
    }
}

fn read_orientation(path: &Path) -> Option<u16> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let orientation = field.value.get_uint(0)? as u16;
    debug!(orientation, path = %path.display(), "exif orientation");
    Some(orientation)
}
