//! Image processing - difference hashes, thumbnails, resolution
//!
//! Structural hash: 9x8 grayscale downscale, one bit per adjacent-pixel
//! luminance comparison per row. Chrominance hash: same construction over
//! the per-pixel R-G channel of the 9x8 color image.

use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

/// dHash sample grid: 9 columns compared pairwise into 8 bits per row.
const DHASH_WIDTH: u32 = 9;
const DHASH_HEIGHT: u32 = 8;

/// Perceptual descriptors of one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDescriptors {
    /// Luminance difference hash
    pub structural: u64,
    /// R-G chrominance difference hash
    pub chroma: u64,
}

/// Compute the structural (luminance) difference hash.
pub fn structural_dhash(img: &DynamicImage) -> u64 {
    let small = img
        .resize_exact(DHASH_WIDTH, DHASH_HEIGHT, FilterType::Triangle)
        .to_luma8();

    let mut hash = 0u64;
    let mut bit = 0u32;
    for y in 0..DHASH_HEIGHT {
        for x in 0..DHASH_WIDTH - 1 {
            let left = small.get_pixel(x, y)[0];
            let right = small.get_pixel(x + 1, y)[0];
            if left > right {
                hash |= 1u64 << bit;
            }
            bit += 1;
        }
    }
    hash
}

/// Compute the chrominance difference hash over the R-G channel.
pub fn chroma_dhash(img: &DynamicImage) -> u64 {
    let small = img
        .resize_exact(DHASH_WIDTH, DHASH_HEIGHT, FilterType::Triangle)
        .to_rgb8();

    let chroma = |x: u32, y: u32| -> i16 {
        let px = small.get_pixel(x, y);
        px[0] as i16 - px[1] as i16
    };

    let mut hash = 0u64;
    let mut bit = 0u32;
    for y in 0..DHASH_HEIGHT {
        for x in 0..DHASH_WIDTH - 1 {
            if chroma(x, y) > chroma(x + 1, y) {
                hash |= 1u64 << bit;
            }
            bit += 1;
        }
    }
    hash
}

/// Decode an image and compute both difference hashes.
pub fn hash_image(path: &Path) -> Result<ImageDescriptors> {
    let img = image::open(path)
        .with_context(|| format!("Failed to decode image: {}", path.display()))?;

    Ok(descriptors_of(&img))
}

/// Both hashes of an already decoded image.
pub fn descriptors_of(img: &DynamicImage) -> ImageDescriptors {
    ImageDescriptors {
        structural: structural_dhash(img),
        chroma: chroma_dhash(img),
    }
}

/// Read (width, height) from container metadata without a full decode.
pub fn image_resolution(path: &Path) -> Result<(u32, u32)> {
    image::image_dimensions(path)
        .with_context(|| format!("Failed to read dimensions: {}", path.display()))
}

/// Render a JPEG thumbnail constrained to `edge` pixels on the longest
/// side, preserving aspect ratio and honoring EXIF orientation.
pub fn render_thumbnail(path: &Path, edge: u32) -> Result<Vec<u8>> {
    let img = image::open(path)
        .with_context(|| format!("Failed to decode image: {}", path.display()))?;
    let img = apply_exif_rotation(path, img);

    thumbnail_bytes(&img, edge)
}

/// Encode a thumbnail of an already decoded image.
pub fn thumbnail_bytes(img: &DynamicImage, edge: u32) -> Result<Vec<u8>> {
    let (width, height) = (img.width(), img.height());

    let (new_width, new_height) = if width > height {
        let ratio = edge as f32 / width as f32;
        (edge, ((height as f32 * ratio) as u32).max(1))
    } else {
        let ratio = edge as f32 / height as f32;
        (((width as f32 * ratio) as u32).max(1), edge)
    };

    let thumb = img.resize(new_width, new_height, FilterType::Lanczos3);

    let mut bytes = Vec::new();
    // JPEG doesn't carry alpha; flatten before encoding.
    DynamicImage::ImageRgb8(thumb.to_rgb8())
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
        .context("Failed to encode thumbnail")?;

    Ok(bytes)
}

/// Read EXIF orientation and rotate/flip the image accordingly.
fn apply_exif_rotation(source: &Path, img: DynamicImage) -> DynamicImage {
    match read_exif_orientation(source) {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.fliph().rotate270(),
        6 => img.rotate90(),
        7 => img.fliph().rotate90(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// EXIF orientation value (1-8), defaulting to 1 (normal) when absent.
fn read_exif_orientation(path: &Path) -> u32 {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return 1,
    };

    let mut bufreader = std::io::BufReader::new(file);
    let exif_reader = exif::Reader::new();
    let exif = match exif_reader.read_from_container(&mut bufreader) {
        Ok(e) => e,
        Err(_) => return 1,
    };

    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .unwrap_or(1)
}
