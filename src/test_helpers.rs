//! Shared test utilities.
//!
//! Synthetic images are generated in memory so tests never depend on fixture
//! files: a deterministic RGB gradient, encodable in any supported format.

use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;

/// Deterministic RGB gradient of the given size.
pub fn gradient(width: u32, height: u32) -> DynamicImage {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    DynamicImage::ImageRgb8(img)
}

/// Encode a gradient of the given size in `format`.
pub fn encode_test_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    gradient(width, height)
        .write_to(&mut cursor, format)
        .unwrap();
    cursor.into_inner()
}

/// Decompress a gzip buffer.
pub fn gunzip(bytes: &[u8]) -> Vec<u8> {
    use std::io::Read;
    let mut out = Vec::new();
    flate2::read::GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .unwrap();
    out
}
