//! Pure Rust image processing backend.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Detect format | `image::ImageReader::with_guessed_format` (magic bytes) |
//! | Decode (JPEG, PNG, TIFF, WebP) | `image` crate (pure Rust decoders) |
//! | Resize | `image::DynamicImage::resize_exact` with `Lanczos3` filter |
//! | Encode → WebP | `image::codecs::webp::WebPEncoder` (lossless) |
//! | Re-encode JPEG | `image::codecs::jpeg::JpegEncoder` at configured quality |
//! | Re-encode PNG / TIFF | `image::DynamicImage::write_to` |
//!
//! All encoders are deterministic: the same pixels and parameters always
//! produce the same bytes.

use super::backend::{BackendError, DecodedSource, Dimensions, ImageBackend, SourceFormat};
use super::calculations::WEBP_MAX_DIMENSION;
use super::params::{Quality, ResizeParams};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::borrow::Cow;
use std::io::Cursor;

/// Map a sniffed container format onto the formats this backend handles.
fn source_format(format: ImageFormat) -> Option<SourceFormat> {
    match format {
        ImageFormat::Jpeg => Some(SourceFormat::Jpeg),
        ImageFormat::Png => Some(SourceFormat::Png),
        ImageFormat::WebP => Some(SourceFormat::WebP),
        ImageFormat::Tiff => Some(SourceFormat::Tiff),
        _ => None,
    }
}

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// The WebP encoder only accepts 8-bit luma/RGB(A) buffers.
fn to_webp_compatible(img: &DynamicImage) -> Cow<'_, DynamicImage> {
    match img {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_) => Cow::Borrowed(img),
        _ if img.color().has_alpha() => Cow::Owned(DynamicImage::ImageRgba8(img.to_rgba8())),
        _ => Cow::Owned(DynamicImage::ImageRgb8(img.to_rgb8())),
    }
}

/// JPEG has no alpha channel and no 16-bit mode.
fn to_jpeg_compatible(img: &DynamicImage) -> Cow<'_, DynamicImage> {
    match img {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => Cow::Borrowed(img),
        _ => Cow::Owned(DynamicImage::ImageRgb8(img.to_rgb8())),
    }
}

fn encode_webp(img: &DynamicImage) -> Result<Vec<u8>, BackendError> {
    let mut buf = Vec::new();
    to_webp_compatible(img)
        .write_with_encoder(WebPEncoder::new_lossless(&mut buf))
        .map_err(|e| BackendError::Encode(format!("WebP encode failed: {e}")))?;
    Ok(buf)
}

fn encode_jpeg(img: &DynamicImage, quality: Quality) -> Result<Vec<u8>, BackendError> {
    let mut buf = Vec::new();
    // Quality is clamped to 1-100, so the narrowing cannot truncate.
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.value() as u8);
    to_jpeg_compatible(img)
        .write_with_encoder(encoder)
        .map_err(|e| BackendError::Encode(format!("JPEG encode failed: {e}")))?;
    Ok(buf)
}

fn encode_with_format(img: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, BackendError> {
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, format)
        .map_err(|e| BackendError::Encode(format!("{format:?} encode failed: {e}")))?;
    Ok(cursor.into_inner())
}

impl ImageBackend for RustBackend {
    type Image = DynamicImage;

    fn decode(&self, bytes: &[u8]) -> Result<DecodedSource<DynamicImage>, BackendError> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        let detected = reader
            .format()
            .ok_or_else(|| BackendError::Decode("unrecognized image signature".into()))?;
        let format = source_format(detected)
            .ok_or_else(|| BackendError::UnsupportedFormat(format!("{detected:?}")))?;
        let image = reader
            .decode()
            .map_err(|e| BackendError::Decode(format!("{format}: {e}")))?;
        Ok(DecodedSource {
            dimensions: Dimensions {
                width: image.width(),
                height: image.height(),
            },
            format,
            image,
        })
    }

    fn resize_webp(
        &self,
        image: &DynamicImage,
        params: &ResizeParams,
    ) -> Result<Vec<u8>, BackendError> {
        if params.width > WEBP_MAX_DIMENSION || params.height > WEBP_MAX_DIMENSION {
            return Err(BackendError::TooLarge {
                width: params.width,
                height: params.height,
            });
        }
        let resized = image.resize_exact(params.width, params.height, FilterType::Lanczos3);
        encode_webp(&resized)
    }

    fn reencode(
        &self,
        image: &DynamicImage,
        format: SourceFormat,
        quality: Quality,
    ) -> Result<Vec<u8>, BackendError> {
        match format {
            SourceFormat::Jpeg => encode_jpeg(image, quality),
            SourceFormat::WebP => encode_webp(image),
            SourceFormat::Png => encode_with_format(image, ImageFormat::Png),
            SourceFormat::Tiff => encode_with_format(image, ImageFormat::Tiff),
        }
    }
}
