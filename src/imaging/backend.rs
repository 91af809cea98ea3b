//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the three operations every backend must
//! support: decode, resize-to-WebP, and re-encode in the source format.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the
//! `image` crate. Tests use a mock that records operations and can fail
//! chosen widths.

use super::params::{Quality, ResizeParams};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("not a decodable image: {0}")]
    Decode(String),
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("encoding failed: {0}")]
    Encode(String),
    #[error("{width}x{height} exceeds the output size limit")]
    TooLarge { width: u32, height: u32 },
    #[error("cancelled before encoding")]
    Cancelled,
}

/// Pixel dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Container format detected from the source bytes at decode time.
///
/// Detection is by content signature, never by key extension: a PNG uploaded
/// as `photo.jpg` is re-encoded as PNG and served as `image/png`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Jpeg,
    Png,
    WebP,
    Tiff,
}

impl SourceFormat {
    /// Lowercase format name, as used in the `image/<name>` content type.
    pub fn name(self) -> &'static str {
        match self {
            SourceFormat::Jpeg => "jpeg",
            SourceFormat::Png => "png",
            SourceFormat::WebP => "webp",
            SourceFormat::Tiff => "tiff",
        }
    }

    pub fn content_type(self) -> String {
        format!("image/{}", self.name())
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded source image and what was learned while decoding it.
#[derive(Debug, Clone)]
pub struct DecodedSource<I> {
    pub image: I,
    pub format: SourceFormat,
    pub dimensions: Dimensions,
}

/// Trait for image processing backends.
///
/// `Image` is the backend's decoded representation. It is shared immutably
/// across all renditions of one source, so it must be `Sync`.
pub trait ImageBackend: Sync {
    type Image: Sync;

    /// Decode source bytes and detect their format.
    fn decode(&self, bytes: &[u8]) -> Result<DecodedSource<Self::Image>, BackendError>;

    /// Resize to exactly `params` and encode as WebP.
    fn resize_webp(&self, image: &Self::Image, params: &ResizeParams)
    -> Result<Vec<u8>, BackendError>;

    /// Re-encode at native resolution in `format`.
    fn reencode(
        &self,
        image: &Self::Image,
        format: SourceFormat,
        quality: Quality,
    ) -> Result<Vec<u8>, BackendError>;
}
