//! Image processing in pure Rust, no system libraries.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode + detect** | `image::ImageReader` with format sniffing |
//! | **Resize → WebP** | Lanczos3 + lossless WebP encoder |
//! | **Re-encode original** | encoder for the detected format |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: Plans the outputs of one source and runs them in parallel

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, DecodedSource, Dimensions, ImageBackend, SourceFormat};
pub use calculations::{WEBP_MAX_DIMENSION, fits_webp, scaled_height};
pub use operations::{
    PlannedRendition, Rendition, RenditionConfig, RenditionFailure, RenditionKind,
    RenditionResult, WEBP_CONTENT_TYPE, create_renditions, create_renditions_cancellable,
    plan_renditions,
};
pub use params::{Quality, ResizeParams};
pub use rust_backend::RustBackend;
