//! High-level image operations.
//!
//! These functions combine calculations with backend execution. They take a
//! decoded source and a [`RenditionConfig`], plan every output, and run the
//! backend for each one.
//!
//! Every planned output is an independent unit of work: the ladder widths and
//! the original re-encode run in parallel on the current rayon pool, all
//! reading the same immutable decode, and a failure at one width is reported
//! for that width alone.
//!
//! A ladder width whose planned size is past the WebP side limit or the
//! configured pixel cap fails as [`BackendError::TooLarge`] without being
//! resized. A raised cancel flag fails every render that has not started.

use super::backend::{BackendError, DecodedSource, ImageBackend};
use super::calculations::{PlannedSize, fits_webp, plan_ladder};
use super::params::{Quality, ResizeParams};
use crate::naming::{derivative_key, original_key};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

/// Content type of every ladder rendition.
pub const WEBP_CONTENT_TYPE: &str = "image/webp";

/// Configuration for rendition generation.
#[derive(Debug, Clone)]
pub struct RenditionConfig {
    /// Width ladder, in output order.
    pub widths: Vec<u32>,
    /// Quality for lossy re-encodes of the original.
    pub quality: Quality,
    /// Largest pixel count of a resized rendition.
    pub max_pixels: u64,
}

/// What a rendition is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenditionKind {
    /// Resized WebP for one ladder width.
    Resized { target: u32 },
    /// Native-resolution re-encode in the detected source format.
    Original,
}

/// A planned output: its key, kind, and dimensions. No pixels yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRendition {
    pub key: String,
    pub kind: RenditionKind,
    pub width: u32,
    pub height: u32,
    pub content_type: String,
}

/// An encoded rendition, ready for the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendition {
    pub key: String,
    pub kind: RenditionKind,
    pub width: u32,
    pub height: u32,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A rendition that could not be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenditionFailure {
    pub planned: PlannedRendition,
    pub error: BackendError,
}

pub type RenditionResult = Result<Rendition, RenditionFailure>;

/// Plan every output for `source_key`: ladder renditions in ladder order,
/// then the original re-encode last.
///
/// Always returns `widths.len() + 1` entries.
pub fn plan_renditions<I>(
    source_key: &str,
    decoded: &DecodedSource<I>,
    config: &RenditionConfig,
) -> Vec<PlannedRendition> {
    let dims = decoded.dimensions;
    let mut plan: Vec<PlannedRendition> = plan_ladder((dims.width, dims.height), &config.widths)
        .into_iter()
        .map(|PlannedSize { target, params }| PlannedRendition {
            key: derivative_key(source_key, target),
            kind: RenditionKind::Resized { target },
            width: params.width,
            height: params.height,
            content_type: WEBP_CONTENT_TYPE.to_string(),
        })
        .collect();

    plan.push(PlannedRendition {
        key: original_key(source_key),
        kind: RenditionKind::Original,
        width: dims.width,
        height: dims.height,
        content_type: decoded.format.content_type(),
    });
    plan
}

/// Produce one planned rendition.
fn render<B: ImageBackend>(
    backend: &B,
    decoded: &DecodedSource<B::Image>,
    planned: PlannedRendition,
    config: &RenditionConfig,
    cancel: &AtomicBool,
) -> RenditionResult {
    if cancel.load(Ordering::Relaxed) {
        return Err(RenditionFailure {
            planned,
            error: BackendError::Cancelled,
        });
    }
    let encoded = match planned.kind {
        RenditionKind::Resized { .. }
            if !fits_webp(planned.width, planned.height, config.max_pixels) =>
        {
            Err(BackendError::TooLarge {
                width: planned.width,
                height: planned.height,
            })
        }
        RenditionKind::Resized { .. } => backend.resize_webp(
            &decoded.image,
            &ResizeParams {
                width: planned.width,
                height: planned.height,
            },
        ),
        RenditionKind::Original => {
            backend.reencode(&decoded.image, decoded.format, config.quality)
        }
    };

    match encoded {
        Ok(bytes) => Ok(Rendition {
            key: planned.key,
            kind: planned.kind,
            width: planned.width,
            height: planned.height,
            content_type: planned.content_type,
            bytes,
        }),
        Err(error) => Err(RenditionFailure { planned, error }),
    }
}

/// Create all renditions of a decoded source.
///
/// Runs on the current rayon pool (wrap the call in `ThreadPool::install` to
/// bound it). Results come back in plan order regardless of completion order.
pub fn create_renditions<B: ImageBackend>(
    backend: &B,
    decoded: &DecodedSource<B::Image>,
    source_key: &str,
    config: &RenditionConfig,
) -> Vec<RenditionResult> {
    create_renditions_cancellable(backend, decoded, source_key, config, &AtomicBool::new(false))
}

/// [`create_renditions`] that stops starting new renders once `cancel` is set.
///
/// A render already inside the backend runs to completion; every render
/// that starts after the flag is raised fails with
/// [`BackendError::Cancelled`].
pub fn create_renditions_cancellable<B: ImageBackend>(
    backend: &B,
    decoded: &DecodedSource<B::Image>,
    source_key: &str,
    config: &RenditionConfig,
    cancel: &AtomicBool,
) -> Vec<RenditionResult> {
    plan_renditions(source_key, decoded, config)
        .into_par_iter()
        .map(|planned| render(backend, decoded, planned, config, cancel))
        .collect()
}
