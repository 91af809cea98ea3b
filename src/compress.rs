//! gzip compression for stored objects.
//!
//! Every object is written with `Content-Encoding: gzip`, so retrieval layers
//! decompress transparently. The gzip header carries no timestamp or file
//! name, which keeps compressed output byte-identical across runs.

use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;
use thiserror::Error;

/// Content-encoding marker stored alongside every object.
pub const GZIP_ENCODING: &str = "gzip";

#[derive(Error, Debug)]
pub enum CompressError {
    #[error("gzip compression failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Compress `bytes` with gzip at `level` (0-9, clamped).
pub fn gzip(bytes: &[u8], level: u32) -> Result<Vec<u8>, CompressError> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(bytes.len() / 2 + 64),
        Compression::new(level.min(9)),
    );
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}
