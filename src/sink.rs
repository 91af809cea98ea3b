//! Compress-and-store stage.
//!
//! Work is split in two so the pipeline can keep CPU and I/O apart:
//!
//! 1. [`Sink::prepare`] (CPU): gzip the rendition and fingerprint it.
//! 2. [`Sink::upload`] (I/O): write to the output store with
//!    `Content-Encoding: gzip`, retrying failed writes with linear backoff.
//!
//! Writes overwrite: running the same record twice leaves exactly the same
//! key set behind.

use crate::compress::{CompressError, GZIP_ENCODING, gzip};
use crate::config::{CompressionConfig, UploadConfig};
use crate::imaging::Rendition;
use crate::store::{ObjectMetadata, ObjectWriter, StoreError};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const TRACING_TARGET: &str = "image_derivatives::sink";

#[derive(Error, Debug)]
pub enum SinkError {
    #[error(transparent)]
    Compress(#[from] CompressError),
    #[error("write failed after {attempts} attempt(s): {source}")]
    Write { attempts: u32, source: StoreError },
}

/// A rendition compressed and ready to upload.
#[derive(Debug, Clone)]
pub struct PreparedObject {
    pub key: String,
    pub content_type: String,
    /// gzip-compressed body.
    pub body: Vec<u8>,
    /// Size before compression.
    pub raw_len: usize,
    /// Hex SHA-256 of the uncompressed rendition.
    pub sha256: String,
}

/// Result of a successful upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uploaded {
    pub attempts: u32,
}

/// Writes renditions to the destination bucket.
#[derive(Clone)]
pub struct Sink {
    writer: Arc<dyn ObjectWriter>,
    bucket: String,
    level: u32,
    max_retries: u32,
    retry_backoff: Duration,
}

impl Sink {
    pub fn new(
        writer: Arc<dyn ObjectWriter>,
        bucket: impl Into<String>,
        compression: &CompressionConfig,
        upload: &UploadConfig,
    ) -> Self {
        Self {
            writer,
            bucket: bucket.into(),
            level: compression.level,
            max_retries: upload.max_retries,
            retry_backoff: upload.retry_backoff(),
        }
    }

    /// Destination bucket for every write.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Compress a rendition. Consumes it; the raw bytes are not needed after.
    pub fn prepare(&self, rendition: Rendition) -> Result<PreparedObject, CompressError> {
        let body = gzip(&rendition.bytes, self.level)?;
        let sha256 = format!("{:x}", Sha256::digest(&rendition.bytes));
        Ok(PreparedObject {
            key: rendition.key,
            content_type: rendition.content_type,
            body,
            raw_len: rendition.bytes.len(),
            sha256,
        })
    }

    /// Write a prepared object, retrying up to `max_retries` extra times.
    pub async fn upload(&self, object: &PreparedObject) -> Result<Uploaded, SinkError> {
        let metadata = ObjectMetadata {
            content_type: object.content_type.clone(),
            content_encoding: Some(GZIP_ENCODING.to_string()),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .writer
                .put(&self.bucket, &object.key, &object.body, &metadata)
                .await
            {
                Ok(()) => {
                    if attempt > 1 {
                        debug!(
                            target: TRACING_TARGET,
                            key = %object.key,
                            attempt,
                            "Write succeeded after retry"
                        );
                    }
                    return Ok(Uploaded { attempts: attempt });
                }
                Err(e) if attempt <= self.max_retries => {
                    let backoff = self.retry_backoff * attempt;
                    warn!(
                        target: TRACING_TARGET,
                        key = %object.key,
                        attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Write failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(source) => {
                    return Err(SinkError::Write {
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }
}
