//! # Image Derivatives
//!
//! An event-driven generator of responsive image renditions. Every time an
//! image lands in the input bucket, a notification names it; the handler
//! fetches the image, produces a resized WebP for each width of a fixed
//! ladder plus a re-encode of the original, gzips every result, and writes
//! them to the output bucket.
//!
//! # Architecture: Intake → Derive → Sink
//!
//! ```text
//! 1. Intake   notification  →  (bucket, key) records   (event parsing)
//! 2. Derive   source bytes  →  N+1 encoded renditions   (decode once, fan out)
//! 3. Sink     renditions    →  gzip objects in bucket   (bounded, retried writes)
//! ```
//!
//! For `photos/cat.jpg` and the default ladder the output bucket receives:
//!
//! ```text
//! photos/cat-200.webp    image/webp   gzip
//! photos/cat-400.webp    image/webp   gzip
//! photos/cat-800.webp    image/webp   gzip
//! photos/cat-1600.webp   image/webp   gzip
//! photos/cat-3200.webp   image/webp   gzip
//! photos/cat.jpg         image/jpeg   gzip
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`event`] | Intake: parses S3-style and flat notification payloads into records |
//! | [`imaging`] | Derive: decode, resize-to-WebP and re-encode behind the [`imaging::ImageBackend`] trait |
//! | [`naming`] | Output key derivation (`<key-without-ext>-<w>.webp`) |
//! | [`compress`] | gzip content encoding |
//! | [`sink`] | Compress-and-store with linear-backoff retries |
//! | [`store`] | Object store capabilities: S3, local directory, in-memory |
//! | [`pipeline`] | Per-record orchestration, failure isolation, invocation budget |
//! | [`report`] | Batch outcome types, JSON and text rendering |
//! | [`config`] | `config.toml` loading, validation, merging, env overrides |
//!
//! # Design Decisions
//!
//! ## Decode Once, Fan Out
//!
//! A source is decoded exactly once. Every ladder width and the original
//! re-encode read the same immutable decoded image in parallel on a
//! dedicated rayon pool, so the width ladder costs one decode plus N resizes.
//! The pool is separate from the async runtime: encoding never starves store
//! I/O, and store I/O never waits behind encoding.
//!
//! ## Failures Stay Local
//!
//! A batch never fails as a whole. A record that cannot be fetched or
//! decoded is reported and the next record runs. Within a record each output
//! succeeds or fails on its own; a failed width does not take its siblings
//! down with it. The [`report::BatchReport`] says exactly what was written.
//!
//! ## Detected Format, Not Extension
//!
//! The source format comes from the content signature. The original
//! re-encode keeps the source's key but is written in the detected format
//! with the matching content type.
//!
//! ## Pure-Rust Imaging
//!
//! The [`imaging`] module uses the `image` crate (Lanczos3 resampling, WebP
//! encoding) with no system libraries, so the binary runs unchanged on any
//! function host.
//!
//! ## Idempotent Writes
//!
//! Output keys depend only on the source key and the ladder; every write
//! overwrites. Redelivered notifications rewrite the same key set.

pub mod compress;
pub mod config;
pub mod event;
pub mod imaging;
pub mod naming;
pub mod pipeline;
pub mod report;
pub mod sink;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;
