//! Output key naming for derivatives.
//!
//! Downstream content-delivery consumers address renditions by key, so the
//! scheme below is a wire contract and must stay bit-exact:
//!
//! - `photos/cat.jpg` at width 400 → `photos/cat-400.webp`
//! - `photos/cat.jpg` re-encoded   → `photos/cat.jpg` (unchanged)
//!
//! ## Extension stripping
//!
//! Only the extension of the **last path segment** is stripped. Dots in
//! directory names are preserved, and a leading dot marks a hidden file
//! rather than an extension:
//! - `a.b/c.png` → `a.b/c`
//! - `photos/.hidden` → `photos/.hidden`
//! - `archive.tar.gz` → `archive.tar`
//!
//! A derivative key can never equal its source key: the source continues the
//! shared base with `.` (or ends), the derivative continues it with `-`.

/// Return the source key with the extension of its final segment removed.
pub fn base_name(key: &str) -> &str {
    let segment_start = key.rfind('/').map(|i| i + 1).unwrap_or(0);
    match key[segment_start..].rfind('.') {
        Some(dot) if dot > 0 => &key[..segment_start + dot],
        _ => key,
    }
}

/// Output key for the WebP rendition of `source_key` at `width` pixels.
pub fn derivative_key(source_key: &str, width: u32) -> String {
    format!("{}-{}.webp", base_name(source_key), width)
}

/// Output key for the re-encoded original. Always the source key itself.
pub fn original_key(source_key: &str) -> String {
    source_key.to_string()
}
