//! Pipeline configuration.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! the base layer; an optional user file overrides individual keys; the
//! `TARGET_BUCKET` environment variable overrides the destination bucket last.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! target_bucket = ""          # Destination bucket (TARGET_BUCKET env wins)
//!
//! [derivatives]
//! widths = [200, 400, 800, 1600, 3200]  # Width ladder, in output order
//! quality = 80                # JPEG quality for the re-encoded original
//! max_pixels = 50000000       # Largest resized rendition, in pixels
//!
//! [compression]
//! level = 6                   # gzip level (0-9)
//!
//! [upload]
//! max_concurrent = 8          # Parallel writes to the output store
//! max_retries = 3             # Extra attempts after a failed write
//! retry_backoff_ms = 200      # Delay grows linearly per attempt
//!
//! [invocation]
//! timeout_secs = 300          # Host invocation budget
//! safety_margin_secs = 10     # No new record starts inside this margin
//!
//! [processing]
//! max_processes = 4           # Encoding threads (omit for auto = CPU cores)
//!
//! [store]
//! kind = "s3"                 # "s3" or "local"
//! local_root = ".derivatives-store"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the destination bucket.
pub const TARGET_BUCKET_ENV: &str = "TARGET_BUCKET";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("no destination bucket: set {TARGET_BUCKET_ENV} or target_bucket in config.toml")]
    MissingTargetBucket,
}

/// Full pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Bucket every output is written to.
    pub target_bucket: String,
    pub derivatives: DerivativesConfig,
    pub compression: CompressionConfig,
    pub upload: UploadConfig,
    pub invocation: InvocationConfig,
    pub processing: ProcessingConfig,
    pub store: StoreConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_bucket: String::new(),
            derivatives: DerivativesConfig::default(),
            compression: CompressionConfig::default(),
            upload: UploadConfig::default(),
            invocation: InvocationConfig::default(),
            processing: ProcessingConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Validate config values are within acceptable ranges.
    ///
    /// The destination bucket is checked separately by
    /// [`require_target_bucket`](Self::require_target_bucket) so the engine can
    /// run without one (the `derive` command never writes to a store).
    pub fn validate(&self) -> Result<(), ConfigError> {
        let widths = &self.derivatives.widths;
        if widths.is_empty() {
            return Err(ConfigError::Validation(
                "derivatives.widths must not be empty".into(),
            ));
        }
        if widths.contains(&0) {
            return Err(ConfigError::Validation(
                "derivatives.widths must be positive".into(),
            ));
        }
        for (i, w) in widths.iter().enumerate() {
            if widths[..i].contains(w) {
                return Err(ConfigError::Validation(format!(
                    "derivatives.widths contains {w} twice"
                )));
            }
        }
        if !(1..=100).contains(&self.derivatives.quality) {
            return Err(ConfigError::Validation(
                "derivatives.quality must be 1-100".into(),
            ));
        }
        if self.derivatives.max_pixels == 0 {
            return Err(ConfigError::Validation(
                "derivatives.max_pixels must be positive".into(),
            ));
        }
        if self.compression.level > 9 {
            return Err(ConfigError::Validation(
                "compression.level must be 0-9".into(),
            ));
        }
        if self.upload.max_concurrent == 0 {
            return Err(ConfigError::Validation(
                "upload.max_concurrent must be at least 1".into(),
            ));
        }
        if self.invocation.timeout_secs <= self.invocation.safety_margin_secs {
            return Err(ConfigError::Validation(
                "invocation.timeout_secs must exceed invocation.safety_margin_secs".into(),
            ));
        }
        Ok(())
    }

    /// Fail unless a destination bucket is configured.
    pub fn require_target_bucket(&self) -> Result<&str, ConfigError> {
        if self.target_bucket.trim().is_empty() {
            Err(ConfigError::MissingTargetBucket)
        } else {
            Ok(&self.target_bucket)
        }
    }
}

/// Width ladder and re-encode settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DerivativesConfig {
    /// Target pixel widths, one WebP rendition each, in this order.
    pub widths: Vec<u32>,
    /// Quality for lossy re-encodes of the original (JPEG). 1-100.
    pub quality: u32,
    /// Pixel cap for one resized rendition. Larger plans fail that width.
    pub max_pixels: u64,
}

impl Default for DerivativesConfig {
    fn default() -> Self {
        Self {
            widths: vec![200, 400, 800, 1600, 3200],
            quality: 80,
            max_pixels: 50_000_000,
        }
    }
}

/// gzip settings for the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressionConfig {
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { level: 6 }
    }
}

/// Output-store write settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    /// Maximum writes in flight per record.
    pub max_concurrent: usize,
    /// Additional attempts after the first failed write.
    pub max_retries: u32,
    /// Base delay between attempts; attempt `n` waits `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            max_retries: 3,
            retry_backoff_ms: 200,
        }
    }
}

impl UploadConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Host invocation budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InvocationConfig {
    pub timeout_secs: u64,
    pub safety_margin_secs: u64,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            safety_margin_secs: 10,
        }
    }
}

impl InvocationConfig {
    /// Hard limit for the whole invocation.
    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Point after which no new record is started.
    pub fn soft_limit(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.saturating_sub(self.safety_margin_secs))
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel encoding threads.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// Which store implementation backs the input and output buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    S3,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// Root directory for the local store; buckets are subdirectories.
    pub local_root: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::S3,
            local_root: ".derivatives-store".to_string(),
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(PipelineConfig::default()).unwrap_or_else(|_| {
        // Every field of the default config is TOML-representable.
        toml::Value::Table(toml::map::Map::new())
    })
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto the stock defaults, then deserialize and validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<PipelineConfig, ConfigError> {
    let base = stock_defaults_value();
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: PipelineConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the config file at `path` (if given), apply `TARGET_BUCKET`, validate.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
    let overlay = match path {
        Some(p) => Some(toml::from_str::<toml::Value>(&fs::read_to_string(p)?)?),
        None => None,
    };
    let mut config = resolve_config(overlay)?;
    apply_env(&mut config, std::env::var(TARGET_BUCKET_ENV).ok());
    Ok(config)
}

/// Apply environment overrides. Empty values are ignored.
pub fn apply_env(config: &mut PipelineConfig, target_bucket: Option<String>) {
    if let Some(bucket) = target_bucket.filter(|b| !b.trim().is_empty()) {
        config.target_bucket = bucket;
    }
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# image-derivatives configuration
# ===============================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# Destination bucket for every rendition. The TARGET_BUCKET environment
# variable overrides this value; one of the two must be set to run `handle`.
target_bucket = ""

# ---------------------------------------------------------------------------
# Renditions
# ---------------------------------------------------------------------------
[derivatives]
# Pixel widths to generate. Each produces <key-without-extension>-<width>.webp.
# Height follows the source aspect ratio. Widths above the source are upscaled.
widths = [200, 400, 800, 1600, 3200]

# JPEG quality used when re-encoding a JPEG original (1 = worst, 100 = best).
# WebP renditions are lossless; PNG and TIFF re-encodes are lossless.
quality = 80

# Largest resized rendition, in pixels. A width whose planned size is above
# this, or above the WebP limit of 16383 px per side, is reported as failed
# instead of being rendered. Matters for very narrow or very tall sources.
max_pixels = 50000000

# ---------------------------------------------------------------------------
# Compression
# ---------------------------------------------------------------------------
[compression]
# gzip level applied to every object before upload (0 = store, 9 = smallest).
level = 6

# ---------------------------------------------------------------------------
# Uploads
# ---------------------------------------------------------------------------
[upload]
# Writes in flight at once for a single record.
max_concurrent = 8

# Extra attempts after a failed write, waiting retry_backoff_ms * attempt.
max_retries = 3
retry_backoff_ms = 200

# ---------------------------------------------------------------------------
# Invocation budget
# ---------------------------------------------------------------------------
[invocation]
# Total time the host grants one invocation.
timeout_secs = 300

# No new record is started once less than this much budget remains.
safety_margin_secs = 10

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum encoding threads. Omit to use all CPU cores.
# max_processes = 4

# ---------------------------------------------------------------------------
# Stores
# ---------------------------------------------------------------------------
[store]
# "s3" uses the default AWS credential chain; "local" maps buckets to
# directories under local_root.
kind = "s3"
local_root = ".derivatives-store"
"##
}
