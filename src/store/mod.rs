//! Object store capabilities.
//!
//! The pipeline never talks to a concrete SDK. It reads sources through
//! [`ObjectFetcher`] and writes renditions through [`ObjectWriter`]; both are
//! safe for concurrent use.
//!
//! | Store | Use |
//! |---|---|
//! | [`S3Store`] | production, default AWS credential chain |
//! | [`LocalStore`] | development: buckets are directories |
//! | [`MemoryStore`] | tests: in-memory map with injectable failures |

mod local;
mod memory;
mod s3;

pub use local::LocalStore;
pub use memory::{MemoryStore, StoredObject};
pub use s3::S3Store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object s3://{bucket}/{key} not found")]
    NotFound { bucket: String, key: String },
    #[error("access denied to s3://{bucket}/{key}")]
    AccessDenied { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Backend(String),
}

/// Headers stored with an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
}

/// Read access to the input store.
#[async_trait]
pub trait ObjectFetcher: Send + Sync {
    /// Fetch the full body of `bucket/key`.
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;
}

/// Write access to the output store. `put` overwrites any existing object.
#[async_trait]
pub trait ObjectWriter: Send + Sync {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<(), StoreError>;
}
