use super::{ObjectFetcher, ObjectMetadata, ObjectWriter, StoreError};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use std::sync::Arc;

/// S3-backed store. One client serves both buckets; the SDK's connection
/// pool is shared across concurrent calls.
#[derive(Clone)]
pub struct S3Store {
    client: Arc<Client>,
}

impl S3Store {
    pub fn new(client: Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    /// Build a client from the default credential and region chain.
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config))
    }
}

/// Map an SDK failure onto the store taxonomy by S3 error code.
fn classify<E, R>(err: SdkError<E, R>, bucket: &str, key: &str) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug + 'static,
{
    let code = err.as_service_error().and_then(|e| e.code());
    match code {
        Some("NoSuchKey") | Some("NoSuchBucket") | Some("NotFound") => StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        Some("AccessDenied") | Some("Forbidden") => StoreError::AccessDenied {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        _ => StoreError::Backend(DisplayErrorContext(&err).to_string()),
    }
}

#[async_trait]
impl ObjectFetcher for S3Store {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, bucket, key))?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Backend(format!("truncated read of {bucket}/{key}: {e}")))?;
        Ok(body.into_bytes().to_vec())
    }
}

#[async_trait]
impl ObjectWriter for S3Store {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body.to_vec()))
            .content_type(&metadata.content_type)
            .set_content_encoding(metadata.content_encoding.clone())
            .send()
            .await
            .map_err(|e| classify(e, bucket, key))?;
        Ok(())
    }
}
