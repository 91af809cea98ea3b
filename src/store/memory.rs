use super::{ObjectFetcher, ObjectMetadata, ObjectWriter, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

type ObjectId = (String, String);

/// An object as held by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub metadata: ObjectMetadata,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectId, StoredObject>,
    denied: HashSet<ObjectId>,
    pending_write_failures: HashMap<ObjectId, u32>,
    writes: Vec<ObjectId>,
}

/// In-memory store implementing both capabilities.
///
/// Records every write attempt that succeeds, and can be primed to deny
/// reads or to fail the next N writes to a key.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn id(bucket: &str, key: &str) -> ObjectId {
    (bucket.to_string(), key.to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an object, as an upload to the input store would.
    pub fn insert(&self, bucket: &str, key: &str, body: Vec<u8>) {
        self.state().objects.insert(
            id(bucket, key),
            StoredObject {
                body,
                metadata: ObjectMetadata {
                    content_type: "application/octet-stream".to_string(),
                    content_encoding: None,
                },
            },
        );
    }

    /// Make reads of `bucket/key` fail with access denied.
    pub fn deny(&self, bucket: &str, key: &str) {
        self.state().denied.insert(id(bucket, key));
    }

    /// Fail the next `times` writes to `bucket/key`.
    pub fn fail_writes(&self, bucket: &str, key: &str, times: u32) {
        self.state()
            .pending_write_failures
            .insert(id(bucket, key), times);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.state().objects.get(&id(bucket, key)).cloned()
    }

    /// Keys currently stored in `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.state()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Successful writes in completion order, as `(bucket, key)`.
    pub fn writes(&self) -> Vec<(String, String)> {
        self.state().writes.clone()
    }
}

#[async_trait]
impl ObjectFetcher for MemoryStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let state = self.state();
        let object_id = id(bucket, key);
        if state.denied.contains(&object_id) {
            return Err(StoreError::AccessDenied {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        state
            .objects
            .get(&object_id)
            .map(|o| o.body.clone())
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}

#[async_trait]
impl ObjectWriter for MemoryStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        let object_id = id(bucket, key);
        if let Some(remaining) = state.pending_write_failures.get_mut(&object_id)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(StoreError::Backend(format!(
                "injected write failure for {bucket}/{key}"
            )));
        }
        state.objects.insert(
            object_id.clone(),
            StoredObject {
                body: body.to_vec(),
                metadata: metadata.clone(),
            },
        );
        state.writes.push(object_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webp_meta() -> ObjectMetadata {
        ObjectMetadata {
            content_type: "image/webp".into(),
            content_encoding: Some("gzip".into()),
        }
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get("b", "k").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn denied_read_is_access_denied() {
        let store = MemoryStore::new();
        store.insert("b", "k", vec![1]);
        store.deny("b", "k");
        let err = store.get("b", "k").await.unwrap_err();
        assert!(matches!(err, StoreError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn put_overwrites() {
        let store = MemoryStore::new();
        store.put("b", "k", b"one", &webp_meta()).await.unwrap();
        store.put("b", "k", b"two", &webp_meta()).await.unwrap();

        assert_eq!(store.keys("b"), vec!["k".to_string()]);
        assert_eq!(store.object("b", "k").unwrap().body, b"two");
        assert_eq!(store.writes().len(), 2);
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let store = MemoryStore::new();
        store.fail_writes("b", "k", 2);
        assert!(store.put("b", "k", b"x", &webp_meta()).await.is_err());
        assert!(store.put("b", "k", b"x", &webp_meta()).await.is_err());
        store.put("b", "k", b"x", &webp_meta()).await.unwrap();
        assert_eq!(store.writes().len(), 1);
    }

    #[tokio::test]
    async fn keys_are_scoped_to_bucket() {
        let store = MemoryStore::new();
        store.insert("a", "1", vec![]);
        store.insert("b", "2", vec![]);
        assert_eq!(store.keys("a"), vec!["1".to_string()]);
    }
}
