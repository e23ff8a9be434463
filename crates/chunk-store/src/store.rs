//! The store trait the pipeline consumes.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::path::Path;

use crate::error::StoreResult;

/// Streaming chunk body. Each item is one transport-sized piece of the
/// object, yielded in order.
pub type ByteStream = BoxStream<'static, StoreResult<Bytes>>;

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRef {
    /// Store identifier (public id), unique within the store.
    pub id: String,
    /// Object size when the listing reports it.
    pub bytes: Option<u64>,
}

impl ChunkRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            bytes: None,
        }
    }

    pub fn with_size(id: impl Into<String>, bytes: u64) -> Self {
        Self {
            id: id.into(),
            bytes: Some(bytes),
        }
    }
}

/// Remote object store with list-by-prefix, fetch, upload and delete.
///
/// Implementations must page through the backing store's bounded listing
/// until no continuation cursor remains; a prefix matching zero objects is
/// `StoreError::NotFound`, never an empty success.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All objects under `prefix`, in store order (callers sequence them).
    async fn list(&self, prefix: &str) -> StoreResult<Vec<ChunkRef>>;

    /// Stream one object's bytes.
    async fn fetch(&self, id: &str) -> StoreResult<ByteStream>;

    /// Upload a local file under `id`, replacing any existing object with
    /// that identifier. Returns the stable delivery URL.
    async fn upload(&self, local_path: &Path, id: &str) -> StoreResult<String>;

    /// Remove one object. Deleting a missing object is not an error.
    async fn delete(&self, id: &str) -> StoreResult<()>;
}
