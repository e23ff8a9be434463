//! In-memory store used by tests and local development.
//!
//! Mirrors the remote store's observable behavior, including bounded-page
//! listing, so pagination handling is exercised without a network.

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{StoreError, StoreResult};
use crate::store::{ByteStream, ChunkRef, ObjectStore};

#[derive(Clone)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, Bytes>>>,
    /// Objects returned per listing page; small values force multi-page
    /// listings in tests.
    page_size: usize,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Arc::default(),
            page_size: 100,
        }
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: Arc::default(),
            page_size: page_size.max(1),
        }
    }

    /// Seed one object directly, bypassing upload.
    pub fn put(&self, id: impl Into<String>, body: impl Into<Bytes>) {
        self.objects.lock().insert(id.into(), body.into());
    }

    pub fn get(&self, id: &str) -> Option<Bytes> {
        self.objects.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    fn url_for(id: &str) -> String {
        format!("memory://{id}")
    }

    /// Resolve a URL previously returned by [`ObjectStore::upload`].
    pub fn id_from_url(url: &str) -> Option<&str> {
        url.strip_prefix("memory://")
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, prefix: &str) -> StoreResult<Vec<ChunkRef>> {
        // Page through our own map the way the remote API would, so callers
        // that mishandle cursors fail here too.
        let mut refs = Vec::new();
        let mut cursor = 0usize;
        loop {
            let objects = self.objects.lock();
            let page: Vec<ChunkRef> = objects
                .iter()
                .filter(|(id, _)| id.starts_with(prefix))
                .skip(cursor)
                .take(self.page_size)
                .map(|(id, body)| ChunkRef::with_size(id, body.len() as u64))
                .collect();
            drop(objects);

            let page_len = page.len();
            refs.extend(page);
            if page_len < self.page_size {
                break;
            }
            cursor += page_len;
        }

        if refs.is_empty() {
            return Err(StoreError::not_found(prefix));
        }
        Ok(refs)
    }

    async fn fetch(&self, id: &str) -> StoreResult<ByteStream> {
        let body = self
            .objects
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(id))?;
        // Split into small pieces so consumers see a genuine stream.
        let pieces: Vec<StoreResult<Bytes>> = body
            .chunks(64)
            .map(|piece| Ok(Bytes::copy_from_slice(piece)))
            .collect();
        Ok(futures::stream::iter(pieces).boxed())
    }

    async fn upload(&self, local_path: &Path, id: &str) -> StoreResult<String> {
        let body = tokio::fs::read(local_path).await?;
        self.objects.lock().insert(id.to_string(), Bytes::from(body));
        Ok(Self::url_for(id))
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.objects.lock().remove(id);
        Ok(())
    }
}
