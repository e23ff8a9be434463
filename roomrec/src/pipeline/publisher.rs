//! Publishing finished files to durable storage.

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use chunk_store::{ObjectStore, StreamKind};

use crate::error::{Error, Result};

/// Folder in the remote store holding published recordings, separate from
/// the raw chunk namespace.
const PUBLISH_FOLDER: &str = "merged_videos";

/// Uploads finished files under derived, overwrite-stable identifiers.
///
/// Re-publishing the same recording overwrites the previous object and
/// returns a URL to the latest content; no lock is taken on the store.
/// Failures are not retried here, the caller decides. Scratch files stay in
/// place after upload: one file can back several publishes (a lone camera
/// stream is both the individual recording and the composite), and the
/// run's scratch teardown removes everything at the end.
pub struct Publisher {
    store: Arc<dyn ObjectStore>,
}

impl Publisher {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Identifier for one participant's reconstructed stream.
    pub fn individual_id(session_id: &str, participant_id: &str, kind: StreamKind) -> String {
        format!("{PUBLISH_FOLDER}/{session_id}_{participant_id}_{kind}")
    }

    /// Identifier for a session's mixed composite.
    pub fn composite_id(session_id: &str) -> String {
        format!("{PUBLISH_FOLDER}/{session_id}_mixed")
    }

    /// Identifier for an ad-hoc composite of already-published files.
    pub fn adhoc_id(run_id: &str) -> String {
        format!("{PUBLISH_FOLDER}/adhoc_{run_id}_mixed")
    }

    /// Upload `local_path` under `id`.
    pub async fn publish(&self, local_path: &Path, id: &str) -> Result<String> {
        let url = self
            .store
            .upload(local_path, id)
            .await
            .map_err(|e| Error::PublishFailed {
                id: id.to_string(),
                reason: e.to_string(),
            })?;

        info!(id, url, "published recording");
        Ok(url)
    }
}
