//! Stream reconstruction: ordered chunks in, one continuous file out.

use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use chunk_store::{ObjectStore, StoreError, scan_gaps, sort_refs};

use crate::error::{Error, Result};
use crate::pipeline::ffmpeg;

/// One reconstructed stream on local scratch storage.
#[derive(Debug, Clone)]
pub struct MergedStream {
    pub path: PathBuf,
    pub chunk_count: usize,
    /// Sequence indices missing from the listing. Gaps are concatenated
    /// over, logged and reported, never silently dropped (and never fatal).
    pub gaps: u32,
}

/// Rebuilds one continuous media file from a chunk prefix.
///
/// Chunks are fetched strictly in sequence order and piped straight into a
/// single ffmpeg remux (`pipe:0` input); each chunk is fully forwarded
/// before the next is requested, so memory use is bounded by one transport
/// piece regardless of recording length.
pub struct StreamMerger {
    store: Arc<dyn ObjectStore>,
    ffmpeg_path: String,
}

impl StreamMerger {
    pub fn new(store: Arc<dyn ObjectStore>, ffmpeg_path: impl Into<String>) -> Self {
        Self {
            store,
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    fn remux_args(output: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-f".to_string(),
            "webm".to_string(),
            "-i".to_string(),
            "pipe:0".to_string(),
            "-c:v".to_string(),
            "libvpx-vp9".to_string(),
            "-c:a".to_string(),
            "libopus".to_string(),
            output.to_string_lossy().into_owned(),
        ]
    }

    /// Reconstruct the stream stored under `prefix` into `output`.
    ///
    /// `Error::NotFound` when the prefix has no chunks at all; the caller
    /// decides whether that is fatal (it is not, per participant).
    pub async fn reconstruct(&self, prefix: &str, output: &Path) -> Result<MergedStream> {
        let mut refs = self.store.list(prefix).await.map_err(|e| match e {
            StoreError::NotFound { .. } => Error::not_found(prefix),
            other => Error::Store(other),
        })?;

        sort_refs(&mut refs);
        let gaps = scan_gaps(&refs);
        if gaps > 0 {
            warn!(
                prefix,
                gaps, "sequence has missing chunks; concatenating what exists"
            );
        }
        debug!(prefix, chunks = refs.len(), "reconstructing stream");

        let args = Self::remux_args(output);
        let mut process = ffmpeg::spawn(&self.ffmpeg_path, &args, true)?;
        let mut stdin = process.take_stdin().ok_or_else(|| {
            Error::Io(std::io::Error::other("failed to capture ffmpeg stdin"))
        })?;

        // Feed chunks one at a time, in order. A write failure usually means
        // ffmpeg died; fall through to wait() so the diagnostic tail and
        // exit code make it into the error.
        let mut write_failed = false;
        'feed: for chunk in &refs {
            let mut body = self.store.fetch(&chunk.id).await?;
            while let Some(piece) = body.next().await {
                let piece = piece?;
                if stdin.write_all(&piece).await.is_err() {
                    write_failed = true;
                    break 'feed;
                }
            }
        }
        drop(stdin);

        let outcome = process.wait().await?;
        if !outcome.status.success() || write_failed {
            return Err(Error::MergeFailed {
                prefix: prefix.to_string(),
                code: outcome.exit_code(),
                detail: outcome.stderr_tail,
            });
        }

        info!(
            prefix,
            chunks = refs.len(),
            gaps,
            duration_secs = outcome.duration_secs,
            output = %output.display(),
            "stream reconstructed"
        );
        Ok(MergedStream {
            path: output.to_path_buf(),
            chunk_count: refs.len(),
            gaps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remux_args_pin_pipe_input_and_codecs() {
        let args = StreamMerger::remux_args(Path::new("/scratch/out.webm"));
        let joined = args.join(" ");
        assert!(joined.contains("-f webm -i pipe:0"));
        assert!(joined.contains("-c:v libvpx-vp9"));
        assert!(joined.contains("-c:a libopus"));
        assert_eq!(args.last().unwrap(), "/scratch/out.webm");
    }

    #[tokio::test]
    async fn missing_prefix_maps_to_not_found() {
        let store = Arc::new(chunk_store::MemoryObjectStore::new());
        let merger = StreamMerger::new(store, "ffmpeg");
        let err = merger
            .reconstruct("room_alice_", Path::new("/tmp/never-written.webm"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { ref prefix } if prefix == "room_alice_"));
    }
}
