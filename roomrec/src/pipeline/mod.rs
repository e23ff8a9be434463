//! The recording-merge pipeline.
//!
//! Per session: reconstruct each participant's camera and screen streams
//! from uploaded chunks ([`merger`]), composite the camera streams into one
//! side-by-side file ([`compositor`]), publish everything ([`publisher`])
//! and hand references to the directory ([`orchestrator`]).

pub mod compositor;
pub mod ffmpeg;
pub mod merger;
pub mod orchestrator;
pub mod publisher;

pub use compositor::Compositor;
pub use merger::StreamMerger;
pub use orchestrator::Orchestrator;
pub use publisher::Publisher;

use std::path::{Path, PathBuf};

use chunk_store::StreamKind;

use crate::error::Result;

/// Scratch directory scoped to one pipeline run.
///
/// Paths are keyed by run id plus participant index, so concurrent runs and
/// concurrent reconstructions within a run never collide. The whole
/// directory is removed when the run ends, success or failure.
#[derive(Debug, Clone)]
pub struct RunScratch {
    dir: PathBuf,
}

impl RunScratch {
    pub async fn create(root: &Path, run_id: &str) -> Result<Self> {
        let dir = root.join(format!("roomrec-{run_id}"));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reconstruction output for one (participant, stream).
    pub fn stream_path(&self, participant_index: usize, kind: StreamKind) -> PathBuf {
        self.dir
            .join(format!("participant_{participant_index}_{kind}.webm"))
    }

    /// Download target for one ad-hoc composite input.
    pub fn adhoc_input_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("input_{index}.webm"))
    }

    pub fn composite_path(&self) -> PathBuf {
        self.dir.join("composite.webm")
    }

    /// Remove the scratch tree. Failures are logged, not propagated; a
    /// leftover directory must never mask the run's real outcome.
    pub async fn cleanup(&self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(dir = %self.dir.display(), error = %e, "failed to remove scratch dir");
        }
    }
}
