//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy of a finalize run. Every stage failure names the stream
/// or stage that caused it so a run-level error is diagnosable on its own.
#[derive(Error, Debug)]
pub enum Error {
    /// No chunks exist for a prefix. Per-participant this downgrades to
    /// "stream absent"; run-level it means the session had nothing to merge.
    #[error("no recording chunks found for `{prefix}`")]
    NotFound { prefix: String },

    /// The reconstruction transcoder exited non-zero.
    #[error("merge failed for `{prefix}` (ffmpeg exit {code}): {detail}")]
    MergeFailed {
        prefix: String,
        code: i32,
        detail: String,
    },

    /// Composition failed: transcoder error or unreadable input.
    #[error("compose failed: {reason}")]
    ComposeFailed { reason: String },

    /// Remote upload of a finished file failed. Not retried internally.
    #[error("publish failed for `{id}`: {reason}")]
    PublishFailed { id: String, reason: String },

    /// Directory-service lookup or persistence failure.
    #[error("directory error: {0}")]
    Directory(String),

    /// Run cancelled between steps.
    #[error("finalize run cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(#[from] chunk_store::StoreError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(prefix: impl Into<String>) -> Self {
        Self::NotFound {
            prefix: prefix.into(),
        }
    }

    pub fn compose(reason: impl Into<String>) -> Self {
        Self::ComposeFailed {
            reason: reason.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// True for failures that mean "this stream does not exist or cannot be
    /// rebuilt", which the orchestrator records as an absent stream instead
    /// of aborting the run.
    pub fn is_stream_absence(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::MergeFailed { .. }
                | Self::Store(chunk_store::StoreError::NotFound { .. })
        )
    }
}
