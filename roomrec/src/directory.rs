//! Client seam for the external room/participant directory.
//!
//! The conferencing backend owns rooms, participants and the durable
//! recording table; the pipeline only reads the participant roster and
//! hands back published recording references.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// One member of the session roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
}

/// What a published recording is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordingKind {
    /// One participant's reconstructed camera stream.
    Individual,
    /// One participant's reconstructed screen share.
    IndividualScreen,
    /// The side-by-side composite of all camera streams.
    Mixed,
}

impl RecordingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::IndividualScreen => "individual-screen",
            Self::Mixed => "mixed",
        }
    }
}

/// Durable reference handed to the directory after publishing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedRecording {
    pub session_id: String,
    /// Absent for the mixed composite, which belongs to the whole session.
    pub participant_id: Option<String>,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: RecordingKind,
}

/// Directory-service operations the pipeline depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Directory: Send + Sync {
    /// Roster of a session. Unknown sessions are a [`Error::Directory`].
    async fn participants(&self, session_id: &str) -> Result<Vec<Participant>>;

    /// Persist one published recording reference.
    async fn record(&self, recording: &PublishedRecording) -> Result<()>;
}

/// reqwest implementation against the backend's internal API.
pub struct HttpDirectory {
    client: reqwest::Client,
    base: String,
}

#[derive(Debug, Deserialize)]
struct RosterResponse {
    participants: Vec<Participant>,
}

impl HttpDirectory {
    pub fn new(base: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Directory(format!("client init: {e}")))?;
        Ok(Self {
            client,
            base: base.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base.trim_end_matches('/'))
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn participants(&self, session_id: &str) -> Result<Vec<Participant>> {
        let url = self.url(&format!("sessions/{session_id}/participants"));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Directory(format!("participants lookup: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::Directory(format!("unknown session `{session_id}`")));
        }
        if !response.status().is_success() {
            return Err(Error::Directory(format!(
                "participants lookup returned HTTP {}",
                response.status()
            )));
        }

        let roster: RosterResponse = response
            .json()
            .await
            .map_err(|e| Error::Directory(format!("roster decode: {e}")))?;
        Ok(roster.participants)
    }

    async fn record(&self, recording: &PublishedRecording) -> Result<()> {
        let url = self.url(&format!("sessions/{}/recordings", recording.session_id));
        let response = self
            .client
            .post(&url)
            .json(recording)
            .send()
            .await
            .map_err(|e| Error::Directory(format!("record recording: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Directory(format!(
                "record recording returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}
