//! Per-run result accumulator.
//!
//! One `FinalizeReport` is built per finalize run and threaded through the
//! orchestrator; nothing about a run lives in process-wide state, so
//! concurrent sessions cannot observe each other's URLs.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Published URLs for one participant. An absent stream stays `None`; the
/// pipeline never silently drops a participant from the report.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantResult {
    pub participant_id: String,
    pub display_name: String,
    pub camera_url: Option<String>,
    pub screen_url: Option<String>,
    /// Sequence indices missing from the listings that were reconstructed.
    pub camera_gaps: u32,
    pub screen_gaps: u32,
}

impl ParticipantResult {
    pub fn absent(participant_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            display_name: display_name.into(),
            camera_url: None,
            screen_url: None,
            camera_gaps: 0,
            screen_gaps: 0,
        }
    }

    pub fn has_any_stream(&self) -> bool {
        self.camera_url.is_some() || self.screen_url.is_some()
    }
}

/// Result of one finalize run.
#[derive(Debug, Clone, Serialize)]
pub struct FinalizeReport {
    pub session_id: String,
    pub run_id: String,
    pub participants: Vec<ParticipantResult>,
    /// Side-by-side composite of all present camera streams.
    pub composite_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl FinalizeReport {
    /// Individual camera URLs in roster order, skipping absent streams.
    pub fn individual_urls(&self) -> Vec<&str> {
        self.participants
            .iter()
            .filter_map(|p| p.camera_url.as_deref())
            .collect()
    }

    /// Individual screen-share URLs in roster order.
    pub fn screen_urls(&self) -> Vec<&str> {
        self.participants
            .iter()
            .filter_map(|p| p.screen_url.as_deref())
            .collect()
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}
