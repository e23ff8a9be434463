//! Per-session pipeline driver.
//!
//! One finalize run walks reconstruct -> composite -> publish. Results
//! accumulate in a per-run [`FinalizeReport`]; no state is shared across
//! runs, so concurrent sessions cannot corrupt each other.

use chrono::Utc;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use chunk_store::{ChunkKey, ObjectStore, StreamKind};

use crate::config::{AppConfig, TileGeometry};
use crate::directory::{Directory, Participant, PublishedRecording, RecordingKind};
use crate::error::{Error, Result};
use crate::pipeline::merger::MergedStream;
use crate::pipeline::{Compositor, Publisher, RunScratch, StreamMerger};
use crate::report::{FinalizeReport, ParticipantResult};

/// Pipeline knobs lifted out of [`AppConfig`] so the orchestrator can be
/// built without store credentials in tests.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub ffmpeg_path: String,
    pub scratch_root: PathBuf,
    pub tile: TileGeometry,
    /// Concurrent reconstructions; each permit is one spawned ffmpeg.
    pub max_transcodes: usize,
}

impl OrchestratorOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            scratch_root: config.scratch_root(),
            tile: config.tile,
            max_transcodes: config.max_transcodes,
        }
    }
}

/// Both reconstructions of one participant. `None` means the stream is
/// absent (no chunks, or the merge failed), which is not a run failure.
struct ParticipantStreams {
    camera: Option<MergedStream>,
    screen: Option<MergedStream>,
}

pub struct Orchestrator {
    directory: Arc<dyn Directory>,
    merger: Arc<StreamMerger>,
    compositor: Compositor,
    publisher: Publisher,
    options: OrchestratorOptions,
    cancel: CancellationToken,
    http: reqwest::Client,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        directory: Arc<dyn Directory>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            merger: Arc::new(StreamMerger::new(store.clone(), options.ffmpeg_path.clone())),
            compositor: Compositor::new(options.ffmpeg_path.clone(), options.tile),
            publisher: Publisher::new(store),
            directory,
            options,
            cancel: CancellationToken::new(),
            http: reqwest::Client::new(),
        }
    }

    /// Token aborting the current run between steps. In-flight ffmpeg
    /// children are killed and scratch files removed.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Finalize one session: reconstruct every participant's streams,
    /// composite the cameras, publish everything and record references.
    pub async fn finalize_session(&self, session_id: &str) -> Result<FinalizeReport> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();
        info!(session_id, run_id, "finalize run starting");

        let roster = self.directory.participants(session_id).await?;
        if roster.is_empty() {
            return Err(Error::not_found(session_id));
        }

        let scratch = RunScratch::create(&self.options.scratch_root, &run_id).await?;
        let result = self.run_session(session_id, &roster, &scratch).await;
        scratch.cleanup().await;

        let (participants, composite_url) = result?;
        let report = FinalizeReport {
            session_id: session_id.to_string(),
            run_id,
            participants,
            composite_url,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            session_id,
            individuals = report.individual_urls().len(),
            screens = report.screen_urls().len(),
            composite = report.composite_url.is_some(),
            duration_secs = report.duration_secs(),
            "finalize run complete"
        );
        Ok(report)
    }

    async fn run_session(
        &self,
        session_id: &str,
        roster: &[Participant],
        scratch: &RunScratch,
    ) -> Result<(Vec<ParticipantResult>, Option<String>)> {
        let streams = self.reconstruct_all(session_id, roster, scratch).await?;

        if streams
            .iter()
            .all(|s| s.camera.is_none() && s.screen.is_none())
        {
            return Err(Error::not_found(session_id));
        }

        // Composite before any publish: a ComposeFailed run must not leave
        // partially published results behind.
        let camera_paths: Vec<PathBuf> = streams
            .iter()
            .filter_map(|s| s.camera.as_ref().map(|m| m.path.clone()))
            .collect();
        let composite_path = if camera_paths.is_empty() {
            None
        } else {
            Some(
                self.compositor
                    .compose(&camera_paths, &scratch.composite_path())
                    .await?,
            )
        };
        self.check_cancelled()?;

        let mut participants = Vec::with_capacity(roster.len());
        for (participant, stream) in roster.iter().zip(&streams) {
            let mut result = ParticipantResult::absent(&participant.id, &participant.display_name);

            if let Some(camera) = &stream.camera {
                let id = Publisher::individual_id(session_id, &participant.id, StreamKind::Camera);
                let url = self.publisher.publish(&camera.path, &id).await?;
                self.record(
                    session_id,
                    Some(participant.id.as_str()),
                    &url,
                    RecordingKind::Individual,
                )
                .await?;
                result.camera_url = Some(url);
                result.camera_gaps = camera.gaps;
            }
            if let Some(screen) = &stream.screen {
                let id = Publisher::individual_id(session_id, &participant.id, StreamKind::Screen);
                let url = self.publisher.publish(&screen.path, &id).await?;
                self.record(
                    session_id,
                    Some(participant.id.as_str()),
                    &url,
                    RecordingKind::IndividualScreen,
                )
                .await?;
                result.screen_url = Some(url);
                result.screen_gaps = screen.gaps;
            }
            participants.push(result);
        }

        let composite_url = match composite_path {
            Some(path) => {
                let url = self
                    .publisher
                    .publish(&path, &Publisher::composite_id(session_id))
                    .await?;
                self.record(session_id, None, &url, RecordingKind::Mixed).await?;
                Some(url)
            }
            None => None,
        };

        Ok((participants, composite_url))
    }

    /// Reconstruct camera and screen streams for every participant under a
    /// bounded worker pool. One task per participant; each task holds one
    /// transcode permit while its ffmpeg runs.
    async fn reconstruct_all(
        &self,
        session_id: &str,
        roster: &[Participant],
        scratch: &RunScratch,
    ) -> Result<Vec<ParticipantStreams>> {
        let semaphore = Arc::new(Semaphore::new(self.options.max_transcodes));
        let mut tasks = JoinSet::new();

        for (index, participant) in roster.iter().enumerate() {
            let merger = self.merger.clone();
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();
            let scratch = scratch.clone();
            let session_id = session_id.to_string();
            let participant_id = participant.id.clone();

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Cancelled)?;
                let camera = reconstruct_stream(
                    &merger,
                    &cancel,
                    &session_id,
                    &participant_id,
                    StreamKind::Camera,
                    scratch.stream_path(index, StreamKind::Camera),
                )
                .await?;
                let screen = reconstruct_stream(
                    &merger,
                    &cancel,
                    &session_id,
                    &participant_id,
                    StreamKind::Screen,
                    scratch.stream_path(index, StreamKind::Screen),
                )
                .await?;
                Ok::<_, Error>((index, ParticipantStreams { camera, screen }))
            });
        }

        let mut streams: Vec<Option<ParticipantStreams>> =
            (0..roster.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let task_result =
                joined.map_err(|e| Error::Io(std::io::Error::other(format!("worker task: {e}"))))?;
            match task_result {
                Ok((index, participant_streams)) => streams[index] = Some(participant_streams),
                Err(e) => {
                    // Transport or cancellation failure: stop the pool, the
                    // run cannot produce a trustworthy result.
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        Ok(streams.into_iter().flatten().collect())
    }

    /// Composite already-published recordings by URL, skipping
    /// reconstruction. Used when the caller already holds individually
    /// merged files. With one URL there is nothing to mix; it is returned
    /// unchanged, though the reference is still recorded when a session
    /// is given.
    pub async fn finalize_adhoc_composite(
        &self,
        urls: &[String],
        session_id: Option<&str>,
    ) -> Result<String> {
        if urls.is_empty() {
            return Err(Error::compose("no source URLs provided"));
        }
        if let [url] = urls {
            if let Some(session_id) = session_id {
                self.record(session_id, None, url, RecordingKind::Mixed).await?;
            }
            return Ok(url.clone());
        }

        let run_id = Uuid::new_v4().to_string();
        let scratch = RunScratch::create(&self.options.scratch_root, &run_id).await?;
        let result = self
            .run_adhoc(urls, session_id, &run_id, &scratch)
            .await;
        scratch.cleanup().await;
        result
    }

    async fn run_adhoc(
        &self,
        urls: &[String],
        session_id: Option<&str>,
        run_id: &str,
        scratch: &RunScratch,
    ) -> Result<String> {
        let mut inputs = Vec::with_capacity(urls.len());
        for (index, url) in urls.iter().enumerate() {
            self.check_cancelled()?;
            let path = scratch.adhoc_input_path(index);
            self.download(url, &path).await?;
            inputs.push(path);
        }

        let composite = self
            .compositor
            .compose(&inputs, &scratch.composite_path())
            .await?;
        let url = self
            .publisher
            .publish(&composite, &Publisher::adhoc_id(run_id))
            .await?;
        if let Some(session_id) = session_id {
            self.record(session_id, None, &url, RecordingKind::Mixed).await?;
        }
        Ok(url)
    }

    /// Download one published recording to scratch. Absent sources abort
    /// the composite, same as unreadable local inputs.
    async fn download(&self, url: &str, path: &std::path::Path) -> Result<()> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::compose(format!("download {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::compose(format!(
                "download {url}: HTTP {}",
                response.status()
            )));
        }

        let mut file = tokio::fs::File::create(path).await?;
        let mut body = response.bytes_stream();
        while let Some(piece) = body.next().await {
            let piece = piece.map_err(|e| Error::compose(format!("download {url}: {e}")))?;
            file.write_all(&piece).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn record(
        &self,
        session_id: &str,
        participant_id: Option<&str>,
        url: &str,
        kind: RecordingKind,
    ) -> Result<()> {
        self.directory
            .record(&PublishedRecording {
                session_id: session_id.to_string(),
                participant_id: participant_id.map(str::to_string),
                url: url.to_string(),
                kind,
            })
            .await
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// Reconstruct one stream, downgrading absence to `None`.
///
/// Dropping the merge future on cancellation kills the spawned ffmpeg
/// (`kill_on_drop`), so no transcoder outlives the run.
async fn reconstruct_stream(
    merger: &StreamMerger,
    cancel: &CancellationToken,
    session_id: &str,
    participant_id: &str,
    kind: StreamKind,
    output: PathBuf,
) -> Result<Option<MergedStream>> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let prefix = ChunkKey::prefix(session_id, participant_id, kind);
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        merged = merger.reconstruct(&prefix, &output) => match merged {
            Ok(stream) => Ok(Some(stream)),
            Err(e) if e.is_stream_absence() => {
                info!(prefix, %kind, error = %e, "stream absent, excluded from composition");
                Ok(None)
            }
            Err(e) => {
                warn!(prefix, %kind, error = %e, "reconstruction failed");
                Err(e)
            }
        },
    }
}
