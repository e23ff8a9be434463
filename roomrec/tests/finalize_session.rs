//! End-to-end finalize runs against the in-memory store and a stub
//! transcoder binary standing in for ffmpeg.

#![cfg(unix)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chunk_store::{ChunkKey, MemoryObjectStore, StreamKind};
use roomrec::config::TileGeometry;
use roomrec::directory::{Directory, Participant, PublishedRecording, RecordingKind};
use roomrec::error::{Error, Result};
use roomrec::pipeline::Orchestrator;
use roomrec::pipeline::orchestrator::OrchestratorOptions;

/// Directory stub that serves a fixed roster and logs recorded references.
struct RecordingLog {
    roster: Vec<Participant>,
    recorded: Mutex<Vec<PublishedRecording>>,
}

impl RecordingLog {
    fn new(ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            roster: ids
                .iter()
                .map(|id| Participant {
                    id: id.to_string(),
                    display_name: id.to_uppercase(),
                })
                .collect(),
            recorded: Mutex::new(Vec::new()),
        })
    }

    fn recorded(&self) -> Vec<PublishedRecording> {
        self.recorded.lock().clone()
    }
}

#[async_trait]
impl Directory for RecordingLog {
    async fn participants(&self, _session_id: &str) -> Result<Vec<Participant>> {
        Ok(self.roster.clone())
    }

    async fn record(&self, recording: &PublishedRecording) -> Result<()> {
        self.recorded.lock().push(recording.clone());
        Ok(())
    }
}

/// Stub transcoder: copies stdin to its last argument. With a null stdin
/// (composition) it produces an empty output file and still exits 0, which
/// is all the pipeline observes.
fn stub_transcoder(dir: &Path) -> String {
    write_script(
        dir,
        "ffmpeg-stub",
        "#!/bin/sh\nfor last in \"$@\"; do :; done\ncat > \"$last\"\n",
    )
}

/// Stub that fails whenever the output path is a screen stream, so camera
/// merges succeed while screen merges exit non-zero.
fn screen_failing_transcoder(dir: &Path) -> String {
    write_script(
        dir,
        "ffmpeg-screenfail",
        concat!(
            "#!/bin/sh\n",
            "for last in \"$@\"; do :; done\n",
            "case \"$last\" in\n",
            "  *screen*) echo \"simulated screen merge failure\" >&2; exit 1 ;;\n",
            "esac\n",
            "cat > \"$last\"\n",
        ),
    )
}

fn failing_transcoder(dir: &Path) -> String {
    write_script(
        dir,
        "ffmpeg-fail",
        "#!/bin/sh\necho \"simulated merge failure\" >&2\nexit 1\n",
    )
}

fn write_script(dir: &Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

/// Minimal HTTP responder serving fixed bodies by path, standing in for
/// the delivery host of already-published recordings. Returns the base
/// URL; the listener lives until the runtime shuts down.
async fn serve_recordings(files: Vec<(&'static str, &'static [u8])>) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let files = files.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).into_owned();
                let path = request.split_whitespace().nth(1).unwrap_or("/");
                let response = match files.iter().find(|(p, _)| *p == path) {
                    Some((_, body)) => {
                        let mut bytes = format!(
                            "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                            body.len()
                        )
                        .into_bytes();
                        bytes.extend_from_slice(body);
                        bytes
                    }
                    None => b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                        .to_vec(),
                };
                let _ = socket.write_all(&response).await;
            });
        }
    });
    format!("http://{addr}")
}

fn seed_chunks(
    store: &MemoryObjectStore,
    session: &str,
    participant: &str,
    kind: StreamKind,
    bodies: &[&[u8]],
) {
    for (index, body) in bodies.iter().enumerate() {
        let key = ChunkKey {
            session_id: session.to_string(),
            participant_id: participant.to_string(),
            kind,
            sequence_index: index as u32,
        };
        store.put(key.identifier(), Bytes::copy_from_slice(body));
    }
}

fn orchestrator(
    store: Arc<MemoryObjectStore>,
    directory: Arc<RecordingLog>,
    ffmpeg_path: String,
    scratch_root: PathBuf,
) -> Orchestrator {
    Orchestrator::new(
        store,
        directory,
        OrchestratorOptions {
            ffmpeg_path,
            scratch_root,
            tile: TileGeometry::default(),
            max_transcodes: 2,
        },
    )
}

#[tokio::test]
async fn two_camera_participants_produce_individuals_and_composite() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    seed_chunks(&store, "room-1", "alice", StreamKind::Camera, &[b"a0", b"a1", b"a2"]);
    seed_chunks(&store, "room-1", "bob", StreamKind::Camera, &[b"b0", b"b1", b"b2"]);

    let directory = RecordingLog::new(&["alice", "bob"]);
    let orchestrator = orchestrator(
        store.clone(),
        directory.clone(),
        stub_transcoder(tmp.path()),
        tmp.path().to_path_buf(),
    );

    let report = orchestrator.finalize_session("room-1").await.unwrap();

    assert_eq!(report.individual_urls().len(), 2);
    assert!(report.screen_urls().is_empty());
    assert!(report.composite_url.is_some());

    // Chunks were fed to the transcoder in sequence order.
    assert_eq!(
        store.get("merged_videos/room-1_alice_camera").unwrap().as_ref(),
        b"a0a1a2"
    );
    assert_eq!(
        store.get("merged_videos/room-1_bob_camera").unwrap().as_ref(),
        b"b0b1b2"
    );

    let recorded = directory.recorded();
    assert_eq!(recorded.len(), 3);
    assert_eq!(
        recorded
            .iter()
            .filter(|r| r.kind == RecordingKind::Individual)
            .count(),
        2
    );
    let mixed: Vec<_> = recorded
        .iter()
        .filter(|r| r.kind == RecordingKind::Mixed)
        .collect();
    assert_eq!(mixed.len(), 1);
    assert!(mixed[0].participant_id.is_none());

    // No per-run scratch survives the run.
    let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("roomrec-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn single_participant_composite_passes_camera_through() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    seed_chunks(&store, "solo", "alice", StreamKind::Camera, &[b"x", b"y"]);

    let directory = RecordingLog::new(&["alice"]);
    let orchestrator = orchestrator(
        store.clone(),
        directory.clone(),
        stub_transcoder(tmp.path()),
        tmp.path().to_path_buf(),
    );

    let report = orchestrator.finalize_session("solo").await.unwrap();

    assert!(report.composite_url.is_some());
    // Passthrough: the composite object holds the same bytes as the
    // individual camera recording.
    assert_eq!(
        store.get("merged_videos/solo_mixed").unwrap(),
        store.get("merged_videos/solo_alice_camera").unwrap()
    );
}

#[tokio::test]
async fn screen_merge_failure_downgrades_to_absent_stream() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    seed_chunks(&store, "room-2", "alice", StreamKind::Camera, &[b"cam"]);
    seed_chunks(&store, "room-2", "alice", StreamKind::Screen, &[b"scr"]);

    let directory = RecordingLog::new(&["alice"]);
    let orchestrator = orchestrator(
        store.clone(),
        directory.clone(),
        screen_failing_transcoder(tmp.path()),
        tmp.path().to_path_buf(),
    );

    let report = orchestrator.finalize_session("room-2").await.unwrap();

    assert_eq!(report.individual_urls().len(), 1);
    assert!(report.screen_urls().is_empty());
    assert!(report.participants[0].camera_url.is_some());
    assert!(report.participants[0].screen_url.is_none());
    assert!(
        directory
            .recorded()
            .iter()
            .all(|r| r.kind != RecordingKind::IndividualScreen)
    );
}

#[tokio::test]
async fn all_streams_failing_is_a_run_level_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    seed_chunks(&store, "room-3", "alice", StreamKind::Camera, &[b"cam"]);

    let directory = RecordingLog::new(&["alice"]);
    let orchestrator = orchestrator(
        store,
        directory.clone(),
        failing_transcoder(tmp.path()),
        tmp.path().to_path_buf(),
    );

    let err = orchestrator.finalize_session("room-3").await.unwrap_err();
    assert!(matches!(err, Error::NotFound { ref prefix } if prefix == "room-3"));
    assert!(directory.recorded().is_empty());
}

#[tokio::test]
async fn sequence_gaps_are_tolerated_and_counted() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    // Indices 0 and 2; chunk 1 was lost in transit.
    store.put("room-4_alice_000000", Bytes::from_static(b"first"));
    store.put("room-4_alice_000002", Bytes::from_static(b"third"));

    let directory = RecordingLog::new(&["alice"]);
    let orchestrator = orchestrator(
        store.clone(),
        directory,
        stub_transcoder(tmp.path()),
        tmp.path().to_path_buf(),
    );

    let report = orchestrator.finalize_session("room-4").await.unwrap();

    assert_eq!(report.participants[0].camera_gaps, 1);
    assert_eq!(
        store.get("merged_videos/room-4_alice_camera").unwrap().as_ref(),
        b"firstthird"
    );
}

#[tokio::test]
async fn screen_only_participant_gets_no_composite() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    seed_chunks(&store, "room-5", "alice", StreamKind::Screen, &[b"s0", b"s1"]);

    let directory = RecordingLog::new(&["alice"]);
    let orchestrator = orchestrator(
        store.clone(),
        directory.clone(),
        stub_transcoder(tmp.path()),
        tmp.path().to_path_buf(),
    );

    let report = orchestrator.finalize_session("room-5").await.unwrap();

    assert!(report.composite_url.is_none());
    assert_eq!(report.screen_urls().len(), 1);
    assert_eq!(
        store.get("merged_videos/room-5_alice_screen").unwrap().as_ref(),
        b"s0s1"
    );
    assert!(
        directory
            .recorded()
            .iter()
            .any(|r| r.kind == RecordingKind::IndividualScreen)
    );
}

#[tokio::test]
async fn adhoc_composite_downloads_publishes_and_records_mixed() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let base =
        serve_recordings(vec![("/left.webm", b"left".as_slice()), ("/right.webm", b"right".as_slice())])
            .await;

    let directory = RecordingLog::new(&[]);
    let orchestrator = orchestrator(
        store.clone(),
        directory.clone(),
        stub_transcoder(tmp.path()),
        tmp.path().to_path_buf(),
    );

    let url = orchestrator
        .finalize_adhoc_composite(
            &[format!("{base}/left.webm"), format!("{base}/right.webm")],
            Some("room-6"),
        )
        .await
        .unwrap();

    // The composite object landed in the store under the ad-hoc id the
    // returned URL points at.
    let id = url.strip_prefix("memory://").unwrap();
    assert!(id.starts_with("merged_videos/adhoc_"));
    assert!(id.ends_with("_mixed"));
    assert!(store.get(id).is_some());

    let recorded = directory.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].kind, RecordingKind::Mixed);
    assert_eq!(recorded[0].session_id, "room-6");
    assert!(recorded[0].participant_id.is_none());
    assert_eq!(recorded[0].url, url);

    // Downloaded inputs and the composite were cleaned with the run.
    let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("roomrec-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn adhoc_unreachable_source_aborts_the_composite() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let base = serve_recordings(vec![("/left.webm", b"left".as_slice())]).await;

    let directory = RecordingLog::new(&[]);
    let orchestrator = orchestrator(
        store,
        directory.clone(),
        stub_transcoder(tmp.path()),
        tmp.path().to_path_buf(),
    );

    let err = orchestrator
        .finalize_adhoc_composite(
            &[format!("{base}/left.webm"), format!("{base}/missing.webm")],
            Some("room-7"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ComposeFailed { .. }));
    assert!(directory.recorded().is_empty());
}
