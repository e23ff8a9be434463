//! ffmpeg process plumbing shared by the merger and compositor.

use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tracing::debug;

use crate::error::{Error, Result};

/// How many trailing stderr lines to keep for diagnostics. ffmpeg prints
/// its actual failure reason last, after pages of stream info.
const STDERR_TAIL_LINES: usize = 20;

/// Outcome of one ffmpeg invocation.
pub struct FfmpegOutcome {
    pub status: std::process::ExitStatus,
    pub duration_secs: f64,
    /// Last [`STDERR_TAIL_LINES`] stderr lines, joined.
    pub stderr_tail: String,
}

impl FfmpegOutcome {
    pub fn exit_code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }
}

/// Bounded ring of recent lines.
#[derive(Debug, Default)]
pub(crate) struct LineTail {
    lines: std::collections::VecDeque<String>,
    capacity: usize,
}

impl LineTail {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            lines: std::collections::VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub(crate) fn join(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// A spawned ffmpeg with stderr being drained in the background.
pub struct FfmpegProcess {
    child: Child,
    stderr_task: tokio::task::JoinHandle<LineTail>,
    started: std::time::Instant,
}

/// Spawn ffmpeg with the given args. `piped_stdin` controls whether the
/// caller feeds input through stdin (reconstruction) or ffmpeg reads its
/// own input files (composition).
pub fn spawn(ffmpeg_path: &str, args: &[String], piped_stdin: bool) -> Result<FfmpegProcess> {
    debug!(ffmpeg = ffmpeg_path, ?args, "spawning ffmpeg");

    let mut command = Command::new(ffmpeg_path);
    command
        .args(args)
        .env("LC_ALL", "C")
        .stdin(if piped_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| Error::Io(std::io::Error::other(format!("failed to spawn ffmpeg: {e}"))))?;

    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut tail = LineTail::new(STDERR_TAIL_LINES);
        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("ffmpeg: {line}");
                tail.push(line);
            }
        }
        tail
    });

    Ok(FfmpegProcess {
        child,
        stderr_task,
        started: std::time::Instant::now(),
    })
}

impl FfmpegProcess {
    /// Take ffmpeg's stdin handle. Only valid once, and only for processes
    /// spawned with `piped_stdin`.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Wait for exit and collect the stderr tail.
    pub async fn wait(self) -> Result<FfmpegOutcome> {
        let FfmpegProcess {
            mut child,
            stderr_task,
            started,
        } = self;

        let status = child
            .wait()
            .await
            .map_err(|e| Error::Io(std::io::Error::other(format!("ffmpeg wait: {e}"))))?;
        let tail = stderr_task.await.unwrap_or_default();

        Ok(FfmpegOutcome {
            status,
            duration_secs: started.elapsed().as_secs_f64(),
            stderr_tail: tail.join(),
        })
    }
}
