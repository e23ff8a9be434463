//! Side-by-side composition of reconstructed streams.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::TileGeometry;
use crate::error::{Error, Result};
use crate::pipeline::ffmpeg;

/// Composites N reconstructed files into one tiled, audio-mixed output.
///
/// Video tiles sit left to right in input order at `(i * width, 0)` on a
/// `N * width` by `height` canvas. Audio tracks are summed with
/// `normalize=0`: each track contributes at its native level, so more or
/// louder inputs produce louder output. That is the accepted trade-off for
/// keeping tracks sample-synchronized without a loudness pass.
pub struct Compositor {
    ffmpeg_path: String,
    tile: TileGeometry,
}

impl Compositor {
    pub fn new(ffmpeg_path: impl Into<String>, tile: TileGeometry) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            tile,
        }
    }

    /// Build the `-filter_complex` graph for `n` inputs.
    fn filter_complex(&self, n: usize) -> String {
        let scale: Vec<String> = (0..n)
            .map(|i| format!("[{i}:v]scale={}:{}[v{i}]", self.tile.width, self.tile.height))
            .collect();
        let layout: Vec<String> = (0..n)
            .map(|i| format!("{}_0", i as u32 * self.tile.width))
            .collect();
        let stack_inputs: String = (0..n).map(|i| format!("[v{i}]")).collect();
        let audio_inputs: String = (0..n).map(|i| format!("[{i}:a]")).collect();

        format!(
            "{};{}xstack=inputs={n}:layout={}[v];{}amix=inputs={n}:normalize=0:duration=longest[a]",
            scale.join(";"),
            stack_inputs,
            layout.join("|"),
            audio_inputs,
        )
    }

    fn build_args(&self, inputs: &[PathBuf], output: &Path) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostats".to_string(),
        ];
        for input in inputs {
            args.push("-i".to_string());
            args.push(input.to_string_lossy().into_owned());
        }
        args.extend([
            "-filter_complex".to_string(),
            self.filter_complex(inputs.len()),
            "-map".to_string(),
            "[v]".to_string(),
            "-map".to_string(),
            "[a]".to_string(),
            "-c:v".to_string(),
            "libvpx-vp9".to_string(),
            "-c:a".to_string(),
            "libopus".to_string(),
            output.to_string_lossy().into_owned(),
        ]);
        args
    }

    /// Compose `inputs` into `output`.
    ///
    /// Exactly one input passes through unchanged, no transcoding cost.
    /// With two or more, any unreadable input aborts the whole composite;
    /// a partial composite is never returned. Inputs and any partial output
    /// are left for the run's scratch teardown, which removes them on both
    /// success and failure.
    pub async fn compose(&self, inputs: &[PathBuf], output: &Path) -> Result<PathBuf> {
        if inputs.is_empty() {
            return Err(Error::compose("no input files to composite"));
        }

        for input in inputs {
            if !tokio::fs::try_exists(input).await.unwrap_or(false) {
                return Err(Error::compose(format!(
                    "input file missing or unreadable: {}",
                    input.display()
                )));
            }
        }

        if inputs.len() == 1 {
            debug!(input = %inputs[0].display(), "single input, passing through unchanged");
            return Ok(inputs[0].clone());
        }

        let args = self.build_args(inputs, output);
        let process = ffmpeg::spawn(&self.ffmpeg_path, &args, false)?;
        let outcome = process.wait().await?;

        if !outcome.status.success() {
            return Err(Error::compose(format!(
                "ffmpeg exit {}: {}",
                outcome.exit_code(),
                outcome.stderr_tail
            )));
        }

        info!(
            inputs = inputs.len(),
            canvas_width = inputs.len() as u32 * self.tile.width,
            duration_secs = outcome.duration_secs,
            output = %output.display(),
            "composite complete"
        );
        Ok(output.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compositor() -> Compositor {
        Compositor::new("ffmpeg", TileGeometry::default())
    }

    #[test]
    fn filter_graph_tiles_left_to_right() {
        let filter = compositor().filter_complex(3);
        assert!(filter.contains("[0:v]scale=320:240[v0]"));
        assert!(filter.contains("[2:v]scale=320:240[v2]"));
        assert!(filter.contains("xstack=inputs=3:layout=0_0|320_0|640_0[v]"));
    }

    #[test]
    fn audio_mix_is_unnormalized_and_runs_to_longest_input() {
        let filter = compositor().filter_complex(2);
        assert!(filter.contains("[0:a][1:a]amix=inputs=2:normalize=0:duration=longest[a]"));
    }

    #[test]
    fn build_args_map_stacked_streams_and_fixed_codecs() {
        let inputs = vec![PathBuf::from("/s/a.webm"), PathBuf::from("/s/b.webm")];
        let args = compositor().build_args(&inputs, Path::new("/s/out.webm"));
        let joined = args.join(" ");
        assert!(joined.contains("-i /s/a.webm -i /s/b.webm"));
        assert!(joined.contains("-map [v] -map [a]"));
        assert!(joined.contains("-c:v libvpx-vp9 -c:a libopus"));
        assert_eq!(args.last().unwrap(), "/s/out.webm");
    }

    #[test]
    fn canvas_width_scales_with_input_count() {
        let tile = TileGeometry {
            width: 400,
            height: 300,
        };
        let filter = Compositor::new("ffmpeg", tile).filter_complex(4);
        assert!(filter.contains("layout=0_0|400_0|800_0|1200_0"));
    }

    #[tokio::test]
    async fn empty_inputs_are_rejected() {
        let err = compositor()
            .compose(&[], Path::new("/tmp/out.webm"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ComposeFailed { .. }));
    }

    #[tokio::test]
    async fn missing_input_aborts_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.webm");
        tokio::fs::write(&present, b"x").await.unwrap();
        let missing = dir.path().join("b.webm");

        let err = compositor()
            .compose(&[present, missing], &dir.path().join("out.webm"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ComposeFailed { ref reason } if reason.contains("b.webm")));
    }

    #[tokio::test]
    async fn single_input_passes_through_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("only.webm");
        tokio::fs::write(&input, b"original bytes").await.unwrap();

        let out = compositor()
            .compose(std::slice::from_ref(&input), &dir.path().join("out.webm"))
            .await
            .unwrap();

        assert_eq!(out, input);
        assert_eq!(tokio::fs::read(&out).await.unwrap(), b"original bytes");
    }
}
