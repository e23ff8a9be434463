//! Application configuration.
//!
//! Loaded from a TOML file, with environment variables overriding the
//! store credentials and ffmpeg path so deployments can keep secrets out of
//! the config file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use chunk_store::StoreConfig;

use crate::error::{Error, Result};

/// Tile geometry of the composite canvas. Each participant's video is
/// scaled to one tile; tiles sit left to right, so the canvas is
/// `N * width` by `height`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TileGeometry {
    #[serde(default = "default_tile_width")]
    pub width: u32,
    #[serde(default = "default_tile_height")]
    pub height: u32,
}

fn default_tile_width() -> u32 {
    320
}

fn default_tile_height() -> u32 {
    240
}

impl Default for TileGeometry {
    fn default() -> Self {
        Self {
            width: default_tile_width(),
            height: default_tile_height(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote chunk/object store connection.
    pub store: StoreConfig,

    /// Directory-service base URL (participants lookup, recording refs).
    pub directory_base: String,

    /// ffmpeg binary. `FFMPEG_PATH` overrides.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Scratch directory for transient per-run files. Defaults to the
    /// system temp dir.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    #[serde(default)]
    pub tile: TileGeometry,

    /// Concurrent reconstruction limit; each permit is one spawned ffmpeg.
    #[serde(default = "default_max_transcodes")]
    pub max_transcodes: usize,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_max_transcodes() -> usize {
    2
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        let mut config: Self = toml::from_str(&raw)
            .map_err(|e| Error::config(format!("invalid config {}: {e}", path.display())))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides, applied after file parsing.
    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("FFMPEG_PATH") {
            self.ffmpeg_path = path;
        }
        if let Ok(key) = std::env::var("STORE_API_KEY") {
            self.store.api_key = key;
        }
        if let Ok(secret) = std::env::var("STORE_API_SECRET") {
            self.store.api_secret = secret;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.directory_base.is_empty() {
            return Err(Error::config("directory_base must be set"));
        }
        if self.max_transcodes == 0 {
            return Err(Error::config("max_transcodes must be at least 1"));
        }
        if self.tile.width == 0 || self.tile.height == 0 {
            return Err(Error::config("tile geometry must be non-zero"));
        }
        Ok(())
    }

    /// Scratch root, created on demand elsewhere.
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
