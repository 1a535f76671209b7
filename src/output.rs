use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::OutputConfig;
use crate::dispatcher::GenerationMode;
use crate::error::{GenerationError, Result};
use crate::generator::GeneratedVideo;

/// Collision suffixes tried before giving up on a timestamp
const MAX_DISAMBIGUATORS: u32 = 1000;

/// Record written next to a generated video when metadata is enabled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub prompt: String,
    pub mode: GenerationMode,
    pub seed: u64,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    pub strength: Option<f32>,
    pub conditioning: Option<PathBuf>,
    pub backend: String,
    pub created_at: DateTime<Local>,
}

/// Owns the output directory and names generated files
#[derive(Debug, Clone)]
pub struct OutputStore {
    dir: PathBuf,
    prefix: String,
    save_metadata: bool,
}

impl OutputStore {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            prefix: config.file_prefix.clone(),
            save_metadata: config.save_metadata,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<prefix>_<YYYYMMDD>_<HHMMSS>`
    pub fn base_name(&self, at: NaiveDateTime) -> String {
        format!("{}_{}", self.prefix, at.format("%Y%m%d_%H%M%S"))
    }

    /// Atomically claim a fresh `.mp4` path for `at`, appending `_1`, `_2`, ...
    /// when the plain timestamp name is already taken
    pub async fn reserve_path_at(&self, at: NaiveDateTime) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let base = self.base_name(at);

        for n in 0..MAX_DISAMBIGUATORS {
            let name = if n == 0 {
                format!("{}.mp4", base)
            } else {
                format!("{}_{}.mp4", base, n)
            };
            let candidate = self.dir.join(name);

            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await
            {
                Ok(_) => return Ok(candidate),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("Output name taken: {}", candidate.display());
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(GenerationError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("No free output name for {} in {}", base, self.dir.display()),
        )))
    }

    /// Write `video` under a fresh timestamped name in the output directory
    pub async fn persist(&self, video: &GeneratedVideo) -> Result<PathBuf> {
        let path = self.reserve_path_at(Local::now().naive_local()).await?;

        if let Err(e) = video.persist_to(&path).await {
            if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                warn!("Failed to remove partial output {}: {}", path.display(), cleanup);
            }
            return Err(e.into());
        }

        info!("💾 Video saved to: {}", path.display());
        Ok(path)
    }

    /// Write `<video>.json` when metadata is enabled
    pub async fn write_metadata(&self, video_path: &Path, record: &GenerationRecord) -> Result<Option<PathBuf>> {
        if !self.save_metadata {
            return Ok(None);
        }

        let json_path = video_path.with_extension("json");
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| GenerationError::Io(std::io::Error::new(ErrorKind::InvalidData, e)))?;
        tokio::fs::write(&json_path, json).await?;

        debug!("Metadata saved to: {}", json_path.display());
        Ok(Some(json_path))
    }
}
