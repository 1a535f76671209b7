pub mod command;
pub mod remote;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tempfile::TempPath;

use crate::conditioning::ConditioningImage;
use crate::config::{BackendConfig, BackendKind};

pub use command::CommandGenerator;
pub use remote::RemoteGenerator;

/// Sampling parameters shared by every generation mode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    /// Effective seed, never the random sentinel
    pub seed: u64,
}

/// A video produced by a generator
#[derive(Debug)]
pub enum GeneratedVideo {
    /// Encoded MP4 bytes held in memory
    Encoded(Vec<u8>),
    /// Encoded MP4 written by the backend to a scratch file, removed on drop
    Staged(TempPath),
}

impl GeneratedVideo {
    /// Write the encoded video to `dest`, returning the byte count
    pub async fn persist_to(&self, dest: &Path) -> std::io::Result<u64> {
        match self {
            GeneratedVideo::Encoded(bytes) => {
                tokio::fs::write(dest, bytes).await?;
                Ok(bytes.len() as u64)
            }
            GeneratedVideo::Staged(path) => tokio::fs::copy(path, dest).await,
        }
    }
}

/// Pretrained text/image/video-to-video generation capability.
///
/// Each call returns the collection of videos the model produced; callers
/// use the first. Implementations may assume at most one call in flight.
#[async_trait]
pub trait VideoGenerator: Send + Sync {
    async fn text_to_video(&self, prompt: &str, params: &SamplingParams) -> Result<Vec<GeneratedVideo>>;

    async fn image_to_video(
        &self,
        prompt: &str,
        image: &ConditioningImage,
        params: &SamplingParams,
    ) -> Result<Vec<GeneratedVideo>>;

    async fn video_to_video(
        &self,
        prompt: &str,
        video: &Path,
        strength: f32,
        params: &SamplingParams,
    ) -> Result<Vec<GeneratedVideo>>;

    fn backend_name(&self) -> &str;
}

/// Create generator instance based on configuration
pub fn create_generator(config: &BackendConfig) -> Result<Box<dyn VideoGenerator>> {
    match config.kind {
        BackendKind::Command => Ok(Box::new(CommandGenerator::new(config)?)),
        BackendKind::Remote => Ok(Box::new(RemoteGenerator::new(config)?)),
    }
}
