use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::info;

use crate::config::Config;
use crate::generator::{create_generator, VideoGenerator};
use crate::video::{FfmpegToolkit, MediaToolkit};

/// Everything the dispatcher needs to run inference.
///
/// Built once at startup, owned by a single `GenerationDispatcher` for the
/// life of the process and dropped at shutdown; it is never rebuilt while
/// requests are being served. The dispatcher only invokes inference through
/// it and never mutates model state.
pub struct InferenceContext {
    generator: Box<dyn VideoGenerator>,
    toolkit: Arc<dyn MediaToolkit>,
    gate: Semaphore,
}

impl InferenceContext {
    pub fn new(
        generator: Box<dyn VideoGenerator>,
        toolkit: Arc<dyn MediaToolkit>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            generator,
            toolkit,
            gate: Semaphore::new(max_concurrent.max(1)),
        }
    }

    /// Build the configured generator and the ffmpeg toolkit
    pub fn from_config(config: &Config) -> Result<Self> {
        let generator = create_generator(&config.backend)?;
        info!(
            "🔧 Inference context ready: {} backend, {} concurrent generation(s)",
            generator.backend_name(),
            config.generation.max_concurrent
        );

        Ok(Self::new(
            generator,
            Arc::new(FfmpegToolkit::new(&config.normalize)),
            config.generation.max_concurrent,
        ))
    }

    pub fn generator(&self) -> &dyn VideoGenerator {
        self.generator.as_ref()
    }

    pub fn toolkit(&self) -> Arc<dyn MediaToolkit> {
        Arc::clone(&self.toolkit)
    }

    /// Wait for a generation slot; hold the permit for the whole capability call
    pub async fn acquire_slot(&self) -> Result<SemaphorePermit<'_>> {
        self.gate
            .acquire()
            .await
            .map_err(|_| anyhow!("Inference context is shutting down"))
    }

    pub fn available_slots(&self) -> usize {
        self.gate.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendKind, ConfigBuilder};

    #[tokio::test]
    async fn test_slots_are_exclusive() {
        let config = ConfigBuilder::new().with_command("cogvideo-infer").build();
        let context = InferenceContext::from_config(&config).unwrap();
        assert_eq!(context.available_slots(), 1);

        let permit = context.acquire_slot().await.unwrap();
        assert_eq!(context.available_slots(), 0);
        drop(permit);
        assert_eq!(context.available_slots(), 1);
    }

    #[test]
    fn test_from_config_requires_backend_settings() {
        let mut config = Config::default();
        config.backend.kind = BackendKind::Remote;
        config.backend.endpoint = None;
        assert!(InferenceContext::from_config(&config).is_err());
    }
}
