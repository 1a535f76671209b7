use chrono::Local;
use futures::FutureExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::conditioning::load_conditioning_image;
use crate::config::{Config, GenerationDefaults};
use crate::context::InferenceContext;
use crate::error::{GenerationError, Result};
use crate::generator::{GeneratedVideo, SamplingParams};
use crate::output::{GenerationRecord, OutputStore};
use crate::progress::{Phase, ProgressObserver, ProgressReporter};
use crate::video::VideoNormalizer;

/// Seed value asking for a freshly drawn random seed
pub const RANDOM_SEED: i64 = -1;

/// Which generation capability serves a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationMode {
    Text,
    Image,
    Video,
}

/// Media steering the generation; at most one kind per request
#[derive(Debug, Clone, PartialEq)]
pub enum Conditioning {
    None,
    Image(PathBuf),
    Video(PathBuf),
}

impl Conditioning {
    pub fn mode(&self) -> GenerationMode {
        match self {
            Conditioning::None => GenerationMode::Text,
            Conditioning::Image(_) => GenerationMode::Image,
            Conditioning::Video(_) => GenerationMode::Video,
        }
    }

    pub fn source(&self) -> Option<&Path> {
        match self {
            Conditioning::None => None,
            Conditioning::Image(path) | Conditioning::Video(path) => Some(path.as_path()),
        }
    }
}

/// A single generation request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub conditioning: Conditioning,
    /// Only used in video mode
    pub strength: f32,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    /// `RANDOM_SEED` or a non-negative seed
    pub seed: i64,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self::with_defaults(prompt, &GenerationDefaults::default())
    }

    pub fn with_defaults(prompt: impl Into<String>, defaults: &GenerationDefaults) -> Self {
        Self {
            prompt: prompt.into(),
            conditioning: Conditioning::None,
            strength: defaults.strength,
            num_inference_steps: defaults.num_inference_steps,
            guidance_scale: defaults.guidance_scale,
            seed: defaults.seed,
        }
    }

    /// Condition on an image, unless a video was already supplied
    pub fn with_image(mut self, image: impl Into<PathBuf>) -> Self {
        let image = image.into();
        if matches!(self.conditioning, Conditioning::Video(_)) {
            warn!("Video input takes priority, ignoring image {}", image.display());
        } else {
            self.conditioning = Conditioning::Image(image);
        }
        self
    }

    /// Condition on a video; replaces any image
    pub fn with_video(mut self, video: impl Into<PathBuf>) -> Self {
        if let Conditioning::Image(image) = &self.conditioning {
            warn!("Video input takes priority, ignoring image {}", image.display());
        }
        self.conditioning = Conditioning::Video(video.into());
        self
    }

    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = strength;
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.num_inference_steps = steps;
        self
    }

    pub fn with_guidance_scale(mut self, guidance_scale: f32) -> Self {
        self.guidance_scale = guidance_scale;
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    pub fn mode(&self) -> GenerationMode {
        self.conditioning.mode()
    }

    /// Check prompt and numeric ranges
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(GenerationError::invalid("prompt must not be empty"));
        }

        if self.num_inference_steps == 0 {
            return Err(GenerationError::invalid("num_inference_steps must be at least 1"));
        }

        if !(self.guidance_scale.is_finite() && self.guidance_scale > 0.0) {
            return Err(GenerationError::invalid(format!(
                "guidance_scale must be positive, got {}",
                self.guidance_scale
            )));
        }

        if self.mode() == GenerationMode::Video && !(0.0..=1.0).contains(&self.strength) {
            return Err(GenerationError::invalid(format!(
                "strength must be within [0, 1], got {}",
                self.strength
            )));
        }

        Ok(())
    }
}

/// Seed requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedChoice {
    Random,
    Fixed(u64),
}

impl SeedChoice {
    pub fn from_raw(seed: i64) -> Result<Self> {
        match seed {
            RANDOM_SEED => Ok(SeedChoice::Random),
            s if s >= 0 => Ok(SeedChoice::Fixed(s as u64)),
            s => Err(GenerationError::invalid(format!(
                "seed must be {} or non-negative, got {}",
                RANDOM_SEED, s
            ))),
        }
    }

    /// Effective seed; random draws are uniform over [0, 2^32 - 1]
    pub fn resolve(self) -> u64 {
        match self {
            SeedChoice::Random => rand::rng().random::<u32>() as u64,
            SeedChoice::Fixed(seed) => seed,
        }
    }
}

/// Outcome of one generation call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GenerationOutcome {
    Succeeded {
        output: PathBuf,
        seed: u64,
    },
    Failed {
        message: String,
        /// Effective seed, absent only when the requested seed was malformed
        seed: Option<u64>,
    },
}

impl GenerationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, GenerationOutcome::Succeeded { .. })
    }

    pub fn output(&self) -> Option<&Path> {
        match self {
            GenerationOutcome::Succeeded { output, .. } => Some(output.as_path()),
            GenerationOutcome::Failed { .. } => None,
        }
    }

    pub fn seed(&self) -> Option<u64> {
        match self {
            GenerationOutcome::Succeeded { seed, .. } => Some(*seed),
            GenerationOutcome::Failed { seed, .. } => *seed,
        }
    }

    /// `Seed: <n>` on success, `Error: <message>` on failure
    pub fn info(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for GenerationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationOutcome::Succeeded { seed, .. } => write!(f, "Seed: {}", seed),
            GenerationOutcome::Failed { message, .. } => write!(f, "Error: {}", message),
        }
    }
}

/// Selects the generation mode for each request, runs it and saves the result.
///
/// Stateless between calls. Every failure is reported as
/// `GenerationOutcome::Failed`; nothing escapes `generate`.
pub struct GenerationDispatcher {
    context: InferenceContext,
    normalizer: VideoNormalizer,
    output: OutputStore,
    image_size: u32,
    progress: ProgressReporter,
}

impl GenerationDispatcher {
    pub fn new(context: InferenceContext, config: &Config) -> Self {
        let normalizer = VideoNormalizer::new(context.toolkit(), &config.normalize);
        Self {
            context,
            normalizer,
            output: OutputStore::new(&config.output),
            image_size: config.generation.image_size,
            progress: ProgressReporter::new(),
        }
    }

    pub fn with_progress(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.progress = self.progress.with_observer(observer);
        self
    }

    pub fn context(&self) -> &InferenceContext {
        &self.context
    }

    pub fn output_dir(&self) -> &Path {
        self.output.dir()
    }

    pub async fn generate(&self, request: &GenerationRequest) -> GenerationOutcome {
        let seed = match SeedChoice::from_raw(request.seed) {
            Ok(choice) => choice.resolve(),
            Err(e) => {
                error!("❌ Rejected request: {}", e);
                return GenerationOutcome::Failed {
                    message: e.to_string(),
                    seed: None,
                };
            }
        };

        let start_time = Instant::now();
        info!("🎬 Generating {:?} video with seed {}", request.mode(), seed);

        let result = match AssertUnwindSafe(self.run(request, seed)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(GenerationError::Capability(format!(
                "generation panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        match result {
            Ok(output) => {
                info!(
                    "🎉 Generation completed in {:.1}s: {}",
                    start_time.elapsed().as_secs_f64(),
                    output.display()
                );
                GenerationOutcome::Succeeded { output, seed }
            }
            Err(e) => {
                error!("❌ Error generating video: {}", e);
                GenerationOutcome::Failed {
                    message: e.to_string(),
                    seed: Some(seed),
                }
            }
        }
    }

    async fn run(&self, request: &GenerationRequest, seed: u64) -> Result<PathBuf> {
        self.progress.report(Phase::Preparing);
        request.validate()?;

        let mode = request.mode();
        let params = SamplingParams {
            num_inference_steps: request.num_inference_steps,
            guidance_scale: request.guidance_scale,
            seed,
        };
        let generator = self.context.generator();

        let videos = match &request.conditioning {
            Conditioning::Video(path) => {
                // temporary resample lives until the capability returns
                let normalized = self.normalizer.normalize(path).await?;
                self.progress.report(Phase::Generating(mode));
                self.invoke(generator.video_to_video(
                    &request.prompt,
                    normalized.path(),
                    request.strength,
                    &params,
                ))
                .await?
            }
            Conditioning::Image(path) => {
                let image = load_conditioning_image(path, self.image_size).await?;
                self.progress.report(Phase::Generating(mode));
                self.invoke(generator.image_to_video(&request.prompt, &image, &params))
                    .await?
            }
            Conditioning::None => {
                self.progress.report(Phase::Generating(mode));
                self.invoke(generator.text_to_video(&request.prompt, &params))
                    .await?
            }
        };

        self.progress.report(Phase::Saving);
        let first = videos
            .first()
            .ok_or_else(|| GenerationError::Capability("generator produced no video".to_string()))?;
        if videos.len() > 1 {
            debug!("Generator produced {} videos, keeping the first", videos.len());
        }

        let path = self.output.persist(first).await?;

        let record = GenerationRecord {
            prompt: request.prompt.clone(),
            mode,
            seed,
            num_inference_steps: request.num_inference_steps,
            guidance_scale: request.guidance_scale,
            strength: (mode == GenerationMode::Video).then_some(request.strength),
            conditioning: request.conditioning.source().map(Path::to_path_buf),
            backend: generator.backend_name().to_string(),
            created_at: Local::now(),
        };
        if let Err(e) = self.output.write_metadata(&path, &record).await {
            warn!("Failed to write metadata for {}: {}", path.display(), e);
        }

        self.progress.report(Phase::Done);
        Ok(path)
    }

    /// Run one capability call inside a generation slot, converting backend
    /// errors and panics to `Capability`
    async fn invoke<F>(&self, call: F) -> Result<Vec<GeneratedVideo>>
    where
        F: Future<Output = anyhow::Result<Vec<GeneratedVideo>>>,
    {
        let _slot = self
            .context
            .acquire_slot()
            .await
            .map_err(|e| GenerationError::capability(&e))?;

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(videos)) => Ok(videos),
            Ok(Err(e)) => Err(GenerationError::capability(&e)),
            Err(panic) => Err(GenerationError::Capability(format!(
                "generator panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_choice_from_raw() {
        assert_eq!(SeedChoice::from_raw(-1).unwrap(), SeedChoice::Random);
        assert_eq!(SeedChoice::from_raw(0).unwrap(), SeedChoice::Fixed(0));
        assert_eq!(SeedChoice::from_raw(42).unwrap(), SeedChoice::Fixed(42));
        assert!(matches!(
            SeedChoice::from_raw(-2),
            Err(GenerationError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_fixed_seed_resolves_to_itself() {
        assert_eq!(SeedChoice::Fixed(42).resolve(), 42);
        assert_eq!(SeedChoice::Fixed(u64::from(u32::MAX) + 7).resolve(), u64::from(u32::MAX) + 7);
    }

    #[test]
    fn test_random_seed_within_u32_range() {
        for _ in 0..1000 {
            assert!(SeedChoice::Random.resolve() <= u64::from(u32::MAX));
        }
    }

    #[test]
    fn test_video_takes_priority_over_image() {
        let request = GenerationRequest::new("a cat")
            .with_image("cat.png")
            .with_video("cat.mp4");
        assert_eq!(request.mode(), GenerationMode::Video);

        let request = GenerationRequest::new("a cat")
            .with_video("cat.mp4")
            .with_image("cat.png");
        assert_eq!(request.conditioning, Conditioning::Video(PathBuf::from("cat.mp4")));
    }

    #[test]
    fn test_request_defaults() {
        let request = GenerationRequest::new("a cat");
        assert_eq!(request.mode(), GenerationMode::Text);
        assert_eq!(request.strength, 0.7);
        assert_eq!(request.num_inference_steps, 50);
        assert_eq!(request.guidance_scale, 7.5);
        assert_eq!(request.seed, RANDOM_SEED);
    }

    #[test]
    fn test_request_validation() {
        assert!(GenerationRequest::new("a cat").validate().is_ok());
        assert!(GenerationRequest::new("   ").validate().is_err());
        assert!(GenerationRequest::new("a cat").with_steps(0).validate().is_err());
        assert!(GenerationRequest::new("a cat")
            .with_guidance_scale(0.0)
            .validate()
            .is_err());
        assert!(GenerationRequest::new("a cat")
            .with_guidance_scale(f32::NAN)
            .validate()
            .is_err());

        // strength only matters with a video
        assert!(GenerationRequest::new("a cat").with_strength(3.0).validate().is_ok());
        assert!(GenerationRequest::new("a cat")
            .with_video("cat.mp4")
            .with_strength(3.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_outcome_info_strings() {
        let ok = GenerationOutcome::Succeeded {
            output: PathBuf::from("outputs/cogvideo_20240309_120507.mp4"),
            seed: 42,
        };
        assert_eq!(ok.info(), "Seed: 42");
        assert!(ok.is_success());
        assert_eq!(ok.seed(), Some(42));

        let failed = GenerationOutcome::Failed {
            message: "Generation failed: out of memory".to_string(),
            seed: Some(7),
        };
        assert_eq!(failed.info(), "Error: Generation failed: out of memory");
        assert!(failed.output().is_none());
        assert_eq!(failed.seed(), Some(7));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(payload.as_ref()), "kaboom");
        let payload: Box<dyn Any + Send> = Box::new(3_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
