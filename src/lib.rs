//! CogStudio - Rust Implementation
//!
//! Front-end over a pretrained text/image/video-to-video diffusion model:
//! normalizes conditioning video geometry, picks the generation mode for each
//! request, resolves the seed and saves the produced video.

pub mod config;
pub mod error;
pub mod video;
pub mod conditioning;
pub mod generator;
pub mod context;
pub mod progress;
pub mod output;
pub mod dispatcher;

// Re-export main types for easy access
pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{GenerationError, Result};
pub use crate::video::{
    CropWindow, FfmpegToolkit, MediaToolkit, NormalizedVideo, VideoInfo, VideoNormalizer,
    TARGET_MAX_HEIGHT, TARGET_MAX_WIDTH,
};
pub use crate::conditioning::{load_conditioning_image, ConditioningImage};
pub use crate::generator::{create_generator, GeneratedVideo, SamplingParams, VideoGenerator};
pub use crate::context::InferenceContext;
pub use crate::progress::{LogProgress, Phase, ProgressObserver};
pub use crate::output::OutputStore;
pub use crate::dispatcher::{
    Conditioning, GenerationDispatcher, GenerationMode, GenerationOutcome, GenerationRequest,
    SeedChoice, RANDOM_SEED,
};
