use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the CogStudio generation front-end
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Input video geometry normalization
    pub normalize: NormalizeConfig,

    /// Request defaults and capability limits
    pub generation: GenerationDefaults,

    /// Output location and naming
    pub output: OutputConfig,

    /// Generation backend selection
    pub backend: BackendConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Largest width accepted without resampling
    pub max_width: u32,

    /// Largest height accepted without resampling
    pub max_height: u32,

    /// FFmpeg encoder for normalized videos
    pub codec: String,

    /// FFmpeg scaler flags (single fixed resampling filter)
    pub scale_flags: String,

    /// Directory for normalized temporary videos (OS temp dir when unset)
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationDefaults {
    /// How strongly a conditioning video constrains the output
    pub strength: f32,

    /// Number of denoising steps
    pub num_inference_steps: u32,

    /// Classifier-free guidance scale
    pub guidance_scale: f32,

    /// Seed, -1 for random
    pub seed: i64,

    /// Side length of the square canvas conditioning images are resized to
    pub image_size: u32,

    /// Maximum concurrent capability invocations
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory generated videos are written to
    pub dir: PathBuf,

    /// Filename prefix for generated videos
    pub file_prefix: String,

    /// Write a JSON metadata record next to every video
    pub save_metadata: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum BackendKind {
    Command,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Which generation backend to use
    pub kind: BackendKind,

    /// Inference program for the command backend
    pub command: Option<String>,

    /// Fixed leading arguments for the inference program
    pub command_args: Vec<String>,

    /// Base URL of the remote inference server
    pub endpoint: Option<String>,

    /// Bearer token for the remote inference server
    pub api_key: Option<String>,

    /// Optional per-invocation timeout in seconds (no timeout when unset)
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// tracing-subscriber env filter directive
    pub level: String,
}

impl Config {
    /// Load configuration from the first readable file in the search path
    pub fn load() -> Result<Self> {
        let config_paths = [
            "cogstudio.toml",
            "config/cogstudio.toml",
            "/etc/cogstudio/config.toml",
        ];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str::<Config>(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config.with_env_overrides());
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Err(anyhow!("No configuration file found"))
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read config {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&config_str)
            .map_err(|e| anyhow!("Invalid config {}: {}", path.display(), e))?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config.with_env_overrides())
    }

    /// Defaults with environment variable overrides applied
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(output_dir) = std::env::var("COGSTUDIO_OUTPUT_DIR") {
            self.output.dir = PathBuf::from(output_dir);
        }

        if let Ok(kind) = std::env::var("COGSTUDIO_BACKEND") {
            match kind.to_lowercase().as_str() {
                "command" => self.backend.kind = BackendKind::Command,
                "remote" => self.backend.kind = BackendKind::Remote,
                other => tracing::warn!("Ignoring unknown COGSTUDIO_BACKEND value: {}", other),
            }
        }

        if let Ok(endpoint) = std::env::var("COGSTUDIO_ENDPOINT") {
            self.backend.endpoint = Some(endpoint);
        }

        if let Ok(command) = std::env::var("COGSTUDIO_COMMAND") {
            self.backend.command = Some(command);
        }

        if let Ok(log_level) = std::env::var("COGSTUDIO_LOG_LEVEL") {
            self.logging.level = log_level;
        }

        self
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.normalize.max_width == 0 || self.normalize.max_height == 0 {
            return Err(anyhow!("normalize target dimensions must be greater than 0"));
        }

        if self.generation.max_concurrent == 0 {
            return Err(anyhow!("max_concurrent must be greater than 0"));
        }

        if self.generation.image_size == 0 {
            return Err(anyhow!("image_size must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.generation.strength) {
            return Err(anyhow!("default strength must be within [0, 1]"));
        }

        if self.generation.num_inference_steps == 0 {
            return Err(anyhow!("default num_inference_steps must be greater than 0"));
        }

        if !(self.generation.guidance_scale.is_finite() && self.generation.guidance_scale > 0.0) {
            return Err(anyhow!("default guidance_scale must be positive"));
        }

        if self.generation.seed < -1 {
            return Err(anyhow!("default seed must be -1 or non-negative"));
        }

        match self.backend.kind {
            BackendKind::Command => {
                if self.backend.command.as_deref().map_or(true, str::is_empty) {
                    return Err(anyhow!("command backend requires backend.command"));
                }
            }
            BackendKind::Remote => {
                if self.backend.endpoint.as_deref().map_or(true, str::is_empty) {
                    return Err(anyhow!("remote backend requires backend.endpoint"));
                }
            }
        }

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "CogStudio Configuration:\n\
            - Backend: {:?}\n\
            - Output Directory: {}\n\
            - Normalize Target: {}x{} ({}, {})\n\
            - Defaults: strength {}, steps {}, guidance {}, seed {}\n\
            - Max Concurrent Generations: {}",
            self.backend.kind,
            self.output.dir.display(),
            self.normalize.max_width,
            self.normalize.max_height,
            self.normalize.codec,
            self.normalize.scale_flags,
            self.generation.strength,
            self.generation.num_inference_steps,
            self.generation.guidance_scale,
            self.generation.seed,
            self.generation.max_concurrent,
        )
    }
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            max_width: 720,
            max_height: 480,
            codec: "mpeg4".to_string(),
            scale_flags: "bilinear".to_string(),
            temp_dir: None,
        }
    }
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            strength: 0.7,
            num_inference_steps: 50,
            guidance_scale: 7.5,
            seed: -1,
            image_size: 512,
            max_concurrent: 1,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("outputs"),
            file_prefix: "cogvideo".to_string(),
            save_metadata: false,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Command,
            command: Some("cogvideo-infer".to_string()),
            command_args: Vec::new(),
            endpoint: None,
            api_key: None,
            timeout_seconds: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            normalize: NormalizeConfig::default(),
            generation: GenerationDefaults::default(),
            output: OutputConfig::default(),
            backend: BackendConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "cogstudio=info,warn".to_string(),
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.config.output.dir = dir;
        self
    }

    pub fn with_command(mut self, program: impl Into<String>) -> Self {
        self.config.backend.kind = BackendKind::Command;
        self.config.backend.command = Some(program.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.backend.kind = BackendKind::Remote;
        self.config.backend.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.config.generation.max_concurrent = max_concurrent;
        self
    }

    pub fn save_metadata(mut self, enable: bool) -> Self {
        self.config.output.save_metadata = enable;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.normalize.max_width, 720);
        assert_eq!(config.normalize.max_height, 480);
        assert_eq!(config.generation.seed, -1);
        assert_eq!(config.generation.num_inference_steps, 50);
        assert_eq!(config.generation.max_concurrent, 1);
        assert_eq!(config.output.dir, PathBuf::from("outputs"));
        assert!(!config.output.save_metadata);
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .with_endpoint("http://localhost:7860")
            .with_max_concurrent(2)
            .save_metadata(true)
            .build();

        assert_eq!(config.backend.kind, BackendKind::Remote);
        assert_eq!(config.backend.endpoint.as_deref(), Some("http://localhost:7860"));
        assert_eq!(config.generation.max_concurrent, 2);
        assert!(config.output.save_metadata);
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.generation.max_concurrent = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backend.kind = BackendKind::Remote;
        config.backend.endpoint = None;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.generation.strength = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cogstudio.toml");

        let config = ConfigBuilder::new()
            .with_command("cogvideo-infer")
            .with_output_dir(PathBuf::from("renders"))
            .build();
        config.save(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.backend.command.as_deref(), Some("cogvideo-infer"));
        assert_eq!(loaded.output.file_prefix, "cogvideo");
        assert_eq!(loaded.normalize.codec, "mpeg4");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(
            &path,
            "[backend]\nkind = \"Remote\"\nendpoint = \"http://gpu-box:7860\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.backend.kind, BackendKind::Remote);
        assert_eq!(config.normalize.max_width, 720);
        assert_eq!(config.generation.guidance_scale, 7.5);
    }

    #[test]
    fn test_load_from_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "normalize = 3").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
