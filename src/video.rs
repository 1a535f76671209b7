use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempPath;
use tracing::{debug, info};

use crate::config::NormalizeConfig;
use crate::error::{GenerationError, Result};

/// Largest width the model accepts without resampling
pub const TARGET_MAX_WIDTH: u32 = 720;
/// Largest height the model accepts without resampling
pub const TARGET_MAX_HEIGHT: u32 = 480;

/// Video information extracted from stream metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Frame rate exactly as declared by the container, e.g. "30000/1001"
    pub frame_rate: String,
    pub duration: Duration,
    pub codec: String,
}

impl VideoInfo {
    pub fn fits_within(&self, max_width: u32, max_height: u32) -> bool {
        self.width <= max_width && self.height <= max_height
    }
}

// ffprobe `-print_format json -show_format -show_streams` output

#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    pub format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub codec_name: Option<String>,
    pub codec_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub r_frame_rate: Option<String>,
    pub avg_frame_rate: Option<String>,
    #[serde(default)]
    pub side_data_list: Vec<FfprobeSideData>,
    pub tags: Option<FfprobeStreamTags>,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeSideData {
    pub side_data_type: Option<String>,
    /// Display matrix rotation in degrees
    pub rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeStreamTags {
    /// Legacy rotation tag written by older muxers
    pub rotate: Option<String>,
}

impl FfprobeStream {
    /// Display rotation in degrees, normalized to [0, 360)
    pub fn rotation(&self) -> u32 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|side| side.rotation)
            .or_else(|| {
                self.tags
                    .as_ref()
                    .and_then(|t| t.rotate.as_deref())
                    .and_then(|r| r.trim().parse::<f64>().ok())
            })
            .unwrap_or(0.0);

        (degrees.round() as i64).rem_euclid(360) as u32
    }
}

#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
}

impl FfprobeOutput {
    /// Build `VideoInfo` from the first video stream
    pub fn into_video_info(self, path: &Path) -> Result<VideoInfo> {
        let stream = self
            .streams
            .into_iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .ok_or_else(|| GenerationError::read(format!("No video stream in {}", path.display())))?;

        let (coded_width, coded_height) = match (stream.width, stream.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(GenerationError::read(format!(
                    "Missing frame dimensions in {}",
                    path.display()
                )))
            }
        };

        // ffmpeg applies the display rotation before any filter runs, so
        // geometry is expressed in displayed dimensions
        let rotation = stream.rotation();
        let (width, height) = if rotation % 180 == 90 {
            (coded_height, coded_width)
        } else {
            (coded_width, coded_height)
        };
        if rotation != 0 {
            debug!(
                "{} is rotated {} degrees, displayed as {}x{}",
                path.display(),
                rotation,
                width,
                height
            );
        }

        // r_frame_rate is "0/0" for some variable-rate containers
        let (frame_rate, fps) = [stream.r_frame_rate, stream.avg_frame_rate]
            .into_iter()
            .flatten()
            .find_map(|raw| parse_frame_rate(&raw).map(|fps| (raw, fps)))
            .ok_or_else(|| GenerationError::read(format!("Missing frame rate in {}", path.display())))?;

        let duration_seconds: f64 = self
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.parse().ok())
            .unwrap_or(0.0);

        Ok(VideoInfo {
            path: path.to_path_buf(),
            width,
            height,
            fps,
            frame_rate,
            duration: Duration::from_secs_f64(duration_seconds.max(0.0)),
            codec: stream.codec_name.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

/// Parse "num/den" or a plain number; `None` for zero or malformed rates
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    let fps = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.trim().parse().ok()?,
    };

    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Crop rectangle in source pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropWindow {
    /// Largest centered window of the target aspect ratio inside `width`x`height`.
    ///
    /// Sources wider than the target keep their full height and lose columns
    /// evenly on both sides; everything else keeps full width and loses rows.
    /// Dimensions must be non-zero.
    pub fn centered(width: u32, height: u32, target_width: u32, target_height: u32) -> Self {
        let target_ratio = target_width as f64 / target_height as f64;
        let source_ratio = width as f64 / height as f64;

        if source_ratio > target_ratio {
            let new_width = ((height as f64 * target_ratio) as u32).clamp(1, width);
            Self {
                x: (width - new_width) / 2,
                y: 0,
                width: new_width,
                height,
            }
        } else {
            let new_height = ((width as f64 / target_ratio) as u32).clamp(1, height);
            Self {
                x: 0,
                y: (height - new_height) / 2,
                width,
                height: new_height,
            }
        }
    }

    /// FFmpeg filter graph: per-frame crop followed by a fixed-filter resize
    pub fn filter_graph(&self, target_width: u32, target_height: u32, scale_flags: &str) -> String {
        format!(
            "crop={}:{}:{}:{},scale={}:{}:flags={}",
            self.width, self.height, self.x, self.y, target_width, target_height, scale_flags
        )
    }
}

/// Media toolkit used to inspect and resample videos
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Read stream metadata
    async fn probe(&self, path: &Path) -> Result<VideoInfo>;

    /// Crop every frame of `source` to `window`, resize to `width`x`height`
    /// and write an MP4 at the source frame rate to `output`
    async fn crop_resize(
        &self,
        source: &VideoInfo,
        window: CropWindow,
        width: u32,
        height: u32,
        output: &Path,
    ) -> Result<()>;
}

/// `MediaToolkit` backed by the ffmpeg/ffprobe command line tools
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    ffmpeg: String,
    ffprobe: String,
    codec: String,
    scale_flags: String,
}

impl FfmpegToolkit {
    pub fn new(config: &NormalizeConfig) -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            codec: config.codec.clone(),
            scale_flags: config.scale_flags.clone(),
        }
    }

    /// Use specific ffmpeg/ffprobe executables instead of the ones on `PATH`
    pub fn with_binaries(mut self, ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self.ffprobe = ffprobe.into();
        self
    }

    /// Check whether both binaries can be executed
    pub async fn is_available(&self) -> bool {
        for bin in [&self.ffmpeg, &self.ffprobe] {
            let status = tokio::process::Command::new(bin)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if !matches!(status, Ok(s) if s.success()) {
                return false;
            }
        }
        true
    }
}

impl Default for FfmpegToolkit {
    fn default() -> Self {
        Self::new(&NormalizeConfig::default())
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe(&self, path: &Path) -> Result<VideoInfo> {
        if !path.exists() {
            return Err(GenerationError::read(format!(
                "Video file not found: {}",
                path.display()
            )));
        }

        let output = tokio::process::Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .output()
            .await
            .map_err(|e| GenerationError::read(format!("Cannot run {}: {}", self.ffprobe, e)))?;

        if !output.status.success() {
            return Err(GenerationError::read(format!(
                "ffprobe failed for {} (exit code {:?})",
                path.display(),
                output.status.code()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let probe: FfprobeOutput = serde_json::from_str(&stdout).map_err(|e| {
            GenerationError::read(format!("Unreadable ffprobe output for {}: {}", path.display(), e))
        })?;

        let info = probe.into_video_info(path)?;
        info!(
            "📹 Analyzed video: {} ({}x{}, {:.2}fps, {:.1}s)",
            path.display(),
            info.width,
            info.height,
            info.fps,
            info.duration.as_secs_f64()
        );
        Ok(info)
    }

    async fn crop_resize(
        &self,
        source: &VideoInfo,
        window: CropWindow,
        width: u32,
        height: u32,
        output: &Path,
    ) -> Result<()> {
        let filter = window.filter_graph(width, height, &self.scale_flags);
        debug!("Resampling {} with filter {}", source.path.display(), filter);

        let result = tokio::process::Command::new(&self.ffmpeg)
            .args(["-y", "-v", "error", "-i"])
            .arg(&source.path)
            .args([
                "-vf", filter.as_str(),
                "-r", source.frame_rate.as_str(),
                "-an", // model input is video-only
                "-c:v", self.codec.as_str(),
                "-q:v", "2",
                "-pix_fmt", "yuv420p",
                "-f", "mp4",
            ])
            .arg(output)
            .output()
            .await
            .map_err(|e| GenerationError::read(format!("Cannot run {}: {}", self.ffmpeg, e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(GenerationError::read(format!(
                "ffmpeg could not resample {}: {}",
                source.path.display(),
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// Result of normalizing an input video
#[derive(Debug)]
pub enum NormalizedVideo {
    /// Input already fits; the original file is used as-is
    Unchanged(VideoInfo),
    /// Input was cropped and resized into a temporary file, removed on drop
    Resized {
        path: TempPath,
        source: VideoInfo,
        window: CropWindow,
    },
}

impl NormalizedVideo {
    pub fn path(&self) -> &Path {
        match self {
            NormalizedVideo::Unchanged(info) => info.path.as_path(),
            NormalizedVideo::Resized { path, .. } => &**path,
        }
    }

    pub fn is_resized(&self) -> bool {
        matches!(self, NormalizedVideo::Resized { .. })
    }
}

/// Brings arbitrary input geometry into the model's supported envelope
#[derive(Clone)]
pub struct VideoNormalizer {
    toolkit: Arc<dyn MediaToolkit>,
    max_width: u32,
    max_height: u32,
    temp_dir: Option<PathBuf>,
}

impl VideoNormalizer {
    pub fn new(toolkit: Arc<dyn MediaToolkit>, config: &NormalizeConfig) -> Self {
        Self {
            toolkit,
            max_width: config.max_width,
            max_height: config.max_height,
            temp_dir: config.temp_dir.clone(),
        }
    }

    pub fn target(&self) -> (u32, u32) {
        (self.max_width, self.max_height)
    }

    /// Return the video unchanged when it fits, otherwise a center-cropped,
    /// resized copy at exactly the target resolution
    pub async fn normalize(&self, video: &Path) -> Result<NormalizedVideo> {
        let info = self.toolkit.probe(video).await?;

        if info.fits_within(self.max_width, self.max_height) {
            debug!(
                "Video {}x{} fits {}x{}, using as-is",
                info.width, info.height, self.max_width, self.max_height
            );
            return Ok(NormalizedVideo::Unchanged(info));
        }

        let window = CropWindow::centered(info.width, info.height, self.max_width, self.max_height);
        info!(
            "✂️  Normalizing {} from {}x{}: crop {}x{}+{}+{}, resize to {}x{}",
            video.display(),
            info.width,
            info.height,
            window.width,
            window.height,
            window.x,
            window.y,
            self.max_width,
            self.max_height
        );

        let temp = self.temp_file()?;
        self.toolkit
            .crop_resize(&info, window, self.max_width, self.max_height, &temp)
            .await?;

        Ok(NormalizedVideo::Resized {
            path: temp,
            source: info,
            window,
        })
    }

    fn temp_file(&self) -> Result<TempPath> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("cogstudio_").suffix(".mp4");
        let file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file.into_temp_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Toolkit stub reporting fixed metadata and recording resample calls
    struct StubToolkit {
        width: u32,
        height: u32,
        fail_resample: bool,
        resampled: Mutex<Vec<(CropWindow, PathBuf)>>,
    }

    impl StubToolkit {
        fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                fail_resample: false,
                resampled: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MediaToolkit for StubToolkit {
        async fn probe(&self, path: &Path) -> Result<VideoInfo> {
            Ok(VideoInfo {
                path: path.to_path_buf(),
                width: self.width,
                height: self.height,
                fps: 24.0,
                frame_rate: "24/1".to_string(),
                duration: Duration::from_secs(2),
                codec: "h264".to_string(),
            })
        }

        async fn crop_resize(
            &self,
            _source: &VideoInfo,
            window: CropWindow,
            _width: u32,
            _height: u32,
            output: &Path,
        ) -> Result<()> {
            self.resampled
                .lock()
                .unwrap()
                .push((window, output.to_path_buf()));
            if self.fail_resample {
                return Err(GenerationError::read("corrupt frame"));
            }
            Ok(())
        }
    }

    fn normalizer(toolkit: Arc<StubToolkit>, temp_dir: &Path) -> VideoNormalizer {
        let config = NormalizeConfig {
            temp_dir: Some(temp_dir.to_path_buf()),
            ..NormalizeConfig::default()
        };
        VideoNormalizer::new(toolkit, &config)
    }

    #[test]
    fn test_crop_window_wide_source() {
        let window = CropWindow::centered(1280, 480, TARGET_MAX_WIDTH, TARGET_MAX_HEIGHT);
        assert_eq!(
            window,
            CropWindow {
                x: 280,
                y: 0,
                width: 720,
                height: 480
            }
        );
    }

    #[test]
    fn test_crop_window_tall_source() {
        let window = CropWindow::centered(1080, 1920, TARGET_MAX_WIDTH, TARGET_MAX_HEIGHT);
        assert_eq!(window.x, 0);
        assert_eq!(window.width, 1080);
        assert_eq!(window.height, 720);
        assert_eq!(window.y, 600);
    }

    #[test]
    fn test_crop_window_exact_ratio_keeps_frame() {
        let window = CropWindow::centered(1440, 960, TARGET_MAX_WIDTH, TARGET_MAX_HEIGHT);
        assert_eq!(
            window,
            CropWindow {
                x: 0,
                y: 0,
                width: 1440,
                height: 960
            }
        );
    }

    #[test]
    fn test_crop_window_full_hd() {
        // 16:9 is wider than 3:2
        let window = CropWindow::centered(1920, 1080, TARGET_MAX_WIDTH, TARGET_MAX_HEIGHT);
        assert_eq!(window.width, 1620);
        assert_eq!(window.height, 1080);
        assert_eq!(window.x, 150);
        assert_eq!(window.y, 0);
    }

    #[test]
    fn test_filter_graph() {
        let window = CropWindow::centered(1280, 480, 720, 480);
        assert_eq!(
            window.filter_graph(720, 480, "bilinear"),
            "crop=720:480:280:0,scale=720:480:flags=bilinear"
        );
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn test_ffprobe_output_parsing() {
        let json = r#"{
            "streams": [
                {"codec_type": "audio", "codec_name": "aac"},
                {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
                 "r_frame_rate": "0/0", "avg_frame_rate": "24000/1001"}
            ],
            "format": {"duration": "4.5"}
        }"#;
        let probe: FfprobeOutput = serde_json::from_str(json).unwrap();
        let info = probe.into_video_info(Path::new("clip.mov")).unwrap();

        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert_eq!(info.frame_rate, "24000/1001");
        assert_eq!(info.codec, "h264");
        assert_eq!(info.duration, Duration::from_secs_f64(4.5));
    }

    #[test]
    fn test_ffprobe_display_matrix_rotation_swaps_dimensions() {
        let json = r#"{
            "streams": [
                {"codec_type": "video", "codec_name": "hevc", "width": 1920, "height": 1080,
                 "r_frame_rate": "30/1",
                 "side_data_list": [{"side_data_type": "Display Matrix",
                                     "displaymatrix": "...", "rotation": -90}]}
            ],
            "format": {"duration": "3.0"}
        }"#;
        let probe: FfprobeOutput = serde_json::from_str(json).unwrap();
        let info = probe.into_video_info(Path::new("portrait.mov")).unwrap();

        assert_eq!((info.width, info.height), (1080, 1920));

        // the crop now fits the frames ffmpeg actually decodes
        let window = CropWindow::centered(info.width, info.height, TARGET_MAX_WIDTH, TARGET_MAX_HEIGHT);
        assert_eq!(
            window,
            CropWindow {
                x: 0,
                y: 600,
                width: 1080,
                height: 720
            }
        );
    }

    #[test]
    fn test_ffprobe_rotate_tag() {
        let json = r#"{
            "streams": [
                {"codec_type": "video", "width": 1280, "height": 720,
                 "r_frame_rate": "25/1", "tags": {"rotate": "270", "language": "und"}}
            ]
        }"#;
        let probe: FfprobeOutput = serde_json::from_str(json).unwrap();
        let info = probe.into_video_info(Path::new("old_phone.mp4")).unwrap();
        assert_eq!((info.width, info.height), (720, 1280));

        let json = r#"{
            "streams": [
                {"codec_type": "video", "width": 1280, "height": 720,
                 "r_frame_rate": "25/1", "side_data_list": [{"rotation": 180}]}
            ]
        }"#;
        let probe: FfprobeOutput = serde_json::from_str(json).unwrap();
        let info = probe.into_video_info(Path::new("upside_down.mp4")).unwrap();
        assert_eq!((info.width, info.height), (1280, 720));
    }

    #[test]
    fn test_ffprobe_output_without_video_stream() {
        let json = r#"{"streams": [{"codec_type": "audio"}], "format": {}}"#;
        let probe: FfprobeOutput = serde_json::from_str(json).unwrap();
        let err = probe.into_video_info(Path::new("song.m4a")).unwrap_err();
        assert!(matches!(err, GenerationError::Read(_)));
    }

    #[tokio::test]
    async fn test_fitting_video_passes_through() {
        let scratch = TempDir::new().unwrap();
        let toolkit = Arc::new(StubToolkit::new(720, 480));
        let normalizer = normalizer(toolkit.clone(), scratch.path());

        let input = Path::new("/videos/small.mp4");
        let normalized = normalizer.normalize(input).await.unwrap();

        assert!(!normalized.is_resized());
        assert_eq!(normalized.path(), input);
        assert!(toolkit.resampled.lock().unwrap().is_empty());
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_video_is_resampled_to_temp_file() {
        let scratch = TempDir::new().unwrap();
        let toolkit = Arc::new(StubToolkit::new(1280, 480));
        let normalizer = normalizer(toolkit.clone(), scratch.path());

        let normalized = normalizer.normalize(Path::new("/videos/wide.mp4")).await.unwrap();
        let temp_path = normalized.path().to_path_buf();

        assert!(normalized.is_resized());
        assert!(temp_path.starts_with(scratch.path()));
        assert!(temp_path.exists());

        let calls = toolkit.resampled.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.x, 280);
        assert_eq!(calls[0].1, temp_path);

        drop(normalized);
        assert!(!temp_path.exists());
    }

    #[tokio::test]
    async fn test_failed_resample_removes_temp_file() {
        let scratch = TempDir::new().unwrap();
        let mut stub = StubToolkit::new(640, 960);
        stub.fail_resample = true;
        let toolkit = Arc::new(stub);
        let normalizer = normalizer(toolkit.clone(), scratch.path());

        let err = normalizer.normalize(Path::new("/videos/tall.mp4")).await.unwrap_err();
        assert!(matches!(err, GenerationError::Read(_)));

        let calls = toolkit.resampled.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].1.exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error() {
        let toolkit = FfmpegToolkit::default();
        let err = toolkit
            .probe(Path::new("/definitely/not/here.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Read(_)));
    }
}
