use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::{GeneratedVideo, SamplingParams, VideoGenerator};
use crate::conditioning::ConditioningImage;
use crate::config::BackendConfig;

/// Generator backed by an HTTP inference server.
///
/// Every mode is a `POST {endpoint}/generate` multipart form with the fields
/// `mode`, `prompt`, `num_inference_steps`, `guidance_scale`, `seed`, plus an
/// `image` part or a `video` part and `strength` for conditioned modes. A 2xx
/// response body is the encoded MP4.
pub struct RemoteGenerator {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl RemoteGenerator {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| anyhow!("Remote inference endpoint not configured"))?;

        let mut builder = reqwest::Client::builder();
        if let Some(seconds) = config.timeout_seconds {
            builder = builder.timeout(Duration::from_secs(seconds));
        }

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client: builder.build()?,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn form(mode: &str, prompt: &str, params: &SamplingParams) -> Form {
        Form::new()
            .text("mode", mode.to_string())
            .text("prompt", prompt.to_string())
            .text("num_inference_steps", params.num_inference_steps.to_string())
            .text("guidance_scale", params.guidance_scale.to_string())
            .text("seed", params.seed.to_string())
    }

    async fn submit(&self, form: Form) -> Result<Vec<GeneratedVideo>> {
        let url = format!("{}/generate", self.endpoint);
        debug!("Sending generation request to {}", url);

        let mut request = self.client.post(&url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Inference server unreachable at {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Inference server error {}: {}", status, text.trim()));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(anyhow!("Inference server returned an empty video"));
        }

        info!("📥 Received {:.1} MB video from {}", bytes.len() as f64 / 1_000_000.0, self.endpoint);
        Ok(vec![GeneratedVideo::Encoded(bytes.to_vec())])
    }
}

/// MIME type for an uploaded video, from its extension
fn video_mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl VideoGenerator for RemoteGenerator {
    async fn text_to_video(&self, prompt: &str, params: &SamplingParams) -> Result<Vec<GeneratedVideo>> {
        self.submit(Self::form("t2v", prompt, params)).await
    }

    async fn image_to_video(
        &self,
        prompt: &str,
        image: &ConditioningImage,
        params: &SamplingParams,
    ) -> Result<Vec<GeneratedVideo>> {
        let part = Part::bytes(image.to_png()?)
            .file_name("image.png")
            .mime_str("image/png")?;
        let form = Self::form("i2v", prompt, params).part("image", part);
        self.submit(form).await
    }

    async fn video_to_video(
        &self,
        prompt: &str,
        video: &Path,
        strength: f32,
        params: &SamplingParams,
    ) -> Result<Vec<GeneratedVideo>> {
        let bytes = tokio::fs::read(video)
            .await
            .with_context(|| format!("Cannot read video {}", video.display()))?;
        let file_name = video
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video.mp4".to_string());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(video_mime_type(video))?;
        let form = Self::form("v2v", prompt, params)
            .text("strength", strength.to_string())
            .part("video", part);
        self.submit(form).await
    }

    fn backend_name(&self) -> &str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_mime_type_follows_extension() {
        assert_eq!(video_mime_type(Path::new("clip.mp4")), "video/mp4");
        assert_eq!(video_mime_type(Path::new("/phone/IMG_0042.MOV")), "video/quicktime");
        assert_eq!(video_mime_type(Path::new("loop.webm")), "video/webm");
        assert_eq!(video_mime_type(Path::new("no_extension")), "application/octet-stream");
    }
}
