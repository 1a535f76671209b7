use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempPath;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::{GeneratedVideo, SamplingParams, VideoGenerator};
use crate::conditioning::ConditioningImage;
use crate::config::BackendConfig;

/// Lines of stderr kept for error reports
const STDERR_TAIL_LINES: usize = 20;

/// Runs an external inference program once per generation.
///
/// The program receives `--mode t2v|i2v|v2v --prompt <text> --steps <n>
/// --guidance <f> --seed <n>`, then `--image <png>` or `--video <mp4>
/// --strength <f>` for conditioned modes, and finally `--output <mp4>`.
/// It must write a single MP4 to the output path and exit with status 0.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandGenerator {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let program = config
            .command
            .clone()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| anyhow!("Inference command not configured"))?;

        Ok(Self {
            program,
            args: config.command_args.clone(),
            timeout: config.timeout_seconds.map(Duration::from_secs),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, mode: &str, prompt: &str, params: &SamplingParams) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--mode").arg(mode)
            .arg("--prompt").arg(prompt)
            .arg("--steps").arg(params.num_inference_steps.to_string())
            .arg("--guidance").arg(params.guidance_scale.to_string())
            .arg("--seed").arg(params.seed.to_string());
        cmd
    }

    fn staging_file(suffix: &str) -> Result<TempPath> {
        let file = tempfile::Builder::new()
            .prefix("cogstudio_gen_")
            .suffix(suffix)
            .tempfile()
            .context("Cannot create staging file")?;
        Ok(file.into_temp_path())
    }

    async fn run(&self, mut cmd: Command) -> Result<Vec<GeneratedVideo>> {
        let output = Self::staging_file(".mp4")?;
        cmd.arg("--output").arg(&*output);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Executing command: {:?}", cmd);
        let start_time = std::time::Instant::now();

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("{} stderr not captured", self.program))?;

        let program = self.program.clone();
        let execution = async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

            while let Some(line) = lines.next_line().await? {
                debug!("{}: {}", program, line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }

            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, tail))
        };

        let (status, tail) = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, execution)
                .await
                .map_err(|_| anyhow!("{} timed out after {}s", self.program, limit.as_secs()))??,
            None => execution.await?,
        };

        if !status.success() {
            let details: Vec<String> = tail.into_iter().collect();
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.program,
                status,
                details.join("\n").trim()
            ));
        }

        let size = tokio::fs::metadata(&output).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(anyhow!("{} produced no video", self.program));
        }

        info!(
            "✅ {} finished in {:.1}s ({:.1} MB)",
            self.program,
            start_time.elapsed().as_secs_f64(),
            size as f64 / 1_000_000.0
        );

        Ok(vec![GeneratedVideo::Staged(output)])
    }
}

#[async_trait]
impl VideoGenerator for CommandGenerator {
    async fn text_to_video(&self, prompt: &str, params: &SamplingParams) -> Result<Vec<GeneratedVideo>> {
        self.run(self.command("t2v", prompt, params)).await
    }

    async fn image_to_video(
        &self,
        prompt: &str,
        image: &ConditioningImage,
        params: &SamplingParams,
    ) -> Result<Vec<GeneratedVideo>> {
        let image_path = Self::staging_file(".png")?;
        tokio::fs::write(&image_path, image.to_png()?)
            .await
            .context("Cannot stage conditioning image")?;

        let mut cmd = self.command("i2v", prompt, params);
        cmd.arg("--image").arg(&*image_path);
        self.run(cmd).await
    }

    async fn video_to_video(
        &self,
        prompt: &str,
        video: &Path,
        strength: f32,
        params: &SamplingParams,
    ) -> Result<Vec<GeneratedVideo>> {
        let mut cmd = self.command("v2v", prompt, params);
        cmd.arg("--video").arg(video)
            .arg("--strength").arg(strength.to_string());
        self.run(cmd).await
    }

    fn backend_name(&self) -> &str {
        "command"
    }
}
