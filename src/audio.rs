use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use uuid::Uuid;

/// Converts an uploaded audio file into something the speech-to-text service accepts.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, input: &Path) -> Result<PathBuf>;
}

/// Ensure the ffmpeg binary is runnable by invoking `<binary> -version`.
pub async fn ensure_ffmpeg_available(binary: &str) -> Result<()> {
    let status = Command::new(binary)
        .arg("-version")
        .kill_on_drop(true)
        .status()
        .await;
    match status {
        Ok(s) if s.success() => Ok(()),
        Ok(s) => Err(anyhow!("ffmpeg not available (exit status {})", s)),
        Err(e) => Err(anyhow!("ffmpeg not available: {}", e)),
    }
}

/// Duration of `input` in seconds, read with `ffprobe`.
pub async fn probe_duration(ffprobe: &str, input: &Path) -> Result<f64> {
    let output = Command::new(ffprobe)
        .args(["-v", "error", "-show_entries", "format=duration", "-of", "csv=p=0"])
        .arg(input)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("failed to spawn ffprobe for {}", input.display()))?;
    if !output.status.success() {
        return Err(anyhow!(
            "ffprobe exited with status {} for {}: {}",
            output.status,
            input.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    parse_duration(&String::from_utf8_lossy(&output.stdout))
}

fn parse_duration(raw: &str) -> Result<f64> {
    let value = raw.trim();
    let secs: f64 = value
        .parse()
        .with_context(|| format!("unexpected ffprobe duration '{}'", value))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(anyhow!("unexpected ffprobe duration '{}'", value));
    }
    Ok(secs)
}

/// ffmpeg subprocess producing 16 kHz mono PCM WAV, loudness-normalized and
/// denoised, next to the input file.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    binary: String,
}

impl Ffmpeg {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Output path for `input`: same directory, random stem, `.wav` extension.
    pub fn output_path(input: &Path) -> PathBuf {
        let dir = input.parent().unwrap_or_else(|| Path::new("."));
        dir.join(format!("{}.wav", Uuid::new_v4()))
    }

    pub fn args(input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            input.to_string_lossy().into_owned(),
            "-af".into(),
            "loudnorm=I=-16:TP=-1.5:LRA=11,afftdn=nf=-25".into(),
            "-acodec".into(),
            "pcm_s16le".into(),
            "-ar".into(),
            "16000".into(),
            "-ac".into(),
            "1".into(),
            output.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl Transcoder for Ffmpeg {
    async fn transcode(&self, input: &Path) -> Result<PathBuf> {
        if !tokio::fs::try_exists(input).await.unwrap_or(false) {
            return Err(anyhow!("audio file not found: {}", input.display()));
        }
        let output = Self::output_path(input);

        let result = Command::new(&self.binary)
            .args(Self::args(input, &output))
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn ffmpeg for {}", input.display()))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(anyhow!(
                "ffmpeg exited with status {} for {}: {}",
                result.status,
                input.display(),
                stderr.trim()
            ));
        }

        Ok(output)
    }
}
