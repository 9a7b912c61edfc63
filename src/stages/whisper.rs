//! Whisper STT via a local helper subprocess
//!
//! Converts f32 samples to WAV, passes via base64 on stdin to the helper
//! script, and parses the JSON result. A failed transcription is reported
//! as-is; there is no automatic retry.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use crate::audio;
use crate::config::WhisperConfig;
use crate::error::PipelineError;
use crate::stages::Transcriber;

pub struct WhisperStt {
    /// Whisper model size (tiny, base, small, medium, large-v3)
    model: String,
    /// Path to the whisper helper Python script
    script_path: String,
    python_bin: String,
    timeout: Duration,
}

impl WhisperStt {
    pub fn from_config(config: &WhisperConfig) -> Result<Self> {
        if !std::path::Path::new(&config.script_path).exists() {
            return Err(anyhow!(
                "whisper helper script not found: {}",
                config.script_path
            ));
        }
        Ok(Self {
            model: config.model.clone(),
            script_path: config.script_path.clone(),
            python_bin: config.python_bin.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    async fn run_whisper(&self, audio_b64: &str) -> Result<String> {
        use tokio::io::AsyncWriteExt;

        debug!("Running whisper: b64 len={}, model={}", audio_b64.len(), self.model);

        let mut child = tokio::process::Command::new(&self.python_bin)
            .arg(&self.script_path)
            .arg("-") // read from stdin
            .arg(&self.model)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .context("Failed to spawn whisper process")?;

        let mut stdin = child.stdin.take().ok_or_else(|| anyhow!("No stdin"))?;
        let b64_owned = audio_b64.to_string();
        tokio::spawn(async move {
            let _ = stdin.write_all(b64_owned.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("Transcription timeout ({}s)", self.timeout.as_secs()))?
            .context("Failed to wait for whisper")?;

        if !output.status.success() {
            return Err(anyhow!(
                "whisper error: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        let result: serde_json::Value = serde_json::from_slice(&output.stdout)
            .context("Failed to parse transcription result")?;

        if let Some(error) = result.get("error").and_then(|e| e.as_str()) {
            if !error.is_empty() {
                return Err(anyhow!("Transcription error: {}", error));
            }
        }

        let text = result
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string();

        info!("Transcribed: \"{}\"", text);
        Ok(text)
    }
}

#[async_trait]
impl Transcriber for WhisperStt {
    async fn transcribe(&self, samples: &[f32], sample_rate: u32)
        -> Result<String, PipelineError>
    {
        if samples.is_empty() {
            return Ok(String::new());
        }

        debug!(
            "Transcribing {} samples ({:.1}s of audio)",
            samples.len(),
            samples.len() as f64 / sample_rate as f64
        );

        let wav_bytes = audio::wav_bytes(samples, sample_rate)
            .map_err(|e| PipelineError::Transcription(e.to_string()))?;
        let audio_b64 = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            &wav_bytes,
        );

        self.run_whisper(&audio_b64)
            .await
            .map_err(|e| PipelineError::Transcription(e.to_string()))
    }
}
