//! F5-TTS voice cloning via the `f5-tts_infer-cli` subprocess
//!
//! Each synthesis run is one CLI invocation into a scratch output directory.
//! The reference audio/text pair selects the cloned voice.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::SynthesisConfig;
use crate::error::PipelineError;
use crate::stages::Synthesizer;

const CLI_NAME: &str = "f5-tts_infer-cli";
/// The CLI always writes this filename into its output directory.
const CLI_OUTPUT_FILE: &str = "infer_cli_out.wav";

#[derive(Debug)]
pub struct F5Tts {
    model: String,
    vocoder_name: String,
    ckpt_file: String,
    vocab_file: String,
    speed: f32,
    ref_audio: PathBuf,
    ref_text: String,
    timeout: Duration,
}

/// `which`-style PATH lookup.
fn cli_on_path(name: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(name).is_file())
        })
        .unwrap_or(false)
}

impl F5Tts {
    pub fn from_config(config: &SynthesisConfig) -> Result<Self> {
        // The CLI degrades badly with an empty reference transcript.
        if config.ref_text.trim().is_empty() {
            return Err(anyhow!("ref_text is required for synthesis"));
        }
        if !cli_on_path(CLI_NAME) {
            return Err(anyhow!("'{}' not found on PATH", CLI_NAME));
        }
        let ref_audio = PathBuf::from(&config.ref_audio);
        if !ref_audio.is_file() {
            return Err(anyhow!(
                "reference audio not found: {}",
                ref_audio.display()
            ));
        }
        info!(
            "F5-TTS CLI ready, model={} vocoder={}",
            config.model, config.vocoder_name
        );
        Ok(Self {
            model: config.model.clone(),
            vocoder_name: config.vocoder_name.clone(),
            ckpt_file: config.ckpt_file.clone(),
            vocab_file: config.vocab_file.clone(),
            speed: config.speed,
            ref_audio,
            ref_text: config.ref_text.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    fn build_command(&self, gen_text: &str, output_dir: &Path) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(CLI_NAME);
        cmd.arg("--model").arg(&self.model)
            .arg("--ref_audio").arg(&self.ref_audio)
            .arg("--ref_text").arg(&self.ref_text)
            .arg("--gen_text").arg(gen_text)
            .arg("--speed").arg(self.speed.to_string())
            .arg("--vocoder_name").arg(&self.vocoder_name);
        if !self.ckpt_file.is_empty() {
            cmd.arg("--ckpt_file").arg(&self.ckpt_file);
        }
        if !self.vocab_file.is_empty() {
            cmd.arg("--vocab_file").arg(&self.vocab_file);
        }
        cmd.arg("--output_dir").arg(output_dir);
        cmd
    }

    async fn run_cli(&self, text: &str) -> Result<Vec<u8>> {
        let scratch = tempfile::tempdir().context("Failed to create output dir")?;

        let mut cmd = self.build_command(text, scratch.path());
        debug!("F5-TTS CLI: {:?}", cmd.as_std());

        let child = cmd
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .context("Failed to spawn f5-tts_infer-cli")?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("Synthesis timeout ({}s)", self.timeout.as_secs()))?
            .context("Failed to wait for f5-tts_infer-cli")?;

        if !output.status.success() {
            return Err(anyhow!(
                "f5-tts_infer-cli failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        let wav_path = scratch.path().join(CLI_OUTPUT_FILE);
        let bytes = tokio::fs::read(&wav_path)
            .await
            .with_context(|| format!("CLI produced no output at {}", wav_path.display()))?;

        info!("Synthesized {} bytes of audio", bytes.len());
        Ok(bytes)
    }
}

#[async_trait]
impl Synthesizer for F5Tts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, PipelineError> {
        if text.trim().is_empty() {
            return Err(PipelineError::Synthesis("empty text".into()));
        }
        self.run_cli(text)
            .await
            .map_err(|e| PipelineError::Synthesis(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ref_text_is_a_load_error() {
        let config = SynthesisConfig {
            ref_text: String::new(),
            ..SynthesisConfig::default()
        };
        let err = F5Tts::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("ref_text"));
    }

    #[test]
    fn path_lookup_finds_common_binaries() {
        // `sh` exists on any unix PATH; a random name does not.
        assert!(cli_on_path("sh"));
        assert!(!cli_on_path("definitely-not-a-real-binary-name"));
    }
}
