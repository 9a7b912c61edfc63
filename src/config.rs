//! Configuration management
//!
//! Layered TOML config with serde defaults, loaded from the platform config
//! directory. Environment variables override file values so a deployment can
//! be retuned without editing the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

use crate::audio::segmenter::SegmenterConfig;
use crate::types::PipelineMode;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    /// Utterance segmentation thresholds
    #[serde(default)]
    pub vad: SegmenterConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub whisper: WhisperConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Active mode: speech_to_speech, text_to_speech, or text_only
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Maximum turns retained as generation context
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_mode() -> String {
    "text_only".to_string()
}

fn default_max_history() -> usize {
    10
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            max_history: default_max_history(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Capture block size in milliseconds
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,
    /// Input device name; `None` picks the system default
    #[serde(default)]
    pub input_device: Option<String>,
    /// Directory captured utterances are saved into
    #[serde(default = "default_utterance_dir")]
    pub utterance_dir: String,
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_block_ms() -> u64 {
    30
}

fn default_utterance_dir() -> String {
    "./outputs".to_string()
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            block_ms: default_block_ms(),
            input_device: None,
            utterance_dir: default_utterance_dir(),
        }
    }
}

/// Settings for the OpenAI-compatible chat endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    /// Persona prompt prepended as the system message; empty disables it
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f32,
}

fn default_base_url() -> String {
    "http://localhost:8000/v1".to_string()
}

fn default_chat_model() -> String {
    "Qwen/Qwen2.5-7B-Instruct".to_string()
}

fn default_max_new_tokens() -> u32 {
    256
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.9
}

fn default_repetition_penalty() -> f32 {
    1.2
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            model: default_chat_model(),
            system_prompt: String::new(),
            max_new_tokens: default_max_new_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            repetition_penalty: default_repetition_penalty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperConfig {
    /// Whisper model size (tiny, base, small, medium, large-v3)
    #[serde(default = "default_whisper_model")]
    pub model: String,
    #[serde(default = "default_whisper_script")]
    pub script_path: String,
    #[serde(default = "default_python_bin")]
    pub python_bin: String,
    #[serde(default = "default_whisper_timeout")]
    pub timeout_secs: u64,
}

fn default_whisper_model() -> String {
    "large-v3-turbo".to_string()
}

fn default_whisper_script() -> String {
    "scripts/whisper_helper.py".to_string()
}

fn default_python_bin() -> String {
    "python3".to_string()
}

fn default_whisper_timeout() -> u64 {
    60
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model: default_whisper_model(),
            script_path: default_whisper_script(),
            python_bin: default_python_bin(),
            timeout_secs: default_whisper_timeout(),
        }
    }
}

/// F5-TTS voice cloning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    #[serde(default = "default_f5_model")]
    pub model: String,
    #[serde(default = "default_vocoder")]
    pub vocoder_name: String,
    #[serde(default)]
    pub ckpt_file: String,
    #[serde(default)]
    pub vocab_file: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Reference voice sample the output clones
    #[serde(default = "default_ref_audio")]
    pub ref_audio: String,
    /// Transcript of the reference sample
    #[serde(default)]
    pub ref_text: String,
    /// Where the last synthesized reply is saved
    #[serde(default = "default_output_path")]
    pub output_path: String,
    #[serde(default = "default_synthesis_timeout")]
    pub timeout_secs: u64,
}

fn default_f5_model() -> String {
    "F5TTS_Base".to_string()
}

fn default_vocoder() -> String {
    "vocos".to_string()
}

fn default_speed() -> f32 {
    1.0
}

fn default_ref_audio() -> String {
    "./vocals.wav".to_string()
}

fn default_output_path() -> String {
    "./outputs/tts_response.wav".to_string()
}

fn default_synthesis_timeout() -> u64 {
    120
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            model: default_f5_model(),
            vocoder_name: default_vocoder(),
            ckpt_file: String::new(),
            vocab_file: String::new(),
            speed: default_speed(),
            ref_audio: default_ref_audio(),
            ref_text: String::new(),
            output_path: default_output_path(),
            timeout_secs: default_synthesis_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating a default one if missing, then
    /// apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            toml::from_str(&contents).context("Failed to parse config file")?
        } else {
            let config = Config::default();
            config.save()?;
            config
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path
            .parent()
            .context("Config path has no parent")?;

        std::fs::create_dir_all(parent).context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Parse the configured pipeline mode, falling back to text_only when the
    /// string is unrecognized.
    pub fn mode(&self) -> PipelineMode {
        match PipelineMode::from_str(&self.pipeline.mode) {
            Ok(mode) => mode,
            Err(e) => {
                warn!("{}, defaulting to text_only", e);
                PipelineMode::TextOnly
            }
        }
    }

    /// Environment variables override file values.
    pub fn apply_env(&mut self) {
        override_env("PIPELINE_MODE", &mut self.pipeline.mode);
        override_env_parsed("MAX_HISTORY", &mut self.pipeline.max_history);

        override_env_parsed("VAD_ENERGY_THRESHOLD", &mut self.vad.energy_threshold);
        override_env_parsed("VAD_SILENCE_DURATION_MS", &mut self.vad.silence_duration_ms);
        override_env_parsed("VAD_MIN_SPEECH_MS", &mut self.vad.min_speech_ms);
        override_env_parsed("VAD_MAX_SPEECH_S", &mut self.vad.max_speech_s);

        override_env_parsed("MAX_NEW_TOKENS", &mut self.generation.max_new_tokens);
        override_env_parsed("TEMPERATURE", &mut self.generation.temperature);
        override_env_parsed("TOP_P", &mut self.generation.top_p);
        override_env_parsed("REPETITION_PENALTY", &mut self.generation.repetition_penalty);
        override_env("QWEN_MODEL_ID", &mut self.generation.model);

        override_env("WHISPER_MODEL_ID", &mut self.whisper.model);

        override_env("F5_MODEL", &mut self.synthesis.model);
        override_env("F5_VOCODER", &mut self.synthesis.vocoder_name);
        override_env("F5_CKPT_FILE", &mut self.synthesis.ckpt_file);
        override_env("F5_VOCAB_FILE", &mut self.synthesis.vocab_file);
        override_env("F5_REF_AUDIO", &mut self.synthesis.ref_audio);
        override_env("F5_REF_TEXT", &mut self.synthesis.ref_text);
        override_env("F5_OUTPUT_PATH", &mut self.synthesis.output_path);
        override_env_parsed("F5_SPEED", &mut self.synthesis.speed);
    }

    pub fn validate(&self) -> Result<()> {
        self.vad.validate()?;
        anyhow::ensure!(self.pipeline.max_history > 0, "max_history must be positive");
        anyhow::ensure!(self.audio.sample_rate > 0, "sample_rate must be positive");
        anyhow::ensure!(self.audio.block_ms > 0, "block_ms must be positive");
        anyhow::ensure!(
            self.generation.max_new_tokens > 0,
            "max_new_tokens must be positive"
        );
        anyhow::ensure!(self.synthesis.speed > 0.0, "synthesis speed must be positive");
        Ok(())
    }
}

fn override_env(name: &str, target: &mut String) {
    if let Ok(value) = std::env::var(name) {
        if !value.is_empty() {
            *target = value;
        }
    }
}

fn override_env_parsed<T: FromStr>(name: &str, target: &mut T) {
    if let Ok(value) = std::env::var(name) {
        match value.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!("Ignoring unparsable {}={}", name, value),
        }
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "voxpersona", "voxpersona")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}
