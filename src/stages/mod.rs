//! Model stage interfaces and concrete adapters
//!
//! The pipeline only sees the three traits below; the adapters are thin
//! call-throughs to pre-trained models:
//! - `whisper`: Whisper STT via a local helper subprocess
//! - `chat`: streaming chat completions against an OpenAI-compatible endpoint
//! - `f5`: F5-TTS voice cloning via the `f5-tts_infer-cli` subprocess

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::PipelineError;
use crate::types::{StageKind, Turn};

pub mod chat;
pub mod f5;
pub mod whisper;

/// Ordered stream of generated text fragments. Strict FIFO: fragment N is
/// always observed before fragment N+1. A mid-stream failure arrives as an
/// `Err` item; end-of-reply closes the channel.
pub type FragmentStream = mpsc::Receiver<Result<String, PipelineError>>;

/// Takes a finite audio buffer, returns text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, samples: &[f32], sample_rate: u32)
        -> Result<String, PipelineError>;
}

/// Takes ordered conversation turns, produces a lazy sequence of text
/// fragments (finite, terminates on end-of-reply).
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, turns: &[Turn]) -> Result<FragmentStream, PipelineError>;
}

/// Takes text (plus the configured reference voice), returns audio bytes.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, PipelineError>;
}

/// Loads heavy model stages on demand. Loading may be slow.
///
/// The resource lifecycle manager is the only caller; it guarantees at most
/// one live handle per kind.
#[async_trait]
pub trait StageFactory: Send + Sync {
    async fn load_transcriber(&self) -> Result<Arc<dyn Transcriber>, PipelineError>;
    async fn load_generator(&self) -> Result<Arc<dyn Generator>, PipelineError>;
    async fn load_synthesizer(&self) -> Result<Arc<dyn Synthesizer>, PipelineError>;
}

/// Default factory: builds the whisper/chat/f5 adapters from config.
pub struct ModelStageFactory {
    config: Config,
}

impl ModelStageFactory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StageFactory for ModelStageFactory {
    async fn load_transcriber(&self) -> Result<Arc<dyn Transcriber>, PipelineError> {
        let stt = whisper::WhisperStt::from_config(&self.config.whisper).map_err(|e| {
            PipelineError::ResourceLoad {
                stage: StageKind::Transcriber,
                reason: e.to_string(),
            }
        })?;
        Ok(Arc::new(stt))
    }

    async fn load_generator(&self) -> Result<Arc<dyn Generator>, PipelineError> {
        Ok(Arc::new(chat::ChatClient::from_config(
            &self.config.generation,
        )))
    }

    async fn load_synthesizer(&self) -> Result<Arc<dyn Synthesizer>, PipelineError> {
        let tts = f5::F5Tts::from_config(&self.config.synthesis).map_err(|e| {
            PipelineError::ResourceLoad {
                stage: StageKind::Synthesizer,
                reason: e.to_string(),
            }
        })?;
        Ok(Arc::new(tts))
    }
}
