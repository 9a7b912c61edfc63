//! VoxPersona - persona voice assistant pipeline
//!
//! A mode-gated voice pipeline:
//! - Energy-based utterance segmentation over continuous microphone capture
//! - Whisper STT via a local helper subprocess
//! - Streaming chat completions against an OpenAI-compatible endpoint
//! - F5-TTS voice cloning for spoken replies
//!
//! Three modes select which stages are active: `speech_to_speech`,
//! `text_to_speech`, and `text_only`. Model resources are acquired lazily on
//! first use and released deterministically on mode switch or shutdown.

pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod stages;
pub mod types;

pub use config::Config;
pub use error::PipelineError;
pub use pipeline::{CancelToken, Pipeline, TurnEvent, TurnInput, TurnOutcome};
pub use types::{PipelineMode, Role, Turn};
