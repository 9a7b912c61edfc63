//! Shared types used across modules
//!
//! This module contains types that are used by multiple modules
//! to avoid circular dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single exchange unit in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Role of a turn's speaker
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Convert to OpenAI-style role string
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "User"),
            Role::Assistant => write!(f, "Assistant"),
        }
    }
}

/// One of the three heavy model stages a pipeline mode may enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Transcriber,
    Generator,
    Synthesizer,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::Transcriber => write!(f, "transcriber"),
            StageKind::Generator => write!(f, "generator"),
            StageKind::Synthesizer => write!(f, "synthesizer"),
        }
    }
}

/// Operating mode of the pipeline.
///
/// Each variant carries a fixed subset of enabled stages; the set never
/// changes for the lifetime of a turn. Switching modes is only valid
/// between turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Audio in, audio out: transcribe + generate + synthesize
    SpeechToSpeech,
    /// Text in, audio out: generate + synthesize
    TextToSpeech,
    /// Text in, text out: generate only
    TextOnly,
}

impl PipelineMode {
    pub const ALL: [PipelineMode; 3] = [
        PipelineMode::SpeechToSpeech,
        PipelineMode::TextToSpeech,
        PipelineMode::TextOnly,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PipelineMode::SpeechToSpeech => "speech_to_speech",
            PipelineMode::TextToSpeech => "text_to_speech",
            PipelineMode::TextOnly => "text_only",
        }
    }

    /// The fixed stage set this mode enables.
    pub fn stages(&self) -> &'static [StageKind] {
        match self {
            PipelineMode::SpeechToSpeech => &[
                StageKind::Transcriber,
                StageKind::Generator,
                StageKind::Synthesizer,
            ],
            PipelineMode::TextToSpeech => &[StageKind::Generator, StageKind::Synthesizer],
            PipelineMode::TextOnly => &[StageKind::Generator],
        }
    }

    pub fn requires(&self, kind: StageKind) -> bool {
        self.stages().contains(&kind)
    }

    /// Whether audio capture + transcription are part of this mode.
    pub fn has_capture(&self) -> bool {
        self.requires(StageKind::Transcriber)
    }

    /// Whether the assistant reply is synthesized to audio.
    pub fn has_synthesis(&self) -> bool {
        self.requires(StageKind::Synthesizer)
    }
}

impl std::fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for PipelineMode {
    type Err = anyhow::Error;

    /// Resolve a pipeline mode from a case-insensitive string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        PipelineMode::ALL
            .into_iter()
            .find(|m| m.name() == normalized)
            .ok_or_else(|| {
                let valid: Vec<&str> = PipelineMode::ALL.iter().map(|m| m.name()).collect();
                anyhow::anyhow!(
                    "Unknown pipeline mode '{}'. Choose from: {}",
                    s,
                    valid.join(", ")
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_stage_sets() {
        assert_eq!(PipelineMode::SpeechToSpeech.stages().len(), 3);
        assert!(!PipelineMode::TextToSpeech.has_capture());
        assert!(PipelineMode::TextToSpeech.has_synthesis());
        assert!(!PipelineMode::TextOnly.has_synthesis());
        assert!(PipelineMode::TextOnly.requires(StageKind::Generator));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(
            "Speech_To_Speech".parse::<PipelineMode>().unwrap(),
            PipelineMode::SpeechToSpeech
        );
        assert_eq!(
            " text_only ".parse::<PipelineMode>().unwrap(),
            PipelineMode::TextOnly
        );
        let err = "llm_only".parse::<PipelineMode>().unwrap_err().to_string();
        assert!(err.contains("text_only"));
    }

    #[test]
    fn test_role_api_strings() {
        assert_eq!(Role::User.as_api_str(), "user");
        assert_eq!(Role::Assistant.as_api_str(), "assistant");
    }
}
