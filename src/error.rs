//! Pipeline error taxonomy
//!
//! Stage-local failures never corrupt conversation state; only a fully
//! committed turn is ever visible to the next prompt context. There are no
//! silent retries — every failure is surfaced to the caller of `run_turn`.

use crate::types::StageKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Audio source unavailable. Fatal to speech modes, irrelevant to text-only.
    #[error("audio capture unavailable: {0}")]
    Capture(String),

    /// Transcription failed; the turn is aborted and conversation state is unchanged.
    #[error("transcription failed: {0}")]
    Transcription(String),

    /// Generation failed; no partial assistant turn is committed.
    #[error("generation failed: {0}")]
    Generation(String),

    /// Generation was interrupted mid-stream; the partial reply is discarded.
    #[error("generation cancelled")]
    Cancelled,

    /// Synthesis failed. Non-fatal: the text side of the turn is already committed.
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    /// A heavy model stage failed to load. Fatal for that stage only; the
    /// other stages of the current mode remain usable.
    #[error("failed to load {stage}: {reason}")]
    ResourceLoad { stage: StageKind, reason: String },

    /// The requested operation needs a stage the active mode does not enable.
    #[error("{stage} is not available in '{mode}' mode")]
    StageUnavailable { stage: StageKind, mode: &'static str },
}

impl PipelineError {
    /// True for failures that leave the committed turn intact (audio-side only).
    pub fn is_non_fatal(&self) -> bool {
        matches!(self, PipelineError::Synthesis(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PipelineMode;

    #[test]
    fn test_error_display() {
        let err = PipelineError::StageUnavailable {
            stage: StageKind::Transcriber,
            mode: PipelineMode::TextOnly.name(),
        };
        assert_eq!(
            err.to_string(),
            "transcriber is not available in 'text_only' mode"
        );
    }

    #[test]
    fn test_synthesis_is_non_fatal() {
        assert!(PipelineError::Synthesis("no voice".into()).is_non_fatal());
        assert!(!PipelineError::Cancelled.is_non_fatal());
    }
}
