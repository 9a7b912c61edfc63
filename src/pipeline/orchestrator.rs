//! Pipeline orchestrator
//!
//! Drives one turn at a time through the stages the active mode enables:
//!
//! ```text
//! Utterance ──→ Transcriber ──→ text ─┐
//!                                     ├─→ Generator ──→ fragments ──→ reply ──→ Synthesizer ──→ audio
//! Text input ─────────────────────────┘        │
//!                                     ConversationHistory
//! ```
//!
//! Turns are strictly sequential: `run_turn` for turn N+1 cannot start
//! before turn N commits or aborts (enforced by `&mut self`). Stages not in
//! the active mode are never invoked and their resources never acquired.
//! Mode switches happen only between turns and release the resources of any
//! stage the new mode drops.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::audio::segmenter::Utterance;
use crate::config::Config;
use crate::error::PipelineError;
use crate::pipeline::history::ConversationHistory;
use crate::pipeline::resources::ResourceManager;
use crate::stages::StageFactory;
use crate::types::{PipelineMode, StageKind, Turn};

/// Input for one turn: captured audio in speech mode, literal text otherwise.
#[derive(Debug)]
pub enum TurnInput {
    Audio(Utterance),
    Text(String),
}

/// Output events of one turn, in the order they occur.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// Transcription of the captured utterance succeeded
    TranscriptReady(String),
    /// One streamed generation increment, strict FIFO
    TextFragment(String),
    /// Synthesized reply audio (WAV bytes)
    AudioReady(Vec<u8>),
}

/// What a completed turn produced.
#[derive(Debug)]
pub struct TurnOutcome {
    pub user_text: String,
    pub assistant_text: String,
    /// Synthesized reply, when the mode includes synthesis and it succeeded
    pub audio: Option<Vec<u8>>,
    /// Synthesis failure is surfaced here rather than as `Err`: the text
    /// side of the turn is already committed and is not rolled back.
    pub synthesis_error: Option<PipelineError>,
}

/// Explicit cancellation signal for an in-flight generation.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Request cancellation. Fragment production stops promptly and the
    /// partial reply is discarded.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                // Sender kept alive by this token; unreachable in practice.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// The mode-parameterized pipeline state machine. One per session.
pub struct Pipeline {
    mode: PipelineMode,
    history: ConversationHistory,
    resources: ResourceManager,
    events: mpsc::Sender<TurnEvent>,
    event_rx: Option<mpsc::Receiver<TurnEvent>>,
}

/// Buffered events per turn; emission never blocks the turn.
const EVENT_CHANNEL_CAPACITY: usize = 256;

impl Pipeline {
    pub fn new(config: &Config, factory: Arc<dyn StageFactory>) -> Self {
        let mode = config.mode();
        info!("Pipeline mode: {}", mode);
        let (events, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            mode,
            history: ConversationHistory::new(config.pipeline.max_history),
            resources: ResourceManager::new(factory),
            events,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event stream. Events for every subsequent turn are delivered
    /// here in the order they occur.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TurnEvent>> {
        self.event_rx.take()
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Switch mode between turns. Takes effect on the next `run_turn` call;
    /// resources of any stage the new mode drops are released immediately.
    pub fn set_mode(&mut self, mode: PipelineMode) {
        if mode == self.mode {
            return;
        }
        info!("Mode switch: {} -> {}", self.mode, mode);
        self.mode = mode;
        self.resources.retain_for(mode);
    }

    /// Whether a stage's resource is currently loaded (diagnostics).
    pub fn is_stage_loaded(&self, kind: StageKind) -> bool {
        self.resources.is_loaded(kind)
    }

    /// Run one turn through the stages the active mode enables.
    ///
    /// On success both the user turn and the complete assistant turn are
    /// committed to history. On transcription or generation failure, and on
    /// cancellation, history is exactly as it was before the turn began.
    pub async fn run_turn(
        &mut self,
        input: TurnInput,
        cancel: &CancelToken,
    ) -> Result<TurnOutcome, PipelineError> {
        let user_text = match input {
            TurnInput::Audio(utterance) => self.transcribe(utterance).await?,
            TurnInput::Text(text) => text,
        };

        let pending = Turn::user(user_text.clone());
        let prompt = self.history.prompt_with(&pending);
        let assistant_text = self.stream_reply(&prompt, cancel).await?;

        // Commit: only a fully generated reply ever reaches history.
        self.history.append(pending);
        self.history.append(Turn::assistant(assistant_text.clone()));
        debug!("Turn committed, history length {}", self.history.len());

        let (audio, synthesis_error) = if self.mode.has_synthesis() {
            match self.synthesize(&assistant_text).await {
                Ok(bytes) => (Some(bytes), None),
                Err(e) => {
                    // Text-side success is independent of audio-side success.
                    warn!("Synthesis failed, reply is text-only: {}", e);
                    (None, Some(e))
                }
            }
        } else {
            (None, None)
        };

        Ok(TurnOutcome {
            user_text,
            assistant_text,
            audio,
            synthesis_error,
        })
    }

    /// Release every loaded model resource. Called at session teardown; the
    /// `Drop` impl covers early exits.
    pub fn shutdown(&mut self) {
        info!("Pipeline shutdown, releasing resources");
        self.resources.release_all();
    }

    async fn transcribe(&mut self, utterance: Utterance) -> Result<String, PipelineError> {
        if !self.mode.has_capture() {
            return Err(PipelineError::StageUnavailable {
                stage: StageKind::Transcriber,
                mode: self.mode.name(),
            });
        }

        let transcriber = self.resources.transcriber().await?;
        let text = transcriber
            .transcribe(utterance.samples(), utterance.sample_rate())
            .await?;

        if text.trim().is_empty() {
            return Err(PipelineError::Transcription(
                "empty transcript (no speech recognized)".into(),
            ));
        }

        self.emit(TurnEvent::TranscriptReady(text.clone()));
        Ok(text)
    }

    /// Drain the generator's fragment stream in order, accumulating the full
    /// reply. Cancellation drops the stream (stopping production) and
    /// discards the partial reply.
    async fn stream_reply(
        &mut self,
        prompt: &[Turn],
        cancel: &CancelToken,
    ) -> Result<String, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let generator = self.resources.generator().await?;
        let mut fragments = generator.generate(prompt).await?;

        let mut reply = String::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Generation cancelled after {} chars", reply.len());
                    return Err(PipelineError::Cancelled);
                }
                fragment = fragments.recv() => match fragment {
                    Some(Ok(text)) => {
                        self.emit(TurnEvent::TextFragment(text.clone()));
                        reply.push_str(&text);
                    }
                    Some(Err(e)) => return Err(e),
                    None => break,
                },
            }
        }

        if reply.trim().is_empty() {
            return Err(PipelineError::Generation("model produced no output".into()));
        }
        Ok(reply)
    }

    async fn synthesize(&mut self, text: &str) -> Result<Vec<u8>, PipelineError> {
        let synthesizer = self.resources.synthesizer().await?;
        let bytes = synthesizer.synthesize(text).await?;
        self.emit(TurnEvent::AudioReady(bytes.clone()));
        Ok(bytes)
    }

    fn emit(&self, event: TurnEvent) {
        // Events are advisory output; a full buffer must not stall the turn.
        if let Err(e) = self.events.try_send(event) {
            debug!("Event dropped: {}", e);
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.resources.release_all();
    }
}
