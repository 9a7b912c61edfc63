//! End-to-end pipeline tests with scripted model stages

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use voxpersona::audio::segmenter::Utterance;
use voxpersona::config::{Config, PipelineConfig};
use voxpersona::pipeline::{CancelToken, Pipeline, TurnEvent, TurnInput};
use voxpersona::stages::{FragmentStream, Generator, StageFactory, Synthesizer, Transcriber};
use voxpersona::types::{StageKind, Turn};
use voxpersona::PipelineError;

struct FixedTranscriber(String);

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, _samples: &[f32], _rate: u32) -> Result<String, PipelineError> {
        Ok(self.0.clone())
    }
}

/// Replays a fixed fragment script. With `hold_open` the stream never
/// terminates after the script, so a turn can be cancelled mid-generation.
struct ScriptedGenerator {
    fragments: Vec<Result<String, String>>,
    hold_open: bool,
    held: Mutex<Vec<mpsc::Sender<Result<String, PipelineError>>>>,
}

impl ScriptedGenerator {
    fn new(fragments: Vec<Result<String, String>>, hold_open: bool) -> Self {
        Self {
            fragments,
            hold_open,
            held: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, _turns: &[Turn]) -> Result<FragmentStream, PipelineError> {
        let (tx, rx) = mpsc::channel(64);
        for fragment in &self.fragments {
            let item = fragment
                .clone()
                .map_err(PipelineError::Generation);
            tx.send(item).await.map_err(|_| {
                PipelineError::Generation("fragment receiver dropped".into())
            })?;
        }
        if self.hold_open {
            self.held.lock().unwrap().push(tx);
        }
        Ok(rx)
    }
}

struct FakeSynthesizer {
    fail: bool,
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, PipelineError> {
        if self.fail {
            Err(PipelineError::Synthesis("no vocoder".into()))
        } else {
            Ok(b"RIFFfake".to_vec())
        }
    }
}

struct ScriptedFactory {
    transcript: String,
    fragments: Vec<Result<String, String>>,
    hold_open: bool,
    fail_synthesis: bool,
}

impl ScriptedFactory {
    fn replying(fragments: &[&str]) -> Self {
        Self {
            transcript: "hello there".to_string(),
            fragments: fragments.iter().map(|f| Ok(f.to_string())).collect(),
            hold_open: false,
            fail_synthesis: false,
        }
    }
}

#[async_trait]
impl StageFactory for ScriptedFactory {
    async fn load_transcriber(&self) -> Result<Arc<dyn Transcriber>, PipelineError> {
        Ok(Arc::new(FixedTranscriber(self.transcript.clone())))
    }

    async fn load_generator(&self) -> Result<Arc<dyn Generator>, PipelineError> {
        Ok(Arc::new(ScriptedGenerator::new(
            self.fragments.clone(),
            self.hold_open,
        )))
    }

    async fn load_synthesizer(&self) -> Result<Arc<dyn Synthesizer>, PipelineError> {
        Ok(Arc::new(FakeSynthesizer {
            fail: self.fail_synthesis,
        }))
    }
}

fn config_for(mode: &str) -> Config {
    Config {
        pipeline: PipelineConfig {
            mode: mode.to_string(),
            max_history: 10,
        },
        ..Config::default()
    }
}

fn pipeline_with(mode: &str, factory: ScriptedFactory) -> Pipeline {
    Pipeline::new(&config_for(mode), Arc::new(factory))
}

fn one_second_utterance() -> Utterance {
    Utterance::from_samples(vec![0.1; 16_000], 16_000)
}

fn drain_events(rx: &mut mpsc::Receiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn text_only_turn_streams_and_commits() {
    let mut pipeline = pipeline_with("text_only", ScriptedFactory::replying(&["Hel", "lo!"]));
    let mut events = pipeline.take_events().unwrap();
    let cancel = CancelToken::new();

    let outcome = pipeline
        .run_turn(TurnInput::Text("hi".to_string()), &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.user_text, "hi");
    assert_eq!(outcome.assistant_text, "Hello!");
    assert!(outcome.audio.is_none());
    assert!(outcome.synthesis_error.is_none());
    assert_eq!(pipeline.history().len(), 2);

    let events = drain_events(&mut events);
    assert_eq!(events.len(), 2);
    assert!(events
        .iter()
        .all(|e| matches!(e, TurnEvent::TextFragment(_))));
}

#[tokio::test]
async fn audio_input_rejected_outside_speech_mode() {
    let mut pipeline = pipeline_with("text_only", ScriptedFactory::replying(&["x"]));
    let cancel = CancelToken::new();

    let err = pipeline
        .run_turn(TurnInput::Audio(one_second_utterance()), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::StageUnavailable { .. }));
    assert!(pipeline.history().is_empty());
}

#[tokio::test]
async fn speech_turn_transcribes_then_replies() {
    let mut pipeline =
        pipeline_with("speech_to_speech", ScriptedFactory::replying(&["Hi!"]));
    let mut events = pipeline.take_events().unwrap();
    let cancel = CancelToken::new();

    let outcome = pipeline
        .run_turn(TurnInput::Audio(one_second_utterance()), &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.user_text, "hello there");
    assert_eq!(outcome.assistant_text, "Hi!");
    assert!(outcome.audio.is_some());

    let events = drain_events(&mut events);
    assert!(matches!(&events[0], TurnEvent::TranscriptReady(t) if t == "hello there"));
    assert!(matches!(events.last(), Some(TurnEvent::AudioReady(_))));
}

#[tokio::test]
async fn cancellation_discards_partial_reply() {
    let factory = ScriptedFactory {
        fragments: vec![Ok("partial ".to_string())],
        hold_open: true,
        ..ScriptedFactory::replying(&[])
    };
    let mut pipeline = pipeline_with("text_only", factory);
    let cancel = CancelToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = pipeline
        .run_turn(TurnInput::Text("hi".to_string()), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled));
    // The partial reply never reaches history.
    assert!(pipeline.history().is_empty());
}

#[tokio::test]
async fn mid_stream_failure_commits_nothing() {
    let factory = ScriptedFactory {
        fragments: vec![
            Ok("some ".to_string()),
            Err("backend went away".to_string()),
        ],
        ..ScriptedFactory::replying(&[])
    };
    let mut pipeline = pipeline_with("text_only", factory);
    let cancel = CancelToken::new();

    let err = pipeline
        .run_turn(TurnInput::Text("hi".to_string()), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Generation(_)));
    assert!(pipeline.history().is_empty());
}

#[tokio::test]
async fn synthesis_failure_keeps_the_text_turn() {
    let factory = ScriptedFactory {
        fail_synthesis: true,
        ..ScriptedFactory::replying(&["Hello!"])
    };
    let mut pipeline = pipeline_with("text_to_speech", factory);
    let cancel = CancelToken::new();

    let outcome = pipeline
        .run_turn(TurnInput::Text("hi".to_string()), &cancel)
        .await
        .unwrap();

    assert!(outcome.audio.is_none());
    assert!(matches!(
        outcome.synthesis_error,
        Some(PipelineError::Synthesis(_))
    ));
    // The text side of the turn stands.
    assert_eq!(outcome.assistant_text, "Hello!");
    assert_eq!(pipeline.history().len(), 2);
}

#[tokio::test]
async fn empty_reply_is_a_generation_error() {
    let mut pipeline = pipeline_with("text_only", ScriptedFactory::replying(&[]));
    let cancel = CancelToken::new();

    let err = pipeline
        .run_turn(TurnInput::Text("hi".to_string()), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Generation(_)));
    assert!(pipeline.history().is_empty());
}

#[tokio::test]
async fn resources_load_lazily_and_release_on_mode_switch() {
    let mut pipeline =
        pipeline_with("text_to_speech", ScriptedFactory::replying(&["ok"]));
    let cancel = CancelToken::new();

    // Nothing is loaded before the first turn.
    assert!(!pipeline.is_stage_loaded(StageKind::Generator));
    assert!(!pipeline.is_stage_loaded(StageKind::Synthesizer));

    pipeline
        .run_turn(TurnInput::Text("hi".to_string()), &cancel)
        .await
        .unwrap();

    assert!(pipeline.is_stage_loaded(StageKind::Generator));
    assert!(pipeline.is_stage_loaded(StageKind::Synthesizer));
    assert!(!pipeline.is_stage_loaded(StageKind::Transcriber));

    // Dropping synthesis from the mode releases its resource.
    pipeline.set_mode("text_only".parse().unwrap());
    assert!(pipeline.is_stage_loaded(StageKind::Generator));
    assert!(!pipeline.is_stage_loaded(StageKind::Synthesizer));

    pipeline.shutdown();
    assert!(!pipeline.is_stage_loaded(StageKind::Generator));
}

#[tokio::test]
async fn history_feeds_the_next_turn() {
    let mut pipeline = pipeline_with("text_only", ScriptedFactory::replying(&["reply"]));
    let cancel = CancelToken::new();

    pipeline
        .run_turn(TurnInput::Text("first".to_string()), &cancel)
        .await
        .unwrap();
    pipeline
        .run_turn(TurnInput::Text("second".to_string()), &cancel)
        .await
        .unwrap();

    let turns = pipeline.history().snapshot();
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[0].content, "first");
    assert_eq!(turns[2].content, "second");
}
