//! CLI interface for voxpersona
//!
//! One-shot flags for scripting, plus an interactive REPL. Ctrl+C during a
//! turn cancels generation and returns to the prompt with history untouched.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use crate::audio;
use crate::audio::segmenter::Utterance;
use crate::config::Config;
use crate::error::PipelineError;
use crate::pipeline::{CancelToken, Pipeline, TurnEvent, TurnInput, TurnOutcome};
use crate::stages::ModelStageFactory;
use crate::types::PipelineMode;

#[derive(Parser)]
#[command(name = "voxpersona")]
#[command(about = "Multi-mode voice assistant: VAD-gated capture, STT, streaming chat, TTS", long_about = None)]
#[command(version)]
struct Cli {
    /// Pipeline mode: speech_to_speech, text_to_speech, or text_only
    #[arg(short, long, alias = "pipeline")]
    mode: Option<String>,

    /// Run a single text turn and exit
    #[arg(short, long)]
    text: Option<String>,

    /// Transcribe a WAV file, run a single turn, and exit
    #[arg(short, long)]
    audio: Option<PathBuf>,

    /// Listen continuously on the microphone
    #[arg(short, long)]
    listen: bool,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(mode) = &cli.mode {
        // Fail fast on a bad flag rather than silently falling back.
        PipelineMode::from_str(mode)?;
        config.pipeline.mode = mode.clone();
    }

    let factory = Arc::new(ModelStageFactory::new(config.clone()));
    let mut pipeline = Pipeline::new(&config, factory);
    let events = pipeline
        .take_events()
        .context("Event stream already taken")?;
    let printer = spawn_event_printer(events);

    let result = if let Some(text) = cli.text {
        run_single_turn(&mut pipeline, &config, TurnInput::Text(text)).await
    } else if let Some(path) = cli.audio {
        let input = wav_turn_input(&path)?;
        run_single_turn(&mut pipeline, &config, input).await
    } else if cli.listen {
        listen_loop(&mut pipeline, &config).await
    } else {
        repl(&mut pipeline, &config).await
    };

    pipeline.shutdown();
    drop(pipeline);
    let _ = printer.await;
    result
}

/// Print transcripts and stream fragments as they arrive.
fn spawn_event_printer(
    mut events: mpsc::Receiver<TurnEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TurnEvent::TranscriptReady(text) => {
                    println!("You: {}", text);
                }
                TurnEvent::TextFragment(fragment) => {
                    print!("{}", fragment);
                    let _ = std::io::stdout().flush();
                }
                TurnEvent::AudioReady(_) => {}
            }
        }
    })
}

fn wav_turn_input(path: &Path) -> Result<TurnInput, PipelineError> {
    let (samples, sample_rate) = audio::load_wav(path)
        .map_err(|e| PipelineError::Capture(format!("{}: {}", path.display(), e)))?;
    Ok(TurnInput::Audio(Utterance::from_samples(samples, sample_rate)))
}

/// Run one turn with Ctrl+C cancellation. Cancelling discards the partial
/// reply and leaves history as it was.
async fn cancellable_turn(
    pipeline: &mut Pipeline,
    input: TurnInput,
) -> Result<TurnOutcome, PipelineError> {
    let cancel = CancelToken::new();
    let fut = pipeline.run_turn(input, &cancel);
    tokio::pin!(fut);
    tokio::select! {
        biased;
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            fut.await
        }
        r = &mut fut => r,
    }
}

async fn run_single_turn(
    pipeline: &mut Pipeline,
    config: &Config,
    input: TurnInput,
) -> Result<()> {
    match cancellable_turn(pipeline, input).await {
        Ok(outcome) => {
            println!();
            deliver_audio(&outcome, config)?;
            Ok(())
        }
        Err(PipelineError::Cancelled) => {
            println!("\nCancelled.");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Save the synthesized reply and, with the voice feature, play it.
fn deliver_audio(outcome: &TurnOutcome, config: &Config) -> Result<()> {
    let Some(wav) = &outcome.audio else {
        if let Some(e) = &outcome.synthesis_error {
            warn!("Reply delivered as text only: {}", e);
        }
        return Ok(());
    };

    let path = Path::new(&config.synthesis.output_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create output directory")?;
    }
    std::fs::write(path, wav).context("Failed to save synthesized audio")?;

    #[cfg(feature = "voice")]
    {
        let playback = crate::audio::playback::Playback::new()?;
        playback.play_wav_bytes(wav.clone())?;
        playback.wait();
    }

    Ok(())
}

///// Continuous microphone mode: capture, segment, and run a turn per
/// utterance until Ctrl+C.
#[cfg(feature = "voice")]
async fn listen_loop(pipeline: &mut Pipeline, config: &Config) -> Result<()> {
    use crate::audio::capture::ContinuousCapture;

    if !pipeline.mode().has_capture() {
        anyhow::bail!(
            "Listening requires speech_to_speech mode (current: {})",
            pipeline.mode()
        );
    }

    let (mut capture, mut utterances) =
        ContinuousCapture::start(&config.audio, config.vad)?;
    let mut writer = audio::UtteranceWriter::new(&config.audio.utterance_dir)?;
    println!("Listening... speak, pause to finish an utterance, Ctrl+C to stop.");

    loop {
        let utterance = tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => break,
            u = utterances.recv() => match u {
                Some(u) => u,
                None => break,
            },
        };

        if let Err(e) = writer.save(utterance.samples(), utterance.sample_rate()) {
            warn!("Could not save utterance: {}", e);
        }

        match cancellable_turn(pipeline, TurnInput::Audio(utterance)).await {
            Ok(outcome) => {
                println!();
                deliver_audio(&outcome, config)?;
            }
            Err(PipelineError::Cancelled) => {
                println!("\nCancelled.");
            }
            Err(e) => eprintln!("Turn failed: {}", e),
        }
    }

    capture.stop();
    Ok(())
}

#[cfg(not(feature = "voice"))]
async fn listen_loop(_pipeline: &mut Pipeline, _config: &Config) -> Result<()> {
    anyhow::bail!("This build has no voice support (rebuild with the `voice` feature)")
}

async fn repl(pipeline: &mut Pipeline, config: &Config) -> Result<()> {
    println!("voxpersona {} (mode: {})", env!("CARGO_PKG_VERSION"), pipeline.mode());
    println!("Type /help for commands.");

    let rl_config = rustyline::Config::builder().auto_add_history(true).build();
    let mut rl = rustyline::DefaultEditor::with_config(rl_config)?;

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if input.starts_with('/') {
                    if !handle_command(input, pipeline, config).await? {
                        break;
                    }
                    continue;
                }
                run_single_turn(pipeline, config, TurnInput::Text(input.to_string()))
                    .await?;
            }
            Err(rustyline::error::ReadlineError::Interrupted)
            | Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Returns `false` when the REPL should exit.
async fn handle_command(
    input: &str,
    pipeline: &mut Pipeline,
    config: &Config,
) -> Result<bool> {
    let mut parts = input.splitn(2, ' ');
    let command = parts.next().unwrap_or_default();
    let arg = parts.next().unwrap_or("").trim();

    match command {
        "/exit" | "/quit" => return Ok(false),
        "/help" => {
            println!("/mode [name]   show or switch pipeline mode");
            println!("/audio <path>  run one turn from a WAV file");
            println!("/listen        continuous microphone mode");
            println!("/history       show conversation turns");
            println!("/clear         clear conversation history");
            println!("/exit          quit");
        }
        "/mode" => {
            if arg.is_empty() {
                println!("Current mode: {}", pipeline.mode());
            } else {
                match PipelineMode::from_str(arg) {
                    Ok(mode) => {
                        pipeline.set_mode(mode);
                        println!("Switched to {}", mode);
                    }
                    Err(e) => eprintln!("{}", e),
                }
            }
        }
        "/audio" => {
            if arg.is_empty() {
                eprintln!("Usage: /audio <path-to-wav>");
            } else {
                match wav_turn_input(Path::new(arg)) {
                    Ok(input) => run_single_turn(pipeline, config, input).await?,
                    Err(e) => eprintln!("{}", e),
                }
            }
        }
        "/listen" => {
            if let Err(e) = listen_loop(pipeline, config).await {
                eprintln!("{}", e);
            }
        }
        "/history" => {
            for turn in pipeline.history().snapshot() {
                println!("[{}] {}", turn.role, turn.content);
            }
        }
        "/clear" => {
            pipeline.clear_history();
            println!("History cleared.");
        }
        _ => eprintln!("Unknown command: {} (try /help)", command),
    }
    Ok(true)
}
