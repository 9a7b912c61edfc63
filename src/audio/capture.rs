//! Continuous microphone capture
//!
//! A dedicated thread owns the cpal input stream (`cpal::Stream` is not
//! `Send`), chops the callback data into fixed-size blocks, and runs the
//! utterance segmenter over them. Finished utterances are handed to the
//! consumer over a bounded channel of capacity 1: if a new utterance
//! completes while the previous one is still being processed, the new one
//! is dropped with a warning rather than queued.

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::audio::segmenter::{SegmenterConfig, Utterance, UtteranceSegmenter};
use crate::audio::AudioBlock;
use crate::config::AudioConfig;
use crate::error::PipelineError;

pub struct ContinuousCapture {
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl ContinuousCapture {
    /// Start capturing. Utterances arrive on the returned receiver; any
    /// device or thread setup failure surfaces as a capture error.
    pub fn start(
        audio: &AudioConfig,
        vad: SegmenterConfig,
    ) -> Result<(Self, mpsc::Receiver<Utterance>), PipelineError> {
        let (utterance_tx, utterance_rx) = mpsc::channel(1);
        let running = Arc::new(AtomicBool::new(true));

        // The stream must be created on the thread that owns it, so device
        // setup errors come back over a one-shot channel.
        let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<()>>();
        let thread_running = running.clone();
        let audio = audio.clone();

        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                capture_thread(audio, vad, thread_running, utterance_tx, init_tx);
            })
            .map_err(|e| PipelineError::Capture(format!("failed to spawn capture thread: {}", e)))?;

        init_rx
            .recv_timeout(Duration::from_secs(10))
            .map_err(|_| PipelineError::Capture("capture thread did not report readiness".into()))?
            .map_err(|e| PipelineError::Capture(e.to_string()))?;

        info!("Continuous capture started");
        Ok((
            Self {
                running,
                thread: Some(thread),
            },
            utterance_rx,
        ))
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        info!("Continuous capture stopped");
    }
}

impl Drop for ContinuousCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_thread(
    audio: AudioConfig,
    vad: SegmenterConfig,
    running: Arc<AtomicBool>,
    utterance_tx: mpsc::Sender<Utterance>,
    init_tx: std::sync::mpsc::Sender<Result<()>>,
) {
    let (chunk_tx, chunk_rx) = std::sync::mpsc::channel::<Vec<f32>>();

    let stream = match build_input_stream(&audio, chunk_tx) {
        Ok(stream) => {
            let _ = init_tx.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        error!("Failed to start input stream: {}", e);
        return;
    }

    let block_samples = (audio.sample_rate as u64 * audio.block_ms / 1000) as usize;
    let mut segmenter = UtteranceSegmenter::new(vad, audio.sample_rate);
    let mut pending: Vec<f32> = Vec::with_capacity(block_samples * 2);

    while running.load(Ordering::SeqCst) {
        let chunk = match chunk_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(chunk) => chunk,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        };
        pending.extend_from_slice(&chunk);

        while pending.len() >= block_samples {
            let samples: Vec<f32> = pending.drain(..block_samples).collect();
            let block = AudioBlock::from_samples(samples, audio.sample_rate);
            if let Some(utterance) = segmenter.feed(block) {
                debug!(
                    "Utterance finished: {}ms speech",
                    utterance.speech_ms()
                );
                match utterance_tx.try_send(utterance) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        // Consumer is still busy with the previous utterance.
                        warn!("Utterance dropped: previous one still processing");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        running.store(false, Ordering::SeqCst);
                    }
                }
            }
        }
    }
    // Stream stops when dropped here.
}

fn build_input_stream(
    audio: &AudioConfig,
    chunk_tx: std::sync::mpsc::Sender<Vec<f32>>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = match &audio.input_device {
        Some(name) => host
            .input_devices()
            .context("Failed to enumerate input devices")?
            .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
            .ok_or_else(|| anyhow!("Input device not found: {}", name))?,
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow!("No input device available"))?,
    };

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!("Using input device: {}", device_name);

    let stream_config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(audio.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_fn = |err| error!("Audio input error: {}", err);

    let stream = match device
        .default_input_config()
        .context("Failed to get input config")?
        .sample_format()
    {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = chunk_tx.send(data.to_vec());
            },
            err_fn,
            None,
        )?,
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data
                    .iter()
                    .map(|&s| (s as f32 / i16::MAX as f32).clamp(-1.0, 1.0))
                    .collect();
                let _ = chunk_tx.send(samples);
            },
            err_fn,
            None,
        )?,
        format => anyhow::bail!("Unsupported sample format: {:?}", format),
    };

    Ok(stream)
}
