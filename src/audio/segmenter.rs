//! Energy-gated utterance segmentation
//!
//! Splits a continuous block stream into utterances:
//! 1. Wait until block energy reaches `energy_threshold` (speech start).
//! 2. Keep appending blocks while capturing, silence included, so the
//!    trailing low-energy tail is retained.
//! 3. When energy stays below threshold for `silence_duration_ms`, the
//!    span is complete. Spans whose speech portion is shorter than
//!    `min_speech_ms` are discarded as noise (cough / click).
//! 4. A span that reaches `max_speech_s` is force-finalized and emitted
//!    even if silence never followed, so no utterance grows unbounded.
//!
//! `feed` is O(1) per block and never blocks; it is safe to call from the
//! capture cadence.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audio::AudioBlock;

/// VAD tuning parameters. All externally configurable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Energy threshold (unitless RMS) above which a block counts as speech
    #[serde(default = "default_energy_threshold")]
    pub energy_threshold: f32,
    /// Trailing silence that terminates an utterance (ms)
    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u64,
    /// Minimum speech duration for an utterance to be emitted (ms)
    #[serde(default = "default_min_speech_ms")]
    pub min_speech_ms: u64,
    /// Hard cap on utterance duration (s)
    #[serde(default = "default_max_speech_s")]
    pub max_speech_s: f32,
}

fn default_energy_threshold() -> f32 {
    0.02
}

fn default_silence_duration_ms() -> u64 {
    800
}

fn default_min_speech_ms() -> u64 {
    400
}

fn default_max_speech_s() -> f32 {
    30.0
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            energy_threshold: default_energy_threshold(),
            silence_duration_ms: default_silence_duration_ms(),
            min_speech_ms: default_min_speech_ms(),
            max_speech_s: default_max_speech_s(),
        }
    }
}

impl SegmenterConfig {
    /// All parameters must be positive and min speech must fit under the cap.
    pub fn validate(&self) -> Result<()> {
        if self.energy_threshold <= 0.0 {
            bail!("energy_threshold must be positive (got {})", self.energy_threshold);
        }
        if self.silence_duration_ms == 0 {
            bail!("silence_duration_ms must be positive");
        }
        if self.min_speech_ms == 0 {
            bail!("min_speech_ms must be positive");
        }
        if self.max_speech_s <= 0.0 {
            bail!("max_speech_s must be positive (got {})", self.max_speech_s);
        }
        let max_ms = (self.max_speech_s * 1000.0) as u64;
        if self.min_speech_ms >= max_ms {
            bail!(
                "min_speech_ms ({}) must be below max_speech_s ({}s)",
                self.min_speech_ms,
                self.max_speech_s
            );
        }
        Ok(())
    }

    fn max_speech_ms(&self) -> u64 {
        (self.max_speech_s * 1000.0) as u64
    }
}

/// A complete speech span: the blocks collected while voice was active,
/// trailing tail included.
#[derive(Debug, Clone)]
pub struct Utterance {
    samples: Vec<f32>,
    sample_rate: u32,
    duration_ms: u64,
    speech_ms: u64,
}

impl Utterance {
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        let duration_ms = samples.len() as u64 * 1000 / sample_rate as u64;
        Self {
            samples,
            sample_rate,
            duration_ms,
            speech_ms: duration_ms,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Total duration including the retained silence tail (ms).
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Duration up to the last above-threshold block (ms).
    pub fn speech_ms(&self) -> u64 {
        self.speech_ms
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_ms as f64 / 1000.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmenterState {
    Idle,
    Capturing,
}

/// The utterance segmenter state machine.
pub struct UtteranceSegmenter {
    config: SegmenterConfig,
    sample_rate: u32,
    state: SegmenterState,
    pending: Vec<f32>,
    pending_ms: u64,
    silence_ms: u64,
}

impl UtteranceSegmenter {
    pub fn new(config: SegmenterConfig, sample_rate: u32) -> Self {
        Self {
            config,
            sample_rate,
            state: SegmenterState::Idle,
            pending: Vec::new(),
            pending_ms: 0,
            silence_ms: 0,
        }
    }

    /// Feed one block in capture order. Returns a completed utterance when a
    /// silence-terminated or max-duration-terminated span is ready.
    pub fn feed(&mut self, block: AudioBlock) -> Option<Utterance> {
        let voiced = block.energy() >= self.config.energy_threshold;

        match self.state {
            SegmenterState::Idle => {
                if !voiced {
                    return None;
                }
                debug!("Speech start detected (energy={:.4})", block.energy());
                self.state = SegmenterState::Capturing;
                self.silence_ms = 0;
                self.append(block);
                None
            }
            SegmenterState::Capturing => {
                if voiced {
                    self.silence_ms = 0;
                } else {
                    self.silence_ms += block.duration_ms();
                }
                // Trailing low-energy tail is retained
                self.append(block);

                if self.silence_ms >= self.config.silence_duration_ms {
                    return self.finalize();
                }
                if self.pending_ms >= self.config.max_speech_ms() {
                    warn!(
                        "Max speech length reached ({}s), cutting utterance",
                        self.config.max_speech_s
                    );
                    return self.force_finalize();
                }
                None
            }
        }
    }

    /// Whether a speech span is currently open.
    pub fn is_capturing(&self) -> bool {
        self.state == SegmenterState::Capturing
    }

    /// Drop any in-progress span and return to idle.
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.pending.clear();
        self.pending_ms = 0;
        self.silence_ms = 0;
    }

    fn append(&mut self, block: AudioBlock) {
        self.pending_ms += block.duration_ms();
        self.pending.extend_from_slice(block.samples());
    }

    /// Silence-terminated finalize: sub-minimum spans are noise, not utterances.
    fn finalize(&mut self) -> Option<Utterance> {
        let speech_ms = self.pending_ms.saturating_sub(self.silence_ms);
        if speech_ms < self.config.min_speech_ms {
            debug!("Discarded short segment ({}ms of speech)", speech_ms);
            self.reset();
            return None;
        }
        Some(self.take_utterance(speech_ms))
    }

    /// Max-duration finalize: always emits, silence condition or not.
    fn force_finalize(&mut self) -> Option<Utterance> {
        let speech_ms = self.pending_ms.saturating_sub(self.silence_ms);
        Some(self.take_utterance(speech_ms))
    }

    fn take_utterance(&mut self, speech_ms: u64) -> Utterance {
        let samples = std::mem::take(&mut self.pending);
        let utterance = Utterance {
            duration_ms: self.pending_ms,
            speech_ms,
            samples,
            sample_rate: self.sample_rate,
        };
        debug!(
            "Utterance complete: {:.1}s total, {:.1}s speech",
            utterance.duration_ms as f64 / 1000.0,
            speech_ms as f64 / 1000.0
        );
        self.reset();
        utterance
    }
}
