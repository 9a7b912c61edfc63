//! Audio primitives and I/O
//!
//! - `AudioBlock`: a fixed-duration slice of mono PCM with its RMS energy
//! - WAV encode/decode helpers (hound)
//! - `segmenter`: energy-gated utterance segmentation
//! - `capture` / `playback`: microphone input and speaker output (cpal/rodio,
//!   behind the `voice` feature so the core pipeline builds headless)

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

pub mod segmenter;

#[cfg(feature = "voice")]
pub mod capture;
#[cfg(feature = "voice")]
pub mod playback;

/// Sample rate the whole pipeline runs at (what Whisper expects).
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Duration of one capture block in milliseconds.
pub const DEFAULT_BLOCK_MS: u64 = 30;

/// A fixed-duration slice of mono PCM samples plus its RMS energy.
///
/// Ephemeral: produced by the capture source, consumed immediately by the
/// segmenter.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    samples: Vec<f32>,
    duration_ms: u64,
    energy: f32,
}

impl AudioBlock {
    /// Build a block from raw samples, computing RMS energy up front.
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        let duration_ms = samples.len() as u64 * 1000 / sample_rate as u64;
        let energy = rms(&samples);
        Self {
            samples,
            duration_ms,
            energy,
        }
    }

    /// RMS energy in normalized [0, 1] units.
    pub fn energy(&self) -> f32 {
        self.energy
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

/// Root-mean-square energy of an audio block.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|&s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

fn wav_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Encode mono f32 samples as 16-bit WAV bytes in memory.
pub fn wav_bytes(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, wav_spec(sample_rate))
        .context("Failed to create WAV writer")?;
    for &sample in samples {
        writer.write_sample(f32_to_i16(sample))?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}

/// Save mono f32 samples to a 16-bit WAV file.
pub fn save_wav(samples: &[f32], sample_rate: u32, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    let mut writer = hound::WavWriter::create(path, wav_spec(sample_rate))
        .with_context(|| format!("Failed to create WAV file: {:?}", path))?;
    for &sample in samples {
        writer.write_sample(f32_to_i16(sample))?;
    }
    writer.finalize()?;
    debug!("Saved {} samples to {:?}", samples.len(), path);
    Ok(())
}

/// Writes captured utterances as counter-numbered WAV files
/// (`utterance_0001.wav`, `utterance_0002.wav`, ...) into one directory.
pub struct UtteranceWriter {
    dir: std::path::PathBuf,
    counter: u32,
}

impl UtteranceWriter {
    pub fn new(dir: impl Into<std::path::PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create utterance directory {:?}", dir))?;
        Ok(Self { dir, counter: 0 })
    }

    /// Save one utterance, returning the path it was written to.
    pub fn save(&mut self, samples: &[f32], sample_rate: u32) -> Result<std::path::PathBuf> {
        self.counter += 1;
        let path = self
            .dir
            .join(format!("utterance_{:04}.wav", self.counter));
        save_wav(samples, sample_rate, &path)?;
        info!(
            "Saved utterance: {:?} ({:.1}s)",
            path,
            samples.len() as f64 / sample_rate as f64
        );
        Ok(path)
    }
}

/// Load a WAV file as mono f32 samples, returning (samples, sample_rate).
///
/// Multi-channel files are downmixed by taking channel 0.
pub fn load_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("Failed to open WAV file: {:?}", path))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .filter_map(|s| s.ok())
            .map(|s| s as f32 / i16::MAX as f32)
            .collect(),
        hound::SampleFormat::Float => reader.samples::<f32>().filter_map(|s| s.ok()).collect(),
    };

    let mono: Vec<f32> = if channels > 1 {
        samples.iter().step_by(channels).copied().collect()
    } else {
        samples
    };

    debug!("Loaded {} samples from {:?}", mono.len(), path);
    Ok((mono, spec.sample_rate))
}
