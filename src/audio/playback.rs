//! Speaker playback via rodio

use anyhow::{Context, Result};
use tracing::{debug, info};

/// Audio output handle. Keeps the rodio output stream alive for the life of
/// the session.
pub struct Playback {
    sink: rodio::Sink,
    _stream: rodio::OutputStream,
}

impl Playback {
    pub fn new() -> Result<Self> {
        let (_stream, stream_handle) = rodio::OutputStream::try_default()
            .context("Failed to open audio output stream")?;
        let sink = rodio::Sink::try_new(&stream_handle)
            .context("Failed to create audio sink")?;
        info!("Audio playback ready");
        Ok(Self { sink, _stream })
    }

    /// Queue WAV bytes for playback. Returns immediately; audio plays in the
    /// background.
    pub fn play_wav_bytes(&self, wav: Vec<u8>) -> Result<()> {
        let source = rodio::Decoder::new(std::io::Cursor::new(wav))
            .context("Failed to decode WAV data")?;
        self.sink.append(source);
        debug!("Queued synthesized audio for playback");
        Ok(())
    }

    /// Block until everything queued has finished playing.
    pub fn wait(&self) {
        self.sink.sleep_until_end();
    }

    pub fn stop(&self) {
        self.sink.stop();
    }

    pub fn is_playing(&self) -> bool {
        !self.sink.empty()
    }
}
