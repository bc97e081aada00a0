//! Cancel-aware audio playback
//!
//! Plays MP3 reply audio to the default output device. Playback observes
//! the session's cancellation token so a barge-in stops it mid-stream.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Output sample rate (matches common TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Interval at which playback progress and cancellation are polled
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Plays synthesized reply audio; stoppable via a cancellation token
#[async_trait(?Send)]
pub trait AudioSink {
    /// Play MP3 bytes to completion or until cancelled
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when stopped by an interrupt, another
    /// error if the device or codec fails
    async fn play(&mut self, audio: &[u8], cancel: &CancellationToken) -> Result<()>;
}

/// Speaker-backed sink for the default output device
pub struct SpeakerSink {
    config: StreamConfig,
}

impl SpeakerSink {
    /// Probe the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no mono or stereo config at the playback rate exists
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                (c.channels() == 1 || c.channels() == 2)
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { config })
    }

    /// Play mono samples at the playback rate, observing the token
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when stopped by an interrupt, another
    /// error if the device fails
    pub async fn play_samples(
        &mut self,
        samples: Vec<f32>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device".to_string()))?;

        let channels = self.config.channels as usize;
        let samples = Arc::new(samples);
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);
            device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut pos = position.load(Ordering::Relaxed);
                        for frame in data.chunks_mut(channels) {
                            let sample = samples.get(pos).copied().unwrap_or_else(|| {
                                finished.store(true, Ordering::Relaxed);
                                0.0
                            });
                            for out in frame.iter_mut() {
                                *out = sample;
                            }
                            pos = pos.saturating_add(1).min(samples.len());
                        }
                        position.store(pos, Ordering::Relaxed);
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        // Generous upper bound so a stalled stream cannot hang the turn
        let duration_ms = (samples.len() as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
        let deadline = tokio::time::Instant::now() + Duration::from_millis(duration_ms + 1000);

        while !finished.load(Ordering::Relaxed) {
            if cancel.is_cancelled() {
                drop(stream);
                tracing::debug!("playback interrupted");
                return Err(Error::Cancelled);
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!("playback deadline exceeded");
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        // Let the device flush its last buffer
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(stream);
        tracing::debug!(samples = samples.len(), "playback complete");
        Ok(())
    }
}

#[async_trait(?Send)]
impl AudioSink for SpeakerSink {
    async fn play(&mut self, audio: &[u8], cancel: &CancellationToken) -> Result<()> {
        let samples = decode_mp3(audio)?;
        self.play_samples(samples, cancel).await
    }
}

/// Decode MP3 bytes to mono f32 samples, averaging multi-channel frames
///
/// # Errors
///
/// Returns error if the data is not valid MP3
#[allow(clippy::cast_precision_loss)]
pub fn decode_mp3(data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(data));
    let mut samples = Vec::new();

    loop {
        let frame = match decoder.next_frame() {
            Ok(frame) => frame,
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        };
        if frame.data.is_empty() {
            continue;
        }

        let channels = frame.channels.max(1);
        samples.extend(frame.data.chunks(channels).map(|interleaved| {
            let sum: f32 = interleaved.iter().map(|&s| f32::from(s)).sum();
            sum / (interleaved.len() as f32 * 32768.0)
        }));
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_garbage() {
        // Looks like nothing MP3; decoder should hit EOF or error without
        // producing samples
        let result = decode_mp3(&[0u8; 16]);
        if let Ok(samples) = result {
            assert!(samples.is_empty());
        }
    }
}
