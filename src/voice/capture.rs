//! Microphone capture

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Capture sample rate (16kHz mono, what speech models expect)
pub const SAMPLE_RATE: u32 = 16000;

/// Captures audio from the default input device into a shared buffer
/// drained chunk-wise by the endpointer
pub struct AudioCapture {
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Open the default input device
    ///
    /// Failing here means the platform cannot do voice input at all; the
    /// caller disables the conversation loop rather than retrying.
    ///
    /// # Errors
    ///
    /// Returns error if no device supports 16kHz mono capture
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no 16kHz mono input config".to_string()))?;

        let config = supported.with_sample_rate(SampleRate(SAMPLE_RATE)).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            "audio capture initialized"
        );

        Ok(Self {
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Start the input stream; idempotent
    ///
    /// # Errors
    ///
    /// Returns error if the stream cannot be built or started
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device".to_string()))?;

        let stream = device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);
        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop the input stream and discard any buffered samples
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("audio capture stopped");
        }
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    /// Drain the samples captured since the last call
    #[must_use]
    pub fn drain(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    /// Whether the input stream is running
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }
}

/// Encode f32 samples as 16-bit PCM WAV for the transcription request
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;
        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }
        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_wav_header() {
        let samples = vec![0.0f32, 0.5, -0.5, 1.0, -1.0];
        let wav = encode_wav(&samples, SAMPLE_RATE).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert!(wav.len() > 44);
    }

    #[test]
    fn test_encode_wav_roundtrip() {
        let samples = vec![0.0f32, 0.25, -0.25, 0.99];
        let wav = encode_wav(&samples, SAMPLE_RATE).unwrap();

        let mut reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.spec().channels, 1);
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read.len(), samples.len());
    }
}
