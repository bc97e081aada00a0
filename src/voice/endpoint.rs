//! Energy-based utterance endpointing
//!
//! Segments one utterance per listen attempt: speech starts when chunk
//! energy crosses the threshold, and ends after a trailing-silence window.

use std::time::Duration;

use crate::config::VoiceConfig;
use crate::voice::SAMPLE_RATE;

/// Endpointing thresholds in samples
#[derive(Debug, Clone, Copy)]
pub struct EndpointProfile {
    /// RMS energy above which a chunk counts as speech
    pub energy_threshold: f32,
    /// Minimum utterance length (samples) worth transcribing
    pub min_speech_samples: usize,
    /// Trailing silence (samples) that ends an utterance
    pub silence_samples: usize,
}

impl EndpointProfile {
    /// Build a profile from voice configuration
    #[must_use]
    pub fn from_config(config: &VoiceConfig) -> Self {
        Self {
            energy_threshold: config.energy_threshold,
            min_speech_samples: duration_to_samples(config.min_speech),
            silence_samples: duration_to_samples(config.trailing_silence),
        }
    }
}

impl Default for EndpointProfile {
    fn default() -> Self {
        Self::from_config(&VoiceConfig::default())
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn duration_to_samples(duration: Duration) -> usize {
    (duration.as_secs_f64() * f64::from(SAMPLE_RATE)) as usize
}

/// Accumulates capture chunks into a single endpointed utterance
#[derive(Debug)]
pub struct Endpointer {
    profile: EndpointProfile,
    speech: Vec<f32>,
    silence_counter: usize,
    in_speech: bool,
}

impl Endpointer {
    /// Create an endpointer with the given profile
    #[must_use]
    pub const fn new(profile: EndpointProfile) -> Self {
        Self {
            profile,
            speech: Vec::new(),
            silence_counter: 0,
            in_speech: false,
        }
    }

    /// Feed a chunk of samples; returns the utterance once it is complete
    pub fn push(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        if samples.is_empty() {
            return None;
        }

        let energy = rms_energy(samples);
        let is_speech = energy > self.profile.energy_threshold;

        if !self.in_speech {
            if is_speech {
                self.in_speech = true;
                self.speech.extend_from_slice(samples);
                self.silence_counter = 0;
                tracing::trace!(energy, "speech onset");
            }
            return None;
        }

        self.speech.extend_from_slice(samples);
        if is_speech {
            self.silence_counter = 0;
        } else {
            self.silence_counter += samples.len();
        }

        if self.silence_counter > self.profile.silence_samples {
            let utterance = std::mem::take(&mut self.speech);
            self.reset();
            if utterance.len() >= self.profile.min_speech_samples {
                tracing::debug!(samples = utterance.len(), "utterance complete");
                return Some(utterance);
            }
            tracing::trace!(samples = utterance.len(), "utterance too short, discarded");
        }

        None
    }

    /// Drop any partial utterance and return to waiting for speech
    pub fn reset(&mut self) {
        self.speech.clear();
        self.silence_counter = 0;
        self.in_speech = false;
    }
}

/// RMS energy of a chunk
#[allow(clippy::cast_precision_loss)]
fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(duration_secs: f32, amplitude: f32) -> Vec<f32> {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let n = (SAMPLE_RATE as f32 * duration_secs) as usize;
        (0..n)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let t = i as f32 / SAMPLE_RATE as f32;
                amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
            })
            .collect()
    }

    fn silence(duration_secs: f32) -> Vec<f32> {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let n = (SAMPLE_RATE as f32 * duration_secs) as usize;
        vec![0.0; n]
    }

    #[test]
    fn test_rms_energy() {
        assert!(rms_energy(&silence(0.1)) < 0.001);
        assert!(rms_energy(&vec![0.5f32; 100]) > 0.3);
        assert!(rms_energy(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_silence_alone_yields_nothing() {
        let mut endpoint = Endpointer::new(EndpointProfile::default());
        assert!(endpoint.push(&silence(1.0)).is_none());
    }

    #[test]
    fn test_speech_then_silence_completes_utterance() {
        let mut endpoint = Endpointer::new(EndpointProfile::default());
        let speech = tone(0.5, 0.3);
        assert!(endpoint.push(&speech).is_none());

        let utterance = endpoint.push(&silence(0.6)).expect("utterance");
        assert!(utterance.len() >= speech.len());
    }

    #[test]
    fn test_short_blip_is_discarded() {
        let mut endpoint = Endpointer::new(EndpointProfile::default());
        assert!(endpoint.push(&tone(0.01, 0.3)).is_none());
        // Trailing silence ends the segment but it is below min length
        assert!(endpoint.push(&silence(0.6)).is_none());
        // Endpointer is reusable afterwards
        endpoint.push(&tone(0.5, 0.3));
        assert!(endpoint.push(&silence(0.6)).is_some());
    }

    #[test]
    fn test_reset_discards_partial_speech() {
        let mut endpoint = Endpointer::new(EndpointProfile::default());
        endpoint.push(&tone(0.5, 0.3));
        endpoint.reset();
        assert!(endpoint.push(&silence(0.6)).is_none());
    }
}
