//! Speech recognition: microphone capture, endpointing, transcription

use async_trait::async_trait;

use crate::config::VoiceConfig;
use crate::voice::{AudioCapture, Endpointer, EndpointProfile, SAMPLE_RATE, encode_wav};
use crate::{Error, Result};

/// Response from an OpenAI-compatible transcription endpoint
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Produces a transcript for one utterance in a given locale, or no result
///
/// Recognizer errors are non-fatal by contract: implementations report
/// `Ok(None)` for no-speech and recognition failures alike, and the caller
/// falls back to another locale or re-listens.
#[async_trait(?Send)]
pub trait SpeechRecognizer {
    /// Listen for one utterance and transcribe it
    ///
    /// # Errors
    ///
    /// Returns error only for unrecoverable device failures
    async fn recognize(&mut self, locale: &str) -> Result<Option<String>>;

    /// Force-stop recognition, discarding any partial capture
    async fn stop(&mut self);
}

/// HTTP transcription client (OpenAI-compatible multipart endpoint)
pub struct Transcriber {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl Transcriber {
    /// Create a transcription client from voice configuration
    #[must_use]
    pub fn new(config: &VoiceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.stt_url.clone(),
            api_key: config.stt_api_key.clone(),
            model: config.stt_model.clone(),
        }
    }

    /// Transcribe WAV audio in the given locale
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the endpoint rejects the audio
    pub async fn transcribe(&self, wav: Vec<u8>, locale: &str) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), locale, "starting transcription");

        // Endpoint expects a bare language code, not a full tag
        let language = locale.split('-').next().unwrap_or(locale).to_string();

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("language", language);

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, "transcription request failed");
            e
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription endpoint error");
            return Err(Error::Stt(format!("transcription error {status}: {body}")));
        }

        let result: TranscriptionResponse = response.json().await?;
        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

/// Recognizer backed by the microphone and an HTTP transcription endpoint
pub struct MicRecognizer {
    capture: AudioCapture,
    endpointer: Endpointer,
    transcriber: Transcriber,
    poll_interval: std::time::Duration,
}

impl MicRecognizer {
    /// Open the microphone and build the recognizer
    ///
    /// # Errors
    ///
    /// Returns error if no capture device is usable; voice is then
    /// unavailable for the whole run
    pub fn new(config: &VoiceConfig) -> Result<Self> {
        Ok(Self {
            capture: AudioCapture::new()?,
            endpointer: Endpointer::new(EndpointProfile::from_config(config)),
            transcriber: Transcriber::new(config),
            poll_interval: config.poll_interval,
        })
    }
}

#[async_trait(?Send)]
impl SpeechRecognizer for MicRecognizer {
    async fn recognize(&mut self, locale: &str) -> Result<Option<String>> {
        self.endpointer.reset();
        self.capture.start()?;

        let utterance = loop {
            tokio::time::sleep(self.poll_interval).await;
            let chunk = self.capture.drain();
            if let Some(utterance) = self.endpointer.push(&chunk) {
                break utterance;
            }
        };
        self.capture.stop();

        let wav = encode_wav(&utterance, SAMPLE_RATE)?;
        match self.transcriber.transcribe(wav, locale).await {
            Ok(text) if !text.trim().is_empty() => Ok(Some(text)),
            Ok(_) => Ok(None),
            Err(e) => {
                // Non-fatal: report no result, the caller falls back
                tracing::warn!(error = %e, locale, "transcription failed");
                Ok(None)
            }
        }
    }

    async fn stop(&mut self) {
        self.capture.stop();
        self.endpointer.reset();
    }
}
