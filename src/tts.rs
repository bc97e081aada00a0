//! Text-to-speech client
//!
//! The backend synthesizes replies and hands back a URL to the rendered
//! audio; the client fetches it with a cache-busting query parameter so a
//! repeated reply is never served stale.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{Error, Result};

/// Request body for `POST /tts`
#[derive(serde::Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
}

/// Response from the TTS backend; a missing `audio_url` signals failure
#[derive(Debug, serde::Deserialize)]
struct TtsResponse {
    #[serde(default)]
    audio_url: Option<String>,
}

/// Synthesizes a reply into playable audio bytes
#[async_trait(?Send)]
pub trait SpeechSynthesizer {
    /// Synthesize text and fetch the resulting audio
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] on interrupt, [`Error::Tts`] when the
    /// backend yields no playable resource
    async fn synthesize(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<u8>>;
}

/// HTTP TTS client for the backend's `/tts` endpoint
pub struct HttpTts {
    client: reqwest::Client,
    base: Url,
    url: Url,
}

impl HttpTts {
    /// Create a client for the backend at `server_url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL is malformed
    pub fn new(server_url: &str) -> Result<Self> {
        let base = Url::parse(server_url)
            .map_err(|e| Error::Config(format!("invalid server URL {server_url}: {e}")))?;
        let url = base
            .join("tts")
            .map_err(|e| Error::Config(format!("invalid tts endpoint: {e}")))?;

        Ok(Self {
            client: reqwest::Client::new(),
            base,
            url,
        })
    }

    async fn request(&self, text: &str) -> Result<Vec<u8>> {
        tracing::debug!(text, "requesting speech synthesis");

        let response = self
            .client
            .post(self.url.clone())
            .json(&TtsRequest { text })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS backend error {status}: {body}")));
        }

        let parsed: TtsResponse = response.json().await?;
        let Some(audio_url) = parsed.audio_url else {
            return Err(Error::Tts("no audio resource in TTS response".to_string()));
        };

        let mut audio_url = self
            .base
            .join(&audio_url)
            .map_err(|e| Error::Tts(format!("invalid audio URL {audio_url}: {e}")))?;
        append_cache_buster(&mut audio_url);

        let audio = self.client.get(audio_url.clone()).send().await?;
        let status = audio.status();
        if !status.is_success() {
            return Err(Error::Tts(format!("audio fetch error {status}")));
        }

        let bytes = audio.bytes().await?;
        tracing::debug!(url = %audio_url, bytes = bytes.len(), "audio fetched");
        Ok(bytes.to_vec())
    }
}

#[async_trait(?Send)]
impl SpeechSynthesizer for HttpTts {
    async fn synthesize(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            result = self.request(text) => result,
        }
    }
}

/// Append a millisecond-timestamp query parameter
fn append_cache_buster(url: &mut Url) {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    url.query_pairs_mut().append_pair("ts", &ts.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_buster_appends_param() {
        let mut url = Url::parse("http://localhost:5000/static/tts/a.mp3").unwrap();
        append_cache_buster(&mut url);
        assert!(url.query_pairs().any(|(k, _)| k == "ts"));
    }

    #[test]
    fn test_cache_buster_preserves_existing_query() {
        let mut url = Url::parse("http://localhost:5000/a.mp3?voice=verse").unwrap();
        append_cache_buster(&mut url);
        assert!(url.query_pairs().any(|(k, v)| k == "voice" && v == "verse"));
        assert!(url.query_pairs().any(|(k, _)| k == "ts"));
    }

    #[test]
    fn test_absolute_audio_url_replaces_base() {
        let base = Url::parse("http://localhost:5000/").unwrap();
        let joined = base.join("http://cdn.example.com/a.mp3").unwrap();
        assert_eq!(joined.host_str(), Some("cdn.example.com"));
    }
}
