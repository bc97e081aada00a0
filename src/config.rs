//! Configuration for the talkback client

use std::time::Duration;

use url::Url;

use crate::lang::Lang;
use crate::{Error, Result};

/// Default backend base URL
const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";

/// Default window with no speech before recognition is force-stopped
const DEFAULT_SILENCE_TIMEOUT_MS: u64 = 8000;

/// Default delay before restarting recognition after a natural end.
/// Immediate restarts race the device teardown on some platforms.
const DEFAULT_RESTART_DELAY_MS: u64 = 300;

/// Talkback client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the chat backend (serves `/chat` and `/tts`)
    pub server_url: String,

    /// Language attempted first on every listen
    pub primary_lang: Lang,

    /// Language attempted when the primary yields no transcript
    pub fallback_lang: Lang,

    /// Window with no speech before recognition is force-stopped
    pub silence_timeout: Duration,

    /// Delay before restarting recognition after a natural end
    pub restart_delay: Duration,

    /// Cap on consecutive empty listen attempts before the session
    /// deactivates itself. `None` keeps re-listening indefinitely.
    pub max_listen_retries: Option<u32>,

    /// Voice capture and transcription configuration
    pub voice: VoiceConfig,
}

/// Voice capture and transcription configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Transcription endpoint (OpenAI-compatible)
    pub stt_url: String,

    /// API key for the transcription endpoint, if it requires one
    pub stt_api_key: Option<String>,

    /// Transcription model identifier
    pub stt_model: String,

    /// RMS energy above which a capture chunk counts as speech
    pub energy_threshold: f32,

    /// Minimum utterance length to submit for transcription
    pub min_speech: Duration,

    /// Trailing silence that ends an utterance
    pub trailing_silence: Duration,

    /// Interval at which captured samples are drained into the endpointer
    pub poll_interval: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_url: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            stt_api_key: None,
            stt_model: "whisper-1".to_string(),
            energy_threshold: 0.03,
            min_speech: Duration::from_millis(300),
            trailing_silence: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            primary_lang: Lang::Bn,
            fallback_lang: Lang::En,
            silence_timeout: Duration::from_millis(DEFAULT_SILENCE_TIMEOUT_MS),
            restart_delay: Duration::from_millis(DEFAULT_RESTART_DELAY_MS),
            max_listen_retries: None,
            voice: VoiceConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `TALKBACK_*` environment variables,
    /// falling back to defaults
    ///
    /// # Errors
    ///
    /// Returns error if a set variable fails to parse or validation fails
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = env_var("TALKBACK_SERVER_URL") {
            config.server_url = url;
        }
        if let Some(tag) = env_var("TALKBACK_PRIMARY_LANG") {
            config.primary_lang = Lang::from_tag(&tag)
                .ok_or_else(|| Error::Config(format!("unsupported primary language: {tag}")))?;
        }
        if let Some(tag) = env_var("TALKBACK_FALLBACK_LANG") {
            config.fallback_lang = Lang::from_tag(&tag)
                .ok_or_else(|| Error::Config(format!("unsupported fallback language: {tag}")))?;
        }
        if let Some(ms) = env_var("TALKBACK_SILENCE_TIMEOUT_MS") {
            config.silence_timeout = Duration::from_millis(parse_ms(&ms)?);
        }
        if let Some(ms) = env_var("TALKBACK_RESTART_DELAY_MS") {
            config.restart_delay = Duration::from_millis(parse_ms(&ms)?);
        }
        if let Some(n) = env_var("TALKBACK_MAX_LISTEN_RETRIES") {
            let cap = n
                .parse::<u32>()
                .map_err(|_| Error::Config(format!("invalid retry cap: {n}")))?;
            config.max_listen_retries = Some(cap);
        }
        if let Some(url) = env_var("TALKBACK_STT_URL") {
            config.voice.stt_url = url;
        }
        if let Some(key) = env_var("TALKBACK_STT_API_KEY") {
            config.voice.stt_api_key = Some(key);
        }
        if let Some(model) = env_var("TALKBACK_STT_MODEL") {
            config.voice.stt_model = model;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if a URL is malformed or a timing value is unusable
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.server_url)
            .map_err(|e| Error::Config(format!("invalid server URL {}: {e}", self.server_url)))?;
        Url::parse(&self.voice.stt_url)
            .map_err(|e| Error::Config(format!("invalid STT URL {}: {e}", self.voice.stt_url)))?;

        if self.silence_timeout.is_zero() {
            return Err(Error::Config(
                "silence timeout must be non-zero".to_string(),
            ));
        }
        if self.voice.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be non-zero".to_string()));
        }
        if !(0.0..1.0).contains(&self.voice.energy_threshold) {
            return Err(Error::Config(format!(
                "energy threshold out of range: {}",
                self.voice.energy_threshold
            )));
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_ms(value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("invalid duration (ms): {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.primary_lang, Lang::Bn);
        assert_eq!(config.fallback_lang, Lang::En);
        assert!(config.max_listen_retries.is_none());
    }

    #[test]
    fn test_rejects_bad_server_url() {
        let config = Config {
            server_url: "not a url".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_silence_timeout() {
        let config = Config {
            silence_timeout: Duration::ZERO,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_bad_energy_threshold() {
        let mut config = Config::default();
        config.voice.energy_threshold = 2.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
