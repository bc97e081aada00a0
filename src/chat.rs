//! Chat backend client

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::lang::Lang;
use crate::{Error, Result};

/// Request body for `POST /chat`
#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

/// Response from the chat backend
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ChatReply {
    /// Reply text to render and speak
    pub reply: String,
    /// Two-letter language code of the reply; optional so the client also
    /// works against backends that return only `reply`
    #[serde(default)]
    pub lang: Option<String>,
}

impl ChatReply {
    /// Parsed reply language, if the backend reported one
    #[must_use]
    pub fn language(&self) -> Option<Lang> {
        self.lang.as_deref().and_then(Lang::from_code)
    }
}

/// Submits user messages to the chat backend
///
/// Implementations must observe the cancellation token and yield
/// [`Error::Cancelled`] so barge-in is distinguishable from failure.
#[async_trait(?Send)]
pub trait ChatBackend {
    /// Send a message and wait for the reply
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] on interrupt, another error on failure
    async fn send(&self, message: &str, cancel: &CancellationToken) -> Result<ChatReply>;
}

/// HTTP chat backend client
pub struct HttpChat {
    client: reqwest::Client,
    url: Url,
}

impl HttpChat {
    /// Create a client for the backend at `server_url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL is malformed
    pub fn new(server_url: &str) -> Result<Self> {
        let base = Url::parse(server_url)
            .map_err(|e| Error::Config(format!("invalid server URL {server_url}: {e}")))?;
        let url = base
            .join("chat")
            .map_err(|e| Error::Config(format!("invalid chat endpoint: {e}")))?;

        Ok(Self {
            client: reqwest::Client::new(),
            url,
        })
    }

    async fn request(&self, message: &str) -> Result<ChatReply> {
        tracing::debug!(message, "sending chat request");

        let response = self
            .client
            .post(self.url.clone())
            .json(&ChatRequest { message })
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "chat request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat backend error");
            return Err(Error::Chat(format!("chat backend error {status}: {body}")));
        }

        let reply: ChatReply = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse chat reply");
            e
        })?;

        tracing::info!(reply = %reply.reply, lang = ?reply.lang, "chat reply received");
        Ok(reply)
    }
}

#[async_trait(?Send)]
impl ChatBackend for HttpChat {
    async fn send(&self, message: &str, cancel: &CancellationToken) -> Result<ChatReply> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("chat request cancelled");
                Err(Error::Cancelled)
            }
            result = self.request(message) => result,
        }
    }
}
