//! Telegram Bot API client (`sendMessage`, Markdown)

use std::time::Duration;

use super::NotifyError;

const API_BASE: &str = "https://api.telegram.org";

/// Minimal Telegram sender for alert text.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    chat_id: String,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("base_url", &self.base_url)
            .field("chat_id", &self.chat_id)
            .finish_non_exhaustive()
    }
}

impl TelegramClient {
    pub fn new(token: &str, chat_id: &str, timeout: Duration) -> Result<Self, NotifyError> {
        Self::with_base_url(API_BASE, token, chat_id, timeout)
    }

    /// Client against a non-default API host (self-hosted Bot API server).
    pub fn with_base_url(
        base_url: &str,
        token: &str,
        chat_id: &str,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        if token.is_empty() || chat_id.is_empty() {
            return Err(NotifyError::NotConfigured);
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    /// Send `text` to the configured chat.
    pub async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });

        let resp = self
            .http
            .post(format!("{}/bot{}/sendMessage", self.base_url, self.token))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotifyError::Timeout
                } else {
                    // reqwest errors embed the URL, which carries the token
                    NotifyError::Transport(e.without_url().to_string())
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_credentials_are_not_configured() {
        let err = TelegramClient::new("", "123", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, NotifyError::NotConfigured));
    }

    #[test]
    fn debug_hides_token() {
        let c = TelegramClient::new("secret-token", "42", Duration::from_secs(5)).unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("secret-token"));
        assert!(dbg.contains("42"));
    }
}
