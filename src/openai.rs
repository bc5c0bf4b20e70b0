//! Shared HTTP client for OpenAI-compatible JSON APIs.
//!
//! Both the embedding and the generation adapters talk to endpoints of the
//! same shape: `POST {base_url}/{path}` with a bearer token and a JSON body.
//! Transient failures (HTTP 429, 5xx, transport errors) are retried with
//! exponential backoff capped at 32s; any other non-success status fails
//! immediately.

use anyhow::{bail, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiClient {
    /// Used in log lines and error messages, e.g. `"embedding"`.
    purpose: &'static str,
    base_url: String,
    api_key: String,
    max_retries: u32,
    http: reqwest::Client,
}

impl OpenAiClient {
    /// Build a client whose key comes from `OPENAI_API_KEY`.
    pub fn from_env(
        purpose: &'static str,
        base_url: Option<&str>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            purpose,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            max_retries,
            http,
        })
    }

    /// POST `body` to `path` and decode the JSON reply into `T`.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff(attempt);
                debug!(purpose = self.purpose, attempt, delay_secs = delay.as_secs(), "retrying request");
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(purpose = self.purpose, error = %e, "request failed");
                    last_err = Some(anyhow::Error::from(e));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response.json::<T>().await?);
            }
            let body_text = response.text().await.unwrap_or_default();
            let err = anyhow::anyhow!("{} API error {}: {}", self.purpose, status, body_text);
            if !is_transient(status) {
                return Err(err);
            }
            warn!(purpose = self.purpose, %status, "transient API error");
            last_err = Some(err);
        }

        match last_err {
            Some(e) => Err(e),
            None => bail!("{} request failed after retries", self.purpose),
        }
    }
}

/// Delay before retry number `attempt` (1-based): 1s, 2s, 4s, ... 32s.
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(4), Duration::from_secs(8));
        assert_eq!(backoff(9), Duration::from_secs(32));
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient(StatusCode::BAD_GATEWAY));
        assert!(!is_transient(StatusCode::UNAUTHORIZED));
        assert!(!is_transient(StatusCode::BAD_REQUEST));
    }
}
