use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::CompletionConfig;

/// Result of one completion round trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Reply(String),
    /// The backend answered but the body held no reply
    Empty,
    /// The backend could not be reached or kept failing
    Unavailable,
}

/// Text generation backend addressed by routing slug
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, slug: &str, prompt: &str) -> CompletionOutcome;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Pull `choices[0].message.content` out of a response body
fn extract_reply(body: &str) -> Option<String> {
    let response: ChatResponse = serde_json::from_str(body).ok()?;
    response
        .choices
        .into_iter()
        .next()?
        .message?
        .content
        .filter(|c| !c.trim().is_empty())
}

enum Attempt {
    Done(CompletionOutcome),
    Retry,
}

/// HTTP client for the completion worker
pub struct LlmClient {
    client: reqwest::Client,
    config: CompletionConfig,
}

impl LlmClient {
    pub fn new(config: CompletionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build completion HTTP client")?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, slug: &str) -> String {
        format!(
            "{}/{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/'),
            slug
        )
    }

    async fn attempt(&self, url: &str, prompt: &str) -> Attempt {
        let response = match self
            .client
            .get(url)
            .query(&[("prompt", prompt)])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("Completion request failed: {}", e);
                return Attempt::Retry;
            }
        };

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("Completion backend returned {}", status);
            return Attempt::Retry;
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                warn!("Failed to read completion body: {}", e);
                return Attempt::Retry;
            }
        };

        if !status.is_success() {
            warn!("Completion backend rejected request ({}): {}", status, body);
            return Attempt::Done(CompletionOutcome::Empty);
        }

        match extract_reply(&body) {
            Some(reply) => Attempt::Done(CompletionOutcome::Reply(reply)),
            None => {
                debug!("Completion body carried no reply: {}", body);
                Attempt::Done(CompletionOutcome::Empty)
            }
        }
    }
}

#[async_trait]
impl Completer for LlmClient {
    async fn complete(&self, slug: &str, prompt: &str) -> CompletionOutcome {
        let url = self.endpoint(slug);
        debug!("Sending completion request to {}", url);

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = self.config.retry_backoff_ms * u64::from(attempt);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                debug!("Retrying completion request (attempt {})", attempt + 1);
            }
            if let Attempt::Done(outcome) = self.attempt(&url, prompt).await {
                return outcome;
            }
        }

        warn!("Completion backend unavailable for slug {}", slug);
        CompletionOutcome::Unavailable
    }
}
