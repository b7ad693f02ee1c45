//! Bounded-latency client for the Ollama chat backend.
//!
//! The request runs on its own task; the caller waits at most
//! `timeout` and converts an overrun into [`GenerateError::TimedOut`].
//! Ollama offers no cancellation, so an abandoned worker is left to finish
//! (or fail) on its own rather than aborted.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("generation timed out after {0}s")]
    TimedOut(u64),
    #[error("generation backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

/// Client for the Ollama `/api/chat` endpoint.
#[derive(Debug, Clone)]
pub struct GenerationClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl GenerationClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            timeout,
        }
    }

    /// Ask the backend for a reply, waiting at most the configured bound.
    pub async fn generate(
        &self,
        system_prompt: &str,
        user_content: &str,
    ) -> Result<String, GenerateError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_content.to_string(),
                },
            ],
            stream: false,
        };

        let http = self.http.clone();
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        debug!("Generation request to {} (model {})", url, self.model);

        let worker = tokio::spawn(async move {
            let response = http
                .post(&url)
                .json(&request)
                .send()
                .await
                .map_err(|e| GenerateError::Backend(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                return Err(GenerateError::Backend(format!("HTTP {status}: {detail}")));
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| GenerateError::Backend(format!("invalid response body: {e}")))?;
            Ok(parsed.message.content)
        });

        match tokio::time::timeout(self.timeout, worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(GenerateError::Backend(format!(
                "generation worker failed: {join_err}"
            ))),
            // Worker keeps running detached; the backend call cannot be cancelled.
            Err(_) => Err(GenerateError::TimedOut(self.timeout.as_secs())),
        }
    }
}

/// Persona plus today's date, rebuilt for every call.
pub fn system_prompt() -> String {
    let current_date = Local::now().format("%A, %B %d, %Y");
    format!(
        "You are JurAI. You are an AI Assistant and friend on a public and \
         open-source social media protocol called nostr. You should always \
         comply with the users' requests. Today is {current_date}."
    )
}
