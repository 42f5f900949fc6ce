//! Ollama LLM client
//!
//! Speaks the Ollama HTTP protocol: `/api/chat` for role-tagged
//! conversations and `/api/generate` for bare prompts. Streaming responses
//! are newline-delimited JSON; each line carries a partial `message.content`
//! (chat) or `response` (generate) and a terminal `{done:true}` marker.
//!
//! The `Generator` and `ChatEngine` traits are the seams the pipeline
//! workers depend on, so tests can substitute deterministic engines.

pub mod prompts;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const READ_TIMEOUT: Duration = Duration::from_secs(120);
const TEMPERATURE: f64 = 0.2;

/// One chat turn on the wire
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// One-shot and streaming prompt completion (`/api/generate`)
#[async_trait]
pub trait Generator: Send + Sync {
    /// Complete a prompt, returning the full response text.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Stream a prompt completion. Chunks are forwarded over `chunk_tx` as
    /// they arrive; the accumulated text is returned on success. An error
    /// mid-stream returns `Err` even if chunks were already forwarded.
    async fn generate_stream(
        &self,
        prompt: &str,
        chunk_tx: mpsc::UnboundedSender<String>,
    ) -> Result<String>;
}

/// Role-tagged conversation completion (`/api/chat`)
#[async_trait]
pub trait ChatEngine: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        chunk_tx: mpsc::UnboundedSender<String>,
    ) -> Result<String>;
}

/// Production Ollama client
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: Options,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: Options,
}

#[derive(Serialize)]
struct Options {
    temperature: f64,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str) -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    pub fn from_config(config: &crate::config::LlmConfig) -> Self {
        Self::new(&config.url, &config.model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn post_json(&self, path: &str, body: &impl Serialize) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .context("Failed to reach the LLM endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("LLM API error ({}): {}", status, body);
        }
        Ok(response)
    }

    /// Consume an NDJSON stream, extracting text with `pick` and forwarding
    /// each non-empty chunk. Returns the accumulated text.
    async fn drain_ndjson(
        response: reqwest::Response,
        pick: fn(&serde_json::Value) -> Option<&str>,
        chunk_tx: &mpsc::UnboundedSender<String>,
    ) -> Result<String> {
        let mut stream = response.bytes_stream();
        let mut full = String::new();
        let mut buffer = String::new();

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Failed to read stream chunk")?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);
                if line.is_empty() {
                    continue;
                }

                let obj: serde_json::Value =
                    serde_json::from_str(&line).context("Malformed stream line")?;

                if let Some(text) = pick(&obj) {
                    if !text.is_empty() {
                        full.push_str(text);
                        // Receiver dropping means the consumer went away;
                        // finish draining silently.
                        let _ = chunk_tx.send(text.to_string());
                    }
                }

                if obj.get("done").and_then(|d| d.as_bool()) == Some(true) {
                    break 'outer;
                }
            }
        }

        Ok(full)
    }
}

fn pick_generate(obj: &serde_json::Value) -> Option<&str> {
    obj.get("response").and_then(|r| r.as_str())
}

fn pick_chat(obj: &serde_json::Value) -> Option<&str> {
    obj.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
}

#[async_trait]
impl Generator for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: Options {
                temperature: TEMPERATURE,
            },
        };
        let response = self.post_json("/api/generate", &request).await?;
        let data: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse generate response")?;
        Ok(data
            .get("response")
            .and_then(|r| r.as_str())
            .unwrap_or("")
            .trim()
            .to_string())
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        chunk_tx: mpsc::UnboundedSender<String>,
    ) -> Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: true,
            options: Options {
                temperature: TEMPERATURE,
            },
        };
        let response = self.post_json("/api/generate", &request).await?;
        Self::drain_ndjson(response, pick_generate, &chunk_tx).await
    }
}

#[async_trait]
impl ChatEngine for OllamaClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: Options {
                temperature: TEMPERATURE,
            },
        };
        let response = self.post_json("/api/chat", &request).await?;
        let data: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse chat response")?;
        let content = data
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if content.is_empty() {
            Ok("No response.".to_string())
        } else {
            Ok(content)
        }
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        chunk_tx: mpsc::UnboundedSender<String>,
    ) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
            options: Options {
                temperature: TEMPERATURE,
            },
        };
        let response = self.post_json("/api/chat", &request).await?;
        Self::drain_ndjson(response, pick_chat, &chunk_tx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_roles() {
        assert_eq!(ChatMessage::system("x").role, "system");
        assert_eq!(ChatMessage::user("x").role, "user");
        assert_eq!(ChatMessage::assistant("x").role, "assistant");
    }

    #[test]
    fn test_pick_functions() {
        let gen: serde_json::Value = serde_json::json!({"response": "abc", "done": false});
        assert_eq!(pick_generate(&gen), Some("abc"));

        let chat: serde_json::Value = serde_json::json!({"message": {"content": "xyz"}});
        assert_eq!(pick_chat(&chat), Some("xyz"));
        assert_eq!(pick_generate(&chat), None);
    }

    #[test]
    fn test_base_url_trimmed() {
        let c = OllamaClient::new("http://localhost:11434/", "m");
        assert_eq!(c.base_url, "http://localhost:11434");
    }
}
