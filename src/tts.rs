//! Text-to-speech
//!
//! The engine speaks an OpenAI-compatible `/v1/audio/speech` endpoint and
//! returns WAV bytes. Header normalization and PCM conversion live in
//! `audio`; the streaming/pacing logic for embedded clients lives with the
//! assistant WebSocket handler, which owns the socket.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::config::TtsConfig;

/// Text-to-WAV synthesis engine
#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Synthesize text into a complete WAV byte string.
    /// Empty text yields empty bytes.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// HTTP TTS client
pub struct HttpTts {
    client: Client,
    base_url: String,
    voice: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

impl HttpTts {
    pub fn new(base_url: &str, voice: &str) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            voice: voice.to_string(),
        }
    }

    pub fn from_config(config: &TtsConfig) -> Self {
        Self::new(&config.url, &config.voice)
    }
}

#[async_trait]
impl TtsEngine for HttpTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        debug!("TTS synthesizing {} chars", text.len());

        let request = SpeechRequest {
            model: "tts-1",
            input: text,
            voice: &self.voice,
            response_format: "wav",
        };

        let response = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .json(&request)
            .send()
            .await
            .context("Failed to connect to TTS server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("TTS error ({}): {}", status, body);
        }

        let wav_bytes = response
            .bytes()
            .await
            .context("Failed to read TTS response")?
            .to_vec();

        // Upstream encoders sometimes leave streaming placeholders in the
        // header; re-wrap with the true frame count.
        crate::audio::normalize_wav(&wav_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trimmed() {
        let tts = HttpTts::new("http://localhost:3001/", "af_heart");
        assert_eq!(tts.base_url, "http://localhost:3001");
        assert_eq!(tts.voice, "af_heart");
    }
}
