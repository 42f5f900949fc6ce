//! Speech-to-text
//!
//! The engine is a black box: hand it a WAV, get back the best-effort
//! transcript of the whole buffer. `CumulativeStreamer` turns that into
//! practical streaming — buffer PCM, and every ~0.8 s re-transcribe the
//! entire (tail-capped) buffer to produce a cumulative transcript.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::audio;
use crate::config::SttConfig;
use crate::llm::prompts::Lang;

/// Cumulative transcription engine
#[async_trait]
pub trait SttEngine: Send + Sync {
    /// Transcribe a complete WAV byte string
    async fn transcribe_wav(&self, wav: &[u8], language: Option<Lang>) -> Result<String>;
}

/// STT engine backed by the faster-whisper helper process.
///
/// The helper keeps its model cached per (size, device, compute_type), so
/// repeated invocations only pay subprocess startup. Audio goes in as
/// base64 WAV on stdin; the result comes back as `{"text": ..., "error": ...}`.
pub struct WhisperSubprocess {
    config: SttConfig,
    timeout: Duration,
}

impl WhisperSubprocess {
    pub fn new(config: SttConfig) -> Self {
        Self {
            config,
            timeout: Duration::from_secs(120),
        }
    }

    /// Transcribe with one retry to absorb model cold start.
    async fn transcribe_b64(&self, audio_b64: &str, language: Option<Lang>) -> Result<String> {
        let mut last_err = None;
        for attempt in 0..2 {
            if attempt > 0 {
                info!("Retrying transcription (attempt {})", attempt + 1);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            match self.run_whisper(audio_b64, language).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    debug!("Transcription attempt {} failed: {}", attempt + 1, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Transcription failed")))
    }

    async fn run_whisper(&self, audio_b64: &str, language: Option<Lang>) -> Result<String> {
        use tokio::io::AsyncWriteExt;

        let mut cmd = tokio::process::Command::new("python3");
        cmd.arg(&self.config.script_path)
            .arg("-") // read audio from stdin
            .arg(&self.config.model_size)
            .arg("--device")
            .arg(&self.config.device)
            .arg("--compute-type")
            .arg(&self.config.compute_type)
            .arg("--beam-size")
            .arg(self.config.beam_size.to_string());
        if let Some(lang) = language {
            cmd.arg("--language").arg(lang.code());
        }
        if self.config.vad_filter {
            cmd.arg("--vad-filter");
        }

        let mut child = cmd
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .context("Failed to spawn faster-whisper process")?;

        let mut stdin = child.stdin.take().context("No stdin")?;
        let b64_owned = audio_b64.to_string();
        tokio::spawn(async move {
            let _ = stdin.write_all(b64_owned.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow::anyhow!("Transcription timeout ({}s)", self.timeout.as_secs()))?
            .context("Failed to wait for faster-whisper")?;

        if !output.status.success() {
            anyhow::bail!(
                "faster-whisper error: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let result: serde_json::Value =
            serde_json::from_slice(&output.stdout).context("Failed to parse transcription result")?;

        if let Some(error) = result.get("error").and_then(|e| e.as_str()) {
            if !error.is_empty() {
                anyhow::bail!("Transcription error: {}", error);
            }
        }

        Ok(result
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string())
    }
}

#[async_trait]
impl SttEngine for WhisperSubprocess {
    async fn transcribe_wav(&self, wav: &[u8], language: Option<Lang>) -> Result<String> {
        if wav.is_empty() {
            return Ok(String::new());
        }
        let audio_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, wav);
        self.transcribe_b64(&audio_b64, language).await
    }
}

/// PCM buffer with cumulative-transcription cadence.
///
/// Pushes accumulate raw PCM16; once `min_interval` has elapsed since the
/// previous transcription and the buffer is non-empty, `ready()` turns
/// true and the caller snapshots the whole buffer as a WAV. The buffer is
/// hard-capped to the trailing `max_sec` seconds so a long session cannot
/// grow the per-tick transcription cost without bound.
pub struct CumulativeStreamer {
    buf: Vec<u8>,
    last_ts: Option<Instant>,
    min_interval: Duration,
    max_bytes: usize,
}

impl CumulativeStreamer {
    pub fn new() -> Self {
        Self::with_tuning(Duration::from_millis(800), 15.0)
    }

    pub fn with_tuning(min_interval: Duration, max_sec: f64) -> Self {
        let max_bytes =
            (max_sec * audio::SAMPLE_RATE as f64) as usize * audio::BYTES_PER_SAMPLE;
        Self {
            buf: Vec::new(),
            last_ts: None,
            min_interval,
            max_bytes,
        }
    }

    /// Append PCM16 bytes, dropping the oldest audio past the tail cap.
    pub fn push(&mut self, pcm16: &[u8]) {
        self.buf.extend_from_slice(pcm16);
        if self.buf.len() > self.max_bytes {
            let drop = self.buf.len() - self.max_bytes;
            self.buf.drain(..drop);
        }
    }

    pub fn ready(&self) -> bool {
        if self.buf.is_empty() {
            return false;
        }
        match self.last_ts {
            None => true,
            Some(ts) => ts.elapsed() >= self.min_interval,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Snapshot the buffer as a WAV and stamp the transcription time.
    pub fn take_wav(&mut self) -> Result<Vec<u8>> {
        self.last_ts = Some(Instant::now());
        audio::pcm_bytes_to_wav(&self.buf, audio::SAMPLE_RATE)
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.last_ts = None;
    }
}

impl Default for CumulativeStreamer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streamer_tail_cap() {
        // 1-second cap = 32000 bytes
        let mut s = CumulativeStreamer::with_tuning(Duration::from_millis(0), 1.0);
        s.push(&vec![1u8; 40_000]);
        assert_eq!(s.buf.len(), 32_000);

        // newest bytes survive
        s.push(&[9u8; 4]);
        assert_eq!(s.buf.len(), 32_000);
        assert_eq!(&s.buf[s.buf.len() - 4..], &[9, 9, 9, 9]);
    }

    #[test]
    fn test_streamer_ready_gating() {
        let mut s = CumulativeStreamer::with_tuning(Duration::from_secs(60), 15.0);
        assert!(!s.ready(), "empty buffer is never ready");

        s.push(&[0u8; 640]);
        assert!(s.ready(), "first transcription needs no interval");

        let _ = s.take_wav().unwrap();
        assert!(!s.ready(), "interval not yet elapsed");
    }

    #[test]
    fn test_take_wav_produces_riff() {
        let mut s = CumulativeStreamer::new();
        s.push(&[0u8; 320]);
        let wav = s.take_wav().unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
    }
}
