//! Configuration management
//!
//! All knobs are environment-driven so the backend can run unchanged on a
//! workstation, a LAN box next to the ESP devices, or inside a container.
//! Every field has a default that works for local development.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Ollama LLM endpoint settings
    #[serde(default)]
    pub llm: LlmConfig,
    /// Speech-to-text engine settings
    #[serde(default)]
    pub stt: SttConfig,
    /// Text-to-speech engine settings
    #[serde(default)]
    pub tts: TtsConfig,
    /// ESP relay / sensor endpoints
    #[serde(default)]
    pub esp: EspConfig,
    /// Assistant reply shaping
    #[serde(default)]
    pub assistant: AssistantConfig,
    /// Live translation pipeline tuning
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Data directory for history files and the SQLite store
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the Ollama server
    #[serde(default = "default_ollama_url")]
    pub url: String,
    /// Model name (e.g. "gemma2:9b", "qwen2.5:14b")
    #[serde(default = "default_ollama_model")]
    pub model: String,
    /// System prompt for free-form assistant chat
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_ollama_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_ollama_model() -> String {
    "gemma2:9b".to_string()
}

fn default_system_prompt() -> String {
    "You are Vi Assistant. Reply with plain text only. \
     Always respond in English. \
     Do not use emojis, icons, or markdown. \
     Keep responses concise and natural."
        .to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            model: default_ollama_model(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// Whisper model size (tiny, base, small, medium, large-v3)
    #[serde(default = "default_stt_model")]
    pub model_size: String,
    /// Inference device (cpu, cuda)
    #[serde(default = "default_stt_device")]
    pub device: String,
    /// Compute type passed to faster-whisper
    #[serde(default = "default_stt_compute")]
    pub compute_type: String,
    /// Path to the faster-whisper helper script
    #[serde(default = "default_stt_script")]
    pub script_path: String,
    /// Beam size for decoding
    #[serde(default = "default_beam_size")]
    pub beam_size: u32,
    /// Whether the engine-side VAD filter is enabled
    #[serde(default)]
    pub vad_filter: bool,
}

fn default_stt_model() -> String {
    "medium".to_string()
}

fn default_stt_device() -> String {
    "cpu".to_string()
}

fn default_stt_compute() -> String {
    "int8_float32".to_string()
}

fn default_stt_script() -> String {
    "/usr/local/bin/faster-whisper-server.py".to_string()
}

fn default_beam_size() -> u32 {
    2
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model_size: default_stt_model(),
            device: default_stt_device(),
            compute_type: default_stt_compute(),
            script_path: default_stt_script(),
            beam_size: default_beam_size(),
            vad_filter: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Base URL of the TTS HTTP server
    #[serde(default = "default_tts_url")]
    pub url: String,
    /// Voice name
    #[serde(default = "default_tts_voice")]
    pub voice: String,
    /// Leading silence prepended to each utterance, in milliseconds.
    /// Bluetooth speakers clip the first syllable without it.
    #[serde(default = "default_lead_silence_ms")]
    pub lead_silence_ms: u32,
    /// Binary frame size for embedded streaming, bytes (16-bit aligned)
    #[serde(default = "default_stream_chunk_bytes")]
    pub stream_chunk_bytes: usize,
    /// Chunks sent back-to-back before pacing kicks in
    #[serde(default = "default_prefill_chunks")]
    pub stream_prefill_chunks: usize,
    /// Multiplier on natural chunk duration for inter-chunk sleep (0.5–1.2)
    #[serde(default = "default_pace_factor")]
    pub stream_pace_factor: f64,
}

fn default_tts_url() -> String {
    "http://127.0.0.1:3001".to_string()
}

fn default_tts_voice() -> String {
    "af_heart".to_string()
}

fn default_lead_silence_ms() -> u32 {
    120
}

fn default_stream_chunk_bytes() -> usize {
    1024
}

fn default_prefill_chunks() -> usize {
    6
}

fn default_pace_factor() -> f64 {
    0.9
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            url: default_tts_url(),
            voice: default_tts_voice(),
            lead_silence_ms: default_lead_silence_ms(),
            stream_chunk_bytes: default_stream_chunk_bytes(),
            stream_prefill_chunks: default_prefill_chunks(),
            stream_pace_factor: default_pace_factor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EspConfig {
    /// Base URL of the ESP relay/sensor board
    #[serde(default = "default_esp_url")]
    pub base_url: String,
}

fn default_esp_url() -> String {
    "http://192.168.1.111".to_string()
}

impl Default for EspConfig {
    fn default() -> Self {
        Self {
            base_url: default_esp_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Hard character ceiling for spoken replies
    #[serde(default = "default_max_reply_chars")]
    pub max_reply_chars: usize,
    /// Maximum sentences per spoken reply
    #[serde(default = "default_max_sentences")]
    pub max_sentences: usize,
    /// LLM rewrite attempts before the deterministic sanitizer takes over
    #[serde(default = "default_rewrite_retries")]
    pub rewrite_retries: u32,
    /// Maximum persisted assistant turns per history file
    #[serde(default = "default_history_max")]
    pub history_max_entries: usize,
}

fn default_max_reply_chars() -> usize {
    220
}

fn default_max_sentences() -> usize {
    2
}

fn default_rewrite_retries() -> u32 {
    2
}

fn default_history_max() -> usize {
    50
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            max_reply_chars: default_max_reply_chars(),
            max_sentences: default_max_sentences(),
            rewrite_retries: default_rewrite_retries(),
            history_max_entries: default_history_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Minimum normalized characters before a slice may commit
    #[serde(default = "default_min_commit_chars")]
    pub min_commit_chars: usize,
    /// Seconds of STT idleness that force a pause-commit
    #[serde(default = "default_pause_sec")]
    pub pause_commit_sec: f64,
    /// Summary refresh period, seconds
    #[serde(default = "default_summary_period")]
    pub summary_period_sec: u64,
    /// Run the source-refinement LLM pass before the final translation
    #[serde(default)]
    pub refine_before_final: bool,
}

fn default_min_commit_chars() -> usize {
    10
}

fn default_pause_sec() -> f64 {
    1.2
}

fn default_summary_period() -> u64 {
    10
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_commit_chars: default_min_commit_chars(),
            pause_commit_sec: default_pause_sec(),
            summary_period_sec: default_summary_period(),
            refine_before_final: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vivoice")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            stt: SttConfig::default(),
            tts: TtsConfig::default(),
            esp: EspConfig::default(),
            assistant: AssistantConfig::default(),
            pipeline: PipelineConfig::default(),
            data_dir: default_data_dir(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.trim().parse().ok())
}

impl Config {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Some(v) = env_var("OLLAMA_URL") {
            cfg.llm.url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = env_var("OLLAMA_MODEL") {
            cfg.llm.model = v;
        }
        if let Some(v) = env_var("AI_SYSTEM_PROMPT") {
            cfg.llm.system_prompt = v;
        }

        if let Some(v) = env_var("VI_STT_MODEL") {
            cfg.stt.model_size = v;
        }
        if let Some(v) = env_var("VI_STT_DEVICE") {
            cfg.stt.device = v;
        }
        if let Some(v) = env_var("VI_STT_COMPUTE") {
            cfg.stt.compute_type = v;
        }
        if let Some(v) = env_var("VI_STT_SCRIPT") {
            cfg.stt.script_path = v;
        }

        if let Some(v) = env_var("VI_TTS_URL") {
            cfg.tts.url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = env_var("VI_TTS_VOICE") {
            cfg.tts.voice = v;
        }
        if let Some(v) = env_parse("VI_TTS_LEAD_SIL_MS") {
            cfg.tts.lead_silence_ms = v;
        }
        if let Some(v) = env_parse::<usize>("VI_ESP_TTS_STREAM_CHUNK_BYTES") {
            // frames must stay aligned to 16-bit samples
            cfg.tts.stream_chunk_bytes = (v.max(2) / 2) * 2;
        }
        if let Some(v) = env_parse("VI_ESP_TTS_STREAM_PREFILL_CHUNKS") {
            cfg.tts.stream_prefill_chunks = v;
        }
        if let Some(v) = env_parse::<f64>("VI_ESP_TTS_STREAM_PACE_FACTOR") {
            cfg.tts.stream_pace_factor = v.clamp(0.5, 1.2);
        }

        if let Some(v) = env_var("ESP_BASE_URL") {
            cfg.esp.base_url = v.trim_end_matches('/').to_string();
        }

        if let Some(v) = env_parse("VI_MAX_AI_RESPONSE_CHARS") {
            cfg.assistant.max_reply_chars = v;
        }
        if let Some(v) = env_parse("VI_AI_MAX_SENTENCES") {
            cfg.assistant.max_sentences = v;
        }
        if let Some(v) = env_parse("VI_AI_REWRITE_RETRIES") {
            cfg.assistant.rewrite_retries = v;
        }
        if let Some(v) = env_parse("VI_HISTORY_FILE_MAX_ENTRIES") {
            cfg.assistant.history_max_entries = v;
        }

        if let Some(v) = env_parse("VI_MIN_COMMIT_CHARS") {
            cfg.pipeline.min_commit_chars = v;
        }
        if let Some(v) = env_parse::<f64>("VI_PAUSE_COMMIT_SEC") {
            cfg.pipeline.pause_commit_sec = v.clamp(0.5, 1.8);
        }
        if let Some(v) = env_parse("VI_SUMMARY_PERIOD_SEC") {
            cfg.pipeline.summary_period_sec = v;
        }
        if let Some(v) = env_var("VI_REFINE_BEFORE_FINAL") {
            cfg.pipeline.refine_before_final = matches!(v.as_str(), "1" | "true" | "yes");
        }

        if let Some(v) = env_var("VI_DATA_DIR") {
            cfg.data_dir = PathBuf::from(v);
        }

        cfg
    }
}
