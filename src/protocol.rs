//! WebSocket wire protocol
//!
//! All control messages are JSON objects discriminated by a `type` field.
//! Audio travels either as base64 inside `audio.chunk` or as out-of-band
//! binary frames (raw PCM16 LE mono 16 kHz in both directions).

use serde::{Deserialize, Serialize};

/// Inbound control messages from the client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "init")]
    Init {
        title_id: String,
        #[serde(default)]
        title_name: Option<String>,
        stt_language: String,
        translate_source: String,
        translate_target: String,
    },
    #[serde(rename = "start")]
    Start {
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        client: Option<String>,
    },
    #[serde(rename = "audio.chunk")]
    AudioChunk { pcm16_b64: String },
    #[serde(rename = "stop")]
    Stop,
    #[serde(rename = "utt.commit")]
    UttCommit,
    #[serde(rename = "chat.send")]
    ChatSend {
        conversation_id: i64,
        message: String,
    },
}

/// Outbound events to the client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "ack")]
    Ack { status: String },
    /// Current draft; the UI replaces its draft region with `text`
    #[serde(rename = "stt.delta")]
    SttDelta { text: String },
    /// Committed source segment; the UI appends to history
    #[serde(rename = "stt.commit")]
    SttCommit { text: String },
    /// Append `delta` to the in-flight target region
    #[serde(rename = "translation.delta")]
    TranslationDelta { delta: String },
    /// Finalize the current target segment
    #[serde(rename = "translation.commit")]
    TranslationCommit { text: String },
    #[serde(rename = "summary.update")]
    SummaryUpdate { summary: String },
    #[serde(rename = "final.result")]
    FinalResult {
        source: String,
        target: String,
        summary: String,
    },
    /// Binary PCM frames follow until `tts_end`
    #[serde(rename = "tts_start")]
    TtsStart {
        audio_format: String,
        sample_rate: u32,
        channels: u16,
        bits_per_sample: u16,
    },
    #[serde(rename = "tts_end")]
    TtsEnd,
    #[serde(rename = "chat.start")]
    ChatStart { conversation_id: i64 },
    #[serde(rename = "chat.delta")]
    ChatDelta { text_delta: String },
    #[serde(rename = "chat.done")]
    ChatDone { conversation_id: i64 },
    #[serde(rename = "chat.error")]
    ChatError { error: String },
    /// Assistant-flavor terminal payload
    #[serde(rename = "result")]
    Result(Box<AssistantResult>),
    #[serde(rename = "error")]
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

/// Full assistant reply payload sent once per utterance
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssistantResult {
    pub ok: bool,
    pub stt_text: String,
    pub ai_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_action: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor_query: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor_result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_b64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_mime: Option<String>,
    /// Set when binary PCM streaming follows instead of `audio_b64`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
}

/// Error tags emitted on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("bad_json")]
    BadJson,
    #[error("unknown_type")]
    UnknownType,
    #[error("missing_field")]
    MissingField,
    #[error("invalid_language")]
    InvalidLanguage,
    #[error("empty_audio")]
    EmptyAudio,
    #[error("bad_audio")]
    BadAudio,
    #[error("unsupported_audio_format")]
    UnsupportedAudioFormat,
    #[error("stt_fail")]
    SttFail,
    #[error("translate_fail")]
    TranslateFail,
    #[error("summary_fail")]
    SummaryFail,
    #[error("tts_fail")]
    TtsFail,
    #[error("sensor_unavailable")]
    SensorUnavailable,
    #[error("partial_failure")]
    PartialFailure,
    #[error("final_translate_fail")]
    FinalTranslateFail,
    #[error("llm_http_error")]
    LlmHttpError,
}

impl WireError {
    pub fn tag(self) -> &'static str {
        match self {
            WireError::BadJson => "bad_json",
            WireError::UnknownType => "unknown_type",
            WireError::MissingField => "missing_field",
            WireError::InvalidLanguage => "invalid_language",
            WireError::EmptyAudio => "empty_audio",
            WireError::BadAudio => "bad_audio",
            WireError::UnsupportedAudioFormat => "unsupported_audio_format",
            WireError::SttFail => "stt_fail",
            WireError::TranslateFail => "translate_fail",
            WireError::SummaryFail => "summary_fail",
            WireError::TtsFail => "tts_fail",
            WireError::SensorUnavailable => "sensor_unavailable",
            WireError::PartialFailure => "partial_failure",
            WireError::FinalTranslateFail => "final_translate_fail",
            WireError::LlmHttpError => "llm_http_error",
        }
    }
}

impl ServerEvent {
    /// Build an `error` event from a tag and optional detail
    pub fn error(tag: WireError, detail: Option<String>) -> Self {
        ServerEvent::Error {
            error: tag.tag().to_string(),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_init() {
        let m: ClientMessage = serde_json::from_str(
            r#"{"type":"init","title_id":"t1","stt_language":"en","translate_source":"en","translate_target":"vi"}"#,
        )
        .unwrap();
        assert!(matches!(m, ClientMessage::Init { .. }));
    }

    #[test]
    fn test_client_message_stop() {
        let m: ClientMessage = serde_json::from_str(r#"{"type":"stop"}"#).unwrap();
        assert!(matches!(m, ClientMessage::Stop));
    }

    #[test]
    fn test_event_tags() {
        let json = serde_json::to_string(&ServerEvent::SttDelta {
            text: "hello".into(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"stt.delta""#));

        let json = serde_json::to_string(&ServerEvent::error(WireError::SttFail, None)).unwrap();
        assert!(json.contains(r#""error":"stt_fail""#));
        assert!(!json.contains("detail"));
    }

    #[test]
    fn test_result_skips_empty_fields() {
        let json = serde_json::to_string(&ServerEvent::Result(Box::default())).unwrap();
        assert!(!json.contains("audio_b64"));
        assert!(!json.contains("device_action"));
    }
}
