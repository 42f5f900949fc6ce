//! HTTP admin surface and batch endpoints
//!
//! Conversations (list/create/detail/soft-delete), one-shot chat, batch
//! voice (upload → STT → intent → reply → TTS base64), batch audio
//! translation under a title, and title browsing.

use axum::{
    extract::{Json, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::chat_ws::build_chat_messages;
use super::ServerState;
use crate::assistant::{self, AssistantContext};
use crate::history::titles::build_title_context_tail;
use crate::history::turns::TurnHistory;
use crate::llm::prompts::{self, Lang};
use crate::llm::{ChatEngine, Generator};

pub async fn status_handler(State(state): State<ServerState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.llm.model(),
    }))
}

// ─── Conversations ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub conversation_id: Option<i64>,
    pub message: String,
}

pub async fn chat_handler(
    State(state): State<ServerState>,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    let Some(conversation_id) = req.conversation_id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "conversation_id is required" })),
        );
    };
    let user_text = req.message.trim().to_string();
    if user_text.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "message is required" })),
        );
    }

    match run_chat_turn(&state, conversation_id, &user_text).await {
        Ok(assistant_text) => (
            StatusCode::OK,
            Json(json!({
                "message": {
                    "conversation_id": conversation_id,
                    "role": "assistant",
                    "content": assistant_text,
                }
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn run_chat_turn(
    state: &ServerState,
    conversation_id: i64,
    user_text: &str,
) -> anyhow::Result<String> {
    state
        .store
        .save_message(conversation_id, "user", user_text)?;
    let messages = build_chat_messages(state, conversation_id, user_text)?;
    let assistant_text = state.llm.chat(&messages).await?;
    state
        .store
        .save_message(conversation_id, "assistant", &assistant_text)?;
    Ok(assistant_text)
}

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub message: String,
}

pub async fn create_conversation_handler(
    State(state): State<ServerState>,
    Json(req): Json<CreateConversationRequest>,
) -> impl IntoResponse {
    let user_text = req.message.trim().to_string();
    if user_text.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "message is required" })),
        );
    }

    let conversation_id = match state.store.create_conversation() {
        Ok(id) => id,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            );
        }
    };

    let assistant_text = match run_chat_turn(&state, conversation_id, &user_text).await {
        Ok(text) => text,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            );
        }
    };

    // short AI title for the sidebar; failures fall back to a default
    let title = match state
        .llm
        .generate(&prompts::conversation_title(&user_text))
        .await
    {
        Ok(title) => clean_title(&title, conversation_id),
        Err(e) => {
            warn!("title generation failed: {}", e);
            format!("Conversation {}", conversation_id)
        }
    };
    if let Err(e) = state.store.set_title(conversation_id, &title) {
        warn!("failed to store title: {}", e);
    }

    (
        StatusCode::CREATED,
        Json(json!({
            "conversation_id": conversation_id,
            "title": title,
            "message": {
                "conversation_id": conversation_id,
                "role": "assistant",
                "content": assistant_text,
            }
        })),
    )
}

fn clean_title(raw: &str, conversation_id: i64) -> String {
    let mut title = raw.trim().replace('\n', " ");
    if title.is_empty() {
        return format!("Conversation {}", conversation_id);
    }
    if title.chars().count() > 60 {
        title = title.chars().take(60).collect::<String>().trim().to_string();
    }
    title
}

pub async fn list_conversations_handler(State(state): State<ServerState>) -> impl IntoResponse {
    match state.store.list_conversations() {
        Ok(conversations) => {
            let list: Vec<_> = conversations
                .into_iter()
                .map(|c| {
                    let title = if c.title.is_empty() {
                        format!("Conversation {}", c.id)
                    } else {
                        c.title
                    };
                    json!({ "conversation_id": c.id, "title": title })
                })
                .collect();
            (StatusCode::OK, Json(json!({ "conversations": list })))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

pub async fn conversation_detail_handler(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.conversation_exists(id) {
        Ok(false) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "Conversation not found" })),
            );
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            );
        }
        Ok(true) => {}
    }

    match state.store.history(id) {
        Ok(messages) => (
            StatusCode::OK,
            Json(json!({
                "conversation_id": id,
                "messages": messages,
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

pub async fn delete_conversation_handler(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.soft_delete(id) {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({ "success": true, "deleted_id": id })),
        ),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Conversation not found" })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

// ─── Batch voice ─────────────────────────────────────────────

/// WAV upload → STT → intent routing → reply → TTS, one JSON response.
pub async fn voice_handler(
    State(state): State<ServerState>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let mut audio: Option<Vec<u8>> = None;
    let mut language: Option<Lang> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" => {
                audio = field.bytes().await.ok().map(|b| b.to_vec());
            }
            "language" => {
                language = field
                    .text()
                    .await
                    .ok()
                    .and_then(|s| s.trim().parse::<Lang>().ok());
            }
            _ => {}
        }
    }

    let Some(wav) = audio.filter(|a| !a.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error": "missing_audio" })),
        );
    };

    if crate::audio::parse_wav(&wav).is_err() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error": "bad_audio" })),
        );
    }

    let stt_text = match state.stt.transcribe_wav(&wav, language).await {
        Ok(text) => text,
        Err(e) => {
            return (
                StatusCode::OK,
                Json(json!({ "ok": false, "error": "stt_fail", "detail": e.to_string() })),
            );
        }
    };
    if stt_text.is_empty() {
        return (
            StatusCode::OK,
            Json(json!({ "ok": false, "error": "stt_empty" })),
        );
    }
    info!("[voice] stt: \"{}\"", stt_text);

    let turns = match TurnHistory::new(
        &state.config.data_dir,
        state.config.assistant.history_max_entries,
    ) {
        Ok(turns) => turns,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false, "error": e.to_string() })),
            );
        }
    };
    let ctx = Arc::new(AssistantContext {
        esp: crate::assistant::devices::EspClient::from_config(&state.config.esp),
        chat: state.llm.clone(),
        music: crate::assistant::music::MusicClient::new(),
        wiki: crate::assistant::wiki::WikiClient::new(),
        turns,
        config: state.config.assistant.clone(),
        system_prompt: state.config.llm.system_prompt.clone(),
        app_memory_text: state.store.app_memory_text().unwrap_or_default(),
    });

    let outcome = match assistant::respond(&ctx, &stt_text).await {
        Ok(outcome) => outcome,
        Err(e) => {
            return (
                StatusCode::OK,
                Json(json!({
                    "ok": false,
                    "error": "llm_http_error",
                    "detail": e.to_string(),
                    "stt_text": stt_text,
                })),
            );
        }
    };

    let wav_out = match &outcome.music_wav {
        Some(wav) => wav.clone(),
        None => state
            .tts
            .synthesize(&outcome.reply_text)
            .await
            .unwrap_or_else(|e| {
                warn!("[voice] tts failed: {}", e);
                Vec::new()
            }),
    };
    let audio_b64 = if wav_out.is_empty() {
        String::new()
    } else {
        BASE64.encode(&wav_out)
    };

    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "stt_text": stt_text,
            "ai_text": outcome.reply_text,
            "audio_b64": audio_b64,
            "audio_mime": "audio/wav",
            "device_action": outcome.device_action,
            "device_result": outcome.device_result,
            "sensor_query": outcome.sensor_query,
            "sensor_result": outcome.sensor_result,
        })),
    )
}

// ─── Batch translation ───────────────────────────────────────

/// Audio upload + languages → transcript + one-shot translation, appended
/// to the title's history.
pub async fn translate_audio_handler(
    State(state): State<ServerState>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let mut audio: Option<Vec<u8>> = None;
    let mut title = String::new();
    let mut input_lang: Option<Lang> = None;
    let mut output_lang: Option<Lang> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" => audio = field.bytes().await.ok().map(|b| b.to_vec()),
            "title" => title = field.text().await.unwrap_or_default().trim().to_string(),
            "input_lang" => {
                input_lang = field
                    .text()
                    .await
                    .ok()
                    .and_then(|s| s.trim().parse::<Lang>().ok());
            }
            "output_lang" => {
                output_lang = field
                    .text()
                    .await
                    .ok()
                    .and_then(|s| s.trim().parse::<Lang>().ok());
            }
            _ => {}
        }
    }

    let Some(wav) = audio.filter(|a| !a.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error": "missing_audio" })),
        );
    };
    let Some(input_lang) = input_lang else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error": "missing_input_lang" })),
        );
    };
    let Some(output_lang) = output_lang else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error": "missing_output_lang" })),
        );
    };
    if input_lang == output_lang {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error": "invalid_language" })),
        );
    }
    if title.is_empty() {
        title = "default".to_string();
    }

    let stt_text = match state.stt.transcribe_wav(&wav, Some(input_lang)).await {
        Ok(text) if !text.is_empty() => text,
        Ok(_) => {
            return (
                StatusCode::OK,
                Json(json!({ "ok": false, "error": "stt_empty" })),
            );
        }
        Err(e) => {
            return (
                StatusCode::OK,
                Json(json!({ "ok": false, "error": "stt_fail", "detail": e.to_string() })),
            );
        }
    };

    let (prev_source, prev_target) = state
        .titles
        .read_source_target(&title)
        .unwrap_or_default();
    let tail = build_title_context_tail(&prev_source, &prev_target, 12);

    let translated = match state
        .llm
        .generate(&prompts::final_translate(
            input_lang,
            output_lang,
            &title,
            &tail,
            &stt_text,
        ))
        .await
    {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            return (
                StatusCode::OK,
                Json(json!({ "ok": false, "error": "translate_fail", "detail": e.to_string() })),
            );
        }
    };

    // append this batch to the title's running history
    let new_source = append_line(&prev_source, &stt_text);
    let new_target = append_line(&prev_target, &translated);
    if let Err(e) = state
        .titles
        .write_source(&title, &new_source)
        .and_then(|_| state.titles.write_target(&title, &new_target))
    {
        warn!("failed to persist batch translation: {}", e);
    }

    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "title": title,
            "stt_text": stt_text,
            "translated_text": translated,
        })),
    )
}

fn append_line(existing: &str, line: &str) -> String {
    let mut out = existing.trim_end_matches('\n').to_string();
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(line.trim());
    out.push('\n');
    out
}

// ─── Titles ──────────────────────────────────────────────────

pub async fn list_titles_handler(State(state): State<ServerState>) -> impl IntoResponse {
    match state.titles.list() {
        Ok(titles) => (StatusCode::OK, Json(json!({ "titles": titles }))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTitleRequest {
    #[serde(default)]
    pub title_name: Option<String>,
}

pub async fn create_title_handler(
    State(state): State<ServerState>,
    Json(req): Json<CreateTitleRequest>,
) -> impl IntoResponse {
    match state.titles.create(req.title_name.as_deref()) {
        Ok(meta) => (
            StatusCode::CREATED,
            Json(json!({
                "ok": true,
                "title_id": meta.title_id,
                "title_name": meta.title_name,
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

pub async fn title_detail_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.titles.detail(&id) {
        Ok(detail) => (StatusCode::OK, Json(serde_json::to_value(detail).unwrap_or_default())),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("  My Title\nWith Newline ", 1), "My Title With Newline");
        assert_eq!(clean_title("", 7), "Conversation 7");
        let long = "x".repeat(100);
        assert_eq!(clean_title(&long, 1).chars().count(), 60);
    }

    #[test]
    fn test_append_line() {
        assert_eq!(append_line("", "hello"), "hello\n");
        assert_eq!(append_line("a\n", "b"), "a\nb\n");
        assert_eq!(append_line("a", "b"), "a\nb\n");
    }
}
