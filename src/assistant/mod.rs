//! Assistant flavor: intent routing over a full utterance
//!
//! After STT produces the utterance transcript, exactly one branch runs:
//! device command, sensor query, music request, or free-form chat. Every
//! branch produces canonical English reply text plus the structured fields
//! for the terminal `result` payload.

pub mod devices;
pub mod intent;
pub mod music;
pub mod reply;
pub mod wiki;

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AssistantConfig;
use crate::history::turns::TurnHistory;
use crate::llm::{ChatEngine, ChatMessage};
use devices::EspClient;
use intent::{IntentResult, RoomTarget};
use music::MusicClient;
use wiki::WikiClient;

/// Recent turns included in the free-form prompt
const CHAT_CONTEXT_TURNS: usize = 8;

pub struct AssistantContext {
    pub esp: EspClient,
    pub chat: Arc<dyn ChatEngine>,
    pub music: MusicClient,
    pub wiki: WikiClient,
    pub turns: TurnHistory,
    pub config: AssistantConfig,
    pub system_prompt: String,
    /// Long-term facts block injected into free-form prompts, if any
    pub app_memory_text: String,
}

/// Everything one utterance produced
#[derive(Debug, Default)]
pub struct AssistantOutcome {
    pub reply_text: String,
    pub device_action: Option<serde_json::Value>,
    pub device_result: Option<serde_json::Value>,
    pub sensor_query: Option<serde_json::Value>,
    pub sensor_result: Option<serde_json::Value>,
    /// 16 kHz mono PCM16 WAV of a requested track, when the music branch ran
    pub music_wav: Option<Vec<u8>>,
}

fn device_action_json(command: &intent::DeviceCommand) -> serde_json::Value {
    match &command.target {
        RoomTarget::All => json!({ "room": "all", "state": command.state.as_str() }),
        RoomTarget::Rooms(rooms) if rooms.len() == 1 => {
            json!({ "room": rooms[0].key(), "state": command.state.as_str() })
        }
        RoomTarget::Rooms(rooms) => json!({
            "room": "multi",
            "rooms": rooms.iter().map(|r| r.key()).collect::<Vec<_>>(),
            "state": command.state.as_str(),
        }),
    }
}

/// Route one utterance through the intent switch and produce the reply.
pub async fn respond(ctx: &AssistantContext, stt_text: &str) -> Result<AssistantOutcome> {
    let mut outcome = AssistantOutcome::default();

    match intent::classify(stt_text) {
        IntentResult::Device(command) => {
            info!("device intent: {:?}", command);
            outcome.device_action = Some(device_action_json(&command));
            outcome.device_result = Some(match ctx.esp.apply(&command).await {
                Ok(relay) => serde_json::to_value(&relay).unwrap_or_default(),
                Err(e) => json!({ "ok": false, "error": e.to_string() }),
            });
            outcome.reply_text = reply::format_device_reply(&command.target, command.state);
        }
        IntentResult::Sensor(query) => {
            info!("sensor intent: {:?}", query);
            outcome.sensor_query = Some(serde_json::to_value(query).unwrap_or_default());
            let reading = match ctx.esp.sensor().await {
                Ok(reading) => {
                    outcome.sensor_result =
                        Some(serde_json::to_value(reading).unwrap_or_default());
                    Some(reading)
                }
                Err(e) => {
                    warn!("sensor read failed: {}", e);
                    outcome.sensor_result = Some(json!({ "ok": false, "error": e.to_string() }));
                    None
                }
            };
            outcome.reply_text = reply::format_sensor_reply(reading.as_ref(), query);
        }
        IntentResult::Music(request) => {
            info!("music intent: \"{}\"", request.query);
            match self::fetch_track(ctx, &request.query).await {
                Ok((track, wav)) => {
                    outcome.reply_text = reply::format_music_reply(&track.name, &track.artist);
                    outcome.music_wav = Some(wav);
                }
                Err(e) => {
                    warn!("music lookup failed: {}", e);
                    outcome.reply_text = "I could not find that song right now.".to_string();
                }
            }
        }
        IntentResult::FreeForm => {
            outcome.reply_text = free_form_reply(ctx, stt_text).await?;
        }
    }

    Ok(outcome)
}

async fn fetch_track(
    ctx: &AssistantContext,
    query: &str,
) -> Result<(music::Track, Vec<u8>)> {
    let track = ctx.music.search(query).await?;
    let wav = ctx.music.fetch_wav(&track).await?;
    Ok((track, wav))
}

/// Free-form chat: system prompt, long-term facts, optional encyclopedia
/// grounding, recent turns, then the utterance. The reply passes the
/// rule guard before going anywhere near the TTS.
async fn free_form_reply(ctx: &AssistantContext, user_text: &str) -> Result<String> {
    let mut messages = vec![ChatMessage::system(&ctx.system_prompt)];

    if !ctx.app_memory_text.trim().is_empty() {
        messages.push(ChatMessage::system(&ctx.app_memory_text));
    }

    if wiki::should_use_wikipedia(user_text) {
        if let Some(summary) = ctx.wiki.fetch_summary(user_text).await {
            messages.push(ChatMessage::system(format!(
                "Background from Wikipedia ({}): {}",
                summary.title, summary.extract
            )));
        }
    }

    for turn in ctx.turns.recent(CHAT_CONTEXT_TURNS) {
        messages.push(ChatMessage::user(turn.q));
        messages.push(ChatMessage::assistant(turn.a));
    }
    messages.push(ChatMessage::user(user_text));

    let raw = ctx
        .chat
        .chat(&messages)
        .await
        .context("assistant chat failed")?;
    let guarded = reply::guard_reply(ctx.chat.as_ref(), &raw, &ctx.config).await;

    if let Err(e) = ctx.turns.append(user_text, &guarded) {
        warn!("failed to persist assistant turn: {}", e);
    }
    Ok(guarded)
}

/// Build the assistant response to a spoken utterance, falling back to a
/// fixed apology when the utterance was empty.
pub fn empty_utterance_reply() -> String {
    "I did not catch that, could you repeat it?".to_string()
}
