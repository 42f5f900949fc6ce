//! Live translation WebSocket session
//!
//! State machine per connection:
//! `CONNECTED → INITIALIZED (init) → ACTIVE (start) → STOPPING (stop) → CLOSED`.
//! Audio arrives as binary PCM16 frames or base64 `audio.chunk` messages;
//! everything downstream of ingress runs in the pipeline workers.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use super::ServerState;
use crate::history::titles::build_title_context_tail;
use crate::llm::prompts::Lang;
use crate::protocol::{ClientMessage, ServerEvent, WireError};
use crate::session::memory::{ClientClass, SessionMemory};
use crate::session::pipeline::{Pipeline, PipelineDeps};
use crate::session::{EventTx, Lifecycle, Outbound, SessionState};

/// Pre-start audio buffer cap (~2 s of PCM16 at 16 kHz), enough to save
/// the first syllable without hoarding audio from an idle client
const PREBUFFER_MAX_BYTES: usize = 64 * 1024;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(|socket| handle_session(socket, state))
}

/// Map a serde parse failure onto the closest wire tag
pub(crate) fn parse_error_tag(e: &serde_json::Error) -> WireError {
    let msg = e.to_string();
    if msg.contains("missing field") {
        WireError::MissingField
    } else if msg.contains("unknown variant") {
        WireError::UnknownType
    } else {
        WireError::BadJson
    }
}

async fn handle_session(ws: WebSocket, state: ServerState) {
    let session_id = uuid::Uuid::new_v4();
    info!("translate session connected: {}", session_id);

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(256);

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let result = match msg {
                Outbound::Event(event) => {
                    ws_tx
                        .send(Message::Text(
                            serde_json::to_string(&event).unwrap_or_default().into(),
                        ))
                        .await
                }
                Outbound::Binary(data) => ws_tx.send(Message::Binary(data.into())).await,
            };
            if result.is_err() {
                break;
            }
        }
    });

    let lifecycle = Lifecycle::new();
    let events = EventTx::new(out_tx, lifecycle.clone());

    let mut session_state = SessionState::Connected;
    let mut memory: Option<Arc<RwLock<SessionMemory>>> = None;
    let mut pipeline: Option<Pipeline> = None;
    let mut prebuffer: Vec<u8> = Vec::new();

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => {
                let parsed = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        events.error(parse_error_tag(&e), Some(e.to_string())).await;
                        continue;
                    }
                };
                match parsed {
                    ClientMessage::Init {
                        title_id,
                        title_name,
                        stt_language,
                        translate_source,
                        translate_target,
                    } => {
                        if session_state != SessionState::Connected {
                            debug!("init ignored in state {:?}", session_state);
                            continue;
                        }
                        match init_session(
                            &state,
                            title_id,
                            title_name,
                            &stt_language,
                            &translate_source,
                            &translate_target,
                        ) {
                            Ok(mem) => {
                                memory = Some(Arc::new(RwLock::new(mem)));
                                session_state = SessionState::Initialized;
                            }
                            Err(tag) => {
                                // setup errors are fatal to the session
                                events.error(tag, None).await;
                                break;
                            }
                        }
                    }
                    ClientMessage::Start { language, client } => {
                        let mem = match (&memory, session_state) {
                            (Some(mem), SessionState::Initialized) => mem.clone(),
                            _ => {
                                debug!("start ignored in state {:?}", session_state);
                                continue;
                            }
                        };
                        {
                            let mut m = mem.write().await;
                            if let Some(lang) =
                                language.as_deref().and_then(|l| l.parse::<Lang>().ok())
                            {
                                m.stt_lang = lang;
                            }
                            if let Some(client) = client.as_deref() {
                                m.client_class = ClientClass::parse(client);
                            }
                            m.stt_cumulative.clear();
                            m.stt_committed_len = 0;
                        }

                        let deps = PipelineDeps {
                            stt: state.stt.clone(),
                            llm: state.llm.clone(),
                            titles: state.titles.clone(),
                            config: state.config.pipeline.clone(),
                        };
                        let p = Pipeline::start(
                            mem,
                            lifecycle.clone(),
                            events.clone(),
                            deps,
                        );
                        if !prebuffer.is_empty() {
                            p.push_audio(std::mem::take(&mut prebuffer));
                        }
                        pipeline = Some(p);
                        session_state = SessionState::Active;
                        events
                            .event(ServerEvent::Ack {
                                status: "started".to_string(),
                            })
                            .await;
                    }
                    ClientMessage::AudioChunk { pcm16_b64 } => {
                        let pcm = match BASE64.decode(pcm16_b64.as_bytes()) {
                            Ok(pcm) => pcm,
                            Err(_) => {
                                events.error(WireError::BadAudio, None).await;
                                continue;
                            }
                        };
                        ingest_audio(&mut prebuffer, &pipeline, session_state, pcm);
                    }
                    ClientMessage::Stop | ClientMessage::UttCommit => {
                        if let Some(p) = pipeline.as_mut() {
                            session_state = SessionState::Stopping;
                            p.stop().await;
                            session_state = SessionState::Closed;
                        } else {
                            session_state = SessionState::Closed;
                        }
                        break;
                    }
                    ClientMessage::ChatSend { .. } => {
                        events.error(WireError::UnknownType, None).await;
                    }
                }
            }
            Message::Binary(data) => {
                ingest_audio(&mut prebuffer, &pipeline, session_state, data.to_vec());
            }
            Message::Close(_) => {
                info!("translate session disconnected");
                break;
            }
            _ => {}
        }
    }

    // Client may vanish mid-session; still flush and persist once.
    if let Some(mut p) = pipeline.take() {
        p.stop().await;
    }
    drop(events);
    let _ = sender_task.await;
    debug!("translate session closed: {}", session_id);
}

/// Validate languages and load the title's persisted context.
fn init_session(
    state: &ServerState,
    title_id: String,
    title_name: Option<String>,
    stt_language: &str,
    translate_source: &str,
    translate_target: &str,
) -> Result<SessionMemory, WireError> {
    let stt_lang: Lang = stt_language.parse().map_err(|_| WireError::InvalidLanguage)?;
    let src: Lang = translate_source
        .parse()
        .map_err(|_| WireError::InvalidLanguage)?;
    let tgt: Lang = translate_target
        .parse()
        .map_err(|_| WireError::InvalidLanguage)?;
    if src == tgt {
        return Err(WireError::InvalidLanguage);
    }

    let title_name = title_name.unwrap_or_else(|| title_id.clone());
    if state
        .titles
        .ensure(&title_id, Some(&title_name))
        .is_err()
    {
        warn!("failed to prepare title folder for {}", title_id);
    }

    let mut mem = SessionMemory::new(title_id.clone(), title_name, stt_lang, src, tgt);
    match state.titles.read_source_target(&title_id) {
        Ok((source, target)) => {
            mem.title_context_tail = build_title_context_tail(&source, &target, 12);
            mem.committed_source = source;
            mem.committed_target = target;
        }
        Err(e) => warn!("failed to load persisted context: {}", e),
    }
    Ok(mem)
}

/// Route one audio frame by session state: pre-buffer before start,
/// pipeline while active, dropped otherwise.
fn ingest_audio(
    prebuffer: &mut Vec<u8>,
    pipeline: &Option<Pipeline>,
    session_state: SessionState,
    pcm: Vec<u8>,
) {
    match session_state {
        SessionState::Active => {
            if let Some(p) = pipeline {
                p.push_audio(pcm);
            }
        }
        SessionState::Initialized => {
            prebuffer.extend_from_slice(&pcm);
            if prebuffer.len() > PREBUFFER_MAX_BYTES {
                let drop = prebuffer.len() - PREBUFFER_MAX_BYTES;
                prebuffer.drain(..drop);
            }
        }
        _ => {}
    }
}
