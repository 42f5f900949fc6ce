//! Text-only streaming chat WebSocket
//!
//! `chat.send` → `chat.start`, a run of `chat.delta` tokens, `chat.done`.
//! Both turns persist to the conversation store; the prompt carries the
//! system prompt, long-term app memory, and the full history.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::ServerState;
use crate::llm::{ChatEngine, ChatMessage};
use crate::protocol::{ClientMessage, ServerEvent};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(|socket| handle_session(socket, state))
}

async fn send_event(ws: &mut futures_util::stream::SplitSink<WebSocket, Message>, event: ServerEvent) -> bool {
    ws.send(Message::Text(
        serde_json::to_string(&event).unwrap_or_default().into(),
    ))
    .await
    .is_ok()
}

async fn handle_session(ws: WebSocket, state: ServerState) {
    info!("chat session connected");
    let (mut ws_tx, mut ws_rx) = ws.split();

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => {
                let parsed = serde_json::from_str::<ClientMessage>(&text);
                match parsed {
                    Ok(ClientMessage::ChatSend {
                        conversation_id,
                        message,
                    }) => {
                        let message = message.trim().to_string();
                        if message.is_empty() {
                            let _ = send_event(
                                &mut ws_tx,
                                ServerEvent::ChatError {
                                    error: "message is required".to_string(),
                                },
                            )
                            .await;
                            continue;
                        }
                        if !handle_chat_send(&state, &mut ws_tx, conversation_id, &message).await {
                            break;
                        }
                    }
                    Ok(_) => {
                        let _ = send_event(
                            &mut ws_tx,
                            ServerEvent::ChatError {
                                error: "unknown_message_type".to_string(),
                            },
                        )
                        .await;
                    }
                    Err(e) => {
                        debug!("chat parse error: {}", e);
                        let _ = send_event(
                            &mut ws_tx,
                            ServerEvent::ChatError {
                                error: "bad_json".to_string(),
                            },
                        )
                        .await;
                    }
                }
            }
            Message::Close(_) => {
                info!("chat session disconnected");
                break;
            }
            _ => {}
        }
    }
}

/// Returns false when the socket is gone.
async fn handle_chat_send(
    state: &ServerState,
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    conversation_id: i64,
    user_text: &str,
) -> bool {
    if let Err(e) = state.store.save_message(conversation_id, "user", user_text) {
        return send_event(
            ws_tx,
            ServerEvent::ChatError {
                error: e.to_string(),
            },
        )
        .await;
    }

    let messages = match build_chat_messages(state, conversation_id, user_text) {
        Ok(messages) => messages,
        Err(e) => {
            return send_event(
                ws_tx,
                ServerEvent::ChatError {
                    error: e.to_string(),
                },
            )
            .await;
        }
    };

    if !send_event(ws_tx, ServerEvent::ChatStart { conversation_id }).await {
        return false;
    }

    let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
    let llm = state.llm.clone();
    let stream_task = tokio::spawn(async move { llm.chat_stream(&messages, chunk_tx).await });

    while let Some(delta) = chunk_rx.recv().await {
        if !send_event(ws_tx, ServerEvent::ChatDelta { text_delta: delta }).await {
            stream_task.abort();
            return false;
        }
    }

    match stream_task.await {
        Ok(Ok(full)) => {
            let assistant_text = {
                let t = full.trim();
                if t.is_empty() {
                    "No response.".to_string()
                } else {
                    t.to_string()
                }
            };
            if let Err(e) =
                state
                    .store
                    .save_message(conversation_id, "assistant", &assistant_text)
            {
                debug!("failed to persist assistant message: {}", e);
            }
            send_event(ws_tx, ServerEvent::ChatDone { conversation_id }).await
        }
        Ok(Err(e)) => {
            send_event(
                ws_tx,
                ServerEvent::ChatError {
                    error: e.to_string(),
                },
            )
            .await
        }
        Err(e) => {
            send_event(
                ws_tx,
                ServerEvent::ChatError {
                    error: e.to_string(),
                },
            )
            .await
        }
    }
}

/// System prompt, long-term facts, history, then the current user turn
/// (unless history already ends with it).
pub(crate) fn build_chat_messages(
    state: &ServerState,
    conversation_id: i64,
    user_text: &str,
) -> anyhow::Result<Vec<ChatMessage>> {
    let mut messages = vec![ChatMessage::system(&state.config.llm.system_prompt)];

    let app_memory = state.store.app_memory_text()?;
    if !app_memory.trim().is_empty() {
        messages.push(ChatMessage::system(app_memory));
    }

    let history = state.store.history(conversation_id)?;
    let ends_with_current = history
        .last()
        .map(|m| m.role == "user" && m.content == user_text)
        .unwrap_or(false);
    for m in history {
        messages.push(ChatMessage {
            role: m.role,
            content: m.content,
        });
    }
    if !ends_with_current {
        messages.push(ChatMessage::user(user_text));
    }
    Ok(messages)
}
