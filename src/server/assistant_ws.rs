//! Assistant WebSocket session
//!
//! Full-utterance flavor: the client streams PCM16 between `start` and
//! `stop`; on `stop` the whole buffer goes through STT → intent routing →
//! reply → TTS. Generic clients get one base64 WAV payload; embedded
//! clients get a framed, paced PCM16 stream.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::ServerState;
use crate::assistant::{self, AssistantContext};
use crate::audio;
use crate::config::TtsConfig;
use crate::history::turns::TurnHistory;
use crate::llm::prompts::Lang;
use crate::protocol::{AssistantResult, ClientMessage, ServerEvent, WireError};
use crate::session::memory::ClientClass;
use crate::session::{EventTx, Lifecycle, Outbound};

/// Pre-start audio cap, same rationale as the translate session
const PREBUFFER_MAX_BYTES: usize = 64 * 1024;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(|socket| handle_session(socket, state))
}

async fn handle_session(ws: WebSocket, state: ServerState) {
    let session_id = uuid::Uuid::new_v4();
    info!("assistant session connected: {}", session_id);

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

    let turns = match TurnHistory::new(
        &state.config.data_dir,
        state.config.assistant.history_max_entries,
    ) {
        Ok(turns) => turns,
        Err(e) => {
            warn!("turn history unavailable, closing session: {}", e);
            return;
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

    let mut started = false;
    let mut language = Lang::En;
    let mut client_class = ClientClass::Generic;
    let mut pcm: Vec<u8> = Vec::new();
    let mut prebuffer: Vec<u8> = Vec::new();
    // set to cancel an in-flight TTS stream
    let mut stream_cancel: Option<Arc<AtomicBool>> = None;
    let mut stream_task: Option<JoinHandle<()>> = None;

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => {
                let parsed = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        events
                            .error(super::translate_ws::parse_error_tag(&e), Some(e.to_string()))
                            .await;
                        continue;
                    }
                };
                match parsed {
                    ClientMessage::Start {
                        language: lang,
                        client,
                    } => {
                        // a new utterance interrupts any running stream
                        if let Some(cancel) = stream_cancel.take() {
                            cancel.store(true, Ordering::SeqCst);
                        }
                        if let Some(lang) = lang.as_deref().and_then(|l| l.parse::<Lang>().ok()) {
                            language = lang;
                        }
                        if let Some(client) = client.as_deref() {
                            client_class = ClientClass::parse(client);
                        }
                        pcm.clear();
                        pcm.append(&mut prebuffer);
                        started = true;
                        info!("assistant start language={} client={:?}", language, client_class);
                        events
                            .event(ServerEvent::Ack {
                                status: "started".to_string(),
                            })
                            .await;
                    }
                    ClientMessage::AudioChunk { pcm16_b64 } => {
                        match BASE64.decode(pcm16_b64.as_bytes()) {
                            Ok(bytes) => ingest(&mut pcm, &mut prebuffer, started, bytes),
                            Err(_) => events.error(WireError::BadAudio, None).await,
                        }
                    }
                    ClientMessage::Stop | ClientMessage::UttCommit => {
                        if pcm.is_empty() {
                            events.error(WireError::EmptyAudio, None).await;
                            started = false;
                            continue;
                        }
                        let utterance = std::mem::take(&mut pcm);
                        started = false;

                        let cancel = Arc::new(AtomicBool::new(false));
                        stream_cancel = Some(cancel.clone());
                        if let Some(task) = stream_task.take() {
                            task.abort();
                        }
                        stream_task = Some(tokio::spawn(finalize_and_reply(
                            state.clone(),
                            events.clone(),
                            utterance,
                            language,
                            client_class,
                            cancel,
                            ctx.clone(),
                        )));
                    }
                    _ => {
                        events.error(WireError::UnknownType, None).await;
                    }
                }
            }
            Message::Binary(data) => {
                ingest(&mut pcm, &mut prebuffer, started, data.to_vec());
            }
            Message::Close(_) => {
                info!("assistant session disconnected");
                break;
            }
            _ => {}
        }
    }

    if let Some(cancel) = stream_cancel.take() {
        cancel.store(true, Ordering::SeqCst);
    }
    if let Some(task) = stream_task.take() {
        task.abort();
    }
    lifecycle.begin_stopping();
    lifecycle.mark_stopped();
    drop(events);
    let _ = sender_task.await;
    debug!("assistant session closed: {}", session_id);
}

fn ingest(pcm: &mut Vec<u8>, prebuffer: &mut Vec<u8>, started: bool, bytes: Vec<u8>) {
    if started {
        pcm.extend_from_slice(&bytes);
    } else {
        prebuffer.extend_from_slice(&bytes);
        if prebuffer.len() > PREBUFFER_MAX_BYTES {
            let drop = prebuffer.len() - PREBUFFER_MAX_BYTES;
            prebuffer.drain(..drop);
        }
    }
}

/// STT → intent → reply → TTS for one utterance
async fn finalize_and_reply(
    state: ServerState,
    events: EventTx,
    pcm: Vec<u8>,
    language: Lang,
    client_class: ClientClass,
    cancel: Arc<AtomicBool>,
    ctx: Arc<AssistantContext>,
) {
    let wav = match audio::pcm_bytes_to_wav(&pcm, audio::SAMPLE_RATE) {
        Ok(wav) => wav,
        Err(e) => {
            events.error(WireError::BadAudio, Some(e.to_string())).await;
            return;
        }
    };

    let stt_text = match state.stt.transcribe_wav(&wav, Some(language)).await {
        Ok(text) => text,
        Err(e) => {
            events.error(WireError::SttFail, Some(e.to_string())).await;
            return;
        }
    };
    info!("assistant stt: \"{}\"", stt_text);

    let outcome = if stt_text.is_empty() {
        crate::assistant::AssistantOutcome {
            reply_text: assistant::empty_utterance_reply(),
            ..Default::default()
        }
    } else {
        match assistant::respond(&ctx, &stt_text).await {
            Ok(outcome) => outcome,
            Err(e) => {
                events
                    .error(WireError::LlmHttpError, Some(e.to_string()))
                    .await;
                return;
            }
        }
    };

    // music branch already carries audio; everything else is synthesized
    let wav_out = match &outcome.music_wav {
        Some(wav) => wav.clone(),
        None => match state.tts.synthesize(&outcome.reply_text).await {
            Ok(wav) => wav,
            Err(e) => {
                warn!("tts failed: {}", e);
                events.error(WireError::TtsFail, Some(e.to_string())).await;
                Vec::new()
            }
        },
    };

    let mut result = AssistantResult {
        ok: true,
        stt_text,
        ai_text: outcome.reply_text,
        device_action: outcome.device_action,
        device_result: outcome.device_result,
        sensor_query: outcome.sensor_query,
        sensor_result: outcome.sensor_result,
        ..Default::default()
    };

    match client_class {
        ClientClass::Generic => {
            if !wav_out.is_empty() {
                result.audio_b64 = Some(BASE64.encode(&wav_out));
                result.audio_mime = Some("audio/wav".to_string());
            }
            events.event(ServerEvent::Result(Box::new(result))).await;
        }
        ClientClass::Embedded => {
            result.audio_stream = Some(true);
            result.audio_format = Some("pcm_s16le".to_string());
            result.sample_rate = Some(audio::SAMPLE_RATE);
            result.channels = Some(1);
            events.event(ServerEvent::Result(Box::new(result))).await;
            stream_tts_pcm(&events, &wav_out, &state.config.tts, &cancel).await;
        }
    }
}

/// Stream WAV audio as framed PCM16: `tts_start`, prefilled then paced
/// binary frames, `tts_end`. Honors the cancel flag mid-stream.
pub async fn stream_tts_pcm(
    events: &EventTx,
    wav_bytes: &[u8],
    config: &TtsConfig,
    cancel: &AtomicBool,
) {
    if wav_bytes.is_empty() {
        events.event(ServerEvent::TtsEnd).await;
        return;
    }

    let pcm = match audio::wav_to_pcm16_mono(wav_bytes) {
        Ok(pcm) => pcm,
        Err(e) => {
            warn!("tts stream convert failed: {}", e);
            events
                .error(WireError::UnsupportedAudioFormat, Some(e.to_string()))
                .await;
            events.event(ServerEvent::TtsEnd).await;
            return;
        }
    };
    if pcm.is_empty() {
        events.event(ServerEvent::TtsEnd).await;
        return;
    }

    let pcm = audio::prepend_silence(&pcm, config.lead_silence_ms, audio::SAMPLE_RATE);

    let chunk_bytes = config.stream_chunk_bytes.max(2) / 2 * 2;
    let chunk_duration =
        chunk_bytes as f64 / (audio::SAMPLE_RATE as f64 * audio::BYTES_PER_SAMPLE as f64);
    let pace = std::time::Duration::from_secs_f64(chunk_duration * config.stream_pace_factor);

    debug!(
        "tts stream start: {} bytes, {} byte frames",
        pcm.len(),
        chunk_bytes
    );
    events
        .event(ServerEvent::TtsStart {
            audio_format: "pcm_s16le".to_string(),
            sample_rate: audio::SAMPLE_RATE,
            channels: 1,
            bits_per_sample: 16,
        })
        .await;

    for (i, frame) in pcm.chunks(chunk_bytes).enumerate() {
        if cancel.load(Ordering::SeqCst) {
            debug!("tts stream cancelled at frame {}", i);
            break;
        }
        events.binary(frame.to_vec()).await;
        // the first PREFILL frames ship back-to-back to fill the client
        // buffer; the rest are paced to its playback rate
        if i + 1 >= config.stream_prefill_chunks {
            tokio::time::sleep(pace).await;
        }
    }

    events.event(ServerEvent::TtsEnd).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_prebuffer_before_start() {
        let mut pcm = Vec::new();
        let mut prebuffer = Vec::new();
        ingest(&mut pcm, &mut prebuffer, false, vec![1, 2, 3]);
        assert!(pcm.is_empty());
        assert_eq!(prebuffer, vec![1, 2, 3]);

        ingest(&mut pcm, &mut prebuffer, true, vec![4, 5]);
        assert_eq!(pcm, vec![4, 5]);
    }

    #[tokio::test]
    async fn test_stream_tts_pcm_frames_and_end() {
        let lifecycle = Lifecycle::new();
        let (tx, mut rx) = mpsc::channel(1024);
        let events = EventTx::new(tx, lifecycle);

        // 1000 samples of silence -> 2000 bytes of PCM
        let wav = audio::pcm_to_wav(&vec![0i16; 1000], audio::SAMPLE_RATE).unwrap();
        let config = TtsConfig {
            lead_silence_ms: 0,
            stream_chunk_bytes: 512,
            stream_prefill_chunks: 100,
            stream_pace_factor: 0.5,
            ..Default::default()
        };
        let cancel = AtomicBool::new(false);
        stream_tts_pcm(&events, &wav, &config, &cancel).await;

        let mut binary_frames = 0;
        let mut saw_start = false;
        let mut saw_end = false;
        while let Ok(out) = rx.try_recv() {
            match out {
                Outbound::Event(ServerEvent::TtsStart { sample_rate, .. }) => {
                    saw_start = true;
                    assert_eq!(sample_rate, 16000);
                }
                Outbound::Event(ServerEvent::TtsEnd) => saw_end = true,
                Outbound::Binary(frame) => {
                    binary_frames += 1;
                    assert_eq!(frame.len() % 2, 0);
                }
                _ => {}
            }
        }
        assert!(saw_start);
        assert!(saw_end);
        // 2000 bytes in 512-byte frames = 4 frames
        assert_eq!(binary_frames, 4);
    }

    #[tokio::test]
    async fn test_stream_tts_pcm_cancel() {
        let lifecycle = Lifecycle::new();
        let (tx, mut rx) = mpsc::channel(1024);
        let events = EventTx::new(tx, lifecycle);

        let wav = audio::pcm_to_wav(&vec![0i16; 4000], audio::SAMPLE_RATE).unwrap();
        let config = TtsConfig {
            lead_silence_ms: 0,
            stream_chunk_bytes: 512,
            stream_prefill_chunks: 100,
            ..Default::default()
        };
        let cancel = AtomicBool::new(true);
        stream_tts_pcm(&events, &wav, &config, &cancel).await;

        let mut binary_frames = 0;
        let mut saw_end = false;
        while let Ok(out) = rx.try_recv() {
            match out {
                Outbound::Binary(_) => binary_frames += 1,
                Outbound::Event(ServerEvent::TtsEnd) => saw_end = true,
                _ => {}
            }
        }
        assert_eq!(binary_frames, 0, "cancel set before start sends no frames");
        assert!(saw_end, "tts_end still terminates the stream");
    }
}
