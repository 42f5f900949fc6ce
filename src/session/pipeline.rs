//! Pipeline workers and supervisor
//!
//! Three long-lived tasks per session — STT (Line 1), streaming
//! translation (Line 2), periodic summary (Line 3) — plus the coarse
//! pause-commit loop. The `Pipeline` value is the supervisor: it owns the
//! worker handles, feeds the audio channel, and runs the finalizer exactly
//! once on stop.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::commit::{normalize_segment, CommitRange, CommitRouter};
use super::finalizer;
use super::memory::SessionMemory;
use super::{EventTx, Lifecycle};
use crate::config::PipelineConfig;
use crate::history::titles::TitleStore;
use crate::llm::prompts;
use crate::llm::Generator;
use crate::protocol::{ServerEvent, WireError};
use crate::stt::{CumulativeStreamer, SttEngine};

/// Sentence-terminal punctuation that triggers an immediate commit
const TERMINAL_PUNCT: [char; 6] = ['.', '!', '?', '。', '！', '？'];

/// Byte offset just past the last terminal punctuation mark, if any
fn last_terminal_punct_end(draft: &str) -> Option<usize> {
    let mut end = None;
    for (i, ch) in draft.char_indices() {
        if TERMINAL_PUNCT.contains(&ch) {
            end = Some(i + ch.len_utf8());
        }
    }
    end
}

/// External collaborators the pipeline depends on
pub struct PipelineDeps {
    pub stt: Arc<dyn SttEngine>,
    pub llm: Arc<dyn Generator>,
    pub titles: Arc<TitleStore>,
    pub config: PipelineConfig,
}

/// Per-session supervisor
pub struct Pipeline {
    memory: Arc<RwLock<SessionMemory>>,
    lifecycle: Arc<Lifecycle>,
    events: EventTx,
    router: Arc<CommitRouter>,
    audio_tx: mpsc::UnboundedSender<Vec<u8>>,
    llm: Arc<dyn Generator>,
    titles: Arc<TitleStore>,
    refine_before_final: bool,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawn all workers for an ACTIVE session.
    pub fn start(
        memory: Arc<RwLock<SessionMemory>>,
        lifecycle: Arc<Lifecycle>,
        events: EventTx,
        deps: PipelineDeps,
    ) -> Self {
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (commit_tx, commit_rx) = mpsc::unbounded_channel();

        let router = Arc::new(CommitRouter::new(
            memory.clone(),
            lifecycle.clone(),
            commit_tx,
            events.clone(),
            deps.config.min_commit_chars,
        ));

        let mut workers = Vec::new();

        workers.push(tokio::spawn(stt_worker(
            memory.clone(),
            lifecycle.clone(),
            events.clone(),
            router.clone(),
            deps.stt,
            audio_rx,
        )));

        workers.push(tokio::spawn(pause_commit_loop(
            memory.clone(),
            lifecycle.clone(),
            events.clone(),
            router.clone(),
            Duration::from_secs_f64(deps.config.pause_commit_sec),
        )));

        workers.push(tokio::spawn(translate_worker(
            memory.clone(),
            lifecycle.clone(),
            events.clone(),
            deps.llm.clone(),
            commit_rx,
        )));

        workers.push(tokio::spawn(summary_worker(
            memory.clone(),
            lifecycle.clone(),
            events.clone(),
            deps.llm.clone(),
            Duration::from_secs(deps.config.summary_period_sec.max(1)),
        )));

        Self {
            memory,
            lifecycle,
            events,
            router,
            audio_tx,
            llm: deps.llm,
            titles: deps.titles,
            refine_before_final: deps.config.refine_before_final,
            workers,
        }
    }

    /// Queue a PCM16 frame for the STT line. Frames arriving after stop
    /// are dropped.
    pub fn push_audio(&self, pcm: Vec<u8>) {
        if self.lifecycle.stopping() {
            return;
        }
        let _ = self.audio_tx.send(pcm);
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    /// Run the finalizer and tear the session down. Safe to call more
    /// than once; only the first call does anything.
    pub async fn stop(&mut self) {
        if !self.lifecycle.begin_stopping() {
            return;
        }

        finalizer::finalize(
            &self.memory,
            &self.lifecycle,
            &self.events,
            &self.router,
            self.llm.as_ref(),
            &self.titles,
            self.refine_before_final,
        )
        .await;

        self.shutdown().await;
    }

    /// Cancel outstanding workers and await them with errors suppressed.
    async fn shutdown(&mut self) {
        if !self.lifecycle.mark_stopped() {
            return;
        }
        for handle in &self.workers {
            handle.abort();
        }
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("worker ended abnormally: {}", e);
                }
            }
        }
        debug!("session shut down");
    }
}

/// Line 1: consume audio, refresh the cumulative transcript, emit drafts,
/// commit on terminal punctuation.
async fn stt_worker(
    memory: Arc<RwLock<SessionMemory>>,
    lifecycle: Arc<Lifecycle>,
    events: EventTx,
    router: Arc<CommitRouter>,
    stt: Arc<dyn SttEngine>,
    mut audio_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let stt_lang = memory.read().await.stt_lang;
    let mut streamer = CumulativeStreamer::new();
    let mut tick = tokio::time::interval(Duration::from_millis(200));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut stop_rx = lifecycle.stop_signal();

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            frame = audio_rx.recv() => match frame {
                Some(pcm) => streamer.push(&pcm),
                None => break,
            },
            _ = tick.tick() => {
                if lifecycle.stopping() {
                    break;
                }
                if !streamer.ready() {
                    continue;
                }
                let wav = match streamer.take_wav() {
                    Ok(wav) => wav,
                    Err(e) => {
                        warn!("stt buffer encode failed: {}", e);
                        continue;
                    }
                };
                match stt.transcribe_wav(&wav, Some(stt_lang)).await {
                    Ok(text) if !text.is_empty() => {
                        on_cumulative(&memory, &events, &router, text).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // transient: report and keep listening
                        events.error(WireError::SttFail, Some(e.to_string())).await;
                    }
                }
            }
        }
    }
    debug!("stt worker exited");
}

/// Handle one cumulative transcription result.
async fn on_cumulative(
    memory: &Arc<RwLock<SessionMemory>>,
    events: &EventTx,
    router: &CommitRouter,
    text: String,
) {
    let draft = {
        let mut mem = memory.write().await;
        mem.stt_cumulative = text;
        mem.last_stt_update = Instant::now();
        mem.normalize_cursor();
        mem.draft().to_string()
    };
    events
        .event(ServerEvent::SttDelta { text: draft.clone() })
        .await;

    if let Some(end) = last_terminal_punct_end(&draft) {
        if router.commit(CommitRange::Upto(end), false).await {
            let updated = router.current_draft().await;
            events.event(ServerEvent::SttDelta { text: updated }).await;
        }
    }
}

/// Coarse idle detector: commit the whole draft after a speech pause.
async fn pause_commit_loop(
    memory: Arc<RwLock<SessionMemory>>,
    lifecycle: Arc<Lifecycle>,
    events: EventTx,
    router: Arc<CommitRouter>,
    pause: Duration,
) {
    let mut tick = tokio::time::interval(Duration::from_millis(180));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut stop_rx = lifecycle.stop_signal();

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = tick.tick() => {
                if lifecycle.stopping() {
                    break;
                }
                let idle_with_text = {
                    let mem = memory.read().await;
                    mem.last_stt_update.elapsed() >= pause
                        && !normalize_segment(mem.draft()).is_empty()
                };
                if !idle_with_text {
                    continue;
                }
                if router.commit(CommitRange::All, false).await {
                    // clear the UI draft line
                    events.event(ServerEvent::SttDelta { text: String::new() }).await;
                }
            }
        }
    }
    debug!("pause-commit loop exited");
}

/// Line 2: translate committed segments strictly in FIFO order, streaming
/// deltas as they arrive from the model.
async fn translate_worker(
    memory: Arc<RwLock<SessionMemory>>,
    lifecycle: Arc<Lifecycle>,
    events: EventTx,
    llm: Arc<dyn Generator>,
    mut commit_rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(segment) = commit_rx.recv().await {
        lifecycle.set_translating(true);

        let prompt = {
            let mem = memory.read().await;
            prompts::translate_segment(
                mem.translate_src,
                mem.translate_tgt,
                &mem.title_name,
                &mem.title_context_tail,
                &mem.summary_context,
                &segment,
            )
        };

        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
        let gen_fut = llm.generate_stream(&prompt, chunk_tx);
        tokio::pin!(gen_fut);

        // Forward deltas in the same task so no commit can overtake its
        // own deltas on the outbound queue.
        let mut result: Option<anyhow::Result<String>> = None;
        loop {
            tokio::select! {
                biased;
                Some(delta) = chunk_rx.recv() => {
                    events.event(ServerEvent::TranslationDelta { delta }).await;
                }
                r = &mut gen_fut, if result.is_none() => {
                    result = Some(r);
                }
                else => break,
            }
        }

        match result {
            Some(Ok(full)) => {
                let text = normalize_segment(&full);
                memory
                    .write()
                    .await
                    .session_tgt_segments
                    .push(text.clone());
                events.event(ServerEvent::TranslationCommit { text }).await;
            }
            Some(Err(e)) => {
                // partial segment produces no commit
                events
                    .error(WireError::TranslateFail, Some(e.to_string()))
                    .await;
            }
            None => {}
        }

        lifecycle.set_translating(false);
        lifecycle.segment_done();
    }
    debug!("translate worker exited");
}

/// Line 3: rebuild the rolling summary on a fixed period.
async fn summary_worker(
    memory: Arc<RwLock<SessionMemory>>,
    lifecycle: Arc<Lifecycle>,
    events: EventTx,
    llm: Arc<dyn Generator>,
    period: Duration,
) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // interval fires immediately; the first summary should wait one period
    tick.tick().await;
    let mut stop_rx = lifecycle.stop_signal();

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = tick.tick() => {
                if lifecycle.stopping() {
                    break;
                }
                let (lang, src2) = {
                    let mem = memory.read().await;
                    let mut text = mem.full_committed_source();
                    let draft = mem.draft().trim();
                    if !draft.is_empty() {
                        if !text.is_empty() {
                            text.push('\n');
                        }
                        text.push_str(draft);
                    }
                    (mem.translate_src, text)
                };
                if src2.trim().is_empty() {
                    continue;
                }
                match llm.generate(&prompts::summary(lang, &src2)).await {
                    Ok(summary) if !summary.trim().is_empty() => {
                        memory.write().await.summary_context = summary.clone();
                        events.event(ServerEvent::SummaryUpdate { summary }).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("summary pass failed: {}", e);
                        events.error(WireError::SummaryFail, Some(e.to_string())).await;
                    }
                }
            }
        }
    }
    debug!("summary worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_terminal_punct_end() {
        assert_eq!(last_terminal_punct_end("Hello world. How are"), Some(12));
        assert_eq!(last_terminal_punct_end("no punctuation"), None);
        assert_eq!(last_terminal_punct_end("a? b! c."), Some(8));
    }

    #[test]
    fn test_last_terminal_punct_end_cjk() {
        let s = "你好。還有";
        let end = last_terminal_punct_end(s).unwrap();
        assert!(s.is_char_boundary(end));
        assert_eq!(&s[..end], "你好。");
    }
}
