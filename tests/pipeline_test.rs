//! End-to-end pipeline scenarios against scripted mock engines:
//! punctuation commits, pause commits, graceful stop with an in-flight
//! translation, and a mid-stream LLM failure.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

use vivoice::config::PipelineConfig;
use vivoice::history::titles::TitleStore;
use vivoice::llm::prompts::Lang;
use vivoice::llm::Generator;
use vivoice::protocol::ServerEvent;
use vivoice::session::memory::SessionMemory;
use vivoice::session::pipeline::{Pipeline, PipelineDeps};
use vivoice::session::{EventTx, Lifecycle, Outbound};
use vivoice::stt::SttEngine;

/// STT engine that replays a scripted sequence of cumulative transcripts,
/// one per transcription request.
struct ScriptedStt {
    script: Mutex<Vec<&'static str>>,
}

impl ScriptedStt {
    fn new(script: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
        })
    }
}

#[async_trait]
impl SttEngine for ScriptedStt {
    async fn transcribe_wav(&self, _wav: &[u8], _language: Option<Lang>) -> Result<String> {
        let mut script = self.script.lock().expect("script lock");
        if script.is_empty() {
            // script exhausted: nothing new to report
            Ok(String::new())
        } else {
            Ok(script.remove(0).to_string())
        }
    }
}

/// Deterministic translator: echoes `<<segment>>`, streamed in two chunks.
/// Prompts whose segment contains `FAIL` abort mid-stream after one chunk.
struct MockTranslator {
    delay_ms: u64,
}

impl MockTranslator {
    fn new(delay_ms: u64) -> Arc<Self> {
        Arc::new(Self { delay_ms })
    }

    fn segment_of(prompt: &str) -> String {
        after_marker(prompt, "NEW SEGMENT (translate this):")
    }
}

/// Text after the last occurrence of `marker`, or the whole prompt
fn after_marker(prompt: &str, marker: &str) -> String {
    match prompt.rsplit_once(marker) {
        Some((_, rest)) => rest.trim().to_string(),
        None => prompt.trim().to_string(),
    }
}

#[async_trait]
impl Generator for MockTranslator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = after_marker(prompt, "FULL TEXT:");
        Ok(format!("<<{}>>", body))
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        chunk_tx: mpsc::UnboundedSender<String>,
    ) -> Result<String> {
        let segment = Self::segment_of(prompt);

        let _ = chunk_tx.send("<<".to_string());
        if segment.contains("FAIL") {
            anyhow::bail!("stream closed mid-flight");
        }
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        let _ = chunk_tx.send(format!("{}>>", segment));
        Ok(format!("<<{}>>", segment))
    }
}

struct Harness {
    pipeline: Pipeline,
    memory: Arc<RwLock<SessionMemory>>,
    events: mpsc::Receiver<Outbound>,
    _dir: tempfile::TempDir,
}

fn harness(stt: Arc<ScriptedStt>, llm: Arc<MockTranslator>, config: PipelineConfig) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let titles = Arc::new(TitleStore::new(dir.path()).expect("title store"));
    titles.ensure("t1", Some("Demo")).expect("ensure title");

    let memory = Arc::new(RwLock::new(SessionMemory::new(
        "t1".into(),
        "Demo".into(),
        Lang::En,
        Lang::En,
        Lang::Vi,
    )));
    let lifecycle = Lifecycle::new();
    let (out_tx, out_rx) = mpsc::channel(1024);
    let events = EventTx::new(out_tx, lifecycle.clone());

    let pipeline = Pipeline::start(
        memory.clone(),
        lifecycle,
        events,
        PipelineDeps {
            stt,
            llm,
            titles,
            config,
        },
    );

    Harness {
        pipeline,
        memory,
        events: out_rx,
        _dir: dir,
    }
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        min_commit_chars: 10,
        pause_commit_sec: 0.5,
        summary_period_sec: 3600, // keep the summary line quiet
        refine_before_final: false,
    }
}

fn drain(events: &mut mpsc::Receiver<Outbound>) -> Vec<ServerEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = events.try_recv() {
        if let Outbound::Event(ev) = ev {
            out.push(ev);
        }
    }
    out
}

fn audio_frame() -> Vec<u8> {
    // 100 ms of silence keeps the streamer busy
    vec![0u8; 3200]
}

async fn feed_audio_until<F>(h: &mut Harness, mut seen: F, timeout_ms: u64) -> Vec<ServerEvent>
where
    F: FnMut(&[ServerEvent]) -> bool,
{
    let mut collected = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        h.pipeline.push_audio(audio_frame());
        tokio::time::sleep(Duration::from_millis(100)).await;
        collected.extend(drain(&mut h.events));
        if seen(&collected) || tokio::time::Instant::now() >= deadline {
            return collected;
        }
    }
}

// ─── S1: punctuation commit ──────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn punctuation_commit_splits_draft() {
    let stt = ScriptedStt::new(vec![
        "Hello world. How are",
        "Hello world. How are you?",
    ]);
    let llm = MockTranslator::new(10);
    let mut h = harness(stt, llm, fast_config());

    let events = feed_audio_until(
        &mut h,
        |evs| {
            evs.iter()
                .filter(|e| matches!(e, ServerEvent::SttCommit { .. }))
                .count()
                >= 2
        },
        5000,
    )
    .await;

    let commits: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::SttCommit { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(commits, vec!["Hello world.", "How are you?"]);

    // the first commit is followed by a draft replacement containing the rest
    let first_commit = events
        .iter()
        .position(|e| matches!(e, ServerEvent::SttCommit { .. }))
        .expect("first commit");
    let later_draft = events[first_commit..].iter().find_map(|e| match e {
        ServerEvent::SttDelta { text } => Some(text.clone()),
        _ => None,
    });
    assert!(
        later_draft.expect("draft after commit").contains("How are"),
        "draft after first commit should carry the remainder"
    );

    h.pipeline.stop().await;
}

// ─── S2: pause commit ────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn pause_commit_flushes_idle_draft() {
    let stt = ScriptedStt::new(vec!["temperature is twenty four"]);
    let llm = MockTranslator::new(10);
    let mut h = harness(stt, llm, fast_config());

    // feed enough audio for one transcription, then go silent
    for _ in 0..12 {
        h.pipeline.push_audio(audio_frame());
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let events = drain(&mut h.events);
    let commits: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::SttCommit { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(commits, vec!["temperature is twenty four"]);

    // the pause commit clears the draft line
    let commit_pos = events
        .iter()
        .position(|e| matches!(e, ServerEvent::SttCommit { .. }))
        .expect("commit");
    assert!(
        events[commit_pos..]
            .iter()
            .any(|e| matches!(e, ServerEvent::SttDelta { text } if text.is_empty())),
        "empty stt.delta should follow the pause commit"
    );

    h.pipeline.stop().await;
}

// ─── S5: graceful stop with in-flight translation ────────────

#[tokio::test(flavor = "multi_thread")]
async fn graceful_stop_waits_for_inflight_translation() {
    let stt = ScriptedStt::new(vec!["This is a committed sentence."]);
    // slow enough that stop arrives while the translation is mid-stream
    let llm = MockTranslator::new(600);
    let mut h = harness(stt, llm, fast_config());

    let _ = feed_audio_until(
        &mut h,
        |evs| evs.iter().any(|e| matches!(e, ServerEvent::SttCommit { .. })),
        5000,
    )
    .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    h.pipeline.stop().await;
    // second stop must be a no-op
    h.pipeline.stop().await;

    let events = drain(&mut h.events);
    let translation_commits = events
        .iter()
        .filter(|e| matches!(e, ServerEvent::TranslationCommit { .. }))
        .count();
    assert_eq!(translation_commits, 1, "in-flight translation completes");

    let finals: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::FinalResult { source, target, .. } => Some((source, target)),
            _ => None,
        })
        .collect();
    assert_eq!(finals.len(), 1, "exactly one final.result");
    let (source, target) = finals[0];
    assert_eq!(source, "This is a committed sentence.");
    assert_eq!(target, &format!("<<{}>>", source));

    // persisted round-trip: the title store carries the reconciled pair
    let mem = h.memory.read().await;
    assert_eq!(mem.session_src_segments.len(), 1);
    assert_eq!(mem.session_tgt_segments.len(), 1);
}

// ─── S6: mid-stream LLM failure ──────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn translation_failure_skips_segment_and_continues() {
    let stt = ScriptedStt::new(vec![
        "alpha FAIL sentence one.",
        "alpha FAIL sentence one. beta recovers fine after that.",
    ]);
    let llm = MockTranslator::new(10);
    let mut h = harness(stt, llm, fast_config());

    let events = feed_audio_until(
        &mut h,
        |evs| {
            evs.iter()
                .any(|e| matches!(e, ServerEvent::TranslationCommit { .. }))
        },
        6000,
    )
    .await;

    let errors: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::Error { error, .. } => Some(error.as_str()),
            _ => None,
        })
        .collect();
    assert!(errors.contains(&"translate_fail"), "errors seen: {:?}", errors);

    // the failed segment never commits; the next one does
    let commits: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::TranslationCommit { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(commits.len(), 1);
    assert!(commits[0].contains("beta"));
    assert!(!commits[0].contains("FAIL"));

    // invariant 4: targets never outrun sources
    let mem = h.memory.read().await;
    assert!(mem.session_tgt_segments.len() <= mem.session_src_segments.len());
    drop(mem);

    h.pipeline.stop().await;
}

// ─── Ordering: stt.commit precedes its translation events ────

#[tokio::test(flavor = "multi_thread")]
async fn commit_ordering_is_strict() {
    let stt = ScriptedStt::new(vec![
        "First sentence here.",
        "First sentence here. Second sentence there.",
    ]);
    let llm = MockTranslator::new(20);
    let mut h = harness(stt, llm, fast_config());

    let events = feed_audio_until(
        &mut h,
        |evs| {
            evs.iter()
                .filter(|e| matches!(e, ServerEvent::TranslationCommit { .. }))
                .count()
                >= 2
        },
        8000,
    )
    .await;

    let mut stt_commits = Vec::new();
    let mut translation_commits = Vec::new();
    for (i, ev) in events.iter().enumerate() {
        match ev {
            ServerEvent::SttCommit { text } => stt_commits.push((i, text.clone())),
            ServerEvent::TranslationCommit { text } => {
                translation_commits.push((i, text.clone()))
            }
            _ => {}
        }
    }
    assert_eq!(stt_commits.len(), 2);
    assert_eq!(translation_commits.len(), 2);

    // pairwise: each stt.commit precedes its translation.commit, and the
    // translated text matches the source segment one-for-one
    for ((si, src), (ti, tgt)) in stt_commits.iter().zip(&translation_commits) {
        assert!(si < ti, "stt.commit must precede translation.commit");
        assert_eq!(tgt, &format!("<<{}>>", src));
    }

    h.pipeline.stop().await;
}
