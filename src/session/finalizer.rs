//! Finalizer: the stop path
//!
//! Runs once per session, driven by the supervisor after `stopping` is
//! set. Flushes the remaining draft, waits bounded for the translation
//! line to drain, reconciles the full source with one last LLM pass,
//! persists the title history, and emits exactly one `final.result`.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::commit::{CommitRange, CommitRouter};
use super::memory::SessionMemory;
use super::{EventTx, Lifecycle};
use crate::history::titles::TitleStore;
use crate::llm::prompts;
use crate::llm::Generator;
use crate::protocol::{ServerEvent, WireError};

/// Grace for in-flight STT before the draft flush
const SETTLE_GRACE: Duration = Duration::from_millis(400);
/// Ceiling on the quiescence wait
const QUIESCENCE_TIMEOUT: Duration = Duration::from_secs(2);
const QUIESCENCE_POLL: Duration = Duration::from_millis(50);

pub async fn finalize(
    memory: &Arc<RwLock<SessionMemory>>,
    lifecycle: &Arc<Lifecycle>,
    events: &EventTx,
    router: &CommitRouter,
    llm: &dyn Generator,
    titles: &TitleStore,
    refine_before_final: bool,
) {
    // let in-flight STT settle
    tokio::time::sleep(SETTLE_GRACE).await;

    // flush whatever draft remains; only this path may bypass the minimum
    // commit length
    if router.commit(CommitRange::All, true).await {
        events
            .event(ServerEvent::SttDelta {
                text: String::new(),
            })
            .await;
    }

    // wait (bounded) until the commit channel is empty and nothing is
    // mid-translation
    let deadline = tokio::time::Instant::now() + QUIESCENCE_TIMEOUT;
    while !lifecycle.quiescent() {
        if tokio::time::Instant::now() >= deadline {
            warn!("quiescence wait timed out; reconciling anyway");
            break;
        }
        tokio::time::sleep(QUIESCENCE_POLL).await;
    }

    let snap = memory.read().await.snapshot();

    match reconcile(llm, titles, &snap, refine_before_final).await {
        Ok((source, target)) => {
            memory.write().await.title_context_tail =
                crate::history::titles::build_title_context_tail(&source, &target, 12);
            info!(
                "session finalized: {} source chars, {} target chars",
                source.len(),
                target.len()
            );
            events
                .event(ServerEvent::FinalResult {
                    source,
                    target,
                    summary: snap.summary_context.clone(),
                })
                .await;
        }
        Err(e) => {
            warn!("finalization failed: {}", e);
            events
                .error(WireError::FinalTranslateFail, Some(e.to_string()))
                .await;
        }
    }
}

/// Reconciliation pass: optional source cleanup, full retranslation, then
/// persistence (source first so a crash between the two writes leaves
/// recoverable state).
async fn reconcile(
    llm: &dyn Generator,
    titles: &TitleStore,
    snap: &super::memory::MemorySnapshot,
    refine: bool,
) -> anyhow::Result<(String, String)> {
    let mut source = snap.full_source.clone();
    if source.trim().is_empty() {
        return Ok((String::new(), String::new()));
    }

    if refine {
        match llm
            .generate(&prompts::refine_source(
                snap.translate_src,
                &snap.title_name,
                &source,
            ))
            .await
        {
            Ok(refined) if !refined.trim().is_empty() => source = refined.trim().to_string(),
            Ok(_) => {}
            Err(e) => warn!("refine pass failed, keeping raw source: {}", e),
        }
    }

    let target = llm
        .generate(&prompts::final_translate(
            snap.translate_src,
            snap.translate_tgt,
            &snap.title_name,
            &snap.title_context_tail,
            &source,
        ))
        .await?
        .trim()
        .to_string();

    titles.write_source(&snap.title_id, &source)?;
    titles.write_target(&snap.title_id, &target)?;

    Ok((source, target))
}
