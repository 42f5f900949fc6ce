//! Commit router
//!
//! Freezes slices of the cumulative transcript into immutable segments:
//! normalizes whitespace, enforces the minimum commit length, dedupes
//! against the previous commit, appends to the session segment list, and
//! hands the segment to the translation line.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use super::memory::SessionMemory;
use super::{EventTx, Lifecycle};
use crate::protocol::ServerEvent;

/// Collapse internal whitespace and trim the ends
pub fn normalize_segment(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn segment_hash(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// How far to commit
#[derive(Debug, Clone, Copy)]
pub enum CommitRange {
    /// Commit the draft up to this byte offset (relative to the draft)
    Upto(usize),
    /// Commit the whole draft
    All,
}

pub struct CommitRouter {
    memory: Arc<RwLock<SessionMemory>>,
    lifecycle: Arc<Lifecycle>,
    commit_tx: mpsc::UnboundedSender<String>,
    events: EventTx,
    min_commit_chars: usize,
}

impl CommitRouter {
    pub fn new(
        memory: Arc<RwLock<SessionMemory>>,
        lifecycle: Arc<Lifecycle>,
        commit_tx: mpsc::UnboundedSender<String>,
        events: EventTx,
        min_commit_chars: usize,
    ) -> Self {
        Self {
            memory,
            lifecycle,
            commit_tx,
            events,
            min_commit_chars,
        }
    }

    /// Try to commit part of the current draft.
    ///
    /// `bypass_min` is only set on the explicit end-of-session flush.
    /// Returns `true` when a segment was committed (the cursor advanced
    /// and a `stt.commit` event went out).
    pub async fn commit(&self, range: CommitRange, bypass_min: bool) -> bool {
        // The finalizer's flush is the single exception to the
        // no-commits-after-stopping rule.
        if self.lifecycle.stopping() && !bypass_min {
            return false;
        }

        let segment = {
            let mut mem = self.memory.write().await;
            let draft = mem.draft();
            let end = match range {
                CommitRange::Upto(end) => end.min(draft.len()),
                CommitRange::All => draft.len(),
            };
            if end == 0 {
                return false;
            }

            let normalized = normalize_segment(&draft[..end]);
            if normalized.is_empty() {
                return false;
            }
            if !bypass_min && normalized.chars().count() < self.min_commit_chars {
                return false;
            }

            let hash = segment_hash(&normalized);
            if hash == mem.last_commit_hash {
                // Same text again: swallow the duplicate but still advance
                // the cursor past it so the draft does not replay it.
                mem.stt_committed_len += end;
                mem.normalize_cursor();
                debug!("Duplicate commit suppressed ({} chars)", normalized.len());
                return false;
            }

            mem.stt_committed_len += end;
            mem.normalize_cursor();
            mem.last_commit_hash = hash;
            mem.session_src_segments.push(normalized.clone());
            normalized
        };

        debug!("Committed segment: \"{}\"", segment);
        self.lifecycle.segment_enqueued();
        if self.commit_tx.send(segment.clone()).is_err() {
            // translation line already gone (shutdown); undo the pending count
            self.lifecycle.segment_done();
        }
        self.events
            .event(ServerEvent::SttCommit { text: segment })
            .await;
        true
    }

    /// Current draft after normalization, for emission
    pub async fn current_draft(&self) -> String {
        let mem = self.memory.read().await;
        mem.draft().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::prompts::Lang;
    use crate::session::Outbound;

    fn setup(
        min_chars: usize,
    ) -> (
        CommitRouter,
        Arc<RwLock<SessionMemory>>,
        mpsc::UnboundedReceiver<String>,
        mpsc::Receiver<Outbound>,
        Arc<Lifecycle>,
    ) {
        let memory = Arc::new(RwLock::new(SessionMemory::new(
            "t1".into(),
            "Demo".into(),
            Lang::En,
            Lang::En,
            Lang::Vi,
        )));
        let lifecycle = Lifecycle::new();
        let (commit_tx, commit_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::channel(16);
        let events = EventTx::new(out_tx, lifecycle.clone());
        let router = CommitRouter::new(
            memory.clone(),
            lifecycle.clone(),
            commit_tx,
            events,
            min_chars,
        );
        (router, memory, commit_rx, out_rx, lifecycle)
    }

    #[tokio::test]
    async fn test_commit_advances_cursor_and_enqueues() {
        let (router, memory, mut commit_rx, mut out_rx, _) = setup(5);
        memory.write().await.stt_cumulative = "Hello world. How are".into();

        assert!(router.commit(CommitRange::Upto(12), false).await);

        let mem = memory.read().await;
        assert_eq!(mem.session_src_segments, vec!["Hello world.".to_string()]);
        assert_eq!(mem.draft(), " How are");
        drop(mem);

        assert_eq!(commit_rx.try_recv().unwrap(), "Hello world.");
        match out_rx.try_recv().unwrap() {
            Outbound::Event(ServerEvent::SttCommit { text }) => {
                assert_eq!(text, "Hello world.")
            }
            other => panic!("unexpected outbound: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_below_min_rejected_without_cursor_move() {
        let (router, memory, _commit_rx, _out_rx, _) = setup(20);
        memory.write().await.stt_cumulative = "short text.".into();

        assert!(!router.commit(CommitRange::All, false).await);
        assert_eq!(memory.read().await.stt_committed_len, 0);
    }

    #[tokio::test]
    async fn test_bypass_min_on_final_flush() {
        let (router, memory, mut commit_rx, _out_rx, lifecycle) = setup(20);
        memory.write().await.stt_cumulative = "bye.".into();
        lifecycle.begin_stopping();

        assert!(router.commit(CommitRange::All, true).await);
        assert_eq!(commit_rx.try_recv().unwrap(), "bye.");
    }

    #[tokio::test]
    async fn test_dedup_suppresses_but_advances() {
        let (router, memory, mut commit_rx, _out_rx, _) = setup(3);
        memory.write().await.stt_cumulative = "again. again.".into();

        assert!(router.commit(CommitRange::Upto(6), false).await);
        assert_eq!(commit_rx.try_recv().unwrap(), "again.");

        // identical normalized text: suppressed, cursor still advances
        assert!(!router.commit(CommitRange::All, false).await);
        let mem = memory.read().await;
        assert_eq!(mem.session_src_segments.len(), 1);
        assert_eq!(mem.draft(), "");
    }

    #[tokio::test]
    async fn test_no_commits_while_stopping() {
        let (router, memory, _commit_rx, _out_rx, lifecycle) = setup(3);
        memory.write().await.stt_cumulative = "pending words here.".into();
        lifecycle.begin_stopping();

        assert!(!router.commit(CommitRange::All, false).await);
    }

    #[test]
    fn test_normalize_segment() {
        assert_eq!(normalize_segment("  a \n b\t c  "), "a b c");
        assert_eq!(normalize_segment("   "), "");
    }
}
