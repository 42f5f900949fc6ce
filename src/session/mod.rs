//! Per-session concurrent pipeline
//!
//! Each accepted WebSocket owns one session: a typed memory record, three
//! internal channels, and a set of cooperating workers
//! (STT → commit → streaming translation, plus the periodic summary and
//! the pause-commit loop). The supervisor in `pipeline` owns worker
//! lifecycles; `finalizer` runs the stop path exactly once.

pub mod commit;
pub mod finalizer;
pub mod memory;
pub mod pipeline;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::protocol::ServerEvent;

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// WS accepted; only `init` is honored
    Connected,
    /// Memory and persisted state loaded; waiting for `start`
    Initialized,
    /// Workers running
    Active,
    /// Finalizer running; audio is ignored
    Stopping,
    /// Terminal; all resources released
    Closed,
}

/// Outbound frame queued for the socket sender task
#[derive(Debug)]
pub enum Outbound {
    Event(ServerEvent),
    Binary(Vec<u8>),
}

/// Monotonic lifecycle flags shared by all workers.
///
/// `stopping` and `stopped` only ever go false→true. `translating` and
/// `pending_segments` let the finalizer observe quiescence without
/// draining the commit channel itself.
pub struct Lifecycle {
    stopping: AtomicBool,
    stopped: AtomicBool,
    translating: AtomicBool,
    pending_segments: AtomicUsize,
    stop_tx: watch::Sender<bool>,
}

impl Lifecycle {
    pub fn new() -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            stopping: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            translating: AtomicBool::new(false),
            pending_segments: AtomicUsize::new(0),
            stop_tx,
        })
    }

    /// First caller wins; later callers see `false` and must not re-run
    /// the stop path.
    pub fn begin_stopping(&self) -> bool {
        let first = !self.stopping.swap(true, Ordering::SeqCst);
        if first {
            let _ = self.stop_tx.send(true);
        }
        first
    }

    pub fn stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub fn mark_stopped(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    pub fn set_translating(&self, v: bool) {
        self.translating.store(v, Ordering::SeqCst);
    }

    pub fn translating(&self) -> bool {
        self.translating.load(Ordering::SeqCst)
    }

    pub fn segment_enqueued(&self) {
        self.pending_segments.fetch_add(1, Ordering::SeqCst);
    }

    pub fn segment_done(&self) {
        self.pending_segments.fetch_sub(1, Ordering::SeqCst);
    }

    /// Commit channel empty and no segment mid-translation
    pub fn quiescent(&self) -> bool {
        self.pending_segments.load(Ordering::SeqCst) == 0 && !self.translating()
    }
}

/// Handle for emitting events toward the client.
///
/// Once the session is stopped all sends become no-ops, which is what
/// guarantees "no further WS sends after `stopped`" without racing the
/// sender task teardown.
#[derive(Clone)]
pub struct EventTx {
    tx: mpsc::Sender<Outbound>,
    lifecycle: Arc<Lifecycle>,
}

impl EventTx {
    pub fn new(tx: mpsc::Sender<Outbound>, lifecycle: Arc<Lifecycle>) -> Self {
        Self { tx, lifecycle }
    }

    pub async fn event(&self, event: ServerEvent) {
        if self.lifecycle.stopped() {
            return;
        }
        let _ = self.tx.send(Outbound::Event(event)).await;
    }

    pub async fn binary(&self, data: Vec<u8>) {
        if self.lifecycle.stopped() {
            return;
        }
        let _ = self.tx.send(Outbound::Binary(data)).await;
    }

    pub async fn error(&self, tag: crate::protocol::WireError, detail: Option<String>) {
        self.event(ServerEvent::error(tag, detail)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_stopping_single_shot() {
        let lc = Lifecycle::new();
        assert!(lc.begin_stopping());
        assert!(!lc.begin_stopping());
        assert!(lc.stopping());
    }

    #[test]
    fn test_quiescence_tracking() {
        let lc = Lifecycle::new();
        assert!(lc.quiescent());
        lc.segment_enqueued();
        assert!(!lc.quiescent());
        lc.set_translating(true);
        lc.segment_done();
        assert!(!lc.quiescent());
        lc.set_translating(false);
        assert!(lc.quiescent());
    }

    #[tokio::test]
    async fn test_event_tx_gated_by_stopped() {
        let lc = Lifecycle::new();
        let (tx, mut rx) = mpsc::channel(8);
        let events = EventTx::new(tx, lc.clone());

        events.event(ServerEvent::Ack { status: "started".into() }).await;
        assert!(rx.try_recv().is_ok());

        lc.begin_stopping();
        lc.mark_stopped();
        events.event(ServerEvent::Ack { status: "late".into() }).await;
        assert!(rx.try_recv().is_err());
    }
}
