// Shared server context.
//
// One `SyncContext` is constructed at startup and handed to every connection
// handler and the session timer as an `Arc`. There are no globals: the
// competition sits behind a std readers-writer lock (writers are the mutating
// command handlers and the timer tick; readers are snapshot serialization),
// and the monitor-subscriber registry behind a plain mutex.
//
// Broadcast discipline: mutations produce their events *inside* the write
// lock but hand them to `broadcast` only after the lock is dropped, so a slow
// or dead monitor connection can never hold up scoring. Each connection owns
// a writer thread fed through the `Sender<OutMsg>` registered here; a failed
// send means that writer is gone and the subscriber is pruned on the spot.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Mutex, RwLock};

use merccc_core::{Competition, ScoringConfig, TeamEntry};
use merccc_protocol::Event;
use tracing::debug;

/// Server-unique connection identifier.
pub type ConnId = u64;

/// One message to a connection's writer thread, which owns the socket's
/// write half exclusively.
pub enum OutMsg {
    /// A line; the writer appends the newline.
    Line(String),
    /// Raw bytes, written verbatim (prompts, NUL-framed replies, file data).
    Raw(Vec<u8>),
}

/// Shared state of a running synchronization server.
pub struct SyncContext {
    competition: RwLock<Competition>,
    config: ScoringConfig,
    subscribers: Mutex<Vec<(ConnId, Sender<OutMsg>)>>,
    resource_root: Mutex<Option<PathBuf>>,
    data_path: Option<PathBuf>,
    timer_active: AtomicBool,
    next_conn_id: AtomicU64,
}

impl SyncContext {
    pub fn new(
        config: ScoringConfig,
        roster: Vec<TeamEntry>,
        resource_root: Option<PathBuf>,
        data_path: Option<PathBuf>,
    ) -> Self {
        let competition = Competition::new(config.clone(), roster);
        SyncContext {
            competition: RwLock::new(competition),
            config,
            subscribers: Mutex::new(Vec::new()),
            resource_root: Mutex::new(resource_root),
            data_path,
            timer_active: AtomicBool::new(false),
            next_conn_id: AtomicU64::new(1),
        }
    }

    pub fn competition(&self) -> &RwLock<Competition> {
        &self.competition
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn resource_root(&self) -> Option<PathBuf> {
        self.resource_root
            .lock()
            .expect("resource root lock poisoned")
            .clone()
    }

    pub fn set_resource_root(&self, path: PathBuf) {
        *self
            .resource_root
            .lock()
            .expect("resource root lock poisoned") = Some(path);
    }

    /// Persisted `DATA` rows re-read by `import-data`, if configured.
    pub fn data_path(&self) -> Option<&PathBuf> {
        self.data_path.as_ref()
    }

    pub fn allocate_conn_id(&self) -> ConnId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a connection's outbox for MONITOR fan-out. The `ack` line is
    /// queued under the registry lock, immediately before the entry is
    /// inserted, so no broadcast can be delivered ahead of it.
    pub fn subscribe(&self, id: ConnId, outbox: Sender<OutMsg>, ack: &str) {
        let mut subscribers = self
            .subscribers
            .lock()
            .expect("subscriber registry poisoned");
        let _ = outbox.send(OutMsg::Line(ack.to_string()));
        subscribers.push((id, outbox));
    }

    pub fn unsubscribe(&self, id: ConnId) {
        self.subscribers
            .lock()
            .expect("subscriber registry poisoned")
            .retain(|(sub, _)| *sub != id);
    }

    /// Number of registered MONITOR subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("subscriber registry poisoned")
            .len()
    }

    /// Fan events out to every MONITOR subscriber, in order, pruning
    /// subscribers whose writer is gone. Callers must have released the
    /// competition lock first.
    pub fn broadcast(&self, events: &[Event]) {
        if events.is_empty() {
            return;
        }
        let mut subs = self
            .subscribers
            .lock()
            .expect("subscriber registry poisoned");
        for event in events {
            let line = event.to_line();
            subs.retain(|(id, outbox)| {
                if outbox.send(OutMsg::Line(line.clone())).is_ok() {
                    true
                } else {
                    debug!(conn = *id, "pruning dead monitor subscriber");
                    false
                }
            });
        }
    }

    /// Claim the single session-timer slot. Returns false when a timer is
    /// already running.
    pub fn try_claim_timer(&self) -> bool {
        self.timer_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn release_timer(&self) {
        self.timer_active.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use merccc_protocol::TeamNumber;
    use std::sync::{Arc, mpsc};
    use std::thread;

    fn context() -> SyncContext {
        let config = ScoringConfig::from_raw(
            r#"{"fields": [{"key": "gates"}], "formula": ["gates"]}"#.to_string(),
            "test",
        )
        .unwrap();
        let roster = vec![TeamEntry {
            number: 7,
            name: "Alpha".into(),
            institution: "North".into(),
            logo: "".into(),
        }];
        SyncContext::new(config, roster, None, None)
    }

    #[test]
    fn broadcast_prunes_dead_subscribers() {
        let ctx = context();
        let (live_tx, live_rx) = mpsc::channel();
        let (dead_tx, dead_rx) = mpsc::channel();
        ctx.subscribe(1, live_tx, "MONITOR");
        ctx.subscribe(2, dead_tx, "MONITOR");
        drop(dead_rx);

        ctx.broadcast(&[Event::TeamPreSelect {
            team: TeamNumber(7),
        }]);
        assert_eq!(ctx.subscriber_count(), 1);
        let lines: Vec<String> = live_rx
            .try_iter()
            .map(|msg| match msg {
                OutMsg::Line(line) => line,
                OutMsg::Raw(_) => panic!("expected a line"),
            })
            .collect();
        assert_eq!(lines, ["MONITOR", "TEAM_PRE_SELECT 7"]);
    }

    #[test]
    fn subscription_ack_precedes_any_broadcast() {
        let ctx = Arc::new(context());
        let stop = Arc::new(AtomicBool::new(false));
        let broadcaster = {
            let ctx = Arc::clone(&ctx);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    ctx.broadcast(&[Event::TeamPreSelect {
                        team: TeamNumber(7),
                    }]);
                }
            })
        };

        let (tx, rx) = mpsc::channel();
        ctx.subscribe(1, tx, "MONITOR");
        stop.store(true, Ordering::SeqCst);
        broadcaster.join().unwrap();

        match rx.recv().unwrap() {
            OutMsg::Line(line) => assert_eq!(line, "MONITOR"),
            OutMsg::Raw(_) => panic!("expected a line"),
        }
    }

    #[test]
    fn timer_slot_is_exclusive() {
        let ctx = context();
        assert!(ctx.try_claim_timer());
        assert!(!ctx.try_claim_timer());
        ctx.release_timer();
        assert!(ctx.try_claim_timer());
    }

    #[test]
    fn unsubscribe_removes_only_the_one_connection() {
        let ctx = context();
        let (tx_a, _rx_a) = mpsc::channel();
        let (tx_b, _rx_b) = mpsc::channel();
        ctx.subscribe(1, tx_a, "MONITOR");
        ctx.subscribe(2, tx_b, "MONITOR");
        ctx.unsubscribe(1);
        assert_eq!(ctx.subscriber_count(), 1);
    }
}
