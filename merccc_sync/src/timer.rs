// The session timer task.
//
// Spawned by a successful `start-scoring-session`. Ticks on a 50 ms cadence
// and feeds the *measured* elapsed delta into `Competition::tick`, so a late
// wakeup loses no session time. It is the only producer of the time-driven
// transitions (Setup→Run on setup exhaustion, →PostRun once the session
// reports finished); command handlers that want a transition mark the session
// and let the next tick carry it out.
//
// The timer stops itself as soon as the phase leaves Setup/Run, normally by
// issuing the PostRun transition itself. The context's timer slot guarantees
// at most one timer thread at a time. After releasing the slot the thread
// re-checks the phase: a session that started while the slot was still held
// had its own spawn attempt fail, and is adopted instead of left untimed.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use merccc_protocol::Phase;
use tracing::debug;

use crate::context::SyncContext;

/// Tick cadence in milliseconds.
pub const TICK_MS: u64 = 50;

/// Spawn the session timer unless one is already running.
pub fn spawn_session_timer(ctx: Arc<SyncContext>) {
    if !ctx.try_claim_timer() {
        return;
    }
    thread::spawn(move || {
        debug!("session timer started");
        loop {
            run_timer(&ctx);
            ctx.release_timer();
            if !session_active(&ctx) || !ctx.try_claim_timer() {
                break;
            }
            debug!("session timer adopted a freshly started session");
        }
        debug!("session timer stopped");
    });
}

fn session_active(ctx: &SyncContext) -> bool {
    let competition = ctx
        .competition()
        .read()
        .expect("competition lock poisoned");
    matches!(competition.phase(), Phase::Setup | Phase::Run)
}

fn run_timer(ctx: &SyncContext) {
    let mut last = Instant::now();
    loop {
        thread::sleep(Duration::from_millis(TICK_MS));
        let now = Instant::now();
        let delta_ms = now.duration_since(last).as_millis() as u64;
        last = now;

        let (events, active) = {
            let mut competition = ctx
                .competition()
                .write()
                .expect("competition lock poisoned");
            let events = competition.tick(delta_ms);
            let active = matches!(competition.phase(), Phase::Setup | Phase::Run);
            (events, active)
        };
        ctx.broadcast(&events);
        if !active {
            break;
        }
    }
}
