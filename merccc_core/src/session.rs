// The active scoring session.
//
// One session scores one team through a setup phase and a timed run window.
// The attempt counter `runs` has three regimes:
//
//   -1             staging: constructed but not started
//    0             setup phase
//    1..=max       run phase, numbering the in-progress attempt
//
// Committing or discarding an attempt advances `runs` by exactly one; it
// never decreases. The countdown `remaining_ms` covers the *current* phase
// window (setup duration during setup, run window afterwards) and is
// advanced by `tick` while not paused. The session never transitions the
// competition phase itself; the session timer task watches
// `setup_expired`/`finished` and issues those transitions.
//
// A session is replaced, never retargeted: starting a session for another
// team constructs a new `Session`.

use merccc_protocol::TeamNumber;

use crate::team::Score;

/// The single active timed scoring window.
#[derive(Clone, Debug)]
pub struct Session {
    team: TeamNumber,
    max_attempts: u32,
    setup_ms: u64,
    window_ms: u64,
    runs: i64,
    remaining_ms: i64,
    paused: bool,
    stopped: bool,
    score: Score,
}

impl Session {
    /// Construct in the staging regime. Call [`Session::start`] to enter
    /// setup.
    pub fn new(team: TeamNumber, max_attempts: u32, setup_ms: u64, window_ms: u64) -> Self {
        Session {
            team,
            max_attempts,
            setup_ms,
            window_ms,
            runs: -1,
            remaining_ms: setup_ms as i64,
            paused: false,
            stopped: false,
            score: Score::new(),
        }
    }

    /// Rebuild from a `STATE` snapshot on a replica. The configured limits
    /// are not carried on that line; the replica never evaluates
    /// `finished` (the server broadcasts phase transitions), so they are
    /// left at zero.
    pub fn from_snapshot(team: TeamNumber, run: u32, remaining_ms: i64, paused: bool) -> Self {
        Session {
            team,
            max_attempts: 0,
            setup_ms: 0,
            window_ms: 0,
            runs: i64::from(run),
            remaining_ms,
            paused,
            stopped: false,
            score: Score::new(),
        }
    }

    /// Staging → setup.
    pub fn start(&mut self) {
        debug_assert_eq!(self.runs, -1, "session started twice");
        self.runs = 0;
        self.remaining_ms = self.setup_ms as i64;
    }

    /// Setup → run: attempt 1 begins and the run window starts counting.
    pub fn begin_run(&mut self) {
        self.runs = 1;
        self.remaining_ms = self.window_ms as i64;
    }

    pub fn team(&self) -> TeamNumber {
        self.team
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn setup_ms(&self) -> u64 {
        self.setup_ms
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Raw attempt counter (see the regime table above).
    pub fn runs(&self) -> i64 {
        self.runs
    }

    /// Attempt number for the wire: 0 during staging/setup.
    pub fn run_number(&self) -> u32 {
        self.runs.max(0) as u32
    }

    pub fn in_setup(&self) -> bool {
        self.runs == 0
    }

    pub fn remaining_ms(&self) -> i64 {
        self.remaining_ms
    }

    pub fn set_remaining_ms(&mut self, remaining_ms: i64) {
        self.remaining_ms = remaining_ms;
    }

    /// Advance the countdown. No-op while paused or already finished.
    pub fn tick(&mut self, delta_ms: u64) {
        if self.paused || self.stopped {
            return;
        }
        self.remaining_ms -= delta_ms as i64;
    }

    /// Setup time fully consumed (only meaningful in the setup regime).
    pub fn setup_expired(&self) -> bool {
        self.runs == 0 && self.remaining_ms <= 0
    }

    /// Attempts exhausted, window time exhausted, or explicitly stopped.
    pub fn finished(&self) -> bool {
        self.stopped
            || self.runs > i64::from(self.max_attempts)
            || (self.runs >= 1 && self.remaining_ms <= 0)
    }

    /// Mark explicitly stopped; the timer will issue the POST_RUN
    /// transition on its next tick.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn add_time(&mut self, seconds: i64) {
        self.remaining_ms += seconds * 1000;
    }

    /// The in-progress, uncommitted score.
    pub fn score(&self) -> &Score {
        &self.score
    }

    pub fn score_mut(&mut self) -> &mut Score {
        &mut self.score
    }

    /// Take the in-progress score and advance to the next attempt.
    /// `runs` increases by exactly one.
    pub fn take_attempt(&mut self) -> (u32, Score) {
        let attempt = self.run_number();
        self.runs += 1;
        (attempt, std::mem::take(&mut self.score))
    }
}
