// The competition state machine.
//
// Module overview:
// `Competition` owns the roster, the recorded score data, the current phase,
// and the active `Session` if any. Every mutation entry point returns the
// broadcast events it produced; the caller (the sync server) fans them out
// after releasing its lock, so this module stays free of any I/O or observer
// registration.
//
// Design decisions:
// - Phase invariant: `phase != Idle` if and only if a session is present.
//   Every transition maintains it; `state_line` relies on it.
// - Phase transitions driven by elapsed time (Setup→Run, anything→PostRun)
//   happen only inside `tick`. Commands like `stop-scoring-session` mark the
//   session and let the next tick carry out the transition, so there is a
//   single writer for time-ordered events.
// - `apply_event` is the replica-side mirror: one arm per event variant,
//   reconstructing the same state the server mutated. Display directives are
//   broadcast-only and mirror to nothing.

use std::collections::BTreeMap;

use merccc_protocol::event::Event;
use merccc_protocol::snapshot::{
    ClassificationLine, DataLine, RankResult, SessionState, StateLine, TeamLine,
};
use merccc_protocol::types::{Phase, TeamNumber};
use thiserror::Error;

use crate::config::{ScoringConfig, TeamEntry};
use crate::session::Session;
use crate::team::{Score, Team};

/// Rejected state mutations. Reported to the commanding client as an
/// `ERROR <detail>` line; never fatal to the server.
#[derive(Debug, Error, PartialEq)]
pub enum StateError {
    #[error("unknown team {0}")]
    UnknownTeam(TeamNumber),
    #[error("{op} is not allowed in phase {phase:?}")]
    WrongPhase { op: &'static str, phase: Phase },
    #[error("no active session")]
    NoSession,
    #[error("unknown score field '{0}'")]
    UnknownField(String),
    #[error("team {team} has no record {index}")]
    NoSuchRecord { team: TeamNumber, index: usize },
    #[error("expected {expected} field values, got {got}")]
    WrongValueCount { expected: usize, got: usize },
}

/// The whole scoring state of one competition.
#[derive(Clone, Debug)]
pub struct Competition {
    config: ScoringConfig,
    teams: Vec<Team>,
    index: BTreeMap<u32, usize>,
    phase: Phase,
    session: Option<Session>,
    red_flagged: bool,
}

impl Competition {
    /// Fresh competition from a validated config and roster.
    pub fn new(config: ScoringConfig, roster: Vec<TeamEntry>) -> Self {
        let teams: Vec<Team> = roster
            .into_iter()
            .map(|entry| {
                Team::new(
                    TeamNumber(entry.number),
                    entry.name,
                    entry.institution,
                    entry.logo,
                )
            })
            .collect();
        let index = teams
            .iter()
            .enumerate()
            .map(|(pos, team)| (team.number.0, pos))
            .collect();
        Competition {
            config,
            teams,
            index,
            phase: Phase::Idle,
            session: None,
            red_flagged: false,
        }
    }

    /// Replica seeding: build the roster from a `teams` snapshot. The best
    /// column is ignored; it is derived again from the `data` rows.
    pub fn from_team_lines(config: ScoringConfig, lines: &[TeamLine]) -> Self {
        let roster = lines
            .iter()
            .map(|line| TeamEntry {
                number: line.number.0,
                name: line.name.clone(),
                institution: line.institution.clone(),
                logo: line.logo.clone(),
            })
            .collect();
        Self::new(config, roster)
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn red_flagged(&self) -> bool {
        self.red_flagged
    }

    /// Teams in roster order.
    pub fn teams(&self) -> &[Team] {
        &self.teams
    }

    pub fn team(&self, number: TeamNumber) -> Result<&Team, StateError> {
        let pos = *self
            .index
            .get(&number.0)
            .ok_or(StateError::UnknownTeam(number))?;
        Ok(&self.teams[pos])
    }

    fn team_mut(&mut self, number: TeamNumber) -> Result<&mut Team, StateError> {
        let pos = *self
            .index
            .get(&number.0)
            .ok_or(StateError::UnknownTeam(number))?;
        Ok(&mut self.teams[pos])
    }

    fn require_phase(&self, op: &'static str, allowed: &[Phase]) -> Result<(), StateError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(StateError::WrongPhase {
                op,
                phase: self.phase,
            })
        }
    }

    fn field_keys(&self) -> Vec<String> {
        self.config
            .fields()
            .iter()
            .map(|f| f.key.clone())
            .collect()
    }

    /// A wire value row must cover the configured fields exactly.
    fn require_row_arity(&self, values: &[f64]) -> Result<(), StateError> {
        let expected = self.config.fields().len();
        if values.len() != expected {
            return Err(StateError::WrongValueCount {
                expected,
                got: values.len(),
            });
        }
        Ok(())
    }

    /// Build a completed record from a raw value row in configured field
    /// order.
    fn score_from_values(&self, values: &[f64]) -> Score {
        let mut score = Score::new();
        for (spec, value) in self.config.fields().iter().zip(values) {
            score.set_field(&spec.key, *value);
        }
        score.complete(self.config.formula());
        score
    }

    /// Place a record at an exact index, padding with holes so wire indices
    /// stay stable. Shared by import and replica mirroring.
    fn place_record(
        &mut self,
        number: TeamNumber,
        index: usize,
        score: Score,
    ) -> Result<(), StateError> {
        let team = self.team_mut(number)?;
        while team.scores().len() < index {
            team.push_hole();
        }
        if team.scores().len() == index {
            team.push_score(score);
        } else {
            team.replace_score(index, score);
        }
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Session lifecycle
    // ----------------------------------------------------------------------

    /// Idle or PostRun → Setup. A leftover PostRun session is replaced.
    pub fn start_session(
        &mut self,
        team: TeamNumber,
        max_attempts: u32,
        setup_ms: u64,
        window_ms: u64,
    ) -> Result<Vec<Event>, StateError> {
        self.require_phase("start-scoring-session", &[Phase::Idle, Phase::PostRun])?;
        self.team(team)?;
        let mut session = Session::new(team, max_attempts, setup_ms, window_ms);
        session.start();
        self.session = Some(session);
        self.phase = Phase::Setup;
        self.red_flagged = false;
        Ok(vec![Event::StateChangeSetup {
            team,
            max_attempts,
            setup_sec: setup_ms / 1000,
            run_sec: window_ms / 1000,
        }])
    }

    /// Operator override: Setup → Run without waiting for the setup window.
    pub fn skip_setup(&mut self) -> Result<Vec<Event>, StateError> {
        self.require_phase("skip-setup", &[Phase::Setup])?;
        let session = self.session.as_mut().ok_or(StateError::NoSession)?;
        session.begin_run();
        self.phase = Phase::Run;
        Ok(vec![Event::StateChangeRun])
    }

    /// Advance the session clock. The only producer of the time-driven
    /// transitions; infallible (no session means nothing to advance).
    pub fn tick(&mut self, delta_ms: u64) -> Vec<Event> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        session.tick(delta_ms);
        match self.phase {
            Phase::Setup if session.finished() => {
                self.phase = Phase::PostRun;
                vec![Event::StateChangePostRun]
            }
            Phase::Setup if session.setup_expired() => {
                session.begin_run();
                self.phase = Phase::Run;
                vec![Event::StateChangeRun]
            }
            Phase::Run if session.finished() => {
                self.phase = Phase::PostRun;
                vec![Event::StateChangePostRun]
            }
            _ => Vec::new(),
        }
    }

    /// Mark the session stopped. The transition itself is issued by the next
    /// tick, keeping a single writer for phase changes.
    pub fn stop_session(&mut self) -> Result<Vec<Event>, StateError> {
        self.require_phase("stop-scoring-session", &[Phase::Setup, Phase::Run])?;
        let session = self.session.as_mut().ok_or(StateError::NoSession)?;
        session.stop();
        Ok(Vec::new())
    }

    /// PostRun → Idle. Clears the session and any standing red flag.
    pub fn end_session(&mut self) -> Result<Vec<Event>, StateError> {
        self.require_phase("end-scoring-session", &[Phase::PostRun])?;
        self.session = None;
        self.phase = Phase::Idle;
        self.red_flagged = false;
        Ok(vec![Event::StateChangeIdle])
    }

    // ----------------------------------------------------------------------
    // Live scoring
    // ----------------------------------------------------------------------

    /// Set one field of the in-progress score.
    pub fn set_score_field(&mut self, key: &str, value: f64) -> Result<Vec<Event>, StateError> {
        self.require_phase("set-score", &[Phase::Run])?;
        let index = self
            .config
            .field_index(key)
            .ok_or_else(|| StateError::UnknownField(key.to_string()))?;
        let session = self.session.as_mut().ok_or(StateError::NoSession)?;
        session.score_mut().set_field(key, value);
        Ok(vec![Event::ScoreChange {
            key: key.to_string(),
            index,
            value,
        }])
    }

    /// Freeze the in-progress score into the team's history. Advances the
    /// attempt counter by exactly one; never transitions the phase (the
    /// timer notices an exhausted session on its next tick).
    pub fn commit_score(&mut self) -> Result<Vec<Event>, StateError> {
        self.require_phase("commit-score", &[Phase::Run])?;
        let session = self.session.as_mut().ok_or(StateError::NoSession)?;
        session.score_mut().complete(self.config.formula());
        let team = session.team();
        let (attempt, score) = session.take_attempt();
        let total = score.total();
        self.team_mut(team)?.push_score(score);
        Ok(vec![Event::SessionAttemptCommitted {
            team,
            run: attempt,
            score: total,
        }])
    }

    /// Throw the in-progress score away, leaving a hole in the history so
    /// later attempt indices stay stable. Advances the counter by one.
    pub fn discard_score(&mut self) -> Result<Vec<Event>, StateError> {
        self.require_phase("discard-score", &[Phase::Run])?;
        let session = self.session.as_mut().ok_or(StateError::NoSession)?;
        let team = session.team();
        let (attempt, _score) = session.take_attempt();
        self.team_mut(team)?.push_hole();
        Ok(vec![Event::SessionAttemptDiscarded {
            team,
            run: attempt,
        }])
    }

    pub fn pause(&mut self) -> Result<Vec<Event>, StateError> {
        self.require_phase("pause", &[Phase::Setup, Phase::Run])?;
        let session = self.session.as_mut().ok_or(StateError::NoSession)?;
        session.set_paused(true);
        Ok(vec![Event::SessionPaused])
    }

    pub fn resume(&mut self) -> Result<Vec<Event>, StateError> {
        self.require_phase("resume", &[Phase::Setup, Phase::Run])?;
        let session = self.session.as_mut().ok_or(StateError::NoSession)?;
        session.set_paused(false);
        Ok(vec![Event::SessionResumed])
    }

    /// Track hazard: pauses the clock and raises the standing flag shown in
    /// the `STATE` reply.
    pub fn red_flag(&mut self) -> Result<Vec<Event>, StateError> {
        self.require_phase("redflag", &[Phase::Setup, Phase::Run])?;
        let session = self.session.as_mut().ok_or(StateError::NoSession)?;
        session.set_paused(true);
        self.red_flagged = true;
        Ok(vec![Event::SessionRedFlagged])
    }

    pub fn green_flag(&mut self) -> Result<Vec<Event>, StateError> {
        self.require_phase("greenflag", &[Phase::Setup, Phase::Run])?;
        let session = self.session.as_mut().ok_or(StateError::NoSession)?;
        session.set_paused(false);
        self.red_flagged = false;
        Ok(vec![Event::SessionGreenFlagged])
    }

    /// Extend (or with a negative value shorten) the current phase window.
    pub fn add_time(&mut self, seconds: i64) -> Result<Vec<Event>, StateError> {
        self.require_phase("add-time", &[Phase::Setup, Phase::Run])?;
        let session = self.session.as_mut().ok_or(StateError::NoSession)?;
        session.add_time(seconds);
        Ok(vec![Event::SessionTimeAdded { seconds }])
    }

    // ----------------------------------------------------------------------
    // Annotations and tiebreakers
    // ----------------------------------------------------------------------

    /// Attach a criterion annotation. No event when the team already holds
    /// the text.
    pub fn add_annotation(
        &mut self,
        team: TeamNumber,
        text: &str,
    ) -> Result<Vec<Event>, StateError> {
        if self.team_mut(team)?.add_annotation(text) {
            Ok(vec![Event::TeamAddedAnnotation {
                team,
                text: text.to_string(),
            }])
        } else {
            Ok(Vec::new())
        }
    }

    pub fn remove_annotation(
        &mut self,
        team: TeamNumber,
        text: &str,
    ) -> Result<Vec<Event>, StateError> {
        if self.team_mut(team)?.remove_annotation(text) {
            Ok(vec![Event::TeamRemovedAnnotation {
                team,
                text: text.to_string(),
            }])
        } else {
            Ok(Vec::new())
        }
    }

    pub fn clear_annotations(&mut self, team: TeamNumber) -> Result<Vec<Event>, StateError> {
        self.team_mut(team)?.clear_annotations();
        Ok(vec![Event::TeamClearedAnnotation { team }])
    }

    /// Assign the ordering value for unclassified teams. No broadcast event;
    /// classification is recomputed per query.
    pub fn set_tiebreaker(
        &mut self,
        team: TeamNumber,
        value: f64,
    ) -> Result<Vec<Event>, StateError> {
        self.team_mut(team)?.set_tiebreaker(value);
        Ok(Vec::new())
    }

    // ----------------------------------------------------------------------
    // Record maintenance (outside a session)
    // ----------------------------------------------------------------------

    /// Append a completed record from a raw value row.
    pub fn add_record(
        &mut self,
        team: TeamNumber,
        values: &[f64],
    ) -> Result<Vec<Event>, StateError> {
        self.require_row_arity(values)?;
        let score = self.score_from_values(values);
        let keys = self.field_keys();
        let row = score.row(&keys);
        let total = score.total();
        self.team_mut(team)?.push_score(score);
        Ok(vec![Event::DataAdded {
            team,
            values: row,
            total,
        }])
    }

    /// Replace the record at `index` with a new value row.
    pub fn edit_record(
        &mut self,
        team: TeamNumber,
        index: usize,
        values: &[f64],
    ) -> Result<Vec<Event>, StateError> {
        self.require_row_arity(values)?;
        let score = self.score_from_values(values);
        let keys = self.field_keys();
        let row = score.row(&keys);
        let total = score.total();
        if !self.team_mut(team)?.replace_score(index, score) {
            return Err(StateError::NoSuchRecord { team, index });
        }
        Ok(vec![Event::DataChanged {
            team,
            index,
            values: row,
            total,
        }])
    }

    /// Null out the record at `index`, leaving a hole.
    pub fn expunge_record(
        &mut self,
        team: TeamNumber,
        index: usize,
    ) -> Result<Vec<Event>, StateError> {
        if !self.team_mut(team)?.expunge_score(index) {
            return Err(StateError::NoSuchRecord { team, index });
        }
        Ok(vec![Event::DataRecordExpunged { team, index }])
    }

    /// Drop every recorded score. Annotations and tiebreakers survive.
    pub fn clear_data(&mut self) -> Result<Vec<Event>, StateError> {
        for team in &mut self.teams {
            team.clear_scores();
        }
        Ok(vec![Event::DataCleared])
    }

    /// Replace all recorded data from persisted `DATA` rows. Validated as a
    /// whole before any mutation; replicas are told to re-pull the snapshot
    /// rather than receiving per-row events.
    pub fn import_data(&mut self, rows: &[DataLine]) -> Result<Vec<Event>, StateError> {
        for row in rows {
            self.team(row.number)?;
        }
        let keys = self.field_keys();
        for team in &mut self.teams {
            team.clear_scores();
        }
        for row in rows {
            let score = Score::from_row(&keys, &row.values, row.total);
            self.place_record(row.number, row.index, score)?;
        }
        Ok(vec![Event::DataImported])
    }

    // ----------------------------------------------------------------------
    // Display directives (broadcast-only, no scoring state touched)
    // ----------------------------------------------------------------------

    pub fn preselect(&mut self, team: TeamNumber) -> Result<Vec<Event>, StateError> {
        self.team(team)?;
        Ok(vec![Event::TeamPreSelect { team }])
    }

    pub fn display_mode(&mut self, mode: u32) -> Result<Vec<Event>, StateError> {
        Ok(vec![Event::DisplayModeChange { mode }])
    }

    pub fn display_rank(&mut self, rank: u32) -> Result<Vec<Event>, StateError> {
        Ok(vec![Event::DisplayRankStart { rank }])
    }

    // ----------------------------------------------------------------------
    // Snapshot serialization
    // ----------------------------------------------------------------------

    pub fn team_lines(&self) -> Vec<TeamLine> {
        let descending = self.config.sort_descending();
        self.teams
            .iter()
            .map(|team| TeamLine {
                number: team.number,
                name: team.name.clone(),
                institution: team.institution.clone(),
                logo: team.logo.clone(),
                best: team.best_score(descending),
            })
            .collect()
    }

    /// One row per recorded score, holes skipped, in roster order.
    pub fn data_lines(&self) -> Vec<DataLine> {
        let keys = self.field_keys();
        let mut lines = Vec::new();
        for team in &self.teams {
            for (index, slot) in team.scores().iter().enumerate() {
                let Some(score) = slot else { continue };
                lines.push(DataLine {
                    number: team.number,
                    name: team.name.clone(),
                    index,
                    values: score.row(&keys),
                    total: score.total(),
                });
            }
        }
        lines
    }

    /// Rank every team: classified teams (a best score and every criterion
    /// annotation) ordered by best score, then the rest ordered by their
    /// effective tiebreaker with unset values last. Ranks are continuous
    /// across the two partitions.
    pub fn classification(&self) -> Vec<ClassificationLine> {
        let descending = self.config.sort_descending();
        let criteria = self.config.classification_criteria();

        let order = |a: f64, b: f64| {
            if descending {
                b.partial_cmp(&a)
            } else {
                a.partial_cmp(&b)
            }
            .unwrap_or(std::cmp::Ordering::Equal)
        };

        let mut classified: Vec<(&Team, f64)> = Vec::new();
        let mut rest: Vec<&Team> = Vec::new();
        for team in &self.teams {
            let qualifies = criteria
                .iter()
                .all(|criterion| team.annotations().contains(criterion));
            match team.best_score(descending) {
                Some(best) if qualifies => classified.push((team, best)),
                _ => rest.push(team),
            }
        }
        classified.sort_by(|(_, a), (_, b)| order(*a, *b));
        rest.sort_by(|a, b| {
            match (
                a.effective_tiebreaker(descending),
                b.effective_tiebreaker(descending),
            ) {
                (Some(x), Some(y)) => order(x, y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });

        let ranked = classified
            .into_iter()
            .map(|(team, best)| (team, RankResult::Score(best)))
            .chain(rest.into_iter().map(|team| {
                (
                    team,
                    RankResult::Dnf(team.effective_tiebreaker(descending)),
                )
            }));
        ranked
            .enumerate()
            .map(|(i, (team, result))| ClassificationLine {
                rank: i + 1,
                number: team.number,
                name: team.name.clone(),
                institution: team.institution.clone(),
                result,
            })
            .collect()
    }

    pub fn state_line(&self) -> StateLine {
        let session = self.session.as_ref().map(|s| SessionState {
            team: s.team(),
            run: s.run_number(),
            remaining_ms: s.remaining_ms(),
            paused: s.paused(),
            red_flagged: self.red_flagged,
        });
        StateLine {
            phase: self.phase,
            session,
        }
    }

    // ----------------------------------------------------------------------
    // Replica mirroring
    // ----------------------------------------------------------------------

    /// Seed one `DATA` snapshot row.
    pub fn apply_data_line(&mut self, line: &DataLine) -> Result<(), StateError> {
        let keys = self.field_keys();
        let score = Score::from_row(&keys, &line.values, line.total);
        self.place_record(line.number, line.index, score)
    }

    /// Seed the phase and session from a `STATE` snapshot row.
    pub fn apply_state_line(&mut self, line: &StateLine) {
        self.phase = line.phase;
        self.session = line
            .session
            .map(|s| Session::from_snapshot(s.team, s.run, s.remaining_ms, s.paused));
        self.red_flagged = line.session.is_some_and(|s| s.red_flagged);
    }

    /// Mirror one broadcast event onto replica state.
    pub fn apply_event(&mut self, event: &Event) -> Result<(), StateError> {
        match event {
            Event::StateChangeIdle => {
                self.session = None;
                self.phase = Phase::Idle;
                self.red_flagged = false;
            }
            Event::StateChangeSetup {
                team,
                max_attempts,
                setup_sec,
                run_sec,
            } => {
                let mut session =
                    Session::new(*team, *max_attempts, setup_sec * 1000, run_sec * 1000);
                session.start();
                self.session = Some(session);
                self.phase = Phase::Setup;
                self.red_flagged = false;
            }
            Event::StateChangeRun => {
                if let Some(session) = self.session.as_mut() {
                    session.begin_run();
                }
                self.phase = Phase::Run;
            }
            Event::StateChangePostRun => {
                self.phase = Phase::PostRun;
            }
            Event::ScoreChange { key, value, .. } => {
                if let Some(session) = self.session.as_mut() {
                    session.score_mut().set_field(key, *value);
                }
            }
            Event::SessionAttemptCommitted { team, score, .. } => {
                // The mirrored in-progress score (built from SCORE_CHANGE
                // events) supplies the field values; the event carries the
                // authoritative total.
                let keys = self.field_keys();
                let values = match self.session.as_mut() {
                    Some(session) => session.take_attempt().1.row(&keys),
                    None => Vec::new(),
                };
                let record = Score::from_row(&keys, &values, *score);
                self.team_mut(*team)?.push_score(record);
            }
            Event::SessionAttemptDiscarded { team, .. } => {
                if let Some(session) = self.session.as_mut() {
                    session.take_attempt();
                }
                self.team_mut(*team)?.push_hole();
            }
            Event::SessionPaused => {
                if let Some(session) = self.session.as_mut() {
                    session.set_paused(true);
                }
            }
            Event::SessionResumed => {
                if let Some(session) = self.session.as_mut() {
                    session.set_paused(false);
                }
            }
            Event::SessionRedFlagged => {
                if let Some(session) = self.session.as_mut() {
                    session.set_paused(true);
                }
                self.red_flagged = true;
            }
            Event::SessionGreenFlagged => {
                if let Some(session) = self.session.as_mut() {
                    session.set_paused(false);
                }
                self.red_flagged = false;
            }
            Event::SessionTimeAdded { seconds } => {
                if let Some(session) = self.session.as_mut() {
                    session.add_time(*seconds);
                }
            }
            Event::DataChanged {
                team,
                index,
                values,
                total,
            } => {
                let keys = self.field_keys();
                let score = Score::from_row(&keys, values, *total);
                self.place_record(*team, *index, score)?;
            }
            Event::DataAdded {
                team,
                values,
                total,
            } => {
                let keys = self.field_keys();
                let score = Score::from_row(&keys, values, *total);
                self.team_mut(*team)?.push_score(score);
            }
            Event::DataCleared => {
                for team in &mut self.teams {
                    team.clear_scores();
                }
            }
            // Handled by the replica's resync loop, not by state mirroring.
            Event::DataImported => {}
            Event::DataRecordExpunged { team, index } => {
                if !self.team_mut(*team)?.expunge_score(*index) {
                    return Err(StateError::NoSuchRecord {
                        team: *team,
                        index: *index,
                    });
                }
            }
            Event::TeamAddedAnnotation { team, text } => {
                self.team_mut(*team)?.add_annotation(text);
            }
            Event::TeamRemovedAnnotation { team, text } => {
                self.team_mut(*team)?.remove_annotation(text);
            }
            Event::TeamClearedAnnotation { team } => {
                self.team_mut(*team)?.clear_annotations();
            }
            // UI taps only.
            Event::TeamPreSelect { .. }
            | Event::DisplayModeChange { .. }
            | Event::DisplayRankStart { .. } => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;

    fn config() -> ScoringConfig {
        ScoringConfig::from_raw(SAMPLE.to_string(), "test").unwrap()
    }

    fn roster() -> Vec<TeamEntry> {
        vec![
            TeamEntry {
                number: 7,
                name: "Alpha".into(),
                institution: "North".into(),
                logo: "7.png".into(),
            },
            TeamEntry {
                number: 12,
                name: "Beta".into(),
                institution: "South".into(),
                logo: "12.png".into(),
            },
            TeamEntry {
                number: 3,
                name: "Gamma".into(),
                institution: "East".into(),
                logo: "".into(),
            },
        ]
    }

    fn competition() -> Competition {
        Competition::new(config(), roster())
    }

    fn drain(result: Result<Vec<Event>, StateError>) -> Vec<Event> {
        result.expect("operation accepted")
    }

    #[test]
    fn phase_invariant_holds_through_lifecycle() {
        let mut comp = competition();
        assert_eq!(comp.phase(), Phase::Idle);
        assert!(comp.session().is_none());

        drain(comp.start_session(TeamNumber(7), 3, 10_000, 30_000));
        assert_eq!(comp.phase(), Phase::Setup);
        assert!(comp.session().is_some());

        drain(comp.skip_setup());
        assert_eq!(comp.phase(), Phase::Run);

        drain(comp.stop_session());
        let events = comp.tick(50);
        assert_eq!(events, vec![Event::StateChangePostRun]);
        assert_eq!(comp.phase(), Phase::PostRun);
        assert!(comp.session().is_some());

        let events = drain(comp.end_session());
        assert_eq!(events, vec![Event::StateChangeIdle]);
        assert_eq!(comp.phase(), Phase::Idle);
        assert!(comp.session().is_none());
    }

    #[test]
    fn setup_expiry_transitions_via_tick_only() {
        let mut comp = competition();
        drain(comp.start_session(TeamNumber(7), 3, 1_000, 30_000));
        assert!(comp.tick(999).is_empty());
        assert_eq!(comp.phase(), Phase::Setup);
        assert_eq!(comp.tick(1), vec![Event::StateChangeRun]);
        assert_eq!(comp.phase(), Phase::Run);
    }

    #[test]
    fn commit_does_not_transition_even_when_exhausted() {
        let mut comp = competition();
        drain(comp.start_session(TeamNumber(7), 1, 0, 30_000));
        comp.tick(50);
        assert_eq!(comp.phase(), Phase::Run);

        drain(comp.set_score_field("gates", 3.0));
        let events = drain(comp.commit_score());
        assert_eq!(
            events,
            vec![Event::SessionAttemptCommitted {
                team: TeamNumber(7),
                run: 1,
                score: 30.0,
            }]
        );
        // Single attempt spent, but still Run until the timer notices.
        assert_eq!(comp.phase(), Phase::Run);
        assert_eq!(comp.tick(50), vec![Event::StateChangePostRun]);
    }

    #[test]
    fn discard_leaves_hole_and_advances_run() {
        let mut comp = competition();
        drain(comp.start_session(TeamNumber(7), 3, 0, 30_000));
        comp.tick(50);

        drain(comp.discard_score());
        drain(comp.set_score_field("gates", 2.0));
        let events = drain(comp.commit_score());
        assert_eq!(
            events,
            vec![Event::SessionAttemptCommitted {
                team: TeamNumber(7),
                run: 2,
                score: 20.0,
            }]
        );
        let team = comp.team(TeamNumber(7)).unwrap();
        assert!(team.scores()[0].is_none());
        assert!(team.scores()[1].is_some());
    }

    #[test]
    fn scoring_outside_run_rejected() {
        let mut comp = competition();
        assert_eq!(
            comp.set_score_field("gates", 1.0).unwrap_err(),
            StateError::WrongPhase {
                op: "set-score",
                phase: Phase::Idle,
            }
        );
        drain(comp.start_session(TeamNumber(7), 3, 10_000, 30_000));
        assert!(comp.commit_score().is_err());
        assert!(comp.discard_score().is_err());
    }

    #[test]
    fn unknown_field_and_team_rejected() {
        let mut comp = competition();
        drain(comp.start_session(TeamNumber(7), 3, 0, 30_000));
        comp.tick(50);
        assert_eq!(
            comp.set_score_field("nope", 1.0).unwrap_err(),
            StateError::UnknownField("nope".into())
        );
        assert_eq!(
            comp.add_annotation(TeamNumber(99), "X").unwrap_err(),
            StateError::UnknownTeam(TeamNumber(99))
        );
    }

    #[test]
    fn red_flag_pauses_and_shows_in_state() {
        let mut comp = competition();
        drain(comp.start_session(TeamNumber(7), 3, 0, 30_000));
        comp.tick(50);

        drain(comp.red_flag());
        assert!(comp.red_flagged());
        let before = comp.session().unwrap().remaining_ms();
        comp.tick(5_000);
        assert_eq!(comp.session().unwrap().remaining_ms(), before);
        assert!(comp.state_line().session.unwrap().red_flagged);

        drain(comp.green_flag());
        assert!(!comp.red_flagged());
    }

    #[test]
    fn duplicate_annotation_produces_no_event() {
        let mut comp = competition();
        assert_eq!(
            drain(comp.add_annotation(TeamNumber(7), "QUALIFIED")).len(),
            1
        );
        assert!(drain(comp.add_annotation(TeamNumber(7), "QUALIFIED")).is_empty());
        assert_eq!(
            drain(comp.remove_annotation(TeamNumber(7), "QUALIFIED")).len(),
            1
        );
        assert!(drain(comp.remove_annotation(TeamNumber(7), "QUALIFIED")).is_empty());
    }

    #[test]
    fn classification_partitions_and_orders() {
        let mut comp = competition();
        // Team 7: best 30, qualified. Team 12: best 50 but no annotation.
        // Team 3: no scores, tiebreaker 5.
        drain(comp.add_record(TeamNumber(7), &[3.0, 0.0, 0.0]));
        drain(comp.add_record(TeamNumber(12), &[5.0, 0.0, 0.0]));
        drain(comp.add_annotation(TeamNumber(7), "QUALIFIED"));
        drain(comp.set_tiebreaker(TeamNumber(3), 5.0));

        let ranking = comp.classification();
        assert_eq!(ranking.len(), 3);
        assert_eq!(ranking[0].number, TeamNumber(7));
        assert_eq!(ranking[0].result, RankResult::Score(30.0));
        // 12 outranks 3: its best score acts as its tiebreaker (50 > 5).
        assert_eq!(ranking[1].number, TeamNumber(12));
        assert_eq!(ranking[1].result, RankResult::Dnf(Some(50.0)));
        assert_eq!(ranking[2].number, TeamNumber(3));
        assert_eq!(ranking[2].result, RankResult::Dnf(Some(5.0)));
        assert_eq!(
            ranking.iter().map(|l| l.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn record_edit_and_expunge() {
        let mut comp = competition();
        drain(comp.add_record(TeamNumber(7), &[1.0, 0.0, 0.0]));
        let events = drain(comp.edit_record(TeamNumber(7), 0, &[2.0, 1.0, 0.0]));
        assert_eq!(
            events,
            vec![Event::DataChanged {
                team: TeamNumber(7),
                index: 0,
                values: vec![2.0, 1.0, 0.0],
                total: 15.0,
            }]
        );
        assert_eq!(
            comp.edit_record(TeamNumber(7), 5, &[1.0, 0.0, 0.0]).unwrap_err(),
            StateError::NoSuchRecord {
                team: TeamNumber(7),
                index: 5,
            }
        );
        drain(comp.expunge_record(TeamNumber(7), 0));
        assert!(comp.team(TeamNumber(7)).unwrap().scores()[0].is_none());
    }

    #[test]
    fn record_rows_must_match_the_field_count() {
        let mut comp = competition();
        assert_eq!(
            comp.add_record(TeamNumber(7), &[1.0]).unwrap_err(),
            StateError::WrongValueCount {
                expected: 3,
                got: 1,
            }
        );
        assert_eq!(
            comp.add_record(TeamNumber(7), &[1.0, 2.0, 3.0, 4.0])
                .unwrap_err(),
            StateError::WrongValueCount {
                expected: 3,
                got: 4,
            }
        );
        assert!(comp.team(TeamNumber(7)).unwrap().scores().is_empty());
        drain(comp.add_record(TeamNumber(7), &[1.0, 2.0, 3.0]));
    }

    #[test]
    fn import_replaces_all_data() {
        let mut comp = competition();
        drain(comp.add_record(TeamNumber(7), &[9.0, 0.0, 0.0]));
        let rows = vec![
            DataLine {
                number: TeamNumber(12),
                name: "Beta".into(),
                index: 1,
                values: vec![2.0, 0.0, 0.0],
                total: 20.0,
            },
        ];
        let events = drain(comp.import_data(&rows));
        assert_eq!(events, vec![Event::DataImported]);
        assert!(comp.team(TeamNumber(7)).unwrap().scores().is_empty());
        let beta = comp.team(TeamNumber(12)).unwrap();
        assert!(beta.scores()[0].is_none());
        assert_eq!(beta.scores()[1].as_ref().unwrap().total(), 20.0);
    }

    #[test]
    fn import_with_unknown_team_mutates_nothing() {
        let mut comp = competition();
        drain(comp.add_record(TeamNumber(7), &[1.0, 0.0, 0.0]));
        let rows = vec![DataLine {
            number: TeamNumber(99),
            name: "Ghost".into(),
            index: 0,
            values: vec![1.0],
            total: 10.0,
        }];
        assert!(comp.import_data(&rows).is_err());
        assert_eq!(comp.team(TeamNumber(7)).unwrap().scores().len(), 1);
    }

    #[test]
    fn replica_mirrors_server_through_events() {
        let mut server = competition();
        let mut replica = Competition::from_team_lines(config(), &server.team_lines());

        let feed = |replica: &mut Competition, events: Vec<Event>| {
            for event in &events {
                // Round-trip through the wire format like a real replica.
                let parsed = Event::parse(&event.to_line()).unwrap();
                replica.apply_event(&parsed).unwrap();
            }
        };

        feed(
            &mut replica,
            drain(server.start_session(TeamNumber(7), 3, 10_000, 30_000)),
        );
        feed(&mut replica, drain(server.skip_setup()));
        feed(&mut replica, drain(server.set_score_field("gates", 3.0)));
        feed(&mut replica, drain(server.set_score_field("bonus", 2.0)));
        feed(&mut replica, drain(server.commit_score()));
        feed(&mut replica, drain(server.discard_score()));
        feed(
            &mut replica,
            drain(server.add_annotation(TeamNumber(7), "QUALIFIED")),
        );
        feed(&mut replica, drain(server.stop_session()));
        feed(&mut replica, server.tick(50));
        feed(&mut replica, drain(server.end_session()));

        assert_eq!(replica.phase(), Phase::Idle);
        let server_rows: Vec<String> =
            server.data_lines().iter().map(DataLine::to_line).collect();
        let replica_rows: Vec<String> =
            replica.data_lines().iter().map(DataLine::to_line).collect();
        assert_eq!(server_rows, replica_rows);
        assert_eq!(
            replica.team(TeamNumber(7)).unwrap().annotations().len(),
            1
        );
    }

    #[test]
    fn state_snapshot_seeds_replica_session() {
        let mut server = competition();
        drain(server.start_session(TeamNumber(7), 3, 0, 30_000));
        server.tick(50);
        drain(server.red_flag());

        let mut replica = Competition::from_team_lines(config(), &server.team_lines());
        let line = StateLine::parse(&server.state_line().to_line()).unwrap();
        replica.apply_state_line(&line);
        assert_eq!(replica.phase(), Phase::Run);
        assert!(replica.red_flagged());
        let session = replica.session().unwrap();
        assert_eq!(session.team(), TeamNumber(7));
        assert!(session.paused());
    }
}
