// Broadcast event vocabulary.
//
// Every state-machine mutation on the server produces exactly one `Event`,
// formatted as a single line (event name + space-separated arguments) and
// fanned out to all connections in MONITOR mode. The replica parses the same
// lines back and applies them to its local competition state.
//
// The enum is closed: one variant per wire event name, with typed payload
// fields. `to_line` and `parse` are exact inverses for every variant: the
// replica reconstructs live state purely from this stream plus an initial
// snapshot, so any asymmetry here is a replication bug.
//
// Annotation text is the remainder of the line and may contain spaces.
// `DATA_CHANGED` and `DATA_ADDED` carry the full field-value row so a replica
// can mirror record edits without re-fetching; `DATA_IMPORTED` intentionally
// carries nothing; it signals the replica to re-pull the data snapshot.

use crate::ProtocolError;
use crate::types::TeamNumber;

/// One broadcast state-change event, as carried on a MONITOR-mode line.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    StateChangeIdle,
    StateChangeSetup {
        team: TeamNumber,
        max_attempts: u32,
        setup_sec: u64,
        run_sec: u64,
    },
    StateChangeRun,
    StateChangePostRun,
    /// A field of the in-progress score changed.
    ScoreChange {
        key: String,
        index: usize,
        value: f64,
    },
    SessionAttemptCommitted {
        team: TeamNumber,
        run: u32,
        score: f64,
    },
    SessionAttemptDiscarded {
        team: TeamNumber,
        run: u32,
    },
    SessionPaused,
    SessionResumed,
    SessionRedFlagged,
    SessionGreenFlagged,
    SessionTimeAdded {
        seconds: i64,
    },
    /// An existing record was edited; carries the full replacement row.
    DataChanged {
        team: TeamNumber,
        index: usize,
        values: Vec<f64>,
        total: f64,
    },
    /// A completed record was appended outside a session.
    DataAdded {
        team: TeamNumber,
        values: Vec<f64>,
        total: f64,
    },
    DataCleared,
    /// Bulk import completed; replicas must re-pull the data snapshot.
    DataImported,
    DataRecordExpunged {
        team: TeamNumber,
        index: usize,
    },
    TeamPreSelect {
        team: TeamNumber,
    },
    DisplayModeChange {
        mode: u32,
    },
    DisplayRankStart {
        rank: u32,
    },
    TeamAddedAnnotation {
        team: TeamNumber,
        text: String,
    },
    TeamRemovedAnnotation {
        team: TeamNumber,
        text: String,
    },
    TeamClearedAnnotation {
        team: TeamNumber,
    },
}

impl Event {
    /// Format as one wire line (no trailing newline).
    pub fn to_line(&self) -> String {
        match self {
            Event::StateChangeIdle => "STATE_CHANGE_IDLE".into(),
            Event::StateChangeSetup {
                team,
                max_attempts,
                setup_sec,
                run_sec,
            } => format!("STATE_CHANGE_SETUP {team} {max_attempts} {setup_sec} {run_sec}"),
            Event::StateChangeRun => "STATE_CHANGE_RUN".into(),
            Event::StateChangePostRun => "STATE_CHANGE_POSTRUN".into(),
            Event::ScoreChange { key, index, value } => {
                format!("SCORE_CHANGE {key} {index} {}", fmt_num(*value))
            }
            Event::SessionAttemptCommitted { team, run, score } => {
                format!("SESSION_ATTEMPT_COMMITTED {team} {run} {}", fmt_num(*score))
            }
            Event::SessionAttemptDiscarded { team, run } => {
                format!("SESSION_ATTEMPT_DISCARDED {team} {run}")
            }
            Event::SessionPaused => "SESSION_PAUSED".into(),
            Event::SessionResumed => "SESSION_RESUMED".into(),
            Event::SessionRedFlagged => "SESSION_REDFLAGGED".into(),
            Event::SessionGreenFlagged => "SESSION_GREENFLAGGED".into(),
            Event::SessionTimeAdded { seconds } => format!("SESSION_TIME_ADDED {seconds}"),
            Event::DataChanged {
                team,
                index,
                values,
                total,
            } => {
                let row = fmt_row(values, *total);
                format!("DATA_CHANGED {team} {index} {row}")
            }
            Event::DataAdded {
                team,
                values,
                total,
            } => {
                let row = fmt_row(values, *total);
                format!("DATA_ADDED {team} {row}")
            }
            Event::DataCleared => "DATA_CLEARED".into(),
            Event::DataImported => "DATA_IMPORTED".into(),
            Event::DataRecordExpunged { team, index } => {
                format!("DATA_RECORD_EXPUNGED {team} {index}")
            }
            Event::TeamPreSelect { team } => format!("TEAM_PRE_SELECT {team}"),
            Event::DisplayModeChange { mode } => format!("DISPLAY_MODE_CHANGE {mode}"),
            Event::DisplayRankStart { rank } => format!("DISPLAY_RANK_START {rank}"),
            Event::TeamAddedAnnotation { team, text } => {
                format!("TEAM_ADDED_ANNOTATION {team} {text}")
            }
            Event::TeamRemovedAnnotation { team, text } => {
                format!("TEAM_REMOVED_ANNOTATION {team} {text}")
            }
            Event::TeamClearedAnnotation { team } => format!("TEAM_CLEARED_ANNOTATION {team}"),
        }
    }

    /// Parse one MONITOR-mode line back into an event.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let (name, rest) = match line.split_once(' ') {
            Some((name, rest)) => (name, rest),
            None => (line, ""),
        };
        let args: Vec<&str> = rest.split_whitespace().collect();

        match name {
            "STATE_CHANGE_IDLE" => Ok(Event::StateChangeIdle),
            "STATE_CHANGE_SETUP" => Ok(Event::StateChangeSetup {
                team: TeamNumber(num(line, &args, 0)?),
                max_attempts: num(line, &args, 1)?,
                setup_sec: num(line, &args, 2)?,
                run_sec: num(line, &args, 3)?,
            }),
            "STATE_CHANGE_RUN" => Ok(Event::StateChangeRun),
            "STATE_CHANGE_POSTRUN" => Ok(Event::StateChangePostRun),
            "SCORE_CHANGE" => Ok(Event::ScoreChange {
                key: arg(line, &args, 0)?.to_string(),
                index: num(line, &args, 1)?,
                value: num(line, &args, 2)?,
            }),
            "SESSION_ATTEMPT_COMMITTED" => Ok(Event::SessionAttemptCommitted {
                team: TeamNumber(num(line, &args, 0)?),
                run: num(line, &args, 1)?,
                score: num(line, &args, 2)?,
            }),
            "SESSION_ATTEMPT_DISCARDED" => Ok(Event::SessionAttemptDiscarded {
                team: TeamNumber(num(line, &args, 0)?),
                run: num(line, &args, 1)?,
            }),
            "SESSION_PAUSED" => Ok(Event::SessionPaused),
            "SESSION_RESUMED" => Ok(Event::SessionResumed),
            "SESSION_REDFLAGGED" => Ok(Event::SessionRedFlagged),
            "SESSION_GREENFLAGGED" => Ok(Event::SessionGreenFlagged),
            "SESSION_TIME_ADDED" => Ok(Event::SessionTimeAdded {
                seconds: num(line, &args, 0)?,
            }),
            "DATA_CHANGED" => {
                let (values, total) = parse_row(line, &args, 2)?;
                Ok(Event::DataChanged {
                    team: TeamNumber(num(line, &args, 0)?),
                    index: num(line, &args, 1)?,
                    values,
                    total,
                })
            }
            "DATA_ADDED" => {
                let (values, total) = parse_row(line, &args, 1)?;
                Ok(Event::DataAdded {
                    team: TeamNumber(num(line, &args, 0)?),
                    values,
                    total,
                })
            }
            "DATA_CLEARED" => Ok(Event::DataCleared),
            "DATA_IMPORTED" => Ok(Event::DataImported),
            "DATA_RECORD_EXPUNGED" => Ok(Event::DataRecordExpunged {
                team: TeamNumber(num(line, &args, 0)?),
                index: num(line, &args, 1)?,
            }),
            "TEAM_PRE_SELECT" => Ok(Event::TeamPreSelect {
                team: TeamNumber(num(line, &args, 0)?),
            }),
            "DISPLAY_MODE_CHANGE" => Ok(Event::DisplayModeChange {
                mode: num(line, &args, 0)?,
            }),
            "DISPLAY_RANK_START" => Ok(Event::DisplayRankStart {
                rank: num(line, &args, 0)?,
            }),
            "TEAM_ADDED_ANNOTATION" => {
                let (team, text) = team_and_text(line, rest)?;
                Ok(Event::TeamAddedAnnotation { team, text })
            }
            "TEAM_REMOVED_ANNOTATION" => {
                let (team, text) = team_and_text(line, rest)?;
                Ok(Event::TeamRemovedAnnotation { team, text })
            }
            "TEAM_CLEARED_ANNOTATION" => Ok(Event::TeamClearedAnnotation {
                team: TeamNumber(num(line, &args, 0)?),
            }),
            _ => Err(ProtocolError::malformed(line, "unknown event")),
        }
    }
}

/// Format a value for the wire: integral values print without a fractional
/// part (`12`), others as the shortest `f64` display (`12.5`).
pub fn fmt_num(value: f64) -> String {
    format!("{value}")
}

/// Field values followed by the total, space-separated.
fn fmt_row(values: &[f64], total: f64) -> String {
    let mut row = String::new();
    for value in values {
        row.push_str(&fmt_num(*value));
        row.push(' ');
    }
    row.push_str(&fmt_num(total));
    row
}

fn arg<'a>(line: &str, args: &[&'a str], n: usize) -> Result<&'a str, ProtocolError> {
    args.get(n)
        .copied()
        .ok_or_else(|| ProtocolError::malformed(line, "missing argument"))
}

fn num<T: std::str::FromStr>(line: &str, args: &[&str], n: usize) -> Result<T, ProtocolError> {
    arg(line, args, n)?
        .parse()
        .map_err(|_| ProtocolError::malformed(line, "bad numeric argument"))
}

/// Parse the arguments from position `from` onward as a field-value row whose
/// last entry is the derived total.
fn parse_row(line: &str, args: &[&str], from: usize) -> Result<(Vec<f64>, f64), ProtocolError> {
    let mut values: Vec<f64> = args
        .iter()
        .skip(from)
        .map(|part| {
            part.parse()
                .map_err(|_| ProtocolError::malformed(line, "bad numeric argument"))
        })
        .collect::<Result<_, _>>()?;
    let total = values
        .pop()
        .ok_or_else(|| ProtocolError::malformed(line, "missing total"))?;
    Ok((values, total))
}

/// Parse `<team> <text...>` where the text is the rest of the line.
fn team_and_text(line: &str, rest: &str) -> Result<(TeamNumber, String), ProtocolError> {
    let (team, text) = rest
        .split_once(' ')
        .ok_or_else(|| ProtocolError::malformed(line, "expected team and text"))?;
    let team = team
        .parse()
        .map_err(|_| ProtocolError::malformed(line, "bad team number"))?;
    Ok((TeamNumber(team), text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_event_formats_per_wire_grammar() {
        let event = Event::StateChangeSetup {
            team: TeamNumber(7),
            max_attempts: 3,
            setup_sec: 10,
            run_sec: 30,
        };
        assert_eq!(event.to_line(), "STATE_CHANGE_SETUP 7 3 10 30");
        assert_eq!(Event::parse("STATE_CHANGE_SETUP 7 3 10 30").unwrap(), event);
    }

    #[test]
    fn committed_score_trims_integral_fraction() {
        let event = Event::SessionAttemptCommitted {
            team: TeamNumber(7),
            run: 1,
            score: 12.5,
        };
        assert_eq!(event.to_line(), "SESSION_ATTEMPT_COMMITTED 7 1 12.5");

        let whole = Event::SessionAttemptCommitted {
            team: TeamNumber(7),
            run: 2,
            score: 40.0,
        };
        assert_eq!(whole.to_line(), "SESSION_ATTEMPT_COMMITTED 7 2 40");
    }

    #[test]
    fn annotation_text_keeps_spaces() {
        let line = "TEAM_ADDED_ANNOTATION 12 BEST DESIGN AWARD";
        let event = Event::parse(line).unwrap();
        assert_eq!(
            event,
            Event::TeamAddedAnnotation {
                team: TeamNumber(12),
                text: "BEST DESIGN AWARD".into(),
            }
        );
        assert_eq!(event.to_line(), line);
    }

    #[test]
    fn data_changed_carries_full_row() {
        let line = "DATA_CHANGED 4 2 1 0.5 3 17.5";
        let event = Event::parse(line).unwrap();
        assert_eq!(
            event,
            Event::DataChanged {
                team: TeamNumber(4),
                index: 2,
                values: vec![1.0, 0.5, 3.0],
                total: 17.5,
            }
        );
        assert_eq!(event.to_line(), line);
    }

    #[test]
    fn bare_events_roundtrip() {
        for line in [
            "STATE_CHANGE_IDLE",
            "STATE_CHANGE_RUN",
            "STATE_CHANGE_POSTRUN",
            "SESSION_PAUSED",
            "SESSION_RESUMED",
            "SESSION_REDFLAGGED",
            "SESSION_GREENFLAGGED",
            "DATA_CLEARED",
            "DATA_IMPORTED",
        ] {
            let event = Event::parse(line).unwrap();
            assert_eq!(event.to_line(), line);
        }
    }

    #[test]
    fn unknown_event_rejected() {
        assert!(Event::parse("STATE_CHANGE_WARP 1").is_err());
    }

    #[test]
    fn missing_arguments_rejected() {
        assert!(Event::parse("SCORE_CHANGE gates").is_err());
        assert!(Event::parse("TEAM_ADDED_ANNOTATION 5").is_err());
    }
}
