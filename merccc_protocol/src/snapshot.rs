// Snapshot line codecs.
//
// COMMAND-mode snapshot replies (`teams`, `data`, `classification`, `state`)
// are comma-separated rows, one per line, terminated by a `DONE` line. The
// server formats them under a read lock; the replica parses them back to seed
// its local competition before entering MONITOR mode. Both directions live
// here so the formats cannot drift apart.
//
// Field separators are `", "`. Team names and institutions are carried
// verbatim; names containing the separator sequence itself are not supported
// by this flat format. `DATA` rows are parsed positionally from both ends
// (number, name, index from the front; total from the back) so the field
// count never has to be known in advance.

use crate::ProtocolError;
use crate::event::fmt_num;
use crate::types::{Phase, TeamNumber};

/// One `TEAM` row: roster identity plus the current best score.
#[derive(Clone, Debug, PartialEq)]
pub struct TeamLine {
    pub number: TeamNumber,
    pub name: String,
    pub institution: String,
    pub logo: String,
    /// `None` renders as `DNF` (no completed score yet).
    pub best: Option<f64>,
}

impl TeamLine {
    pub fn to_line(&self) -> String {
        let best = match self.best {
            Some(score) => fmt_num(score),
            None => "DNF".into(),
        };
        format!(
            "TEAM {}, {}, {}, {}, {best}",
            self.number, self.name, self.institution, self.logo
        )
    }

    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let rest = strip_tag(line, "TEAM ")?;
        let parts: Vec<&str> = rest.splitn(5, ", ").collect();
        if parts.len() != 5 {
            return Err(ProtocolError::malformed(line, "expected 5 fields"));
        }
        Ok(TeamLine {
            number: parse_team(line, parts[0])?,
            name: parts[1].to_string(),
            institution: parts[2].to_string(),
            logo: parts[3].to_string(),
            best: parse_best(line, parts[4])?,
        })
    }
}

/// One `DATA` row: a single recorded score with its per-session index.
#[derive(Clone, Debug, PartialEq)]
pub struct DataLine {
    pub number: TeamNumber,
    pub name: String,
    pub index: usize,
    pub values: Vec<f64>,
    pub total: f64,
}

impl DataLine {
    pub fn to_line(&self) -> String {
        let mut line = format!("DATA {}, {}, {}", self.number, self.name, self.index);
        for value in &self.values {
            line.push_str(", ");
            line.push_str(&fmt_num(*value));
        }
        line.push_str(", ");
        line.push_str(&fmt_num(self.total));
        line
    }

    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let rest = strip_tag(line, "DATA ")?;
        let parts: Vec<&str> = rest.split(", ").collect();
        if parts.len() < 4 {
            return Err(ProtocolError::malformed(line, "expected at least 4 fields"));
        }
        let number = parse_team(line, parts[0])?;
        let name = parts[1].to_string();
        let index = parts[2]
            .parse()
            .map_err(|_| ProtocolError::malformed(line, "bad score index"))?;
        let mut values = parts[3..]
            .iter()
            .map(|part| {
                part.parse::<f64>()
                    .map_err(|_| ProtocolError::malformed(line, "bad field value"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let total = values.pop().expect("at least one numeric column");
        Ok(DataLine {
            number,
            name,
            index,
            values,
            total,
        })
    }
}

/// One `CLASSIFICATION` row. Teams without a classified result render as
/// `DNF` or `DNF(<tiebreaker>)`.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationLine {
    pub rank: usize,
    pub number: TeamNumber,
    pub name: String,
    pub institution: String,
    pub result: RankResult,
}

/// Result column of a classification row.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RankResult {
    Score(f64),
    Dnf(Option<f64>),
}

impl ClassificationLine {
    pub fn to_line(&self) -> String {
        let result = match self.result {
            RankResult::Score(score) => fmt_num(score),
            RankResult::Dnf(Some(tiebreaker)) => format!("DNF({})", fmt_num(tiebreaker)),
            RankResult::Dnf(None) => "DNF".into(),
        };
        format!(
            "CLASSIFICATION {}, {}, {}, {}, {result}",
            self.rank, self.number, self.name, self.institution
        )
    }

    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let rest = strip_tag(line, "CLASSIFICATION ")?;
        let parts: Vec<&str> = rest.splitn(5, ", ").collect();
        if parts.len() != 5 {
            return Err(ProtocolError::malformed(line, "expected 5 fields"));
        }
        let result = if let Some(inner) = parts[4]
            .strip_prefix("DNF(")
            .and_then(|s| s.strip_suffix(')'))
        {
            RankResult::Dnf(Some(inner.parse().map_err(|_| {
                ProtocolError::malformed(line, "bad tiebreaker")
            })?))
        } else if parts[4] == "DNF" {
            RankResult::Dnf(None)
        } else {
            RankResult::Score(
                parts[4]
                    .parse()
                    .map_err(|_| ProtocolError::malformed(line, "bad score"))?,
            )
        };
        Ok(ClassificationLine {
            rank: parts[0]
                .parse()
                .map_err(|_| ProtocolError::malformed(line, "bad rank"))?,
            number: parse_team(line, parts[1])?,
            name: parts[2].to_string(),
            institution: parts[3].to_string(),
            result,
        })
    }
}

/// The `STATE` reply. Session fields are present only when the phase is not
/// IDLE (phase invariant: non-idle phases always have a session).
#[derive(Clone, Debug, PartialEq)]
pub struct StateLine {
    pub phase: Phase,
    pub session: Option<SessionState>,
}

/// Trailing session fields of a non-idle `STATE` reply.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionState {
    pub team: TeamNumber,
    pub run: u32,
    pub remaining_ms: i64,
    pub paused: bool,
    pub red_flagged: bool,
}

impl StateLine {
    pub fn to_line(&self) -> String {
        match &self.session {
            None => format!("STATE {}", self.phase.code()),
            Some(s) => format!(
                "STATE {} {} {} {} {} {}",
                self.phase.code(),
                s.team,
                s.run,
                s.remaining_ms,
                u8::from(s.paused),
                u8::from(s.red_flagged),
            ),
        }
    }

    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let rest = strip_tag(line, "STATE ")?;
        let parts: Vec<&str> = rest.split_whitespace().collect();
        let malformed = |reason: &str| ProtocolError::malformed(line, reason);

        let code: u8 = parts
            .first()
            .ok_or_else(|| malformed("missing phase"))?
            .parse()
            .map_err(|_| malformed("bad phase code"))?;
        let phase = Phase::from_code(code).ok_or_else(|| malformed("unknown phase code"))?;

        if phase == Phase::Idle {
            if parts.len() != 1 {
                return Err(malformed("idle state carries no session fields"));
            }
            return Ok(StateLine {
                phase,
                session: None,
            });
        }
        if parts.len() != 6 {
            return Err(malformed("expected 6 fields"));
        }
        let flag = |s: &str| match s {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(malformed("bad flag")),
        };
        Ok(StateLine {
            phase,
            session: Some(SessionState {
                team: parse_team(line, parts[1])?,
                run: parts[2].parse().map_err(|_| malformed("bad run number"))?,
                remaining_ms: parts[3].parse().map_err(|_| malformed("bad remaining"))?,
                paused: flag(parts[4])?,
                red_flagged: flag(parts[5])?,
            }),
        })
    }
}

fn strip_tag<'a>(line: &'a str, tag: &str) -> Result<&'a str, ProtocolError> {
    line.strip_prefix(tag)
        .ok_or_else(|| ProtocolError::malformed(line, "wrong row tag"))
}

fn parse_team(line: &str, part: &str) -> Result<TeamNumber, ProtocolError> {
    part.parse()
        .map(TeamNumber)
        .map_err(|_| ProtocolError::malformed(line, "bad team number"))
}

fn parse_best(line: &str, part: &str) -> Result<Option<f64>, ProtocolError> {
    if part == "DNF" {
        return Ok(None);
    }
    part.parse()
        .map(Some)
        .map_err(|_| ProtocolError::malformed(line, "bad best score"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_line_roundtrip() {
        let row = TeamLine {
            number: TeamNumber(7),
            name: "Alpha Wolves".into(),
            institution: "Northfield High".into(),
            logo: "logos/7.png".into(),
            best: Some(42.5),
        };
        let line = row.to_line();
        assert_eq!(line, "TEAM 7, Alpha Wolves, Northfield High, logos/7.png, 42.5");
        assert_eq!(TeamLine::parse(&line).unwrap(), row);
    }

    #[test]
    fn team_line_dnf() {
        let row = TeamLine {
            number: TeamNumber(3),
            name: "Beta".into(),
            institution: "Lakeside".into(),
            logo: "".into(),
            best: None,
        };
        let line = row.to_line();
        assert!(line.ends_with(", DNF"));
        assert_eq!(TeamLine::parse(&line).unwrap().best, None);
    }

    #[test]
    fn data_line_roundtrip_reproduces_tuples() {
        let row = DataLine {
            number: TeamNumber(7),
            name: "Alpha Wolves".into(),
            index: 2,
            values: vec![3.0, 1.5, 0.0],
            total: 21.5,
        };
        let line = row.to_line();
        assert_eq!(line, "DATA 7, Alpha Wolves, 2, 3, 1.5, 0, 21.5");
        let parsed = DataLine::parse(&line).unwrap();
        assert_eq!(parsed, row);
    }

    #[test]
    fn classification_line_variants() {
        let ranked = ClassificationLine {
            rank: 1,
            number: TeamNumber(7),
            name: "Alpha".into(),
            institution: "North".into(),
            result: RankResult::Score(99.0),
        };
        assert_eq!(
            ClassificationLine::parse(&ranked.to_line()).unwrap(),
            ranked
        );

        let dnf = ClassificationLine {
            rank: 5,
            number: TeamNumber(9),
            name: "Gamma".into(),
            institution: "South".into(),
            result: RankResult::Dnf(Some(12.0)),
        };
        assert_eq!(dnf.to_line(), "CLASSIFICATION 5, 9, Gamma, South, DNF(12)");
        assert_eq!(ClassificationLine::parse(&dnf.to_line()).unwrap(), dnf);

        let bare = ClassificationLine {
            result: RankResult::Dnf(None),
            ..dnf.clone()
        };
        assert_eq!(ClassificationLine::parse(&bare.to_line()).unwrap(), bare);
    }

    #[test]
    fn state_line_idle_has_no_session_fields() {
        let idle = StateLine {
            phase: Phase::Idle,
            session: None,
        };
        assert_eq!(idle.to_line(), "STATE 0");
        assert_eq!(StateLine::parse("STATE 0").unwrap(), idle);
        assert!(StateLine::parse("STATE 0 7 1 1000 0 0").is_err());
    }

    #[test]
    fn state_line_run_roundtrip() {
        let run = StateLine {
            phase: Phase::Run,
            session: Some(SessionState {
                team: TeamNumber(7),
                run: 2,
                remaining_ms: 14_500,
                paused: false,
                red_flagged: true,
            }),
        };
        assert_eq!(run.to_line(), "STATE 2 7 2 14500 0 1");
        assert_eq!(StateLine::parse(&run.to_line()).unwrap(), run);
    }
}
