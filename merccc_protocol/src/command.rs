// Command-mode request vocabulary.
//
// One request per line, case-sensitive. Two tiers:
//
// - **Query set**: safe on any connection. Snapshot reads, the fingerprint
//   query, mode switching (`monitor`/`break`), prompt control, and the bulk
//   fetches (`config`, `resources`).
// - **Privileged set**: accepted only on the loopback listener. Everything
//   that mutates the competition, plus display-overlay directives and the
//   resource-path control.
//
// Parsing is strict on arity: a known command with the wrong argument count
// is `ProtocolError::Malformed`, which the server answers with a detailed
// `ERROR` line. Privilege is *not* checked here; the server decides that
// per connection, and deliberately answers privileged violations with a
// bare `ERROR` carrying no detail.

use crate::ProtocolError;
use crate::types::TeamNumber;

/// One parsed command-mode request line.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    // --- query set -------------------------------------------------------
    Teams,
    Data,
    Classification,
    State,
    Hash,
    /// List the configured score field keys.
    Fields,
    /// Fetch the raw configuration text (NUL-framed reply).
    Config,
    /// Fetch the resource bundle via the bulk sub-protocol.
    Resources,
    Monitor,
    Break,
    NoPrompt,

    // --- privileged set --------------------------------------------------
    StartSession {
        team: TeamNumber,
        max_attempts: u32,
        setup_ms: u64,
        window_ms: u64,
    },
    StopSession,
    EndSession,
    SkipSetup,
    CommitScore,
    DiscardScore,
    SetScore {
        key: String,
        value: f64,
    },
    Pause,
    Resume,
    RedFlag,
    GreenFlag,
    AddTime {
        seconds: i64,
    },
    AddAnnotation {
        team: TeamNumber,
        text: String,
    },
    RemoveAnnotation {
        team: TeamNumber,
        text: String,
    },
    ClearAnnotations {
        team: TeamNumber,
    },
    SetTiebreaker {
        team: TeamNumber,
        value: f64,
    },
    AddRecord {
        team: TeamNumber,
        values: Vec<f64>,
    },
    EditRecord {
        team: TeamNumber,
        index: usize,
        values: Vec<f64>,
    },
    ExpungeRecord {
        team: TeamNumber,
        index: usize,
    },
    ClearData,
    ImportData,
    PreSelect {
        team: TeamNumber,
    },
    DisplayMode {
        mode: u32,
    },
    DisplayRank {
        rank: u32,
    },
    ResourcePath {
        path: String,
    },
}

impl Request {
    /// Parse one request line. Unknown commands and known commands with the
    /// wrong argument count are both malformed.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let (name, rest) = match line.split_once(' ') {
            Some((name, rest)) => (name, rest),
            None => (line, ""),
        };
        let args: Vec<&str> = rest.split_whitespace().collect();

        let exact = |n: usize, request: Request| {
            if args.len() == n {
                Ok(request)
            } else {
                Err(ProtocolError::malformed(line, "wrong argument count"))
            }
        };

        match name {
            "teams" => exact(0, Request::Teams),
            "data" => exact(0, Request::Data),
            "classification" => exact(0, Request::Classification),
            "state" => exact(0, Request::State),
            "hash" => exact(0, Request::Hash),
            "fields" => exact(0, Request::Fields),
            "config" => exact(0, Request::Config),
            "resources" => exact(0, Request::Resources),
            "monitor" => exact(0, Request::Monitor),
            "break" => exact(0, Request::Break),
            "noprompt" => exact(0, Request::NoPrompt),
            "start-scoring-session" => {
                let request = Request::StartSession {
                    team: TeamNumber(num(line, &args, 0)?),
                    max_attempts: num(line, &args, 1)?,
                    setup_ms: num(line, &args, 2)?,
                    window_ms: num(line, &args, 3)?,
                };
                exact(4, request)
            }
            "stop-scoring-session" => exact(0, Request::StopSession),
            "end-scoring-session" => exact(0, Request::EndSession),
            "skip-setup" => exact(0, Request::SkipSetup),
            "commit-score" => exact(0, Request::CommitScore),
            "discard-score" => exact(0, Request::DiscardScore),
            "set-score" => {
                let request = Request::SetScore {
                    key: arg(line, &args, 0)?.to_string(),
                    value: num(line, &args, 1)?,
                };
                exact(2, request)
            }
            "pause" => exact(0, Request::Pause),
            "resume" => exact(0, Request::Resume),
            "redflag" => exact(0, Request::RedFlag),
            "greenflag" => exact(0, Request::GreenFlag),
            "add-time" => {
                let request = Request::AddTime {
                    seconds: num(line, &args, 0)?,
                };
                exact(1, request)
            }
            "add-team-annotation" => {
                let (team, text) = team_and_text(line, rest)?;
                Ok(Request::AddAnnotation { team, text })
            }
            "remove-team-annotation" => {
                let (team, text) = team_and_text(line, rest)?;
                Ok(Request::RemoveAnnotation { team, text })
            }
            "clear-team-annotations" => {
                let request = Request::ClearAnnotations {
                    team: TeamNumber(num(line, &args, 0)?),
                };
                exact(1, request)
            }
            "set-tiebreaker" => {
                let request = Request::SetTiebreaker {
                    team: TeamNumber(num(line, &args, 0)?),
                    value: num(line, &args, 1)?,
                };
                exact(2, request)
            }
            "add-record" => {
                let values = floats_from(line, &args, 1)?;
                if values.is_empty() {
                    return Err(ProtocolError::malformed(line, "missing field values"));
                }
                Ok(Request::AddRecord {
                    team: TeamNumber(num(line, &args, 0)?),
                    values,
                })
            }
            "edit-record" => {
                let values = floats_from(line, &args, 2)?;
                if values.is_empty() {
                    return Err(ProtocolError::malformed(line, "missing field values"));
                }
                Ok(Request::EditRecord {
                    team: TeamNumber(num(line, &args, 0)?),
                    index: num(line, &args, 1)?,
                    values,
                })
            }
            "expunge-record" => {
                let request = Request::ExpungeRecord {
                    team: TeamNumber(num(line, &args, 0)?),
                    index: num(line, &args, 1)?,
                };
                exact(2, request)
            }
            "clear-data" => exact(0, Request::ClearData),
            "import-data" => exact(0, Request::ImportData),
            "preselect-team" => {
                let request = Request::PreSelect {
                    team: TeamNumber(num(line, &args, 0)?),
                };
                exact(1, request)
            }
            "display-mode" => {
                let request = Request::DisplayMode {
                    mode: num(line, &args, 0)?,
                };
                exact(1, request)
            }
            "display-rank" => {
                let request = Request::DisplayRank {
                    rank: num(line, &args, 0)?,
                };
                exact(1, request)
            }
            "resource-path" => {
                if rest.is_empty() {
                    Err(ProtocolError::malformed(line, "missing path"))
                } else {
                    Ok(Request::ResourcePath {
                        path: rest.to_string(),
                    })
                }
            }
            _ => Err(ProtocolError::malformed(line, "unknown command")),
        }
    }

    /// Whether this request mutates the competition (or controls displays)
    /// and is therefore restricted to the loopback listener.
    pub fn privileged(&self) -> bool {
        !matches!(
            self,
            Request::Teams
                | Request::Data
                | Request::Classification
                | Request::State
                | Request::Hash
                | Request::Fields
                | Request::Config
                | Request::Resources
                | Request::Monitor
                | Request::Break
                | Request::NoPrompt
        )
    }
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

fn floats_from(line: &str, args: &[&str], from: usize) -> Result<Vec<f64>, ProtocolError> {
    args.iter()
        .skip(from)
        .map(|part| {
            part.parse()
                .map_err(|_| ProtocolError::malformed(line, "bad numeric argument"))
        })
        .collect()
}

fn team_and_text(line: &str, rest: &str) -> Result<(TeamNumber, String), ProtocolError> {
    let (team, text) = rest
        .split_once(' ')
        .ok_or_else(|| ProtocolError::malformed(line, "expected team and text"))?;
    let team = team
        .parse()
        .map_err(|_| ProtocolError::malformed(line, "bad team number"))?;
    Ok((TeamNumber(team), text.to_string()))
}
