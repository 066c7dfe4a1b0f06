// Replica client.
//
// A replica mirrors the server's competition state over one TCP connection:
//
//   1. read the greeting, disable prompts;
//   2. establish config compatibility: either fetch the server's raw config
//      text (`config`) or compare fingerprints (`hash`) against the local
//      config and refuse to continue on mismatch;
//   3. optionally fetch the resource bundle into a local directory;
//   4. pull the full snapshot (`teams`, `data`, `state`);
//   5. enter MONITOR mode and feed every event line through
//      `Competition::apply_event`.
//
// `DATA_IMPORTED` signals a bulk replacement the event stream does not carry
// row by row: the replica breaks out of monitor mode, re-pulls the `data`
// snapshot, and re-enters monitoring. Events already in flight when the
// break was requested arrive before the `COMMAND` reply and are applied,
// not dropped.
//
// The mirrored state lives behind an `Arc<RwLock<_>>` so a display layer can
// read it concurrently; an optional `mpsc` tap receives every applied event
// for incremental rendering.

use std::io::BufReader;
use std::net::TcpStream;
use std::path::Path;
use std::sync::mpsc::Sender;
use std::sync::{Arc, RwLock};

use merccc_core::{Competition, ConfigError, ScoringConfig, StateError};
use merccc_protocol::framing::{DONE, GREETING_PREFIX, read_cstring, read_line, write_line};
use merccc_protocol::snapshot::{DataLine, StateLine, TeamLine};
use merccc_protocol::{Event, ProtocolError};
use thiserror::Error;
use tracing::{debug, info};

use crate::transfer::{self, TransferError};

#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("config fingerprint mismatch: local {local}, server {remote}")]
    FingerprintMismatch { local: i32, remote: i32 },
    #[error("unrecognized greeting '{0}'")]
    BadGreeting(String),
    #[error("expected '{expected}', server sent '{got}'")]
    UnexpectedReply { expected: &'static str, got: String },
    #[error("server closed the connection")]
    Disconnected,
}

/// Where the replica's scoring config comes from.
pub enum ConfigSource {
    /// Use a locally loaded config; the server's fingerprint must match.
    Local(ScoringConfig),
    /// Adopt the server's config text as-is.
    FetchRemote,
}

/// A connected, snapshot-seeded replica.
pub struct Replica {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    competition: Arc<RwLock<Competition>>,
    config: ScoringConfig,
    server_version: String,
}

impl Replica {
    /// Dial the server, gate on config compatibility, optionally fetch the
    /// resource bundle, and pull the full state snapshot.
    pub fn connect(
        addr: &str,
        source: ConfigSource,
        fetch_resources: Option<&Path>,
    ) -> Result<Self, ReplicaError> {
        let stream = TcpStream::connect(addr)?;
        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);

        let greeting = next_line(&mut reader)?;
        let server_version = greeting
            .strip_prefix(GREETING_PREFIX)
            .ok_or_else(|| ReplicaError::BadGreeting(greeting.clone()))?
            .trim_end_matches(" local")
            .to_string();
        info!(server_version, "connected");

        write_line(&mut writer, "noprompt")?;
        expect_reply(&mut reader, "OK")?;

        let config = match source {
            ConfigSource::Local(config) => {
                write_line(&mut writer, "hash")?;
                let line = next_line(&mut reader)?;
                let remote: i32 = line
                    .strip_prefix("HASH ")
                    .and_then(|value| value.parse().ok())
                    .ok_or_else(|| ReplicaError::UnexpectedReply {
                        expected: "HASH <fingerprint>",
                        got: line.clone(),
                    })?;
                let local = config.fingerprint();
                if local != remote {
                    return Err(ReplicaError::FingerprintMismatch { local, remote });
                }
                config
            }
            ConfigSource::FetchRemote => {
                write_line(&mut writer, "config")?;
                let raw = read_cstring(&mut reader)?;
                ScoringConfig::from_raw(raw, "<server config>")?
            }
        };

        if let Some(dest) = fetch_resources {
            write_line(&mut writer, "resources")?;
            let summary = transfer::receive_tree(&mut reader, &mut writer, dest)?;
            info!(
                files = summary.files,
                bytes = summary.bytes,
                "resource bundle fetched"
            );
        }

        write_line(&mut writer, "teams")?;
        let mut team_rows = Vec::new();
        loop {
            let line = next_line(&mut reader)?;
            if line == DONE {
                break;
            }
            team_rows.push(TeamLine::parse(&line)?);
        }
        let mut competition = Competition::from_team_lines(config.clone(), &team_rows);

        write_line(&mut writer, "data")?;
        loop {
            let line = next_line(&mut reader)?;
            if line == DONE {
                break;
            }
            competition.apply_data_line(&DataLine::parse(&line)?)?;
        }

        write_line(&mut writer, "state")?;
        let line = next_line(&mut reader)?;
        competition.apply_state_line(&StateLine::parse(&line)?);

        Ok(Replica {
            reader,
            writer,
            competition: Arc::new(RwLock::new(competition)),
            config,
            server_version,
        })
    }

    /// Shared handle to the mirrored state, for a display layer.
    pub fn competition(&self) -> Arc<RwLock<Competition>> {
        self.competition.clone()
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Enter MONITOR mode and mirror until the connection ends. Every
    /// applied event is also forwarded to `tap` when present.
    pub fn run(mut self, tap: Option<Sender<Event>>) -> Result<(), ReplicaError> {
        loop {
            write_line(&mut self.writer, "monitor")?;
            expect_reply(&mut self.reader, "MONITOR")?;
            debug!("mirroring event stream");
            loop {
                let line = next_line(&mut self.reader)?;
                let event = Event::parse(&line)?;
                let import = matches!(event, Event::DataImported);
                self.apply(&event, &tap)?;
                if import {
                    self.resync(&tap)?;
                    break;
                }
            }
        }
    }

    fn apply(&mut self, event: &Event, tap: &Option<Sender<Event>>) -> Result<(), ReplicaError> {
        self.competition
            .write()
            .expect("competition lock poisoned")
            .apply_event(event)?;
        if let Some(tap) = tap {
            let _ = tap.send(event.clone());
        }
        Ok(())
    }

    /// Re-pull the `data` snapshot after a bulk import.
    fn resync(&mut self, tap: &Option<Sender<Event>>) -> Result<(), ReplicaError> {
        write_line(&mut self.writer, "break")?;
        loop {
            let line = next_line(&mut self.reader)?;
            if line == "COMMAND" {
                break;
            }
            // Events queued before the break was processed still count.
            let event = Event::parse(&line)?;
            self.apply(&event, tap)?;
        }

        self.competition
            .write()
            .expect("competition lock poisoned")
            .apply_event(&Event::DataCleared)?;
        write_line(&mut self.writer, "data")?;
        loop {
            let line = next_line(&mut self.reader)?;
            if line == DONE {
                break;
            }
            let row = DataLine::parse(&line)?;
            self.competition
                .write()
                .expect("competition lock poisoned")
                .apply_data_line(&row)?;
        }
        debug!("data resynchronized after import");
        Ok(())
    }
}

fn next_line(reader: &mut BufReader<TcpStream>) -> Result<String, ReplicaError> {
    read_line(reader)?.ok_or(ReplicaError::Disconnected)
}

fn expect_reply(
    reader: &mut BufReader<TcpStream>,
    expected: &'static str,
) -> Result<(), ReplicaError> {
    let got = next_line(reader)?;
    if got == expected {
        Ok(())
    } else {
        Err(ReplicaError::UnexpectedReply { expected, got })
    }
}
