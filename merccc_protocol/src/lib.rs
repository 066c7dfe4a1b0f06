// merccc_protocol: wire protocol for live-score replication.
//
// This crate defines everything the synchronization server and the replica
// client agree on: line and NUL framing, the command-mode request vocabulary,
// the broadcast event vocabulary, and the snapshot row codecs. It is shared
// between both sides and has no dependency on the domain crate.
//
// Module overview:
// - `types.rs`:    Core wire types, `TeamNumber` and `Phase` (with codes).
// - `framing.rs`:  Newline-framed UTF-8 lines for COMMAND/MONITOR modes and
//                  NUL-terminated strings for the bulk-transfer sub-protocol,
//                  plus protocol literals (`DONE`, `OK`, `ERROR`, prompt,
//                  greeting prefix).
// - `command.rs`:  `Request`, one parsed command line, with the
//                  privileged/query split.
// - `event.rs`:    `Event`, the closed broadcast vocabulary, one variant
//                  per wire event name, with exact format/parse inverses.
// - `snapshot.rs`: `TEAM`/`DATA`/`CLASSIFICATION`/`STATE` row codecs used by
//                  the server to serialize snapshots and by the replica to
//                  parse them.
//
// Design decisions:
// - **Plain text lines.** The protocol is human-operable over netcat/telnet;
//   every exchange is inspectable on the wire. Binary framing appears only in
//   the bulk sub-protocol's raw file bytes.
// - **No async runtime.** All framing operates on `std::io` traits,
//   compatible with blocking TCP streams, buffered wrappers, and in-memory
//   cursors in tests.

pub mod command;
pub mod event;
pub mod framing;
pub mod snapshot;
pub mod types;

pub use command::Request;
pub use event::Event;
pub use framing::{
    DONE, ERROR, GREETING_PREFIX, MAX_CSTRING_LEN, OK, PROMPT, TRANSFER_ACK, read_cstring,
    read_line, write_cstring, write_line,
};
pub use snapshot::{ClassificationLine, DataLine, RankResult, SessionState, StateLine, TeamLine};
pub use types::{Phase, TeamNumber};

use thiserror::Error;

/// Errors produced while framing or parsing protocol traffic.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed line '{line}': {reason}")]
    Malformed { line: String, reason: String },
}

impl ProtocolError {
    pub(crate) fn malformed(line: &str, reason: &str) -> Self {
        ProtocolError::Malformed {
            line: line.to_string(),
            reason: reason.to_string(),
        }
    }
}
