// merccc_core: the competition scoring domain.
//
// Everything that makes a competition a competition lives here: the scoring
// configuration (fields, postfix formula, sort order, classification
// criteria), the roster, recorded scores, the active session and its clock
// regimes, and the phase state machine. The crate knows nothing about
// sockets; mutations return the broadcast `Event`s they produce and the
// sync layer decides what to do with them.
//
// Module overview:
// - `config.rs`:      JSON scoring config + roster loading, formula
//                     compilation, the crc32 compatibility fingerprint.
// - `formula.rs`:     The compiled postfix score formula.
// - `team.rs`:        `Team` and `Score`: identity, score history with
//                     holes, annotations, tiebreakers.
// - `session.rs`:     The active timed session and its `runs` regimes.
// - `competition.rs`: `Competition`, the state machine itself, snapshot
//                     serialization, and replica-side event mirroring.
//
// Design decisions:
// - Mutation entry points return `Result<Vec<Event>, StateError>` instead of
//   invoking observer hooks; the caller broadcasts after its lock is
//   released, so the domain stays synchronous and lock-free.
// - Time never advances implicitly. `Competition::tick` is the only producer
//   of time-driven phase transitions, and it is driven externally.

pub mod competition;
pub mod config;
pub mod formula;
pub mod session;
pub mod team;

pub use competition::{Competition, StateError};
pub use config::{ConfigError, FieldSpec, ScoringConfig, SessionDefaults, TeamEntry, load_roster};
pub use formula::{Formula, FormulaError};
pub use session::Session;
pub use team::{Score, Team};
