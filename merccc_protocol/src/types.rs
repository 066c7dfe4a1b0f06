// Core ID types for the replication protocol.
//
// Lightweight newtypes shared by `event.rs`, `snapshot.rs`, and the domain
// crate (`merccc_core`). Team numbers are externally assigned competition
// identifiers, not indices; the wire always carries the number itself.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Externally assigned team number (unique within one competition).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TeamNumber(pub u32);

impl fmt::Display for TeamNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Top-level competition phase, carried on the `STATE` line as a small
/// integer code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    Setup,
    Run,
    PostRun,
}

impl Phase {
    /// Wire code used by the `STATE` reply.
    pub fn code(self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::Setup => 1,
            Phase::Run => 2,
            Phase::PostRun => 3,
        }
    }

    /// Inverse of [`Phase::code`]. Returns `None` for unknown codes.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Phase::Idle),
            1 => Some(Phase::Setup),
            2 => Some(Phase::Run),
            3 => Some(Phase::PostRun),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_codes_roundtrip() {
        for phase in [Phase::Idle, Phase::Setup, Phase::Run, Phase::PostRun] {
            assert_eq!(Phase::from_code(phase.code()), Some(phase));
        }
        assert_eq!(Phase::from_code(4), None);
    }

    #[test]
    fn team_number_displays_bare() {
        assert_eq!(TeamNumber(7).to_string(), "7");
    }
}
