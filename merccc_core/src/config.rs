// Scoring configuration and team roster loading.
//
// The configuration is a JSON file defining the ordered score fields (with
// per-field defaults), the postfix scoring formula, the global sort order,
// the classification criterion annotations, and optional default session
// limits. The **raw file text** is retained verbatim: its crc32, truncated
// to `i32`, is the compatibility fingerprint exchanged over the wire
// (`HASH` reply); a replica refuses to run against a server whose config
// text differs byte-for-byte.
//
// Loading compiles the formula immediately; an unknown token is a fatal
// startup error. If the config carries a `formula_test` clause the compiled
// formula is evaluated against it once and a mismatch logs a warning. The
// self-test guards against operator-precedence mistakes when hand-writing
// postfix, but is deliberately not a hard failure.
//
// The team roster is a separate JSON array. Competition-definition syntax
// beyond these two files is out of scope.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::formula::{Formula, FormulaError};

/// Configuration loading failures. Fatal before any socket is opened.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Formula(#[from] FormulaError),
    #[error("duplicate field key '{0}'")]
    DuplicateField(String),
    #[error("duplicate team number {0}")]
    DuplicateTeam(u32),
}

/// One score field: ordered key plus the default used when a score has no
/// value recorded for it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FieldSpec {
    pub key: String,
    #[serde(default)]
    pub default: f64,
}

/// Startup self-test clause: evaluate the formula against `values` and
/// compare with `expected`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FormulaTest {
    pub values: BTreeMap<String, f64>,
    pub expected: f64,
}

/// Default session limits applied when the operator starts a session without
/// explicit values.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SessionDefaults {
    pub max_attempts: u32,
    pub setup_ms: u64,
    pub window_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ConfigFile {
    fields: Vec<FieldSpec>,
    formula: Vec<String>,
    #[serde(default = "default_true")]
    sort_descending: bool,
    #[serde(default)]
    classification: Vec<String>,
    #[serde(default)]
    formula_test: Option<FormulaTest>,
    #[serde(default)]
    session_defaults: Option<SessionDefaults>,
}

fn default_true() -> bool {
    true
}

/// Validated scoring configuration with its compiled formula and the raw
/// text it was loaded from.
#[derive(Clone, Debug)]
pub struct ScoringConfig {
    raw: String,
    fields: Vec<FieldSpec>,
    formula: Formula,
    sort_descending: bool,
    classification: Vec<String>,
    session_defaults: Option<SessionDefaults>,
}

impl ScoringConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_raw(raw, &path.display().to_string())
    }

    /// Validate configuration text. `origin` is used in error messages only.
    pub fn from_raw(raw: String, origin: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: origin.to_string(),
                source,
            })?;

        let mut seen = std::collections::BTreeSet::new();
        for field in &file.fields {
            if !seen.insert(field.key.as_str()) {
                return Err(ConfigError::DuplicateField(field.key.clone()));
            }
        }

        let formula = Formula::compile(&file.formula, &file.fields)?;

        if let Some(test) = &file.formula_test {
            let got = formula.evaluate(&test.values);
            if (got - test.expected).abs() > f64::EPSILON {
                warn!(
                    expected = test.expected,
                    got, "formula self-test mismatch; check the postfix token order"
                );
            } else {
                info!("formula self-test passed");
            }
        }

        Ok(ScoringConfig {
            raw,
            fields: file.fields,
            formula,
            sort_descending: file.sort_descending,
            classification: file.classification,
            session_defaults: file.session_defaults,
        })
    }

    /// The raw configuration text, exactly as loaded.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Compatibility fingerprint: crc32 of the raw text as `i32` (the wire
    /// `HASH` value).
    pub fn fingerprint(&self) -> i32 {
        crc32fast::hash(self.raw.as_bytes()) as i32
    }

    /// Ordered score field specs.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Position of a field key in the configured order.
    pub fn field_index(&self, key: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.key == key)
    }

    pub fn formula(&self) -> &Formula {
        &self.formula
    }

    /// Global sort order: `true` means higher scores rank first.
    pub fn sort_descending(&self) -> bool {
        self.sort_descending
    }

    /// Annotations a team must hold (besides a best score) to be classified.
    pub fn classification_criteria(&self) -> &[String] {
        &self.classification
    }

    pub fn session_defaults(&self) -> Option<SessionDefaults> {
        self.session_defaults
    }
}

/// One roster entry from the teams file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeamEntry {
    pub number: u32,
    pub name: String,
    pub institution: String,
    #[serde(default)]
    pub logo: String,
}

/// Load the team roster. Team numbers must be unique.
pub fn load_roster(path: impl AsRef<Path>) -> Result<Vec<TeamEntry>, ConfigError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let entries: Vec<TeamEntry> =
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
    let mut seen = std::collections::BTreeSet::new();
    for entry in &entries {
        if !seen.insert(entry.number) {
            return Err(ConfigError::DuplicateTeam(entry.number));
        }
    }
    Ok(entries)
}
