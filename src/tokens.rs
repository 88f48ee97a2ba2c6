//! Per-scenario token dictionaries.
//!
//! The dictionaries live in `content/meta/scenario-tokens.json` and are edited
//! only through this module's structured reader/writer: a [`TokenPatch`] adds
//! and removes tokens per scenario, and [`TokenDictionary::save`] writes the
//! normalized result (sorted, case-insensitively unique).
//!
//! ```json
//! { "version": 1, "scenarios": { "work": ["Bericht", "Büro", "Meeting"] } }
//! ```
//!
//! Matching is a case-insensitive substring test, so `"Büro"` matches
//! `"Großraumbüro"`.

use crate::types::write_json;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const TOKENS_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid token file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported token file version {found} in {path} (expected {TOKENS_VERSION})")]
    Version { path: PathBuf, found: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenDictionary {
    pub version: u32,
    pub scenarios: BTreeMap<String, Vec<String>>,
}

impl Default for TokenDictionary {
    fn default() -> Self {
        Self {
            version: TOKENS_VERSION,
            scenarios: BTreeMap::new(),
        }
    }
}

/// Changes to apply to one scenario's tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioPatch {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

/// Scenario id → changes. The on-disk form of a token patch file.
pub type TokenPatch = BTreeMap<String, ScenarioPatch>;

/// What a patch actually changed, per scenario.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchSummary {
    pub added: BTreeMap<String, Vec<String>>,
    pub removed: BTreeMap<String, Vec<String>>,
}

impl PatchSummary {
    pub fn is_empty(&self) -> bool {
        self.added.values().all(Vec::is_empty) && self.removed.values().all(Vec::is_empty)
    }
}

impl TokenDictionary {
    /// Load the dictionary file. A missing file is an empty dictionary.
    pub fn load(path: &Path) -> Result<Self, TokenError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no token dictionary; using empty");
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path)?;
        let dict: Self = serde_json::from_str(&json).map_err(|source| TokenError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        if dict.version != TOKENS_VERSION {
            return Err(TokenError::Version {
                path: path.to_path_buf(),
                found: dict.version,
            });
        }
        Ok(dict.normalized())
    }

    pub fn save(&self, path: &Path) -> Result<(), TokenError> {
        write_json(path, &self.clone().normalized())?;
        Ok(())
    }

    pub fn tokens_for(&self, scenario: &str) -> &[String] {
        self.scenarios
            .get(scenario)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Trimmed, sorted by lowercase form, case-insensitively unique.
    /// The first spelling of a token wins.
    pub fn normalized(mut self) -> Self {
        for tokens in self.scenarios.values_mut() {
            let mut seen = BTreeSet::new();
            let mut out: Vec<String> = Vec::with_capacity(tokens.len());
            for token in tokens.drain(..) {
                let token = token.trim().to_string();
                if !token.is_empty() && seen.insert(token.to_lowercase()) {
                    out.push(token);
                }
            }
            out.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()).then(a.cmp(b)));
            *tokens = out;
        }
        self
    }

    /// Apply a patch structurally. Removals match case-insensitively.
    pub fn apply_patch(&mut self, patch: &TokenPatch) -> PatchSummary {
        let mut summary = PatchSummary::default();
        for (scenario, changes) in patch {
            let tokens = self.scenarios.entry(scenario.clone()).or_default();
            let mut removed = Vec::new();
            for victim in &changes.remove {
                let key = victim.trim().to_lowercase();
                let before = tokens.len();
                tokens.retain(|t| t.to_lowercase() != key);
                if tokens.len() != before {
                    removed.push(victim.trim().to_string());
                }
            }
            let mut added = Vec::new();
            for token in &changes.add {
                let token = token.trim();
                if token.is_empty() {
                    continue;
                }
                let key = token.to_lowercase();
                if !tokens.iter().any(|t| t.to_lowercase() == key) {
                    tokens.push(token.to_string());
                    added.push(token.to_string());
                }
            }
            summary.added.insert(scenario.clone(), added);
            summary.removed.insert(scenario.clone(), removed);
        }
        *self = std::mem::take(self).normalized();
        summary
    }
}

/// Distinct tokens found in `text` (case-insensitive substring match).
pub fn matched_tokens<'a>(text: &str, tokens: &'a [String]) -> BTreeSet<&'a str> {
    let haystack = text.to_lowercase();
    tokens
        .iter()
        .filter(|t| !t.is_empty() && haystack.contains(&t.to_lowercase()))
        .map(String::as_str)
        .collect()
}

pub fn contains_any(text: &str, tokens: &[String]) -> bool {
    let haystack = text.to_lowercase();
    tokens
        .iter()
        .any(|t| !t.is_empty() && haystack.contains(&t.to_lowercase()))
}

pub fn load_patch(path: &Path) -> Result<TokenPatch, TokenError> {
    let json = fs::read_to_string(path)?;
    serde_json::from_str(&json).map_err(|source| TokenError::Json {
        path: path.to_path_buf(),
        source,
    })
}
