//! Scenario templates: the hand-authored, read-only input to generation.
//!
//! A template names the slot roles a scenario varies, the option bank for each
//! role, the tokens every session step must surface, and a blueprint of steps.
//! Each step renders its prompts from a `pattern` with `{role}` placeholders:
//!
//! ```json
//! {
//!   "scenarioId": "work",
//!   "defaultRegister": "formal",
//!   "primaryStructure": "modal_verbs",
//!   "variationSlots": ["object", "time", "action"],
//!   "slotBanks": {
//!     "object": [{"text": "den Bericht", "gloss": "the report"}, "die E-Mail"],
//!     "time": ["heute", "morgen"],
//!     "action": ["schicken", "prüfen"]
//!   },
//!   "requiredTokens": ["Bericht", "E-Mail"],
//!   "stepBlueprint": [{
//!     "id": "requests",
//!     "title": "Requests",
//!     "promptCount": 4,
//!     "rules": {
//!       "pattern": "Könnten Sie {object} {time} {action}?",
//!       "glossPattern": "Could you {action} {object} {time}?",
//!       "intent": "request",
//!       "defaults": {"time": 1}
//!     }
//!   }]
//! }
//! ```
//!
//! The default option of a role is index 0 unless `rules.defaults` says
//! otherwise; a prompt's `slotsChanged` lists the roles that moved off it.

use crate::naming::Layout;
use crate::types::Register;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("template for scenario '{scenario}' not found at {path}")]
    Missing { scenario: String, path: PathBuf },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("template '{scenario}' is invalid: {reason}")]
    Invalid { scenario: String, reason: String },
}

/// One option of a slot bank: either a bare string or text plus English gloss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlotOption {
    Plain(String),
    Glossed {
        text: String,
        #[serde(default)]
        gloss: Option<String>,
    },
}

impl SlotOption {
    pub fn text(&self) -> &str {
        match self {
            SlotOption::Plain(text) => text,
            SlotOption::Glossed { text, .. } => text,
        }
    }

    /// English gloss, falling back to the text itself.
    pub fn gloss(&self) -> &str {
        match self {
            SlotOption::Plain(text) => text,
            SlotOption::Glossed { text, gloss } => gloss.as_deref().unwrap_or(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRules {
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gloss_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    /// Role → index of the default option for this step.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defaults: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepBlueprint {
    pub id: String,
    pub title: String,
    pub prompt_count: usize,
    pub rules: StepRules,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateConstraints {
    /// Raises (never lowers) the configured multi-slot threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_multi_slot_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub scenario_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub default_register: Register,
    #[serde(default)]
    pub primary_structure: String,
    pub variation_slots: Vec<String>,
    pub slot_banks: BTreeMap<String, Vec<SlotOption>>,
    pub required_tokens: Vec<String>,
    pub step_blueprint: Vec<StepBlueprint>,
    #[serde(default)]
    pub constraints: TemplateConstraints,
}

impl Template {
    pub fn from_json(json: &str, path: &Path) -> Result<Self, TemplateError> {
        serde_json::from_str(json).map_err(|source| TemplateError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    fn invalid(&self, reason: impl Into<String>) -> TemplateError {
        TemplateError::Invalid {
            scenario: self.scenario_id.clone(),
            reason: reason.into(),
        }
    }

    /// Check every structural rule the generator relies on.
    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.step_blueprint.is_empty() {
            return Err(self.invalid("stepBlueprint is empty"));
        }
        if self.required_tokens.iter().all(|t| t.trim().is_empty()) {
            return Err(self.invalid("requiredTokens is empty"));
        }
        for role in &self.variation_slots {
            if !self.slot_banks.contains_key(role) {
                return Err(self.invalid(format!("variation slot '{role}' has no slot bank")));
            }
        }
        for (role, bank) in &self.slot_banks {
            if bank.is_empty() {
                return Err(self.invalid(format!("slot bank '{role}' is empty")));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for step in &self.step_blueprint {
            if !seen.insert(step.id.as_str()) {
                return Err(self.invalid(format!("duplicate step id '{}'", step.id)));
            }
            if step.prompt_count == 0 {
                return Err(self.invalid(format!("step '{}' has promptCount 0", step.id)));
            }
            let mut referenced = placeholders(&step.rules.pattern);
            if referenced.is_empty() {
                return Err(self.invalid(format!("step '{}' pattern has no slots", step.id)));
            }
            if let Some(gloss) = &step.rules.gloss_pattern {
                referenced.extend(placeholders(gloss));
            }
            for role in &referenced {
                if !self.slot_banks.contains_key(role) {
                    return Err(self.invalid(format!(
                        "step '{}' references unknown slot '{role}'",
                        step.id
                    )));
                }
            }
            for (role, &idx) in &step.rules.defaults {
                let len = self.slot_banks.get(role).map(Vec::len).unwrap_or(0);
                if idx >= len {
                    return Err(self.invalid(format!(
                        "step '{}' default for '{role}' is out of range",
                        step.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Default option index of `role` within `step`.
    pub fn default_index(&self, step: &StepBlueprint, role: &str) -> usize {
        step.rules.defaults.get(role).copied().unwrap_or(0)
    }

    /// Roles of a step the generator may vary: declared variation slots that
    /// appear in the pattern and have at least two options, in declaration order.
    pub fn variable_roles(&self, step: &StepBlueprint) -> Vec<String> {
        let used = placeholders(&step.rules.pattern);
        self.variation_slots
            .iter()
            .filter(|role| used.contains(role))
            .filter(|role| self.slot_banks.get(*role).is_some_and(|b| b.len() >= 2))
            .cloned()
            .collect()
    }

    pub fn option(&self, role: &str, index: usize) -> Option<&SlotOption> {
        self.slot_banks.get(role)?.get(index)
    }
}

/// `{role}` placeholders of a pattern, in first-appearance order, deduplicated.
pub fn placeholders(pattern: &str) -> Vec<String> {
    let mut roles = Vec::new();
    let mut rest = pattern;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            break;
        };
        let role = &after[..end];
        if !role.is_empty() && !roles.iter().any(|r| r == role) {
            roles.push(role.to_string());
        }
        rest = &after[end + 1..];
    }
    roles
}

/// Substitute `{role}` placeholders. Unknown roles are left in place.
pub fn render_pattern<'a>(pattern: &str, lookup: impl Fn(&str) -> Option<&'a str>) -> String {
    let mut out = String::with_capacity(pattern.len() + 32);
    let mut rest = pattern;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let role = &after[..end];
                match lookup(role) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(role);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Loads templates from `content/templates/v1/scenarios/`.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(layout: &Layout) -> Self {
        Self {
            dir: layout.templates_dir(),
        }
    }

    pub fn path(&self, scenario: &str) -> PathBuf {
        self.dir.join(format!("{scenario}.json"))
    }

    /// Load and validate one scenario's template.
    pub fn load(&self, scenario: &str) -> Result<Template, TemplateError> {
        let path = self.path(scenario);
        if !path.is_file() {
            return Err(TemplateError::Missing {
                scenario: scenario.to_string(),
                path,
            });
        }
        let json = fs::read_to_string(&path)?;
        let template = Template::from_json(&json, &path)?;
        if template.scenario_id != scenario {
            return Err(template.invalid(format!(
                "scenarioId does not match file name '{scenario}.json'"
            )));
        }
        template.validate()?;
        Ok(template)
    }

    /// Scenario ids with a template file, sorted.
    pub fn scenarios(&self) -> Result<Vec<String>, TemplateError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut scenarios: Vec<String> = fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        scenarios.sort();
        Ok(scenarios)
    }

    /// Required tokens of every loadable template, keyed by scenario.
    ///
    /// Templates that fail to load are skipped with a warning; the quality gate
    /// then simply has no required-token rule for that scenario.
    pub fn required_tokens(&self) -> Result<BTreeMap<String, Vec<String>>, TemplateError> {
        let mut out = BTreeMap::new();
        for scenario in self.scenarios()? {
            match self.load(&scenario) {
                Ok(t) => {
                    out.insert(scenario, t.required_tokens);
                }
                Err(e) => tracing::warn!(%scenario, error = %e, "skipping unusable template"),
            }
        }
        Ok(out)
    }
}
