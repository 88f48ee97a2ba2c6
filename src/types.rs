//! Shared content types read and written by every pipeline stage.
//!
//! These mirror the JSON documents under `content/v1/workspaces/`. Keys are
//! camelCase except the literal `gloss_en` / `gloss_en_i18n` prompt keys.
//! Every entity keeps unrecognised keys in a flattened `extra` map so a
//! backfill or review pass never drops hand-authored fields.
//!
//! All maps are `BTreeMap`, which makes serialization byte-deterministic: the
//! same value always renders to the same JSON text.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

/// CEFR level. Ordering follows the scale (A1 < A2 < … < C2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

impl Level {
    pub const ALL: [Level; 6] = [
        Level::A1,
        Level::A2,
        Level::B1,
        Level::B2,
        Level::C1,
        Level::C2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::A1 => "A1",
            Level::A2 => "A2",
            Level::B1 => "B1",
            Level::B2 => "B2",
            Level::C1 => "C1",
            Level::C2 => "C2",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::ALL
            .iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("unknown level '{s}' (expected A1, A2, B1, B2, C1 or C2)"))
    }
}

/// Address register of a pack.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Register {
    Formal,
    Informal,
    #[default]
    Neutral,
}

impl Register {
    pub fn as_str(&self) -> &'static str {
        match self {
            Register::Formal => "formal",
            Register::Informal => "informal",
            Register::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review workflow state. Legal moves live in [`crate::review`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Draft,
    NeedsReview,
    Approved,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Draft => "draft",
            ReviewStatus::NeedsReview => "needs_review",
            ReviewStatus::Approved => "approved",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "draft" => Ok(ReviewStatus::Draft),
            "needs_review" => Ok(ReviewStatus::NeedsReview),
            "approved" => Ok(ReviewStatus::Approved),
            other => Err(format!(
                "unknown review status '{other}' (expected draft, needs_review or approved)"
            )),
        }
    }
}

/// How a piece of content was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProvenanceSource {
    #[serde(rename = "template")]
    Template,
    #[serde(rename = "pdf-extraction", alias = "pdf_extraction")]
    PdfExtraction,
    #[serde(rename = "handcrafted")]
    Handcrafted,
}

/// The three entry kinds stored in a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Pack,
    Drill,
    Exam,
}

impl ContentKind {
    pub const ALL: [ContentKind; 3] = [ContentKind::Pack, ContentKind::Drill, ContentKind::Exam];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Pack => "pack",
            ContentKind::Drill => "drill",
            ContentKind::Exam => "exam",
        }
    }

    /// Directory name of the section holding this kind (`packs`, `drills`, `exams`).
    pub fn section(&self) -> &'static str {
        match self {
            ContentKind::Pack => "packs",
            ContentKind::Drill => "drills",
            ContentKind::Exam => "exams",
        }
    }

    /// File name of an entry document inside its `{id}/` directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            ContentKind::Pack => "pack.json",
            ContentKind::Drill => "drill.json",
            ContentKind::Exam => "exam.json",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        ContentKind::ALL
            .iter()
            .find(|k| k.as_str() == s || k.section() == s)
            .copied()
            .ok_or_else(|| format!("unknown content kind '{s}' (expected pack, drill or exam)"))
    }
}

/// A single learning prompt, owned by its pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub intent: String,
    #[serde(rename = "gloss_en", default)]
    pub gloss_en: String,
    /// Slot roles whose value differs from the step default.
    #[serde(default)]
    pub slots_changed: Vec<String>,
    #[serde(
        rename = "gloss_en_i18n",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub gloss_en_i18n: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStep {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub prompt_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPlan {
    pub steps: Vec<SessionStep>,
}

/// Derived metrics stored on generated content. See [`crate::analytics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Analytics {
    pub version: u32,
    pub prompt_count: usize,
    pub step_count: usize,
    pub multi_slot_rate: f64,
    pub scenario_token_density: f64,
    pub required_token_coverage: f64,
    pub distinct_slot_roles: usize,
    pub passes_quality_gates: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub source: ProvenanceSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    /// Wall-clock metadata only; never part of any determinism comparison.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Provenance {
    pub fn handcrafted() -> Self {
        Self {
            source: ProvenanceSource::Handcrafted,
            source_ref: None,
            generated_at: None,
            generator: None,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub status: ReviewStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A themed set of prompts for one scenario and level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pack {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub level: Level,
    pub scenario: String,
    #[serde(default)]
    pub register: Register,
    #[serde(default)]
    pub primary_structure: String,
    #[serde(default)]
    pub variation_slots: Vec<String>,
    pub prompts: Vec<Prompt>,
    #[serde(default)]
    pub session_plan: SessionPlan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics: Option<Analytics>,
    pub provenance: Provenance,
    #[serde(default)]
    pub review: Review,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Pack {
    pub fn prompt(&self, id: &str) -> Option<&Prompt> {
        self.prompts.iter().find(|p| p.id == id)
    }

    /// Anything not written by hand must carry analytics.
    pub fn is_generated(&self) -> bool {
        self.provenance.source != ProvenanceSource::Handcrafted
    }

    pub fn display_title(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| format!("{} {}", self.scenario, self.level))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    pub id: String,
    #[serde(rename = "type", default)]
    pub exercise_type: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(rename = "gloss_en", default, skip_serializing_if = "String::is_empty")]
    pub gloss_en: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Grammar-focused sibling of [`Pack`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drill {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub level: Level,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    #[serde(default)]
    pub register: Register,
    #[serde(default)]
    pub primary_structure: String,
    pub exercises: Vec<Exercise>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics: Option<Value>,
    pub provenance: Provenance,
    #[serde(default)]
    pub review: Review,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Drill {
    pub fn is_generated(&self) -> bool {
        self.provenance.source != ProvenanceSource::Handcrafted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exam {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub level: Level,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    #[serde(default)]
    pub sections: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    #[serde(default)]
    pub review: Review,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Any entry document found in a workspace.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Pack(Pack),
    Drill(Drill),
    Exam(Exam),
}

impl Entry {
    /// Parse a document of the given kind.
    pub fn parse(kind: ContentKind, json: &str) -> serde_json::Result<Self> {
        Ok(match kind {
            ContentKind::Pack => Entry::Pack(serde_json::from_str(json)?),
            ContentKind::Drill => Entry::Drill(serde_json::from_str(json)?),
            ContentKind::Exam => Entry::Exam(serde_json::from_str(json)?),
        })
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            Entry::Pack(_) => ContentKind::Pack,
            Entry::Drill(_) => ContentKind::Drill,
            Entry::Exam(_) => ContentKind::Exam,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entry::Pack(p) => &p.id,
            Entry::Drill(d) => &d.id,
            Entry::Exam(e) => &e.id,
        }
    }

    pub fn review(&self) -> &Review {
        match self {
            Entry::Pack(p) => &p.review,
            Entry::Drill(d) => &d.review,
            Entry::Exam(e) => &e.review,
        }
    }

    pub fn review_mut(&mut self) -> &mut Review {
        match self {
            Entry::Pack(p) => &mut p.review,
            Entry::Drill(d) => &mut d.review,
            Entry::Exam(e) => &mut e.review,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.review().status == ReviewStatus::Approved
    }

    /// Kind-independent projection used by indexes and bundles.
    pub fn summary(&self) -> EntrySummary {
        match self {
            Entry::Pack(p) => EntrySummary {
                id: p.id.clone(),
                kind: ContentKind::Pack,
                title: p.display_title(),
                level: p.level,
                scenario: Some(p.scenario.clone()),
                register: p.register,
                primary_structure: p.primary_structure.clone(),
                item_count: p.prompts.len(),
            },
            Entry::Drill(d) => EntrySummary {
                id: d.id.clone(),
                kind: ContentKind::Drill,
                title: d.title.clone().unwrap_or_else(|| d.id.clone()),
                level: d.level,
                scenario: d.scenario.clone(),
                register: d.register,
                primary_structure: d.primary_structure.clone(),
                item_count: d.exercises.len(),
            },
            Entry::Exam(e) => EntrySummary {
                id: e.id.clone(),
                kind: ContentKind::Exam,
                title: e.title.clone().unwrap_or_else(|| e.id.clone()),
                level: e.level,
                scenario: e.scenario.clone(),
                register: Register::Neutral,
                primary_structure: String::new(),
                item_count: e.sections.len(),
            },
        }
    }

    /// Render the document the same way every writer in the crate does.
    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            Entry::Pack(p) => render_json(p),
            Entry::Drill(d) => render_json(d),
            Entry::Exam(e) => render_json(e),
        }
    }
}

/// Metadata shared by every entry kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    pub id: String,
    pub kind: ContentKind,
    pub title: String,
    pub level: Level,
    pub scenario: Option<String>,
    pub register: Register,
    pub primary_structure: String,
    pub item_count: usize,
}

/// Pretty-printed JSON with a trailing newline.
pub fn render_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    Ok(json)
}

/// Write a JSON document as a single whole-file write, creating parent dirs.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    let json = render_json(value)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parses_case_insensitively() {
        assert_eq!("a2".parse::<Level>().unwrap(), Level::A2);
        assert_eq!(" C1 ".parse::<Level>().unwrap(), Level::C1);
        assert!("D1".parse::<Level>().is_err());
    }

    #[test]
    fn levels_order_along_the_scale() {
        assert!(Level::A1 < Level::A2);
        assert!(Level::B2 < Level::C1);
    }

    #[test]
    fn review_status_accepts_dashes() {
        assert_eq!(
            "needs-review".parse::<ReviewStatus>().unwrap(),
            ReviewStatus::NeedsReview
        );
        assert_eq!(
            serde_json::to_string(&ReviewStatus::NeedsReview).unwrap(),
            "\"needs_review\""
        );
    }

    #[test]
    fn provenance_source_accepts_both_spellings() {
        let a: ProvenanceSource = serde_json::from_str("\"pdf-extraction\"").unwrap();
        let b: ProvenanceSource = serde_json::from_str("\"pdf_extraction\"").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn prompt_keeps_snake_case_gloss_keys() {
        let json = r#"{
            "id": "p1",
            "text": "Guten Tag",
            "intent": "greet",
            "gloss_en": "Good day",
            "slotsChanged": ["time"],
            "gloss_en_i18n": {"fr": "Bonjour"}
        }"#;
        let prompt: Prompt = serde_json::from_str(json).unwrap();
        assert_eq!(prompt.gloss_en, "Good day");
        assert_eq!(prompt.gloss_en_i18n["fr"], "Bonjour");

        let out = serde_json::to_string(&prompt).unwrap();
        assert!(out.contains("\"gloss_en\""));
        assert!(out.contains("\"slotsChanged\""));
        assert!(out.contains("\"gloss_en_i18n\""));
    }

    #[test]
    fn unknown_pack_keys_survive_round_trip() {
        let json = r#"{
            "id": "work_a2",
            "level": "A2",
            "scenario": "work",
            "prompts": [],
            "sessionPlan": {"steps": []},
            "provenance": {"source": "handcrafted"},
            "review": {"status": "draft"},
            "durationMinutes": 12
        }"#;
        let pack: Pack = serde_json::from_str(json).unwrap();
        assert_eq!(pack.extra["durationMinutes"], Value::from(12));
        let out = render_json(&pack).unwrap();
        assert!(out.contains("\"durationMinutes\": 12"));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn content_kind_parses_section_names() {
        assert_eq!("packs".parse::<ContentKind>().unwrap(), ContentKind::Pack);
        assert_eq!("drill".parse::<ContentKind>().unwrap(), ContentKind::Drill);
        assert_eq!(ContentKind::Exam.file_name(), "exam.json");
    }

    #[test]
    fn summary_falls_back_to_id_for_untitled_drill() {
        let drill = Drill {
            id: "dative".to_string(),
            title: None,
            level: Level::A2,
            scenario: None,
            register: Register::Neutral,
            primary_structure: "dative_case".to_string(),
            exercises: vec![],
            analytics: None,
            provenance: Provenance::handcrafted(),
            review: Review::default(),
            extra: BTreeMap::new(),
        };
        let summary = Entry::Drill(drill).summary();
        assert_eq!(summary.title, "dative");
        assert_eq!(summary.kind, ContentKind::Drill);
    }
}
