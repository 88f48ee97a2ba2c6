//! Quality gate: a fixed rule set applied to every entry in a corpus.
//!
//! Evaluation is pure reporting. It never mutates content and never drops a
//! violation: every rule hit becomes a [`Failure`] in the [`QualityReport`],
//! and the report's `passed` flag is true only when there are none.
//!
//! ## Rules
//!
//! | Rule                 | Applies to    | Fails when                                                  |
//! |----------------------|---------------|-------------------------------------------------------------|
//! | `banned_phrase`      | all kinds     | any text contains a denylisted phrase (case-insensitive)    |
//! | `multi_slot_rate`    | packs         | share of prompts with ≥2 `slotsChanged` below threshold     |
//! | `token_density`      | packs         | mean distinct scenario tokens per prompt below threshold    |
//! | `duplicate_prompt`   | packs, drills | normalized repeats exceed `max_duplicate_prompts`           |
//! | `register`           | packs         | formal pack without a formal-address marker                 |
//! | `session_plan`       | packs         | empty plan, unknown prompt ids, or unplanned prompts        |
//! | `required_token`     | packs         | a step lacks every template `requiredTokens` entry          |
//! | `analytics_missing`  | generated     | no `analytics` block                                        |
//! | `analytics_mismatch` | gen. packs    | stored analytics differ from recomputed ones                |
//! | `gates_not_passed`   | generated     | `passesQualityGates` is not true                            |
//! | `drill_structure`    | drills        | no exercises, duplicate ids, or blank prompts               |
//! | `unreadable`         | any file      | the file could not be read or parsed                        |
//!
//! "Generated" means any provenance other than `handcrafted`. Drill analytics
//! are opaque JSON, so only their presence and `passesQualityGates` are
//! checked; nothing recomputes them.
//!
//! Missing `gloss_en_i18n` locales and scenarios without a token dictionary
//! are reported as warnings.

use crate::analytics;
use crate::config::QualityConfig;
use crate::scan::{LoadedEntry, WorkspaceScan};
use crate::tokens::{TokenDictionary, matched_tokens};
use crate::types::{ContentKind, Drill, Entry, Exam, Pack, Register};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Unreadable,
    BannedPhrase,
    MultiSlotRate,
    TokenDensity,
    DuplicatePrompt,
    Register,
    SessionPlan,
    RequiredToken,
    AnalyticsMissing,
    AnalyticsMismatch,
    GatesNotPassed,
    DrillStructure,
}

impl Rule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::Unreadable => "unreadable",
            Rule::BannedPhrase => "banned_phrase",
            Rule::MultiSlotRate => "multi_slot_rate",
            Rule::TokenDensity => "token_density",
            Rule::DuplicatePrompt => "duplicate_prompt",
            Rule::Register => "register",
            Rule::SessionPlan => "session_plan",
            Rule::RequiredToken => "required_token",
            Rule::AnalyticsMissing => "analytics_missing",
            Rule::AnalyticsMismatch => "analytics_mismatch",
            Rule::GatesNotPassed => "gates_not_passed",
            Rule::DrillStructure => "drill_structure",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule violation found in one entry, before it is located in a corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub rule: Rule,
    pub message: String,
}

impl Finding {
    fn new(rule: Rule, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub workspace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    pub kind: ContentKind,
    pub path: String,
    pub rule: Rule,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    pub workspace: String,
    pub entry_id: String,
    pub kind: ContentKind,
    pub message: String,
}

/// Measured values for one pack.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackMetrics {
    pub prompt_count: usize,
    pub multi_slot_rate: f64,
    pub token_density: f64,
    pub duplicate_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryReport {
    pub workspace: String,
    pub id: String,
    pub kind: ContentKind,
    pub path: String,
    pub passed: bool,
    pub failure_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<PackMetrics>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityReport {
    pub packs: Vec<EntryReport>,
    pub failures: Vec<Failure>,
    pub warnings: Vec<Warning>,
    pub passed: bool,
}

/// Everything the rules need besides the entry itself.
#[derive(Debug, Clone, Copy)]
pub struct GateContext<'a> {
    pub config: &'a QualityConfig,
    pub tokens: &'a TokenDictionary,
    /// Template `requiredTokens`, keyed by scenario.
    pub required_tokens: &'a BTreeMap<String, Vec<String>>,
}

// ============================================================================
// Text helpers
// ============================================================================

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_sentence(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whole-word, case-sensitive match of any marker.
pub fn has_formal_marker(text: &str, markers: &[String]) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|word| markers.iter().any(|m| m == word))
}

/// Denylisted phrases contained in `text`, in config order.
pub fn banned_hits<'a>(text: &str, banned: &'a [String]) -> Vec<&'a str> {
    let haystack = text.to_lowercase();
    banned
        .iter()
        .filter(|p| !p.is_empty() && haystack.contains(&p.to_lowercase()))
        .map(String::as_str)
        .collect()
}

/// Repeats beyond the first occurrence of each normalized text.
fn duplicate_count<'a>(texts: impl Iterator<Item = &'a str>) -> (usize, Vec<String>) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for text in texts {
        let key = normalize_sentence(text);
        if !key.is_empty() {
            *seen.entry(key).or_default() += 1;
        }
    }
    let mut repeated: Vec<String> = seen
        .iter()
        .filter(|(_, n)| **n > 1)
        .map(|(k, _)| k.clone())
        .collect();
    repeated.sort();
    let extra = seen.values().map(|n| n.saturating_sub(1)).sum();
    (extra, repeated)
}

// ============================================================================
// Per-kind rules
// ============================================================================

/// Content rules of a pack: everything except the analytics checks.
///
/// The generator uses this to decide `passesQualityGates` before it writes.
pub fn pack_content_failures(pack: &Pack, ctx: &GateContext<'_>) -> Vec<Finding> {
    let cfg = ctx.config;
    let mut out = Vec::new();

    for prompt in &pack.prompts {
        for field in [&prompt.text, &prompt.gloss_en] {
            for phrase in banned_hits(field, &cfg.banned_phrases) {
                out.push(Finding::new(
                    Rule::BannedPhrase,
                    format!("prompt {} contains banned phrase '{phrase}'", prompt.id),
                ));
            }
        }
    }

    let rate = analytics::multi_slot_rate(pack);
    if rate + 1e-9 < cfg.min_multi_slot_rate {
        out.push(Finding::new(
            Rule::MultiSlotRate,
            format!(
                "multi-slot rate {:.2} below {:.2}",
                rate, cfg.min_multi_slot_rate
            ),
        ));
    }

    let tokens = ctx.tokens.tokens_for(&pack.scenario);
    if !tokens.is_empty() {
        let density = analytics::token_density(pack, tokens);
        if density + 1e-9 < cfg.min_token_density {
            out.push(Finding::new(
                Rule::TokenDensity,
                format!(
                    "scenario token density {:.2} below {:.2}",
                    density, cfg.min_token_density
                ),
            ));
        }
    }

    let (dupes, repeated) = duplicate_count(pack.prompts.iter().map(|p| p.text.as_str()));
    if dupes > cfg.max_duplicate_prompts {
        out.push(Finding::new(
            Rule::DuplicatePrompt,
            format!("{dupes} repeated prompt(s): {}", repeated.join(" | ")),
        ));
    }

    if pack.register == Register::Formal
        && !pack
            .prompts
            .iter()
            .any(|p| has_formal_marker(&p.text, &cfg.formal_markers))
    {
        out.push(Finding::new(
            Rule::Register,
            format!(
                "formal pack has no prompt with a formal marker ({})",
                cfg.formal_markers.join(", ")
            ),
        ));
    }

    out.extend(session_plan_findings(pack));

    if let Some(required) = ctx.required_tokens.get(&pack.scenario) {
        for step in &pack.session_plan.steps {
            let covered = step
                .prompt_ids
                .iter()
                .filter_map(|id| pack.prompt(id))
                .any(|p| !matched_tokens(&p.text, required).is_empty());
            if !covered {
                out.push(Finding::new(
                    Rule::RequiredToken,
                    format!("step '{}' has no prompt with a required token", step.id),
                ));
            }
        }
    }

    out
}

fn session_plan_findings(pack: &Pack) -> Vec<Finding> {
    let mut out = Vec::new();
    let steps = &pack.session_plan.steps;
    if steps.is_empty() {
        out.push(Finding::new(Rule::SessionPlan, "session plan has no steps"));
        return out;
    }
    let mut planned: HashMap<&str, usize> = HashMap::new();
    for step in steps {
        if step.prompt_ids.is_empty() {
            out.push(Finding::new(
                Rule::SessionPlan,
                format!("step '{}' has no prompts", step.id),
            ));
        }
        for id in &step.prompt_ids {
            *planned.entry(id.as_str()).or_default() += 1;
            if pack.prompt(id).is_none() {
                out.push(Finding::new(
                    Rule::SessionPlan,
                    format!("step '{}' references unknown prompt '{id}'", step.id),
                ));
            }
        }
    }
    for prompt in &pack.prompts {
        match planned.get(prompt.id.as_str()) {
            None => out.push(Finding::new(
                Rule::SessionPlan,
                format!("prompt '{}' is not in any step", prompt.id),
            )),
            Some(n) if *n > 1 => out.push(Finding::new(
                Rule::SessionPlan,
                format!("prompt '{}' is planned {n} times", prompt.id),
            )),
            _ => {}
        }
    }
    out
}

/// Content rules plus analytics presence and consistency.
pub fn pack_failures(pack: &Pack, ctx: &GateContext<'_>) -> Vec<Finding> {
    let mut out = pack_content_failures(pack, ctx);
    if !pack.is_generated() {
        return out;
    }
    let Some(stored) = &pack.analytics else {
        out.push(Finding::new(
            Rule::AnalyticsMissing,
            "generated pack has no analytics block",
        ));
        return out;
    };
    let required = ctx.required_tokens.get(&pack.scenario);
    let fresh = analytics::compute(
        pack,
        ctx.tokens.tokens_for(&pack.scenario),
        required.map(Vec::as_slice).unwrap_or(&[]),
    );
    let diffs = analytics::mismatches(
        stored,
        &fresh,
        ctx.config.analytics_tolerance,
        required.is_some(),
    );
    if !diffs.is_empty() {
        out.push(Finding::new(
            Rule::AnalyticsMismatch,
            format!("stored analytics differ: {}", diffs.join("; ")),
        ));
    }
    if !stored.passes_quality_gates {
        out.push(Finding::new(
            Rule::GatesNotPassed,
            "analytics.passesQualityGates is not true",
        ));
    }
    out
}

pub fn drill_failures(drill: &Drill, cfg: &QualityConfig) -> Vec<Finding> {
    let mut out = Vec::new();
    if drill.exercises.is_empty() {
        out.push(Finding::new(Rule::DrillStructure, "drill has no exercises"));
    }
    let mut ids = HashMap::new();
    for ex in &drill.exercises {
        if ids.insert(ex.id.as_str(), ()).is_some() {
            out.push(Finding::new(
                Rule::DrillStructure,
                format!("duplicate exercise id '{}'", ex.id),
            ));
        }
        if ex.prompt.trim().is_empty() {
            out.push(Finding::new(
                Rule::DrillStructure,
                format!("exercise '{}' has an empty prompt", ex.id),
            ));
        }
        let answer = ex.answer.as_deref().unwrap_or("");
        for field in [ex.prompt.as_str(), answer, ex.gloss_en.as_str()] {
            for phrase in banned_hits(field, &cfg.banned_phrases) {
                out.push(Finding::new(
                    Rule::BannedPhrase,
                    format!("exercise {} contains banned phrase '{phrase}'", ex.id),
                ));
            }
        }
    }
    let (dupes, repeated) = duplicate_count(drill.exercises.iter().map(|e| e.prompt.as_str()));
    if dupes > cfg.max_duplicate_prompts {
        out.push(Finding::new(
            Rule::DuplicatePrompt,
            format!("{dupes} repeated exercise(s): {}", repeated.join(" | ")),
        ));
    }
    if drill.is_generated() {
        match &drill.analytics {
            None => out.push(Finding::new(
                Rule::AnalyticsMissing,
                "generated drill has no analytics block",
            )),
            Some(stored) if stored.get("passesQualityGates") != Some(&Value::Bool(true)) => {
                out.push(Finding::new(
                    Rule::GatesNotPassed,
                    "analytics.passesQualityGates is not true",
                ))
            }
            Some(_) => {}
        }
    }
    out
}

pub fn exam_failures(exam: &Exam, cfg: &QualityConfig) -> Vec<Finding> {
    let mut texts = Vec::new();
    if let Some(title) = &exam.title {
        texts.push(title.as_str());
    }
    for section in &exam.sections {
        collect_strings(section, &mut texts);
    }
    let mut out = Vec::new();
    for text in texts {
        for phrase in banned_hits(text, &cfg.banned_phrases) {
            out.push(Finding::new(
                Rule::BannedPhrase,
                format!("exam text contains banned phrase '{phrase}'"),
            ));
        }
    }
    out
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

/// Every finding for any kind of entry.
pub fn entry_failures(entry: &Entry, ctx: &GateContext<'_>) -> Vec<Finding> {
    match entry {
        Entry::Pack(p) => pack_failures(p, ctx),
        Entry::Drill(d) => drill_failures(d, ctx.config),
        Entry::Exam(e) => exam_failures(e, ctx.config),
    }
}

fn pack_warnings(pack: &Pack, ctx: &GateContext<'_>) -> Vec<String> {
    let mut out = Vec::new();
    if ctx.tokens.tokens_for(&pack.scenario).is_empty() {
        out.push(format!(
            "no token dictionary for scenario '{}'; density not checked",
            pack.scenario
        ));
    }
    for locale in &ctx.config.required_locales {
        let missing = pack
            .prompts
            .iter()
            .filter(|p| !p.gloss_en_i18n.contains_key(locale))
            .count();
        if missing > 0 {
            out.push(format!("{missing} prompt(s) missing gloss_en_i18n.{locale}"));
        }
    }
    out
}

// ============================================================================
// Corpus evaluation
// ============================================================================

struct Checked {
    report: EntryReport,
    failures: Vec<Failure>,
    warnings: Vec<Warning>,
}

fn check(loaded: &LoadedEntry, ctx: &GateContext<'_>) -> Checked {
    let entry = &loaded.entry;
    let path = loaded.path.display().to_string();
    let findings = entry_failures(entry, ctx);
    let warnings = match entry {
        Entry::Pack(p) => pack_warnings(p, ctx),
        _ => Vec::new(),
    };
    let metrics = match entry {
        Entry::Pack(p) => Some(PackMetrics {
            prompt_count: p.prompts.len(),
            multi_slot_rate: analytics::round4(analytics::multi_slot_rate(p)),
            token_density: analytics::round4(analytics::token_density(
                p,
                ctx.tokens.tokens_for(&p.scenario),
            )),
            duplicate_count: duplicate_count(p.prompts.iter().map(|x| x.text.as_str())).0,
        }),
        _ => None,
    };
    Checked {
        report: EntryReport {
            workspace: loaded.workspace.clone(),
            id: entry.id().to_string(),
            kind: entry.kind(),
            path: path.clone(),
            passed: findings.is_empty(),
            failure_count: findings.len(),
            metrics,
        },
        failures: findings
            .into_iter()
            .map(|f| Failure {
                workspace: loaded.workspace.clone(),
                entry_id: Some(entry.id().to_string()),
                kind: entry.kind(),
                path: path.clone(),
                rule: f.rule,
                message: f.message,
            })
            .collect(),
        warnings: warnings
            .into_iter()
            .map(|message| Warning {
                workspace: loaded.workspace.clone(),
                entry_id: entry.id().to_string(),
                kind: entry.kind(),
                message,
            })
            .collect(),
    }
}

/// Evaluate scanned workspaces. Output order is independent of scheduling.
pub fn evaluate(scans: &[WorkspaceScan], ctx: &GateContext<'_>) -> QualityReport {
    let loaded: Vec<&LoadedEntry> = scans.iter().flat_map(|s| s.entries.iter()).collect();
    let checked: Vec<Checked> = loaded.par_iter().map(|e| check(e, ctx)).collect();

    let mut report = QualityReport::default();
    for scan in scans {
        for failure in &scan.failures {
            report.failures.push(Failure {
                workspace: failure.workspace.clone(),
                entry_id: None,
                kind: failure.kind,
                path: failure.path.display().to_string(),
                rule: Rule::Unreadable,
                message: failure.message.clone(),
            });
        }
    }
    for c in checked {
        report.packs.push(c.report);
        report.failures.extend(c.failures);
        report.warnings.extend(c.warnings);
    }
    report.packs.sort_by(|a, b| {
        (&a.workspace, a.kind, &a.id).cmp(&(&b.workspace, b.kind, &b.id))
    });
    // Stable: findings of one entry keep rule order.
    report.failures.sort_by(|a, b| {
        (&a.workspace, a.kind, &a.path).cmp(&(&b.workspace, b.kind, &b.path))
    });
    report.passed = report.failures.is_empty();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::naming::Layout;
    use crate::scan::scan_workspace;
    use crate::test_helpers::*;
    use crate::types::{Analytics, Level, ProvenanceSource};
    use std::fs;

    struct Fixture {
        config: QualityConfig,
        tokens: TokenDictionary,
        required: BTreeMap<String, Vec<String>>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut required = BTreeMap::new();
            required.insert("work".to_string(), work_template().required_tokens);
            Self {
                config: PipelineConfig::default().quality,
                tokens: work_tokens(),
                required,
            }
        }

        fn ctx(&self) -> GateContext<'_> {
            GateContext {
                config: &self.config,
                tokens: &self.tokens,
                required_tokens: &self.required,
            }
        }
    }

    fn rules(findings: &[Finding]) -> Vec<Rule> {
        findings.iter().map(|f| f.rule).collect()
    }

    #[test]
    fn sample_pack_passes() {
        let fx = Fixture::new();
        let pack = sample_pack("p", Level::A2);
        assert_eq!(pack_failures(&pack, &fx.ctx()), vec![]);
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(
            normalize_sentence("  Könnten   Sie, bitte?! "),
            "könnten sie bitte"
        );
        assert_eq!(normalize_sentence("E-Mail"), "email");
    }

    #[test]
    fn formal_marker_is_whole_word_and_case_sensitive() {
        let markers = vec!["Sie".to_string(), "Ihnen".to_string()];
        assert!(has_formal_marker("Können Sie helfen?", &markers));
        assert!(has_formal_marker("Passt Ihnen das?", &markers));
        assert!(!has_formal_marker("Kann sie helfen?", &markers));
        assert!(!has_formal_marker("Siegfried kommt.", &markers));
    }

    #[test]
    fn banned_phrase_is_case_insensitive_and_fatal() {
        let fx = Fixture::new();
        let mut pack = sample_pack("p", Level::A2);
        pack.prompts[0].text = "Lorem Ipsum im Büro, Sie?".to_string();
        let found = pack_failures(&pack, &fx.ctx());
        assert!(rules(&found).contains(&Rule::BannedPhrase));
        assert!(found[0].message.contains("lorem ipsum"));
    }

    #[test]
    fn low_multi_slot_rate_fails() {
        let fx = Fixture::new();
        let mut pack = sample_pack("p", Level::A2);
        for prompt in &mut pack.prompts {
            prompt.slots_changed.truncate(1);
        }
        assert_eq!(rules(&pack_failures(&pack, &fx.ctx())), vec![Rule::MultiSlotRate]);
    }

    #[test]
    fn exactly_thirty_percent_passes() {
        let fx = Fixture::new();
        let mut pack = sample_pack("p", Level::A2);
        let template = pack.prompts[2].clone();
        for i in 4..=10 {
            let mut extra = template.clone();
            extra.id = format!("p-{i:02}");
            extra.text = format!("Das Protokoll {i} liegt im Büro, Sie.");
            extra.slots_changed = vec!["object".to_string()];
            pack.session_plan.steps[0].prompt_ids.push(extra.id.clone());
            pack.prompts.push(extra);
        }
        // 3 of 10
        pack.prompts[2].slots_changed.push("place".to_string());
        assert_eq!(pack.prompts.len(), 10);
        assert!((analytics::multi_slot_rate(&pack) - 0.3).abs() < 1e-12);
        assert!(!rules(&pack_failures(&pack, &fx.ctx())).contains(&Rule::MultiSlotRate));
    }

    #[test]
    fn low_token_density_fails() {
        let fx = Fixture::new();
        let mut pack = sample_pack("p", Level::A2);
        pack.scenario = "restaurant".to_string();
        let found = pack_failures(&pack, &fx.ctx());
        assert_eq!(rules(&found), vec![Rule::TokenDensity]);
    }

    #[test]
    fn unknown_scenario_only_warns_about_density() {
        let fx = Fixture::new();
        let mut pack = sample_pack("p", Level::A2);
        pack.scenario = "amt".to_string();
        assert!(pack_failures(&pack, &fx.ctx()).is_empty());
        assert_eq!(pack_warnings(&pack, &fx.ctx()).len(), 1);
    }

    #[test]
    fn duplicates_counted_after_normalization() {
        let fx = Fixture::new();
        let mut pack = sample_pack("p", Level::A2);
        pack.prompts[2].text = "könnten sie den  Bericht heute schicken".to_string();
        let found = pack_failures(&pack, &fx.ctx());
        assert_eq!(rules(&found), vec![Rule::DuplicatePrompt]);
        assert!(found[0].message.starts_with("1 repeated"));
    }

    #[test]
    fn formal_pack_needs_marker() {
        let fx = Fixture::new();
        let mut pack = sample_pack("p", Level::A2);
        pack.prompts[0].text = "Kannst du den Bericht heute schicken?".to_string();
        pack.prompts[1].text = "Passt dir das Meeting am Montag?".to_string();
        assert_eq!(rules(&pack_failures(&pack, &fx.ctx())), vec![Rule::Register]);

        pack.register = Register::Informal;
        assert!(pack_failures(&pack, &fx.ctx()).is_empty());
    }

    #[test]
    fn session_plan_problems_are_reported() {
        let fx = Fixture::new();
        let mut pack = sample_pack("p", Level::A2);
        pack.session_plan.steps[0].prompt_ids = vec!["p-01".into(), "p-01".into(), "ghost".into()];
        let found = pack_failures(&pack, &fx.ctx());
        let plan: Vec<&Finding> = found.iter().filter(|f| f.rule == Rule::SessionPlan).collect();
        // ghost, p-01 twice, p-02 and p-03 orphaned
        assert_eq!(plan.len(), 4);
    }

    #[test]
    fn step_without_required_token_fails() {
        let fx = Fixture::new();
        let mut pack = sample_pack("p", Level::A2);
        let third = pack.session_plan.steps[0].prompt_ids.pop().unwrap();
        pack.session_plan.steps.push(crate::types::SessionStep {
            id: "extra".to_string(),
            title: None,
            prompt_ids: vec![third],
        });
        pack.prompts[2].text = "Ich arbeite heute zu Hause.".to_string();
        let found = pack_failures(&pack, &fx.ctx());
        assert!(rules(&found).contains(&Rule::RequiredToken));
        assert!(found.iter().any(|f| f.message.contains("'extra'")));
    }

    #[test]
    fn generated_pack_needs_consistent_analytics() {
        let fx = Fixture::new();
        let mut pack = sample_pack("p", Level::A2);
        pack.provenance.source = ProvenanceSource::Template;
        assert_eq!(rules(&pack_failures(&pack, &fx.ctx())), vec![Rule::AnalyticsMissing]);

        let mut a = analytics::compute(&pack, fx.tokens.tokens_for("work"), &fx.required["work"]);
        pack.analytics = Some(a.clone());
        assert_eq!(rules(&pack_failures(&pack, &fx.ctx())), vec![Rule::GatesNotPassed]);

        a.passes_quality_gates = true;
        pack.analytics = Some(a.clone());
        assert!(pack_failures(&pack, &fx.ctx()).is_empty());

        pack.analytics = Some(Analytics {
            prompt_count: 7,
            ..a
        });
        assert_eq!(rules(&pack_failures(&pack, &fx.ctx())), vec![Rule::AnalyticsMismatch]);
    }

    #[test]
    fn drill_structure_rules() {
        let fx = Fixture::new();
        let mut drill = sample_drill("d", Level::A2);
        assert!(drill_failures(&drill, &fx.config).is_empty());
        drill.exercises[1].id = drill.exercises[0].id.clone();
        drill.exercises[1].prompt = " ".to_string();
        let found = drill_failures(&drill, &fx.config);
        assert_eq!(rules(&found), vec![Rule::DrillStructure, Rule::DrillStructure]);
        drill.exercises.clear();
        assert_eq!(rules(&drill_failures(&drill, &fx.config)), vec![Rule::DrillStructure]);
    }

    #[test]
    fn generated_drills_need_passing_analytics() {
        let fx = Fixture::new();
        let mut drill = sample_drill("d", Level::A2);
        drill.provenance.source = ProvenanceSource::PdfExtraction;
        assert_eq!(rules(&drill_failures(&drill, &fx.config)), vec![Rule::AnalyticsMissing]);
        drill.analytics = Some(serde_json::json!({"passesQualityGates": false}));
        assert_eq!(rules(&drill_failures(&drill, &fx.config)), vec![Rule::GatesNotPassed]);
        drill.analytics = Some(serde_json::json!({"version": 1, "passesQualityGates": true}));
        assert!(drill_failures(&drill, &fx.config).is_empty());
    }

    #[test]
    fn exam_strings_are_searched_for_banned_phrases() {
        let fx = Fixture::new();
        let mut exam = sample_exam("e", Level::B1);
        assert!(exam_failures(&exam, &fx.config).is_empty());
        exam.sections.push(serde_json::json!({"items": [{"text": "TBD later"}]}));
        assert_eq!(rules(&exam_failures(&exam, &fx.config)), vec![Rule::BannedPhrase]);
    }

    #[test]
    fn missing_locales_are_warnings() {
        let mut fx = Fixture::new();
        fx.config.required_locales = vec!["fr".to_string()];
        let pack = sample_pack("p", Level::A2);
        let warnings = pack_warnings(&pack, &fx.ctx());
        assert_eq!(warnings, vec!["3 prompt(s) missing gloss_en_i18n.fr"]);
    }

    #[test]
    fn evaluate_reports_corpus_without_mutating() {
        let fx = Fixture::new();
        let tmp = setup_fixtures();
        let layout = Layout::new(tmp.path());
        let good = write_entry(&layout, "de", &Entry::Pack(sample_pack("good", Level::A2)));
        let mut bad = sample_pack("bad", Level::A2);
        bad.prompts[0].text = "placeholder Sie".to_string();
        write_entry(&layout, "de", &Entry::Pack(bad));
        let broken = layout.entry_path("de", ContentKind::Drill, "broken");
        fs::create_dir_all(broken.parent().unwrap()).unwrap();
        fs::write(&broken, "[]").unwrap();
        let before = fs::read_to_string(&good).unwrap();

        let scans = vec![scan_workspace(&layout, "de").unwrap()];
        let report = evaluate(&scans, &fx.ctx());

        assert!(!report.passed);
        assert_eq!(report.packs.len(), 2);
        assert_eq!(report.packs[0].id, "bad");
        assert!(!report.packs[0].passed);
        assert!(report.packs[1].passed);
        let rules: Vec<Rule> = report.failures.iter().map(|f| f.rule).collect();
        assert!(rules.contains(&Rule::Unreadable));
        assert!(rules.contains(&Rule::BannedPhrase));
        assert_eq!(fs::read_to_string(&good).unwrap(), before);
    }

    #[test]
    fn evaluate_is_deterministic() {
        let fx = Fixture::new();
        let tmp = setup_fixtures();
        let layout = Layout::new(tmp.path());
        for i in 0..12 {
            let mut pack = sample_pack(&format!("p{i:02}"), Level::A2);
            if i % 3 == 0 {
                pack.prompts[1].text = "xxx".to_string();
            }
            write_entry(&layout, "de", &Entry::Pack(pack));
        }
        let scans = vec![scan_workspace(&layout, "de").unwrap()];
        let a = evaluate(&scans, &fx.ctx());
        let b = evaluate(&scans, &fx.ctx());
        assert_eq!(a, b);
        assert_eq!(a.packs.iter().filter(|p| !p.passed).count(), 4);
    }
}
