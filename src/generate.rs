//! Seeded pack generation.
//!
//! Expands a scenario template into a concrete [`Pack`]. Output is a pure
//! function of the template, level, seed, and the generation/quality config:
//! the same inputs render to byte-identical JSON. The only wall-clock value,
//! `provenance.generatedAt`, is supplied by the caller and is never read back.
//!
//! ## Per step
//!
//! 1. Each prompt varies `k = 1 + below(n)` distinct roles out of the step's
//!    `n` variable roles, each moved to a non-default option.
//! 2. A prompt whose normalized text already exists in the pack is re-rolled,
//!    up to `generation.max_attempts` times.
//! 3. If no prompt of the step contains a required token, the whole step is
//!    re-rolled, up to `generation.max_attempts` times.
//! 4. If it still lacks one, a token-bearing option is forced into the last
//!    prompt that can take it without creating a duplicate. If nothing in
//!    the banks can supply a token the run fails with
//!    [`GenerateError::RequiredTokenUnsatisfiable`].
//!
//! ## Per pack
//!
//! Prompts with fewer than two changed slots are upgraded, in order, until
//! the multi-slot rate reaches `max(quality.min_multi_slot_rate,
//! constraints.minMultiSlotRate)`. Upgrades that would duplicate a sentence or
//! strip a step's only required token are skipped. If the rate cannot be
//! reached the run fails with [`GenerateError::MultiSlotUnsatisfiable`].
//!
//! ## Output
//!
//! ```text
//! content/v1/workspaces/{ws}/packs/{scenario}_{level}_s{seed}/pack.json
//! ```
//!
//! Prompt ids are `{packId}-{stepId}-{nn}`. An approved pack is never
//! overwritten.

use crate::analytics;
use crate::config::PipelineConfig;
use crate::naming::{self, Layout};
use crate::quality::{self, Finding, GateContext};
use crate::rng::{self, SeededRng};
use crate::scan;
use crate::template::{self, StepBlueprint, Template, TemplateError, TemplateStore};
use crate::tokens::{TokenDictionary, contains_any};
use crate::types::{
    ContentKind, Entry, Level, Pack, Prompt, Provenance, ProvenanceSource, Review, ReviewStatus,
    SessionPlan, SessionStep, render_json,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
    #[error("step '{step}': no unique sentence after {attempts} attempts")]
    DuplicateExhausted { step: String, attempts: u32 },
    #[error("step '{step}': no slot option can supply a required token")]
    RequiredTokenUnsatisfiable { step: String },
    #[error("multi-slot rate {rate:.2} cannot reach {threshold:.2}")]
    MultiSlotUnsatisfiable { rate: f64, threshold: f64 },
    #[error("invalid pack id '{0}'")]
    InvalidId(String),
    #[error("pack '{id}' is approved and will not be overwritten")]
    ApprovedExists { id: String },
    #[error("pack '{id}' is {status}; move it back to draft before regenerating")]
    UnderReview { id: String, status: ReviewStatus },
    #[error("existing pack at {path} is unreadable: {message}")]
    ExistingUnreadable { path: PathBuf, message: String },
    #[error("pack '{id}' fails the quality gate: {}", failures.join("; "))]
    GateFailed { id: String, failures: Vec<String> },
    #[error("invalid batch plan {path}: {source}")]
    Plan {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One generation run.
#[derive(Debug, Clone)]
pub struct GenerateRequest<'a> {
    pub template: &'a Template,
    pub level: Level,
    pub seed: u64,
    /// Defaults to `{scenario}_{level}_s{seed}`.
    pub pack_id: Option<String>,
    /// Metadata only.
    pub generated_at: Option<String>,
}

/// A generated pack and the content-rule findings it was scored with.
#[derive(Debug, Clone)]
pub struct Generated {
    pub pack: Pack,
    pub findings: Vec<Finding>,
}

impl Generated {
    pub fn passed(&self) -> bool {
        self.findings.is_empty()
    }

    fn finding_messages(&self) -> Vec<String> {
        self.findings
            .iter()
            .map(|f| format!("[{}] {}", f.rule, f.message))
            .collect()
    }
}

type Choices = BTreeMap<String, usize>;

// ============================================================================
// Slot selection
// ============================================================================

/// A blueprint step with its template, ready for drawing prompts.
struct StepSlots<'a> {
    template: &'a Template,
    step: &'a StepBlueprint,
    /// Roles the generator may vary, in declaration order.
    roles: Vec<String>,
    /// Default choice for every role the patterns mention.
    defaults: Choices,
}

impl<'a> StepSlots<'a> {
    fn new(template: &'a Template, step: &'a StepBlueprint) -> Self {
        let mut mentioned = template::placeholders(&step.rules.pattern);
        if let Some(gloss) = &step.rules.gloss_pattern {
            mentioned.extend(template::placeholders(gloss));
        }
        let defaults = mentioned
            .into_iter()
            .map(|role| {
                let idx = template.default_index(step, &role);
                (role, idx)
            })
            .collect();
        Self {
            template,
            step,
            roles: template.variable_roles(step),
            defaults,
        }
    }

    fn bank_len(&self, role: &str) -> usize {
        self.template.slot_banks.get(role).map(Vec::len).unwrap_or(0)
    }

    fn default_of(&self, role: &str) -> usize {
        self.template.default_index(self.step, role)
    }

    /// Uniform pick among the options of `role` other than its default.
    fn alternative(&self, rng: &mut SeededRng, role: &str) -> usize {
        let default = self.default_of(role);
        let j = rng.below(self.bank_len(role).saturating_sub(1));
        if j >= default { j + 1 } else { j }
    }

    fn draw(&self, rng: &mut SeededRng) -> Choices {
        let mut choices = self.defaults.clone();
        let n = self.roles.len();
        if n == 0 {
            return choices;
        }
        let k = 1 + rng.below(n);
        for i in rng.choose_distinct(n, k) {
            let role = &self.roles[i];
            choices.insert(role.clone(), self.alternative(rng, role));
        }
        choices
    }

    fn render(&self, choices: &Choices) -> String {
        template::render_pattern(&self.step.rules.pattern, |role| {
            let idx = *choices.get(role)?;
            self.template.option(role, idx).map(|o| o.text())
        })
    }

    fn render_gloss(&self, choices: &Choices) -> String {
        match &self.step.rules.gloss_pattern {
            Some(pattern) => template::render_pattern(pattern, |role| {
                let idx = *choices.get(role)?;
                self.template.option(role, idx).map(|o| o.gloss())
            }),
            None => String::new(),
        }
    }

    /// Declared variation slots that moved off their default.
    fn changed(&self, choices: &Choices) -> Vec<String> {
        self.template
            .variation_slots
            .iter()
            .filter(|role| {
                choices
                    .get(role.as_str())
                    .is_some_and(|&idx| idx != self.default_of(role))
            })
            .cloned()
            .collect()
    }

    fn key(&self, choices: &Choices) -> String {
        quality::normalize_sentence(&self.render(choices))
    }

    fn has_token(&self, drafts: &[Choices], required: &[String]) -> bool {
        drafts.iter().any(|c| contains_any(&self.render(c), required))
    }
}

/// Draw one step's prompts, avoiding sentences already in `seen`.
fn draw_step(
    rng: &mut SeededRng,
    slots: &StepSlots<'_>,
    seen: &HashSet<String>,
    max_attempts: u32,
) -> Result<Vec<Choices>, GenerateError> {
    let mut local = seen.clone();
    let mut drafts = Vec::with_capacity(slots.step.prompt_count);
    for _ in 0..slots.step.prompt_count {
        let mut accepted = None;
        for _ in 0..max_attempts {
            let choices = slots.draw(rng);
            if local.insert(slots.key(&choices)) {
                accepted = Some(choices);
                break;
            }
        }
        match accepted {
            Some(choices) => drafts.push(choices),
            None => {
                return Err(GenerateError::DuplicateExhausted {
                    step: slots.step.id.clone(),
                    attempts: max_attempts,
                });
            }
        }
    }
    Ok(drafts)
}

/// Put a token-bearing option into the last prompt that can take one.
fn force_token(
    slots: &StepSlots<'_>,
    mut drafts: Vec<Choices>,
    required: &[String],
    seen: &HashSet<String>,
) -> Result<Vec<Choices>, GenerateError> {
    let unsatisfiable = || GenerateError::RequiredTokenUnsatisfiable {
        step: slots.step.id.clone(),
    };
    let candidates: Vec<(String, usize)> = template::placeholders(&slots.step.rules.pattern)
        .into_iter()
        .flat_map(|role| {
            let bank = slots.template.slot_banks.get(&role).cloned().unwrap_or_default();
            bank.iter()
                .enumerate()
                .filter(|(_, opt)| contains_any(opt.text(), required))
                .map(|(idx, _)| (role.clone(), idx))
                .collect::<Vec<_>>()
        })
        .collect();
    if candidates.is_empty() {
        return Err(unsatisfiable());
    }

    for p in (0..drafts.len()).rev() {
        let taken: HashSet<String> = drafts
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != p)
            .map(|(_, c)| slots.key(c))
            .chain(seen.iter().cloned())
            .collect();
        for (role, idx) in &candidates {
            let mut trial = drafts[p].clone();
            trial.insert(role.clone(), *idx);
            if !taken.contains(&slots.key(&trial)) {
                tracing::debug!(step = %slots.step.id, %role, prompt = p, "forced required token");
                drafts[p] = trial;
                return Ok(drafts);
            }
        }
    }
    Err(unsatisfiable())
}

fn generate_step(
    rng: &mut SeededRng,
    slots: &StepSlots<'_>,
    required: &[String],
    seen: &HashSet<String>,
    max_attempts: u32,
) -> Result<Vec<Choices>, GenerateError> {
    let mut last = Vec::new();
    for attempt in 0..max_attempts {
        let drafts = draw_step(rng, slots, seen, max_attempts)?;
        if slots.has_token(&drafts, required) {
            return Ok(drafts);
        }
        tracing::trace!(step = %slots.step.id, attempt, "no required token; re-rolling step");
        last = drafts;
    }
    force_token(slots, last, required, seen)
}

/// Smallest multi-slot count that meets `threshold` for `total` prompts.
pub fn required_multi_slot_count(total: usize, threshold: f64) -> usize {
    if total == 0 {
        return 0;
    }
    (0..=total)
        .find(|&m| m as f64 / total as f64 + 1e-9 >= threshold)
        .unwrap_or(total)
}

fn raise_multi_slot(
    rng: &mut SeededRng,
    steps: &[StepSlots<'_>],
    drafts: &mut [Vec<Choices>],
    required: &[String],
    threshold: f64,
    max_attempts: u32,
) -> Result<(), GenerateError> {
    let total: usize = drafts.iter().map(Vec::len).sum();
    let needed = required_multi_slot_count(total, threshold);
    let mut current = steps
        .iter()
        .zip(drafts.iter())
        .map(|(s, d)| d.iter().filter(|c| s.changed(c).len() >= 2).count())
        .sum::<usize>();

    for (s, slots) in steps.iter().enumerate() {
        if slots.roles.len() < 2 {
            continue;
        }
        for p in 0..drafts[s].len() {
            if current >= needed {
                return Ok(());
            }
            if slots.changed(&drafts[s][p]).len() >= 2 {
                continue;
            }
            let taken: HashSet<String> = steps
                .iter()
                .zip(drafts.iter())
                .enumerate()
                .flat_map(|(si, (ss, d))| {
                    d.iter()
                        .enumerate()
                        .filter(move |(pi, _)| !(si == s && *pi == p))
                        .map(|(_, c)| ss.key(c))
                        .collect::<Vec<_>>()
                })
                .collect();
            for _ in 0..max_attempts {
                let mut trial = drafts[s][p].clone();
                loop {
                    let changed = slots.changed(&trial);
                    if changed.len() >= 2 {
                        break;
                    }
                    let unchanged: Vec<&String> =
                        slots.roles.iter().filter(|r| !changed.contains(*r)).collect();
                    let role = unchanged[rng.below(unchanged.len())].clone();
                    let idx = slots.alternative(rng, &role);
                    trial.insert(role, idx);
                }
                if taken.contains(&slots.key(&trial)) {
                    continue;
                }
                let mut step_drafts = drafts[s].clone();
                step_drafts[p] = trial.clone();
                if !slots.has_token(&step_drafts, required) {
                    continue;
                }
                drafts[s][p] = trial;
                current += 1;
                break;
            }
        }
    }

    if current >= needed {
        Ok(())
    } else {
        Err(GenerateError::MultiSlotUnsatisfiable {
            rate: current as f64 / total.max(1) as f64,
            threshold,
        })
    }
}

// ============================================================================
// Pack assembly
// ============================================================================

/// Generate a pack and score it against the content rules.
pub fn generate_pack(
    request: &GenerateRequest<'_>,
    config: &PipelineConfig,
    tokens: &TokenDictionary,
) -> Result<Generated, GenerateError> {
    let template = request.template;
    template.validate()?;
    let scenario = template.scenario_id.as_str();
    let pack_id = request
        .pack_id
        .clone()
        .unwrap_or_else(|| naming::pack_id(scenario, request.level, request.seed));
    if !naming::is_valid_id(&pack_id) {
        return Err(GenerateError::InvalidId(pack_id));
    }

    let max_attempts = config.generation.max_attempts.max(1);
    let required = &template.required_tokens;
    let threshold = template
        .constraints
        .min_multi_slot_rate
        .map_or(config.quality.min_multi_slot_rate, |t| {
            t.max(config.quality.min_multi_slot_rate)
        });

    let mut rng = SeededRng::for_pack(scenario, request.level, request.seed);
    let steps: Vec<StepSlots<'_>> = template
        .step_blueprint
        .iter()
        .map(|step| StepSlots::new(template, step))
        .collect();

    let mut seen = HashSet::new();
    let mut drafts: Vec<Vec<Choices>> = Vec::with_capacity(steps.len());
    for slots in &steps {
        let step_drafts = generate_step(&mut rng, slots, required, &seen, max_attempts)?;
        seen.extend(step_drafts.iter().map(|c| slots.key(c)));
        drafts.push(step_drafts);
    }
    raise_multi_slot(&mut rng, &steps, &mut drafts, required, threshold, max_attempts)?;

    let mut prompts = Vec::new();
    let mut plan = Vec::new();
    for (slots, step_drafts) in steps.iter().zip(&drafts) {
        let step = slots.step;
        let mut prompt_ids = Vec::with_capacity(step_drafts.len());
        for (n, choices) in step_drafts.iter().enumerate() {
            let id = format!("{pack_id}-{}-{:02}", step.id, n + 1);
            prompt_ids.push(id.clone());
            prompts.push(Prompt {
                id,
                text: slots.render(choices),
                intent: step.rules.intent.clone().unwrap_or_else(|| step.id.clone()),
                gloss_en: slots.render_gloss(choices),
                slots_changed: slots.changed(choices),
                gloss_en_i18n: BTreeMap::new(),
                extra: BTreeMap::new(),
            });
        }
        plan.push(SessionStep {
            id: step.id.clone(),
            title: Some(step.title.clone()),
            prompt_ids,
        });
    }

    let mut pack = Pack {
        id: pack_id,
        title: template
            .title
            .as_ref()
            .map(|t| format!("{t} ({})", request.level)),
        level: request.level,
        scenario: scenario.to_string(),
        register: template.default_register,
        primary_structure: template.primary_structure.clone(),
        variation_slots: template.variation_slots.clone(),
        prompts,
        session_plan: SessionPlan { steps: plan },
        analytics: None,
        provenance: Provenance {
            source: ProvenanceSource::Template,
            source_ref: Some(format!("templates/v1/scenarios/{scenario}.json")),
            generated_at: request.generated_at.clone(),
            generator: Some(rng::ALGORITHM.to_string()),
            seed: Some(request.seed),
        },
        review: Review::default(),
        extra: BTreeMap::new(),
    };

    let mut required_map = BTreeMap::new();
    required_map.insert(scenario.to_string(), required.clone());
    let ctx = GateContext {
        config: &config.quality,
        tokens,
        required_tokens: &required_map,
    };
    let findings = quality::pack_content_failures(&pack, &ctx);
    let mut stats = analytics::compute(&pack, tokens.tokens_for(scenario), required);
    stats.passes_quality_gates = findings.is_empty();
    pack.analytics = Some(stats);

    tracing::debug!(
        pack = %pack.id,
        prompts = pack.prompts.len(),
        passed = findings.is_empty(),
        "generated pack"
    );
    Ok(Generated { pack, findings })
}

// ============================================================================
// Writing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    Created,
    Updated,
    Unchanged,
    DryRun,
}

/// Write a generated pack to its canonical path.
///
/// Refuses packs that failed the content rules. Only draft packs may be
/// replaced: a pack under review or approved changes state through
/// [`crate::review::apply`], never by regeneration. When only `generatedAt`
/// differs from the pack on disk, the existing timestamp is kept and
/// nothing is written.
pub fn write_generated(
    layout: &Layout,
    workspace: &str,
    generated: &Generated,
    dry_run: bool,
) -> Result<(PathBuf, WriteOutcome), GenerateError> {
    let pack = &generated.pack;
    if !generated.passed() {
        return Err(GenerateError::GateFailed {
            id: pack.id.clone(),
            failures: generated.finding_messages(),
        });
    }
    let path = layout.entry_path(workspace, ContentKind::Pack, &pack.id);
    let mut json = render_json(pack)?;

    let existed = path.exists();
    if existed {
        let existing = match scan::load_entry(ContentKind::Pack, &path) {
            Ok(existing) => existing,
            Err(message) => {
                return Err(GenerateError::ExistingUnreadable { path, message });
            }
        };
        match existing.review().status {
            ReviewStatus::Draft => {}
            ReviewStatus::Approved => {
                return Err(GenerateError::ApprovedExists {
                    id: pack.id.clone(),
                });
            }
            status => {
                return Err(GenerateError::UnderReview {
                    id: pack.id.clone(),
                    status,
                });
            }
        }
        let on_disk = fs::read_to_string(&path)?;
        if let Entry::Pack(previous) = &existing
            && previous.provenance.generated_at != pack.provenance.generated_at
        {
            let mut restamped = pack.clone();
            restamped.provenance.generated_at = previous.provenance.generated_at.clone();
            let candidate = render_json(&restamped)?;
            if candidate == on_disk {
                json = candidate;
            }
        }
        if on_disk == json {
            return Ok((path, WriteOutcome::Unchanged));
        }
    }
    if dry_run {
        return Ok((path, WriteOutcome::DryRun));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, json)?;
    let outcome = if existed {
        WriteOutcome::Updated
    } else {
        WriteOutcome::Created
    };
    Ok((path, outcome))
}

// ============================================================================
// Batch mode
// ============================================================================

/// A batch plan file:
///
/// ```json
/// { "workspace": "de",
///   "items": [ {"scenario": "work", "level": "A2", "seed": 42},
///              {"scenario": "work", "level": "B1", "seed": 7, "id": "work_b1_intro"} ] }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchPlan {
    pub workspace: String,
    pub items: Vec<BatchItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchItem {
    pub scenario: String,
    pub level: Level,
    pub seed: u64,
    #[serde(default)]
    pub id: Option<String>,
}

impl BatchItem {
    pub fn label(&self) -> String {
        format!("{} {} seed={}", self.scenario, self.level, self.seed)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions<'a> {
    pub generated_at: Option<&'a str>,
    pub dry_run: bool,
}

#[derive(Debug)]
pub struct BatchResult {
    pub label: String,
    pub outcome: Result<(String, PathBuf, WriteOutcome), GenerateError>,
}

pub fn load_plan(path: &Path) -> Result<BatchPlan, GenerateError> {
    let json = fs::read_to_string(path)?;
    serde_json::from_str(&json).map_err(|source| GenerateError::Plan {
        path: path.to_path_buf(),
        source,
    })
}

fn run_item(
    layout: &Layout,
    store: &TemplateStore,
    workspace: &str,
    item: &BatchItem,
    config: &PipelineConfig,
    tokens: &TokenDictionary,
    options: &BatchOptions<'_>,
) -> Result<(String, PathBuf, WriteOutcome), GenerateError> {
    let template = store.load(&item.scenario)?;
    let generated = generate_pack(
        &GenerateRequest {
            template: &template,
            level: item.level,
            seed: item.seed,
            pack_id: item.id.clone(),
            generated_at: options.generated_at.map(str::to_string),
        },
        config,
        tokens,
    )?;
    let (path, outcome) = write_generated(layout, workspace, &generated, options.dry_run)?;
    Ok((generated.pack.id, path, outcome))
}

/// Generate every item of a plan. A failing item is recorded and the batch
/// moves on.
pub fn run_batch(
    layout: &Layout,
    plan: &BatchPlan,
    config: &PipelineConfig,
    tokens: &TokenDictionary,
    options: &BatchOptions<'_>,
) -> Vec<BatchResult> {
    let store = TemplateStore::new(layout);
    plan.items
        .iter()
        .map(|item| {
            let outcome = run_item(
                layout,
                &store,
                &plan.workspace,
                item,
                config,
                tokens,
                options,
            );
            if let Err(e) = &outcome {
                tracing::error!(item = %item.label(), error = %e, "batch item failed");
            }
            BatchResult {
                label: item.label(),
                outcome,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{SlotOption, StepRules, TemplateConstraints};
    use crate::test_helpers::*;
    use crate::types::{Entry, Register, ReviewStatus};

    fn request(template: &Template, seed: u64) -> GenerateRequest<'_> {
        GenerateRequest {
            template,
            level: Level::A2,
            seed,
            pack_id: None,
            generated_at: None,
        }
    }

    fn generate(template: &Template, seed: u64) -> Generated {
        generate_pack(&request(template, seed), &PipelineConfig::default(), &work_tokens()).unwrap()
    }

    fn texts(pack: &Pack) -> Vec<&str> {
        pack.prompts.iter().map(|p| p.text.as_str()).collect()
    }

    fn plain(xs: &[&str]) -> Vec<SlotOption> {
        xs.iter().map(|s| SlotOption::Plain(s.to_string())).collect()
    }

    /// One step, `pattern` over roles a/b with the given banks.
    fn tiny_template(banks: &[(&str, &[&str])], pattern: &str, count: usize) -> Template {
        Template {
            scenario_id: "tiny".to_string(),
            title: None,
            default_register: Register::Neutral,
            primary_structure: String::new(),
            variation_slots: banks.iter().map(|(r, _)| r.to_string()).collect(),
            slot_banks: banks
                .iter()
                .map(|(r, opts)| (r.to_string(), plain(opts)))
                .collect(),
            required_tokens: vec!["Büro".to_string()],
            step_blueprint: vec![StepBlueprint {
                id: "only".to_string(),
                title: "Only".to_string(),
                prompt_count: count,
                rules: StepRules {
                    pattern: pattern.to_string(),
                    gloss_pattern: None,
                    intent: None,
                    defaults: BTreeMap::new(),
                },
            }],
            constraints: TemplateConstraints::default(),
        }
    }

    #[test]
    fn same_seed_renders_identical_json() {
        let template = work_template();
        let a = render_json(&generate(&template, 42).pack).unwrap();
        let b = render_json(&generate(&template, 42).pack).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn generated_at_does_not_affect_prompts() {
        let template = work_template();
        let tokens = work_tokens();
        let config = PipelineConfig::default();
        let mut req = request(&template, 42);
        let plain = generate_pack(&req, &config, &tokens).unwrap().pack;
        req.generated_at = Some("2030-01-01T00:00:00Z".to_string());
        let stamped = generate_pack(&req, &config, &tokens).unwrap().pack;
        assert_eq!(plain.prompts, stamped.prompts);
        assert_eq!(plain.analytics, stamped.analytics);
        assert_eq!(
            stamped.provenance.generated_at.as_deref(),
            Some("2030-01-01T00:00:00Z")
        );
    }

    #[test]
    fn different_pack_ids_share_prompts_after_id_normalization() {
        let template = work_template();
        let tokens = work_tokens();
        let config = PipelineConfig::default();
        let mut req = request(&template, 42);
        req.pack_id = Some("first".to_string());
        let first = generate_pack(&req, &config, &tokens).unwrap().pack;
        req.pack_id = Some("second".to_string());
        let second = generate_pack(&req, &config, &tokens).unwrap().pack;

        let normalize = |pack: &Pack| {
            let mut prompts = pack.prompts.clone();
            for p in &mut prompts {
                p.id = p.id.replacen(&pack.id, "PACK", 1);
            }
            serde_json::to_string(&prompts).unwrap()
        };
        assert_eq!(normalize(&first), normalize(&second));
    }

    #[test]
    fn different_seeds_produce_different_prompts() {
        let template = work_template();
        let base = generate(&template, 42).pack;
        for seed in 1..=10 {
            let other = generate(&template, seed).pack;
            assert_ne!(texts(&base), texts(&other), "seed {seed} matched seed 42");
        }
    }

    #[test]
    fn invariants_hold_across_seeds() {
        let template = work_template();
        let banned = PipelineConfig::default().quality.banned_phrases;
        for seed in 0..40 {
            let generated = generate(&template, seed);
            let pack = &generated.pack;
            assert!(generated.passed(), "seed {seed}: {:?}", generated.findings);

            let multi = pack.prompts.iter().filter(|p| p.slots_changed.len() >= 2).count();
            assert!(multi as f64 / pack.prompts.len() as f64 >= 0.3, "seed {seed}");

            for step in &pack.session_plan.steps {
                assert!(
                    step.prompt_ids
                        .iter()
                        .filter_map(|id| pack.prompt(id))
                        .any(|p| contains_any(&p.text, &template.required_tokens)),
                    "seed {seed}: step {} lacks a required token",
                    step.id
                );
            }
            for prompt in &pack.prompts {
                assert!(quality::banned_hits(&prompt.text, &banned).is_empty());
                assert!(!prompt.slots_changed.is_empty());
            }
            let a = pack.analytics.as_ref().unwrap();
            assert!(a.passes_quality_gates);
            assert_eq!(a.prompt_count, 14);
        }
    }

    #[test]
    fn pack_shape_follows_template() {
        let template = work_template();
        let pack = generate(&template, 42).pack;
        assert_eq!(pack.id, "work_a2_s42");
        assert_eq!(pack.title.as_deref(), Some("At the office (A2)"));
        assert_eq!(pack.register, Register::Formal);
        assert_eq!(pack.review.status, ReviewStatus::Draft);
        assert_eq!(pack.provenance.generator.as_deref(), Some(rng::ALGORITHM));
        assert_eq!(pack.provenance.seed, Some(42));

        let step_ids: Vec<&str> = pack.session_plan.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(step_ids, vec!["warmup", "requests", "scheduling"]);
        assert_eq!(pack.session_plan.steps[1].prompt_ids[0], "work_a2_s42-requests-01");

        let first = &pack.prompts[0];
        assert_eq!(first.intent, "small_talk");
        assert!(first.text.ends_with('.'));
        assert!(!first.gloss_en.contains('{'));
    }

    #[test]
    fn slots_changed_respect_step_defaults() {
        let template = work_template();
        let pack = generate(&template, 5).pack;
        for p in pack.prompts.iter().filter(|p| p.id.contains("-scheduling-")) {
            // day defaults to "am Dienstag" in this step
            assert_eq!(
                p.text.contains("am Dienstag"),
                !p.slots_changed.iter().any(|r| r == "day"),
                "{}",
                p.text
            );
        }
    }

    #[test]
    fn no_duplicate_sentences_within_pack() {
        let template = work_template();
        for seed in 0..20 {
            let pack = generate(&template, seed).pack;
            let keys: HashSet<String> = pack
                .prompts
                .iter()
                .map(|p| quality::normalize_sentence(&p.text))
                .collect();
            assert_eq!(keys.len(), pack.prompts.len());
        }
    }

    #[test]
    fn missing_token_everywhere_is_a_hard_error() {
        let template = tiny_template(
            &[("a", &["eins", "zwei", "drei"]), ("b", &["vier", "fünf", "sechs"])],
            "{a} {b}",
            3,
        );
        let err = generate_pack(&request(&template, 1), &PipelineConfig::default(), &work_tokens())
            .unwrap_err();
        assert!(matches!(err, GenerateError::RequiredTokenUnsatisfiable { step } if step == "only"));
    }

    #[test]
    fn token_is_forced_when_rerolls_miss() {
        // `place` is not a variation slot, so rolls never leave its default.
        let mut template = tiny_template(
            &[
                ("a", &["eins", "zwei", "drei", "vier"]),
                ("b", &["x1", "x2", "x3", "x4"]),
                ("place", &["Haus", "Büro"]),
            ],
            "{a} {b} im {place}",
            4,
        );
        template.variation_slots = vec!["a".to_string(), "b".to_string()];
        for seed in 0..10 {
            let pack = generate_pack(
                &request(&template, seed),
                &PipelineConfig::default(),
                &TokenDictionary::default(),
            )
            .unwrap()
            .pack;
            let with_token: Vec<usize> = pack
                .prompts
                .iter()
                .enumerate()
                .filter(|(_, p)| p.text.contains("Büro"))
                .map(|(i, _)| i)
                .collect();
            assert_eq!(with_token, vec![3], "seed {seed}");
        }
    }

    #[test]
    fn single_variable_slot_cannot_reach_multi_slot_rate() {
        let template = tiny_template(&[("a", &["Büro", "Haus", "Hof", "Park", "Feld"])], "im {a}", 3);
        let err = generate_pack(&request(&template, 3), &PipelineConfig::default(), &work_tokens())
            .unwrap_err();
        assert!(matches!(err, GenerateError::MultiSlotUnsatisfiable { .. }));
    }

    #[test]
    fn exhausted_duplicates_are_a_hard_error() {
        let template = tiny_template(&[("a", &["Büro", "Haus"])], "im {a}", 2);
        let err = generate_pack(&request(&template, 3), &PipelineConfig::default(), &work_tokens())
            .unwrap_err();
        assert!(matches!(err, GenerateError::DuplicateExhausted { .. }));
    }

    #[test]
    fn template_constraint_raises_threshold() {
        let mut template = work_template();
        template.constraints.min_multi_slot_rate = Some(0.8);
        for seed in 0..10 {
            let pack = generate(&template, seed).pack;
            let multi = pack.prompts.iter().filter(|p| p.slots_changed.len() >= 2).count();
            assert!(multi >= required_multi_slot_count(14, 0.8));
        }
    }

    #[test]
    fn multi_slot_count_rounds_up() {
        assert_eq!(required_multi_slot_count(14, 0.3), 5);
        assert_eq!(required_multi_slot_count(10, 0.3), 3);
        assert_eq!(required_multi_slot_count(3, 0.0), 0);
        assert_eq!(required_multi_slot_count(0, 0.3), 0);
    }

    #[test]
    fn invalid_pack_id_is_rejected() {
        let template = work_template();
        let mut req = request(&template, 1);
        req.pack_id = Some("Bad Id".to_string());
        let err = generate_pack(&req, &PipelineConfig::default(), &work_tokens()).unwrap_err();
        assert!(matches!(err, GenerateError::InvalidId(_)));
    }

    #[test]
    fn write_creates_then_reports_unchanged() {
        let tmp = setup_fixtures();
        let layout = Layout::new(tmp.path());
        let generated = generate(&work_template(), 42);

        let (path, outcome) = write_generated(&layout, "de", &generated, true).unwrap();
        assert_eq!(outcome, WriteOutcome::DryRun);
        assert!(!path.exists());

        let (path, outcome) = write_generated(&layout, "de", &generated, false).unwrap();
        assert_eq!(outcome, WriteOutcome::Created);
        assert!(path.ends_with("packs/work_a2_s42/pack.json"));
        let (_, outcome) = write_generated(&layout, "de", &generated, false).unwrap();
        assert_eq!(outcome, WriteOutcome::Unchanged);
    }

    #[test]
    fn approved_pack_is_never_overwritten() {
        let tmp = setup_fixtures();
        let layout = Layout::new(tmp.path());
        let mut generated = generate(&work_template(), 42);
        write_entry(&layout, "de", &Entry::Pack(approved(generated.pack.clone())));
        let before = fs::read_to_string(layout.entry_path("de", ContentKind::Pack, "work_a2_s42"))
            .unwrap();

        generated.pack.prompts[0].text.push_str(" Neu.");
        let err = write_generated(&layout, "de", &generated, false).unwrap_err();
        assert!(matches!(err, GenerateError::ApprovedExists { .. }));
        let after = fs::read_to_string(layout.entry_path("de", ContentKind::Pack, "work_a2_s42"))
            .unwrap();
        assert_eq!(before, after);
        let path = layout.entry_path("de", ContentKind::Pack, "work_a2_s42");
        assert!(scan::load_entry(ContentKind::Pack, &path).unwrap().is_approved());
    }

    #[test]
    fn pack_under_review_is_never_overwritten() {
        let tmp = setup_fixtures();
        let layout = Layout::new(tmp.path());
        let mut generated = generate(&work_template(), 7);
        let mut pending = generated.pack.clone();
        pending.review.status = ReviewStatus::NeedsReview;
        pending.review.reviewer = Some("kim".to_string());
        pending.review.notes = Some("looks fine".to_string());
        write_entry(&layout, "de", &Entry::Pack(pending));
        let path = layout.entry_path("de", ContentKind::Pack, &generated.pack.id);
        let before = fs::read_to_string(&path).unwrap();

        generated.pack.prompts[0].text.push_str(" Neu.");
        let err = write_generated(&layout, "de", &generated, false).unwrap_err();
        assert!(matches!(
            err,
            GenerateError::UnderReview {
                status: ReviewStatus::NeedsReview,
                ..
            }
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        let Entry::Pack(kept) = scan::load_entry(ContentKind::Pack, &path).unwrap() else {
            panic!("expected a pack");
        };
        assert_eq!(kept.review.reviewer.as_deref(), Some("kim"));
        assert_eq!(kept.review.notes.as_deref(), Some("looks fine"));
    }

    #[test]
    fn rerun_with_new_timestamp_keeps_existing_file() {
        let tmp = setup_fixtures();
        let layout = Layout::new(tmp.path());
        let template = work_template();
        let stamped = |at: &str| {
            let mut req = request(&template, 42);
            req.generated_at = Some(at.to_string());
            generate_pack(&req, &PipelineConfig::default(), &work_tokens()).unwrap()
        };

        let first = stamped("2024-05-01T00:00:00Z");
        let (path, outcome) = write_generated(&layout, "de", &first, false).unwrap();
        assert_eq!(outcome, WriteOutcome::Created);
        let before = fs::read_to_string(&path).unwrap();

        let (_, outcome) =
            write_generated(&layout, "de", &stamped("2024-06-01T00:00:00Z"), false).unwrap();
        assert_eq!(outcome, WriteOutcome::Unchanged);
        assert_eq!(fs::read_to_string(&path).unwrap(), before);

        let mut changed = stamped("2024-06-01T00:00:00Z");
        changed.pack.prompts[0].text.push_str(" Neu.");
        let (_, outcome) = write_generated(&layout, "de", &changed, false).unwrap();
        assert_eq!(outcome, WriteOutcome::Updated);
        assert!(fs::read_to_string(&path).unwrap().contains("2024-06-01T00:00:00Z"));
    }

    #[test]
    fn failing_pack_is_not_written() {
        let tmp = setup_fixtures();
        let layout = Layout::new(tmp.path());
        let mut generated = generate(&work_template(), 42);
        generated.findings.push(Finding {
            rule: quality::Rule::TokenDensity,
            message: "too thin".to_string(),
        });
        let err = write_generated(&layout, "de", &generated, false).unwrap_err();
        assert!(err.to_string().contains("too thin"));
        assert!(!layout.entry_path("de", ContentKind::Pack, "work_a2_s42").exists());
    }

    #[test]
    fn batch_continues_after_failures() {
        let tmp = setup_fixtures();
        let layout = Layout::new(tmp.path());
        let plan: BatchPlan = serde_json::from_str(
            r#"{"workspace": "de", "items": [
                {"scenario": "work", "level": "A2", "seed": 1},
                {"scenario": "missing", "level": "A2", "seed": 1},
                {"scenario": "work", "level": "B1", "seed": 2, "id": "work_b1_intro"}
            ]}"#,
        )
        .unwrap();
        let results = run_batch(
            &layout,
            &plan,
            &PipelineConfig::default(),
            &work_tokens(),
            &BatchOptions {
                generated_at: Some("2024-05-01T00:00:00Z"),
                dry_run: false,
            },
        );
        assert_eq!(results.len(), 3);
        assert!(results[0].outcome.is_ok());
        assert!(matches!(
            results[1].outcome,
            Err(GenerateError::Template(TemplateError::Missing { .. }))
        ));
        let (id, path, _) = results[2].outcome.as_ref().unwrap();
        assert_eq!(id, "work_b1_intro");
        assert!(path.exists());
        assert!(layout.entry_path("de", ContentKind::Pack, "work_a2_s1").exists());
    }

    #[test]
    fn plan_rejects_unknown_keys() {
        let tmp = setup_fixtures();
        let path = tmp.path().join("plan.json");
        fs::write(&path, r#"{"workspace": "de", "items": [], "extra": 1}"#).unwrap();
        assert!(matches!(load_plan(&path), Err(GenerateError::Plan { .. })));
    }
}
