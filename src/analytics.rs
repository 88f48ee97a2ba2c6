//! Derived pack metrics and the backfill pass that (re)writes them.
//!
//! Analytics are a pure function of a pack's prompts, its session plan, and
//! the scenario's token lists. Values are rounded to four decimals before
//! they are stored so the rendered JSON is stable.

use crate::quality::{self, GateContext};
use crate::scan::WorkspaceScan;
use crate::tokens::{contains_any, matched_tokens};
use crate::types::{Analytics, Entry, Pack, ReviewStatus, write_json};
use serde::Serialize;
use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;

pub const ANALYTICS_VERSION: u32 = 1;

/// Round to four decimals.
pub fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Share of prompts with at least two changed slots. 0 for an empty pack.
pub fn multi_slot_rate(pack: &Pack) -> f64 {
    if pack.prompts.is_empty() {
        return 0.0;
    }
    let multi = pack
        .prompts
        .iter()
        .filter(|p| p.slots_changed.len() >= 2)
        .count();
    multi as f64 / pack.prompts.len() as f64
}

/// Mean number of distinct scenario tokens matched per prompt.
pub fn token_density(pack: &Pack, tokens: &[String]) -> f64 {
    if pack.prompts.is_empty() {
        return 0.0;
    }
    let total: usize = pack
        .prompts
        .iter()
        .map(|p| matched_tokens(&p.text, tokens).len())
        .sum();
    total as f64 / pack.prompts.len() as f64
}

/// Share of session steps with at least one prompt carrying a required token.
///
/// 1.0 when there is nothing to require.
pub fn required_token_coverage(pack: &Pack, required: &[String]) -> f64 {
    let steps = &pack.session_plan.steps;
    if steps.is_empty() || required.iter().all(|t| t.is_empty()) {
        return 1.0;
    }
    let covered = steps
        .iter()
        .filter(|step| {
            step.prompt_ids
                .iter()
                .filter_map(|id| pack.prompt(id))
                .any(|p| contains_any(&p.text, required))
        })
        .count();
    covered as f64 / steps.len() as f64
}

/// Compute analytics. `passes_quality_gates` is left false; the caller sets
/// it from the content rules of [`crate::quality`].
pub fn compute(pack: &Pack, tokens: &[String], required: &[String]) -> Analytics {
    let roles: BTreeSet<&str> = pack
        .prompts
        .iter()
        .flat_map(|p| p.slots_changed.iter().map(String::as_str))
        .collect();
    Analytics {
        version: ANALYTICS_VERSION,
        prompt_count: pack.prompts.len(),
        step_count: pack.session_plan.steps.len(),
        multi_slot_rate: round4(multi_slot_rate(pack)),
        scenario_token_density: round4(token_density(pack, tokens)),
        required_token_coverage: round4(required_token_coverage(pack, required)),
        distinct_slot_roles: roles.len(),
        passes_quality_gates: false,
    }
}

/// Field-by-field differences between stored and recomputed analytics.
///
/// Counts must match exactly; rates within `tolerance`. `check_coverage` is
/// false when the scenario's required tokens are unknown.
pub fn mismatches(
    stored: &Analytics,
    fresh: &Analytics,
    tolerance: f64,
    check_coverage: bool,
) -> Vec<String> {
    let mut out = Vec::new();
    if stored.version != fresh.version {
        out.push(format!("version {} != {}", stored.version, fresh.version));
    }
    let counts = [
        ("promptCount", stored.prompt_count, fresh.prompt_count),
        ("stepCount", stored.step_count, fresh.step_count),
        (
            "distinctSlotRoles",
            stored.distinct_slot_roles,
            fresh.distinct_slot_roles,
        ),
    ];
    for (name, a, b) in counts {
        if a != b {
            out.push(format!("{name} {a} != {b}"));
        }
    }
    let mut rates = vec![
        ("multiSlotRate", stored.multi_slot_rate, fresh.multi_slot_rate),
        (
            "scenarioTokenDensity",
            stored.scenario_token_density,
            fresh.scenario_token_density,
        ),
    ];
    if check_coverage {
        rates.push((
            "requiredTokenCoverage",
            stored.required_token_coverage,
            fresh.required_token_coverage,
        ));
    }
    for (name, a, b) in rates {
        if (a - b).abs() > tolerance {
            out.push(format!("{name} {a} != {b}"));
        }
    }
    out
}

/// Packs the backfill pass may rewrite: generated and not yet approved.
pub fn is_backfill_candidate(pack: &Pack) -> bool {
    pack.is_generated() && pack.review.status != ReviewStatus::Approved
}

// ============================================================================
// Backfill
// ============================================================================

/// A pack whose stored analytics were missing or stale.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillChange {
    pub workspace: String,
    pub id: String,
    pub path: PathBuf,
    pub previous: Option<Analytics>,
    pub analytics: Analytics,
    /// Quality findings for the pack with the new analytics in place.
    pub remaining: Vec<String>,
    pub written: bool,
}

/// Fresh analytics for a pack, with `passes_quality_gates` taken from the
/// content rules.
pub fn recompute(pack: &Pack, ctx: &GateContext<'_>) -> Analytics {
    let required = ctx
        .required_tokens
        .get(&pack.scenario)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    let mut fresh = compute(pack, ctx.tokens.tokens_for(&pack.scenario), required);
    fresh.passes_quality_gates = quality::pack_content_failures(pack, ctx).is_empty();
    fresh
}

/// Recompute analytics for every backfill candidate whose stored block
/// differs, then re-run the quality rules on the result.
///
/// Approved and handcrafted packs are never touched. Files are only
/// rewritten when `write` is set.
pub fn backfill(
    scans: &[WorkspaceScan],
    ctx: &GateContext<'_>,
    write: bool,
) -> io::Result<Vec<BackfillChange>> {
    let mut changes = Vec::new();
    for scan in scans {
        for loaded in &scan.entries {
            let Entry::Pack(pack) = &loaded.entry else {
                continue;
            };
            if !is_backfill_candidate(pack) {
                continue;
            }
            let fresh = recompute(pack, ctx);
            if pack.analytics.as_ref() == Some(&fresh) {
                continue;
            }
            let mut updated = pack.clone();
            updated.analytics = Some(fresh.clone());
            let remaining: Vec<String> = quality::pack_failures(&updated, ctx)
                .into_iter()
                .map(|f| format!("[{}] {}", f.rule, f.message))
                .collect();
            if write {
                write_json(&loaded.path, &updated)?;
                tracing::info!(pack = %pack.id, path = %loaded.path.display(), "analytics backfilled");
            }
            changes.push(BackfillChange {
                workspace: scan.workspace.clone(),
                id: pack.id.clone(),
                path: loaded.path.clone(),
                previous: pack.analytics.clone(),
                analytics: fresh,
                remaining,
                written: write,
            });
        }
    }
    Ok(changes)
}
