//! CLI output formatting for every pipeline command.
//!
//! Output leads with what an entry *is* (id, title, level) and shows the file
//! it lives in as indented secondary context. Paths are printed relative to
//! the project root.
//!
//! # Output Format
//!
//! ## Generate
//!
//! ```text
//! work_a2_s42 At the office (A2) → created
//!     Path: content/v1/workspaces/de/packs/work_a2_s42/pack.json
//!     14 prompts in 3 steps, multi-slot 0.4286, density 1.2143
//! ```
//!
//! ## Validate
//!
//! ```text
//! de/pack work_a2_s42
//!     Path: content/v1/workspaces/de/packs/work_a2_s42/pack.json
//!     [token_density] scenario token density 0.80 is below 1.00
//!
//! Warnings
//! de/pack work_a2_s42: 14 prompt(s) missing gloss_en_i18n.fr
//!
//! Checked 12 entries: 11 passed, 1 failed (1 failure, 1 warning)
//! ```
//!
//! ## Duplicates
//!
//! ```text
//! "ich lese das protokoll im buero" (2 copies)
//!     de/pack work_a2_s42 prompt work_a2_s42-requests-03
//!     de/pack work_b1_s7 prompt work_b1_s7-requests-01
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::analytics::BackfillChange;
use crate::dedupe::DuplicateCluster;
use crate::generate::{BatchResult, WriteOutcome};
use crate::index::{RenderedFile, WriteSummary};
use crate::manifest::{ContentManifest, PromoteOutcome};
use crate::publish::PublishReport;
use crate::quality::QualityReport;
use crate::scan::LoadFailure;
use crate::tokens::PatchSummary;
use crate::types::{Pack, ReviewStatus};
use std::collections::BTreeMap;
use std::path::Path;

// ============================================================================
// Shared helpers
// ============================================================================

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `path` relative to `root` when it lives under it.
fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

fn plural(n: usize, one: &str, many: &str) -> String {
    format!("{n} {}", if n == 1 { one } else { many })
}

fn outcome_label(outcome: WriteOutcome) -> &'static str {
    match outcome {
        WriteOutcome::Created => "created",
        WriteOutcome::Updated => "updated",
        WriteOutcome::Unchanged => "unchanged",
        WriteOutcome::DryRun => "would write (dry run)",
    }
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{}", line);
    }
}

// ============================================================================
// Unreadable entries
// ============================================================================

/// Entry files a command had to leave out. Empty when there are none.
pub fn format_load_failures(failures: &[LoadFailure], root: &Path) -> Vec<String> {
    if failures.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![format!(
        "Skipped {}",
        plural(failures.len(), "unreadable entry", "unreadable entries")
    )];
    for f in failures {
        lines.push(format!(
            "{}{}/{} {}",
            indent(1),
            f.workspace,
            f.kind,
            relative(root, &f.path)
        ));
        lines.push(format!("{}{}", indent(2), f.message));
    }
    lines
}

pub fn print_load_failures(failures: &[LoadFailure], root: &Path) {
    print_lines(format_load_failures(failures, root));
}

// ============================================================================
// Generate
// ============================================================================

pub fn format_generated(
    pack: &Pack,
    path: &Path,
    outcome: WriteOutcome,
    root: &Path,
) -> Vec<String> {
    let mut lines = vec![
        format!(
            "{} {} → {}",
            pack.id,
            pack.display_title(),
            outcome_label(outcome)
        ),
        format!("{}Path: {}", indent(1), relative(root, path)),
    ];
    let mut detail = format!(
        "{} in {}",
        plural(pack.prompts.len(), "prompt", "prompts"),
        plural(pack.session_plan.steps.len(), "step", "steps")
    );
    if let Some(a) = &pack.analytics {
        detail.push_str(&format!(
            ", multi-slot {:.4}, density {:.4}",
            a.multi_slot_rate, a.scenario_token_density
        ));
    }
    lines.push(format!("{}{}", indent(1), detail));
    lines
}

pub fn print_generated(pack: &Pack, path: &Path, outcome: WriteOutcome, root: &Path) {
    print_lines(format_generated(pack, path, outcome, root));
}

pub fn format_batch(results: &[BatchResult], root: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    let mut failed = 0;
    for result in results {
        match &result.outcome {
            Ok((id, path, outcome)) => {
                lines.push(format!("{} → {} {}", result.label, id, outcome_label(*outcome)));
                lines.push(format!("{}Path: {}", indent(1), relative(root, path)));
            }
            Err(e) => {
                failed += 1;
                lines.push(format!("{} → FAILED", result.label));
                lines.push(format!("{}{}", indent(1), e));
            }
        }
    }
    lines.push(String::new());
    lines.push(format!(
        "Batch: {} ok, {} failed",
        results.len() - failed,
        failed
    ));
    lines
}

pub fn print_batch(results: &[BatchResult], root: &Path) {
    print_lines(format_batch(results, root));
}

// ============================================================================
// Validate
// ============================================================================

pub fn format_quality_report(report: &QualityReport, root: &Path) -> Vec<String> {
    let mut lines = Vec::new();

    // failures grouped by entry, in report order
    let mut current: Option<(&str, &str)> = None;
    for f in &report.failures {
        let key = (f.workspace.as_str(), f.path.as_str());
        if current != Some(key) {
            if current.is_some() {
                lines.push(String::new());
            }
            let who = match &f.entry_id {
                Some(id) => format!("{}/{} {}", f.workspace, f.kind, id),
                None => format!("{}/{} (unreadable)", f.workspace, f.kind),
            };
            lines.push(who);
            lines.push(format!("{}Path: {}", indent(1), relative(root, Path::new(&f.path))));
            current = Some(key);
        }
        lines.push(format!("{}[{}] {}", indent(1), f.rule, f.message));
    }

    if !report.warnings.is_empty() {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push("Warnings".to_string());
        for w in &report.warnings {
            lines.push(format!("{}/{} {}: {}", w.workspace, w.kind, w.entry_id, w.message));
        }
    }

    let passed = report.packs.iter().filter(|p| p.passed).count();
    let failed_entries = report.packs.len() - passed;
    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines.push(format!(
        "Checked {}: {} passed, {} failed ({}, {})",
        plural(report.packs.len(), "entry", "entries"),
        passed,
        failed_entries,
        plural(report.failures.len(), "failure", "failures"),
        plural(report.warnings.len(), "warning", "warnings"),
    ));
    lines
}

pub fn print_quality_report(report: &QualityReport, root: &Path) {
    print_lines(format_quality_report(report, root));
}

// ============================================================================
// Duplicates
// ============================================================================

pub fn format_duplicates(clusters: &[DuplicateCluster]) -> Vec<String> {
    let mut lines = Vec::new();
    for cluster in clusters {
        lines.push(format!(
            "\"{}\" ({} copies)",
            cluster.key,
            cluster.occurrences.len()
        ));
        for o in &cluster.occurrences {
            let item = match o.kind {
                crate::types::ContentKind::Pack => "prompt",
                _ => "exercise",
            };
            lines.push(format!(
                "{}{}/{} {} {} {}",
                indent(1),
                o.workspace,
                o.kind,
                o.entry_id,
                item,
                o.item_id
            ));
        }
    }
    if clusters.is_empty() {
        lines.push("No duplicates found".to_string());
    } else {
        lines.push(String::new());
        lines.push(format!(
            "Found {}",
            plural(clusters.len(), "duplicate cluster", "duplicate clusters")
        ));
    }
    lines
}

pub fn print_duplicates(clusters: &[DuplicateCluster]) {
    print_lines(format_duplicates(clusters));
}

// ============================================================================
// Analytics backfill
// ============================================================================

pub fn format_backfill(changes: &[BackfillChange], root: &Path, write: bool) -> Vec<String> {
    let mut lines = Vec::new();
    for c in changes {
        let state = if c.previous.is_some() { "stale" } else { "missing" };
        lines.push(format!("{}/pack {} ({} analytics)", c.workspace, c.id, state));
        lines.push(format!("{}Path: {}", indent(1), relative(root, &c.path)));
        lines.push(format!(
            "{}multi-slot {:.4}, density {:.4}, coverage {:.4}, gates {}",
            indent(1),
            c.analytics.multi_slot_rate,
            c.analytics.scenario_token_density,
            c.analytics.required_token_coverage,
            if c.analytics.passes_quality_gates { "pass" } else { "fail" }
        ));
        for problem in &c.remaining {
            lines.push(format!("{}still failing: {}", indent(1), problem));
        }
    }
    if !lines.is_empty() {
        lines.push(String::new());
    }
    let verb = if write { "Backfilled" } else { "Would backfill" };
    lines.push(format!("{} {}", verb, plural(changes.len(), "pack", "packs")));
    if !write && !changes.is_empty() {
        lines.push("Re-run with --write to apply".to_string());
    }
    lines
}

pub fn print_backfill(changes: &[BackfillChange], root: &Path, write: bool) {
    print_lines(format_backfill(changes, root, write));
}

// ============================================================================
// Review
// ============================================================================

pub fn format_review(id: &str, from: ReviewStatus, to: ReviewStatus, path: &Path, root: &Path) -> Vec<String> {
    vec![
        format!("{}: {} → {}", id, from, to),
        format!("{}Path: {}", indent(1), relative(root, path)),
    ]
}

pub fn print_review(id: &str, from: ReviewStatus, to: ReviewStatus, path: &Path, root: &Path) {
    print_lines(format_review(id, from, to, path, root));
}

// ============================================================================
// Index and bundles
// ============================================================================

pub fn format_write_summary(label: &str, summary: &WriteSummary, root: &Path) -> Vec<String> {
    let mut lines = vec![label.to_string()];
    for path in &summary.written {
        lines.push(format!("{}wrote {}", indent(1), relative(root, path)));
    }
    for path in &summary.removed {
        lines.push(format!("{}removed {}", indent(1), relative(root, path)));
    }
    lines.push(format!(
        "{}{} written, {} unchanged, {} removed",
        indent(1),
        summary.written.len(),
        summary.unchanged,
        summary.removed.len()
    ));
    lines
}

pub fn print_write_summary(label: &str, summary: &WriteSummary, root: &Path) {
    print_lines(format_write_summary(label, summary, root));
}

pub fn format_drift(label: &str, drift: &[std::path::PathBuf], root: &Path) -> Vec<String> {
    if drift.is_empty() {
        return vec![format!("{}: up to date", label)];
    }
    let mut lines = vec![format!("{}: {} out of date", label, plural(drift.len(), "file", "files"))];
    for path in drift {
        lines.push(format!("{}{}", indent(1), relative(root, path)));
    }
    lines
}

pub fn print_drift(label: &str, drift: &[std::path::PathBuf], root: &Path) {
    print_lines(format_drift(label, drift, root));
}

pub fn format_bundle(id: &str, files: &[RenderedFile], summary: &WriteSummary, root: &Path) -> Vec<String> {
    let mut lines = vec![format!("Bundle {}", id)];
    for file in files {
        let state = if summary.written.contains(&file.path) { "wrote" } else { "unchanged" };
        lines.push(format!("{}{} {}", indent(1), state, relative(root, &file.path)));
    }
    lines
}

pub fn print_bundle(id: &str, files: &[RenderedFile], summary: &WriteSummary, root: &Path) {
    print_lines(format_bundle(id, files, summary, root));
}

// ============================================================================
// Manifest, promote, publish
// ============================================================================

pub fn format_manifest(manifest: &ContentManifest, path: &Path, changed: bool, root: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    for ws in &manifest.workspaces {
        lines.push(format!(
            "{} ({} + catalog)",
            ws.id,
            plural(ws.files.len(), "file", "files")
        ));
        lines.push(format!("{}Catalog: {}", indent(1), ws.catalog_path));
        lines.push(format!("{}sha256 {}", indent(1), ws.catalog_sha256));
    }
    lines.push(String::new());
    lines.push(format!(
        "{} {}",
        if changed { "Wrote" } else { "Unchanged" },
        relative(root, path)
    ));
    lines
}

pub fn print_manifest(manifest: &ContentManifest, path: &Path, changed: bool, root: &Path) {
    print_lines(format_manifest(manifest, path, changed, root));
}

pub fn format_promote(outcome: &PromoteOutcome) -> Vec<String> {
    let what = format!(
        "{}, {}",
        plural(outcome.workspaces, "workspace", "workspaces"),
        plural(outcome.files, "file", "files")
    );
    if outcome.unchanged {
        vec![format!("Production manifest already current ({})", what)]
    } else {
        vec![format!("Promoted staging → production ({})", what)]
    }
}

pub fn print_promote(outcome: &PromoteOutcome) {
    print_lines(format_promote(outcome));
}

pub fn format_publish(report: &PublishReport, root: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    let target = if report.bucket.is_empty() {
        "<bucket not configured>".to_string()
    } else {
        format!("s3://{}", report.bucket)
    };
    if report.dry_run {
        lines.push(format!("Publish plan for {} (dry run)", target));
        for u in &report.planned {
            lines.push(format!("{}{:<8} {}", indent(1), u.category.as_str(), u.key));
            lines.push(format!(
                "{}from {}, Cache-Control: {}",
                indent(2),
                relative(root, &u.source),
                u.cache_control
            ));
        }
        lines.push(String::new());
        lines.push(format!("{} planned", plural(report.planned.len(), "upload", "uploads")));
        return lines;
    }

    lines.push(format!("Published to {}", target));
    let mut by_category: BTreeMap<&str, usize> = BTreeMap::new();
    let mut retried = 0;
    for u in &report.uploaded {
        *by_category.entry(u.category.as_str()).or_default() += 1;
        if u.attempts > 1 {
            retried += 1;
        }
    }
    for (category, n) in by_category {
        lines.push(format!("{}{:<8} {}", indent(1), category, n));
    }
    lines.push(format!(
        "{} uploaded, {} needed retries",
        plural(report.uploaded.len(), "file", "files"),
        retried
    ));
    lines
}

pub fn print_publish(report: &PublishReport, root: &Path) {
    print_lines(format_publish(report, root));
}

// ============================================================================
// Tokens
// ============================================================================

pub fn format_token_patch(summary: &PatchSummary, path: &Path, write: bool, root: &Path) -> Vec<String> {
    if summary.is_empty() {
        return vec!["Token dictionary unchanged".to_string()];
    }
    let mut lines = Vec::new();
    let scenarios: std::collections::BTreeSet<&String> =
        summary.added.keys().chain(summary.removed.keys()).collect();
    for scenario in scenarios {
        lines.push(scenario.to_string());
        for t in summary.added.get(scenario).into_iter().flatten() {
            lines.push(format!("{}+ {}", indent(1), t));
        }
        for t in summary.removed.get(scenario).into_iter().flatten() {
            lines.push(format!("{}- {}", indent(1), t));
        }
    }
    lines.push(String::new());
    lines.push(if write {
        format!("Wrote {}", relative(root, path))
    } else {
        "Dry run; re-run with --write to apply".to_string()
    });
    lines
}

pub fn print_token_patch(summary: &PatchSummary, path: &Path, write: bool, root: &Path) {
    print_lines(format_token_patch(summary, path, write, root));
}

// ============================================================================
// Tests
// ============================================================================
