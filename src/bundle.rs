//! Curriculum bundles.
//!
//! A bundle definition in `content/meta/bundles/{id}.json` selects approved
//! entries from one workspace and orders them:
//!
//! ```json
//! {
//!   "id": "a2-work",
//!   "title": "A2 at work",
//!   "description": "Everything approved for **A2** learners …",
//!   "workspace": "de",
//!   "filter": { "kinds": ["pack", "drill"], "levels": ["A2"] },
//!   "sort": [{ "field": "kind" }, { "field": "title", "descending": false }],
//!   "limit": 20
//! }
//! ```
//!
//! Empty filter lists match everything. Sort keys apply in order and the id
//! breaks any remaining tie. The bundle is materialized under
//! `exports/bundles/{id}/` as:
//!
//! - `bundle.json`: the selection, machine readable
//! - `README.md`: markdown table of the items
//! - `index.html`: standalone page, description rendered from markdown
//! - `manifest.json`: content path and SHA-256 of every item, plus hashes of
//!   the three files above
//!
//! Nothing time-dependent goes into any of them. Raw HTML in a description
//! is escaped, not passed through.

use crate::index::{self, IndexError, RenderedFile, WriteSummary};
use crate::manifest::{hash_bytes, hash_file};
use crate::naming::{self, Layout};
use crate::scan::{self, LoadFailure, LoadedEntry, ScanError, WorkspaceScan};
use crate::types::{ContentKind, EntrySummary, Level, Register, render_json};
use maud::{DOCTYPE, Markup, PreEscaped, html};
use pulldown_cmark::{Event, Parser, html as md_html};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

pub const BUNDLE_VERSION: u32 = 1;

const CSS: &str = include_str!("../static/bundle.css");

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("bundle '{id}' not found at {path}")]
    NotFound { id: String, path: PathBuf },
    #[error("bundle '{id}': {message}")]
    Invalid { id: String, message: String },
}

// ============================================================================
// Definition
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct BundleFilter {
    pub kinds: Vec<ContentKind>,
    pub levels: Vec<Level>,
    pub scenarios: Vec<String>,
    pub registers: Vec<Register>,
    pub primary_structures: Vec<String>,
}

impl BundleFilter {
    pub fn matches(&self, s: &EntrySummary) -> bool {
        fn allows<T: PartialEq>(list: &[T], value: &T) -> bool {
            list.is_empty() || list.contains(value)
        }
        allows(&self.kinds, &s.kind)
            && allows(&self.levels, &s.level)
            && allows(&self.registers, &s.register)
            && allows(&self.primary_structures, &s.primary_structure)
            && (self.scenarios.is_empty()
                || s.scenario.as_ref().is_some_and(|sc| self.scenarios.contains(sc)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    Level,
    Scenario,
    Title,
    Id,
    Kind,
    ItemCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortKey {
    pub field: SortField,
    #[serde(default)]
    pub descending: bool,
}

impl SortKey {
    fn compare(&self, a: &BundleItem, b: &BundleItem) -> Ordering {
        let ord = match self.field {
            SortField::Level => a.level.cmp(&b.level),
            SortField::Scenario => a.scenario.cmp(&b.scenario),
            SortField::Title => a.title.cmp(&b.title),
            SortField::Id => a.id.cmp(&b.id),
            SortField::Kind => a.kind.cmp(&b.kind),
            SortField::ItemCount => a.item_count.cmp(&b.item_count),
        };
        if self.descending { ord.reverse() } else { ord }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BundleDefinition {
    pub id: String,
    pub title: String,
    /// Markdown.
    #[serde(default)]
    pub description: String,
    pub workspace: String,
    #[serde(default)]
    pub filter: BundleFilter,
    #[serde(default)]
    pub sort: Vec<SortKey>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl BundleDefinition {
    fn invalid(&self, message: impl Into<String>) -> BundleError {
        BundleError::Invalid {
            id: self.id.clone(),
            message: message.into(),
        }
    }

    pub fn validate(&self) -> Result<(), BundleError> {
        if !naming::is_valid_id(&self.id) {
            return Err(self.invalid("id must match [a-z0-9_-]+"));
        }
        if self.title.trim().is_empty() {
            return Err(self.invalid("title is empty"));
        }
        if self.workspace.trim().is_empty() {
            return Err(self.invalid("workspace is empty"));
        }
        Ok(())
    }
}

/// Load and validate `content/meta/bundles/{id}.json`.
pub fn load_definition(layout: &Layout, id: &str) -> Result<BundleDefinition, BundleError> {
    let path = layout.bundle_definition_path(id);
    if !path.is_file() {
        return Err(BundleError::NotFound {
            id: id.to_string(),
            path,
        });
    }
    let def: BundleDefinition = serde_json::from_str(&fs::read_to_string(&path)?)?;
    if def.id != id {
        return Err(def.invalid(format!("file is named '{id}.json'")));
    }
    def.validate()?;
    Ok(def)
}

/// Ids of every bundle definition, sorted.
pub fn list_definitions(layout: &Layout) -> Result<Vec<String>, BundleError> {
    let dir = layout.bundle_definitions_dir();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "json")
            && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
        {
            ids.push(stem.to_string());
        }
    }
    ids.sort();
    Ok(ids)
}

// ============================================================================
// Selection
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleItem {
    pub id: String,
    pub kind: ContentKind,
    pub title: String,
    pub level: Level,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    pub register: Register,
    pub primary_structure: String,
    pub item_count: usize,
    /// Content-relative path of the entry document.
    pub path: String,
}

impl BundleItem {
    fn new(layout: &Layout, loaded: &LoadedEntry) -> Self {
        let s = loaded.entry.summary();
        Self {
            path: layout
                .content_relative(&loaded.path)
                .unwrap_or_else(|| loaded.path.display().to_string()),
            id: s.id,
            kind: s.kind,
            title: s.title,
            level: s.level,
            scenario: s.scenario,
            register: s.register,
            primary_structure: s.primary_structure,
            item_count: s.item_count,
        }
    }
}

/// Approved entries matching the filter, sorted and limited.
pub fn select(layout: &Layout, def: &BundleDefinition, scan: &WorkspaceScan) -> Vec<BundleItem> {
    let mut items: Vec<BundleItem> = scan
        .entries
        .iter()
        .filter(|e| e.entry.is_approved() && def.filter.matches(&e.entry.summary()))
        .map(|e| BundleItem::new(layout, e))
        .collect();
    items.sort_by(|a, b| {
        def.sort
            .iter()
            .map(|key| key.compare(a, b))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
            .then_with(|| a.kind.cmp(&b.kind))
    });
    if let Some(limit) = def.limit {
        items.truncate(limit);
    }
    items
}

// ============================================================================
// Rendering
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub version: u32,
    pub id: String,
    pub title: String,
    pub description: String,
    pub workspace: String,
    pub item_count: usize,
    pub items: Vec<BundleItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestItem {
    pub id: String,
    pub kind: ContentKind,
    pub path: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub version: u32,
    pub bundle: String,
    pub items: Vec<ManifestItem>,
    /// Sibling file name → SHA-256.
    pub files: BTreeMap<String, String>,
}

/// Markdown to HTML with any raw HTML in the source rendered as text.
fn markdown_to_html(markdown: &str) -> String {
    let parser = Parser::new(markdown).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });
    let mut out = String::new();
    md_html::push_html(&mut out, parser);
    out
}

fn table_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

pub fn render_readme(bundle: &Bundle) -> String {
    let mut md = format!("# {}\n\n", bundle.title);
    if !bundle.description.trim().is_empty() {
        md.push_str(bundle.description.trim_end());
        md.push_str("\n\n");
    }
    md.push_str(&format!(
        "{} item(s) from workspace `{}`.\n",
        bundle.item_count, bundle.workspace
    ));
    if bundle.items.is_empty() {
        return md;
    }
    md.push_str("\n| Kind | Level | Title | Scenario | Items | Path |\n");
    md.push_str("|------|-------|-------|----------|------:|------|\n");
    for item in &bundle.items {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | `{}` |\n",
            item.kind,
            item.level,
            table_cell(&item.title),
            table_cell(item.scenario.as_deref().unwrap_or("-")),
            item.item_count,
            item.path
        ));
    }
    md
}

fn base_document(title: &str, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (title) }
                style { (PreEscaped(CSS)) }
            }
            body {
                (content)
            }
        }
    }
}

pub fn render_html(bundle: &Bundle) -> String {
    let description = markdown_to_html(&bundle.description);
    let content = html! {
        main {
            header.bundle-header {
                h1 { (bundle.title) }
                p.bundle-meta {
                    (bundle.item_count) " item(s) · workspace " code { (bundle.workspace) }
                }
            }
            @if !bundle.description.trim().is_empty() {
                section.bundle-description {
                    (PreEscaped(description))
                }
            }
            @if bundle.items.is_empty() {
                p.empty { "No approved entries match this bundle." }
            } @else {
                table.bundle-items {
                    thead {
                        tr {
                            th { "Kind" }
                            th { "Level" }
                            th { "Title" }
                            th { "Scenario" }
                            th { "Items" }
                        }
                    }
                    tbody {
                        @for item in &bundle.items {
                            tr {
                                td { (item.kind) }
                                td { (item.level) }
                                td {
                                    a href=(format!("../../../content/{}", item.path)) { (item.title) }
                                }
                                td { (item.scenario.as_deref().unwrap_or("–")) }
                                td.count { (item.item_count) }
                            }
                        }
                    }
                }
            }
        }
    };
    base_document(&bundle.title, content).into_string()
}

/// Every output file of the bundle, rendered.
pub fn render(
    layout: &Layout,
    def: &BundleDefinition,
    scan: &WorkspaceScan,
) -> Result<Vec<RenderedFile>, BundleError> {
    let items = select(layout, def, scan);
    let bundle = Bundle {
        version: BUNDLE_VERSION,
        id: def.id.clone(),
        title: def.title.clone(),
        description: def.description.clone(),
        workspace: def.workspace.clone(),
        item_count: items.len(),
        items,
    };

    let out_dir = layout.bundle_output_dir(&def.id);
    let mut outputs = vec![
        ("bundle.json", render_json(&bundle)?),
        ("README.md", render_readme(&bundle)),
        ("index.html", render_html(&bundle)),
    ];

    let mut manifest_items = Vec::with_capacity(bundle.items.len());
    for item in &bundle.items {
        manifest_items.push(ManifestItem {
            id: item.id.clone(),
            kind: item.kind,
            path: item.path.clone(),
            sha256: hash_file(&layout.from_content_relative(&item.path))?,
        });
    }
    let manifest = BundleManifest {
        version: BUNDLE_VERSION,
        bundle: def.id.clone(),
        items: manifest_items,
        files: outputs
            .iter()
            .map(|(name, contents)| (name.to_string(), hash_bytes(contents.as_bytes())))
            .collect(),
    };
    outputs.push(("manifest.json", render_json(&manifest)?));

    Ok(outputs
        .into_iter()
        .map(|(name, contents)| RenderedFile {
            path: out_dir.join(name),
            contents,
        })
        .collect())
}

/// A written bundle and the workspace entries it could not consider.
#[derive(Debug, Clone)]
pub struct BundleBuild {
    pub files: Vec<RenderedFile>,
    pub summary: WriteSummary,
    /// Unreadable entry files of the bundle's workspace; they are left out
    /// of the selection.
    pub failures: Vec<LoadFailure>,
}

/// Load, select, render and write one bundle.
pub fn build(layout: &Layout, id: &str) -> Result<BundleBuild, BundleError> {
    let def = load_definition(layout, id)?;
    let scan = scan::scan_workspace(layout, &def.workspace)?;
    let files = render(layout, &def, &scan)?;
    let summary = index::write_files(&files, &[])?;
    tracing::info!(
        bundle = %def.id,
        written = summary.written.len(),
        unchanged = summary.unchanged,
        skipped = scan.failures.len(),
        "bundle built"
    );
    Ok(BundleBuild {
        files,
        summary,
        failures: scan.failures,
    })
}
