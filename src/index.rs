//! Paginated section indexes and the workspace catalog.
//!
//! Both are derived rollups of the approved packs and drills in a workspace
//! and are always regenerable byte-for-byte from them:
//!
//! ```text
//! content/v1/workspaces/de/
//! ├── catalog.json              # points at each section's first page
//! ├── packs/index.json          # page 1
//! ├── packs/index.page2.json    # page 2, …
//! └── drills/index.json
//! ```
//!
//! Items are ordered by `(level, scenario, title, id)`. Each page names the
//! next one in `nextPage` (relative to the section directory) and the last
//! page carries `null`. An empty section still gets an empty `index.json`.

use crate::naming::{self, Layout};
use crate::scan::WorkspaceScan;
use crate::types::{ContentKind, EntrySummary, Level, Register, render_json};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const INDEX_VERSION: u32 = 1;

/// Sections that get an index.
pub const INDEXED_KINDS: [ContentKind; 2] = [ContentKind::Pack, ContentKind::Drill];

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("index chain revisits {0}")]
    Cycle(PathBuf),
    #[error("index page {0} is missing")]
    MissingPage(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexItem {
    pub id: String,
    pub kind: ContentKind,
    pub title: String,
    pub level: Level,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    pub register: Register,
    pub primary_structure: String,
    pub item_count: usize,
    /// Entry document, relative to the workspace directory.
    pub entry_url: String,
}

impl IndexItem {
    pub fn from_summary(summary: EntrySummary) -> Self {
        let entry_url = format!(
            "{}/{}/{}",
            summary.kind.section(),
            summary.id,
            summary.kind.file_name()
        );
        Self {
            id: summary.id,
            kind: summary.kind,
            title: summary.title,
            level: summary.level,
            scenario: summary.scenario,
            register: summary.register,
            primary_structure: summary.primary_structure,
            item_count: summary.item_count,
            entry_url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexPage {
    pub version: u32,
    pub workspace: String,
    pub section: String,
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
    pub items: Vec<IndexItem>,
    pub next_page: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSection {
    pub id: String,
    pub kind: ContentKind,
    /// First index page, relative to the workspace directory.
    pub first_page: String,
    pub total_items: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub version: u32,
    pub workspace: String,
    pub sections: Vec<CatalogSection>,
}

/// A derived file and its exact contents.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFile {
    pub path: PathBuf,
    pub contents: String,
}

/// Approved entries of one kind in index order.
pub fn sorted_items(scan: &WorkspaceScan, kind: ContentKind) -> Vec<IndexItem> {
    let mut items: Vec<IndexItem> = scan
        .of_kind(kind)
        .filter(|e| e.entry.is_approved())
        .map(|e| IndexItem::from_summary(e.entry.summary()))
        .collect();
    items.sort_by(|a, b| {
        (a.level, &a.scenario, &a.title, &a.id).cmp(&(b.level, &b.scenario, &b.title, &b.id))
    });
    items
}

/// Split items into pages. Always returns at least one page.
pub fn paginate(
    workspace: &str,
    kind: ContentKind,
    items: Vec<IndexItem>,
    page_size: usize,
) -> Vec<IndexPage> {
    let page_size = page_size.max(1);
    let total_items = items.len();
    let total_pages = total_items.div_ceil(page_size).max(1);
    let mut chunks: Vec<Vec<IndexItem>> = items.chunks(page_size).map(<[_]>::to_vec).collect();
    if chunks.is_empty() {
        chunks.push(Vec::new());
    }
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, items)| {
            let page = i + 1;
            IndexPage {
                version: INDEX_VERSION,
                workspace: workspace.to_string(),
                section: kind.section().to_string(),
                page,
                page_size,
                total_items,
                total_pages,
                items,
                next_page: (page < total_pages).then(|| naming::index_page_file_name(page + 1)),
            }
        })
        .collect()
}

/// Every index page and the catalog of one workspace, rendered.
pub fn render_workspace(
    layout: &Layout,
    scan: &WorkspaceScan,
    page_size: usize,
) -> Result<Vec<RenderedFile>, IndexError> {
    let ws = scan.workspace.as_str();
    let mut files = Vec::new();
    let mut sections = Vec::new();
    for kind in INDEXED_KINDS {
        let pages = paginate(ws, kind, sorted_items(scan, kind), page_size);
        let first = &pages[0];
        sections.push(CatalogSection {
            id: kind.section().to_string(),
            kind,
            first_page: format!("{}/{}", kind.section(), naming::index_page_file_name(1)),
            total_items: first.total_items,
            total_pages: first.total_pages,
        });
        for page in &pages {
            files.push(RenderedFile {
                path: layout.index_page_path(ws, kind, page.page),
                contents: render_json(page)?,
            });
        }
    }
    let catalog = Catalog {
        version: INDEX_VERSION,
        workspace: ws.to_string(),
        sections,
    };
    files.push(RenderedFile {
        path: layout.catalog_path(ws),
        contents: render_json(&catalog)?,
    });
    Ok(files)
}

/// Index pages on disk that are not part of `files`.
pub fn stale_pages(
    layout: &Layout,
    workspace: &str,
    files: &[RenderedFile],
) -> Result<Vec<PathBuf>, IndexError> {
    let wanted: HashSet<&Path> = files.iter().map(|f| f.path.as_path()).collect();
    let mut stale = Vec::new();
    for kind in INDEXED_KINDS {
        let dir = layout.section_dir(workspace, kind);
        if !dir.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_page = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(naming::parse_index_page_name)
                .is_some();
            if is_page && path.is_file() && !wanted.contains(path.as_path()) {
                stale.push(path);
            }
        }
    }
    stale.sort();
    Ok(stale)
}

/// What `write_files` did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteSummary {
    pub written: Vec<PathBuf>,
    pub unchanged: usize,
    pub removed: Vec<PathBuf>,
}

/// Write changed files and remove stale pages.
pub fn write_files(files: &[RenderedFile], stale: &[PathBuf]) -> Result<WriteSummary, IndexError> {
    let mut summary = WriteSummary::default();
    for file in files {
        if fs::read_to_string(&file.path).ok().as_deref() == Some(file.contents.as_str()) {
            summary.unchanged += 1;
            continue;
        }
        if let Some(parent) = file.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&file.path, &file.contents)?;
        summary.written.push(file.path.clone());
    }
    for path in stale {
        fs::remove_file(path)?;
        summary.removed.push(path.clone());
    }
    Ok(summary)
}

/// Files whose on-disk bytes differ from the rendering, plus stale pages.
pub fn check_files(files: &[RenderedFile], stale: &[PathBuf]) -> Vec<PathBuf> {
    let mut drift: Vec<PathBuf> = files
        .iter()
        .filter(|f| fs::read_to_string(&f.path).ok().as_deref() != Some(f.contents.as_str()))
        .map(|f| f.path.clone())
        .collect();
    drift.extend(stale.iter().cloned());
    drift
}

/// Follow `nextPage` from a section's first page, returning every page in order.
pub fn read_chain(
    layout: &Layout,
    workspace: &str,
    kind: ContentKind,
) -> Result<Vec<(PathBuf, IndexPage)>, IndexError> {
    let dir = layout.section_dir(workspace, kind);
    let mut pages = Vec::new();
    let mut visited = HashSet::new();
    let mut next = Some(naming::index_page_file_name(1));
    while let Some(name) = next {
        let path = dir.join(&name);
        if !visited.insert(path.clone()) {
            return Err(IndexError::Cycle(path));
        }
        if !path.is_file() {
            return Err(IndexError::MissingPage(path));
        }
        let page: IndexPage = serde_json::from_str(&fs::read_to_string(&path)?)?;
        next = page.next_page.clone();
        pages.push((path, page));
    }
    Ok(pages)
}

/// Item ids along a section's page chain.
pub fn walk_chain(
    layout: &Layout,
    workspace: &str,
    kind: ContentKind,
) -> Result<Vec<String>, IndexError> {
    Ok(read_chain(layout, workspace, kind)?
        .into_iter()
        .flat_map(|(_, page)| page.items.into_iter().map(|i| i.id))
        .collect())
}
