//! Content manifests and promotion.
//!
//! A manifest pins every published file of every workspace to its SHA-256:
//!
//! ```json
//! {
//!   "version": 1,
//!   "workspaces": [
//!     {
//!       "id": "de",
//!       "catalogPath": "v1/workspaces/de/catalog.json",
//!       "catalogSha256": "9f2c…",
//!       "files": { "v1/workspaces/de/packs/index.json": "41ab…", … }
//!     }
//!   ]
//! }
//! ```
//!
//! `files` holds every index page reachable from the catalog and every entry
//! those pages list. Paths are content-relative and double as object keys.
//! The manifest carries no timestamps, so rebuilding over an unchanged tree
//! yields identical bytes.
//!
//! `manifest` writes `content/meta/manifest.staging.json`; `promote` re-hashes
//! everything it names and, only if nothing drifted, copies it byte-for-byte
//! to `content/meta/manifest.json`.

use crate::index::{self, Catalog, IndexError};
use crate::naming::Layout;
use crate::scan::{self, ScanError};
use crate::types::render_json;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("workspace '{0}' has no catalog; run `packsmith index` first")]
    MissingCatalog(String),
    #[error("{0} is listed in an index page but does not exist")]
    MissingFile(String),
    #[error("no staging manifest at {0}")]
    NoStaging(PathBuf),
    #[error("staging manifest does not match disk ({} problem(s)): {}", .0.len(), .0.join("; "))]
    Drift(Vec<String>),
}

/// Which manifest a command reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Staging,
    Production,
}

impl Channel {
    pub fn path(&self, layout: &Layout) -> PathBuf {
        match self {
            Channel::Staging => layout.staging_manifest_path(),
            Channel::Production => layout.manifest_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestWorkspace {
    pub id: String,
    pub catalog_path: String,
    pub catalog_sha256: String,
    pub files: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentManifest {
    pub version: u32,
    pub workspaces: Vec<ManifestWorkspace>,
}

impl ContentManifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Every content-relative path the manifest names, catalogs included.
    pub fn paths(&self) -> Vec<&str> {
        self.workspaces
            .iter()
            .flat_map(|ws| {
                std::iter::once(ws.catalog_path.as_str()).chain(ws.files.keys().map(String::as_str))
            })
            .collect()
    }

    pub fn file_count(&self) -> usize {
        self.workspaces.iter().map(|ws| ws.files.len() + 1).sum()
    }
}

// ============================================================================
// Hashing
// ============================================================================

/// SHA-256 of a byte slice as lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// SHA-256 of a file's contents as lowercase hex.
pub fn hash_file(path: &Path) -> io::Result<String> {
    Ok(hash_bytes(&fs::read(path)?))
}

// ============================================================================
// Build
// ============================================================================

fn relative(layout: &Layout, path: &Path) -> String {
    layout
        .content_relative(path)
        .unwrap_or_else(|| path.display().to_string())
}

/// Manifest entry for one workspace, walking its catalog and page chains.
pub fn workspace_manifest(layout: &Layout, workspace: &str) -> Result<ManifestWorkspace, ManifestError> {
    let catalog_path = layout.catalog_path(workspace);
    if !catalog_path.is_file() {
        return Err(ManifestError::MissingCatalog(workspace.to_string()));
    }
    let catalog_bytes = fs::read(&catalog_path)?;
    let catalog: Catalog = serde_json::from_slice(&catalog_bytes)?;

    let ws_dir = layout.workspace_dir(workspace);
    let mut files = BTreeMap::new();
    for section in &catalog.sections {
        for (page_path, page) in index::read_chain(layout, workspace, section.kind)? {
            files.insert(relative(layout, &page_path), hash_file(&page_path)?);
            for item in &page.items {
                let entry_path = item
                    .entry_url
                    .split('/')
                    .fold(ws_dir.clone(), |acc, part| acc.join(part));
                let rel = relative(layout, &entry_path);
                if !entry_path.is_file() {
                    return Err(ManifestError::MissingFile(rel));
                }
                files.insert(rel, hash_file(&entry_path)?);
            }
        }
    }

    Ok(ManifestWorkspace {
        id: workspace.to_string(),
        catalog_path: relative(layout, &catalog_path),
        catalog_sha256: hash_bytes(&catalog_bytes),
        files,
    })
}

/// Manifest over the given workspaces, or every workspace when `only` is `None`.
pub fn build(layout: &Layout, only: Option<&str>) -> Result<ContentManifest, ManifestError> {
    let workspaces = match only {
        Some(ws) => vec![ws.to_string()],
        None => scan::list_workspaces(layout)?,
    };
    let workspaces = workspaces
        .iter()
        .map(|ws| workspace_manifest(layout, ws))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ContentManifest {
        version: MANIFEST_VERSION,
        workspaces,
    })
}

/// Write the manifest to the given channel. Returns the path and whether the
/// file changed.
pub fn write(
    layout: &Layout,
    channel: Channel,
    manifest: &ContentManifest,
) -> Result<(PathBuf, bool), ManifestError> {
    let path = channel.path(layout);
    let json = render_json(manifest)?;
    if fs::read_to_string(&path).ok().as_deref() == Some(json.as_str()) {
        return Ok((path, false));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, json)?;
    tracing::info!(path = %path.display(), files = manifest.file_count(), "manifest written");
    Ok((path, true))
}

// ============================================================================
// Verify and promote
// ============================================================================

/// Every file whose on-disk hash differs from the manifest, as messages.
pub fn verify(layout: &Layout, manifest: &ContentManifest) -> Vec<String> {
    let mut problems = Vec::new();
    let mut check = |rel: &str, expected: &str| {
        let path = layout.from_content_relative(rel);
        match hash_file(&path) {
            Ok(actual) if actual == expected => {}
            Ok(_) => problems.push(format!("{rel}: hash mismatch")),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                problems.push(format!("{rel}: missing"))
            }
            Err(e) => problems.push(format!("{rel}: {e}")),
        }
    };
    for ws in &manifest.workspaces {
        check(&ws.catalog_path, &ws.catalog_sha256);
        for (rel, sha) in &ws.files {
            check(rel, sha);
        }
    }
    problems
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromoteOutcome {
    pub workspaces: usize,
    pub files: usize,
    /// Production already held the same bytes.
    pub unchanged: bool,
}

/// Verify the staging manifest against disk and copy it to production.
///
/// Nothing is written if any file drifted.
pub fn promote(layout: &Layout) -> Result<PromoteOutcome, ManifestError> {
    let staging = layout.staging_manifest_path();
    if !staging.is_file() {
        return Err(ManifestError::NoStaging(staging));
    }
    let bytes = fs::read(&staging)?;
    let manifest: ContentManifest = serde_json::from_slice(&bytes)?;
    let problems = verify(layout, &manifest);
    if !problems.is_empty() {
        return Err(ManifestError::Drift(problems));
    }

    let production = layout.manifest_path();
    let unchanged = fs::read(&production).ok().as_deref() == Some(bytes.as_slice());
    if !unchanged {
        fs::write(&production, &bytes)?;
        tracing::info!(from = %staging.display(), to = %production.display(), "manifest promoted");
    }
    Ok(PromoteOutcome {
        workspaces: manifest.workspaces.len(),
        files: manifest.file_count(),
        unchanged,
    })
}
