//! Workspace scanning.
//!
//! Every read-side stage (validate, duplicates, index, bundle, manifest)
//! starts here. A workspace is a directory under `content/v1/workspaces/`;
//! each section holds one directory per entry:
//!
//! ```text
//! content/v1/workspaces/de/
//! ├── config.toml                  # optional overrides
//! ├── catalog.json                 # derived, ignored by the scanner
//! ├── packs/
//! │   ├── index.json               # derived, ignored by the scanner
//! │   ├── work_a2_s42/pack.json
//! │   └── restaurant_a1/pack.json
//! ├── drills/
//! │   └── dative/drill.json
//! └── exams/
//!     └── mock_b1/exam.json
//! ```
//!
//! Entries that cannot be read or parsed do not abort the scan. They are
//! collected as [`LoadFailure`]s so the caller can report every bad file and
//! still exit non-zero at the end.

use crate::naming::{Layout, is_valid_id};
use crate::types::{ContentKind, Entry};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(PathBuf),
}

/// A parsed entry and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedEntry {
    pub workspace: String,
    pub path: PathBuf,
    pub entry: Entry,
}

/// An entry file that could not be used.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadFailure {
    pub workspace: String,
    pub path: PathBuf,
    pub kind: ContentKind,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct WorkspaceScan {
    pub workspace: String,
    pub dir: PathBuf,
    /// Sorted by (kind, id).
    pub entries: Vec<LoadedEntry>,
    /// Sorted by path.
    pub failures: Vec<LoadFailure>,
}

impl WorkspaceScan {
    pub fn of_kind(&self, kind: ContentKind) -> impl Iterator<Item = &LoadedEntry> {
        self.entries.iter().filter(move |e| e.entry.kind() == kind)
    }

    pub fn find(&self, kind: ContentKind, id: &str) -> Option<&LoadedEntry> {
        self.of_kind(kind).find(|e| e.entry.id() == id)
    }
}

/// Workspace directory names, sorted.
pub fn list_workspaces(layout: &Layout) -> Result<Vec<String>, ScanError> {
    let dir = layout.workspaces_dir();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Load every entry document in one workspace.
pub fn scan_workspace(layout: &Layout, workspace: &str) -> Result<WorkspaceScan, ScanError> {
    let dir = layout.workspace_dir(workspace);
    if !dir.is_dir() {
        return Err(ScanError::WorkspaceNotFound(dir));
    }

    let mut candidates: Vec<(ContentKind, PathBuf)> = Vec::new();
    for kind in ContentKind::ALL {
        let section = layout.section_dir(workspace, kind);
        if !section.is_dir() {
            continue;
        }
        for item in WalkDir::new(&section).min_depth(2).max_depth(2) {
            let item = item?;
            if item.file_type().is_file() && item.file_name() == kind.file_name() {
                candidates.push((kind, item.into_path()));
            }
        }
    }

    let loaded: Vec<Result<LoadedEntry, LoadFailure>> = candidates
        .par_iter()
        .map(|(kind, path)| {
            load_entry(*kind, path)
                .map(|entry| LoadedEntry {
                    workspace: workspace.to_string(),
                    path: path.clone(),
                    entry,
                })
                .map_err(|message| LoadFailure {
                    workspace: workspace.to_string(),
                    path: path.clone(),
                    kind: *kind,
                    message,
                })
        })
        .collect();

    let mut entries = Vec::new();
    let mut failures = Vec::new();
    for result in loaded {
        match result {
            Ok(entry) => entries.push(entry),
            Err(failure) => {
                tracing::warn!(path = %failure.path.display(), "{}", failure.message);
                failures.push(failure);
            }
        }
    }
    entries.sort_by(|a, b| {
        (a.entry.kind(), a.entry.id()).cmp(&(b.entry.kind(), b.entry.id()))
    });
    failures.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!(
        workspace,
        entries = entries.len(),
        failures = failures.len(),
        "scanned workspace"
    );

    Ok(WorkspaceScan {
        workspace: workspace.to_string(),
        dir,
        entries,
        failures,
    })
}

/// Scan one named workspace, or every workspace when `only` is `None`.
pub fn scan_selected(layout: &Layout, only: Option<&str>) -> Result<Vec<WorkspaceScan>, ScanError> {
    match only {
        Some(ws) => Ok(vec![scan_workspace(layout, ws)?]),
        None => list_workspaces(layout)?
            .iter()
            .map(|ws| scan_workspace(layout, ws))
            .collect(),
    }
}

/// Read and parse one entry, checking that its id matches its directory.
pub fn load_entry(kind: ContentKind, path: &Path) -> Result<Entry, String> {
    let json = fs::read_to_string(path).map_err(|e| format!("cannot read: {e}"))?;
    let entry = Entry::parse(kind, &json).map_err(|e| format!("invalid {kind} JSON: {e}"))?;
    let dir_name = path
        .parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if entry.id() != dir_name {
        return Err(format!(
            "id '{}' does not match directory '{dir_name}'",
            entry.id()
        ));
    }
    if !is_valid_id(entry.id()) {
        return Err(format!("id '{}' is not a valid entry id", entry.id()));
    }
    Ok(entry)
}
