//! Content layout and naming conventions.
//!
//! Every tool reads and writes the same tree, so all path construction lives
//! here:
//!
//! ```text
//! <root>/
//! ├── packsmith.toml
//! ├── content/
//! │   ├── meta/
//! │   │   ├── manifest.json              # production pointer
//! │   │   ├── manifest.staging.json      # staging pointer
//! │   │   ├── scenario-tokens.json       # per-scenario token dictionaries
//! │   │   └── bundles/{bundle}.json      # bundle definitions
//! │   ├── templates/v1/scenarios/{scenario}.json
//! │   └── v1/workspaces/{ws}/
//! │       ├── config.toml                # optional workspace overrides
//! │       ├── catalog.json
//! │       ├── packs/index.json, packs/index.page2.json, ...
//! │       └── {packs|drills|exams}/{id}/{pack|drill|exam}.json
//! └── exports/bundles/{bundle}/
//! ```
//!
//! Content-relative paths (`v1/workspaces/de/catalog.json`) always use forward
//! slashes; they double as object-storage keys when publishing.

use crate::types::{ContentKind, Level};
use std::path::{Component, Path, PathBuf};

pub const CONFIG_FILE: &str = "packsmith.toml";
pub const WORKSPACE_CONFIG_FILE: &str = "config.toml";
pub const CATALOG_FILE: &str = "catalog.json";

/// Resolves every well-known path from a project root.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn content_dir(&self) -> PathBuf {
        self.root.join("content")
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.content_dir().join("v1").join("workspaces")
    }

    pub fn workspace_dir(&self, workspace: &str) -> PathBuf {
        self.workspaces_dir().join(workspace)
    }

    pub fn workspace_config_path(&self, workspace: &str) -> PathBuf {
        self.workspace_dir(workspace).join(WORKSPACE_CONFIG_FILE)
    }

    pub fn section_dir(&self, workspace: &str, kind: ContentKind) -> PathBuf {
        self.workspace_dir(workspace).join(kind.section())
    }

    pub fn entry_path(&self, workspace: &str, kind: ContentKind, id: &str) -> PathBuf {
        self.section_dir(workspace, kind)
            .join(id)
            .join(kind.file_name())
    }

    pub fn catalog_path(&self, workspace: &str) -> PathBuf {
        self.workspace_dir(workspace).join(CATALOG_FILE)
    }

    pub fn index_page_path(&self, workspace: &str, kind: ContentKind, page: usize) -> PathBuf {
        self.section_dir(workspace, kind)
            .join(index_page_file_name(page))
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.content_dir()
            .join("templates")
            .join("v1")
            .join("scenarios")
    }

    pub fn template_path(&self, scenario: &str) -> PathBuf {
        self.templates_dir().join(format!("{scenario}.json"))
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.content_dir().join("meta")
    }

    pub fn tokens_path(&self) -> PathBuf {
        self.meta_dir().join("scenario-tokens.json")
    }

    /// Production manifest: what readers of the content tree should trust.
    pub fn manifest_path(&self) -> PathBuf {
        self.meta_dir().join("manifest.json")
    }

    pub fn staging_manifest_path(&self) -> PathBuf {
        self.meta_dir().join("manifest.staging.json")
    }

    pub fn bundle_definitions_dir(&self) -> PathBuf {
        self.meta_dir().join("bundles")
    }

    pub fn bundle_definition_path(&self, bundle: &str) -> PathBuf {
        self.bundle_definitions_dir().join(format!("{bundle}.json"))
    }

    pub fn bundle_output_dir(&self, bundle: &str) -> PathBuf {
        self.root.join("exports").join("bundles").join(bundle)
    }

    /// Path relative to `content/`, joined with `/`. `None` outside the content tree.
    pub fn content_relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(self.content_dir()).ok()?;
        let parts: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        Some(parts.join("/"))
    }

    /// Inverse of [`Layout::content_relative`].
    pub fn from_content_relative(&self, rel: &str) -> PathBuf {
        rel.split('/')
            .filter(|s| !s.is_empty())
            .fold(self.content_dir(), |acc, part| acc.join(part))
    }
}

/// `index.json` for page 1, `index.page{n}.json` after that.
pub fn index_page_file_name(page: usize) -> String {
    if page <= 1 {
        "index.json".to_string()
    } else {
        format!("index.page{page}.json")
    }
}

/// Parse an index page file name back into its page number.
///
/// - `"index.json"` → `Some(1)`
/// - `"index.page3.json"` → `Some(3)`
/// - `"index.page1.json"`, `"index.page0.json"` → `None` (page 1 has no suffix)
/// - `"pack.json"` → `None`
pub fn parse_index_page_name(name: &str) -> Option<usize> {
    if name == "index.json" {
        return Some(1);
    }
    let n: usize = name
        .strip_prefix("index.page")?
        .strip_suffix(".json")?
        .parse()
        .ok()?;
    (n >= 2).then_some(n)
}

/// Ids are lowercase ASCII letters, digits, `_` and `-`.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Default id of a generated pack: `{scenario}_{level}_s{seed}`, lowercased.
///
/// Characters outside the id alphabet become `-`.
pub fn pack_id(scenario: &str, level: Level, seed: u64) -> String {
    format!("{scenario}_{level}_s{seed}")
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
