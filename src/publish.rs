//! Upload the promoted content tree to object storage.
//!
//! The upload plan comes from the production manifest, which is re-verified
//! against disk first. Files go up one at a time in dependency order so a
//! reader never sees a pointer before its target:
//!
//! ```text
//! entries → index pages → catalogs → meta/manifest.json
//! ```
//!
//! Every upload is retried with a fixed backoff up to
//! `publish.max_attempts`. When one exhausts its attempts the run stops
//! there; nothing after it is uploaded.
//!
//! Object keys are content-relative paths under `publish.prefix`, and each
//! carries the `Cache-Control` header of its category from
//! `[publish.cache_control]`.

use crate::config::{CacheControlConfig, PublishConfig};
use crate::manifest::{self, ContentManifest, ManifestError};
use crate::naming::{self, Layout};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("no production manifest at {0}; run `packsmith promote` first")]
    NoManifest(PathBuf),
    #[error("publish.bucket is not configured")]
    NoBucket,
    #[error("production manifest does not match disk ({} problem(s)): {}", .0.len(), .0.join("; "))]
    Drift(Vec<String>),
    #[error("upload of {key} failed after {attempts} attempt(s): {message} ({uploaded} file(s) uploaded before it)")]
    UploadFailed {
        key: String,
        attempts: u32,
        uploaded: usize,
        message: String,
    },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Failed(String),
}

/// Where a file sits in the publish order, and which cache header it gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Entry,
    Index,
    Catalog,
    Manifest,
}

impl FileCategory {
    /// Category of a content-relative path.
    pub fn of(rel: &str) -> Self {
        let name = rel.rsplit('/').next().unwrap_or(rel);
        if rel.starts_with("meta/") {
            FileCategory::Manifest
        } else if name == naming::CATALOG_FILE {
            FileCategory::Catalog
        } else if naming::parse_index_page_name(name).is_some() {
            FileCategory::Index
        } else {
            FileCategory::Entry
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Entry => "entry",
            FileCategory::Index => "index",
            FileCategory::Catalog => "catalog",
            FileCategory::Manifest => "manifest",
        }
    }

    pub fn cache_control<'a>(&self, config: &'a CacheControlConfig) -> &'a str {
        match self {
            FileCategory::Entry => &config.entry,
            FileCategory::Index => &config.index,
            FileCategory::Catalog => &config.catalog,
            FileCategory::Manifest => &config.manifest,
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned object write.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    pub source: PathBuf,
    pub key: String,
    pub category: FileCategory,
    pub cache_control: String,
}

/// Something that can store a JSON file under a key.
pub trait ObjectStore {
    fn put(&self, upload: &Upload) -> Result<(), StoreError>;
}

/// Uploads through `aws s3 cp`, which also covers R2 via `--endpoint-url`.
#[derive(Debug, Clone)]
pub struct AwsCliStore {
    pub bucket: String,
    pub endpoint_url: Option<String>,
}

impl AwsCliStore {
    pub fn from_config(config: &PublishConfig) -> Self {
        Self {
            bucket: config.bucket.clone(),
            endpoint_url: config.endpoint_url.clone(),
        }
    }

    pub fn args(&self, upload: &Upload) -> Vec<String> {
        let mut args = vec![
            "s3".to_string(),
            "cp".to_string(),
            upload.source.display().to_string(),
            format!("s3://{}/{}", self.bucket, upload.key),
            "--content-type".to_string(),
            "application/json".to_string(),
            "--cache-control".to_string(),
            upload.cache_control.clone(),
            "--only-show-errors".to_string(),
        ];
        if let Some(endpoint) = &self.endpoint_url {
            args.push("--endpoint-url".to_string());
            args.push(endpoint.clone());
        }
        args
    }
}

impl ObjectStore for AwsCliStore {
    fn put(&self, upload: &Upload) -> Result<(), StoreError> {
        let output = Command::new("aws").args(self.args(upload)).output()?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(StoreError::Failed(if stderr.is_empty() {
                format!("aws exited with {}", output.status)
            } else {
                stderr
            }))
        }
    }
}

// ============================================================================
// Planning
// ============================================================================

/// `{prefix}/{rel}`, or just `rel` without a prefix.
pub fn object_key(prefix: &str, rel: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        rel.to_string()
    } else {
        format!("{prefix}/{rel}")
    }
}

/// Every upload for a manifest, in publish order, the manifest itself last.
pub fn plan(layout: &Layout, manifest: &ContentManifest, config: &PublishConfig) -> Vec<Upload> {
    let manifest_path = layout.manifest_path();
    let manifest_rel = layout
        .content_relative(&manifest_path)
        .unwrap_or_else(|| "meta/manifest.json".to_string());

    let mut rels: Vec<&str> = manifest.paths();
    rels.push(&manifest_rel);
    let mut uploads: Vec<Upload> = rels
        .into_iter()
        .map(|rel| {
            let category = FileCategory::of(rel);
            Upload {
                source: layout.from_content_relative(rel),
                key: object_key(&config.prefix, rel),
                category,
                cache_control: category.cache_control(&config.cache_control).to_string(),
            }
        })
        .collect();
    uploads.sort_by(|a, b| (a.category, &a.key).cmp(&(b.category, &b.key)));
    uploads.dedup_by(|a, b| a.key == b.key);
    uploads
}

// ============================================================================
// Execution
// ============================================================================

/// Put one file, retrying with a fixed backoff. Returns the attempts used.
pub fn upload_with_retry(
    store: &dyn ObjectStore,
    upload: &Upload,
    max_attempts: u32,
    backoff: Duration,
) -> Result<u32, (u32, StoreError)> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match store.put(upload) {
            Ok(()) => return Ok(attempt),
            Err(e) if attempt >= max_attempts => return Err((attempt, e)),
            Err(e) => {
                tracing::warn!(key = %upload.key, attempt, error = %e, "upload failed, retrying");
                thread::sleep(backoff);
                attempt += 1;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Uploaded {
    pub key: String,
    pub category: FileCategory,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReport {
    pub dry_run: bool,
    pub bucket: String,
    pub planned: Vec<Upload>,
    pub uploaded: Vec<Uploaded>,
}

fn load_verified(layout: &Layout) -> Result<ContentManifest, PublishError> {
    let path = layout.manifest_path();
    if !path.is_file() {
        return Err(PublishError::NoManifest(path));
    }
    let manifest = ContentManifest::load(&path)?;
    let problems = manifest::verify(layout, &manifest);
    if !problems.is_empty() {
        return Err(PublishError::Drift(problems));
    }
    Ok(manifest)
}

/// Publish the production manifest and everything it names.
///
/// With `dry_run` the plan is returned and nothing is uploaded.
pub fn publish(
    layout: &Layout,
    config: &PublishConfig,
    store: &dyn ObjectStore,
    dry_run: bool,
) -> Result<PublishReport, PublishError> {
    let manifest = load_verified(layout)?;
    let planned = plan(layout, &manifest, config);
    let mut report = PublishReport {
        dry_run,
        bucket: config.bucket.clone(),
        planned,
        uploaded: Vec::new(),
    };
    if dry_run {
        return Ok(report);
    }
    if config.bucket.trim().is_empty() {
        return Err(PublishError::NoBucket);
    }

    let backoff = Duration::from_millis(config.backoff_ms);
    for upload in &report.planned {
        match upload_with_retry(store, upload, config.max_attempts, backoff) {
            Ok(attempts) => {
                tracing::debug!(key = %upload.key, attempts, "uploaded");
                report.uploaded.push(Uploaded {
                    key: upload.key.clone(),
                    category: upload.category,
                    attempts,
                });
            }
            Err((attempts, e)) => {
                tracing::error!(key = %upload.key, attempts, error = %e, "upload failed, aborting");
                return Err(PublishError::UploadFailed {
                    key: upload.key.clone(),
                    attempts,
                    uploaded: report.uploaded.len(),
                    message: e.to_string(),
                });
            }
        }
    }
    tracing::info!(bucket = %config.bucket, files = report.uploaded.len(), "publish complete");
    Ok(report)
}

/// Where a planned upload reads from, relative to the root when possible.
pub fn display_source(layout: &Layout, source: &Path) -> String {
    source
        .strip_prefix(layout.root())
        .unwrap_or(source)
        .display()
        .to_string()
}
