//! Pipeline configuration.
//!
//! Handles loading, validating, and merging `packsmith.toml`. Configuration is
//! hierarchical: stock defaults are overridden by the project file, which is in
//! turn overridden by an optional per-workspace `config.toml`.
//!
//! ```text
//! <root>/packsmith.toml                              ← project (overrides stock)
//! <root>/content/v1/workspaces/de/config.toml        ← workspace (overrides project)
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [generation]
//! max_attempts = 24            # step re-rolls before forcing a required token
//!
//! [quality]
//! min_multi_slot_rate = 0.3    # share of prompts varying >= 2 slots
//! min_token_density = 0.25     # mean distinct scenario tokens per prompt
//! max_duplicate_prompts = 0    # repeats tolerated within one pack
//! analytics_tolerance = 0.01   # allowed drift of stored analytics ratios
//! banned_phrases = ["lorem ipsum", "placeholder", "tbd", "todo", "xxx"]
//! formal_markers = ["Sie", "Ihnen"]
//! required_locales = []        # gloss_en_i18n locales to warn about
//!
//! [index]
//! page_size = 50
//!
//! [processing]
//! max_threads = 4              # omit for auto = CPU cores
//!
//! [publish]
//! bucket = ""
//! prefix = ""
//! endpoint_url = "https://<account>.r2.cloudflarestorage.com"
//! max_attempts = 3
//! backoff_ms = 2000
//!
//! [publish.cache_control]
//! manifest = "no-cache"
//! catalog = "public, max-age=300"
//! index = "public, max-age=300"
//! entry = "public, max-age=86400"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::naming::Layout;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Project configuration loaded from `packsmith.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub generation: GenerationConfig,
    pub quality: QualityConfig,
    pub index: IndexConfig,
    pub processing: ProcessingConfig,
    pub publish: PublishConfig,
}

impl PipelineConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let q = &self.quality;
        if !(0.0..=1.0).contains(&q.min_multi_slot_rate) {
            return Err(ConfigError::Validation(
                "quality.min_multi_slot_rate must be between 0 and 1".into(),
            ));
        }
        if q.min_token_density < 0.0 || !q.min_token_density.is_finite() {
            return Err(ConfigError::Validation(
                "quality.min_token_density must be a non-negative number".into(),
            ));
        }
        if q.analytics_tolerance < 0.0 || !q.analytics_tolerance.is_finite() {
            return Err(ConfigError::Validation(
                "quality.analytics_tolerance must be a non-negative number".into(),
            ));
        }
        if q.banned_phrases.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "quality.banned_phrases must not contain empty phrases".into(),
            ));
        }
        if self.generation.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "generation.max_attempts must be at least 1".into(),
            ));
        }
        if self.index.page_size == 0 {
            return Err(ConfigError::Validation(
                "index.page_size must be at least 1".into(),
            ));
        }
        if self.publish.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "publish.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Seeded generator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    /// Re-rolls allowed per step (and per prompt, for duplicate avoidance)
    /// before the generator falls back to forcing slot choices.
    pub max_attempts: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self { max_attempts: 24 }
    }
}

/// Quality gate thresholds and dictionaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QualityConfig {
    pub min_multi_slot_rate: f64,
    pub min_token_density: f64,
    pub max_duplicate_prompts: usize,
    pub analytics_tolerance: f64,
    /// Case-insensitive substrings that fail a pack outright.
    pub banned_phrases: Vec<String>,
    /// Whole-word, case-sensitive markers of formal address.
    pub formal_markers: Vec<String>,
    /// Locales every `gloss_en_i18n` should carry; gaps are warnings.
    pub required_locales: Vec<String>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_multi_slot_rate: 0.3,
            min_token_density: 0.25,
            max_duplicate_prompts: 0,
            analytics_tolerance: 0.01,
            banned_phrases: ["lorem ipsum", "placeholder", "tbd", "todo", "xxx"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            formal_markers: vec!["Sie".to_string(), "Ihnen".to_string()],
            required_locales: Vec::new(),
        }
    }
}

/// Index pagination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    pub page_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { page_size: 50 }
    }
}

/// Parallel file processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum worker threads for loading and checking files.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_threads: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_threads
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// Object storage target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublishConfig {
    pub bucket: String,
    /// Key prefix inside the bucket, without leading or trailing `/`.
    pub prefix: String,
    /// S3-compatible endpoint (R2). Omit for AWS S3.
    pub endpoint_url: Option<String>,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub cache_control: CacheControlConfig,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            prefix: String::new(),
            endpoint_url: None,
            max_attempts: 3,
            backoff_ms: 2000,
            cache_control: CacheControlConfig::default(),
        }
    }
}

/// `Cache-Control` header per published file category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheControlConfig {
    pub manifest: String,
    pub catalog: String,
    pub index: String,
    pub entry: String,
}

impl Default for CacheControlConfig {
    fn default() -> Self {
        Self {
            manifest: "no-cache".to_string(),
            catalog: "public, max-age=300".to_string(),
            index: "public, max-age=300".to_string(),
            entry: "public, max-age=86400".to_string(),
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer user overrides are merged onto.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(PipelineConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a TOML file as a raw value.
///
/// Returns `Ok(None)` if the file does not exist, `Err` if it is not valid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<PipelineConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: PipelineConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Project config: stock defaults with `packsmith.toml` merged on top.
pub fn load_config(layout: &Layout) -> Result<PipelineConfig, ConfigError> {
    let overlay = load_raw_config(&layout.config_path())?;
    resolve_config(stock_defaults_value(), overlay)
}

/// Workspace config: stock → `packsmith.toml` → workspace `config.toml`.
pub fn load_workspace_config(
    layout: &Layout,
    workspace: &str,
) -> Result<PipelineConfig, ConfigError> {
    let mut base = stock_defaults_value();
    if let Some(project) = load_raw_config(&layout.config_path())? {
        base = merge_toml(base, project);
    }
    let overlay = load_raw_config(&layout.workspace_config_path(workspace))?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `packsmith.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# packsmith configuration
# =======================
# All settings are optional. Values shown below are the defaults.
#
# Place this file at the project root as packsmith.toml. A workspace may
# override any key in content/v1/workspaces/<ws>/config.toml.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Seeded generation
# ---------------------------------------------------------------------------
[generation]
# Re-rolls per step before the generator forces a required scenario token
# into the step (and per prompt when avoiding duplicate sentences).
max_attempts = 24

# ---------------------------------------------------------------------------
# Quality gate
# ---------------------------------------------------------------------------
[quality]
# Minimum share of prompts that vary at least two slots.
min_multi_slot_rate = 0.3

# Minimum mean number of distinct scenario tokens per prompt.
min_token_density = 0.25

# Repeated sentences tolerated within one pack (after normalization).
max_duplicate_prompts = 0

# Allowed absolute drift between stored and recomputed analytics ratios.
analytics_tolerance = 0.01

# Case-insensitive substrings that fail a pack outright.
banned_phrases = ["lorem ipsum", "placeholder", "tbd", "todo", "xxx"]

# Whole-word markers one prompt of a formal pack must contain.
formal_markers = ["Sie", "Ihnen"]

# Locales every prompt's gloss_en_i18n should carry (warnings only).
required_locales = []

# ---------------------------------------------------------------------------
# Index pagination
# ---------------------------------------------------------------------------
[index]
page_size = 50

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum worker threads for loading and checking files.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_threads = 4

# ---------------------------------------------------------------------------
# Publishing (S3-compatible object storage via the aws CLI)
# ---------------------------------------------------------------------------
[publish]
bucket = ""
prefix = ""
# endpoint_url = "https://<account>.r2.cloudflarestorage.com"
max_attempts = 3
backoff_ms = 2000

[publish.cache_control]
manifest = "no-cache"
catalog = "public, max-age=300"
index = "public, max-age=300"
entry = "public, max-age=86400"
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_has_quality_thresholds() {
        let config = PipelineConfig::default();
        assert_eq!(config.quality.min_multi_slot_rate, 0.3);
        assert_eq!(config.quality.max_duplicate_prompts, 0);
        assert_eq!(config.quality.formal_markers, vec!["Sie", "Ihnen"]);
        assert_eq!(config.index.page_size, 50);
        assert_eq!(config.generation.max_attempts, 24);
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[quality]
min_token_density = 0.5
"#;
        let config: PipelineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.quality.min_token_density, 0.5);
        // Defaults preserved
        assert_eq!(config.quality.min_multi_slot_rate, 0.3);
        assert_eq!(config.index.page_size, 50);
    }

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&Layout::new(tmp.path())).unwrap();
        assert_eq!(config.index.page_size, 50);
    }

    #[test]
    fn load_config_reads_project_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("packsmith.toml"),
            r#"
[index]
page_size = 10

[publish]
bucket = "content-prod"
"#,
        )
        .unwrap();
        let config = load_config(&Layout::new(tmp.path())).unwrap();
        assert_eq!(config.index.page_size, 10);
        assert_eq!(config.publish.bucket, "content-prod");
        assert_eq!(config.publish.cache_control.manifest, "no-cache");
    }

    #[test]
    fn workspace_config_overrides_project() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        fs::write(
            layout.config_path(),
            "[index]\npage_size = 10\n\n[quality]\nmin_token_density = 0.5\n",
        )
        .unwrap();
        fs::create_dir_all(layout.workspace_dir("de")).unwrap();
        fs::write(
            layout.workspace_config_path("de"),
            "[quality]\nmin_token_density = 0.1\n",
        )
        .unwrap();

        let config = load_workspace_config(&layout, "de").unwrap();
        assert_eq!(config.quality.min_token_density, 0.1);
        // From project layer
        assert_eq!(config.index.page_size, 10);

        let other = load_workspace_config(&layout, "fr").unwrap();
        assert_eq!(other.quality.min_token_density, 0.5);
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("packsmith.toml"), "not valid [[[").unwrap();
        let result = load_config(&Layout::new(tmp.path()));
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn unknown_key_rejected() {
        let result: Result<PipelineConfig, _> = toml::from_str("[quality]\nmin_rate = 0.3\n");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("unknown field"));
    }

    #[test]
    fn unknown_section_rejected() {
        let result: Result<PipelineConfig, _> = toml::from_str("[qualty]\n");
        assert!(result.is_err());
    }

    #[test]
    fn merge_toml_deep_nested() {
        let base: toml::Value = toml::from_str(
            r#"
[publish.cache_control]
manifest = "no-cache"
entry = "public"
"#,
        )
        .unwrap();
        let overlay: toml::Value = toml::from_str(
            r#"
[publish.cache_control]
entry = "public, max-age=60"
"#,
        )
        .unwrap();
        let merged = merge_toml(base, overlay);
        let cc = merged.get("publish").unwrap().get("cache_control").unwrap();
        assert_eq!(cc.get("entry").unwrap().as_str(), Some("public, max-age=60"));
        assert_eq!(cc.get("manifest").unwrap().as_str(), Some("no-cache"));
    }

    #[test]
    fn merge_toml_replaces_arrays_wholesale() {
        let base: toml::Value = toml::from_str(r#"banned = ["a", "b"]"#).unwrap();
        let overlay: toml::Value = toml::from_str(r#"banned = ["c"]"#).unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged.get("banned").unwrap().as_array().unwrap().len(), 1);
    }

    #[test]
    fn validate_rejects_out_of_range_rate() {
        let mut config = PipelineConfig::default();
        config.quality.min_multi_slot_rate = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_multi_slot_rate"));
    }

    #[test]
    fn validate_rejects_zero_page_size() {
        let mut config = PipelineConfig::default();
        config.index.page_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn validate_rejects_empty_banned_phrase() {
        let mut config = PipelineConfig::default();
        config.quality.banned_phrases.push("  ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn resolve_config_rejects_invalid_values() {
        let overlay: toml::Value = toml::from_str("[generation]\nmax_attempts = 0\n").unwrap();
        let result = resolve_config(stock_defaults_value(), Some(overlay));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn effective_threads_user_constrains_down() {
        let config = ProcessingConfig {
            max_threads: Some(1),
        };
        assert_eq!(effective_threads(&config), 1);
    }

    #[test]
    fn effective_threads_clamped_to_cores() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let config = ProcessingConfig {
            max_threads: Some(99_999),
        };
        assert_eq!(effective_threads(&config), cores);
        assert_eq!(effective_threads(&ProcessingConfig::default()), cores);
    }

    #[test]
    fn stock_config_toml_roundtrips_to_defaults() {
        let config: PipelineConfig = toml::from_str(stock_config_toml()).unwrap();
        let defaults = PipelineConfig::default();
        assert_eq!(config.generation.max_attempts, defaults.generation.max_attempts);
        assert_eq!(config.quality.min_multi_slot_rate, defaults.quality.min_multi_slot_rate);
        assert_eq!(config.quality.min_token_density, defaults.quality.min_token_density);
        assert_eq!(config.quality.banned_phrases, defaults.quality.banned_phrases);
        assert_eq!(config.quality.formal_markers, defaults.quality.formal_markers);
        assert_eq!(config.index.page_size, defaults.index.page_size);
        assert_eq!(config.processing.max_threads, None);
        assert_eq!(config.publish.max_attempts, defaults.publish.max_attempts);
        assert_eq!(config.publish.cache_control.entry, defaults.publish.cache_control.entry);
    }

    #[test]
    fn stock_defaults_value_has_all_sections() {
        let val = stock_defaults_value();
        for section in ["generation", "quality", "index", "processing", "publish"] {
            assert!(val.get(section).is_some(), "missing [{section}]");
        }
    }
}
