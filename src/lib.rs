//! # Packsmith
//!
//! A content pipeline for language-learning curriculum: structured JSON
//! packs, drills and exams for one or more workspaces (target languages).
//! The filesystem is the database; every stage reads and writes the layout
//! described in [`naming`].
//!
//! # Architecture: Staged Pipeline
//!
//! ```text
//! templates + seed  ─generate─▶  packs
//! workspace         ─validate─▶  quality report
//! workspace         ─review──▶   approved entries
//! approved entries  ─index───▶   catalog.json + {section}/index[.pageN].json
//! approved entries  ─bundle──▶   exports/bundles/{id}/
//! catalogs          ─manifest▶   manifest.staging.json ─promote─▶ manifest.json
//! manifest.json     ─publish─▶   object storage
//! ```
//!
//! Each stage is a plain function over the content tree, so it can run on its
//! own from the CLI or be driven end to end from tests.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`types`] | Entry documents (`Pack`, `Drill`, `Exam`) and their JSON form |
//! | [`naming`] | Content layout, id rules, index page names |
//! | [`config`] | Layered `packsmith.toml` loading, merging and validation |
//! | [`rng`] | Versioned seeded PRNG used by the generator |
//! | [`template`] | Scenario templates: slot banks, step blueprints, required tokens |
//! | [`tokens`] | Per-scenario token dictionaries and structured patches |
//! | [`generate`] | Deterministic pack generation, single and batch |
//! | [`analytics`] | Derived pack metrics and the backfill pass |
//! | [`scan`] | Parallel workspace loading |
//! | [`quality`] | Rule-based quality gate and report |
//! | [`dedupe`] | Cross-corpus duplicate prompt detection |
//! | [`review`] | Review state machine |
//! | [`index`] | Paginated indexes and workspace catalogs |
//! | [`bundle`] | Declarative curriculum bundles (JSON, markdown, HTML) |
//! | [`manifest`] | Hashed content manifests and staging → production promotion |
//! | [`publish`] | Ordered, retried upload to S3-compatible storage |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Determinism
//!
//! Generation is a pure function of template, level, seed and config. The
//! PRNG algorithm is named and versioned in every pack's provenance so a pack
//! can be regenerated byte-for-byte later. Indexes, bundles and manifests
//! embed no timestamps; `generatedAt` is metadata and never compared.
//!
//! ## Gates Report, They Never Fix
//!
//! The quality gate only reports. Commands that rewrite content
//! (`analytics backfill`) require `--write`, never touch approved entries,
//! and re-run the gate on what they produced.
//!
//! ## Pointers Go Last
//!
//! Publishing uploads entries, then index pages, then catalogs, then the
//! manifest, so a reader following pointers never reaches a missing file.
//! An upload that exhausts its retries stops the run.

pub mod analytics;
pub mod bundle;
pub mod config;
pub mod dedupe;
pub mod generate;
pub mod index;
pub mod manifest;
pub mod naming;
pub mod output;
pub mod publish;
pub mod quality;
pub mod review;
pub mod rng;
pub mod scan;
pub mod template;
pub mod tokens;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
