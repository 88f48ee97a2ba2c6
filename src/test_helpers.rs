//! Shared test utilities for the packsmith test suite.
//!
//! Provides fixture setup, ready-made entries that pass the quality gate, and
//! helpers that write them into a workspace.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = setup_fixtures();
//! let layout = Layout::new(tmp.path());
//! write_entry(&layout, "de", &Entry::Pack(approved(sample_pack("work_basics", Level::A2))));
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::naming::Layout;
use crate::template::Template;
use crate::tokens::TokenDictionary;
use crate::types::{
    Drill, Entry, Exam, Exercise, Level, Pack, Prompt, Provenance, Register, Review,
    ReviewStatus, SessionPlan, SessionStep, write_json,
};

const WORK_TEMPLATE: &str = include_str!("../fixtures/content/templates/v1/scenarios/work.json");
const SCENARIO_TOKENS: &str = include_str!("../fixtures/content/meta/scenario-tokens.json");

// =========================================================================
// Fixture setup
// =========================================================================

/// Copy `fixtures/` (config plus `content/`) to a temp directory and return it.
///
/// Tests get an isolated copy they can mutate without affecting other tests
/// or the source fixtures.
pub fn setup_fixtures() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures");
    copy_dir_recursive(&fixtures, tmp.path()).unwrap();
    tmp
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            std::fs::create_dir_all(&dst_path)?;
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// The `work` scenario template from the fixtures.
pub fn work_template() -> Template {
    serde_json::from_str(WORK_TEMPLATE).unwrap()
}

/// The fixture token dictionary.
pub fn work_tokens() -> TokenDictionary {
    serde_json::from_str::<TokenDictionary>(SCENARIO_TOKENS)
        .unwrap()
        .normalized()
}

// =========================================================================
// Entry builders
// =========================================================================

fn prompt(id: String, text: &str, slots: &[&str]) -> Prompt {
    Prompt {
        id,
        text: text.to_string(),
        intent: "request".to_string(),
        gloss_en: String::new(),
        slots_changed: slots.iter().map(|s| s.to_string()).collect(),
        gloss_en_i18n: BTreeMap::new(),
        extra: BTreeMap::new(),
    }
}

/// A handcrafted formal `work` pack that passes every quality rule.
pub fn sample_pack(id: &str, level: Level) -> Pack {
    let prompts = vec![
        prompt(format!("{id}-01"), "Könnten Sie den Bericht heute schicken?", &["time", "object"]),
        prompt(format!("{id}-02"), "Passt Ihnen das Meeting am Montag?", &["meeting", "day"]),
        prompt(format!("{id}-03"), "Ich lese das Protokoll im Büro.", &["object"]),
    ];
    let prompt_ids = prompts.iter().map(|p| p.id.clone()).collect();
    Pack {
        id: id.to_string(),
        title: Some(format!("Work {level}")),
        level,
        scenario: "work".to_string(),
        register: Register::Formal,
        primary_structure: "modal_verbs".to_string(),
        variation_slots: vec!["time".into(), "object".into(), "meeting".into(), "day".into()],
        prompts,
        session_plan: SessionPlan {
            steps: vec![SessionStep {
                id: "main".to_string(),
                title: None,
                prompt_ids,
            }],
        },
        analytics: None,
        provenance: Provenance::handcrafted(),
        review: Review::default(),
        extra: BTreeMap::new(),
    }
}

pub fn sample_drill(id: &str, level: Level) -> Drill {
    let exercises = ["Ich gebe ___ Kollegen das Buch.", "Wir helfen ___ Kundin."]
        .iter()
        .enumerate()
        .map(|(i, text)| Exercise {
            id: format!("{id}-{:02}", i + 1),
            exercise_type: "fill_blank".to_string(),
            prompt: text.to_string(),
            answer: Some(if i == 0 { "dem" } else { "der" }.to_string()),
            gloss_en: String::new(),
            extra: BTreeMap::new(),
        })
        .collect();
    Drill {
        id: id.to_string(),
        title: Some("Dative articles".to_string()),
        level,
        scenario: Some("work".to_string()),
        register: Register::Neutral,
        primary_structure: "dative_case".to_string(),
        exercises,
        analytics: None,
        provenance: Provenance::handcrafted(),
        review: Review::default(),
        extra: BTreeMap::new(),
    }
}

pub fn sample_exam(id: &str, level: Level) -> Exam {
    Exam {
        id: id.to_string(),
        title: Some("Mock exam".to_string()),
        level,
        scenario: None,
        sections: vec![serde_json::json!({"id": "reading", "items": ["Lesen Sie den Text."]})],
        provenance: Some(Provenance::handcrafted()),
        review: Review::default(),
        extra: BTreeMap::new(),
    }
}

/// Mark any entry approved by a fixed reviewer.
pub fn approved<T: HasReview>(mut item: T) -> T {
    let review = item.review_mut();
    review.status = ReviewStatus::Approved;
    review.reviewer = Some("tester".to_string());
    review.reviewed_at = Some("2024-01-01T00:00:00Z".to_string());
    item
}

pub trait HasReview {
    fn review_mut(&mut self) -> &mut Review;
}

impl HasReview for Pack {
    fn review_mut(&mut self) -> &mut Review {
        &mut self.review
    }
}

impl HasReview for Drill {
    fn review_mut(&mut self) -> &mut Review {
        &mut self.review
    }
}

impl HasReview for Exam {
    fn review_mut(&mut self) -> &mut Review {
        &mut self.review
    }
}

/// Write an entry to its canonical location and return the path.
pub fn write_entry(layout: &Layout, workspace: &str, entry: &Entry) -> PathBuf {
    let path = layout.entry_path(workspace, entry.kind(), entry.id());
    match entry {
        Entry::Pack(p) => write_json(&path, p).unwrap(),
        Entry::Drill(d) => write_json(&path, d).unwrap(),
        Entry::Exam(e) => write_json(&path, e).unwrap(),
    }
    path
}

/// Write approved packs `{prefix}_01..` with levels cycling A1, A2, B1.
pub fn write_approved_packs(layout: &Layout, workspace: &str, prefix: &str, n: usize) -> Vec<String> {
    (1..=n)
        .map(|i| {
            let id = format!("{prefix}_{i:02}");
            let level = Level::ALL[(i - 1) % 3];
            write_entry(layout, workspace, &Entry::Pack(approved(sample_pack(&id, level))));
            id
        })
        .collect()
}
