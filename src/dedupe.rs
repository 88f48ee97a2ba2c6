//! Cross-corpus duplicate detection.
//!
//! Prompt texts (pack prompts and drill exercise prompts) are folded to a
//! comparison key and grouped across one or more workspaces. Any key seen more
//! than once is a [`DuplicateCluster`].
//!
//! The fold is locale-aware for German: umlauts and ß expand to their
//! two-letter spellings, so `"Büro"` and `"Buero"` collide while `"Büro"` and
//! `"Buro"` do not.

use crate::scan::WorkspaceScan;
use crate::types::{ContentKind, Entry};
use serde::Serialize;
use std::collections::BTreeMap;

const COMBINING_DIAERESIS: char = '\u{0308}';

/// Comparison key: lowercase, umlaut/ß expansion, punctuation stripped,
/// whitespace collapsed.
pub fn fold(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars().flat_map(char::to_lowercase) {
        match c {
            'ä' => out.push_str("ae"),
            'ö' => out.push_str("oe"),
            'ü' => out.push_str("ue"),
            'ß' => out.push_str("ss"),
            // decomposed umlaut: base vowel already pushed
            COMBINING_DIAERESIS if out.ends_with(['a', 'o', 'u']) => out.push('e'),
            c if c.is_alphanumeric() => out.push(c),
            c if c.is_whitespace() => out.push(' '),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Where one copy of a duplicated text lives.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Occurrence {
    pub workspace: String,
    pub kind: ContentKind,
    pub entry_id: String,
    pub item_id: String,
    pub path: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateCluster {
    pub key: String,
    pub occurrences: Vec<Occurrence>,
}

fn occurrences(workspace: &str, path: &str, entry: &Entry) -> Vec<Occurrence> {
    let make = |item_id: &str, text: &str| Occurrence {
        workspace: workspace.to_string(),
        kind: entry.kind(),
        entry_id: entry.id().to_string(),
        item_id: item_id.to_string(),
        path: path.to_string(),
        text: text.to_string(),
    };
    match entry {
        Entry::Pack(p) => p.prompts.iter().map(|x| make(&x.id, &x.text)).collect(),
        Entry::Drill(d) => d.exercises.iter().map(|x| make(&x.id, &x.prompt)).collect(),
        Entry::Exam(_) => Vec::new(),
    }
}

/// Group every prompt by folded text and keep groups with more than one member.
///
/// Clusters are sorted by key, occurrences by (workspace, kind, entry, item).
pub fn find_duplicates(scans: &[WorkspaceScan]) -> Vec<DuplicateCluster> {
    let mut groups: BTreeMap<String, Vec<Occurrence>> = BTreeMap::new();
    for scan in scans {
        for loaded in &scan.entries {
            let path = loaded.path.display().to_string();
            for occ in occurrences(&scan.workspace, &path, &loaded.entry) {
                let key = fold(&occ.text);
                if !key.is_empty() {
                    groups.entry(key).or_default().push(occ);
                }
            }
        }
    }
    groups
        .into_iter()
        .filter(|(_, occ)| occ.len() > 1)
        .map(|(key, mut occurrences)| {
            occurrences.sort();
            DuplicateCluster { key, occurrences }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::Layout;
    use crate::scan::scan_workspace;
    use crate::test_helpers::*;
    use crate::types::Level;

    #[test]
    fn fold_expands_umlauts_and_eszett() {
        assert_eq!(fold("Büro"), "buero");
        assert_eq!(fold("GRÖSSE"), "groesse");
        assert_eq!(fold("Straße"), "strasse");
        assert_eq!(fold("Äpfel"), "aepfel");
    }

    #[test]
    fn fold_handles_decomposed_umlauts() {
        assert_eq!(fold("Bu\u{0308}ro"), "buero");
        assert_eq!(fold("Bu\u{0308}ro"), fold("Büro"));
    }

    #[test]
    fn fold_strips_punctuation_and_whitespace() {
        assert_eq!(fold("  Guten   Tag, Frau Müller! "), "guten tag frau mueller");
        assert_eq!(fold("?!"), "");
    }

    #[test]
    fn fold_does_not_over_merge() {
        assert_ne!(fold("Büro"), fold("Buro"));
        assert_ne!(fold("Büro"), fold("Haus"));
        assert_ne!(fold("schon"), fold("schön"));
    }

    fn pack_with_texts(id: &str, texts: &[&str]) -> Entry {
        let mut pack = sample_pack(id, Level::A2);
        pack.prompts.truncate(texts.len());
        for (p, t) in pack.prompts.iter_mut().zip(texts) {
            p.text = t.to_string();
        }
        Entry::Pack(pack)
    }

    #[test]
    fn buero_and_büro_form_one_cluster() {
        let tmp = setup_fixtures();
        let layout = Layout::new(tmp.path());
        write_entry(&layout, "de", &pack_with_texts("one", &["Büro"]));
        write_entry(&layout, "de", &pack_with_texts("two", &["Buero"]));

        let scans = vec![scan_workspace(&layout, "de").unwrap()];
        let clusters = find_duplicates(&scans);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].key, "buero");
        let ids: Vec<&str> = clusters[0].occurrences.iter().map(|o| o.entry_id.as_str()).collect();
        assert_eq!(ids, vec!["one", "two"]);
    }

    #[test]
    fn distinct_texts_are_not_duplicates() {
        let tmp = setup_fixtures();
        let layout = Layout::new(tmp.path());
        write_entry(&layout, "de", &pack_with_texts("one", &["Büro"]));
        write_entry(&layout, "de", &pack_with_texts("two", &["Haus"]));

        let scans = vec![scan_workspace(&layout, "de").unwrap()];
        assert!(find_duplicates(&scans).is_empty());
    }

    #[test]
    fn clusters_span_workspaces_and_kinds() {
        let tmp = setup_fixtures();
        let layout = Layout::new(tmp.path());
        write_entry(&layout, "de", &pack_with_texts("p", &["Wir helfen der Kundin."]));
        write_entry(&layout, "at", &Entry::Drill(sample_drill("d", Level::A2)));

        let scans = crate::scan::scan_selected(&layout, None).unwrap();
        let clusters = find_duplicates(&scans);
        // "Wir helfen ___ Kundin." folds differently; only whole sentences match
        assert!(clusters.is_empty());

        write_entry(&layout, "at", &pack_with_texts("q", &["wir helfen der kundin"]));
        let scans = crate::scan::scan_selected(&layout, None).unwrap();
        let clusters = find_duplicates(&scans);
        assert_eq!(clusters.len(), 1);
        let places: Vec<(&str, &str)> = clusters[0]
            .occurrences
            .iter()
            .map(|o| (o.workspace.as_str(), o.entry_id.as_str()))
            .collect();
        assert_eq!(places, vec![("at", "q"), ("de", "p")]);
    }
}
