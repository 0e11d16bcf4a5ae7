//! Learning-objective validation and deduplication.
//!
//! Generated objectives are only kept when they read like real,
//! course-specific objectives: bounded length, an action-verb opening,
//! and no placeholder filler. Near-duplicates are dropped by token
//! overlap so repeated generation attempts converge on distinct items.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

/// Verbs an objective may open with, grouped roughly by cognitive level.
const ACTION_VERBS: &[&str] = &[
    "understand",
    "explain",
    "describe",
    "identify",
    "recognize",
    "recall",
    "comprehend",
    "interpret",
    "summarize",
    "classify",
    "distinguish",
    "analyze",
    "compare",
    "contrast",
    "examine",
    "investigate",
    "explore",
    "evaluate",
    "assess",
    "critique",
    "justify",
    "determine",
    "derive",
    "apply",
    "demonstrate",
    "illustrate",
    "relate",
    "use",
    "employ",
];

fn placeholder_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"^lo\s*[1-9]\d*$",
            r"^objective\s*[1-9]\d*\b",
            r"^learning objective\b",
            r"^new objective\b",
            r"^additional objective\b",
            r"^\[.*\]$",
            r"^<.*>$",
            r"^(tbd|todo|n/a|none|placeholder)$",
        ]
        .iter()
        .map(|p| Regex::new(&format!("(?i){}", p)).unwrap())
        .collect()
    })
}

/// Whether a string is generic filler rather than a real objective.
pub fn is_placeholder(text: &str) -> bool {
    let t = text.trim().trim_end_matches(['.', ':']);
    placeholder_patterns().iter().any(|p| p.is_match(t))
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Jaccard-style overlap: shared tokens over the smaller token set.
pub fn token_overlap(a: &str, b: &str) -> f64 {
    let ta: HashSet<String> = tokenize(a).into_iter().collect();
    let tb: HashSet<String> = tokenize(b).into_iter().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    shared as f64 / ta.len().min(tb.len()) as f64
}

#[derive(Debug, Clone)]
pub struct ObjectiveValidator {
    /// Candidates with token overlap above this against a kept objective
    /// are treated as duplicates.
    pub overlap_threshold: f64,
}

impl ObjectiveValidator {
    pub fn new(overlap_threshold: f64) -> Self {
        Self { overlap_threshold }
    }

    /// Whether a single candidate is acceptable on its own.
    pub fn is_valid(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.chars().count() < 20 {
            return false;
        }
        let words: Vec<&str> = trimmed.split_whitespace().collect();
        if words.len() < 6 || words.len() > 20 {
            return false;
        }
        if is_placeholder(trimmed) {
            return false;
        }
        let first = words[0]
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if !ACTION_VERBS.contains(&first.as_str()) {
            return false;
        }
        // Degenerate repetition ("explain explain explain ...").
        let unique: HashSet<String> = words.iter().map(|w| w.to_lowercase()).collect();
        unique.len() >= 4
    }

    /// Whether `candidate` duplicates any already-kept objective, by
    /// exact match (case-insensitive) or token overlap.
    pub fn is_duplicate(&self, candidate: &str, kept: &[String]) -> bool {
        let lower = candidate.trim().to_lowercase();
        kept.iter().any(|k| {
            k.trim().to_lowercase() == lower
                || token_overlap(candidate, k) > self.overlap_threshold
        })
    }

    /// Filter a batch: keep valid, non-duplicate candidates, preserving
    /// order, deduplicating against both `existing` and earlier keeps.
    pub fn filter_new(&self, candidates: &[String], existing: &[String]) -> Vec<String> {
        let mut kept: Vec<String> = Vec::new();
        for c in candidates {
            let c = c.trim();
            if !self.is_valid(c) {
                tracing::debug!(candidate = c, "rejected objective");
                continue;
            }
            let mut all: Vec<String> = existing.to_vec();
            all.extend(kept.iter().cloned());
            if self.is_duplicate(c, &all) {
                tracing::debug!(candidate = c, "duplicate objective");
                continue;
            }
            kept.push(c.to_string());
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> ObjectiveValidator {
        ObjectiveValidator::new(0.6)
    }

    #[test]
    fn accepts_well_formed_objectives() {
        let v = validator();
        assert!(v.is_valid("Explain the role of mitochondria in cellular energy production"));
        assert!(v.is_valid("Compare supervised and unsupervised learning approaches in practice"));
    }

    #[test]
    fn rejects_short_long_and_verbless() {
        let v = validator();
        assert!(!v.is_valid("Explain gravity"));
        assert!(!v.is_valid("Mitochondria are the powerhouse of the cell in most organisms"));
        let long = format!("Explain {}", "very ".repeat(25));
        assert!(!v.is_valid(&long));
    }

    #[test]
    fn rejects_placeholders() {
        assert!(is_placeholder("LO1"));
        assert!(is_placeholder("lo 3"));
        assert!(is_placeholder("Objective 2"));
        assert!(is_placeholder("Learning objective"));
        assert!(is_placeholder("New objective here"));
        assert!(is_placeholder("[insert objective]"));
        assert!(is_placeholder("TBD"));
        assert!(!is_placeholder(
            "Explain the difference between precision and recall"
        ));
    }

    #[test]
    fn rejects_degenerate_repetition() {
        let v = validator();
        assert!(!v.is_valid("Explain explain explain explain explain explain explain"));
    }

    #[test]
    fn overlap_dedup_drops_near_duplicates() {
        let v = validator();
        let kept = vec!["Explain the role of mitochondria in cellular energy production".to_string()];
        assert!(v.is_duplicate(
            "Explain the role of mitochondria in energy production",
            &kept
        ));
        assert!(!v.is_duplicate(
            "Compare aerobic and anaerobic respiration pathways in detail",
            &kept
        ));
    }

    #[test]
    fn exact_duplicates_are_case_insensitive() {
        let v = validator();
        let kept = vec!["Explain the basics of thermodynamics and heat transfer".to_string()];
        assert!(v.is_duplicate(
            "explain the basics of thermodynamics and heat transfer",
            &kept
        ));
    }

    #[test]
    fn filter_preserves_order_and_dedups_within_batch() {
        let v = validator();
        let candidates = vec![
            "Describe the structure of a eukaryotic cell membrane bilayer".to_string(),
            "LO2".to_string(),
            "Describe the structure of a eukaryotic cell membrane bilayer".to_string(),
            "Analyze how enzymes lower activation energy in reactions".to_string(),
        ];
        let kept = v.filter_new(&candidates, &[]);
        assert_eq!(kept.len(), 2);
        assert!(kept[0].starts_with("Describe"));
        assert!(kept[1].starts_with("Analyze"));
    }
}
